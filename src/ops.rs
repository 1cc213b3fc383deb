// SPDX-License-Identifier: MIT OR Apache-2.0

//! High-level repository operations, consumed by the command-line wrapper.
//!
//! Every membership change follows the same save discipline: refresh the epoch-key archive
//! under the new epoch secret, then the epoch marker, the committed blob and the local
//! snapshot. A crash between writes leaves a repository that recovers by re-ratcheting from
//! the committed state on the next load.
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::crypto::ed25519::{Ed25519Error, SigningKey};
use crate::crypto::sha2::sha2_256;
use crate::crypto::{CryptoError, Rng, encoding};
use crate::filter::FilterCache;
use crate::git::{GitError, GitRepo};
use crate::group::{ArchiveError, EpochArchive, Group, GroupError, KeyPackage, MemberKeys};
use crate::seal::{FileHash, Manifest, SealError};
use crate::store::{self, Identity, MemberRecord, PendingRequest, RepoPaths, StoreError};

/// Result of an epoch-advancing membership change.
#[derive(Clone, Debug)]
pub struct MembershipChange {
    pub member_id: String,
    pub name: String,
    pub old_epoch: u64,
    pub new_epoch: u64,
}

/// Result of completing a join.
#[derive(Clone, Debug)]
pub struct JoinSummary {
    pub epoch: u64,
    pub member_count: usize,
    /// Epochs recoverable from the archive, empty when the archive was unreadable.
    pub archive_epochs: Vec<u64>,
}

/// Derives a short member id from the display name and the current time.
fn member_id_for(name: &str) -> String {
    let raw = format!("{name}-{}", store::unix_timestamp());
    hex::encode(sha2_256(&[raw.as_bytes()]))[..12].to_string()
}

/// Group id derived from the repository root path, truncated to 24 bytes.
fn group_id_for(root: &Path) -> Vec<u8> {
    let digest = hex::encode(sha2_256(&[root.to_string_lossy().as_bytes()]));
    format!("mlsgit-{digest}").into_bytes()[..24].to_vec()
}

fn remove_if_exists(path: &Path) -> Result<(), OpsError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Sets up encryption in a repository and creates the group with the caller as sole member.
pub fn initialize(
    repo: &GitRepo,
    name: &str,
    passphrase: Option<&str>,
    filter_binary: &str,
    rng: &Rng,
) -> Result<Identity, OpsError> {
    let paths = RepoPaths::new(repo.root());
    if paths.state_dir().exists() {
        return Err(OpsError::AlreadyInitialized);
    }
    paths.ensure_dirs()?;

    let signing_key = SigningKey::generate(rng)?;
    store::write_signing_key(&paths, &signing_key, passphrase)?;

    let keys = MemberKeys::generate(rng)?;
    store::write_init_key(&paths, &keys.init)?;
    let package = keys.key_package(name.as_bytes().to_vec());

    let member_id = member_id_for(name);
    let identity = Identity {
        member_id: member_id.clone(),
        name: name.to_string(),
    };
    store::write_identity(&paths, &identity)?;

    let group = Group::create(group_id_for(repo.root()), keys, rng)?;

    store::write_config(&paths, &Config::default())?;
    store::write_member(
        &paths,
        &member_id,
        &MemberRecord {
            name: name.to_string(),
            public_key: signing_key.verifying_key().to_public_key_pem()?,
            joined_epoch: group.epoch(),
            added_by: "self".to_string(),
        },
    )?;
    store::write_member_key_package(&paths, &member_id, &package)?;

    let mut archive = EpochArchive::new();
    persist_group_state(&paths, &group, &mut archive, rng)?;

    repo.install_filter(filter_binary)?;
    repo.write_attribute_files()?;
    repo.update_gitignore()?;

    info!(member_id = %identity.member_id, "initialized encrypted repository");
    Ok(identity)
}

/// Creates a pending join request in an already-initialized repository.
pub fn request_join(
    repo: &GitRepo,
    name: &str,
    passphrase: Option<&str>,
    filter_binary: &str,
    rng: &Rng,
) -> Result<Identity, OpsError> {
    let paths = RepoPaths::new(repo.root());
    if !paths.state_dir().exists() {
        return Err(OpsError::NotInitialized);
    }
    paths.ensure_dirs()?;
    repo.install_filter(filter_binary)?;

    if paths.local_state().exists() {
        return Err(OpsError::AlreadyJoined);
    }
    if paths.identity_file().exists() {
        return Err(OpsError::AlreadyRequested);
    }

    let signing_key = SigningKey::generate(rng)?;
    store::write_signing_key(&paths, &signing_key, passphrase)?;

    let keys = MemberKeys::generate(rng)?;
    store::write_init_key(&paths, &keys.init)?;
    store::write_leaf_seed(&paths, &keys.signing)?;
    let package = keys.key_package(name.as_bytes().to_vec());

    let member_id = member_id_for(name);
    let identity = Identity {
        member_id: member_id.clone(),
        name: name.to_string(),
    };
    store::write_identity(&paths, &identity)?;

    store::write_pending_request(
        &paths,
        &PendingRequest {
            member_id,
            name: name.to_string(),
            public_key: signing_key.verifying_key().to_public_key_pem()?,
            keypackage: encoding::encode_std(&serde_json::to_vec(&package)?),
            timestamp: store::unix_timestamp(),
        },
    )?;

    info!(member_id = %identity.member_id, "created join request");
    Ok(identity)
}

/// Approves a pending join request, advancing the epoch and emitting the Welcome.
pub fn approve_member(
    paths: &RepoPaths,
    member_id: &str,
    rng: &Rng,
) -> Result<MembershipChange, OpsError> {
    if !paths.pending_request(member_id).exists() {
        return Err(OpsError::NoPendingRequest(member_id.to_string()));
    }
    let request = store::read_pending_request(paths, member_id)?;
    let package: KeyPackage =
        serde_json::from_slice(&encoding::decode_std(request.keypackage.trim())?)?;

    let mut group = load_group(paths)?;
    let mut archive = load_archive(paths, &group)?;
    let old_epoch = group.epoch();

    let (_committed, welcome) = group.add_member(&package, rng)?;
    let new_epoch = group.epoch();

    store::write_welcome(paths, member_id, &welcome)?;
    let me = store::read_identity(paths)?;
    store::write_member(
        paths,
        member_id,
        &MemberRecord {
            name: request.name.clone(),
            public_key: request.public_key.clone(),
            joined_epoch: new_epoch,
            added_by: me.member_id,
        },
    )?;
    store::write_member_key_package(paths, member_id, &package)?;
    remove_if_exists(&paths.pending_request(member_id))?;

    persist_group_state(paths, &group, &mut archive, rng)?;
    FilterCache::new(paths.cache_dir()).invalidate_all()?;

    info!(member_id, old_epoch, new_epoch, "added member to group");
    Ok(MembershipChange {
        member_id: member_id.to_string(),
        name: request.name,
        old_epoch,
        new_epoch,
    })
}

/// Removes a member, advancing the epoch with a DH-encapsulated update secret.
pub fn remove_member(
    paths: &RepoPaths,
    member_id: &str,
    rng: &Rng,
) -> Result<MembershipChange, OpsError> {
    if !paths.member_file(member_id).exists() {
        return Err(OpsError::UnknownMember(member_id.to_string()));
    }
    let record = store::read_member(paths, member_id)?;

    let mut group = load_group(paths)?;
    let mut archive = load_archive(paths, &group)?;
    let old_epoch = group.epoch();

    // The member's leaf is identified by the signing key in their key package.
    let package = store::read_member_key_package(paths, member_id)?;
    let leaf_index = group
        .members()
        .iter()
        .position(|member| member.sig_pub == package.sig_pub)
        .ok_or_else(|| OpsError::UnknownMember(member_id.to_string()))?;

    group.remove_member(leaf_index as u32, rng)?;
    let new_epoch = group.epoch();

    remove_if_exists(&paths.member_file(member_id))?;
    remove_if_exists(&paths.member_key_package(member_id))?;
    remove_if_exists(&paths.welcome_file(member_id))?;

    persist_group_state(paths, &group, &mut archive, rng)?;
    FilterCache::new(paths.cache_dir()).invalidate_all()?;

    info!(member_id, old_epoch, new_epoch, "removed member from group");
    Ok(MembershipChange {
        member_id: member_id.to_string(),
        name: record.name,
        old_epoch,
        new_epoch,
    })
}

/// Completes a join after the Welcome has arrived: decrypts it and installs local state.
pub fn complete_join(paths: &RepoPaths) -> Result<JoinSummary, OpsError> {
    if !paths.state_dir().exists() {
        return Err(OpsError::NotInitialized);
    }
    if paths.local_state().exists() {
        return Err(OpsError::AlreadyJoined);
    }
    if !paths.identity_file().exists() {
        return Err(OpsError::NoJoinRequest);
    }

    let identity = store::read_identity(paths)?;
    if !paths.welcome_file(&identity.member_id).exists() {
        return Err(OpsError::NoWelcome(identity.member_id));
    }

    let keys = MemberKeys {
        signing: store::read_leaf_seed(paths)?,
        init: store::read_init_key(paths)?,
    };
    let welcome = store::read_welcome(paths, &identity.member_id)?;
    let group = Group::join_from_welcome(&welcome, keys)?;
    store::write_local_group(paths, &group)?;

    // Historical decryption is best-effort: an archive sealed under an older epoch is
    // tolerated, it only limits how far back this peer can read.
    let exported = group.export_epoch_secret()?;
    let archive_epochs = match store::read_epoch_archive(paths) {
        Ok(data) => match EpochArchive::decrypt(&data, &exported) {
            Ok(archive) => archive.epochs(),
            Err(_) => Vec::new(),
        },
        Err(_) => Vec::new(),
    };

    info!(epoch = group.epoch(), "joined group from welcome");
    Ok(JoinSummary {
        epoch: group.epoch(),
        member_count: group.member_count(),
        archive_epochs,
    })
}

/// Computes, signs and writes the Merkle manifest over all staged ciphertexts.
pub fn seal_repository(repo: &GitRepo, paths: &RepoPaths) -> Result<Manifest, OpsError> {
    if !paths.local_state().exists() {
        return Err(OpsError::NotJoined);
    }
    let identity = store::read_identity(paths)?;
    let signing_key = store::read_signing_key(paths, None)?;
    let group = load_group(paths)?;

    let manifest = crate::seal::seal(
        collect_leaves(repo)?,
        &identity.member_id,
        group.epoch(),
        &signing_key,
    )?;
    fs::write(paths.manifest_file(), manifest.to_toml()?)?;

    info!(root = %manifest.root_hash, files = manifest.file_count, "sealed repository");
    Ok(manifest)
}

/// Verifies the repository against its manifest; returns the manifest on success.
pub fn verify_repository(repo: &GitRepo, paths: &RepoPaths) -> Result<Manifest, OpsError> {
    let text = fs::read_to_string(paths.manifest_file())
        .map_err(|_| OpsError::NoManifest)?;
    let manifest = Manifest::from_toml(&text)?;

    let author_key = store::read_member_key(paths, &manifest.author)?;
    crate::seal::verify(collect_leaves(repo)?, &manifest, &author_key)?;
    Ok(manifest)
}

fn collect_leaves(repo: &GitRepo) -> Result<Vec<FileHash>, OpsError> {
    let mut leaves = Vec::new();
    for path in repo.tracked_paths()? {
        // Unreadable staged blobs (e.g. deleted but still listed) are skipped.
        let Ok(ciphertext) = repo.staged_contents(&path) else {
            continue;
        };
        leaves.push(FileHash::new(path, &ciphertext));
    }
    Ok(leaves)
}

/// Loads the local group, ratcheting forward when the committed state has moved ahead.
fn load_group(paths: &RepoPaths) -> Result<Group, OpsError> {
    let mut group = store::read_local_group(paths)?;
    if let Ok(committed) = store::read_committed_state(paths) {
        if group.sync_from_committed(&committed)? {
            store::write_local_group(paths, &group)?;
            FilterCache::new(paths.cache_dir()).invalidate_all()?;
        }
    }
    Ok(group)
}

/// Loads the archive, seeding a fresh one when none exists yet.
fn load_archive(paths: &RepoPaths, group: &Group) -> Result<EpochArchive, OpsError> {
    let exported = group.export_epoch_secret()?;
    let mut archive = match store::read_epoch_archive(paths) {
        Ok(data) => EpochArchive::decrypt(&data, &exported)?,
        Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            EpochArchive::new_with_secret(group.epoch(), exported)
        }
        Err(err) => return Err(err.into()),
    };
    if !archive.has(group.epoch()) {
        archive.add(group.epoch(), exported);
    }
    Ok(archive)
}

/// Persists every state artifact after a group mutation, archive first.
fn persist_group_state(
    paths: &RepoPaths,
    group: &Group,
    archive: &mut EpochArchive,
    rng: &Rng,
) -> Result<(), OpsError> {
    let exported = group.export_epoch_secret()?;
    archive.add(group.epoch(), exported);
    store::write_epoch_archive(paths, &archive.encrypt(&exported, rng)?)?;
    store::write_epoch_marker(paths, group.epoch())?;
    store::write_committed_state(paths, &group.to_committed_bytes()?)?;
    store::write_local_group(paths, group)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("repository is already initialized")]
    AlreadyInitialized,

    #[error("repository is not set up for encryption")]
    NotInitialized,

    #[error("this peer is already a group member")]
    AlreadyJoined,

    #[error("a join request was already created; waiting for approval")]
    AlreadyRequested,

    #[error("no join request exists yet")]
    NoJoinRequest,

    #[error("this peer has not joined the group")]
    NotJoined,

    #[error("no welcome message found for member {0}")]
    NoWelcome(String),

    #[error("no pending request for member {0}")]
    NoPendingRequest(String),

    #[error("unknown member {0}")]
    UnknownMember(String),

    #[error("no manifest found; seal the repository first")]
    NoManifest,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Seal(#[from] SealError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Key(#[from] Ed25519Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Encoding(#[from] base64::DecodeError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
