// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence of state blobs and the small declarative TOML files.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, ConfigError, PASSPHRASE_ENV};
use crate::crypto::ed25519::{Ed25519Error, SigningKey, VerifyingKey};
use crate::crypto::{encoding, x25519};
use crate::group::{Group, GroupError};
use crate::store::paths::RepoPaths;

/// Local identity, never committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub member_id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    identity: Identity,
}

/// Entry of the shared members directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub name: String,
    /// SubjectPublicKeyInfo PEM of the member's signing key.
    pub public_key: String,
    pub joined_epoch: u64,
    pub added_by: String,
}

#[derive(Serialize, Deserialize)]
struct MemberFile {
    member: MemberRecord,
}

/// A join request waiting for approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub member_id: String,
    pub name: String,
    /// SubjectPublicKeyInfo PEM of the requester's signing key.
    pub public_key: String,
    /// Standard base64 of the key-package JSON.
    pub keypackage: String,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct RequestFile {
    request: PendingRequest,
}

#[derive(Serialize, Deserialize)]
struct EpochFile {
    epoch: EpochSection,
}

#[derive(Serialize, Deserialize)]
struct EpochSection {
    current: u64,
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

// --- identity ---

pub fn write_identity(paths: &RepoPaths, identity: &Identity) -> Result<(), StoreError> {
    let text = toml::to_string(&IdentityFile {
        identity: identity.clone(),
    })?;
    Ok(fs::write(paths.identity_file(), text)?)
}

pub fn read_identity(paths: &RepoPaths) -> Result<Identity, StoreError> {
    let text = fs::read_to_string(paths.identity_file())?;
    let file: IdentityFile = toml::from_str(&text)?;
    Ok(file.identity)
}

// --- members ---

pub fn write_member(
    paths: &RepoPaths,
    member_id: &str,
    record: &MemberRecord,
) -> Result<(), StoreError> {
    let text = toml::to_string(&MemberFile {
        member: record.clone(),
    })?;
    Ok(fs::write(paths.member_file(member_id), text)?)
}

pub fn read_member(paths: &RepoPaths, member_id: &str) -> Result<MemberRecord, StoreError> {
    let text = fs::read_to_string(paths.member_file(member_id))?;
    let file: MemberFile = toml::from_str(&text)?;
    Ok(file.member)
}

/// Loads the signing public key of a member from the members directory.
pub fn read_member_key(paths: &RepoPaths, member_id: &str) -> Result<VerifyingKey, StoreError> {
    let record = read_member(paths, member_id)?;
    Ok(VerifyingKey::from_public_key_pem(record.public_key.trim())?)
}

/// Sorted member ids found in the members directory.
pub fn list_member_ids(paths: &RepoPaths) -> Result<Vec<String>, StoreError> {
    list_with_suffix(&paths.members_dir(), ".toml")
}

/// Stores a member's key package as standard base64 of its JSON.
pub fn write_member_key_package(
    paths: &RepoPaths,
    member_id: &str,
    package: &crate::group::KeyPackage,
) -> Result<(), StoreError> {
    let json = serde_json::to_vec(package).map_err(GroupError::from)?;
    Ok(fs::write(
        paths.member_key_package(member_id),
        encoding::encode_std(&json),
    )?)
}

pub fn read_member_key_package(
    paths: &RepoPaths,
    member_id: &str,
) -> Result<crate::group::KeyPackage, StoreError> {
    let text = fs::read_to_string(paths.member_key_package(member_id))?;
    let json = encoding::decode_std(text.trim())?;
    Ok(serde_json::from_slice(&json).map_err(GroupError::from)?)
}

// --- pending requests ---

pub fn write_pending_request(
    paths: &RepoPaths,
    request: &PendingRequest,
) -> Result<(), StoreError> {
    let text = toml::to_string(&RequestFile {
        request: request.clone(),
    })?;
    Ok(fs::write(paths.pending_request(&request.member_id), text)?)
}

pub fn read_pending_request(
    paths: &RepoPaths,
    member_id: &str,
) -> Result<PendingRequest, StoreError> {
    let text = fs::read_to_string(paths.pending_request(member_id))?;
    let file: RequestFile = toml::from_str(&text)?;
    Ok(file.request)
}

/// Sorted member ids with a pending join request.
pub fn list_pending_requests(paths: &RepoPaths) -> Result<Vec<String>, StoreError> {
    list_with_suffix(&paths.pending_dir(), ".request.toml")
}

fn list_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name.strip_suffix(suffix) {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

// --- epoch marker ---

pub fn write_epoch_marker(paths: &RepoPaths, epoch: u64) -> Result<(), StoreError> {
    let text = toml::to_string(&EpochFile {
        epoch: EpochSection { current: epoch },
    })?;
    Ok(fs::write(paths.epoch_file(), text)?)
}

pub fn read_epoch_marker(paths: &RepoPaths) -> Result<u64, StoreError> {
    let text = fs::read_to_string(paths.epoch_file())?;
    let file: EpochFile = toml::from_str(&text)?;
    Ok(file.epoch.current)
}

// --- committed group state ---

pub fn write_committed_state(paths: &RepoPaths, committed: &[u8]) -> Result<(), StoreError> {
    Ok(fs::write(
        paths.committed_state(),
        encoding::encode_std(committed),
    )?)
}

pub fn read_committed_state(paths: &RepoPaths) -> Result<Vec<u8>, StoreError> {
    let text = fs::read_to_string(paths.committed_state())?;
    Ok(encoding::decode_std(text.trim())?)
}

// --- local group state ---

/// Local blob layout: signing-key seed (32 bytes) followed by the full group state JSON.
pub fn write_local_group(paths: &RepoPaths, group: &Group) -> Result<(), StoreError> {
    let mut blob = group.signing_key().seed().to_vec();
    blob.extend(group.to_bytes()?);
    write_secret_file(&paths.local_state(), &blob)
}

pub fn read_local_group(paths: &RepoPaths) -> Result<Group, StoreError> {
    let blob = fs::read(paths.local_state())?;
    if blob.len() < 32 {
        return Err(StoreError::Corrupted("local group blob too short"));
    }
    let seed: [u8; 32] = blob[..32].try_into().expect("checked blob length");
    let signing_key = SigningKey::from_seed(seed);
    let init_secret = read_init_key(paths)?;
    Ok(Group::from_bytes(&blob[32..], signing_key, init_secret)?)
}

pub fn write_init_key(paths: &RepoPaths, key: &x25519::SecretKey) -> Result<(), StoreError> {
    write_secret_file(&paths.init_key(), &key.to_bytes())
}

/// Persists the leaf signing-key seed between a join request and the arrival of the Welcome.
pub fn write_leaf_seed(paths: &RepoPaths, key: &SigningKey) -> Result<(), StoreError> {
    write_secret_file(&paths.leaf_key(), &key.seed())
}

pub fn read_leaf_seed(paths: &RepoPaths) -> Result<SigningKey, StoreError> {
    let bytes = fs::read(paths.leaf_key())?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupted("leaf key seed has wrong length"))?;
    Ok(SigningKey::from_seed(seed))
}

pub fn read_init_key(paths: &RepoPaths) -> Result<x25519::SecretKey, StoreError> {
    let bytes = fs::read(paths.init_key())?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupted("init key has wrong length"))?;
    Ok(x25519::SecretKey::from_bytes(bytes))
}

// --- signing key PEM ---

pub fn write_signing_key(
    paths: &RepoPaths,
    key: &SigningKey,
    passphrase: Option<&str>,
) -> Result<(), StoreError> {
    let pem = key.to_pkcs8_pem(passphrase)?;
    write_secret_file(&paths.private_key(), pem.as_bytes())
}

/// Loads the signing key PEM, taking the passphrase for encrypted keys from the environment
/// when none is supplied.
pub fn read_signing_key(
    paths: &RepoPaths,
    passphrase: Option<&str>,
) -> Result<SigningKey, StoreError> {
    let pem = fs::read_to_string(paths.private_key())?;
    let from_env = std::env::var(PASSPHRASE_ENV).ok();
    let passphrase = passphrase.or(from_env.as_deref());
    Ok(SigningKey::from_pkcs8_pem(&pem, passphrase)?)
}

// --- welcome blobs ---

pub fn write_welcome(
    paths: &RepoPaths,
    member_id: &str,
    welcome: &[u8],
) -> Result<(), StoreError> {
    Ok(fs::write(
        paths.welcome_file(member_id),
        encoding::encode_std(welcome),
    )?)
}

pub fn read_welcome(paths: &RepoPaths, member_id: &str) -> Result<Vec<u8>, StoreError> {
    let text = fs::read_to_string(paths.welcome_file(member_id))?;
    Ok(encoding::decode_std(text.trim())?)
}

// --- epoch-key archive ---

/// Writes the encrypted archive through a temp-file rename so a crash mid-write never leaves
/// a torn blob.
pub fn write_epoch_archive(paths: &RepoPaths, data: &[u8]) -> Result<(), StoreError> {
    let target = paths.epoch_archive();
    let staging = temp_sibling(&target);
    fs::write(&staging, encoding::encode_std(data))?;
    Ok(fs::rename(&staging, &target)?)
}

pub fn read_epoch_archive(paths: &RepoPaths) -> Result<Vec<u8>, StoreError> {
    let text = fs::read_to_string(paths.epoch_archive())?;
    Ok(encoding::decode_std(text.trim())?)
}

fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    target.with_file_name(name)
}

// --- config ---

pub fn write_config(paths: &RepoPaths, config: &Config) -> Result<(), StoreError> {
    Ok(fs::write(paths.config_file(), config.to_toml()?)?)
}

/// Reads the shared config, falling back to defaults when the file is absent.
pub fn read_config(paths: &RepoPaths) -> Result<Config, StoreError> {
    match fs::read_to_string(paths.config_file()) {
        Ok(text) => Ok(Config::from_toml(&text)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
        Err(err) => Err(err.into()),
    }
}

/// Writes a file readable only by its owner.
fn write_secret_file(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("corrupted state blob: {0}")]
    Corrupted(&'static str),

    #[error(transparent)]
    TomlSerialize(#[from] toml::ser::Error),

    #[error(transparent)]
    TomlParse(#[from] toml::de::Error),

    #[error(transparent)]
    Encoding(#[from] base64::DecodeError),

    #[error(transparent)]
    Key(#[from] Ed25519Error),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::crypto::Rng;
    use crate::group::{Group, MemberKeys};
    use crate::store::paths::RepoPaths;

    use super::{
        Identity, MemberRecord, PendingRequest, list_member_ids, list_pending_requests,
        read_committed_state, read_config, read_epoch_marker, read_identity, read_local_group,
        read_member, read_member_key, read_signing_key, write_committed_state, write_config,
        write_epoch_marker, write_identity, write_init_key, write_local_group, write_member,
        write_pending_request, write_signing_key,
    };

    fn test_paths() -> (tempfile::TempDir, RepoPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = RepoPaths::new(dir.path());
        std::fs::create_dir_all(paths.root().join(".git")).unwrap();
        paths.ensure_dirs().unwrap();
        (dir, paths)
    }

    #[test]
    fn identity_roundtrip() {
        let (_dir, paths) = test_paths();

        let identity = Identity {
            member_id: "abc123".into(),
            name: "alice".into(),
        };
        write_identity(&paths, &identity).unwrap();
        assert_eq!(read_identity(&paths).unwrap(), identity);
    }

    #[test]
    fn member_records_and_keys() {
        let (_dir, paths) = test_paths();
        let rng = Rng::from_seed([1; 32]);

        let signing_key = crate::crypto::ed25519::SigningKey::generate(&rng).unwrap();
        let record = MemberRecord {
            name: "alice".into(),
            public_key: signing_key.verifying_key().to_public_key_pem().unwrap(),
            joined_epoch: 0,
            added_by: "self".into(),
        };
        write_member(&paths, "abc123", &record).unwrap();

        assert_eq!(read_member(&paths, "abc123").unwrap(), record);
        assert_eq!(
            read_member_key(&paths, "abc123").unwrap(),
            signing_key.verifying_key()
        );
        assert_eq!(list_member_ids(&paths).unwrap(), vec!["abc123"]);
    }

    #[test]
    fn pending_requests() {
        let (_dir, paths) = test_paths();

        let request = PendingRequest {
            member_id: "def456".into(),
            name: "bob".into(),
            public_key: "pem".into(),
            keypackage: "a2V5".into(),
            timestamp: 12345,
        };
        write_pending_request(&paths, &request).unwrap();
        assert_eq!(list_pending_requests(&paths).unwrap(), vec!["def456"]);
        assert_eq!(
            super::read_pending_request(&paths, "def456").unwrap(),
            request
        );
    }

    #[test]
    fn epoch_marker_roundtrip() {
        let (_dir, paths) = test_paths();

        write_epoch_marker(&paths, 7).unwrap();
        assert_eq!(read_epoch_marker(&paths).unwrap(), 7);
    }

    #[test]
    fn committed_state_is_base64() {
        let (_dir, paths) = test_paths();

        write_committed_state(&paths, b"{\"epoch\":0}").unwrap();
        let raw = std::fs::read_to_string(paths.committed_state()).unwrap();
        assert!(!raw.contains('{'));
        assert_eq!(read_committed_state(&paths).unwrap(), b"{\"epoch\":0}");
    }

    #[test]
    fn local_group_roundtrip() {
        let (_dir, paths) = test_paths();
        let rng = Rng::from_seed([1; 32]);

        let keys = MemberKeys::generate(&rng).unwrap();
        write_init_key(&paths, &keys.init).unwrap();
        let group = Group::create(b"g".to_vec(), keys, &rng).unwrap();
        write_local_group(&paths, &group).unwrap();

        let restored = read_local_group(&paths).unwrap();
        assert_eq!(restored.epoch(), group.epoch());
        assert_eq!(
            restored.export_epoch_secret().unwrap(),
            group.export_epoch_secret().unwrap()
        );
        assert_eq!(
            restored.signing_key().seed(),
            group.signing_key().seed()
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(paths.local_state())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn signing_key_env_passphrase() {
        let (_dir, paths) = test_paths();
        let rng = Rng::from_seed([2; 32]);

        let key = crate::crypto::ed25519::SigningKey::generate(&rng).unwrap();
        write_signing_key(&paths, &key, None).unwrap();
        assert_eq!(read_signing_key(&paths, None).unwrap().seed(), key.seed());

        write_signing_key(&paths, &key, Some("sesame")).unwrap();
        assert_eq!(
            read_signing_key(&paths, Some("sesame")).unwrap().seed(),
            key.seed()
        );
    }

    #[test]
    fn config_defaults_when_absent() {
        let (_dir, paths) = test_paths();

        assert_eq!(read_config(&paths).unwrap(), Config::default());

        let mut config = Config::default();
        config.compaction_threshold = 3;
        write_config(&paths, &config).unwrap();
        assert_eq!(read_config(&paths).unwrap(), config);
    }
}
