// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the shared, version-controlled state directory at the repository root.
pub const STATE_DIR: &str = ".mlsgit";

/// Well-known locations derived from the repository root.
///
/// Shared state lives under `.mlsgit/` inside the work tree and travels with the repository;
/// per-peer state (private keys, local ratchet state, the filter cache) lives under
/// `.git/mlsgit/` and never leaves the machine.
#[derive(Clone, Debug)]
pub struct RepoPaths {
    root: PathBuf,
}

impl RepoPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Shared state, committed with the repository.

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    pub fn epoch_file(&self) -> PathBuf {
        self.state_dir().join("epoch.toml")
    }

    pub fn members_dir(&self) -> PathBuf {
        self.state_dir().join("members")
    }

    pub fn member_file(&self, member_id: &str) -> PathBuf {
        self.members_dir().join(format!("{member_id}.toml"))
    }

    pub fn member_key_package(&self, member_id: &str) -> PathBuf {
        self.members_dir().join(format!("{member_id}.keypackage.b64"))
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.state_dir().join("pending")
    }

    pub fn pending_request(&self, member_id: &str) -> PathBuf {
        self.pending_dir().join(format!("{member_id}.request.toml"))
    }

    pub fn group_dir(&self) -> PathBuf {
        self.state_dir().join("group")
    }

    pub fn committed_state(&self) -> PathBuf {
        self.group_dir().join("state.b64")
    }

    pub fn welcome_dir(&self) -> PathBuf {
        self.group_dir().join("welcome")
    }

    pub fn welcome_file(&self, member_id: &str) -> PathBuf {
        self.welcome_dir().join(format!("{member_id}.welcome.b64"))
    }

    pub fn epoch_archive(&self) -> PathBuf {
        self.state_dir().join("epoch_keys.b64")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.state_dir().join("merkle.toml")
    }

    pub fn state_gitattributes(&self) -> PathBuf {
        self.state_dir().join(".gitattributes")
    }

    // Per-peer state, outside the work tree.

    pub fn local_dir(&self) -> PathBuf {
        self.root.join(".git").join("mlsgit")
    }

    pub fn private_key(&self) -> PathBuf {
        self.local_dir().join("private_key.pem")
    }

    pub fn local_state(&self) -> PathBuf {
        self.local_dir().join("mls_state.bin")
    }

    pub fn init_key(&self) -> PathBuf {
        self.local_dir().join("init_priv.bin")
    }

    pub fn leaf_key(&self) -> PathBuf {
        self.local_dir().join("sig_priv.bin")
    }

    pub fn identity_file(&self) -> PathBuf {
        self.local_dir().join("identity.toml")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.local_dir().join("cache")
    }

    // Repository-level files.

    pub fn root_gitattributes(&self) -> PathBuf {
        self.root.join(".gitattributes")
    }

    pub fn gitignore(&self) -> PathBuf {
        self.root.join(".gitignore")
    }

    /// Creates every directory the store writes into. Idempotent.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [
            self.state_dir(),
            self.members_dir(),
            self.pending_dir(),
            self.group_dir(),
            self.welcome_dir(),
            self.local_dir(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RepoPaths;

    #[test]
    fn layout() {
        let paths = RepoPaths::new("/repo");
        assert_eq!(paths.config_file().to_str().unwrap(), "/repo/.mlsgit/config.toml");
        assert_eq!(
            paths.member_file("abc").to_str().unwrap(),
            "/repo/.mlsgit/members/abc.toml"
        );
        assert_eq!(
            paths.welcome_file("abc").to_str().unwrap(),
            "/repo/.mlsgit/group/welcome/abc.welcome.b64"
        );
        assert_eq!(
            paths.local_state().to_str().unwrap(),
            "/repo/.git/mlsgit/mls_state.bin"
        );
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RepoPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.members_dir().is_dir());
        assert!(paths.cache_dir().is_dir());
    }
}
