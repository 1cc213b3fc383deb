// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::io;
use std::path::PathBuf;

/// Plaintext/ciphertext cache keyed by repository-relative path.
///
/// The cache is what keeps staging idempotent: re-staging unchanged content returns the
/// previously emitted ciphertext byte for byte, so the host tool sees no spurious diff. It
/// lives outside the work tree and is dropped wholesale when the epoch advances.
#[derive(Clone, Debug)]
pub struct FilterCache {
    dir: PathBuf,
}

impl FilterCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn plaintext_file(&self, file_path: &str) -> PathBuf {
        self.dir.join(format!("{file_path}.plain"))
    }

    fn ciphertext_file(&self, file_path: &str) -> PathBuf {
        self.dir.join(format!("{file_path}.ct"))
    }

    pub fn plaintext(&self, file_path: &str) -> Option<Vec<u8>> {
        fs::read(self.plaintext_file(file_path)).ok()
    }

    pub fn ciphertext(&self, file_path: &str) -> Option<String> {
        fs::read_to_string(self.ciphertext_file(file_path)).ok()
    }

    /// Stores both sides for a path.
    pub fn put(&self, file_path: &str, plaintext: &[u8], ciphertext: &str) -> io::Result<()> {
        let plain = self.plaintext_file(file_path);
        let ct = self.ciphertext_file(file_path);
        for target in [&plain, &ct] {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(plain, plaintext)?;
        fs::write(ct, ciphertext)
    }

    /// Drops every cached entry.
    pub fn invalidate_all(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        fs::create_dir_all(&self.dir)
    }
}
