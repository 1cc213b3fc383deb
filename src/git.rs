// SPDX-License-Identifier: MIT OR Apache-2.0

//! Narrow adapter around the host version-control tool.
//!
//! The core only needs to list tracked paths, read staged blobs, touch the working tree and
//! declare the filter. Everything goes through the `git` binary; no repository internals are
//! parsed here.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::store::STATE_DIR;

/// Name under which the filter is registered in the git config.
pub const FILTER_NAME: &str = "mlsgit";

/// Paths never run through the filter and never sealed.
fn is_metadata_path(path: &str) -> bool {
    path.starts_with(&format!("{STATE_DIR}/")) || path == ".gitattributes" || path == ".gitignore"
}

#[derive(Clone, Debug)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Opens a repository rooted at the given directory. The directory must contain `.git`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GitError> {
        let root = root.into();
        if !root.join(".git").is_dir() {
            return Err(GitError::NotARepository(root));
        }
        Ok(Self { root })
    }

    /// Walks up from `start` until a directory containing `.git` is found.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self, GitError> {
        let mut current = start.as_ref().to_path_buf();
        loop {
            if current.join(".git").is_dir() {
                return Ok(Self { root: current });
            }
            if !current.pop() {
                return Err(GitError::NotARepository(start.as_ref().to_path_buf()));
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            return Err(GitError::Command {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }

    /// Tracked paths, with metadata paths filtered out.
    pub fn tracked_paths(&self) -> Result<Vec<String>, GitError> {
        let output = self.run(&["ls-files", "-z"])?;
        let output = String::from_utf8_lossy(&output);
        Ok(output
            .split('\0')
            .filter(|path| !path.is_empty() && !is_metadata_path(path))
            .map(str::to_string)
            .collect())
    }

    /// Staged (ciphertext) contents of a tracked path.
    pub fn staged_contents(&self, path: &str) -> Result<Vec<u8>, GitError> {
        self.run(&["show", &format!(":{path}")])
    }

    pub fn read_working_file(&self, path: &str) -> Result<Vec<u8>, GitError> {
        Ok(fs::read(self.root.join(path))?)
    }

    pub fn write_working_file(&self, path: &str, contents: &[u8]) -> Result<(), GitError> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::write(target, contents)?)
    }

    /// Removes tracked non-metadata files and checks them out again so the filter re-runs
    /// over the whole tree.
    pub fn refresh_working_tree(&self) -> Result<(), GitError> {
        for path in self.tracked_paths()? {
            match fs::remove_file(self.root.join(&path)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.run(&["checkout", "--", "."])?;
        Ok(())
    }

    /// Registers the clean/smudge filter in `.git/config`. Idempotent.
    pub fn install_filter(&self, binary: &str) -> Result<(), GitError> {
        let config = self.root.join(".git").join("config");
        let existing = match fs::read_to_string(&config) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        if existing.contains(&format!("[filter \"{FILTER_NAME}\"]")) {
            return Ok(());
        }

        let stanza = format!(
            "\n[filter \"{FILTER_NAME}\"]\n\tclean = {binary} filter clean %f\n\tsmudge = {binary} filter smudge %f\n\trequired = true\n"
        );
        fs::write(config, existing + &stanza)?;
        debug!(binary, "registered clean/smudge filter");
        Ok(())
    }

    /// Declares that the filter applies to all paths except metadata.
    pub fn write_attribute_files(&self) -> Result<(), GitError> {
        fs::write(
            self.root.join(".gitattributes"),
            format!(
                "* filter={FILTER_NAME} diff={FILTER_NAME}\n.gitattributes filter= diff=\n.gitignore filter= diff=\n"
            ),
        )?;
        fs::write(self.root.join(STATE_DIR).join(".gitattributes"), "* -filter\n")?;
        Ok(())
    }

    /// Keeps per-peer state and cache artifacts out of version control.
    pub fn update_gitignore(&self) -> Result<(), GitError> {
        let path = self.root.join(".gitignore");
        let mut contents = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let mut additions = Vec::new();
        for pattern in [".git/mlsgit/", "*.plain", "*.ct"] {
            if !contents.contains(pattern) {
                additions.push(pattern);
            }
        }
        if additions.is_empty() {
            return Ok(());
        }

        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        for pattern in additions {
            contents.push_str(pattern);
            contents.push('\n');
        }
        Ok(fs::write(path, contents)?)
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not inside a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}
