// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime configuration persisted as a small TOML table in the shared state directory.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable supplying the passphrase for an encrypted private-key PEM.
pub const PASSPHRASE_ENV: &str = "MLSGIT_PASSPHRASE";

/// MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519. Carried unchanged for on-disk
/// compatibility; the implementation uses AES-256-GCM everywhere and loaders never enforce
/// this identifier.
pub const CIPHER_SUITE_ID: u16 = 0x0001;

/// Number of delta blocks after which the next stage emits a fresh base block.
pub const DEFAULT_COMPACTION_THRESHOLD: u32 = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_cipher_suite")]
    pub cipher_suite: u16,
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            cipher_suite: default_cipher_suite(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_cipher_suite() -> u16 {
    CIPHER_SUITE_ID
}

fn default_compaction_threshold() -> u32 {
    DEFAULT_COMPACTION_THRESHOLD
}

#[derive(Serialize, Deserialize)]
struct ConfigFile {
    mlsgit: Config,
}

impl Config {
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(&ConfigFile {
            mlsgit: self.clone(),
        })?)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.mlsgit)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Parse(#[from] toml::de::Error),
}
