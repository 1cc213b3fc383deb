// SPDX-License-Identifier: MIT OR Apache-2.0

//! `mlsgit` end-to-end encrypts a version-controlled source tree so that the hosting service
//! only ever sees ciphertext.
//!
//! The crate plugs into git as a content-transform filter: working-tree contents stay
//! plaintext, staged and stored objects are ciphertext. Around that filter it provides:
//!
//! - a group key agreement engine with epoch ratcheting. Adding a member advances the epoch
//!   deterministically and hands the joiner an encrypted Welcome; removing a member advances
//!   it with a fresh update secret DH-encapsulated towards every remaining member, which is
//!   what gives forward secrecy on removal. Peers that were offline for several membership
//!   changes catch up from the committed state alone.
//! - a per-file delta pipeline: the first stage of a file emits an AEAD base block, later
//!   stages append signed, encrypted patches chained by ciphertext hash, and chains are
//!   compacted back into a base block once they grow past a threshold.
//! - integrity sealing: a signed Merkle root over all tracked ciphertexts.
//!
//! Keys are derived per file, path and epoch from the exported epoch secret, so no two files
//! ever share an encryption key and removed members cannot read content written after their
//! removal. Historical epochs remain readable through an encrypted archive by design.
//!
//! The command-line wrapper around these operations lives in a separate binary; everything it
//! needs is exposed from [`ops`], [`filter`] and [`git`].
pub mod config;
pub mod crypto;
pub mod delta;
pub mod filter;
pub mod git;
pub mod group;
pub mod ops;
pub mod seal;
pub mod store;

pub use config::Config;
pub use crypto::{CryptoError, Rng};
pub use group::{EpochArchive, Group, KeyPackage, MemberKeys};
pub use store::RepoPaths;
