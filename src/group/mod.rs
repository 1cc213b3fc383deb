// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group key agreement engine.
//!
//! A group tracks an epoch counter and a per-epoch secret shared by all active members. Adding
//! a member ratchets the secret deterministically (the joiner learns it from an encrypted
//! Welcome), removing a member ratchets it with a fresh update secret that is DH-encapsulated
//! towards every remaining member, so the removed member cannot follow. Encapsulations
//! accumulate in the committed state, which lets peers that were offline for several membership
//! changes catch up from the server-visible blob alone.
mod archive;
mod encap;
#[allow(clippy::module_inception)]
mod group;
mod member;

pub use archive::{ArchiveError, EpochArchive};
pub use encap::{EncapEntry, UpdateEncap};
pub use group::{EPOCH_SECRET_SIZE, Group, GroupError};
pub use member::{KeyPackage, Member, MemberKeys};
