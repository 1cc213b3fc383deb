// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem persistence for shared (committed) and per-peer (local) state.
mod files;
mod paths;

pub use files::{
    Identity, MemberRecord, PendingRequest, StoreError, list_member_ids, list_pending_requests,
    read_committed_state, read_config, read_epoch_archive, read_epoch_marker, read_identity,
    read_init_key, read_leaf_seed, read_local_group, read_member, read_member_key,
    read_member_key_package, read_pending_request, read_signing_key, read_welcome,
    unix_timestamp, write_committed_state, write_config, write_epoch_archive, write_epoch_marker,
    write_identity, write_init_key, write_leaf_seed, write_local_group, write_member,
    write_member_key_package, write_pending_request, write_signing_key, write_welcome,
};
pub use paths::{STATE_DIR, RepoPaths};
