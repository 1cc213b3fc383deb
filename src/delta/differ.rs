// SPDX-License-Identifier: MIT OR Apache-2.0

//! Textual patches between file revisions.
//!
//! The only contract the pipeline relies on is `apply_patch(old, diff(old, new)) == new` for
//! all UTF-8 strings.
use thiserror::Error;

use diffy::Patch;

/// Computes a patch turning `old` into `new`.
pub fn diff(old: &str, new: &str) -> String {
    diffy::create_patch(old, new).to_string()
}

/// Applies a patch produced by [`diff`], failing when any hunk does not apply.
pub fn apply_patch(old: &str, patch: &str) -> Result<String, DifferError> {
    let patch = Patch::from_str(patch)?;
    Ok(diffy::apply(old, &patch)?)
}

#[derive(Debug, Error)]
pub enum DifferError {
    #[error(transparent)]
    Parse(#[from] diffy::ParsePatchError),

    #[error(transparent)]
    Apply(#[from] diffy::ApplyError),
}

#[cfg(test)]
mod tests {
    use super::{apply_patch, diff};

    #[test]
    fn roundtrip() {
        let old = "line one\nline two\nline three\n";
        let new = "line one\nline 2\nline three\nline four\n";

        let patch = diff(old, new);
        assert_eq!(apply_patch(old, &patch).unwrap(), new);
    }

    #[test]
    fn roundtrip_empty_and_unicode() {
        let cases = [
            ("", "fresh content\n"),
            ("old\n", ""),
            ("grüße\nwörld\n", "grüße\nwelt 🎉\n"),
            ("no trailing newline", "still no trailing newline, changed"),
        ];
        for (old, new) in cases {
            let patch = diff(old, new);
            assert_eq!(apply_patch(old, &patch).unwrap(), new, "case {old:?} -> {new:?}");
        }
    }

    #[test]
    fn garbage_patch_rejected() {
        assert!(apply_patch("base\n", "not a patch").is_err());
    }

    #[test]
    fn mismatched_base_rejected() {
        let patch = diff("alpha\nbeta\ngamma\n", "alpha\nBETA\ngamma\n");
        assert!(apply_patch("entirely different content\n", &patch).is_err());
    }
}
