// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UUID and path-join primitives.
//!
//! The original library shells out to `mkdir`/`cp`; here these are
//! replaced with portable filesystem calls (`std::fs`) and a plain UUID
//! generator, the way moonfire-nvr's `moonfire-db` and rust-daq pull in
//! `uuid` for random v4 identifiers.

use std::path::{Path, PathBuf};

pub type Uuid16 = [u8; 16];

/// Generates a fresh random (v4) 16-byte UUID for a file or level identity.
pub fn generate_uuid() -> Uuid16 {
    *uuid::Uuid::new_v4().as_bytes()
}

pub const NIL_UUID: Uuid16 = [0u8; 16];

/// Idempotent directory creation, replacing a shell `mkdir -p`.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Joins `parent` with a child name, without relying on shell quoting.
pub fn join(parent: &Path, child: &str) -> PathBuf {
    parent.join(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_not_nil_and_differ() {
        let a = generate_uuid();
        let b = generate_uuid();
        assert_ne!(a, NIL_UUID);
        assert_ne!(a, b);
    }
}
