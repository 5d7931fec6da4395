// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session directory layout: the `.mefd` top-level directory and a
//! channel's `.timd`/`.vidd` subdirectory, replacing the original's
//! shell-out `mkdir`/`cp` calls with portable `std::fs` operations
//! per the original library's own design notes.

use crate::error::{MefError, Result};
use crate::ids;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A channel's on-disk kind, determining its subdirectory suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Time-series (`.timd`).
    TimeSeries,
    /// Video/annotation-only (`.vidd`).
    Video,
}

impl ChannelKind {
    fn suffix(self) -> &'static str {
        match self {
            ChannelKind::TimeSeries => "timd",
            ChannelKind::Video => "vidd",
        }
    }
}

/// A `.mefd` session directory: one root holding one subdirectory per
/// channel, each of which in turn holds that channel's `.segd` segments.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    /// Creates the `<name>.mefd` directory if it does not already exist.
    pub fn create(parent: &Path, session_name: &str) -> Result<Self> {
        let root = parent.join(format!("{session_name}.mefd"));
        ids::ensure_dir(&root).map_err(|e| MefError::io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn channel_directory(&self, channel_name: &str, kind: ChannelKind) -> Result<PathBuf> {
        let dir = self.root.join(format!("{channel_name}.{}", kind.suffix()));
        ids::ensure_dir(&dir).map_err(|e| MefError::io(dir.display().to_string(), e))?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_mefd_and_channel_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionLayout::create(dir.path(), "patient_001").unwrap();
        assert!(session.root().ends_with("patient_001.mefd"));

        let chan_dir = session
            .channel_directory("eeg_fp1", ChannelKind::TimeSeries)
            .unwrap();
        assert!(chan_dir.exists());
        assert!(chan_dir.ends_with("eeg_fp1.timd"));
    }

    #[test]
    fn create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        SessionLayout::create(dir.path(), "patient_001").unwrap();
        let second = SessionLayout::create(dir.path(), "patient_001");
        assert!(second.is_ok());
    }
}
