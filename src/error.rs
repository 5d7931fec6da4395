// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the MEF3 streaming writer.
//!
//! Mirrors the taxonomy in the design: configuration is rejected before any
//! disk mutation, I/O and allocation failures are fatal to the writer and
//! surfaced to the caller, and internal invariant checks (buffer empty at
//! flush time, etc.) are handled as silent no-ops rather than errors.

use thiserror::Error;

/// Rejected before any filesystem mutation happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("password level 2 was set without password level 1")]
    Level2WithoutLevel1,

    #[error("password level 1 and level 2 must not be equal")]
    PasswordsMustDiffer,

    #[error("unsupported channel extension: {0}")]
    UnsupportedExtension(String),

    #[error("block_interval_us must be positive")]
    NonPositiveBlockInterval,

    #[error("sampling_frequency must be positive")]
    NonPositiveSamplingFrequency,

    #[error("invalid config JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Top-level error type returned by every public operation.
#[derive(Debug, Error)]
pub enum MefError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to allocate sample buffer of {requested} samples")]
    Memory { requested: usize },

    #[error("segment is missing an expected file: {0}")]
    MissingSegmentFile(String),

    #[error("corrupt universal header: {0}")]
    CorruptHeader(String),
}

impl MefError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        MefError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MefError>;
