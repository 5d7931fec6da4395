// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental CRC32 primitive.
//!
//! Body CRCs are folded in as bytes are appended to a streamed file; header
//! CRCs are single-shot over the header bytes that follow the CRC field
//! itself. Grounded on the `crc32fast::hash` one-shot use in the
//! segment-append path of `format/hdds.rs::flush_segment`, generalized here
//! to an incremental hasher so it survives many small `update` calls
//! instead of one large buffer.

pub const CRC_START_VALUE: u32 = 0;

/// A CRC32 accumulator that can be queried mid-stream without finalizing.
#[derive(Clone, Default)]
pub struct RunningCrc {
    hasher: crc32fast::Hasher,
}

impl RunningCrc {
    pub fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Current running value; does not consume the accumulator.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }
}

/// One-shot CRC over a fixed buffer, used for header self-checks.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut running = RunningCrc::new();
        for chunk in data.chunks(7) {
            running.update(chunk);
        }
        assert_eq!(running.value(), crc32(data));
    }

    #[test]
    fn reset_returns_to_start_value() {
        let mut running = RunningCrc::new();
        running.update(b"abc");
        running.reset();
        assert_eq!(running.value(), crc32(b""));
    }
}
