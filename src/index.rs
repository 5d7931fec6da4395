// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The fixed 56-byte `.tidx` index entry. The original writes each field via byte-offset
//! `memcpy` into a 45-byte staging buffer plus a trailing reserved region;
//! reimplemented here as an explicit little-endian packed encoding so the
//! byte layout — a binary contract with readers — is preserved exactly
//! without relying on in-memory struct layout.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const INDEX_ENTRY_BYTES: usize = 56;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags(pub u8);

impl BlockFlags {
    pub const DISCONTINUOUS: u8 = 0b0000_0001;

    pub fn discontinuous(self) -> bool {
        self.0 & Self::DISCONTINUOUS != 0
    }
}

/// One entry per compressed block, in data-block order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub file_offset: i64,
    pub start_time: i64,
    pub start_sample: i64,
    pub number_of_samples: u32,
    pub block_bytes: u32,
    pub max_sample_value: i32,
    pub min_sample_value: i32,
    pub flags: BlockFlags,
}

impl IndexEntry {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i64::<LittleEndian>(self.file_offset)?;
        w.write_i64::<LittleEndian>(self.start_time)?;
        w.write_i64::<LittleEndian>(self.start_sample)?;
        w.write_u32::<LittleEndian>(self.number_of_samples)?;
        w.write_u32::<LittleEndian>(self.block_bytes)?;
        w.write_i32::<LittleEndian>(self.max_sample_value)?;
        w.write_i32::<LittleEndian>(self.min_sample_value)?;
        w.write_all(&[0u8; 4])?; // reserved
        w.write_u8(self.flags.0)?;
        w.write_all(&[0u8; 11])?; // protected + discretionary reserved region
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let file_offset = r.read_i64::<LittleEndian>()?;
        let start_time = r.read_i64::<LittleEndian>()?;
        let start_sample = r.read_i64::<LittleEndian>()?;
        let number_of_samples = r.read_u32::<LittleEndian>()?;
        let block_bytes = r.read_u32::<LittleEndian>()?;
        let max_sample_value = r.read_i32::<LittleEndian>()?;
        let min_sample_value = r.read_i32::<LittleEndian>()?;
        let mut reserved = [0u8; 4];
        r.read_exact(&mut reserved)?;
        let flags = BlockFlags(r.read_u8()?);
        let mut tail = [0u8; 11];
        r.read_exact(&mut tail)?;
        Ok(Self {
            file_offset,
            start_time,
            start_sample,
            number_of_samples,
            block_bytes,
            max_sample_value,
            min_sample_value,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_exactly_56_bytes() {
        let entry = IndexEntry {
            file_offset: 320,
            start_time: 946684800000000,
            start_sample: 0,
            number_of_samples: 1000,
            block_bytes: 4096,
            max_sample_value: 20000,
            min_sample_value: -20000,
            flags: BlockFlags(BlockFlags::DISCONTINUOUS),
        };
        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len(), INDEX_ENTRY_BYTES);

        let mut cursor = std::io::Cursor::new(buf);
        let read = IndexEntry::read(&mut cursor).unwrap();
        assert_eq!(read, entry);
        assert!(read.flags.discontinuous());
    }

    #[test]
    fn file_offset_chain_matches_block_bytes() {
        let entries = vec![
            IndexEntry {
                file_offset: 320,
                start_time: 0,
                start_sample: 0,
                number_of_samples: 10,
                block_bytes: 100,
                max_sample_value: 1,
                min_sample_value: -1,
                flags: BlockFlags::default(),
            },
            IndexEntry {
                file_offset: 420,
                start_time: 0,
                start_sample: 10,
                number_of_samples: 10,
                block_bytes: 80,
                max_sample_value: 1,
                min_sample_value: -1,
                flags: BlockFlags::default(),
            },
        ];
        // P2
        for pair in entries.windows(2) {
            assert_eq!(
                pair[1].file_offset,
                pair[0].file_offset + pair[0].block_bytes as i64
            );
        }
    }
}
