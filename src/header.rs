// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The universal header: a fixed-size prefix shared by every MEF3 file.
//!
//! Grounded on the fixed `FileHeader`/`SegmentHeader` read/write-with-CRC
//! pattern in `format/hdds.rs`, generalized to cover identity, timing,
//! CRCs, counts, and optional password validation. Byte layout is a
//! binary contract: every field is encoded explicitly little-endian with
//! `byteorder` rather than left to in-memory struct layout.

use crate::crc::crc32;
use crate::ids::{Uuid16, NIL_UUID};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const CHANNEL_NAME_BYTES: usize = 64;
pub const SESSION_NAME_BYTES: usize = 64;
pub const ANONYMIZED_NAME_BYTES: usize = 64;

/// Sentinel for "not yet set". Using an extreme value rather than 0 avoids
/// ambiguity with a legitimate zero Unix-epoch microsecond timestamp.
pub const TIME_NO_ENTRY: i64 = i64::MIN;
pub const DURATION_NO_ENTRY: i64 = i64::MIN;

/// File-type tags, fixed 5 bytes (4 ASCII + NUL), little-endian on disk.
pub const FILE_TYPE_TMET: [u8; 5] = *b"tmet\0";
pub const FILE_TYPE_TIDX: [u8; 5] = *b"tidx\0";
pub const FILE_TYPE_TDAT: [u8; 5] = *b"tdat\0";
pub const FILE_TYPE_RDAT: [u8; 5] = *b"rdat\0";
pub const FILE_TYPE_RIDX: [u8; 5] = *b"ridx\0";
pub const FILE_TYPE_MEFD: [u8; 5] = *b"mefd\0";

pub const MEF_VERSION_MAJOR: u8 = 3;
pub const MEF_VERSION_MINOR: u8 = 0;

/// Total encoded size of [`UniversalHeader`], verified by `encoded_size_matches_const`.
pub const UNIVERSAL_HEADER_BYTES: usize = 320;

/// Fixed-size prefix on every MEF3 file.
///
/// `header_crc` covers every header byte after itself; `body_crc` covers
/// everything following the header and is maintained incrementally by the
/// writer as bytes are appended.
#[derive(Debug, Clone)]
pub struct UniversalHeader {
    pub header_crc: u32,
    pub body_crc: u32,
    pub file_type: [u8; 5],
    pub mef_version_major: u8,
    pub mef_version_minor: u8,
    pub byte_order_little_endian: bool,
    pub session_start_time: i64,
    pub session_end_time: i64,
    pub segment_number: i32,
    pub number_of_entries: u64,
    pub maximum_entry_size: u32,
    pub channel_name: [u8; CHANNEL_NAME_BYTES],
    pub session_name: [u8; SESSION_NAME_BYTES],
    pub anonymized_name: [u8; ANONYMIZED_NAME_BYTES],
    pub file_uuid: Uuid16,
    pub level_uuid: Uuid16,
    pub has_password: bool,
    pub password_validation_field: [u8; 32],
}

impl UniversalHeader {
    pub fn new(file_type: [u8; 5]) -> Self {
        Self {
            header_crc: 0,
            body_crc: crate::crc::CRC_START_VALUE,
            file_type,
            mef_version_major: MEF_VERSION_MAJOR,
            mef_version_minor: MEF_VERSION_MINOR,
            byte_order_little_endian: true,
            session_start_time: TIME_NO_ENTRY,
            session_end_time: TIME_NO_ENTRY,
            segment_number: 0,
            number_of_entries: 0,
            maximum_entry_size: 0,
            channel_name: [0u8; CHANNEL_NAME_BYTES],
            session_name: [0u8; SESSION_NAME_BYTES],
            anonymized_name: [0u8; ANONYMIZED_NAME_BYTES],
            file_uuid: NIL_UUID,
            level_uuid: NIL_UUID,
            has_password: false,
            password_validation_field: [0u8; 32],
        }
    }

    pub fn set_channel_name(&mut self, name: &str) {
        write_fixed_str(&mut self.channel_name, name);
    }

    pub fn set_session_name(&mut self, name: &str) {
        write_fixed_str(&mut self.session_name, name);
    }

    pub fn set_anonymized_name(&mut self, name: &str) {
        write_fixed_str(&mut self.anonymized_name, name);
    }

    /// Recomputes `header_crc` over every header byte after the CRC field.
    /// Called after any in-place mutation, just before the header is
    /// rewritten to disk.
    pub fn reseal(&mut self) {
        let mut buf = Vec::with_capacity(UNIVERSAL_HEADER_BYTES - 4);
        self.write_after_crc(&mut buf).expect("write to Vec cannot fail");
        self.header_crc = crc32(&buf);
    }

    /// Verifies the header is internally consistent: stored `header_crc`
    /// matches a fresh recomputation.
    pub fn verify_header_crc(&self) -> bool {
        let mut buf = Vec::with_capacity(UNIVERSAL_HEADER_BYTES - 4);
        self.write_after_crc(&mut buf).expect("write to Vec cannot fail");
        crc32(&buf) == self.header_crc
    }

    fn write_after_crc<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.body_crc)?;
        w.write_all(&self.file_type)?;
        w.write_u8(self.mef_version_major)?;
        w.write_u8(self.mef_version_minor)?;
        w.write_u8(if self.byte_order_little_endian { 0 } else { 1 })?;
        w.write_u8(0)?; // reserved pad
        w.write_i64::<LittleEndian>(self.session_start_time)?;
        w.write_i64::<LittleEndian>(self.session_end_time)?;
        w.write_i32::<LittleEndian>(self.segment_number)?;
        w.write_u64::<LittleEndian>(self.number_of_entries)?;
        w.write_u32::<LittleEndian>(self.maximum_entry_size)?;
        w.write_all(&self.channel_name)?;
        w.write_all(&self.session_name)?;
        w.write_all(&self.anonymized_name)?;
        w.write_all(&self.file_uuid)?;
        w.write_all(&self.level_uuid)?;
        w.write_u8(self.has_password as u8)?;
        w.write_all(&self.password_validation_field)?;
        // pad to UNIVERSAL_HEADER_BYTES
        let written = 4 + 5 + 1 + 1 + 1 + 1 + 8 + 8 + 4 + 8 + 4
            + CHANNEL_NAME_BYTES
            + SESSION_NAME_BYTES
            + ANONYMIZED_NAME_BYTES
            + 16
            + 16
            + 1
            + 32;
        let pad = UNIVERSAL_HEADER_BYTES - 4 - written;
        w.write_all(&vec![0u8; pad])?;
        Ok(())
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.header_crc)?;
        self.write_after_crc(w)
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let header_crc = r.read_u32::<LittleEndian>()?;
        let body_crc = r.read_u32::<LittleEndian>()?;
        let mut file_type = [0u8; 5];
        r.read_exact(&mut file_type)?;
        let mef_version_major = r.read_u8()?;
        let mef_version_minor = r.read_u8()?;
        let byte_order_little_endian = r.read_u8()? == 0;
        let _reserved = r.read_u8()?;
        let session_start_time = r.read_i64::<LittleEndian>()?;
        let session_end_time = r.read_i64::<LittleEndian>()?;
        let segment_number = r.read_i32::<LittleEndian>()?;
        let number_of_entries = r.read_u64::<LittleEndian>()?;
        let maximum_entry_size = r.read_u32::<LittleEndian>()?;
        let mut channel_name = [0u8; CHANNEL_NAME_BYTES];
        r.read_exact(&mut channel_name)?;
        let mut session_name = [0u8; SESSION_NAME_BYTES];
        r.read_exact(&mut session_name)?;
        let mut anonymized_name = [0u8; ANONYMIZED_NAME_BYTES];
        r.read_exact(&mut anonymized_name)?;
        let mut file_uuid = NIL_UUID;
        r.read_exact(&mut file_uuid)?;
        let mut level_uuid = NIL_UUID;
        r.read_exact(&mut level_uuid)?;
        let has_password = r.read_u8()? != 0;
        let mut password_validation_field = [0u8; 32];
        r.read_exact(&mut password_validation_field)?;

        let fixed_read = 4 + 5 + 1 + 1 + 1 + 1 + 8 + 8 + 4 + 8 + 4
            + CHANNEL_NAME_BYTES
            + SESSION_NAME_BYTES
            + ANONYMIZED_NAME_BYTES
            + 16
            + 16
            + 1
            + 32;
        let pad = UNIVERSAL_HEADER_BYTES - 4 - fixed_read;
        let mut discard = vec![0u8; pad];
        r.read_exact(&mut discard)?;

        Ok(Self {
            header_crc,
            body_crc,
            file_type,
            mef_version_major,
            mef_version_minor,
            byte_order_little_endian,
            session_start_time,
            session_end_time,
            segment_number,
            number_of_entries,
            maximum_entry_size,
            channel_name,
            session_name,
            anonymized_name,
            file_uuid,
            level_uuid,
            has_password,
            password_validation_field,
        })
    }
}

fn write_fixed_str(dest: &mut [u8], src: &str) {
    dest.iter_mut().for_each(|b| *b = 0);
    let bytes = src.as_bytes();
    let n = bytes.len().min(dest.len());
    dest[..n].copy_from_slice(&bytes[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_size_matches_const() {
        let h = UniversalHeader::new(FILE_TYPE_TDAT);
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), UNIVERSAL_HEADER_BYTES);
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let mut h = UniversalHeader::new(FILE_TYPE_TMET);
        h.set_channel_name("eeg_fp1");
        h.session_start_time = 946684800000000;
        h.segment_number = 3;
        h.number_of_entries = 7;
        h.file_uuid = crate::ids::generate_uuid();
        h.reseal();

        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let read = UniversalHeader::read(&mut cursor).unwrap();

        assert_eq!(read.file_type, FILE_TYPE_TMET);
        assert_eq!(read.session_start_time, 946684800000000);
        assert_eq!(read.segment_number, 3);
        assert_eq!(read.number_of_entries, 7);
        assert_eq!(read.file_uuid, h.file_uuid);
        assert!(read.verify_header_crc());
    }

    #[test]
    fn tampered_header_fails_crc_check() {
        let mut h = UniversalHeader::new(FILE_TYPE_TDAT);
        h.reseal();
        h.number_of_entries = 99; // mutate without resealing
        assert!(!h.verify_header_crc());
    }
}
