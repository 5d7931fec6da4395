// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Annotation records (`.rdat`/`.ridx`): discrete, irregularly-timed
//! events alongside a channel's or session's continuous data. Grounded on
//! `create_or_append_annotations` / `write_annotation` / `close_annotation`.
//!
//! The original validates a record's tag with a guard that mixes `&&` and
//! `||` in a way that lets some unrecognized tags through; here the tag is
//! a closed [`RecordTag`] enum, so an unrecognized tag is rejected at the
//! type level instead of by a hand-checked boolean expression.

use crate::crc::RunningCrc;
use crate::error::{MefError, Result};
use crate::header::{UniversalHeader, FILE_TYPE_RDAT, FILE_TYPE_RIDX};
use crate::ids;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const RECORD_INDEX_BYTES: usize = 24;

/// The four record kinds the original recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    Note,
    Seizure,
    Cursor,
    Epoch,
}

impl RecordTag {
    fn code(self) -> [u8; 4] {
        match self {
            RecordTag::Note => *b"Note",
            RecordTag::Seizure => *b"Seiz",
            RecordTag::Cursor => *b"Curs",
            RecordTag::Epoch => *b"Epoc",
        }
    }
}

impl fmt::Display for RecordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.code()))
    }
}

impl FromStr for RecordTag {
    type Err = MefError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Note" => Ok(RecordTag::Note),
            "Seiz" => Ok(RecordTag::Seizure),
            "Curs" => Ok(RecordTag::Cursor),
            "Epoc" => Ok(RecordTag::Epoch),
            other => Err(MefError::CorruptHeader(format!("unknown record tag {other:?}"))),
        }
    }
}

impl TryFrom<[u8; 4]> for RecordTag {
    type Error = MefError;

    fn try_from(code: [u8; 4]) -> std::result::Result<Self, Self::Error> {
        RecordTag::from_str(&String::from_utf8_lossy(&code))
    }
}

/// A record's payload, one variant per [`RecordTag`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    Note(String),
    Seizure { onset_time: i64, offset_time: i64 },
    Cursor { id: i32, value: f64 },
    Epoch { epoch_id: i32, duration_us: i64 },
}

impl RecordBody {
    pub fn tag(&self) -> RecordTag {
        match self {
            RecordBody::Note(_) => RecordTag::Note,
            RecordBody::Seizure { .. } => RecordTag::Seizure,
            RecordBody::Cursor { .. } => RecordTag::Cursor,
            RecordBody::Epoch { .. } => RecordTag::Epoch,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            RecordBody::Note(text) => {
                out.extend_from_slice(text.as_bytes());
                out.push(0); // NUL terminator, matching strlen()+1
            }
            RecordBody::Seizure {
                onset_time,
                offset_time,
            } => {
                out.write_i64::<LittleEndian>(*onset_time).unwrap();
                out.write_i64::<LittleEndian>(*offset_time).unwrap();
            }
            RecordBody::Cursor { id, value } => {
                out.write_i32::<LittleEndian>(*id).unwrap();
                out.write_f64::<LittleEndian>(*value).unwrap();
            }
            RecordBody::Epoch {
                epoch_id,
                duration_us,
            } => {
                out.write_i32::<LittleEndian>(*epoch_id).unwrap();
                out.write_i64::<LittleEndian>(*duration_us).unwrap();
            }
        }
        out
    }

    fn decode(tag: RecordTag, bytes: &[u8]) -> io::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        Ok(match tag {
            RecordTag::Note => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                RecordBody::Note(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            RecordTag::Seizure => RecordBody::Seizure {
                onset_time: cursor.read_i64::<LittleEndian>()?,
                offset_time: cursor.read_i64::<LittleEndian>()?,
            },
            RecordTag::Cursor => RecordBody::Cursor {
                id: cursor.read_i32::<LittleEndian>()?,
                value: cursor.read_f64::<LittleEndian>()?,
            },
            RecordTag::Epoch => RecordBody::Epoch {
                epoch_id: cursor.read_i32::<LittleEndian>()?,
                duration_us: cursor.read_i64::<LittleEndian>()?,
            },
        })
    }
}

/// `16 - (len % 16)`, or `0` when already a multiple of 16.
fn pad_bytes(len: usize) -> usize {
    let rem = len % 16;
    if rem == 0 {
        0
    } else {
        16 - rem
    }
}

/// One entry in the `.ridx` stream, pointing at a record in `.rdat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIndexEntry {
    pub file_offset: i64,
    pub time: i64,
    pub type_code: [u8; 4],
}

impl RecordIndexEntry {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i64::<LittleEndian>(self.file_offset)?;
        w.write_i64::<LittleEndian>(self.time)?;
        w.write_all(&self.type_code)?;
        w.write_all(&[0u8; 4])?; // reserved tail
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let file_offset = r.read_i64::<LittleEndian>()?;
        let time = r.read_i64::<LittleEndian>()?;
        let mut type_code = [0u8; 4];
        r.read_exact(&mut type_code)?;
        let mut tail = [0u8; 4];
        r.read_exact(&mut tail)?;
        Ok(Self {
            file_offset,
            time,
            type_code,
        })
    }
}

struct AnnotationPaths {
    rdat: PathBuf,
    ridx: PathBuf,
}

fn annotation_paths(dir: &std::path::Path, stem: &str) -> AnnotationPaths {
    AnnotationPaths {
        rdat: dir.join(format!("{stem}.rdat")),
        ridx: dir.join(format!("{stem}.ridx")),
    }
}

/// Owns the open `.rdat`/`.ridx` pair for one session or channel's
/// annotation stream.
pub struct RecordWriter {
    rdat_file: File,
    rdat_header: UniversalHeader,
    rdat_crc: RunningCrc,
    ridx_file: File,
    ridx_header: UniversalHeader,
    ridx_crc: RunningCrc,
    time_offset_mode: crate::config::TimeOffsetMode,
    anchor: Option<crate::time_offset::TimeOffsetAnchor>,
}

impl RecordWriter {
    /// Opens an existing annotation pair if present, appending after its
    /// current tail; otherwise creates both files fresh
    /// (`create_or_append_annotations`).
    pub fn open_or_create(
        dir: &Path,
        stem: &str,
        time_offset_mode: crate::config::TimeOffsetMode,
    ) -> Result<Self> {
        ids::ensure_dir(dir).map_err(|e| MefError::io(dir.display().to_string(), e))?;
        let paths = annotation_paths(dir, stem);
        let anchor = crate::time_offset::current();

        if paths.rdat.exists() && paths.ridx.exists() {
            let mut rdat_file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&paths.rdat)
                .map_err(|e| MefError::io(paths.rdat.display().to_string(), e))?;
            let rdat_header = UniversalHeader::read(&mut rdat_file)
                .map_err(|e| MefError::io(paths.rdat.display().to_string(), e))?;
            let mut rdat_body = Vec::new();
            rdat_file
                .read_to_end(&mut rdat_body)
                .map_err(|e| MefError::io(paths.rdat.display().to_string(), e))?;
            let mut rdat_crc = RunningCrc::new();
            rdat_crc.update(&rdat_body);

            let mut ridx_file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&paths.ridx)
                .map_err(|e| MefError::io(paths.ridx.display().to_string(), e))?;
            let ridx_header = UniversalHeader::read(&mut ridx_file)
                .map_err(|e| MefError::io(paths.ridx.display().to_string(), e))?;
            let mut ridx_body = Vec::new();
            ridx_file
                .read_to_end(&mut ridx_body)
                .map_err(|e| MefError::io(paths.ridx.display().to_string(), e))?;
            let mut ridx_crc = RunningCrc::new();
            ridx_crc.update(&ridx_body);

            return Ok(Self {
                rdat_file,
                rdat_header,
                rdat_crc,
                ridx_file,
                ridx_header,
                ridx_crc,
                time_offset_mode,
                anchor,
            });
        }

        let level_uuid = ids::generate_uuid();
        let mut rdat_header = UniversalHeader::new(FILE_TYPE_RDAT);
        rdat_header.file_uuid = ids::generate_uuid();
        rdat_header.level_uuid = level_uuid;
        let mut ridx_header = UniversalHeader::new(FILE_TYPE_RIDX);
        ridx_header.file_uuid = ids::generate_uuid();
        ridx_header.level_uuid = level_uuid;

        let mut rdat_file = File::create(&paths.rdat)
            .map_err(|e| MefError::io(paths.rdat.display().to_string(), e))?;
        rdat_header
            .write(&mut rdat_file)
            .map_err(|e| MefError::io(paths.rdat.display().to_string(), e))?;

        let mut ridx_file = File::create(&paths.ridx)
            .map_err(|e| MefError::io(paths.ridx.display().to_string(), e))?;
        ridx_header
            .write(&mut ridx_file)
            .map_err(|e| MefError::io(paths.ridx.display().to_string(), e))?;

        Ok(Self {
            rdat_file,
            rdat_header,
            rdat_crc: RunningCrc::new(),
            ridx_file,
            ridx_header,
            ridx_crc: RunningCrc::new(),
            time_offset_mode,
            anchor,
        })
    }

    /// Appends one record: body + zero-padding to a 16-byte boundary in
    /// `.rdat`, and its locator in `.ridx` (`write_annotation`).
    pub fn write_record(&mut self, time_us: i64, body: RecordBody) -> Result<()> {
        let stored_time =
            crate::time_offset::apply_for_storage(self.time_offset_mode, self.anchor, time_us);

        let file_offset = self
            .rdat_file
            .stream_position()
            .map_err(|e| MefError::io("<rdat>", e))?;

        let encoded = body.encode();
        let pad = pad_bytes(encoded.len());

        let mut rdat_buf = encoded;
        rdat_buf.extend(std::iter::repeat(b'~').take(pad));
        self.rdat_crc.update(&rdat_buf);
        self.rdat_file
            .write_all(&rdat_buf)
            .map_err(|e| MefError::io("<rdat>", e))?;

        let entry = RecordIndexEntry {
            file_offset: file_offset as i64,
            time: stored_time,
            type_code: body.tag().code(),
        };
        let mut entry_buf = Vec::with_capacity(RECORD_INDEX_BYTES);
        entry
            .write(&mut entry_buf)
            .map_err(|e| MefError::io("<ridx>", e))?;
        self.ridx_crc.update(&entry_buf);
        self.ridx_file
            .write_all(&entry_buf)
            .map_err(|e| MefError::io("<ridx>", e))?;

        self.rdat_header.number_of_entries += 1;
        self.ridx_header.number_of_entries += 1;
        self.ridx_header.maximum_entry_size = RECORD_INDEX_BYTES as u32;
        self.rdat_header.maximum_entry_size =
            self.rdat_header.maximum_entry_size.max(rdat_buf.len() as u32);

        self.reseal_headers()
    }

    pub fn close(mut self) -> Result<()> {
        self.reseal_headers()
    }

    fn reseal_headers(&mut self) -> Result<()> {
        self.rdat_header.body_crc = self.rdat_crc.value();
        self.ridx_header.body_crc = self.ridx_crc.value();
        reseal_tail(&mut self.rdat_file, &mut self.rdat_header)?;
        reseal_tail(&mut self.ridx_file, &mut self.ridx_header)?;
        Ok(())
    }
}

fn reseal_tail(file: &mut File, header: &mut UniversalHeader) -> Result<()> {
    let tail = file.stream_position().map_err(|e| MefError::io("<header>", e))?;
    header.reseal();
    file.seek(SeekFrom::Start(0))
        .map_err(|e| MefError::io("<header>", e))?;
    header.write(file).map_err(|e| MefError::io("<header>", e))?;
    file.seek(SeekFrom::Start(tail))
        .map_err(|e| MefError::io("<header>", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_is_rejected() {
        let result = RecordTag::from_str("Xxxx");
        assert!(result.is_err());
    }

    #[test]
    fn note_body_roundtrips() {
        let body = RecordBody::Note("seizure onset suspected".into());
        let encoded = body.encode();
        let decoded = RecordBody::decode(RecordTag::Note, &encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn pad_bytes_is_zero_on_exact_multiple() {
        assert_eq!(pad_bytes(32), 0);
        assert_eq!(pad_bytes(33), 15);
        assert_eq!(pad_bytes(16), 0);
    }

    #[test]
    fn write_then_reopen_appends_after_existing_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RecordWriter::open_or_create(
            dir.path(),
            "eeg_fp1",
            crate::config::TimeOffsetMode::Ignore,
        )
        .unwrap();
        writer
            .write_record(1_000, RecordBody::Note("first".into()))
            .unwrap();
        writer.close().unwrap();

        let mut reopened = RecordWriter::open_or_create(
            dir.path(),
            "eeg_fp1",
            crate::config::TimeOffsetMode::Ignore,
        )
        .unwrap();
        assert_eq!(reopened.rdat_header.number_of_entries, 1);
        reopened
            .write_record(2_000, RecordBody::Cursor { id: 7, value: 1.5 })
            .unwrap();
        assert_eq!(reopened.ridx_header.number_of_entries, 2);
        reopened.close().unwrap();
    }

    #[test]
    fn record_index_entry_is_24_bytes() {
        let entry = RecordIndexEntry {
            file_offset: 320,
            time: 1000,
            type_code: *b"Note",
        };
        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len(), RECORD_INDEX_BYTES);
    }
}
