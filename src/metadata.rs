// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Section 2 (time-series aggregates) and Section 3 (subject/recording
//! attribution) metadata, plus the `.tmet` file read/write-with-reseal
//! cycle. Grounded on `update_metadata()`: the original rewrites the
//! entire metadata file on every flush rather than patching individual
//! fields, and reseals the universal header's CRC before doing so — the
//! same "rewrite to offset 0" pattern `HddsWriter::finalize` uses to fix
//! up its header after streaming segments.

use crate::config::{ChannelConfig, FilterSettings, SubjectInfo, TimeOffsetMode};
use crate::crc::{crc32, RunningCrc};
use crate::error::{MefError, Result};
use crate::header::{UniversalHeader, FILE_TYPE_TMET};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Section 2: continuously-updated aggregates over the channel's data.
#[derive(Debug, Clone, Default)]
pub struct Section2 {
    pub sampling_frequency: f64,
    pub block_interval_us: i64,
    pub units_conversion_factor: f64,
    pub filter: FilterSettings,
    pub start_sample: i64,
    pub number_of_samples: u64,
    pub number_of_blocks: u64,
    pub maximum_block_bytes: u32,
    pub maximum_block_samples: u32,
    pub maximum_difference_bytes: u32,
    pub number_of_discontinuities: u64,
    pub maximum_contiguous_blocks: u64,
    pub maximum_contiguous_block_bytes: u64,
    pub maximum_contiguous_samples: u64,
    pub minimum_native_sample_value: f64,
    pub maximum_native_sample_value: f64,
    pub recording_duration_us: i64,
}

impl Section2 {
    /// Folds one freshly-closed block's stats in, mirroring
    /// `process_filled_block`'s aggregate updates.
    pub fn record_block(
        &mut self,
        number_of_samples: u32,
        block_bytes: u32,
        difference_bytes: u32,
        discontinuity: bool,
        native_min: f64,
        native_max: f64,
    ) {
        self.number_of_blocks += 1;
        self.number_of_samples += number_of_samples as u64;
        self.maximum_block_bytes = self.maximum_block_bytes.max(block_bytes);
        self.maximum_block_samples = self.maximum_block_samples.max(number_of_samples);
        self.maximum_difference_bytes = self.maximum_difference_bytes.max(difference_bytes);

        if self.number_of_blocks == 1 {
            self.minimum_native_sample_value = native_min;
            self.maximum_native_sample_value = native_max;
        } else {
            self.minimum_native_sample_value = self.minimum_native_sample_value.min(native_min);
            self.maximum_native_sample_value = self.maximum_native_sample_value.max(native_max);
        }

        if discontinuity {
            self.number_of_discontinuities += 1;
        }
    }
}

/// Section 3: subject attribution and per-channel time-offset bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Section3 {
    pub subject: SubjectInfo,
    pub time_offset_mode: TimeOffsetMode,
    pub recording_time_offset_us: i64,
    pub gmt_offset_hours: f32,
}

/// In-memory owner of a channel's `.tmet` file plus its universal header.
pub struct MetadataFile {
    path: std::path::PathBuf,
    pub header: UniversalHeader,
    pub section2: Section2,
    pub section3: Section3,
}

impl MetadataFile {
    pub fn create(path: &Path, config: &ChannelConfig) -> Result<Self> {
        let mut header = UniversalHeader::new(FILE_TYPE_TMET);
        header.set_channel_name(&config.channel_name);
        header.set_session_name(&config.session_name);
        header.set_anonymized_name(&config.anonymized_subject_name);
        header.file_uuid = crate::ids::generate_uuid();
        header.level_uuid = crate::ids::generate_uuid();

        let section2 = Section2 {
            sampling_frequency: config.sampling_frequency,
            block_interval_us: config.block_interval_us,
            units_conversion_factor: config.units_conversion_factor,
            filter: config.filter.clone(),
            ..Default::default()
        };
        let section3 = Section3 {
            subject: config.subject.clone(),
            time_offset_mode: config.time_offset_mode,
            gmt_offset_hours: config.gmt_offset_hours,
            ..Default::default()
        };

        let mut file = Self {
            path: path.to_path_buf(),
            header,
            section2,
            section3,
        };
        file.write_full()?;
        Ok(file)
    }

    /// Rewrites the entire metadata file from scratch: body_crc over
    /// Section 2 and Section 3, then reseal the header's own CRC, then
    /// write the header, Section 2, and Section 3 in order.
    pub fn write_full(&mut self) -> Result<()> {
        let mut body = Vec::new();
        write_section2(&mut body, &self.section2)
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;
        write_section3(&mut body, &self.section3)
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;

        let mut body_crc = RunningCrc::new();
        body_crc.update(&body);
        self.header.body_crc = body_crc.value();
        self.header.reseal();

        let mut out = Vec::new();
        self.header
            .write(&mut out)
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;
        out.extend_from_slice(&body);

        let mut file = File::create(&self.path)
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;
        file.write_all(&out)
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;
        Ok(())
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).map_err(|e| MefError::io(path.display().to_string(), e))?;
        let header = UniversalHeader::read(&mut file)
            .map_err(|e| MefError::io(path.display().to_string(), e))?;
        let section2 = read_section2(&mut file)
            .map_err(|e| MefError::io(path.display().to_string(), e))?;
        let section3 = read_section3(&mut file)
            .map_err(|e| MefError::io(path.display().to_string(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            section2,
            section3,
        })
    }

    /// Seeks to offset 0 and rewrites only the header, leaving Section 2/3
    /// untouched — used when only timing/CRC fields changed, the
    /// lighter-weight path `process_filled_block` takes on most blocks.
    pub fn reseal_header_in_place(&mut self) -> Result<()> {
        self.header.reseal();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;
        self.header
            .write(&mut file)
            .map_err(|e| MefError::io(self.path.display().to_string(), e))?;
        Ok(())
    }
}

fn write_section2<W: Write>(w: &mut W, s: &Section2) -> io::Result<()> {
    w.write_f64::<LittleEndian>(s.sampling_frequency)?;
    w.write_i64::<LittleEndian>(s.block_interval_us)?;
    w.write_f64::<LittleEndian>(s.units_conversion_factor)?;
    w.write_f64::<LittleEndian>(s.filter.low_frequency_filter_setting)?;
    w.write_f64::<LittleEndian>(s.filter.high_frequency_filter_setting)?;
    w.write_f64::<LittleEndian>(s.filter.notch_filter_frequency)?;
    w.write_f64::<LittleEndian>(s.filter.ac_line_frequency)?;
    w.write_i64::<LittleEndian>(s.start_sample)?;
    w.write_u64::<LittleEndian>(s.number_of_samples)?;
    w.write_u64::<LittleEndian>(s.number_of_blocks)?;
    w.write_u32::<LittleEndian>(s.maximum_block_bytes)?;
    w.write_u32::<LittleEndian>(s.maximum_block_samples)?;
    w.write_u32::<LittleEndian>(s.maximum_difference_bytes)?;
    w.write_u64::<LittleEndian>(s.number_of_discontinuities)?;
    w.write_u64::<LittleEndian>(s.maximum_contiguous_blocks)?;
    w.write_u64::<LittleEndian>(s.maximum_contiguous_block_bytes)?;
    w.write_u64::<LittleEndian>(s.maximum_contiguous_samples)?;
    w.write_f64::<LittleEndian>(s.minimum_native_sample_value)?;
    w.write_f64::<LittleEndian>(s.maximum_native_sample_value)?;
    w.write_i64::<LittleEndian>(s.recording_duration_us)?;
    Ok(())
}

fn read_section2<R: Read>(r: &mut R) -> io::Result<Section2> {
    Ok(Section2 {
        sampling_frequency: r.read_f64::<LittleEndian>()?,
        block_interval_us: r.read_i64::<LittleEndian>()?,
        units_conversion_factor: r.read_f64::<LittleEndian>()?,
        filter: FilterSettings {
            low_frequency_filter_setting: r.read_f64::<LittleEndian>()?,
            high_frequency_filter_setting: r.read_f64::<LittleEndian>()?,
            notch_filter_frequency: r.read_f64::<LittleEndian>()?,
            ac_line_frequency: r.read_f64::<LittleEndian>()?,
        },
        start_sample: r.read_i64::<LittleEndian>()?,
        number_of_samples: r.read_u64::<LittleEndian>()?,
        number_of_blocks: r.read_u64::<LittleEndian>()?,
        maximum_block_bytes: r.read_u32::<LittleEndian>()?,
        maximum_block_samples: r.read_u32::<LittleEndian>()?,
        maximum_difference_bytes: r.read_u32::<LittleEndian>()?,
        number_of_discontinuities: r.read_u64::<LittleEndian>()?,
        maximum_contiguous_blocks: r.read_u64::<LittleEndian>()?,
        maximum_contiguous_block_bytes: r.read_u64::<LittleEndian>()?,
        maximum_contiguous_samples: r.read_u64::<LittleEndian>()?,
        minimum_native_sample_value: r.read_f64::<LittleEndian>()?,
        maximum_native_sample_value: r.read_f64::<LittleEndian>()?,
        recording_duration_us: r.read_i64::<LittleEndian>()?,
    })
}

fn write_opt_string<W: Write>(w: &mut W, s: &Option<String>) -> io::Result<()> {
    let bytes = s.as_deref().unwrap_or("").as_bytes();
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_opt_string<R: Read>(r: &mut R) -> io::Result<Option<String>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    if buf.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

fn write_section3<W: Write>(w: &mut W, s: &Section3) -> io::Result<()> {
    write_opt_string(w, &s.subject.subject_first_name)?;
    write_opt_string(w, &s.subject.subject_second_name)?;
    write_opt_string(w, &s.subject.subject_id)?;
    write_opt_string(w, &s.subject.institution)?;
    write_opt_string(w, &s.subject.study_comments)?;
    write_opt_string(w, &s.subject.channel_comments)?;
    w.write_u8(match s.time_offset_mode {
        TimeOffsetMode::Ignore => 0,
        TimeOffsetMode::Apply => 1,
        TimeOffsetMode::ApplyOnOutput => 2,
    })?;
    w.write_i64::<LittleEndian>(s.recording_time_offset_us)?;
    w.write_f32::<LittleEndian>(s.gmt_offset_hours)?;
    Ok(())
}

fn read_section3<R: Read>(r: &mut R) -> io::Result<Section3> {
    let subject = SubjectInfo {
        subject_first_name: read_opt_string(r)?,
        subject_second_name: read_opt_string(r)?,
        subject_id: read_opt_string(r)?,
        institution: read_opt_string(r)?,
        study_comments: read_opt_string(r)?,
        channel_comments: read_opt_string(r)?,
    };
    let time_offset_mode = match r.read_u8()? {
        1 => TimeOffsetMode::Apply,
        2 => TimeOffsetMode::ApplyOnOutput,
        _ => TimeOffsetMode::Ignore,
    };
    let recording_time_offset_us = r.read_i64::<LittleEndian>()?;
    let gmt_offset_hours = r.read_f32::<LittleEndian>()?;
    Ok(Section3 {
        subject,
        time_offset_mode,
        recording_time_offset_us,
        gmt_offset_hours,
    })
}

/// CRC over just the universal header, used by callers that want to
/// confirm a rewrite landed correctly without reopening the file.
pub fn header_crc_of(header: &UniversalHeader) -> u32 {
    let mut buf = Vec::new();
    let _ = header.write(&mut buf);
    crc32(&buf[4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordConfig;

    fn test_config() -> ChannelConfig {
        ChannelConfig {
            session_directory: std::path::PathBuf::from("/tmp/does-not-matter"),
            session_name: "sess".into(),
            channel_name: "eeg_fp1".into(),
            anonymized_subject_name: "anon".into(),
            session_description: None,
            secs_per_block: 1.0,
            sampling_frequency: 1000.0,
            block_interval_us: 1_000_000,
            bit_shift_flag: false,
            filter: FilterSettings::default(),
            units_conversion_factor: 1.0,
            subject: SubjectInfo::default(),
            password: PasswordConfig::default(),
            segment_duration_us: 3_600_000_000,
            time_offset_mode: TimeOffsetMode::Ignore,
            gmt_offset_hours: 0.0,
        }
    }

    #[test]
    fn create_then_open_roundtrips_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chan.tmet");
        let cfg = test_config();
        let mut created = MetadataFile::create(&path, &cfg).unwrap();
        created
            .section2
            .record_block(1000, 900, 850, false, -100.0, 100.0);
        created.write_full().unwrap();

        let reopened = MetadataFile::open(&path).unwrap();
        assert_eq!(reopened.section2.number_of_blocks, 1);
        assert_eq!(reopened.section2.number_of_samples, 1000);
        assert_eq!(reopened.section2.sampling_frequency, 1000.0);
        assert!(reopened.header.verify_header_crc());
    }

    #[test]
    fn record_block_tracks_running_extrema() {
        let mut s2 = Section2::default();
        s2.record_block(10, 5, 5, false, -5.0, 5.0);
        s2.record_block(10, 5, 5, true, -20.0, 3.0);
        assert_eq!(s2.minimum_native_sample_value, -20.0);
        assert_eq!(s2.maximum_native_sample_value, 5.0);
        assert_eq!(s2.number_of_discontinuities, 1);
    }
}
