// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The channel writer state machine: block boundaries, segment rollover,
//! and the three open files (`.tmet`, `.tidx`, `.tdat`) that make up one
//! segment. Grounded on `write_mef_channel_data` / `process_filled_block`
//! / `check_for_new_segment` in the original, restructured around an
//! owned `ChannelWriter` the way `recorder.rs`'s `Recorder` owns its
//! output handle and rotation state, instead of a single global
//! `CHANNEL_STATE*` passed through every call.

use crate::config::{ChannelConfig, TimeOffsetMode};
use crate::crc::RunningCrc;
use crate::error::{MefError, Result};
use crate::header::{UniversalHeader, FILE_TYPE_TDAT, FILE_TYPE_TIDX};
use crate::ids;
use crate::index::{BlockFlags, IndexEntry, INDEX_ENTRY_BYTES};
use crate::metadata::MetadataFile;
use crate::red::{BlockHeader, RedCodec};
use crate::time_offset::{self, TimeOffsetAnchor};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A timestamp delta at or above this many microseconds closes the
/// current block and marks the next one discontinuous, regardless of
/// `block_interval_us`.
pub const DISCONTINUITY_TIME_THRESHOLD_US: i64 = 100_000;

struct SegmentPaths {
    tmet: PathBuf,
    tidx: PathBuf,
    tdat: PathBuf,
}

fn segment_paths(session_dir: &Path, channel_name: &str, segment_number: i32) -> SegmentPaths {
    let segment_dir = session_dir.join(format!("{channel_name}-{segment_number:06}.segd"));
    SegmentPaths {
        tmet: segment_dir.join(format!("{channel_name}-{segment_number:06}.tmet")),
        tidx: segment_dir.join(format!("{channel_name}-{segment_number:06}.tidx")),
        tdat: segment_dir.join(format!("{channel_name}-{segment_number:06}.tdat")),
    }
}

struct ContiguousRun {
    blocks: u64,
    bytes: u64,
    samples: u64,
}

impl ContiguousRun {
    fn new() -> Self {
        Self {
            blocks: 0,
            bytes: 0,
            samples: 0,
        }
    }

    fn reset(&mut self) {
        self.blocks = 0;
        self.bytes = 0;
        self.samples = 0;
    }
}

/// Owns the three open files that make up the current segment and all
/// in-progress block state for one channel.
pub struct ChannelWriter {
    config: ChannelConfig,
    codec: Box<dyn RedCodec>,

    metadata: MetadataFile,
    index_file: File,
    index_header: UniversalHeader,
    index_crc: RunningCrc,
    data_file: File,
    data_header: UniversalHeader,
    data_crc: RunningCrc,

    level_uuid: ids::Uuid16,
    segment_number: i32,
    next_segment_start_time: Option<i64>,

    buffer: Vec<i32>,
    block_hdr_time: Option<i64>,
    block_boundary: i64,
    last_chan_timestamp: Option<i64>,
    start_sample: i64,
    /// Whether the block currently being filled starts after a
    /// discontinuity. Seeded `true` for a channel's very first block (a
    /// segment's opening block is discontinuous by definition), then
    /// set when the *previous* block closes and consumed as that flag
    /// when *this* one closes in turn.
    pending_discontinuity: bool,

    contiguous: ContiguousRun,
    anchor: Option<TimeOffsetAnchor>,
}

impl ChannelWriter {
    /// Opens a brand-new channel: fresh UUIDs, segment 0, empty files
    /// each carrying their own universal header.
    pub fn create(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        let level_uuid = ids::generate_uuid();
        let paths = segment_paths(&config.session_directory, &config.channel_name, 0);
        ids::ensure_dir(paths.tmet.parent().unwrap())
            .map_err(|e| MefError::io(paths.tmet.display().to_string(), e))?;

        let metadata = MetadataFile::create(&paths.tmet, &config)?;

        let mut index_header = UniversalHeader::new(FILE_TYPE_TIDX);
        index_header.set_channel_name(&config.channel_name);
        index_header.set_session_name(&config.session_name);
        index_header.file_uuid = ids::generate_uuid();
        index_header.level_uuid = level_uuid;

        let mut data_header = UniversalHeader::new(FILE_TYPE_TDAT);
        data_header.set_channel_name(&config.channel_name);
        data_header.set_session_name(&config.session_name);
        data_header.file_uuid = ids::generate_uuid();
        data_header.level_uuid = level_uuid;

        let mut index_file = File::create(&paths.tidx)
            .map_err(|e| MefError::io(paths.tidx.display().to_string(), e))?;
        index_header
            .write(&mut index_file)
            .map_err(|e| MefError::io(paths.tidx.display().to_string(), e))?;

        let mut data_file = File::create(&paths.tdat)
            .map_err(|e| MefError::io(paths.tdat.display().to_string(), e))?;
        data_header
            .write(&mut data_file)
            .map_err(|e| MefError::io(paths.tdat.display().to_string(), e))?;

        // Established once the first sample's timestamp is known.
        let next_segment_start_time = None;

        Ok(Self {
            codec: Box::new(crate::red::DeltaVarintRed),
            metadata,
            index_file,
            index_header,
            index_crc: RunningCrc::new(),
            data_file,
            data_header,
            data_crc: RunningCrc::new(),
            level_uuid,
            segment_number: 0,
            next_segment_start_time,
            buffer: Vec::with_capacity(config.block_len()),
            block_hdr_time: None,
            block_boundary: 0,
            last_chan_timestamp: None,
            start_sample: 0,
            pending_discontinuity: true,
            contiguous: ContiguousRun::new(),
            anchor: time_offset::current(),
            config,
        })
    }

    /// Appends one `(timestamp_us, sample)` pair, closing blocks and
    /// rolling segments as needed.
    pub fn write_sample(&mut self, time_us: i64, sample: i32) -> Result<()> {
        if self.anchor.is_none() && self.config.time_offset_mode.offsets_are_applied() {
            self.anchor = Some(time_offset::establish(
                self.config.time_offset_mode,
                time_us,
                self.config.gmt_offset_hours,
            ));
        }
        if self.next_segment_start_time.is_none() && self.config.segment_duration_us > 0 {
            self.next_segment_start_time =
                Some(self.next_boundary(time_us, self.config.segment_duration_us as i64));
        }

        match self.block_hdr_time {
            None => {
                self.block_hdr_time = Some(time_us);
                self.block_boundary = time_us;
            }
            Some(_) => {
                let discontinuity = self
                    .last_chan_timestamp
                    .map(|last| (time_us - last).abs() >= DISCONTINUITY_TIME_THRESHOLD_US)
                    .unwrap_or(false);
                let interval_exceeded = time_us - self.block_boundary >= self.config.block_interval_us;
                if discontinuity || interval_exceeded {
                    let closing_flag = self.pending_discontinuity;
                    self.close_block(closing_flag)?;
                    self.pending_discontinuity = discontinuity;
                    self.block_hdr_time = Some(time_us);
                    self.block_boundary = if discontinuity {
                        time_us
                    } else {
                        self.block_boundary + self.config.block_interval_us
                    };
                }
            }
        }

        self.buffer.push(sample);
        self.last_chan_timestamp = Some(time_us);

        Ok(())
    }

    pub fn write_samples(&mut self, samples: &[(i64, i32)]) -> Result<()> {
        for &(t, s) in samples {
            self.write_sample(t, s)?;
        }
        Ok(())
    }

    /// Forces the in-progress block closed without waiting for it to
    /// fill, marking the next block discontinuous (`flush_mef_channel`).
    pub fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let closing_flag = self.pending_discontinuity;
            self.close_block(closing_flag)?;
        }
        self.pending_discontinuity = true;
        self.block_hdr_time = None;
        self.block_boundary = 0;
        self.metadata.write_full()
    }

    /// Closes the current block and segment, resealing every header one
    /// final time, and returns the channel's final aggregate stats
    /// (`close_mef_channel`; the stats return mirrors
    /// `Recorder::stop() -> RecordingStats`).
    pub fn close(mut self) -> Result<crate::metadata::Section2> {
        if !self.buffer.is_empty() {
            let closing_flag = self.pending_discontinuity;
            self.close_block(closing_flag)?;
        }
        self.metadata.write_full()?;
        self.reseal_headers()?;
        Ok(self.metadata.section2.clone())
    }

    fn next_boundary(&self, time_us: i64, step_us: i64) -> i64 {
        time_us + step_us
    }

    /// Compresses the buffered samples, writes the block and its index
    /// entry, updates Section 2 and the universal headers
    /// (`process_filled_block`).
    fn close_block(&mut self, discontinuity: bool) -> Result<()> {
        let samples = std::mem::take(&mut self.buffer);
        if samples.is_empty() {
            return Ok(());
        }
        let start_time = self.block_hdr_time.unwrap_or(self.last_chan_timestamp.unwrap_or(0));

        self.maybe_roll_segment(start_time)?;

        let shifted: Vec<i32> = if self.config.bit_shift_flag {
            quantize_bit_shift(&samples)
        } else {
            samples
        };

        let extrema = self.codec.find_extrema(&shifted);
        let stored_time = time_offset::apply_for_storage(
            self.config.time_offset_mode,
            self.anchor,
            start_time,
        );
        let encoded = self.codec.encode(&shifted, stored_time, discontinuity);

        let data_file_offset = self
            .data_file
            .stream_position()
            .map_err(|e| MefError::io("<tdat>", e))?;

        let block_bytes = (crate::red::BLOCK_HEADER_BYTES + encoded.compressed.len()) as u32;
        let header = BlockHeader {
            start_time: stored_time,
            number_of_samples: encoded.header.number_of_samples,
            block_bytes,
            difference_bytes: encoded.header.difference_bytes,
            discontinuity,
        };

        let mut block_buf = Vec::with_capacity(block_bytes as usize);
        header
            .write(&mut block_buf)
            .map_err(|e| MefError::io("<tdat>", e))?;
        block_buf.extend_from_slice(&encoded.compressed);
        self.data_crc.update(&block_buf);
        self.data_file
            .write_all(&block_buf)
            .map_err(|e| MefError::io("<tdat>", e))?;

        let native_min = extrema.min as f64 * self.config.units_conversion_factor;
        let native_max = extrema.max as f64 * self.config.units_conversion_factor;
        let (native_min, native_max) = if self.config.units_conversion_factor < 0.0 {
            (native_max, native_min)
        } else {
            (native_min, native_max)
        };

        let entry = IndexEntry {
            file_offset: data_file_offset as i64,
            start_time: stored_time,
            start_sample: self.start_sample,
            number_of_samples: header.number_of_samples,
            block_bytes,
            max_sample_value: extrema.max,
            min_sample_value: extrema.min,
            flags: BlockFlags(if discontinuity {
                BlockFlags::DISCONTINUOUS
            } else {
                0
            }),
        };
        let mut entry_buf = Vec::with_capacity(INDEX_ENTRY_BYTES);
        entry
            .write(&mut entry_buf)
            .map_err(|e| MefError::io("<tidx>", e))?;
        self.index_crc.update(&entry_buf);
        self.index_file
            .write_all(&entry_buf)
            .map_err(|e| MefError::io("<tidx>", e))?;

        self.metadata.section2.record_block(
            header.number_of_samples,
            block_bytes,
            header.difference_bytes,
            discontinuity,
            native_min,
            native_max,
        );
        self.start_sample += header.number_of_samples as i64;

        if discontinuity {
            self.contiguous.reset();
        } else {
            self.contiguous.blocks += 1;
            self.contiguous.bytes += block_bytes as u64;
            self.contiguous.samples += header.number_of_samples as u64;
        }
        self.metadata.section2.maximum_contiguous_blocks = self
            .metadata
            .section2
            .maximum_contiguous_blocks
            .max(self.contiguous.blocks);
        self.metadata.section2.maximum_contiguous_block_bytes = self
            .metadata
            .section2
            .maximum_contiguous_block_bytes
            .max(self.contiguous.bytes);
        self.metadata.section2.maximum_contiguous_samples = self
            .metadata
            .section2
            .maximum_contiguous_samples
            .max(self.contiguous.samples);

        if self.metadata.header.session_start_time == crate::header::TIME_NO_ENTRY {
            self.metadata.header.session_start_time = stored_time;
        }
        let duration_us = ((header.number_of_samples as f64 / self.config.sampling_frequency)
            * 1_000_000.0)
            .round() as i64;
        self.metadata.header.session_end_time = stored_time + duration_us;
        self.index_header.number_of_entries += 1;
        self.data_header.number_of_entries += 1;
        self.index_header.maximum_entry_size = INDEX_ENTRY_BYTES as u32;
        self.data_header.maximum_entry_size = self.data_header.maximum_entry_size.max(block_bytes);

        self.metadata.write_full()?;
        self.reseal_headers()?;
        Ok(())
    }

    /// Checks whether the pending block's start time crosses the next
    /// segment boundary and, if so, closes the current segment's files
    /// and opens a fresh one (`check_for_new_segment`). Direction of the
    /// comparison flips under `Apply` and `ApplyOnOutput` alike, where
    /// stored times run backwards relative to the unapplied boundary
    /// (see DESIGN.md); both directions roll on equality, not just past it.
    fn maybe_roll_segment(&mut self, start_time: i64) -> Result<()> {
        let Some(next) = self.next_segment_start_time else {
            return Ok(());
        };
        let inverted = matches!(
            self.config.time_offset_mode,
            TimeOffsetMode::Apply | TimeOffsetMode::ApplyOnOutput
        );
        let should_roll = if inverted {
            start_time <= next
        } else {
            start_time >= next
        };
        if !should_roll {
            return Ok(());
        }

        self.metadata.write_full()?;
        self.reseal_headers()?;

        self.segment_number += 1;
        let paths = segment_paths(
            &self.config.session_directory,
            &self.config.channel_name,
            self.segment_number,
        );
        ids::ensure_dir(paths.tmet.parent().unwrap())
            .map_err(|e| MefError::io(paths.tmet.display().to_string(), e))?;

        self.metadata = MetadataFile::create(&paths.tmet, &self.config)?;

        let mut index_header = UniversalHeader::new(FILE_TYPE_TIDX);
        index_header.set_channel_name(&self.config.channel_name);
        index_header.set_session_name(&self.config.session_name);
        index_header.file_uuid = ids::generate_uuid();
        index_header.level_uuid = self.level_uuid;
        index_header.segment_number = self.segment_number;

        let mut data_header = UniversalHeader::new(FILE_TYPE_TDAT);
        data_header.set_channel_name(&self.config.channel_name);
        data_header.set_session_name(&self.config.session_name);
        data_header.file_uuid = ids::generate_uuid();
        data_header.level_uuid = self.level_uuid;
        data_header.segment_number = self.segment_number;

        let mut index_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&paths.tidx)
            .map_err(|e| MefError::io(paths.tidx.display().to_string(), e))?;
        index_header
            .write(&mut index_file)
            .map_err(|e| MefError::io(paths.tidx.display().to_string(), e))?;

        let mut data_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&paths.tdat)
            .map_err(|e| MefError::io(paths.tdat.display().to_string(), e))?;
        data_header
            .write(&mut data_file)
            .map_err(|e| MefError::io(paths.tdat.display().to_string(), e))?;

        self.index_file = index_file;
        self.index_header = index_header;
        self.index_crc = RunningCrc::new();
        self.data_file = data_file;
        self.data_header = data_header;
        self.data_crc = RunningCrc::new();
        self.contiguous.reset();

        let step = self.config.segment_duration_us as i64;
        self.next_segment_start_time = Some(if inverted { next - step } else { next + step });
        Ok(())
    }

    /// Stamps each body's running CRC into its header and reseals both
    /// headers in place, leaving the file position at the tail.
    fn reseal_headers(&mut self) -> Result<()> {
        self.index_header.body_crc = self.index_crc.value();
        self.data_header.body_crc = self.data_crc.value();
        reseal_tail_header(&mut self.index_file, &mut self.index_header)?;
        reseal_tail_header(&mut self.data_file, &mut self.data_header)?;
        Ok(())
    }
}

/// `20 / 4` with rounding half away from zero, reducing 20-bit ADC
/// samples to 18 bits when `bit_shift_flag` is set.
fn quantize_bit_shift(samples: &[i32]) -> Vec<i32> {
    samples
        .iter()
        .map(|&s| (s as f64 / 4.0).round() as i32)
        .collect()
}

fn reseal_tail_header(file: &mut File, header: &mut UniversalHeader) -> Result<()> {
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
    use crate::config::{FilterSettings, PasswordConfig, SubjectInfo};

    fn test_config(dir: &Path) -> ChannelConfig {
        ChannelConfig {
            session_directory: dir.to_path_buf(),
            session_name: "sess".into(),
            channel_name: "eeg_fp1".into(),
            anonymized_subject_name: "anon".into(),
            session_description: None,
            secs_per_block: 0.01,
            sampling_frequency: 1000.0,
            block_interval_us: 10_000,
            bit_shift_flag: false,
            filter: FilterSettings::default(),
            units_conversion_factor: 1.0,
            subject: SubjectInfo::default(),
            password: PasswordConfig::default(),
            segment_duration_us: 0,
            time_offset_mode: TimeOffsetMode::Ignore,
            gmt_offset_hours: 0.0,
        }
    }

    #[test]
    fn writes_are_grouped_into_blocks_by_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChannelWriter::create(test_config(dir.path())).unwrap();
        for i in 0..25 {
            writer.write_sample(i * 1000, i as i32).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn first_block_is_always_discontinuous() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChannelWriter::create(test_config(dir.path())).unwrap();
        for i in 0..10 {
            writer.write_sample(i * 1000, i as i32).unwrap();
        }
        // One full block (10 samples at 1kHz fills the 10ms interval) plus
        // leftover; the first block closed is the only discontinuous one.
        writer.write_sample(11_000, 99).unwrap();
        let stats = writer.close().unwrap();
        assert_eq!(stats.number_of_discontinuities, 1);
    }

    #[test]
    fn large_time_jump_forces_a_discontinuous_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChannelWriter::create(test_config(dir.path())).unwrap();
        writer.write_sample(0, 1).unwrap();
        writer.write_sample(1_000, 2).unwrap();
        // > 100ms jump: closes block 1, which is discontinuous because
        // it is the channel's first block.
        writer.write_sample(5_000_000, 3).unwrap();
        assert_eq!(writer.metadata.section2.number_of_discontinuities, 1);
        writer.write_sample(5_001_000, 4).unwrap();
        // closes block 2, which started right after the jump and is
        // therefore discontinuous too.
        let stats = writer.close().unwrap();
        assert_eq!(stats.number_of_discontinuities, 2);
    }

    #[test]
    fn bit_shift_flag_quantizes_by_four_with_round_half_away_from_zero() {
        let shifted = quantize_bit_shift(&[-6, -5, 4, 5, 6]);
        assert_eq!(shifted, vec![-2, -1, 1, 1, 2]);
    }

    #[test]
    fn flush_seals_a_partially_filled_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChannelWriter::create(test_config(dir.path())).unwrap();
        writer.write_sample(0, 42).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.metadata.section2.number_of_blocks, 1);
        writer.close().unwrap();
    }
}
