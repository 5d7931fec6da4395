// SPDX-License-Identifier: Apache-2.0 OR MIT

//! mef-sine-demo - write a synthetic sine-wave channel to a MEF3 session.
//!
//! Usage:
//!   mef-sine-demo --output ./out --seconds 30 --frequency 1000 --amplitude 200

use clap::Parser;
use mef_stream::config::{
    ChannelConfig, FilterSettings, PasswordConfig, SubjectInfo, TimeOffsetMode,
};
use mef_stream::session::{ChannelKind, SessionLayout};
use mef_stream::ChannelWriter;
use std::f64::consts::PI;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mef-sine-demo")]
#[command(about = "Write a synthetic sine-wave channel to a MEF3 session")]
#[command(version)]
struct Args {
    /// Directory to create the session under
    #[arg(short, long)]
    output: PathBuf,

    /// Load channel configuration from a JSON file instead of the flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session name (without the .mefd suffix)
    #[arg(long, default_value = "demo_session")]
    session_name: String,

    /// Channel name
    #[arg(long, default_value = "sine_ch1")]
    channel_name: String,

    /// Sampling frequency, Hz
    #[arg(long, default_value = "1000.0")]
    sampling_frequency: f64,

    /// Sine wave frequency, Hz
    #[arg(long, default_value = "10.0")]
    frequency: f64,

    /// Peak amplitude, in native sample units
    #[arg(long, default_value = "2000.0")]
    amplitude: f64,

    /// Duration to synthesize, seconds
    #[arg(long, default_value = "10.0")]
    seconds: f64,

    /// Seconds of buffered data per block
    #[arg(long, default_value = "1.0")]
    secs_per_block: f64,

    /// Segment duration, seconds (0 disables rollover)
    #[arg(long, default_value = "0")]
    segment_duration_secs: u64,

    /// Inject a discontinuity (a large timestamp jump) partway through
    #[arg(long)]
    inject_discontinuity: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    let session = SessionLayout::create(&args.output, &args.session_name)?;
    let channel_dir = session.channel_directory(&args.channel_name, ChannelKind::TimeSeries)?;

    let config = match &args.config {
        Some(path) => {
            info!("Loading channel config from {}", path.display());
            ChannelConfig::from_json_file(path)?
        }
        None => ChannelConfig {
            session_directory: channel_dir,
            session_name: args.session_name.clone(),
            channel_name: args.channel_name.clone(),
            anonymized_subject_name: "anon".into(),
            session_description: Some("synthetic sine wave demo".into()),
            secs_per_block: args.secs_per_block,
            sampling_frequency: args.sampling_frequency,
            block_interval_us: (args.secs_per_block * 1_000_000.0) as i64,
            bit_shift_flag: false,
            filter: FilterSettings::default(),
            units_conversion_factor: 1.0,
            subject: SubjectInfo::default(),
            password: PasswordConfig::default(),
            segment_duration_us: args.segment_duration_secs * 1_000_000,
            time_offset_mode: TimeOffsetMode::Ignore,
            gmt_offset_hours: 0.0,
        },
    };

    info!("Session: {}", session.root().display());
    info!(
        "Channel: {} ({} Hz, {} s)",
        args.channel_name, args.sampling_frequency, args.seconds
    );

    let mut writer = ChannelWriter::create(config)?;

    let total_samples = (args.seconds * args.sampling_frequency) as u64;
    let sample_interval_us = (1_000_000.0 / args.sampling_frequency) as i64;
    let mut time_us: i64 = 0;
    let discontinuity_at = total_samples / 2;

    for n in 0..total_samples {
        if args.inject_discontinuity && n == discontinuity_at {
            time_us += 10_000_000; // 10s jump, well past the threshold
        }
        let t_secs = n as f64 / args.sampling_frequency;
        let value = (args.amplitude * (2.0 * PI * args.frequency * t_secs).sin()) as i32;
        writer.write_sample(time_us, value)?;
        time_us += sample_interval_us;
    }

    writer.flush()?;
    writer.close()?;

    info!("Wrote {} samples", total_samples);
    Ok(())
}
