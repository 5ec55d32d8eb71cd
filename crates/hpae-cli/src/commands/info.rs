//! Display WAV file metadata.

use anyhow::Context;
use clap::Args;
use hpae_io::{WavSpec, read_wav_info};

/// Display WAV file information.
#[derive(Args)]
pub struct InfoArgs {
    /// Path to the WAV file
    pub file: std::path::PathBuf,
}

/// Run the info command.
pub fn run(args: InfoArgs) -> anyhow::Result<()> {
    let info = read_wav_info(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let spec = WavSpec {
        channels: info.channels,
        sample_rate: info.sample_rate,
        bits_per_sample: info.bits_per_sample,
        is_float: info.is_float,
    };
    let engine_format = spec
        .sample_format()
        .map_or_else(|| "unsupported".to_string(), |f| f.as_str().to_string());

    println!("File:          {}", args.file.display());
    println!(
        "Format:        {} {}-bit",
        if info.is_float { "IEEE Float" } else { "PCM" },
        info.bits_per_sample
    );
    println!("Engine format: {engine_format}");
    println!("Channels:      {}", info.channels);
    println!("Sample Rate:   {} Hz", info.sample_rate);
    println!(
        "Duration:      {:.3}s ({} frames)",
        info.duration_secs, info.num_frames
    );
    Ok(())
}
