//! Validate an engine config and print the ports it resolves to.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use hpae_config::EngineConfig;
use serde_json::{Value, json};

/// Check an engine config file.
#[derive(Args)]
pub struct ConfigArgs {
    /// Path to the engine config (TOML)
    pub file: PathBuf,

    /// Print the resolved ports as JSON
    #[arg(long)]
    pub json: bool,
}

/// Resolved view of `config`: every sink and source with its derived frame
/// length, plus the engine settings.
pub(crate) fn resolve(config: &EngineConfig) -> anyhow::Result<Value> {
    let mut sinks = Vec::with_capacity(config.sink.len());
    for module in &config.sink {
        let info = module
            .to_sink_info()
            .with_context(|| format!("sink '{}'", module.name))?;
        sinks.push(json!({
            "name": info.device_name,
            "class": info.device_class,
            "network_id": info.device_net_id,
            "rate": info.sample_rate,
            "channels": info.channels,
            "format": info.format.as_str(),
            "frame_len": info.frame_len,
            "file": info.file_path,
        }));
    }

    let mut sources = Vec::with_capacity(config.source.len());
    for module in &config.source {
        let info = module
            .to_source_info()
            .with_context(|| format!("source '{}'", module.name))?;
        sources.push(json!({
            "name": info.source_name,
            "class": info.device_class,
            "network_id": info.device_net_id,
            "rate": info.sample_rate,
            "channels": info.channels,
            "format": info.format.as_str(),
            "frame_len": info.frame_len,
            "source_type": format!("{:?}", info.source_type),
            "ec_type": format!("{:?}", info.ec_type),
            "mic_ref": info.mic_ref_enabled,
        }));
    }

    Ok(json!({
        "engine": {
            "frame_ms": config.engine.frame_ms,
            "pa_close_after_ms": config.engine.pa_close_after_ms,
            "queue_depth": config.engine.queue_depth,
            "history_frames": config.engine.history_frames,
        },
        "sinks": sinks,
        "sources": sources,
    }))
}

/// Run the config command.
pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let config =
        EngineConfig::load(&args.file).with_context(|| format!("loading {}", args.file.display()))?;
    let resolved = resolve(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    println!("Config: {}", args.file.display());
    println!(
        "Engine: {} ms ticks, queue depth {}",
        config.engine.frame_ms, config.engine.queue_depth
    );
    for (kind, list) in [("sink", &resolved["sinks"]), ("source", &resolved["sources"])] {
        for port in list.as_array().into_iter().flatten() {
            println!(
                "  {kind:<6} {:<20} {:<10} {} Hz, {} ch, {}, {} frames/tick",
                port["name"].as_str().unwrap_or_default(),
                port["class"].as_str().unwrap_or_default(),
                port["rate"],
                port["channels"],
                port["format"].as_str().unwrap_or_default(),
                port["frame_len"],
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_frame_lengths() {
        let config = EngineConfig::from_toml_str(
            r#"
            [[sink]]
            name = "Speaker"
            class_name = "primary"
            rate = 48000
            channels = 2
            format = "s16le"
            buffer_size = 3840

            [[source]]
            name = "mic"
            class_name = "null"
            rate = 16000
            channels = 1
            buffer_size = 640
            "#,
        )
        .unwrap();
        let resolved = resolve(&config).unwrap();
        assert_eq!(resolved["sinks"][0]["frame_len"], 960);
        assert_eq!(resolved["sources"][0]["frame_len"], 320);
        assert_eq!(resolved["sources"][0]["source_type"], "Mic");
        assert_eq!(resolved["engine"]["queue_depth"], 64);
    }
}
