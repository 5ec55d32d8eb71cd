//! Offline render: play WAV files through the engine into a WAV file sink.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::Args;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use hpae_config::{EngineConfig, EngineSettings, ModuleInfo, ModuleRole};
use hpae_core::{HpaeError, Operation, SampleFormat, SessionState, StreamClass, StreamInfo, SystemClock};
use hpae_io::{DeviceContext, FILE_IO_CLASS, WriteCallback, WriteRequest, read_wav};
use hpae_manager::{HpaeManager, StreamStatusListener};
use parking_lot::Mutex;

/// First session id handed to rendered inputs.
const FIRST_SESSION: u32 = 100;

#[derive(Args)]
pub struct RenderArgs {
    /// Input WAV files, mixed together
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Engine config (TOML); its sinks and sources are opened first
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File sink from the config to render into
    #[arg(short, long, requires = "config")]
    sink: Option<String>,

    /// Output sample rate when no config sink is used
    #[arg(long, default_value = "48000")]
    rate: u32,

    /// Output channel count when no config sink is used
    #[arg(long, default_value = "2")]
    channels: u32,

    /// Output sample format when no config sink is used (u8, s16le, s24le, s32le, f32le)
    #[arg(long, default_value = "s16le")]
    format: String,

    /// Client volume applied to every input (0.0 to 1.0)
    #[arg(long)]
    volume: Option<f32>,
}

/// Serves one decoded WAV file as F32LE frames.
pub(crate) struct WavClient {
    samples: Vec<f32>,
    pos: Mutex<usize>,
}

impl WavClient {
    pub(crate) fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            pos: Mutex::new(0),
        }
    }
}

impl WriteCallback for WavClient {
    fn on_write_data(&self, request: &mut WriteRequest) -> hpae_core::Result<()> {
        if !request.need_data {
            return Ok(());
        }
        let mut pos = self.pos.lock();
        let left = &self.samples[*pos..];
        if left.is_empty() {
            request.data.fill(0);
            return Err(HpaeError::NotEnoughData);
        }
        let n = (request.data.len() / 4).min(left.len());
        for (chunk, sample) in request.data.chunks_exact_mut(4).zip(&left[..n]) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        request.data[n * 4..].fill(0);
        *pos += n;
        Ok(())
    }
}

/// Forwards `Drained` reports.
struct DrainWatcher {
    tx: Sender<u32>,
}

impl StreamStatusListener for DrainWatcher {
    fn on_status_update(&self, class: StreamClass, session_id: u32, _state: SessionState, operation: Operation) {
        if class == StreamClass::Play && operation == Operation::Drained {
            let _ = self.tx.send(session_id);
        }
    }
}

fn default_sink(args: &RenderArgs) -> ModuleInfo {
    let format = args.format.parse::<SampleFormat>().map_or(0, SampleFormat::sample_size);
    // Buffer of one 20 ms tick.
    let buffer_size = (args.rate / 50) as usize * args.channels as usize * format;
    ModuleInfo::new("file_sink", ModuleRole::Sink)
        .with_class(FILE_IO_CLASS)
        .with_format(args.rate, args.channels, &args.format, buffer_size)
}

fn resolve_sink(args: &RenderArgs, config: Option<&EngineConfig>) -> anyhow::Result<ModuleInfo> {
    let mut module = match (config, &args.sink) {
        (Some(config), Some(name)) => config
            .sink(name)
            .cloned()
            .with_context(|| format!("config has no sink named '{name}'"))?,
        _ => default_sink(args),
    };
    if module.class_name != FILE_IO_CLASS {
        bail!("sink '{}' has class '{}', expected '{FILE_IO_CLASS}'", module.name, module.class_name);
    }
    module.file_name = args.output.to_string_lossy().into_owned();
    Ok(module)
}

fn wait_drained(rx: &Receiver<u32>, mut pending: HashSet<u32>, timeout: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    while !pending.is_empty() {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(id) => {
                if pending.remove(&id) {
                    tracing::debug!(session_id = id, left = pending.len(), "input drained");
                }
            }
            Err(RecvTimeoutError::Timeout) => bail!("{} input(s) did not drain in {timeout:?}", pending.len()),
            Err(RecvTimeoutError::Disconnected) => bail!("engine listener dropped"),
        }
    }
    Ok(())
}

fn load_input(path: &Path, session_id: u32) -> anyhow::Result<(StreamInfo, Arc<WavClient>, f64)> {
    let (samples, spec) = read_wav(path).with_context(|| format!("reading {}", path.display()))?;
    let channels = u32::from(spec.channels);
    let secs = samples.len() as f64 / f64::from(spec.sample_rate) / f64::from(channels.max(1));
    println!(
        "  {}: {} ch, {} Hz, {:.2}s",
        path.display(),
        spec.channels,
        spec.sample_rate,
        secs
    );
    let stream = StreamInfo::play(session_id, channels, spec.sample_rate, SampleFormat::F32Le);
    Ok((stream, Arc::new(WavClient::new(samples)), secs))
}

/// Run the render command.
pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let config = args
        .config
        .as_deref()
        .map(EngineConfig::load)
        .transpose()
        .context("loading engine config")?;
    let settings = config.as_ref().map(|c| c.engine.clone()).unwrap_or_else(EngineSettings::default);
    let sink = resolve_sink(&args, config.as_ref())?;

    let device = Arc::new(DeviceContext::with_builtin(Arc::new(SystemClock)));
    let engine = HpaeManager::new(device, settings);
    let (tx, drained) = crossbeam_channel::unbounded();
    let watcher = Arc::new(DrainWatcher { tx });
    let weak: Weak<dyn StreamStatusListener> = Arc::downgrade(&watcher) as _;
    engine.register_listener(weak);

    let sink_port = engine
        .open_audio_port(&sink)
        .with_context(|| format!("opening sink '{}'", sink.name))?;
    if let Some(config) = &config {
        for module in config.modules().filter(|m| m.name != sink.name) {
            engine
                .open_audio_port(module)
                .with_context(|| format!("opening port '{}'", module.name))?;
        }
    }
    engine.set_default_sink(&sink.name)?;
    tracing::info!(port_id = sink_port, output = %args.output.display(), "rendering");

    println!("Inputs:");
    let mut clients = Vec::with_capacity(args.inputs.len());
    let mut longest = 0.0_f64;
    for (i, path) in args.inputs.iter().enumerate() {
        let session_id = FIRST_SESSION + i as u32;
        let (stream, client, secs) = load_input(path, session_id)?;
        longest = longest.max(secs);
        engine.create_stream(stream)?;
        let callback: Arc<dyn WriteCallback> = client;
        engine.register_write_callback(session_id, Arc::downgrade(&callback))?;
        if let Some(volume) = args.volume {
            engine.set_client_volume(session_id, volume)?;
        }
        clients.push((session_id, callback));
    }

    for &(id, _) in &clients {
        engine.start(StreamClass::Play, id)?;
        engine.drain(StreamClass::Play, id)?;
    }
    let pending: HashSet<u32> = clients.iter().map(|&(id, _)| id).collect();
    let timeout = Duration::from_secs_f64(longest * 2.0 + 5.0);
    wait_drained(&drained, pending, timeout)?;

    for &(id, _) in &clients {
        engine.stop(StreamClass::Play, id)?;
    }
    engine.close_audio_port(sink_port)?;
    drop(clients);

    println!("Wrote {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(len: usize) -> WriteRequest {
        WriteRequest {
            data: vec![0xAA; len],
            need_data: true,
            ..WriteRequest::default()
        }
    }

    #[test]
    fn wav_client_pads_last_frame_then_underruns() {
        let client = WavClient::new(vec![0.5, -0.5, 0.25]);
        let mut req = request(16);
        client.on_write_data(&mut req).unwrap();
        assert_eq!(&req.data[..4], &0.5_f32.to_le_bytes());
        assert_eq!(&req.data[8..12], &0.25_f32.to_le_bytes());
        assert!(req.data[12..].iter().all(|&b| b == 0));

        let mut req = request(16);
        assert!(matches!(client.on_write_data(&mut req), Err(HpaeError::NotEnoughData)));
        assert!(req.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn position_only_requests_keep_data() {
        let client = WavClient::new(vec![1.0; 8]);
        let mut req = request(8);
        req.need_data = false;
        client.on_write_data(&mut req).unwrap();
        assert!(req.data.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn default_sink_is_one_tick() {
        let args = RenderArgs {
            inputs: vec![],
            output: PathBuf::from("out.wav"),
            config: None,
            sink: None,
            rate: 48000,
            channels: 2,
            format: "s16le".into(),
            volume: None,
        };
        let module = resolve_sink(&args, None).unwrap();
        assert_eq!(module.buffer_size, 960 * 2 * 2);
        assert_eq!(module.file_name, "out.wav");
        assert_eq!(module.to_sink_info().unwrap().frame_len, 960);
    }
}
