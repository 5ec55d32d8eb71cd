//! WAV-file backed devices (`"file_io"` device class).
//!
//! [`FileRenderSink`] stores whatever the pipeline renders, byte-exact, in a
//! WAV container matching the sink format. [`FileCaptureSource`] replays a
//! WAV file as if it were a microphone and captures silence after the end.

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use hound::WavWriter;
use hpae_core::{
    HpaeError, Result, SampleFormat, SinkInfo, SourceInfo, convert_from_float,
};
use parking_lot::Mutex;

use crate::sink::RenderSink;
use crate::source::CaptureSource;
use crate::wav::{WavSpec, read_wav, wav_error};

type Writer = WavWriter<BufWriter<File>>;

/// Render sink writing a WAV file.
#[derive(Default)]
pub struct FileRenderSink {
    writer: Mutex<Option<(Writer, SampleFormat)>>,
    started: AtomicBool,
    frames_written: AtomicU64,
    frame_bytes: AtomicUsize,
    frame_len: AtomicUsize,
}

impl FileRenderSink {
    /// Closed sink; `init` opens the file named by `SinkInfo::file_path`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written since `init`.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }

    fn finalize(&self) {
        if let Some((writer, _)) = self.writer.lock().take()
            && let Err(e) = writer.finalize()
        {
            tracing::error!(error = %e, "wav finalize failed");
        }
    }
}

fn write_bytes(writer: &mut Writer, format: SampleFormat, data: &[u8]) -> Result<()> {
    let size = format.sample_size();
    for chunk in data.chunks_exact(size) {
        let res = match format {
            SampleFormat::U8 => writer.write_sample(i32::from(chunk[0]) - 128),
            SampleFormat::S16Le => writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]])),
            SampleFormat::S24Le => {
                let v = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                writer.write_sample(v)
            }
            SampleFormat::S32Le => {
                writer.write_sample(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            }
            SampleFormat::F32Le => {
                writer.write_sample(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            }
        };
        res.map_err(wav_error)?;
    }
    Ok(())
}

impl RenderSink for FileRenderSink {
    fn init(&self, info: &SinkInfo) -> Result<()> {
        if info.file_path.is_empty() {
            return Err(HpaeError::invalid_param("file sink needs a file path"));
        }
        if self.is_inited() {
            return Ok(());
        }
        let spec = WavSpec::for_format(info.format, info.channels as u16, info.sample_rate);
        let writer = WavWriter::create(&info.file_path, spec.into()).map_err(wav_error)?;
        *self.writer.lock() = Some((writer, info.format));
        self.frame_bytes.store(
            info.frame_len * info.channels as usize * info.format.sample_size(),
            Ordering::SeqCst,
        );
        self.frame_len.store(info.frame_len, Ordering::SeqCst);
        self.frames_written.store(0, Ordering::SeqCst);
        tracing::info!(path = %info.file_path, format = %info.format, "file sink opened");
        Ok(())
    }

    fn is_inited(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn deinit(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.finalize();
    }

    fn start(&self) -> Result<()> {
        if !self.is_inited() {
            return Err(HpaeError::NotInited);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        if let Some((writer, _)) = self.writer.lock().as_mut() {
            writer.flush().map_err(wav_error)?;
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.start()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn render_frame(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock();
        let (writer, format) = guard.as_mut().ok_or(HpaeError::NotInited)?;
        write_bytes(writer, *format, data)?;

        let frame_bytes = self.frame_bytes.load(Ordering::SeqCst).max(1);
        let frame_len = self.frame_len.load(Ordering::SeqCst);
        self.frames_written
            .fetch_add((data.len() / frame_bytes * frame_len) as u64, Ordering::SeqCst);
        Ok(data.len())
    }

    fn presentation_position(&self) -> Result<(u64, u64)> {
        Ok((self.frames_written(), 0))
    }

    fn set_audio_parameter(&self, key: &str, condition: &str, value: &str) {
        tracing::debug!(key, condition, value, "file sink ignores parameter");
    }
}

impl Drop for FileRenderSink {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Capture source replaying a WAV file.
#[derive(Default)]
pub struct FileCaptureSource {
    state: Mutex<Option<Replay>>,
    started: AtomicBool,
}

struct Replay {
    samples: Vec<f32>,
    file_channels: usize,
    channels: usize,
    format: SampleFormat,
    /// Next frame index in the file.
    pos: usize,
    scratch: Vec<f32>,
}

impl FileCaptureSource {
    /// Closed source; `init` loads the file named by `SourceInfo::file_path`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every frame of the file has been captured.
    pub fn is_finished(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_none_or(|r| r.pos * r.file_channels >= r.samples.len())
    }
}

impl CaptureSource for FileCaptureSource {
    fn init(&self, info: &SourceInfo) -> Result<()> {
        if info.file_path.is_empty() {
            return Err(HpaeError::invalid_param("file source needs a file path"));
        }
        let (samples, spec) = read_wav(&info.file_path)?;
        if spec.sample_rate != info.sample_rate {
            tracing::warn!(
                file_rate = spec.sample_rate,
                rate = info.sample_rate,
                "file source replays at the device rate"
            );
        }
        *self.state.lock() = Some(Replay {
            samples,
            file_channels: usize::from(spec.channels.max(1)),
            channels: info.channels.max(1) as usize,
            format: info.format,
            pos: 0,
            scratch: Vec::new(),
        });
        Ok(())
    }

    fn is_inited(&self) -> bool {
        self.state.lock().is_some()
    }

    fn deinit(&self) {
        self.started.store(false, Ordering::SeqCst);
        *self.state.lock() = None;
    }

    fn start(&self) -> Result<()> {
        if !self.is_inited() {
            return Err(HpaeError::NotInited);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn capture_frame(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.state.lock();
        let replay = guard.as_mut().ok_or(HpaeError::NotInited)?;

        let samples = buf.len() / replay.format.sample_size();
        let frames = samples / replay.channels;
        replay.scratch.clear();
        replay.scratch.resize(samples, 0.0);
        for f in 0..frames {
            let src = (replay.pos + f) * replay.file_channels;
            if src >= replay.samples.len() {
                break;
            }
            for c in 0..replay.channels {
                let sc = c % replay.file_channels;
                replay.scratch[f * replay.channels + c] =
                    replay.samples.get(src + sc).copied().unwrap_or(0.0);
            }
        }
        replay.pos += frames;
        convert_from_float(replay.format, &replay.scratch, buf);
        Ok(buf.len())
    }
}
