//! WAV file reading and writing.
//!
//! Samples are kept interleaved: the engine works on interleaved frames, so
//! unlike a DSP tool there is no mixdown on load.

use std::path::Path;

use hound::{SampleFormat as HoundFormat, WavReader, WavWriter};
use hpae_core::{HpaeError, Result, SampleFormat};

/// WAV file metadata extracted without loading sample data.
#[derive(Debug, Clone)]
pub struct WavInfo {
    /// Number of audio channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth per sample.
    pub bits_per_sample: u16,
    /// Total number of sample frames (samples per channel).
    pub num_frames: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Whether the samples are IEEE float.
    pub is_float: bool,
}

/// WAV file specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    /// Number of audio channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth per sample.
    pub bits_per_sample: u16,
    /// Whether the samples are IEEE float.
    pub is_float: bool,
}

impl Default for WavSpec {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            is_float: false,
        }
    }
}

impl WavSpec {
    /// Spec storing `format` samples losslessly.
    pub fn for_format(format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample: format.bit_width() as u16,
            is_float: format == SampleFormat::F32Le,
        }
    }

    /// Engine wire format matching this spec, if any.
    pub fn sample_format(&self) -> Option<SampleFormat> {
        match (self.bits_per_sample, self.is_float) {
            (8, false) => Some(SampleFormat::U8),
            (16, false) => Some(SampleFormat::S16Le),
            (24, false) => Some(SampleFormat::S24Le),
            (32, false) => Some(SampleFormat::S32Le),
            (32, true) => Some(SampleFormat::F32Le),
            _ => None,
        }
    }
}

impl From<hound::WavSpec> for WavSpec {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            is_float: spec.sample_format == HoundFormat::Float,
        }
    }
}

impl From<WavSpec> for hound::WavSpec {
    fn from(spec: WavSpec) -> Self {
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: if spec.is_float {
                HoundFormat::Float
            } else {
                HoundFormat::Int
            },
        }
    }
}

/// Maps a hound error onto the engine error type.
pub(crate) fn wav_error(err: hound::Error) -> HpaeError {
    match err {
        hound::Error::IoError(e) => HpaeError::Io(e),
        other => HpaeError::device(format!("wav: {other}")),
    }
}

/// Read WAV metadata without loading sample data.
pub fn read_wav_info<P: AsRef<Path>>(path: P) -> Result<WavInfo> {
    let reader = WavReader::open(path).map_err(wav_error)?;
    let spec = reader.spec();
    let num_frames = u64::from(reader.len()) / u64::from(spec.channels.max(1));
    Ok(WavInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        num_frames,
        duration_secs: num_frames as f64 / f64::from(spec.sample_rate.max(1)),
        is_float: spec.sample_format == HoundFormat::Float,
    })
}

/// Read a WAV file as interleaved f32 samples.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, WavSpec)> {
    let reader = WavReader::open(path).map_err(wav_error)?;
    let spec = WavSpec::from(reader.spec());

    let samples = if spec.is_float {
        reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_error)?
    } else {
        let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
        reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| v as f32 / max_val))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_error)?
    };
    Ok((samples, spec))
}

/// Write interleaved f32 samples to a WAV file.
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], spec: WavSpec) -> Result<()> {
    let mut writer = WavWriter::create(path, hound::WavSpec::from(spec)).map_err(wav_error)?;

    if spec.is_float {
        for &sample in samples {
            writer.write_sample(sample).map_err(wav_error)?;
        }
    } else {
        let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
        for &sample in samples {
            let int_sample = (sample * max_val).clamp(-max_val, max_val - 1.0) as i32;
            writer.write_sample(int_sample).map_err(wav_error)?;
        }
    }

    writer.finalize().map_err(wav_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn roundtrip_f32_stereo() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0).sin()).collect();
        let spec = WavSpec::for_format(SampleFormat::F32Le, 2, 48000);

        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &samples, spec).unwrap();

        let (loaded, loaded_spec) = read_wav(file.path()).unwrap();
        assert_eq!(loaded_spec, spec);
        assert_eq!(loaded.len(), samples.len());
        for (a, b) in samples.iter().zip(loaded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn roundtrip_i16_keeps_interleaving() {
        let samples = vec![0.5, -0.5, 0.25, -0.25];
        let spec = WavSpec::for_format(SampleFormat::S16Le, 2, 44100);

        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &samples, spec).unwrap();

        let info = read_wav_info(file.path()).unwrap();
        assert_eq!(info.num_frames, 2);
        assert_eq!(info.channels, 2);

        let (loaded, _) = read_wav(file.path()).unwrap();
        for (a, b) in samples.iter().zip(loaded.iter()) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn spec_maps_to_engine_format() {
        assert_eq!(
            WavSpec::for_format(SampleFormat::S24Le, 1, 16000).sample_format(),
            Some(SampleFormat::S24Le)
        );
        let odd = WavSpec {
            bits_per_sample: 12,
            ..WavSpec::default()
        };
        assert_eq!(odd.sample_format(), None);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_wav("/nonexistent/definitely/missing.wav").unwrap_err();
        assert!(matches!(err, HpaeError::Io(_)));
    }
}
