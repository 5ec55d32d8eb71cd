//! Integration tests for the `hpae` binary.

use std::path::Path;
use std::process::Command;

use hpae_io::{WavSpec, read_wav, read_wav_info, write_wav};
use tempfile::TempDir;

fn hpae_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_hpae"))
}

fn write_tone(path: &Path, channels: u16, sample_rate: u32, secs: f32) {
    let frames = (sample_rate as f32 * secs) as usize;
    let samples: Vec<f32> = (0..frames)
        .flat_map(|i| {
            let v = (i as f32 * 440.0 * std::f32::consts::TAU / sample_rate as f32).sin() * 0.25;
            std::iter::repeat_n(v, channels as usize)
        })
        .collect();
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        is_float: false,
    };
    write_wav(path, &samples, spec).unwrap();
}

// ---------------------------------------------------------------------------
// hpae render
// ---------------------------------------------------------------------------

#[test]
fn render_mixes_inputs_into_file() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.wav");
    let b = dir.path().join("b.wav");
    let out = dir.path().join("out.wav");
    write_tone(&a, 2, 48000, 0.2);
    write_tone(&b, 1, 44100, 0.1);

    let output = hpae_bin()
        .args(["render", "-o"])
        .arg(&out)
        .arg(&a)
        .arg(&b)
        .output()
        .expect("failed to run hpae render");
    assert!(
        output.status.success(),
        "hpae render failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let info = read_wav_info(&out).unwrap();
    assert_eq!(info.channels, 2);
    assert_eq!(info.sample_rate, 48000);
    // At least the longest input made it out.
    assert!(info.num_frames >= 9600, "only {} frames", info.num_frames);

    let (samples, _) = read_wav(&out).unwrap();
    assert!(samples.iter().any(|s| s.abs() > 0.1));
}

#[test]
fn render_rejects_missing_input() {
    let dir = TempDir::new().unwrap();
    let output = hpae_bin()
        .args(["render", "-o"])
        .arg(dir.path().join("out.wav"))
        .arg(dir.path().join("absent.wav"))
        .output()
        .expect("failed to run hpae render");
    assert!(!output.status.success());
}

// ---------------------------------------------------------------------------
// hpae config
// ---------------------------------------------------------------------------

#[test]
fn config_prints_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(
        &path,
        r#"
        [[sink]]
        name = "Speaker"
        class_name = "primary"
        rate = 48000
        channels = 2
        buffer_size = 3840
        "#,
    )
    .unwrap();

    let output = hpae_bin().arg("config").arg(&path).arg("--json").output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["sinks"][0]["name"], "Speaker");
    assert_eq!(value["sinks"][0]["frame_len"], 960);
}

#[test]
fn config_rejects_bad_module() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[[sink]]\nname = \"x\"\nrate = 0\nchannels = 2\nbuffer_size = 10\n").unwrap();

    let output = hpae_bin().arg("config").arg(&path).output().unwrap();
    assert!(!output.status.success());
}

// ---------------------------------------------------------------------------
// hpae info
// ---------------------------------------------------------------------------

#[test]
fn info_shows_engine_format() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 1, 16000, 0.05);

    let output = hpae_bin().arg("info").arg(&path).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("s16le"));
    assert!(stdout.contains("16000 Hz"));
}
