//! Per-session audio archival. Raw 16-bit mono PCM is teed into a
//! session-scoped file while a session is open; ending the session encodes
//! it to MP3 (ffmpeg, then lame) or falls back to WAV.
//!
//! Microphone capture itself lives outside this crate — whatever owns the
//! input stream calls [`AudioRecorder::write_pcm`] with each chunk.

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task;
use tracing::debug;

use crate::session::Recorder;

const DEFAULT_SAMPLE_RATE: u32 = 16000;
const PCM_CHANNELS: u16 = 1;
const PCM_BIT_DEPTH: u16 = 16;

#[derive(Default)]
struct ActiveRecording {
    session_id: String,
    raw_path: PathBuf,
    file: Option<File>,
}

pub struct AudioRecorder {
    audio_dir: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    active: Option<ActiveRecording>,
    sample_rate: u32,
}

impl AudioRecorder {
    pub fn new(audio_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            audio_dir: audio_dir.into(),
            inner: Mutex::new(Inner {
                active: None,
                sample_rate: DEFAULT_SAMPLE_RATE,
            }),
        })
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        if sample_rate > 0 {
            self.lock().sample_rate = sample_rate;
        }
    }

    /// Append raw PCM bytes to the active session's file. A no-op when no
    /// session is open, so the capture path never needs to check.
    pub fn write_pcm(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if let Some(active) = inner.active.as_mut() {
            if let Some(file) = active.file.as_mut() {
                file.write_all(data).context("write raw pcm bytes")?;
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Recorder for AudioRecorder {
    async fn start_session(&self, session_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.audio_dir).context("create audio directory")?;

        let raw_path = self.audio_dir.join(format!("{session_id}.pcm"));
        let file = File::create(&raw_path).context("open raw pcm file")?;

        let mut inner = self.lock();
        // A leftover recording (start racing a crash-recovery path) is
        // dropped; its raw file stays on disk for inspection.
        inner.active = Some(ActiveRecording {
            session_id: session_id.to_string(),
            raw_path,
            file: Some(file),
        });
        Ok(())
    }

    async fn end_session(&self) -> Result<String> {
        let (recording, sample_rate) = {
            let mut inner = self.lock();
            match inner.active.take() {
                Some(active) => (active, inner.sample_rate),
                None => return Ok(String::new()),
            }
        };

        // Closing the file before encoding flushes the final samples.
        drop(recording.file);

        let audio_dir = self.audio_dir.clone();
        let session_id = recording.session_id;
        let raw_path = recording.raw_path;

        task::spawn_blocking(move || {
            let audio_path = encode(&audio_dir, &raw_path, &session_id, sample_rate)?;
            let _ = std::fs::remove_file(&raw_path);
            Ok(audio_path.to_string_lossy().into_owned())
        })
        .await
        .context("audio encode task")?
    }
}

fn encode(
    audio_dir: &Path,
    raw_path: &Path,
    session_id: &str,
    sample_rate: u32,
) -> Result<PathBuf> {
    let mp3_path = audio_dir.join(format!("{session_id}.mp3"));

    if encode_with_ffmpeg(raw_path, &mp3_path, sample_rate).is_ok() {
        return Ok(mp3_path);
    }
    if encode_with_lame(raw_path, &mp3_path, sample_rate).is_ok() {
        return Ok(mp3_path);
    }

    debug!("mp3 encoders unavailable, writing wav");
    let wav_path = audio_dir.join(format!("{session_id}.wav"));
    pcm_to_wav(raw_path, &wav_path, sample_rate).context("encode wav fallback")?;
    Ok(wav_path)
}

fn encode_with_ffmpeg(raw_path: &Path, output: &Path, sample_rate: u32) -> Result<()> {
    run_encoder(
        Command::new("ffmpeg")
            .arg("-y")
            .args(["-f", "s16le"])
            .args(["-ar", &sample_rate.to_string()])
            .args(["-ac", &PCM_CHANNELS.to_string()])
            .arg("-i")
            .arg(raw_path)
            .arg(output),
    )
}

fn encode_with_lame(raw_path: &Path, output: &Path, sample_rate: u32) -> Result<()> {
    let khz = sample_rate as f64 / 1000.0;
    run_encoder(
        Command::new("lame")
            .arg("-r")
            .args(["-s", &format!("{khz}")])
            .args(["--bitwidth", &PCM_BIT_DEPTH.to_string()])
            .args(["-m", "m"])
            .arg(raw_path)
            .arg(output),
    )
}

fn run_encoder(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .context("spawn encoder")?;
    anyhow::ensure!(status.success(), "encoder exited with {status}");
    Ok(())
}

fn pcm_to_wav(raw_path: &Path, wav_path: &Path, sample_rate: u32) -> Result<()> {
    let pcm = std::fs::read(raw_path).context("read raw pcm data")?;

    let spec = hound::WavSpec {
        channels: PCM_CHANNELS,
        sample_rate,
        bits_per_sample: PCM_BIT_DEPTH,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(wav_path, spec).context("create wav writer")?;
    for sample in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .context("write wav sample")?;
    }
    writer.finalize().context("finalize wav")?;
    Ok(())
}
