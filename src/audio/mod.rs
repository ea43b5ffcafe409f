//! Audio sources and normalization
//!
//! Every source is normalized the same way before feature extraction:
//! decoded with hound, reduced to mono by keeping the first channel, and
//! resampled to 16 kHz when the file uses another rate.
//!
//! Live capture lives in [`capture`]; scoped temporary recordings in
//! [`recording`].

pub mod capture;
pub mod recording;

use crate::error::AudioError;
use recording::TempRecording;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Sample rate the embedding models are trained on
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Extensions picked up when scanning a directory for audio
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "m4a", "ogg"];

/// Files at or below this size are treated as empty placeholders
pub const MIN_AUDIO_FILE_BYTES: u64 = 1000;

/// A file on disk or a freshly captured recording
#[derive(Debug)]
pub enum AudioSource {
    File(PathBuf),
    /// Deleted from disk when dropped
    Recorded(TempRecording),
}

impl AudioSource {
    pub fn path(&self) -> &Path {
        match self {
            AudioSource::File(path) => path,
            AudioSource::Recorded(rec) => rec.path(),
        }
    }

    /// Display label: the file name for files, "<recording>" for captures
    pub fn label(&self) -> String {
        match self {
            AudioSource::File(path) => file_label(path),
            AudioSource::Recorded(_) => "<recording>".to_string(),
        }
    }
}

impl From<PathBuf> for AudioSource {
    fn from(path: PathBuf) -> Self {
        AudioSource::File(path)
    }
}

impl From<TempRecording> for AudioSource {
    fn from(rec: TempRecording) -> Self {
        AudioSource::Recorded(rec)
    }
}

/// File name of a path, falling back to the full path
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decoded PCM before normalization
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved samples scaled to [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Basic facts about an audio file
#[derive(Debug, Clone, Serialize)]
pub struct AudioInfo {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Samples per channel
    pub frames: u64,
    pub duration_secs: f64,
    pub byte_size: u64,
}

impl AudioInfo {
    /// Warnings about properties that degrade verification quality
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.duration_secs < 1.0 {
            warnings.push(format!(
                "very short audio ({:.2}s); at least 1s of speech is recommended",
                self.duration_secs
            ));
        }
        if self.duration_secs > 30.0 {
            warnings.push(format!(
                "long audio ({:.1}s); processing will be slower",
                self.duration_secs
            ));
        }
        if self.sample_rate != TARGET_SAMPLE_RATE {
            warnings.push(format!(
                "sample rate is {} Hz; it will be resampled to {} Hz",
                self.sample_rate, TARGET_SAMPLE_RATE
            ));
        }
        warnings
    }
}

fn ensure_exists(path: &Path) -> Result<(), AudioError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AudioError::SourceNotFound(path.to_path_buf()))
    }
}

fn corrupt(path: &Path, reason: impl ToString) -> AudioError {
    AudioError::UnsupportedOrCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Read header information without decoding samples
pub fn probe(path: &Path) -> Result<AudioInfo, AudioError> {
    ensure_exists(path)?;
    let byte_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let reader = hound::WavReader::open(path).map_err(|e| corrupt(path, e))?;
    let spec = reader.spec();
    let frames = reader.duration() as u64;

    Ok(AudioInfo {
        path: path.to_path_buf(),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        frames,
        duration_secs: frames as f64 / spec.sample_rate.max(1) as f64,
        byte_size,
    })
}

/// Decode a WAV file into interleaved f32 samples
pub fn load_audio(path: &Path) -> Result<DecodedAudio, AudioError> {
    ensure_exists(path)?;

    let reader = hound::WavReader::open(path).map_err(|e| corrupt(path, e))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(corrupt(path, "header declares zero channels or sample rate"));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(|e| corrupt(path, e))?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| corrupt(path, e))?,
    };

    if samples.is_empty() {
        return Err(corrupt(path, "no audio samples"));
    }

    tracing::debug!(
        "Loaded {:?}: {} Hz, {} channel(s), {} samples",
        path,
        spec.sample_rate,
        spec.channels,
        samples.len()
    );

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Keep only the first channel of interleaved audio
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(channels as usize).copied().collect()
}

/// Linear interpolation resampling
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples.get(idx).copied().unwrap_or(0.0)
        };

        output.push(sample);
    }

    output
}

/// Load a file as 16 kHz mono samples ready for feature extraction
pub fn load_normalized(path: &Path) -> Result<Vec<f32>, AudioError> {
    let decoded = load_audio(path)?;
    let mono = to_mono(&decoded.samples, decoded.channels);
    if decoded.sample_rate != TARGET_SAMPLE_RATE {
        tracing::debug!(
            "Resampling {:?} from {} Hz to {} Hz",
            path,
            decoded.sample_rate,
            TARGET_SAMPLE_RATE
        );
        Ok(resample(&mono, decoded.sample_rate, TARGET_SAMPLE_RATE))
    } else {
        Ok(mono)
    }
}

/// Root-mean-square level of a sample slice
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Recursively collect audio files under a directory, sorted by path
///
/// Files of [`MIN_AUDIO_FILE_BYTES`] or less are skipped.
pub fn discover_audio_files(dir: &Path) -> Result<Vec<PathBuf>, AudioError> {
    if !dir.is_dir() {
        return Err(AudioError::SourceNotFound(dir.to_path_buf()));
    }

    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot read directory {:?}: {}", current, e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if has_audio_extension(&path) {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if size > MIN_AUDIO_FILE_BYTES {
                    found.push(path);
                } else {
                    tracing::debug!("Skipping {:?}: only {} bytes", path, size);
                }
            }
        }
    }

    found.sort();
    Ok(found)
}
