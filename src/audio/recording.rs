//! Scoped temporary recordings
//!
//! A live capture is written to a uniquely named WAV file so the same
//! file-based comparison path can score it. The file is removed when the
//! [`TempRecording`] is dropped, on success and on every error path.

use super::{rms, TARGET_SAMPLE_RATE};
use crate::error::AudioError;
use std::path::Path;

/// A single-owner WAV file deleted on drop
#[derive(Debug)]
pub struct TempRecording {
    file: tempfile::NamedTempFile,
    duration_secs: f32,
    rms: f32,
}

impl TempRecording {
    /// Write 16 kHz mono samples to a fresh temporary WAV file
    pub fn write(samples: &[f32]) -> Result<Self, AudioError> {
        Self::write_in(samples, &std::env::temp_dir())
    }

    /// Like [`TempRecording::write`], inside a specific directory
    pub fn write_in(samples: &[f32], dir: &Path) -> Result<Self, AudioError> {
        if samples.is_empty() {
            return Err(AudioError::CaptureFailed("no samples captured".to_string()));
        }

        let file = tempfile::Builder::new()
            .prefix("voxverify_")
            .suffix(".wav")
            .tempfile_in(dir)
            .map_err(|e| AudioError::CaptureFailed(format!("Failed to create temp file: {}", e)))?;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: TARGET_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(file.path(), spec).map_err(|e| {
            AudioError::CaptureFailed(format!("Failed to create WAV writer: {}", e))
        })?;

        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let scaled = (clamped * 32767.0) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| AudioError::CaptureFailed(format!("Failed to write sample: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| AudioError::CaptureFailed(format!("Failed to finalize WAV: {}", e)))?;

        let recording = Self {
            file,
            duration_secs: samples.len() as f32 / TARGET_SAMPLE_RATE as f32,
            rms: rms(samples),
        };
        tracing::debug!(
            "Recording saved to {:?} ({:.2}s, rms {:.4})",
            recording.path(),
            recording.duration_secs,
            recording.rms
        );
        Ok(recording)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    pub fn rms(&self) -> f32 {
        self.rms
    }
}

/// Reject recordings whose RMS level is below `threshold`
pub fn check_not_silent(samples: &[f32], threshold: f32) -> Result<f32, AudioError> {
    let level = rms(samples);
    if level < threshold {
        return Err(AudioError::SilentRecording {
            rms: level,
            threshold,
        });
    }
    Ok(level)
}
