//! Kaldi-style Fbank (log-mel filterbank) feature extraction
//!
//! Speaker embedding models consume 80-dim Fbank frames computed from 16 kHz
//! mono audio (25ms frames, 10ms shift, 0.97 pre-emphasis, Povey window, DC
//! offset removal, 20 Hz low cutoff), followed by per-utterance mean
//! normalization: the mean of each feature dimension over time is subtracted.
//!
//! Pipeline: Audio (f32, 16kHz) -> Fbank (frames x 80) -> mean normalization

use crate::error::ModelError;
use ndarray::{Array2, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Default sample rate for Fbank extraction
const DEFAULT_SAMPLE_RATE: usize = 16000;

/// Default FFT size (frame length rounded up to a power of two)
const DEFAULT_FFT_SIZE: usize = 512;

/// Default number of mel filterbank channels
const DEFAULT_NUM_MELS: usize = 80;

/// Default frame length in samples (25ms at 16kHz)
const DEFAULT_FRAME_LENGTH: usize = 400;

/// Default frame shift in samples (10ms at 16kHz)
const DEFAULT_FRAME_SHIFT: usize = 160;

/// Default pre-emphasis coefficient
const DEFAULT_PREEMPH_COEFF: f32 = 0.97;

/// Lowest mel filter edge in Hz
const DEFAULT_LOW_FREQ: f32 = 20.0;

/// Configuration for Fbank feature extraction
#[derive(Debug, Clone)]
pub struct FbankConfig {
    pub sample_rate: usize,
    pub fft_size: usize,
    pub num_mels: usize,
    pub frame_length: usize,
    pub frame_shift: usize,
    pub preemph_coeff: f32,
    pub low_freq: f32,
    pub remove_dc_offset: bool,
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            fft_size: DEFAULT_FFT_SIZE,
            num_mels: DEFAULT_NUM_MELS,
            frame_length: DEFAULT_FRAME_LENGTH,
            frame_shift: DEFAULT_FRAME_SHIFT,
            preemph_coeff: DEFAULT_PREEMPH_COEFF,
            low_freq: DEFAULT_LOW_FREQ,
            remove_dc_offset: true,
        }
    }
}

impl FbankConfig {
    /// Default settings with a custom number of mel bins
    pub fn with_num_mels(num_mels: usize) -> Self {
        Self {
            num_mels,
            ..Self::default()
        }
    }
}

/// Fbank feature extractor with pre-computed mel filterbank and window
pub struct FbankExtractor {
    config: FbankConfig,
    mel_filterbank: Vec<Vec<f32>>,
    window: Vec<f32>,
}

impl FbankExtractor {
    /// Create a new FbankExtractor with the given configuration
    pub fn new(config: FbankConfig) -> Self {
        let mel_filterbank = compute_mel_filterbank(
            config.num_mels,
            config.fft_size,
            config.sample_rate as f32,
            config.low_freq,
        );
        let window = povey_window(config.frame_length);
        Self {
            config,
            mel_filterbank,
            window,
        }
    }

    /// Create a new FbankExtractor with default speaker-model settings
    pub fn new_default() -> Self {
        Self::new(FbankConfig::default())
    }

    /// Number of mel channels in the output
    pub fn num_mels(&self) -> usize {
        self.config.num_mels
    }

    /// Number of frames produced for `num_samples` input samples
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if num_samples >= self.config.frame_length {
            (num_samples - self.config.frame_length) / self.config.frame_shift + 1
        } else {
            0
        }
    }

    /// Extract log-mel filterbank features from audio samples
    ///
    /// Input: f32 samples at the configured sample rate (default 16kHz)
    /// Output: Array2<f32> of shape (num_frames, num_mels)
    pub fn extract(&self, samples: &[f32]) -> Array2<f32> {
        let num_mels = self.config.num_mels;
        let frame_length = self.config.frame_length;
        let frame_shift = self.config.frame_shift;
        let fft_size = self.config.fft_size;
        let preemph = self.config.preemph_coeff;

        let num_frames = self.num_frames(samples.len());
        if num_frames == 0 {
            return Array2::zeros((0, num_mels));
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let num_bins = fft_size / 2 + 1;

        let mut fbank = Array2::zeros((num_frames, num_mels));
        let mut frame = vec![0.0f32; frame_length];
        let mut fft_buf = vec![Complex::new(0.0f32, 0.0); fft_size];

        for frame_idx in 0..num_frames {
            let start = frame_idx * frame_shift;
            frame.copy_from_slice(&samples[start..start + frame_length]);

            if self.config.remove_dc_offset {
                let mean = frame.iter().sum::<f32>() / frame_length as f32;
                frame.iter_mut().for_each(|s| *s -= mean);
            }

            // Per-frame pre-emphasis; the first sample is emphasized against itself
            for i in (1..frame_length).rev() {
                frame[i] -= preemph * frame[i - 1];
            }
            frame[0] -= preemph * frame[0];

            for (i, slot) in fft_buf.iter_mut().enumerate() {
                *slot = if i < frame_length {
                    Complex::new(frame[i] * self.window[i], 0.0)
                } else {
                    Complex::new(0.0, 0.0)
                };
            }

            fft.process(&mut fft_buf);

            let power: Vec<f32> = fft_buf[..num_bins].iter().map(|c| c.norm_sqr()).collect();

            for mel_idx in 0..num_mels {
                let energy: f32 = self.mel_filterbank[mel_idx]
                    .iter()
                    .zip(power.iter())
                    .map(|(&w, &p)| w * p)
                    .sum();
                fbank[[frame_idx, mel_idx]] = energy.max(f32::EPSILON).ln();
            }
        }

        fbank
    }

    /// Fbank followed by mean normalization, rejecting audio shorter than a frame
    pub fn extract_normalized(&self, samples: &[f32]) -> Result<Array2<f32>, ModelError> {
        let mut features = self.extract(samples);
        if features.nrows() == 0 {
            return Err(ModelError::TooShort(samples.len()));
        }
        apply_mean_normalization(&mut features);
        Ok(features)
    }
}

/// Subtract each feature dimension's mean over time
pub fn apply_mean_normalization(features: &mut Array2<f32>) {
    if features.nrows() == 0 {
        return;
    }
    if let Some(mean) = features.mean_axis(Axis(0)) {
        *features -= &mean;
    }
}

/// Hann window raised to the power 0.85
fn povey_window(frame_length: usize) -> Vec<f32> {
    let denom = (frame_length.max(2) - 1) as f32;
    (0..frame_length)
        .map(|n| {
            let phase = 2.0 * std::f32::consts::PI * n as f32 / denom;
            (0.5 - 0.5 * phase.cos()).powf(0.85)
        })
        .collect()
}

/// Compute mel filterbank matrix
///
/// Returns num_mels triangular filters, each with fft_size/2+1 coefficients,
/// spanning `low_freq` to Nyquist. Triangles are built in the mel domain
/// (mel = 1127 * ln(1 + f/700)), as Kaldi does.
pub fn compute_mel_filterbank(
    num_mels: usize,
    fft_size: usize,
    sample_rate: f32,
    low_freq: f32,
) -> Vec<Vec<f32>> {
    let num_bins = fft_size / 2 + 1;
    let nyquist = sample_rate / 2.0;
    let bin_width = sample_rate / fft_size as f32;

    let hz_to_mel = |f: f32| -> f32 { 1127.0 * (1.0 + f / 700.0).ln() };

    let mel_low = hz_to_mel(low_freq.clamp(0.0, nyquist));
    let mel_high = hz_to_mel(nyquist);
    let mel_delta = (mel_high - mel_low) / (num_mels + 1) as f32;

    let mut filterbank = Vec::with_capacity(num_mels);
    for i in 0..num_mels {
        let left = mel_low + i as f32 * mel_delta;
        let center = left + mel_delta;
        let right = center + mel_delta;

        let filter: Vec<f32> = (0..num_bins)
            .map(|j| {
                let mel = hz_to_mel(j as f32 * bin_width);
                if mel > left && mel <= center {
                    (mel - left) / (center - left)
                } else if mel > center && mel < right {
                    (right - mel) / (right - center)
                } else {
                    0.0
                }
            })
            .collect();
        filterbank.push(filter);
    }

    filterbank
}
