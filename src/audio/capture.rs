//! Microphone capture via cpal
//!
//! Works with PipeWire, PulseAudio and ALSA backends. Recording is blocking:
//! the stream runs for the requested duration on the calling thread and the
//! collected samples are returned as 16 kHz mono.

use super::{resample, TARGET_SAMPLE_RATE};
use crate::config::AudioConfig;
use crate::error::AudioError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of fixed-length live recordings
pub trait Recorder {
    /// Record for `duration` and return 16 kHz mono samples
    fn record(&mut self, duration: Duration) -> Result<Vec<f32>, AudioError>;
}

/// cpal-based microphone recorder
pub struct CpalRecorder {
    device: String,
}

impl CpalRecorder {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            device: config.device.clone(),
        }
    }
}

/// Parameters for building an audio input stream
struct StreamBuildParams {
    samples: Arc<Mutex<Vec<f32>>>,
    source_rate: u32,
    source_channels: usize,
}

impl Recorder for CpalRecorder {
    fn record(&mut self, duration: Duration) -> Result<Vec<f32>, AudioError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = if self.device == "default" {
            host.default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()))?
        } else {
            find_audio_device(&host, &self.device)?
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Using audio device: {}", device_name);

        let supported_config = device
            .default_input_config()
            .map_err(|e| AudioError::Connection(e.to_string()))?;

        let source_rate = supported_config.sample_rate().0;
        let source_channels = supported_config.channels() as usize;
        let sample_format = supported_config.sample_format();

        tracing::debug!(
            "Device config: {} Hz, {} channel(s), format: {:?}",
            source_rate,
            source_channels,
            sample_format
        );

        let stream_config = cpal::StreamConfig {
            channels: supported_config.channels(),
            sample_rate: supported_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let samples = Arc::new(Mutex::new(Vec::<f32>::new()));
        let make_params = || StreamBuildParams {
            samples: samples.clone(),
            source_rate,
            source_channels,
        };
        let err_fn = |err| tracing::error!("Audio stream error: {}", err);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, make_params(), err_fn)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, make_params(), err_fn)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, make_params(), err_fn)
            }
            format => {
                return Err(AudioError::CaptureFailed(format!(
                    "Unsupported sample format: {:?}",
                    format
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| AudioError::CaptureFailed(format!("Failed to start stream: {}", e)))?;

        std::thread::sleep(duration);
        drop(stream);

        let collected = samples
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| AudioError::StreamError("sample buffer poisoned".to_string()))?;

        tracing::debug!(
            "Captured {} samples ({:.2}s)",
            collected.len(),
            collected.len() as f32 / TARGET_SAMPLE_RATE as f32
        );

        if collected.is_empty() {
            return Err(AudioError::CaptureFailed(
                "no audio received from the input device".to_string(),
            ));
        }

        Ok(collected)
    }
}

/// Build an input stream for a specific sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    params: StreamBuildParams,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    let StreamBuildParams {
        samples,
        source_rate,
        source_channels,
    } = params;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only, matching file normalization
                let mono: Vec<f32> = data
                    .iter()
                    .step_by(source_channels.max(1))
                    .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                    .collect();

                let resampled = resample(&mono, source_rate, TARGET_SAMPLE_RATE);

                if let Ok(mut guard) = samples.lock() {
                    guard.extend_from_slice(&resampled);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Names of all available input devices
pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Pick the best match for `requested` among device names
///
/// Matching strategy (in order):
/// 1. Exact match (case-sensitive)
/// 2. Exact match (case-insensitive)
/// 3. Substring match (case-insensitive)
pub fn match_device_name<'a>(names: &'a [String], requested: &str) -> Option<&'a str> {
    let search_lower = requested.to_lowercase();

    names
        .iter()
        .find(|n| n.as_str() == requested)
        .or_else(|| names.iter().find(|n| n.to_lowercase() == search_lower))
        .or_else(|| names.iter().find(|n| n.to_lowercase().contains(&search_lower)))
        .map(String::as_str)
}

/// Find an audio input device by name with flexible matching
fn find_audio_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?
        .collect();

    let device_names: Vec<String> = devices.iter().filter_map(|d| d.name().ok()).collect();

    if let Some(matched) = match_device_name(&device_names, device_name) {
        tracing::debug!(
            "Found audio device: {} (searched for: {})",
            matched,
            device_name
        );
        let matched = matched.to_string();
        return devices
            .into_iter()
            .find(|d| d.name().map(|n| n == matched).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(device_name.to_string()));
    }

    // No match found - provide helpful error with available devices
    let available = if device_names.is_empty() {
        "No audio input devices found.".to_string()
    } else {
        format!(
            "Available devices:\n{}",
            device_names
                .iter()
                .map(|n| format!("  - {}", n))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    Err(AudioError::DeviceNotFoundWithList {
        requested: device_name.to_string(),
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec![
            "alsa_input.pci-0000_00_1f.3.analog-stereo".to_string(),
            "USB Mic".to_string(),
            "usb mic".to_string(),
        ]
    }

    #[test]
    fn test_match_exact_first() {
        let names = names();
        assert_eq!(match_device_name(&names, "usb mic"), Some("usb mic"));
        assert_eq!(match_device_name(&names, "USB Mic"), Some("USB Mic"));
    }

    #[test]
    fn test_match_case_insensitive() {
        let names = names();
        assert_eq!(match_device_name(&names, "USB MIC"), Some("USB Mic"));
    }

    #[test]
    fn test_match_substring() {
        let names = names();
        assert_eq!(
            match_device_name(&names, "analog-stereo"),
            Some("alsa_input.pci-0000_00_1f.3.analog-stereo")
        );
        assert_eq!(match_device_name(&names, "bluetooth"), None);
    }
}
