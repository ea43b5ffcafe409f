//! Speaker embedding models
//!
//! A closed set of supported model variants. Each variant carries its
//! architecture knobs, the candidate weight locations tried in order, the
//! confidence ladder calibrated for it and the upstream model identifier the
//! external backend passes to its inference script.
//!
//! The networks themselves are opaque: weights are ONNX graphs mapping a
//! `[1, frames, feat_dim]` fbank tensor to an `[1, embedding_dim]` vector.

pub mod checkpoint;
pub mod embedder;

pub use crate::verdict::ThresholdLadder;
pub use embedder::{load_embedder, Embedder, LoadedEmbedder, OnnxEmbedder, UntrainedEmbedder};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Supported speaker embedding model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// CAM++ (context-aware masking), 192-dim embeddings
    #[default]
    #[serde(alias = "cam++")]
    Campplus,
    /// ERes2Net base, 512-dim embeddings
    Eres2net,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Campplus, ModelKind::Eres2net];

    /// Short name used on the command line and in config files
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Campplus => "campplus",
            ModelKind::Eres2net => "eres2net",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Campplus => "CAM++",
            ModelKind::Eres2net => "ERes2Net base",
        }
    }

    /// Built-in configuration before any user overrides
    pub fn builtin(&self) -> ModelConfig {
        match self {
            ModelKind::Campplus => ModelConfig {
                kind: *self,
                architecture: Architecture::Campplus {
                    feat_dim: 80,
                    embedding_size: 192,
                },
                weight_candidates: default_candidates(
                    "speech_campplus_sv_zh-cn_16k-common",
                    &["campplus_cn_common.onnx", "pytorch_model.onnx", "configuration.json"],
                ),
                thresholds: ladder([0.75, 0.65, 0.50, 0.35]),
                upstream_id: "iic/speech_campplus_sv_zh-cn_16k-common".to_string(),
            },
            ModelKind::Eres2net => ModelConfig {
                kind: *self,
                architecture: Architecture::Eres2net {
                    feat_dim: 80,
                    embedding_size: 512,
                    m_channels: 32,
                },
                weight_candidates: default_candidates(
                    "speech_eres2net_base_sv_zh-cn_3dspeaker_16k",
                    &["eres2net_base_model.onnx", "configuration.json"],
                ),
                thresholds: ladder([0.70, 0.60, 0.45, 0.30]),
                upstream_id: "iic/speech_eres2net_base_sv_zh-cn_3dspeaker_16k".to_string(),
            },
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "campplus" | "cam++" | "camplus" => Ok(ModelKind::Campplus),
            "eres2net" | "eres2net_base" => Ok(ModelKind::Eres2net),
            other => Err(format!(
                "Unknown model '{}'. Available: campplus, eres2net",
                other
            )),
        }
    }
}

/// Ladder used when a model has no calibrated thresholds of its own
pub const DEFAULT_THRESHOLDS: [f32; 4] = [0.70, 0.60, 0.45, 0.30];

fn ladder(cuts: [f32; 4]) -> ThresholdLadder {
    // Built-in ladders are strictly decreasing constants
    ThresholdLadder::new(cuts).unwrap_or_else(|_| default_ladder())
}

/// The fallback ladder `[0.70, 0.60, 0.45, 0.30]`
pub fn default_ladder() -> ThresholdLadder {
    match ThresholdLadder::new(DEFAULT_THRESHOLDS) {
        Ok(l) => l,
        Err(_) => unreachable!("default thresholds are strictly decreasing"),
    }
}

/// Architecture construction arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "arch", rename_all = "lowercase")]
pub enum Architecture {
    Campplus {
        feat_dim: usize,
        embedding_size: usize,
    },
    Eres2net {
        feat_dim: usize,
        embedding_size: usize,
        m_channels: usize,
    },
}

impl Architecture {
    pub fn feat_dim(&self) -> usize {
        match *self {
            Architecture::Campplus { feat_dim, .. } | Architecture::Eres2net { feat_dim, .. } => {
                feat_dim
            }
        }
    }

    pub fn embedding_size(&self) -> usize {
        match *self {
            Architecture::Campplus { embedding_size, .. }
            | Architecture::Eres2net { embedding_size, .. } => embedding_size,
        }
    }
}

/// Read-only description of a model variant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub architecture: Architecture,
    /// Weight files tried in order; the first that loads wins
    pub weight_candidates: Vec<PathBuf>,
    pub thresholds: ThresholdLadder,
    /// Model identifier understood by the external inference script
    pub upstream_id: String,
}

impl ModelConfig {
    pub fn feat_dim(&self) -> usize {
        self.architecture.feat_dim()
    }

    pub fn embedding_dim(&self) -> usize {
        self.architecture.embedding_size()
    }

    /// First candidate weight file that exists on disk
    pub fn available_weights(&self) -> Option<&Path> {
        self.weight_candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|p| p.is_file())
    }
}

/// Candidate weight paths: the project-local `pretrained/` directory first,
/// then the user's models directory
fn default_candidates(dir: &str, files: &[&str]) -> Vec<PathBuf> {
    let roots = [PathBuf::from("pretrained"), crate::config::Config::models_dir()];
    roots
        .iter()
        .flat_map(|root| files.iter().map(move |f| root.join(dir).join(f)))
        .collect()
}

/// Compute device preference from config or CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA when compiled in and the runtime is present, else CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            other => Err(format!("Unknown device '{}'. Use auto, cpu or cuda", other)),
        }
    }
}

/// Device inference actually runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda => f.write_str("cuda"),
        }
    }
}

static DEVICE: OnceLock<Device> = OnceLock::new();

/// Resolve the compute device once per process
///
/// Later calls return the first resolution regardless of preference.
pub fn select_device(preference: DevicePreference) -> Device {
    *DEVICE.get_or_init(|| {
        let device = match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda | DevicePreference::Auto => {
                if cuda_available() {
                    Device::Cuda
                } else {
                    if preference == DevicePreference::Cuda {
                        tracing::warn!(
                            "CUDA requested but not available (build with --features cuda and install libcudart), using CPU"
                        );
                    }
                    Device::Cpu
                }
            }
        };
        tracing::info!("Inference device: {}", device);
        device
    })
}

#[cfg(feature = "cuda")]
fn cuda_available() -> bool {
    probe_cuda_runtime()
}

#[cfg(not(feature = "cuda"))]
fn cuda_available() -> bool {
    false
}

/// Probe CUDA runtime availability and version compatibility.
///
/// The bundled ONNX Runtime is built against CUDA 12.x and crashes during
/// execution provider setup on any other major version, so a mismatch is
/// treated as "not available".
#[cfg(feature = "cuda")]
fn probe_cuda_runtime() -> bool {
    // Null-terminated library names to try, in order of preference
    let lib_names: &[&[u8]] = &[b"libcudart.so\0", b"libcudart.so.12\0"];

    let mut handle = std::ptr::null_mut();
    for name in lib_names {
        handle = unsafe { libc::dlopen(name.as_ptr() as *const libc::c_char, libc::RTLD_LAZY) };
        if !handle.is_null() {
            break;
        }
    }

    if handle.is_null() {
        tracing::debug!("CUDA runtime library (libcudart.so) not found");
        return false;
    }

    let sym = unsafe {
        libc::dlsym(
            handle,
            b"cudaRuntimeGetVersion\0".as_ptr() as *const libc::c_char,
        )
    };

    if sym.is_null() {
        tracing::warn!("Could not find cudaRuntimeGetVersion in CUDA runtime library");
        unsafe { libc::dlclose(handle) };
        return true;
    }

    // cudaError_t cudaRuntimeGetVersion(int *runtimeVersion), version = major * 1000 + minor * 10
    type CudaRuntimeGetVersion = unsafe extern "C" fn(*mut i32) -> i32;
    let get_version: CudaRuntimeGetVersion = unsafe { std::mem::transmute(sym) };

    let mut version: i32 = 0;
    let result = unsafe { get_version(&mut version) };
    unsafe { libc::dlclose(handle) };

    if result != 0 {
        tracing::warn!("cudaRuntimeGetVersion failed (error code {})", result);
        return true;
    }

    const EXPECTED_CUDA_MAJOR: i32 = 12;
    let major = version / 1000;
    let minor = (version % 1000) / 10;
    tracing::debug!("Detected CUDA runtime version: {}.{}", major, minor);

    if major != EXPECTED_CUDA_MAJOR {
        tracing::error!(
            "CUDA version mismatch: found CUDA {}.{}, but ONNX Runtime requires CUDA {}.x. Using CPU.",
            major,
            minor,
            EXPECTED_CUDA_MAJOR
        );
        return false;
    }

    true
}

/// Number of intra-op threads for inference
pub fn inference_threads() -> usize {
    num_cpus::get_physical().clamp(1, 8)
}
