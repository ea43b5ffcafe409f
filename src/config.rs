//! Configuration loading and types for voxverify
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxverify/config.toml)
//! 3. Environment variables (VOXVERIFY_*)
//! 4. CLI arguments (highest priority)

use crate::audio::TARGET_SAMPLE_RATE;
use crate::error::VerifyError;
use crate::model::{DevicePreference, ModelConfig, ModelKind, ThresholdLadder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Voxverify Configuration
#
# Location: ~/.config/voxverify/config.toml
# All settings can be overridden via CLI flags

# Speaker embedding model: "campplus" (192-dim) or "eres2net" (512-dim)
model = "campplus"

# Scoring backend:
# - native: run the ONNX embedding model in-process
# - external: delegate each pair to an external inference script
backend = "native"

# Inference device: "auto", "cpu" or "cuda" (cuda requires the cuda build feature)
device = "auto"

[audio]
# Microphone used for live identification ("default" uses system default)
# List devices with: voxverify devices
device = "default"

# Sample rate all audio is normalized to before feature extraction.
# The speaker models are trained on 16 kHz audio; other values are rejected.
sample_rate = 16000

# Recordings with RMS energy below this are rejected as silent
silence_threshold = 0.001

[identify]
# Live recording length in seconds (clamped to 2-30)
duration_secs = 3

# Maximum reference files scored per speaker
max_references = 2

[external]
# Interpreter and script used by the external backend
program = "python"
script = "speakerlab/bin/infer_sv.py"

# Phrase marking the stdout line that carries the score
marker = "The similarity score"

# Working directory for the script (omit for the current directory)
# working_dir = "/path/to/3D-Speaker"

# Per-model overrides. Weight files are tried in order; thresholds must be
# four strictly decreasing values.
#
# [models.campplus]
# weights = ["/path/to/campplus_cn_common.onnx"]
# thresholds = [0.75, 0.65, 0.50, 0.35]
#
# [models.eres2net]
# weights = ["/path/to/eres2net_base_model.onnx"]
# thresholds = [0.70, 0.60, 0.45, 0.30]

# Reference recordings per speaker for live identification.
# Files that do not exist are skipped.
[gallery]
Daniel = [
    "data/daniel_2/record_out (11).wav",
    "data/daniel_2/audio_01.wav",
    "data/daniel_2/record_out.wav",
]
Hablante_1 = [
    "data/hablante_1/hablante_1_02.wav",
    "data/hablante_1/hablante_1_01.wav",
    "data/hablante_1/hablante_1_03.wav",
]

# Command phrases each identified speaker may run.
# Speakers not listed here have no permissions.
[permissions]
Hablante_1 = [
    "abrir bloc de notas",
    "abrir notepad",
    "abrir editor",
    "abrir navegador",
    "abrir chrome",
    "abrir explorador",
    "abrir archivos",
    "abrir calculadora",
    "abrir buscador",
]
Daniel = ["abrir calculadora", "abrir buscador"]
"#;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Speaker embedding model variant
    #[serde(default)]
    pub model: ModelKind,

    /// Which scoring backend compares audio pairs
    #[serde(default)]
    pub backend: BackendKind,

    /// Inference device preference
    #[serde(default)]
    pub device: DevicePreference,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub identify: IdentifyConfig,

    #[serde(default)]
    pub external: ExternalConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    /// Speaker label -> ordered reference files
    #[serde(default = "default_gallery")]
    pub gallery: BTreeMap<String, Vec<PathBuf>>,

    /// Speaker label -> permitted command phrases
    #[serde(default = "default_permissions")]
    pub permissions: BTreeMap<String, Vec<String>>,
}

/// Scoring backend selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process ONNX embedding model
    #[default]
    Native,
    /// External inference script, one process per pair
    External,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" | "onnx" => Ok(BackendKind::Native),
            "external" | "script" => Ok(BackendKind::External),
            other => Err(format!("Unknown backend '{}'. Use native or external", other)),
        }
    }
}

/// Audio input configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Input device name, or "default"
    #[serde(default = "default_device")]
    pub device: String,

    /// Target sample rate in Hz; only 16000 is accepted
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// RMS level under which a recording counts as silent
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            silence_threshold: default_silence_threshold(),
        }
    }
}

/// Live identification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentifyConfig {
    /// Recording length in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,

    /// References scored per speaker
    #[serde(default = "default_max_references")]
    pub max_references: usize,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            max_references: default_max_references(),
        }
    }
}

/// External inference script configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExternalConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_script")]
    pub script: PathBuf,

    /// Phrase identifying the score line in the script's stdout
    #[serde(default = "default_marker")]
    pub marker: String,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: default_script(),
            marker: default_marker(),
            working_dir: None,
        }
    }
}

/// Per-model override tables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub campplus: ModelOverrides,

    #[serde(default)]
    pub eres2net: ModelOverrides,
}

/// User overrides applied on top of a model's built-in configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelOverrides {
    /// Replaces the built-in weight candidates when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<PathBuf>>,

    /// Replaces the built-in threshold ladder when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<ThresholdLadder>,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    TARGET_SAMPLE_RATE
}

fn default_silence_threshold() -> f32 {
    0.001
}

fn default_duration_secs() -> u32 {
    3
}

fn default_max_references() -> usize {
    2
}

fn default_program() -> String {
    "python".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("speakerlab/bin/infer_sv.py")
}

fn default_marker() -> String {
    "The similarity score".to_string()
}

fn default_gallery() -> BTreeMap<String, Vec<PathBuf>> {
    let mut gallery = BTreeMap::new();
    gallery.insert(
        "Daniel".to_string(),
        vec![
            PathBuf::from("data/daniel_2/record_out (11).wav"),
            PathBuf::from("data/daniel_2/audio_01.wav"),
            PathBuf::from("data/daniel_2/record_out.wav"),
        ],
    );
    gallery.insert(
        "Hablante_1".to_string(),
        vec![
            PathBuf::from("data/hablante_1/hablante_1_02.wav"),
            PathBuf::from("data/hablante_1/hablante_1_01.wav"),
            PathBuf::from("data/hablante_1/hablante_1_03.wav"),
        ],
    );
    gallery
}

fn default_permissions() -> BTreeMap<String, Vec<String>> {
    let phrases = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let mut permissions = BTreeMap::new();
    permissions.insert(
        "Hablante_1".to_string(),
        phrases(&[
            "abrir bloc de notas",
            "abrir notepad",
            "abrir editor",
            "abrir navegador",
            "abrir chrome",
            "abrir explorador",
            "abrir archivos",
            "abrir calculadora",
            "abrir buscador",
        ]),
    );
    permissions.insert(
        "Daniel".to_string(),
        phrases(&["abrir calculadora", "abrir buscador"]),
    );
    permissions
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            backend: BackendKind::default(),
            device: DevicePreference::default(),
            audio: AudioConfig::default(),
            identify: IdentifyConfig::default(),
            external: ExternalConfig::default(),
            models: ModelsConfig::default(),
            gallery: default_gallery(),
            permissions: default_permissions(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxverify")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxverify")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the data directory path (for models)
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "voxverify")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the models directory path
    pub fn models_dir() -> PathBuf {
        Self::data_dir().join("models")
    }

    /// Overrides for a specific model kind
    pub fn overrides(&self, kind: ModelKind) -> &ModelOverrides {
        match kind {
            ModelKind::Campplus => &self.models.campplus,
            ModelKind::Eres2net => &self.models.eres2net,
        }
    }

    /// Resolve the effective configuration for a model kind
    pub fn model_config(&self, kind: ModelKind) -> ModelConfig {
        let mut config = kind.builtin();
        let overrides = self.overrides(kind);
        if let Some(ref weights) = overrides.weights {
            config.weight_candidates = weights.clone();
        }
        if let Some(thresholds) = overrides.thresholds {
            config.thresholds = thresholds;
        }
        config
    }

    /// Model configuration for the selected model
    pub fn active_model(&self) -> ModelConfig {
        self.model_config(self.model)
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, VerifyError> {
    // Start with defaults
    let mut config = Config::default();

    // Determine config file path
    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    // Load from file if it exists
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| VerifyError::Config(format!("Failed to read config: {}", e)))?;

            config = parse_config(&contents)?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

/// Parse TOML config text
pub fn parse_config(contents: &str) -> Result<Config, VerifyError> {
    let config: Config = toml::from_str(contents)
        .map_err(|e| VerifyError::Config(format!("Invalid config: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

/// Reject settings the pipeline cannot honor
fn validate(config: &Config) -> Result<(), VerifyError> {
    if config.audio.sample_rate != TARGET_SAMPLE_RATE {
        return Err(VerifyError::Config(format!(
            "[audio] sample_rate = {} is not supported; the speaker models require {} Hz",
            config.audio.sample_rate, TARGET_SAMPLE_RATE
        )));
    }
    Ok(())
}

/// Apply VOXVERIFY_* environment overrides using the given lookup
fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), VerifyError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(model) = lookup("VOXVERIFY_MODEL") {
        config.model = model.parse().map_err(VerifyError::Config)?;
    }
    if let Some(device) = lookup("VOXVERIFY_DEVICE") {
        config.device = device.parse().map_err(VerifyError::Config)?;
    }
    if let Some(backend) = lookup("VOXVERIFY_BACKEND") {
        config.backend = backend.parse().map_err(VerifyError::Config)?;
    }
    Ok(())
}

/// Write the commented default config, refusing to overwrite an existing file
pub fn write_default_config(path: &Path) -> Result<(), VerifyError> {
    if path.exists() {
        return Err(VerifyError::Config(format!(
            "Config file already exists at {:?}. Remove it first to regenerate.",
            path
        )));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| VerifyError::Config(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| VerifyError::Config(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model, ModelKind::Campplus);
        assert_eq!(config.backend, BackendKind::Native);
        assert_eq!(config.device, DevicePreference::Auto);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.identify.max_references, 2);
        assert_eq!(config.external.marker, "The similarity score");
        assert_eq!(config.gallery.len(), 2);
        assert_eq!(config.permissions["Daniel"].len(), 2);
    }

    #[test]
    fn test_unsupported_sample_rate_is_rejected() {
        let err = parse_config("[audio]\nsample_rate = 44100\n").unwrap_err();
        assert!(matches!(err, VerifyError::Config(ref msg) if msg.contains("44100")));
        assert!(parse_config("[audio]\nsample_rate = 16000\n").is_ok());
    }

    #[test]
    fn test_default_config_text_matches_defaults() {
        let parsed = parse_config(DEFAULT_CONFIG).unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.model, defaults.model);
        assert_eq!(parsed.identify.duration_secs, defaults.identify.duration_secs);
        assert_eq!(parsed.gallery, defaults.gallery);
        assert_eq!(parsed.permissions, defaults.permissions);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
            model = "eres2net"
            backend = "external"

            [identify]
            duration_secs = 8

            [models.eres2net]
            weights = ["/opt/models/eres2net.onnx"]
            thresholds = [0.9, 0.8, 0.5, 0.2]
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.model, ModelKind::Eres2net);
        assert_eq!(config.backend, BackendKind::External);
        assert_eq!(config.identify.duration_secs, 8);
        assert_eq!(config.identify.max_references, 2); // default
        assert_eq!(config.audio.device, "default");

        let model = config.active_model();
        assert_eq!(
            model.weight_candidates,
            vec![PathBuf::from("/opt/models/eres2net.onnx")]
        );
        assert_eq!(model.thresholds.cuts(), [0.9, 0.8, 0.5, 0.2]);
        assert_eq!(model.embedding_dim(), 512);
    }

    #[test]
    fn test_rejects_non_decreasing_thresholds() {
        let toml_str = r#"
            [models.campplus]
            thresholds = [0.5, 0.6, 0.7, 0.8]
        "#;
        assert!(matches!(parse_config(toml_str), Err(VerifyError::Config(_))));
    }

    #[test]
    fn test_custom_gallery_replaces_default() {
        let toml_str = r#"
            [gallery]
            Alice = ["refs/alice.wav"]
        "#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.gallery.len(), 1);
        assert_eq!(config.gallery["Alice"], vec![PathBuf::from("refs/alice.wav")]);
        // Permissions untouched
        assert!(config.permissions.contains_key("Hablante_1"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "VOXVERIFY_MODEL" => Some("eres2net".to_string()),
            "VOXVERIFY_DEVICE" => Some("cpu".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.model, ModelKind::Eres2net);
        assert_eq!(config.device, DevicePreference::Cpu);
        assert_eq!(config.backend, BackendKind::Native);

        let err = apply_env_overrides(&mut config, |key| {
            (key == "VOXVERIFY_BACKEND").then(|| "carrier-pigeon".to_string())
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.identify.duration_secs, 3);
    }

    #[test]
    fn test_write_default_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxverify").join("config.toml");
        write_default_config(&path).unwrap();
        assert!(path.exists());
        assert!(write_default_config(&path).is_err());
    }
}
