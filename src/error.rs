//! Error types for voxverify
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the voxverify library
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Similarity error: {0}")]
    Similarity(#[from] SimilarityError),

    #[error("Scoring backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Need at least 2 embedded audio sources, only {succeeded} succeeded")]
    InsufficientSamples { succeeded: usize },

    #[error("No reference audio available for any speaker in the gallery.\n  Add reference files under [gallery] in the config file.")]
    NoReferencesAvailable,

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to audio sources and capture
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Unsupported or corrupt audio '{path}': {reason}")]
    UnsupportedOrCorrupt { path: PathBuf, reason: String },

    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio device not found: '{0}'. List devices with: voxverify devices")]
    DeviceNotFound(String),

    #[error("Audio device not found: '{requested}'\n{available}")]
    DeviceNotFoundWithList { requested: String, available: String },

    #[error("Audio capture failed: {0}")]
    CaptureFailed(String),

    #[error("Recording is silent (RMS {rms:.5} below threshold {threshold:.5}). Check your microphone.")]
    SilentRecording { rms: f32, threshold: f32 },

    #[error("Audio stream error: {0}")]
    StreamError(String),
}

/// Errors related to speaker embedding models
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load weights from {path}: {reason}")]
    WeightLoadFailed { path: PathBuf, reason: String },

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding inference failed: {0}")]
    InferenceFailed(String),

    #[error("Audio too short for feature extraction ({0} samples)")]
    TooShort(usize),
}

/// Errors raised by the cosine similarity engine
#[derive(Error, Debug, PartialEq)]
pub enum SimilarityError {
    #[error("Embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Embedding has zero norm or non-finite values; cannot normalize")]
    DegenerateVector,
}

/// Errors raised by the external-process scoring backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Scoring program not found: {0}")]
    ProgramNotFound(String),

    #[error("Failed to run scoring program: {0}")]
    SpawnFailed(String),

    #[error("No line containing '{marker}' with a score in the backend output.\n  stderr:\n{stderr}")]
    ScoreNotFound { marker: String, stderr: String },
}

/// Result type alias using VerifyError
pub type Result<T> = std::result::Result<T, VerifyError>;
