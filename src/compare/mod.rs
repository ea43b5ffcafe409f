//! Pairwise speaker comparison
//!
//! A [`ScoringBackend`] turns two audio files into a similarity score. The
//! in-process [`NativeBackend`] embeds both files with a loaded model; the
//! [`external::ExternalBackend`] delegates the pair to an inference script.
//! Both classify the score against the same threshold ladder.

pub mod external;

use crate::audio::AudioSource;
use crate::error::{AudioError, Result, SimilarityError};
use crate::model::embedder::embed_file;
use crate::model::{load_embedder, select_device, DevicePreference, LoadedEmbedder, ModelConfig};
use crate::similarity::Embedding;
use crate::verdict::{classify, ThresholdLadder, Verdict};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Outcome of comparing two audio sources
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairComparison {
    pub left: PathBuf,
    pub right: PathBuf,
    pub score: f32,
    pub verdict: Verdict,
    pub reliable: bool,
}

/// One side of a comparison, prepared once and scored against many references
#[derive(Debug, Clone)]
pub struct PreparedSource {
    path: PathBuf,
    label: String,
    embedding: Option<Embedding>,
}

impl PreparedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Cached voice print, when the backend embeds in-process
    pub fn embedding(&self) -> Option<&Embedding> {
        self.embedding.as_ref()
    }
}

/// Scores a pair of audio files
pub trait ScoringBackend {
    /// Short backend name for logs and reports
    fn name(&self) -> &str;

    /// Raw similarity score for two audio files
    fn score_pair(&self, a: &Path, b: &Path) -> Result<f32>;

    /// Ladder the scores are classified against
    fn thresholds(&self) -> &ThresholdLadder;

    /// Whether scores come from trained weights
    fn is_reliable(&self) -> bool {
        true
    }

    /// Validate the query source once before scoring it against many references
    ///
    /// An error here concerns the query itself and must not be skipped like a
    /// failing reference.
    fn prepare_source(&self, source: &AudioSource) -> Result<PreparedSource> {
        let path = source.path();
        if !path.is_file() {
            return Err(AudioError::SourceNotFound(path.to_path_buf()).into());
        }
        Ok(PreparedSource {
            path: path.to_path_buf(),
            label: source.label(),
            embedding: None,
        })
    }

    /// Score a prepared source against one reference file
    fn score_prepared(&self, query: &PreparedSource, reference: &Path) -> Result<f32> {
        self.score_pair(query.path(), reference)
    }

    /// Score and classify a pair
    fn compare_pair(&self, a: &Path, b: &Path) -> Result<PairComparison> {
        let score = self.score_pair(a, b)?;
        let reliable = self.is_reliable();
        let verdict = classify(score, self.thresholds(), reliable);
        tracing::debug!(
            "{} vs {}: {:.4} ({}) via {}",
            a.display(),
            b.display(),
            score,
            verdict,
            self.name()
        );
        Ok(PairComparison {
            left: a.to_path_buf(),
            right: b.to_path_buf(),
            score,
            verdict,
            reliable,
        })
    }
}

/// In-process backend holding one loaded embedding model
pub struct NativeBackend {
    config: ModelConfig,
    model: LoadedEmbedder,
}

impl NativeBackend {
    /// Load the model once for reuse across many comparisons
    pub fn load(config: &ModelConfig, device: DevicePreference) -> Self {
        let device = select_device(device);
        let model = load_embedder(config, device);
        Self::with_model(config.clone(), model)
    }

    /// Wrap an already loaded embedder
    pub fn with_model(config: ModelConfig, model: LoadedEmbedder) -> Self {
        Self { config, model }
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn loaded(&self) -> &LoadedEmbedder {
        &self.model
    }

    /// Embed one audio file
    pub fn embed(&self, path: &Path) -> Result<Embedding> {
        embed_file(self.model.embedder.as_ref(), path)
    }

    /// Embed and reject vectors that cannot be normalized
    pub fn embed_checked(&self, path: &Path) -> Result<Embedding> {
        let embedding = self.embed(path)?;
        let norm = embedding.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err(SimilarityError::DegenerateVector.into());
        }
        Ok(embedding)
    }
}

impl ScoringBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn score_pair(&self, a: &Path, b: &Path) -> Result<f32> {
        let ea = self.embed(a)?;
        let eb = self.embed(b)?;
        Ok(ea.similarity(&eb)?)
    }

    fn prepare_source(&self, source: &AudioSource) -> Result<PreparedSource> {
        let embedding = self.embed_checked(source.path())?;
        Ok(PreparedSource {
            path: source.path().to_path_buf(),
            label: source.label(),
            embedding: Some(embedding),
        })
    }

    fn score_prepared(&self, query: &PreparedSource, reference: &Path) -> Result<f32> {
        match query.embedding() {
            Some(cached) => Ok(cached.similarity(&self.embed(reference)?)?),
            None => self.score_pair(query.path(), reference),
        }
    }

    fn thresholds(&self) -> &ThresholdLadder {
        &self.config.thresholds
    }

    fn is_reliable(&self) -> bool {
        self.model.is_reliable()
    }
}

/// Load the model for `config` and compare two files with it
pub fn compare_pair(
    a: &Path,
    b: &Path,
    config: &ModelConfig,
    device: DevicePreference,
) -> Result<PairComparison> {
    NativeBackend::load(config, device).compare_pair(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModelError, VerifyError};
    use crate::model::embedder::Embedder;
    use crate::model::ModelKind;

    /// Embeds by the mean of the first few samples, so constant files compare by sign
    struct SignEmbedder {
        reliable: bool,
    }

    impl Embedder for SignEmbedder {
        fn embed(&self, samples: &[f32]) -> std::result::Result<Embedding, ModelError> {
            let mean = samples.iter().sum::<f32>() / samples.len() as f32;
            Ok(Embedding::new(vec![mean, 0.1]))
        }

        fn embedding_dim(&self) -> usize {
            2
        }

        fn is_reliable(&self) -> bool {
            self.reliable
        }
    }

    fn backend(reliable: bool) -> NativeBackend {
        NativeBackend::with_model(
            ModelKind::Campplus.builtin(),
            LoadedEmbedder {
                embedder: Box::new(SignEmbedder { reliable }),
                origin: None,
            },
        )
    }

    fn constant_wav(dir: &Path, name: &str, value: i16) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..1600 {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_same_file_is_same_speaker() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8000);
        let result = backend(true).compare_pair(&a, &a).unwrap();
        assert!((result.score - 1.0).abs() < 1e-6);
        assert_eq!(result.verdict, Verdict::SameVeryHigh);
        assert!(result.reliable);
    }

    #[test]
    fn test_comparison_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8000);
        let b = constant_wav(dir.path(), "b.wav", -8000);
        let backend = backend(true);
        let first = backend.compare_pair(&a, &b).unwrap();
        let second = backend.compare_pair(&a, &b).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.verdict, Verdict::DifferentVeryLow);
    }

    #[test]
    fn test_unreliable_model_reports_unreliable() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8000);
        let result = backend(false).compare_pair(&a, &a).unwrap();
        assert_eq!(result.verdict, Verdict::Unreliable);
        assert!(!result.reliable);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8000);
        let err = backend(true)
            .compare_pair(&a, &dir.path().join("missing.wav"))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Audio(_)));
    }

    #[test]
    fn test_prepared_source_keeps_its_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8000);
        let b = constant_wav(dir.path(), "b.wav", 8000);
        let backend = backend(true);

        let prepared = backend
            .prepare_source(&AudioSource::File(a.clone()))
            .unwrap();
        assert_eq!(prepared.label(), "a.wav");
        assert!(prepared.embedding().is_some());

        // Scoring no longer reads the prepared file
        std::fs::remove_file(&a).unwrap();
        let score = backend.score_prepared(&prepared, &b).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = backend(true)
            .prepare_source(&AudioSource::File(dir.path().join("missing.wav")))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Audio(_)));
    }
}
