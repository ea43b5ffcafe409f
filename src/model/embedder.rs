//! Speaker embedders
//!
//! [`OnnxEmbedder`] runs a pretrained speaker model through ONNX Runtime.
//! When no weight candidate loads, [`load_embedder`] falls back to an
//! [`UntrainedEmbedder`]: a deterministic random projection whose scores
//! carry no speaker information and are always reported as unreliable.
//!
//! Pipeline: Audio (f32, 16kHz mono) -> Fbank (80-dim) -> mean norm -> model -> embedding

use super::checkpoint::{CheckpointLayout, RawCheckpoint, WeightSource};
use super::{inference_threads, Device, ModelConfig};
use crate::error::ModelError;
use crate::features::{FbankConfig, FbankExtractor};
use crate::similarity::Embedding;
use ndarray::{Array2, Axis};
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};

/// Produces one embedding per utterance
pub trait Embedder: Send + Sync {
    /// Embed 16 kHz mono samples
    fn embed(&self, samples: &[f32]) -> Result<Embedding, ModelError>;

    /// Length of the produced vectors
    fn embedding_dim(&self) -> usize;

    /// False when the weights are not trained speaker weights
    fn is_reliable(&self) -> bool {
        true
    }
}

/// ONNX Runtime speaker embedding model
pub struct OnnxEmbedder {
    session: std::sync::Mutex<Session>,
    input_name: String,
    fbank_extractor: FbankExtractor,
    embedding_dim: usize,
}

impl OnnxEmbedder {
    /// Build a session from a weight source
    pub fn from_source(
        source: &WeightSource<'_>,
        config: &ModelConfig,
        device: Device,
    ) -> Result<Self, ModelError> {
        let origin = match source {
            WeightSource::File(path) => path.clone(),
            WeightSource::Bytes(_) => PathBuf::from("<in-memory graph>"),
        };
        let load_failed = |reason: String| ModelError::WeightLoadFailed {
            path: origin.clone(),
            reason,
        };

        let mut builder = Session::builder()
            .map_err(|e| ModelError::InitFailed(format!("ONNX session builder failed: {}", e)))?
            .with_intra_threads(inference_threads())
            .map_err(|e| ModelError::InitFailed(format!("Failed to set threads: {}", e)))?;

        if device == Device::Cuda {
            builder = with_cuda(builder)?;
        }

        let session = match source {
            WeightSource::File(path) => {
                if !path.is_file() {
                    return Err(load_failed("referenced graph file does not exist".to_string()));
                }
                builder.commit_from_file(path)
            }
            WeightSource::Bytes(bytes) => builder.commit_from_memory(bytes),
        }
        .map_err(|e| load_failed(e.to_string()))?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .ok_or_else(|| load_failed("model graph has no inputs".to_string()))?;

        tracing::debug!(
            "Speaker model inputs: {:?}, outputs: {:?}",
            session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>()
        );

        Ok(Self {
            session: std::sync::Mutex::new(session),
            input_name,
            fbank_extractor: FbankExtractor::new(FbankConfig::with_num_mels(config.feat_dim())),
            embedding_dim: config.embedding_dim(),
        })
    }
}

#[cfg(feature = "cuda")]
fn with_cuda(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder, ModelError> {
    use ort::execution_providers::CUDAExecutionProvider;

    tracing::info!("Configuring CUDA execution provider");
    builder
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .map_err(|e| ModelError::InitFailed(format!("Failed to enable CUDA: {}", e)))
}

#[cfg(not(feature = "cuda"))]
fn with_cuda(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder, ModelError> {
    Ok(builder)
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, samples: &[f32]) -> Result<Embedding, ModelError> {
        let start = std::time::Instant::now();

        let features = self.fbank_extractor.extract_normalized(samples)?;
        let num_frames = features.nrows();
        let feat_dim = features.ncols();

        let (x_data, _offset) = features.into_raw_vec_and_offset();
        let x_tensor = Tensor::<f32>::from_array(([1usize, num_frames, feat_dim], x_data))
            .map_err(|e| ModelError::InferenceFailed(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self.session.lock().map_err(|e| {
            ModelError::InferenceFailed(format!("Failed to lock session: {}", e))
        })?;

        let inputs: Vec<(std::borrow::Cow<str>, ort::session::SessionInputValue)> = vec![(
            std::borrow::Cow::Borrowed(self.input_name.as_str()),
            x_tensor.into(),
        )];

        let outputs = session
            .run(inputs)
            .map_err(|e| ModelError::InferenceFailed(format!("Speaker model inference failed: {}", e)))?;

        let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            ModelError::InferenceFailed(format!("Failed to extract embedding: {}", e))
        })?;

        if data.len() != self.embedding_dim {
            return Err(ModelError::InferenceFailed(format!(
                "Model produced a {}-dim embedding, expected {}",
                data.len(),
                self.embedding_dim
            )));
        }

        tracing::debug!(
            "Embedded {} frames in {:.3}s",
            num_frames,
            start.elapsed().as_secs_f32()
        );

        Ok(Embedding::new(data.to_vec()))
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

/// Deterministic randomly initialized embedder
///
/// Pools per-dimension feature deviation over time and applies a fixed
/// pseudo-random projection. Identical input always yields an identical
/// vector, but the vectors do not separate speakers.
pub struct UntrainedEmbedder {
    projection: Array2<f32>,
    fbank_extractor: FbankExtractor,
}

impl UntrainedEmbedder {
    pub fn new(config: &ModelConfig) -> Self {
        let feat_dim = config.feat_dim();
        let embedding_dim = config.embedding_dim();
        let mut rng = SplitMix64::new(0x5EED_0000 ^ embedding_dim as u64);
        let scale = 1.0 / (feat_dim as f32).sqrt();
        let projection =
            Array2::from_shape_fn((feat_dim, embedding_dim), |_| rng.next_symmetric() * scale);

        Self {
            projection,
            fbank_extractor: FbankExtractor::new(FbankConfig::with_num_mels(feat_dim)),
        }
    }
}

impl Embedder for UntrainedEmbedder {
    fn embed(&self, samples: &[f32]) -> Result<Embedding, ModelError> {
        let features = self.fbank_extractor.extract_normalized(samples)?;
        // Features are zero-mean after normalization, so pool the deviation
        let pooled = features.std_axis(Axis(0), 0.0);
        let embedding = pooled.dot(&self.projection);
        Ok(Embedding::new(embedding.to_vec()))
    }

    fn embedding_dim(&self) -> usize {
        self.projection.ncols()
    }

    fn is_reliable(&self) -> bool {
        false
    }
}

/// Small deterministic generator for untrained weights
struct SplitMix64(u64);

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform value in [-1, 1)
    fn next_symmetric(&mut self) -> f32 {
        let unit = (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32;
        unit * 2.0 - 1.0
    }
}

/// An embedder plus where its weights came from
pub struct LoadedEmbedder {
    pub embedder: Box<dyn Embedder>,
    /// Weight file and layout that loaded, `None` for the untrained fallback
    pub origin: Option<(PathBuf, CheckpointLayout)>,
}

impl LoadedEmbedder {
    pub fn is_reliable(&self) -> bool {
        self.embedder.is_reliable()
    }
}

/// Load the model described by `config`, falling back to untrained weights
pub fn load_embedder(config: &ModelConfig, device: Device) -> LoadedEmbedder {
    load_embedder_with(config, |source, config| {
        OnnxEmbedder::from_source(source, config, device).map(|e| Box::new(e) as Box<dyn Embedder>)
    })
}

/// Candidate/layout search with a custom session builder
///
/// Each existing candidate is read once and its layouts are tried in
/// priority order. Every failure is logged and the search continues.
pub fn load_embedder_with<F>(config: &ModelConfig, mut build: F) -> LoadedEmbedder
where
    F: FnMut(&WeightSource<'_>, &ModelConfig) -> Result<Box<dyn Embedder>, ModelError>,
{
    let start = std::time::Instant::now();

    for candidate in &config.weight_candidates {
        if !candidate.is_file() {
            tracing::debug!("Weight candidate not found: {:?}", candidate);
            continue;
        }

        let raw = match RawCheckpoint::read(candidate) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            }
        };

        for layout in CheckpointLayout::PRIORITY {
            let Some(source) = layout.extract(&raw) else {
                continue;
            };
            match build(&source, config) {
                Ok(embedder) => {
                    tracing::info!(
                        "Loaded {} weights from {:?} ({} layout) in {:.2}s",
                        config.kind.display_name(),
                        candidate,
                        layout.name(),
                        start.elapsed().as_secs_f32()
                    );
                    return LoadedEmbedder {
                        embedder,
                        origin: Some((candidate.clone(), layout)),
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        "{:?} did not load with the {} layout: {}",
                        candidate,
                        layout.name(),
                        e
                    );
                }
            }
        }
    }

    tracing::warn!(
        "No usable weights for {}; using untrained weights, results are unreliable",
        config.kind.display_name()
    );
    LoadedEmbedder {
        embedder: Box::new(UntrainedEmbedder::new(config)),
        origin: None,
    }
}

/// Load, normalize and embed an audio file
pub fn embed_file(embedder: &dyn Embedder, path: &Path) -> crate::error::Result<Embedding> {
    let samples = crate::audio::load_normalized(path)?;
    Ok(embedder.embed(&samples)?)
}
