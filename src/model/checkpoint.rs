//! Raw checkpoints and their layouts
//!
//! A weight candidate on disk is either a serialized ONNX graph or a JSON
//! manifest (ModelScope `configuration.json` style) that points at the graph.
//! Manifests wrap the pointer under a `model` or `state_dict` key. Layouts are
//! tried in fixed priority order: `model`-wrapped, `state_dict`-wrapped, then
//! direct. Extraction is pure; building a session from the result is the
//! embedder's job.

use crate::error::ModelError;
use std::path::{Path, PathBuf};

/// Bytes read from a weight candidate, classified by content
#[derive(Debug, Clone)]
pub enum RawCheckpoint {
    /// A serialized model graph
    Graph(Vec<u8>),
    /// A JSON manifest and the directory it was read from
    Manifest {
        dir: PathBuf,
        value: serde_json::Value,
    },
}

impl RawCheckpoint {
    /// Read and classify a checkpoint file
    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path).map_err(|e| ModelError::WeightLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if bytes.is_empty() {
            return Err(ModelError::WeightLoadFailed {
                path: path.to_path_buf(),
                reason: "file is empty".to_string(),
            });
        }

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::classify(bytes, dir))
    }

    /// Treat bytes as a manifest when they parse as a JSON object
    pub fn classify(bytes: Vec<u8>, dir: PathBuf) -> Self {
        let looks_like_json = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|&b| b == b'{');

        if looks_like_json {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                if value.is_object() {
                    return RawCheckpoint::Manifest { dir, value };
                }
            }
        }
        RawCheckpoint::Graph(bytes)
    }
}

/// Where the model graph for a layout lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource<'a> {
    File(PathBuf),
    Bytes(&'a [u8]),
}

/// Checkpoint layout variants in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    /// Manifest with the graph pointer under `model`
    ModelWrapped,
    /// Manifest with the graph pointer under `state_dict`
    StateDictWrapped,
    /// The checkpoint is the graph itself
    Direct,
}

impl CheckpointLayout {
    pub const PRIORITY: [CheckpointLayout; 3] = [
        CheckpointLayout::ModelWrapped,
        CheckpointLayout::StateDictWrapped,
        CheckpointLayout::Direct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CheckpointLayout::ModelWrapped => "model",
            CheckpointLayout::StateDictWrapped => "state_dict",
            CheckpointLayout::Direct => "direct",
        }
    }

    /// Extract the weight source for this layout, if the checkpoint has one
    pub fn extract<'a>(&self, raw: &'a RawCheckpoint) -> Option<WeightSource<'a>> {
        match (self, raw) {
            (CheckpointLayout::Direct, RawCheckpoint::Graph(bytes)) => {
                Some(WeightSource::Bytes(bytes))
            }
            (CheckpointLayout::Direct, RawCheckpoint::Manifest { .. }) => None,
            (_, RawCheckpoint::Graph(_)) => None,
            (layout, RawCheckpoint::Manifest { dir, value }) => {
                let key = layout.name();
                value
                    .get(key)
                    .and_then(pointer_path)
                    .map(|p| WeightSource::File(resolve_relative(dir, &p)))
            }
        }
    }
}

/// A pointer is a path string, or an object naming the file
fn pointer_path(value: &serde_json::Value) -> Option<PathBuf> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(PathBuf::from(s)),
        serde_json::Value::Object(map) => ["pretrained_model", "file", "path"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .map(PathBuf::from),
        _ => None,
    }
}

fn resolve_relative(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}
