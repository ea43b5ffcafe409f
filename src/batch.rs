//! Batch similarity matrix
//!
//! Embeds every source once with a single loaded model, scores all pairs,
//! and reports the pairs scoring above the ladder's acceptance threshold.
//! Sources that fail to load or embed are skipped and reported; the batch
//! only fails when fewer than two embeddings succeed.

use crate::audio::file_label;
use crate::compare::NativeBackend;
use crate::error::{Result, SimilarityError, VerifyError};
use crate::model::ModelKind;
use crate::similarity::Embedding;
use crate::verdict::ThresholdLadder;
use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Square symmetric similarity table with an exact 1.0 diagonal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatrix {
    labels: Vec<String>,
    /// Row-major `n x n` scores
    values: Vec<f32>,
}

impl SimilarityMatrix {
    /// Build from embeddings: upper triangle computed, lower mirrored
    pub fn from_embeddings(
        labels: Vec<String>,
        embeddings: &[Embedding],
    ) -> std::result::Result<Self, SimilarityError> {
        let n = embeddings.len();
        debug_assert_eq!(labels.len(), n);

        let mut values = vec![0.0f32; n * n];
        for i in 0..n {
            values[i * n + i] = 1.0;
            for j in (i + 1)..n {
                let score = embeddings[i].similarity(&embeddings[j])?;
                values[i * n + j] = score;
                values[j * n + i] = score;
            }
        }

        Ok(Self { labels, values })
    }

    /// Build from labels and a row-major table
    pub fn from_rows(labels: Vec<String>, rows: Vec<Vec<f32>>) -> std::result::Result<Self, String> {
        let n = labels.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(format!("expected a {}x{} table", n, n));
        }
        Ok(Self {
            labels,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.values[i * self.len() + j]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        let n = self.len();
        &self.values[i * n..(i + 1) * n]
    }

    /// Pairs `i < j` scoring strictly above `threshold`, best first
    pub fn pairs_above(&self, threshold: f32) -> Vec<HighPair> {
        let n = self.len();
        let mut pairs: Vec<HighPair> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .filter(|&(i, j)| self.get(i, j) > threshold)
            .map(|(i, j)| HighPair {
                first: self.labels[i].clone(),
                second: self.labels[j].clone(),
                score: self.get(i, j),
            })
            .collect();
        pairs.sort_by(|a, b| b.score.total_cmp(&a.score));
        pairs
    }

    /// Write as CSV: `File,<labels...>` header, one row per source, 4 decimals
    pub fn write_csv<W: Write>(&self, writer: W) -> std::result::Result<(), csv::Error> {
        let mut wtr = WriterBuilder::new().from_writer(writer);

        let mut header = Vec::with_capacity(self.len() + 1);
        header.push("File".to_string());
        header.extend(self.labels.iter().cloned());
        wtr.write_record(&header)?;

        for (i, label) in self.labels.iter().enumerate() {
            let mut record = Vec::with_capacity(self.len() + 1);
            record.push(label.clone());
            record.extend(self.row(i).iter().map(|v| format!("{:.4}", v)));
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Parse a table previously written by [`SimilarityMatrix::write_csv`]
    pub fn read_csv<R: Read>(reader: R) -> std::result::Result<Self, String> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| format!("Failed to read CSV header: {}", e))?
            .clone();
        let labels: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut rows = Vec::with_capacity(labels.len());
        for (idx, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| format!("Failed to read CSV record: {}", e))?;
            let row = record
                .iter()
                .skip(1)
                .map(|cell| {
                    cell.trim()
                        .parse::<f32>()
                        .map_err(|e| format!("row {}: invalid score '{}': {}", idx + 1, cell, e))
                })
                .collect::<std::result::Result<Vec<f32>, String>>()?;
            rows.push(row);
        }

        Self::from_rows(labels, rows)
    }

    /// Fixed-width console table; long names are truncated
    pub fn render(&self) -> String {
        const NAME_WIDTH: usize = 14;
        const CELL_WIDTH: usize = 9;

        let truncate = |s: &str, width: usize| -> String {
            if s.chars().count() > width {
                let mut t: String = s.chars().take(width - 1).collect();
                t.push('~');
                t
            } else {
                s.to_string()
            }
        };

        let mut out = String::new();
        out.push_str(&format!("{:<width$}", "", width = NAME_WIDTH));
        for label in &self.labels {
            out.push_str(&format!(
                "{:>width$}",
                truncate(label, CELL_WIDTH - 1),
                width = CELL_WIDTH
            ));
        }
        out.push('\n');

        for (i, label) in self.labels.iter().enumerate() {
            out.push_str(&format!(
                "{:<width$}",
                truncate(label, NAME_WIDTH - 1),
                width = NAME_WIDTH
            ));
            for v in self.row(i) {
                out.push_str(&format!("{:>width$.4}", v, width = CELL_WIDTH));
            }
            out.push('\n');
        }
        out
    }
}

/// A pair scoring above the acceptance threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighPair {
    pub first: String,
    pub second: String,
    pub score: f32,
}

/// A source excluded from the matrix
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything a batch run produces
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub model: ModelKind,
    pub thresholds: ThresholdLadder,
    pub reliable: bool,
    pub matrix: SimilarityMatrix,
    pub high_pairs: Vec<HighPair>,
    pub skipped: Vec<SkippedSource>,
}

/// Embed every source once and build the similarity matrix
pub fn compare_batch(sources: &[PathBuf], backend: &NativeBackend) -> Result<BatchResult> {
    let config = backend.model_config();
    let start = std::time::Instant::now();

    let mut embedded: Vec<(PathBuf, Embedding)> = Vec::with_capacity(sources.len());
    let mut skipped = Vec::new();

    for (idx, path) in sources.iter().enumerate() {
        tracing::info!("[{}/{}] Embedding {}", idx + 1, sources.len(), path.display());
        match backend.embed_checked(path) {
            Ok(embedding) => embedded.push((path.clone(), embedding)),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                skipped.push(SkippedSource {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if embedded.len() < 2 {
        return Err(VerifyError::InsufficientSamples {
            succeeded: embedded.len(),
        });
    }

    let paths: Vec<&Path> = embedded.iter().map(|(p, _)| p.as_path()).collect();
    let labels = unique_labels(&paths);
    let embeddings: Vec<Embedding> = embedded.into_iter().map(|(_, e)| e).collect();

    let matrix = SimilarityMatrix::from_embeddings(labels, &embeddings)?;
    let high_pairs = matrix.pairs_above(config.thresholds.acceptance());

    tracing::info!(
        "Compared {} sources ({} skipped) in {:.2}s, {} high-similarity pair(s)",
        matrix.len(),
        skipped.len(),
        start.elapsed().as_secs_f32(),
        high_pairs.len()
    );

    Ok(BatchResult {
        model: config.kind,
        thresholds: config.thresholds,
        reliable: backend.loaded().is_reliable(),
        matrix,
        high_pairs,
        skipped,
    })
}

/// File names as labels, falling back to full paths where names collide
pub fn unique_labels(paths: &[&Path]) -> Vec<String> {
    let names: Vec<String> = paths.iter().map(|p| file_label(p)).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *counts.entry(name.as_str()).or_default() += 1;
    }

    names
        .iter()
        .zip(paths)
        .map(|(name, path)| {
            if counts[name.as_str()] > 1 {
                path.display().to_string()
            } else {
                name.clone()
            }
        })
        .collect()
}

/// Default export file name, e.g. `similarity_matrix_campplus_20240131_154500.csv`
pub fn default_export_name<Tz: chrono::TimeZone>(model: ModelKind, now: &chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "similarity_matrix_{}_{}.csv",
        model.name(),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Write the matrix as CSV to `path`
pub fn export_csv(matrix: &SimilarityMatrix, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| VerifyError::Export(format!("Failed to create {}: {}", path.display(), e)))?;
    matrix
        .write_csv(file)
        .map_err(|e| VerifyError::Export(format!("Failed to write {}: {}", path.display(), e)))?;
    tracing::info!("Similarity matrix exported to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn xyz_matrix() -> SimilarityMatrix {
        SimilarityMatrix::from_rows(
            vec!["X".into(), "Y".into(), "Z".into()],
            vec![
                vec![1.0, 0.9, 0.2],
                vec![0.9, 1.0, 0.15],
                vec![0.2, 0.15, 1.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_three_source_high_pairs() {
        let matrix = xyz_matrix();
        let pairs = matrix.pairs_above(0.65);
        assert_eq!(
            pairs,
            vec![HighPair {
                first: "X".into(),
                second: "Y".into(),
                score: 0.9
            }]
        );
    }

    #[test]
    fn test_from_embeddings_symmetric_with_exact_diagonal() {
        let embeddings = vec![
            Embedding::new(vec![1.0, 0.1, 0.0]),
            Embedding::new(vec![0.9, 0.3, 0.1]),
            Embedding::new(vec![-0.2, 1.0, 0.5]),
        ];
        let labels = vec!["a".into(), "b".into(), "c".into()];
        let matrix = SimilarityMatrix::from_embeddings(labels, &embeddings).unwrap();

        for i in 0..3 {
            assert_eq!(matrix.get(i, i), 1.0);
            for j in 0..3 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
                assert!((-1.0..=1.0).contains(&matrix.get(i, j)));
            }
        }
        assert!(matrix.get(0, 1) > matrix.get(0, 2));
    }

    #[test]
    fn test_pairs_sorted_descending() {
        let matrix = SimilarityMatrix::from_rows(
            vec!["a".into(), "b".into(), "c".into()],
            vec![
                vec![1.0, 0.7, 0.95],
                vec![0.7, 1.0, 0.8],
                vec![0.95, 0.8, 1.0],
            ],
        )
        .unwrap();
        let scores: Vec<f32> = matrix.pairs_above(0.6).iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![0.95, 0.8, 0.7]);
        // Strictly above: a pair exactly at the threshold is excluded
        assert_eq!(matrix.pairs_above(0.7).len(), 2);
    }

    #[test]
    fn test_csv_round_trip() {
        let matrix = SimilarityMatrix::from_rows(
            vec!["spk one.wav".into(), "b,c.wav".into()],
            vec![vec![1.0, 0.123_456], vec![0.123_456, 1.0]],
        )
        .unwrap();

        let mut buf = Vec::new();
        matrix.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("File,spk one.wav,\"b,c.wav\"\n"));
        assert!(text.contains("0.1235"));

        let parsed = SimilarityMatrix::read_csv(buf.as_slice()).unwrap();
        assert_eq!(parsed.labels(), matrix.labels());
        assert_eq!(parsed.get(0, 1), 0.1235);
        assert_eq!(parsed.get(1, 1), 1.0);
    }

    #[test]
    fn test_read_csv_rejects_ragged_table() {
        let text = "File,a,b\na,1.0000,0.5000\nb,0.5000\n";
        assert!(SimilarityMatrix::read_csv(text.as_bytes()).is_err());
    }

    #[test]
    fn test_unique_labels() {
        let a = PathBuf::from("data/spk1/take.wav");
        let b = PathBuf::from("data/spk2/take.wav");
        let c = PathBuf::from("data/other.wav");
        let labels = unique_labels(&[&a, &b, &c]);
        assert_eq!(labels[2], "other.wav");
        assert_eq!(labels[0], a.display().to_string());
        assert_eq!(labels[1], b.display().to_string());
    }

    #[test]
    fn test_default_export_name() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 31, 15, 45, 0).unwrap();
        assert_eq!(
            default_export_name(ModelKind::Eres2net, &now),
            "similarity_matrix_eres2net_20240131_154500.csv"
        );
    }

    #[test]
    fn test_render_contains_labels_and_scores() {
        let rendered = xyz_matrix().render();
        assert_eq!(rendered.lines().count(), 4);
        assert!(rendered.contains("0.9000"));
        assert!(rendered.lines().nth(3).unwrap().starts_with('Z'));
    }

    /// Embeds as the mean level of the file, zero for silence
    struct LevelEmbedder;

    impl crate::model::embedder::Embedder for LevelEmbedder {
        fn embed(&self, samples: &[f32]) -> std::result::Result<Embedding, crate::error::ModelError> {
            let mean = samples.iter().sum::<f32>() / samples.len().max(1) as f32;
            Ok(Embedding::new(vec![mean, mean.abs()]))
        }

        fn embedding_dim(&self) -> usize {
            2
        }
    }

    fn level_backend() -> NativeBackend {
        NativeBackend::with_model(
            ModelKind::Campplus.builtin(),
            crate::model::LoadedEmbedder {
                embedder: Box::new(LevelEmbedder),
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
    fn test_single_source_is_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        let only = constant_wav(dir.path(), "only.wav", 4000);
        let err = compare_batch(&[only], &level_backend()).unwrap_err();
        assert!(matches!(err, VerifyError::InsufficientSamples { succeeded: 1 }));

        let err = compare_batch(&[], &level_backend()).unwrap_err();
        assert!(matches!(err, VerifyError::InsufficientSamples { succeeded: 0 }));
    }

    #[test]
    fn test_degenerate_embedding_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            constant_wav(dir.path(), "a.wav", 4000),
            constant_wav(dir.path(), "silent.wav", 0),
            constant_wav(dir.path(), "b.wav", 8000),
        ];
        let result = compare_batch(&sources, &level_backend()).unwrap();
        assert_eq!(result.matrix.labels(), ["a.wav", "b.wav"]);
        assert_eq!(result.skipped.len(), 1);
        assert!(result.skipped[0].reason.contains("zero norm"));
    }
}
