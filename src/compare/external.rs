//! External-process scoring backend
//!
//! Runs an inference script once per pair:
//!
//! ```text
//! <program> <script> --model_id <upstream id> --wavs <a> <b>
//! ```
//!
//! and reads the score from the first stdout line containing the configured
//! marker phrase. A run that prints no such line fails with the script's
//! stderr attached.

use super::ScoringBackend;
use crate::config::ExternalConfig;
use crate::error::{BackendError, Result};
use crate::model::ModelConfig;
use crate::verdict::ThresholdLadder;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

/// Scores pairs by invoking an inference script
pub struct ExternalBackend {
    program: PathBuf,
    script: PathBuf,
    model_id: String,
    marker: String,
    working_dir: Option<PathBuf>,
    thresholds: ThresholdLadder,
}

impl ExternalBackend {
    /// Resolve the interpreter and prepare the backend
    pub fn new(config: &ExternalConfig, model: &ModelConfig) -> Result<Self> {
        let program = resolve_program(&config.program)?;
        tracing::info!(
            "Using external backend: {:?} {:?} (model {})",
            program,
            config.script,
            model.upstream_id
        );

        Ok(Self {
            program,
            script: config.script.clone(),
            model_id: model.upstream_id.clone(),
            marker: config.marker.clone(),
            working_dir: config.working_dir.clone(),
            thresholds: model.thresholds,
        })
    }

    /// Build the command for one pair
    fn command(&self, a: &Path, b: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.script)
            .arg("--model_id")
            .arg(&self.model_id)
            .arg("--wavs")
            .arg(absolute(a))
            .arg(absolute(b))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Paths are made absolute because the script may run in another directory
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl ScoringBackend for ExternalBackend {
    fn name(&self) -> &str {
        "external"
    }

    fn score_pair(&self, a: &Path, b: &Path) -> Result<f32> {
        for path in [a, b] {
            if !path.is_file() {
                return Err(crate::error::AudioError::SourceNotFound(path.to_path_buf()).into());
            }
        }

        let mut cmd = self.command(a, b);
        tracing::debug!("Running external scorer: {:?}", cmd);

        let start = std::time::Instant::now();
        let output = cmd
            .output()
            .map_err(|e| BackendError::SpawnFailed(format!("{:?}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            tracing::warn!("External scorer exited with {}", output.status);
        }

        let score = extract_score(&stdout, &self.marker).ok_or_else(|| BackendError::ScoreNotFound {
            marker: self.marker.clone(),
            stderr: stderr.trim_end().to_string(),
        })?;

        tracing::debug!(
            "External score {:.4} in {:.2}s",
            score,
            start.elapsed().as_secs_f32()
        );
        Ok(score)
    }

    fn thresholds(&self) -> &ThresholdLadder {
        &self.thresholds
    }
}

fn score_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| match Regex::new(r"-?\d+\.\d+") {
        Ok(re) => re,
        Err(e) => unreachable!("score pattern is valid: {}", e),
    })
}

/// Parse the score from the first marker line that carries a decimal number
///
/// Only the text after the marker is searched, so numbers in log prefixes
/// (timestamps, progress counters) are ignored.
pub fn extract_score(stdout: &str, marker: &str) -> Option<f32> {
    stdout
        .lines()
        .filter_map(|line| line.find(marker).map(|pos| &line[pos + marker.len()..]))
        .find_map(|rest| {
            score_pattern()
                .find(rest)
                .and_then(|m| m.as_str().parse::<f32>().ok())
        })
}

/// Resolve the interpreter: an existing path, or a name looked up in PATH
fn resolve_program(program: &str) -> std::result::Result<PathBuf, BackendError> {
    let path = PathBuf::from(program);
    if path.components().count() > 1 {
        if path.exists() {
            return Ok(path);
        }
        return Err(BackendError::ProgramNotFound(format!(
            "configured path does not exist: {}",
            program
        )));
    }

    which::which(program).map_err(|_| {
        BackendError::ProgramNotFound(format!(
            "'{}' is not in PATH. Install it or set [external] program in the config.",
            program
        ))
    })
}
