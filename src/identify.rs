//! Live speaker identification
//!
//! One microphone capture is scored against every speaker in a reference
//! gallery. Each speaker's score is the mean over up to N references; the
//! best mean wins if it exceeds the ladder's acceptance threshold (`t1`),
//! otherwise the speaker is unknown.
//!
//! ```text
//!   Idle ──▶ Recording ──▶ Scoring ──▶ Decided
//!     │          │            │           ▲
//!     └──────────┴────────────┴─ error ───┘
//! ```

use crate::audio::capture::Recorder;
use crate::audio::recording::{check_not_silent, TempRecording};
use crate::audio::AudioSource;
use crate::compare::{PreparedSource, ScoringBackend};
use crate::error::{Result, VerifyError};
use crate::verdict::{classify, Verdict};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Shortest allowed live recording
pub const MIN_DURATION_SECS: u32 = 2;

/// Longest allowed live recording
pub const MAX_DURATION_SECS: u32 = 30;

/// Clamp a requested recording length to the allowed range
pub fn clamp_duration(secs: u32) -> u32 {
    secs.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS)
}

/// Speaker label -> ordered reference files
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferenceGallery {
    speakers: BTreeMap<String, Vec<PathBuf>>,
}

/// How many of a speaker's configured references exist on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakerAvailability {
    pub speaker: String,
    pub configured: usize,
    pub existing: usize,
}

impl ReferenceGallery {
    pub fn new(speakers: BTreeMap<String, Vec<PathBuf>>) -> Self {
        Self { speakers }
    }

    pub fn speakers(&self) -> impl Iterator<Item = (&str, &[PathBuf])> {
        self.speakers.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// A copy keeping only references that exist, dropping empty speakers
    pub fn available(&self) -> ReferenceGallery {
        let speakers = self
            .speakers
            .iter()
            .filter_map(|(name, refs)| {
                let existing: Vec<PathBuf> = refs.iter().filter(|p| p.is_file()).cloned().collect();
                (!existing.is_empty()).then(|| (name.clone(), existing))
            })
            .collect();
        ReferenceGallery { speakers }
    }

    /// True when no speaker has any reference
    pub fn is_empty(&self) -> bool {
        self.speakers.values().all(Vec::is_empty)
    }

    pub fn availability(&self) -> Vec<SpeakerAvailability> {
        self.speakers
            .iter()
            .map(|(name, refs)| SpeakerAvailability {
                speaker: name.clone(),
                configured: refs.len(),
                existing: refs.iter().filter(|p| p.is_file()).count(),
            })
            .collect()
    }

    fn log_availability(&self) {
        for a in self.availability() {
            tracing::info!(
                "Gallery: {} has {}/{} reference file(s) available",
                a.speaker,
                a.existing,
                a.configured
            );
        }
    }
}

impl From<BTreeMap<String, Vec<PathBuf>>> for ReferenceGallery {
    fn from(speakers: BTreeMap<String, Vec<PathBuf>>) -> Self {
        Self::new(speakers)
    }
}

/// Protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifyState {
    Idle,
    Recording,
    Scoring,
    Decided,
}

impl fmt::Display for IdentifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifyState::Idle => write!(f, "idle"),
            IdentifyState::Recording => write!(f, "recording"),
            IdentifyState::Scoring => write!(f, "scoring"),
            IdentifyState::Decided => write!(f, "decided"),
        }
    }
}

/// Scores for one gallery speaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub speaker: String,
    pub scores: Vec<f32>,
    pub mean: f32,
    pub max: f32,
}

impl CandidateScore {
    fn from_scores(speaker: String, scores: Vec<f32>) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Some(Self {
            speaker,
            scores,
            mean,
            max,
        })
    }
}

/// Who was identified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "speaker", rename_all = "lowercase")]
pub enum Decision {
    Speaker(String),
    Unknown,
}

impl Decision {
    pub fn speaker(&self) -> Option<&str> {
        match self {
            Decision::Speaker(name) => Some(name),
            Decision::Unknown => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Speaker(name) => f.write_str(name),
            Decision::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Ranked outcome of one identification run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentificationResult {
    pub decision: Decision,
    /// Candidates by mean score, best first
    pub ranking: Vec<CandidateScore>,
    /// Confidence band of the best mean, absent when nothing could be scored
    pub verdict: Option<Verdict>,
    pub threshold: f32,
    pub recording_secs: f32,
}

impl IdentificationResult {
    pub fn best(&self) -> Option<&CandidateScore> {
        self.ranking.first()
    }
}

/// Tunables for a live run
#[derive(Debug, Clone)]
pub struct IdentifyOptions {
    pub duration_secs: u32,
    pub max_references: usize,
    pub silence_threshold: f32,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            duration_secs: 3,
            max_references: 2,
            silence_threshold: 0.001,
        }
    }
}

impl From<&crate::config::Config> for IdentifyOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            duration_secs: config.identify.duration_secs,
            max_references: config.identify.max_references,
            silence_threshold: config.audio.silence_threshold,
        }
    }
}

/// Drives one capture through the identification protocol
pub struct LiveIdentifier<'a> {
    recorder: &'a mut dyn Recorder,
    backend: &'a dyn ScoringBackend,
    gallery: &'a ReferenceGallery,
    options: IdentifyOptions,
    state: IdentifyState,
    observer: Option<Box<dyn FnMut(IdentifyState, Duration) + 'a>>,
}

impl<'a> LiveIdentifier<'a> {
    pub fn new(
        recorder: &'a mut dyn Recorder,
        backend: &'a dyn ScoringBackend,
        gallery: &'a ReferenceGallery,
        options: IdentifyOptions,
    ) -> Self {
        Self {
            recorder,
            backend,
            gallery,
            options,
            state: IdentifyState::Idle,
            observer: None,
        }
    }

    /// Called on every state change with the recording duration
    pub fn with_observer(mut self, observer: impl FnMut(IdentifyState, Duration) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> IdentifyState {
        self.state
    }

    fn transition(&mut self, next: IdentifyState, duration: Duration) {
        tracing::debug!("Identification: {} -> {}", self.state, next);
        self.state = next;
        if let Some(ref mut observer) = self.observer {
            observer(next, duration);
        }
    }

    /// Record, score against the gallery and decide
    ///
    /// Every path ends in `Decided`; failures of the recording itself are
    /// returned as errors, failing references are skipped.
    pub fn run(&mut self) -> Result<IdentificationResult> {
        let secs = clamp_duration(self.options.duration_secs);
        if secs != self.options.duration_secs {
            tracing::warn!(
                "Recording duration {}s clamped to {}s",
                self.options.duration_secs,
                secs
            );
        }
        let duration = Duration::from_secs(secs as u64);

        let available = self.gallery.available();
        if available.is_empty() {
            self.gallery.log_availability();
            self.transition(IdentifyState::Decided, duration);
            return Err(VerifyError::NoReferencesAvailable);
        }

        self.transition(IdentifyState::Recording, duration);
        let captured = self
            .recorder
            .record(duration)
            .and_then(|samples| {
                check_not_silent(&samples, self.options.silence_threshold)?;
                TempRecording::write(&samples)
            });
        let recording = match captured {
            Ok(rec) => rec,
            Err(e) => {
                self.gallery.log_availability();
                self.transition(IdentifyState::Decided, duration);
                return Err(e.into());
            }
        };
        let recording_secs = recording.duration_secs();
        let source = AudioSource::from(recording);

        self.transition(IdentifyState::Scoring, duration);
        let query = match self.backend.prepare_source(&source) {
            Ok(query) => query,
            Err(e) => {
                tracing::warn!("Recording could not be scored: {}", e);
                self.transition(IdentifyState::Decided, duration);
                return Err(e);
            }
        };
        let ranking = self.score_gallery(&available, &query);
        drop(source);

        let threshold = self.backend.thresholds().acceptance();
        let (decision, verdict) = match ranking.first() {
            Some(best) => {
                let decision = if best.mean > threshold {
                    Decision::Speaker(best.speaker.clone())
                } else {
                    Decision::Unknown
                };
                (decision, Some(classify(best.mean, self.backend.thresholds(), true)))
            }
            None => {
                tracing::warn!("No reference could be scored against the recording");
                (Decision::Unknown, None)
            }
        };

        self.transition(IdentifyState::Decided, duration);
        tracing::info!(
            "Identified: {} (best mean {}, threshold {:.2})",
            decision,
            ranking
                .first()
                .map(|c| format!("{:.3}", c.mean))
                .unwrap_or_else(|| "n/a".to_string()),
            threshold
        );

        Ok(IdentificationResult {
            decision,
            ranking,
            verdict,
            threshold,
            recording_secs,
        })
    }

    fn score_gallery(
        &self,
        gallery: &ReferenceGallery,
        query: &PreparedSource,
    ) -> Vec<CandidateScore> {
        let mut ranking: Vec<CandidateScore> = gallery
            .speakers()
            .filter_map(|(speaker, refs)| {
                let scores: Vec<f32> = refs
                    .iter()
                    .take(self.options.max_references.max(1))
                    .filter_map(|reference| match self.backend.score_prepared(query, reference) {
                        Ok(score) => {
                            tracing::debug!("{} / {}: {:.3}", speaker, reference.display(), score);
                            Some(score)
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Skipping reference {} for {}: {}",
                                reference.display(),
                                speaker,
                                e
                            );
                            None
                        }
                    })
                    .collect();
                CandidateScore::from_scores(speaker.to_string(), scores)
            })
            .collect();

        ranking.sort_by(|a, b| b.mean.total_cmp(&a.mean));
        ranking
    }
}

/// Run the identification protocol once
pub fn identify_live(
    recorder: &mut dyn Recorder,
    backend: &dyn ScoringBackend,
    gallery: &ReferenceGallery,
    options: IdentifyOptions,
) -> Result<IdentificationResult> {
    LiveIdentifier::new(recorder, backend, gallery, options).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use crate::verdict::ThresholdLadder;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::Path;

    struct ToneRecorder {
        amplitude: f32,
        requested: Vec<Duration>,
    }

    impl Recorder for ToneRecorder {
        fn record(&mut self, duration: Duration) -> std::result::Result<Vec<f32>, AudioError> {
            self.requested.push(duration);
            Ok((0..1600)
                .map(|i| self.amplitude * (i as f32 * 0.05).sin())
                .collect())
        }
    }

    struct FailingRecorder;

    impl Recorder for FailingRecorder {
        fn record(&mut self, _duration: Duration) -> std::result::Result<Vec<f32>, AudioError> {
            Err(AudioError::CaptureFailed("device busy".to_string()))
        }
    }

    /// Scores by reference file name; records the recording paths it saw
    struct TableBackend {
        scores: HashMap<String, f32>,
        ladder: ThresholdLadder,
        seen: RefCell<Vec<PathBuf>>,
    }

    impl ScoringBackend for TableBackend {
        fn name(&self) -> &str {
            "table"
        }

        fn score_pair(&self, a: &Path, b: &Path) -> Result<f32> {
            assert!(a.exists(), "recording must exist while scoring");
            self.seen.borrow_mut().push(a.to_path_buf());
            let name = crate::audio::file_label(b);
            self.scores
                .get(&name)
                .copied()
                .ok_or_else(|| AudioError::SourceNotFound(b.to_path_buf()).into())
        }

        fn thresholds(&self) -> &ThresholdLadder {
            &self.ladder
        }
    }

    fn gallery_in(dir: &Path, speakers: &[(&str, &[&str])]) -> ReferenceGallery {
        let mut map = BTreeMap::new();
        for (speaker, files) in speakers {
            let paths = files
                .iter()
                .map(|f| {
                    let p = dir.join(f);
                    if !f.starts_with("missing") {
                        std::fs::write(&p, b"ref").unwrap();
                    }
                    p
                })
                .collect();
            map.insert(speaker.to_string(), paths);
        }
        ReferenceGallery::new(map)
    }

    fn backend(scores: &[(&str, f32)]) -> TableBackend {
        TableBackend {
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ladder: ThresholdLadder::new([0.70, 0.60, 0.45, 0.30]).unwrap(),
            seen: RefCell::new(Vec::new()),
        }
    }

    fn recorder() -> ToneRecorder {
        ToneRecorder {
            amplitude: 0.3,
            requested: Vec::new(),
        }
    }

    #[test]
    fn test_identifies_best_speaker() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(
            dir.path(),
            &[("Daniel", &["d1.wav", "d2.wav"]), ("Hablante_1", &["h1.wav", "h2.wav"])],
        );
        let backend = backend(&[("d1.wav", 0.85), ("d2.wav", 0.75), ("h1.wav", 0.25), ("h2.wav", 0.15)]);
        let mut rec = recorder();

        let result = identify_live(&mut rec, &backend, &gallery, IdentifyOptions::default()).unwrap();
        assert_eq!(result.decision, Decision::Speaker("Daniel".to_string()));
        assert_eq!(result.ranking.len(), 2);
        assert!((result.ranking[0].mean - 0.80).abs() < 1e-6);
        assert!((result.ranking[0].max - 0.85).abs() < 1e-6);
        assert!((result.ranking[1].mean - 0.20).abs() < 1e-6);
        assert_eq!(result.threshold, 0.60);
        assert_eq!(result.verdict, Some(Verdict::SameVeryHigh));
    }

    #[test]
    fn test_low_scores_are_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(
            dir.path(),
            &[("Daniel", &["d1.wav", "d2.wav"]), ("Hablante_1", &["h1.wav", "h2.wav"])],
        );
        let backend = backend(&[("d1.wav", 0.4), ("d2.wav", 0.4), ("h1.wav", 0.4), ("h2.wav", 0.4)]);
        let result =
            identify_live(&mut recorder(), &backend, &gallery, IdentifyOptions::default()).unwrap();
        assert_eq!(result.decision, Decision::Unknown);
        assert_eq!(result.verdict, Some(Verdict::LikelyDifferentLow));
    }

    #[test]
    fn test_mean_at_threshold_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(dir.path(), &[("Daniel", &["d1.wav"])]);
        let backend = backend(&[("d1.wav", 0.60)]);
        let result =
            identify_live(&mut recorder(), &backend, &gallery, IdentifyOptions::default()).unwrap();
        assert_eq!(result.decision, Decision::Unknown);
    }

    #[test]
    fn test_recording_deleted_after_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(dir.path(), &[("Daniel", &["d1.wav"])]);
        let backend = backend(&[("d1.wav", 0.9)]);
        identify_live(&mut recorder(), &backend, &gallery, IdentifyOptions::default()).unwrap();

        let seen = backend.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
    }

    #[test]
    fn test_uses_at_most_max_references_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(
            dir.path(),
            &[("Daniel", &["missing.wav", "d1.wav", "d2.wav", "d3.wav"])],
        );
        let backend = backend(&[("d1.wav", 0.9), ("d2.wav", 0.7), ("d3.wav", 0.1)]);
        let result =
            identify_live(&mut recorder(), &backend, &gallery, IdentifyOptions::default()).unwrap();
        assert_eq!(result.ranking[0].scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_failed_references_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(
            dir.path(),
            &[("Daniel", &["d1.wav", "bad.wav"]), ("Hablante_1", &["bad2.wav"])],
        );
        let backend = backend(&[("d1.wav", 0.7)]);
        let result =
            identify_live(&mut recorder(), &backend, &gallery, IdentifyOptions::default()).unwrap();
        assert_eq!(result.ranking.len(), 1);
        assert_eq!(result.ranking[0].scores, vec![0.7]);
        assert_eq!(result.decision, Decision::Speaker("Daniel".to_string()));
    }

    #[test]
    fn test_empty_gallery_aborts_before_recording() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(dir.path(), &[("Daniel", &["missing1.wav", "missing2.wav"])]);
        let backend = backend(&[]);
        let mut rec = recorder();

        let mut identifier =
            LiveIdentifier::new(&mut rec, &backend, &gallery, IdentifyOptions::default());
        let err = identifier.run().unwrap_err();
        assert!(matches!(err, VerifyError::NoReferencesAvailable));
        assert_eq!(identifier.state(), IdentifyState::Decided);
        drop(identifier);
        assert!(rec.requested.is_empty());
    }

    #[test]
    fn test_capture_failure_and_silence() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(dir.path(), &[("Daniel", &["d1.wav"])]);
        let backend = backend(&[("d1.wav", 0.9)]);

        let mut failing = FailingRecorder;
        let mut identifier =
            LiveIdentifier::new(&mut failing, &backend, &gallery, IdentifyOptions::default());
        let err = identifier.run().unwrap_err();
        assert!(matches!(err, VerifyError::Audio(AudioError::CaptureFailed(_))));
        assert_eq!(identifier.state(), IdentifyState::Decided);

        let mut silent = ToneRecorder {
            amplitude: 0.0,
            requested: Vec::new(),
        };
        let mut identifier =
            LiveIdentifier::new(&mut silent, &backend, &gallery, IdentifyOptions::default());
        let err = identifier.run().unwrap_err();
        assert!(matches!(err, VerifyError::Audio(AudioError::SilentRecording { .. })));
        assert_eq!(identifier.state(), IdentifyState::Decided);
        assert!(backend.seen.borrow().is_empty());
    }

    /// Counts forward passes; fails on clips shorter than `min_len`
    struct CountingEmbedder {
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        min_len: usize,
    }

    impl crate::model::Embedder for CountingEmbedder {
        fn embed(
            &self,
            samples: &[f32],
        ) -> std::result::Result<crate::similarity::Embedding, crate::error::ModelError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if samples.len() < self.min_len {
                return Err(crate::error::ModelError::TooShort(samples.len()));
            }
            Ok(crate::similarity::Embedding::new(vec![1.0, 0.5]))
        }

        fn embedding_dim(&self) -> usize {
            2
        }
    }

    fn native_backend(
        min_len: usize,
    ) -> (
        crate::compare::NativeBackend,
        std::sync::Arc<std::sync::atomic::AtomicUsize>,
    ) {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let backend = crate::compare::NativeBackend::with_model(
            crate::model::ModelKind::Campplus.builtin(),
            crate::model::LoadedEmbedder {
                embedder: Box::new(CountingEmbedder {
                    calls: calls.clone(),
                    min_len,
                }),
                origin: None,
            },
        );
        (backend, calls)
    }

    fn wav_gallery(dir: &Path, speakers: &[(&str, &[&str])]) -> ReferenceGallery {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut map = BTreeMap::new();
        for (speaker, files) in speakers {
            let paths = files
                .iter()
                .map(|f| {
                    let path = dir.join(f);
                    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
                    for i in 0..16000 {
                        writer.write_sample(((i % 50) as i16 - 25) * 400).unwrap();
                    }
                    writer.finalize().unwrap();
                    path
                })
                .collect();
            map.insert(speaker.to_string(), paths);
        }
        ReferenceGallery::new(map)
    }

    #[test]
    fn test_unembeddable_recording_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = wav_gallery(dir.path(), &[("Daniel", &["d1.wav", "d2.wav"])]);
        // The recorder yields 1600 samples, the references 16000
        let (backend, calls) = native_backend(8000);

        let mut rec = recorder();
        let mut identifier =
            LiveIdentifier::new(&mut rec, &backend, &gallery, IdentifyOptions::default());
        let err = identifier.run().unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Model(crate::error::ModelError::TooShort(1600))
        ));
        assert_eq!(identifier.state(), IdentifyState::Decided);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recording_is_embedded_once() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = wav_gallery(
            dir.path(),
            &[("Daniel", &["d1.wav", "d2.wav"]), ("Hablante_1", &["h1.wav", "h2.wav"])],
        );
        let (backend, calls) = native_backend(0);

        let result =
            identify_live(&mut recorder(), &backend, &gallery, IdentifyOptions::default()).unwrap();
        assert_eq!(result.ranking.len(), 2);
        // One pass for the recording plus one per reference
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[test]
    fn test_duration_is_clamped_and_states_progress() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = gallery_in(dir.path(), &[("Daniel", &["d1.wav"])]);
        let backend = backend(&[("d1.wav", 0.9)]);
        let mut rec = recorder();
        let states = RefCell::new(Vec::new());

        let options = IdentifyOptions {
            duration_secs: 90,
            ..IdentifyOptions::default()
        };
        let mut identifier = LiveIdentifier::new(&mut rec, &backend, &gallery, options)
            .with_observer(|state, _| states.borrow_mut().push(state));
        assert_eq!(identifier.state(), IdentifyState::Idle);
        identifier.run().unwrap();
        assert_eq!(identifier.state(), IdentifyState::Decided);
        drop(identifier);

        assert_eq!(rec.requested, vec![Duration::from_secs(30)]);
        assert_eq!(
            states.into_inner(),
            vec![
                IdentifyState::Recording,
                IdentifyState::Scoring,
                IdentifyState::Decided
            ]
        );
        assert_eq!(clamp_duration(0), 2);
    }
}
