//! Voxverify: speaker verification workbench
//!
//! This library provides the core functionality for:
//! - Loading audio (hound) and normalizing it to 16 kHz mono
//! - Extracting 80-dim log-mel filterbank features
//! - Running a speaker embedding model (CAM++ or ERes2Net, ONNX Runtime)
//! - Scoring voice prints by cosine similarity against a threshold ladder
//! - Building similarity matrices over many recordings
//! - Identifying a live microphone speaker against a reference gallery
//!
//! # Architecture
//!
//! ```text
//!          ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//!          │ compare_pair │   │compare_batch │   │    identify_live     │
//!          └──────────────┘   └──────────────┘   │ (Recorder + gallery) │
//!                  │                  │          └──────────────────────┘
//!                  ▼                  │                     │
//!          ┌─────────────────────┐    │                     │
//!          │   ScoringBackend    │◀───┼─────────────────────┘
//!          │ native | external   │    │
//!          └─────────────────────┘    │
//!                  │                  ▼
//!                  │          ┌──────────────┐
//!                  └─────────▶│   Embedder   │ (ONNX or untrained fallback)
//!                             └──────────────┘
//!                                     │
//!                     audio ──▶ fbank ──▶ embedding
//!                                     │
//!                                     ▼
//!                             ┌──────────────┐      ┌──────────────┐
//!                             │    cosine    │ ───▶ │   verdict    │
//!                             │  similarity  │      │   (ladder)   │
//!                             └──────────────┘      └──────────────┘
//! ```

pub mod audio;
pub mod batch;
pub mod cli;
pub mod compare;
pub mod config;
pub mod error;
pub mod features;
pub mod identify;
pub mod model;
pub mod session;
pub mod similarity;
pub mod verdict;

pub use batch::{compare_batch, BatchResult, SimilarityMatrix};
pub use cli::{Cli, Commands};
pub use compare::{compare_pair, NativeBackend, PairComparison, ScoringBackend};
pub use config::Config;
pub use error::{Result, VerifyError};
pub use identify::{identify_live, Decision, IdentificationResult, ReferenceGallery};
pub use model::{ModelConfig, ModelKind};
pub use similarity::{cosine_similarity, Embedding};
pub use verdict::{classify, ThresholdLadder, Verdict};
