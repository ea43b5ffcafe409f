// Command-line interface definitions for voxverify
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "voxverify")]
#[command(author, version, about = "Speaker verification workbench")]
#[command(long_about = "
Voxverify extracts voice-print embeddings from audio clips with a pretrained
speaker model (CAM++ or ERes2Net) and compares them by cosine similarity.

USAGE:
  voxverify compare a.wav b.wav        Are these the same speaker?
  voxverify batch --dir recordings/    Similarity matrix for many files
  voxverify identify                   Record the microphone and match it
                                       against the [gallery] in the config

SETUP:
  1. Run: voxverify init (writes a commented config file)
  2. Place ONNX weights in ~/.local/share/voxverify/models/ or pretrained/
  3. Run: voxverify models (to check which weights are found)
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override speaker model (campplus, eres2net)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Override scoring backend (native, external)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Override inference device (auto, cpu, cuda)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compare two audio files and report whether they are the same speaker
    Compare {
        /// First audio file
        first: std::path::PathBuf,

        /// Second audio file
        second: std::path::PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a similarity matrix over many audio files
    Batch {
        /// Audio files to compare (at least 2)
        files: Vec<std::path::PathBuf>,

        /// Directory to scan recursively for audio files
        #[arg(long, value_name = "DIR", conflicts_with = "files")]
        dir: Option<std::path::PathBuf>,

        /// Export the matrix as CSV (default name is timestamped)
        #[arg(long, value_name = "FILE", num_args = 0..=1)]
        export: Option<Option<std::path::PathBuf>>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record from the microphone and identify the speaker against the gallery
    Identify {
        /// Recording length in seconds (2-30)
        #[arg(long, value_name = "SECS")]
        duration: Option<u32>,

        /// Check whether the identified speaker may run this command phrase
        #[arg(long, value_name = "PHRASE")]
        command: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List speaker models, their thresholds and weight availability
    Models,

    /// Show audio file properties and suitability warnings
    Info {
        /// Audio files to inspect
        #[arg(required = true)]
        files: Vec<std::path::PathBuf>,
    },

    /// List audio input devices
    Devices,

    /// Show current configuration
    Config,

    /// Write a default config file
    Init {
        /// Write to this path instead of the default location
        #[arg(long, value_name = "FILE")]
        path: Option<std::path::PathBuf>,
    },
}
