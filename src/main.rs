//! Voxverify - speaker verification workbench
//!
//! Use `voxverify compare a.wav b.wav` to compare two recordings.
//! Use `voxverify batch --dir clips/` for a similarity matrix.
//! Use `voxverify identify` to match a live recording against the gallery.

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voxverify::audio::capture::{list_input_devices, CpalRecorder};
use voxverify::batch::{compare_batch, default_export_name, export_csv, BatchResult};
use voxverify::cli::{Cli, Commands};
use voxverify::compare::external::ExternalBackend;
use voxverify::compare::{NativeBackend, PairComparison, ScoringBackend};
use voxverify::config::{self, BackendKind, Config};
use voxverify::identify::{
    IdentificationResult, IdentifyOptions, IdentifyState, LiveIdentifier, ReferenceGallery,
};
use voxverify::model::ModelKind;
use voxverify::session::{PermissionCheck, PermissionTable, SpeakerSession};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voxverify={},warn", log_level))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(ref model) = cli.model {
        config.model = model.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(ref backend) = cli.backend {
        config.backend = backend.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(ref device) = cli.device {
        config.device = device.parse().map_err(anyhow::Error::msg)?;
    }

    match cli.command {
        Commands::Compare {
            first,
            second,
            json,
        } => run_compare(&config, &first, &second, json),
        Commands::Batch {
            files,
            dir,
            export,
            json,
        } => run_batch(&config, files, dir, export, json),
        Commands::Identify {
            duration,
            command,
            json,
        } => run_identify(&config, duration, command.as_deref(), json),
        Commands::Models => show_models(&config),
        Commands::Info { files } => show_info(&files),
        Commands::Devices => show_devices(),
        Commands::Config => show_config(&config),
        Commands::Init { path } => run_init(path),
    }
}

/// Build the configured scoring backend for the active model
fn build_backend(config: &Config) -> anyhow::Result<Box<dyn ScoringBackend>> {
    let model = config.active_model();
    match config.backend {
        BackendKind::Native => Ok(Box::new(NativeBackend::load(&model, config.device))),
        BackendKind::External => Ok(Box::new(
            ExternalBackend::new(&config.external, &model)
                .context("Failed to set up the external scoring backend")?,
        )),
    }
}

fn run_compare(config: &Config, first: &Path, second: &Path, json: bool) -> anyhow::Result<()> {
    let backend = build_backend(config)?;
    let result = backend.compare_pair(first, second)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_comparison(config, backend.as_ref(), &result);
    Ok(())
}

fn print_comparison(config: &Config, backend: &dyn ScoringBackend, result: &PairComparison) {
    println!("Speaker comparison ({} via {})\n", config.model.display_name(), backend.name());
    println!("  A: {}", result.left.display());
    println!("  B: {}", result.right.display());
    println!("\n  Similarity: {:.4}", result.score);
    println!("  Verdict:    {}", result.verdict.label());
    println!("              {}", result.verdict.description());
    println!("  Thresholds: {}", backend.thresholds());
    if !result.reliable {
        println!("\n  No trained weights were found; the score is not meaningful.");
        println!("  Run 'voxverify models' to see where weights are looked for.");
    }
}

fn run_batch(
    config: &Config,
    files: Vec<PathBuf>,
    dir: Option<PathBuf>,
    export: Option<Option<PathBuf>>,
    json: bool,
) -> anyhow::Result<()> {
    let sources = match dir {
        Some(dir) => voxverify::audio::discover_audio_files(&dir)
            .with_context(|| format!("Failed to scan {}", dir.display()))?,
        None => files,
    };
    if config.backend == BackendKind::External {
        tracing::warn!("Batch comparison embeds each file once; using the native backend");
    }
    let backend = NativeBackend::load(&config.active_model(), config.device);
    let result = compare_batch(&sources, &backend)?;

    let export_path = export.map(|path| {
        path.unwrap_or_else(|| {
            PathBuf::from(default_export_name(config.model, &chrono::Local::now()))
        })
    });
    if let Some(ref path) = export_path {
        export_csv(&result.matrix, path)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_batch(&result);
    if let Some(path) = export_path {
        println!("\nMatrix exported to {}", path.display());
    }
    Ok(())
}

fn print_batch(result: &BatchResult) {
    println!(
        "Similarity matrix ({}, {} files)\n",
        result.model.display_name(),
        result.matrix.len()
    );
    print!("{}", result.matrix.render());

    println!(
        "\nLikely same speaker (score > {:.2}):",
        result.thresholds.acceptance()
    );
    if result.high_pairs.is_empty() {
        println!("  (none)");
    }
    for pair in &result.high_pairs {
        println!("  {:.4}  {} <-> {}", pair.score, pair.first, pair.second);
    }

    if !result.skipped.is_empty() {
        println!("\nSkipped:");
        for skipped in &result.skipped {
            println!("  {}: {}", skipped.path.display(), skipped.reason);
        }
    }
    if !result.reliable {
        println!("\nNo trained weights were found; scores are not meaningful.");
    }
}

fn run_identify(
    config: &Config,
    duration: Option<u32>,
    command: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let gallery = ReferenceGallery::from(config.gallery.clone());
    let mut options = IdentifyOptions::from(config);
    if let Some(secs) = duration {
        options.duration_secs = secs;
    }

    let backend = build_backend(config)?;
    let mut recorder = CpalRecorder::new(&config.audio);

    let mut countdown: Option<Countdown> = None;
    let result = {
        let mut identifier = LiveIdentifier::new(&mut recorder, backend.as_ref(), &gallery, options)
            .with_observer(|state, duration| match state {
                IdentifyState::Recording if !json => {
                    eprintln!("Recording for {}s, speak now...", duration.as_secs());
                    countdown = Some(Countdown::start(duration));
                }
                IdentifyState::Scoring | IdentifyState::Decided => {
                    if let Some(c) = countdown.take() {
                        c.stop();
                    }
                }
                _ => {}
            });
        identifier.run()
    };
    if let Some(c) = countdown.take() {
        c.stop();
    }
    let result = result?;

    let mut session = SpeakerSession::new();
    session.apply_result(&result);
    let permission = command.map(|phrase| {
        let table = PermissionTable::from(config.permissions.clone());
        session.check(&table, phrase)
    });

    if json {
        let report = serde_json::json!({
            "result": result,
            "session": session,
            "permission": permission,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_identification(&result);
    if let (Some(phrase), Some(check)) = (command, permission) {
        match check {
            PermissionCheck::Allowed { speaker, phrase: granted } => {
                println!("\n{} may run '{}' (granted by '{}')", speaker, phrase, granted)
            }
            PermissionCheck::Denied { speaker } => {
                println!("\n{} is not permitted to run '{}'", speaker, phrase)
            }
            PermissionCheck::NotAuthenticated => {
                println!("\nSpeaker not recognized; '{}' is not permitted", phrase)
            }
        }
    }
    Ok(())
}

fn print_identification(result: &IdentificationResult) {
    println!("Speaker identification ({:.1}s recording)\n", result.recording_secs);
    println!("  {:<20} {:>8} {:>8}  scores", "speaker", "mean", "max");
    for candidate in &result.ranking {
        let scores: Vec<String> = candidate.scores.iter().map(|s| format!("{:.4}", s)).collect();
        println!(
            "  {:<20} {:>8.4} {:>8.4}  {}",
            candidate.speaker,
            candidate.mean,
            candidate.max,
            scores.join(", ")
        );
    }

    println!("\n  Decision:   {}", result.decision);
    if let Some(verdict) = result.verdict {
        println!("  Confidence: {}", verdict.label());
    }
    println!("  Threshold:  mean > {:.2}", result.threshold);
}

/// Cosmetic countdown printed to stderr while recording
struct Countdown {
    stop: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

impl Countdown {
    fn start(duration: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::spawn(move || {
            let mut remaining = duration.as_secs();
            while remaining > 0 && !flag.load(Ordering::Relaxed) {
                eprint!("\r  {:>2}s remaining ", remaining);
                let _ = std::io::stderr().flush();
                std::thread::sleep(Duration::from_secs(1));
                remaining -= 1;
            }
            eprint!("\r                  \r");
        });
        Self { stop, handle }
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

fn show_models(config: &Config) -> anyhow::Result<()> {
    println!("Speaker Models\n");
    println!("==============\n");

    for kind in ModelKind::ALL {
        let model = config.model_config(kind);
        let active = if kind == config.model { " (active)" } else { "" };
        println!("{} [{}]{}", kind.display_name(), kind.name(), active);
        println!("  embedding dim = {}", model.embedding_dim());
        println!("  feature dim = {}", model.feat_dim());
        println!("  thresholds = {}", model.thresholds);
        println!("  upstream id = {}", model.upstream_id);
        match model.available_weights() {
            Some(path) => println!("  weights = {} (found)", path.display()),
            None => {
                println!("  weights = not found; looked in:");
                for candidate in &model.weight_candidates {
                    println!("    {}", candidate.display());
                }
            }
        }
        println!();
    }
    Ok(())
}

fn show_info(files: &[PathBuf]) -> anyhow::Result<()> {
    for path in files {
        let info = voxverify::audio::probe(path)?;
        println!("{}", path.display());
        println!("  duration = {:.2}s", info.duration_secs);
        println!("  sample rate = {} Hz", info.sample_rate);
        println!("  channels = {}", info.channels);
        println!("  bits per sample = {}", info.bits_per_sample);
        println!("  samples = {}", info.frames);
        println!("  size = {:.1} KB", info.byte_size as f64 / 1024.0);
        for warning in info.warnings() {
            println!("  warning: {}", warning);
        }
    }
    Ok(())
}

fn show_devices() -> anyhow::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("No audio input devices found.");
        return Ok(());
    }
    println!("Audio input devices:\n");
    for name in devices {
        println!("  {}", name);
    }
    println!("\nSet [audio] device in the config to one of these names.");
    Ok(())
}

fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("Current Configuration\n");
    println!("=====================\n");

    println!("model = {:?}", config.model.name());
    println!("backend = {:?}", config.backend);
    println!("device = {:?}", config.device);

    println!("\n[audio]");
    println!("  device = {:?}", config.audio.device);
    println!("  sample_rate = {}", config.audio.sample_rate);
    println!("  silence_threshold = {}", config.audio.silence_threshold);

    println!("\n[identify]");
    println!("  duration_secs = {}", config.identify.duration_secs);
    println!("  max_references = {}", config.identify.max_references);

    println!("\n[external]");
    println!("  program = {:?}", config.external.program);
    println!("  script = {:?}", config.external.script);
    println!("  marker = {:?}", config.external.marker);
    if let Some(ref dir) = config.external.working_dir {
        println!("  working_dir = {:?}", dir);
    }

    let active = config.active_model();
    println!("\n[models.{}]", config.model.name());
    println!("  thresholds = {}", active.thresholds);

    println!("\n[gallery]");
    for (speaker, refs) in &config.gallery {
        println!("  {} = {:?}", speaker, refs);
    }

    println!("\n[permissions]");
    for (speaker, phrases) in &config.permissions {
        println!("  {} = {:?}", speaker, phrases);
    }

    if let Some(path) = Config::default_path() {
        println!("\nConfig file: {}", path.display());
    }
    Ok(())
}

fn run_init(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path
        .or_else(Config::default_path)
        .context("Could not determine a config directory; pass --path")?;
    config::write_default_config(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
