//! Demix command line
//!
//! Usage:
//!   demix separate song.flac --model htdemucs.onnx   - Split into stems
//!   demix probe song.flac other.mp3                  - Show file info
//!   demix config --six-stems                         - Print a config file

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dx_io::{AudioDecoder, AudioFileInfo, write_stems};
use dx_separate::{
    MODEL_SAMPLE_RATE, ModelAdapter, PipelineState, SeparatedStems, SeparationConfig, SeparationStats,
    Separator, TractBackend,
};
use rayon::prelude::*;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "demix", version, about = "Blind audio source separation")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Separate audio files into stems
    Separate(SeparateArgs),
    /// Print file metadata
    Probe {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        options: ConfigArgs,
    },
}

#[derive(Args)]
struct SeparateArgs {
    /// Input audio files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Separator model (ONNX)
    #[arg(short, long)]
    model: PathBuf,

    /// Output directory; stems go to <output>/<input name>/<stem>.wav
    /// (inputs sharing a name get `-2`, `-3`, ... appended)
    #[arg(short, long, default_value = "separated")]
    output: PathBuf,

    /// Write a JSON report of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    threads: Option<usize>,

    #[command(flatten)]
    options: ConfigArgs,
}

#[derive(Args, Default)]
struct ConfigArgs {
    /// Load settings from a JSON file before applying flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Segment length in seconds
    #[arg(long)]
    segment: Option<f64>,

    /// Overlap between neighbouring segments, [0, 1)
    #[arg(long)]
    overlap: Option<f64>,

    /// Cross-fade exponent
    #[arg(long)]
    transition_power: Option<f32>,

    /// STFT size
    #[arg(long)]
    fft_size: Option<usize>,

    /// Use the 6-stem layout (adds guitar, piano)
    #[arg(long, conflicts_with = "stems")]
    six_stems: bool,

    /// Explicit stem names in model output order
    #[arg(long, value_delimiter = ',')]
    stems: Option<Vec<String>>,

    /// Also write the sum of all non-vocal stems
    #[arg(long)]
    instrumental: bool,

    /// Run segments of a file concurrently
    #[arg(long)]
    parallel_segments: bool,
}

impl ConfigArgs {
    fn build(&self) -> Result<SeparationConfig> {
        let mut config = match &self.config {
            Some(path) => SeparationConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None if self.six_stems => SeparationConfig::six_stems(),
            None => SeparationConfig::four_stems(),
        };

        if self.config.is_some() && self.six_stems {
            config = config.with_stems(dx_separate::STEMS_6);
        }
        if let Some(stems) = &self.stems {
            config = config.with_stems(stems.iter().cloned());
        }
        if let Some(seconds) = self.segment {
            config = config.with_segment_seconds(seconds);
        }
        if let Some(overlap) = self.overlap {
            config = config.with_overlap(overlap);
        }
        if let Some(power) = self.transition_power {
            config = config.with_transition_power(power);
        }
        if let Some(fft_size) = self.fft_size {
            config = config.with_fft_size(fft_size);
        }
        if self.instrumental {
            config = config.with_instrumental(true);
        }
        if self.parallel_segments {
            config = config.with_parallel_segments(true);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct StemReport {
    name: String,
    path: PathBuf,
    peak: f32,
    rms: f32,
    peak_norm_factor: f32,
}

#[derive(Debug, Serialize)]
struct FileReport {
    input: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<AudioFileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    stems: Vec<StemReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<SeparationStats>,
}

impl FileReport {
    fn failed(input: &Path, info: Option<AudioFileInfo>, error: impl std::fmt::Display) -> Self {
        Self {
            input: input.to_path_buf(),
            info,
            error: Some(error.to_string()),
            stems: Vec::new(),
            stats: None,
        }
    }

    fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    model: PathBuf,
    config: SeparationConfig,
    files: Vec<FileReport>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Commands::Separate(args) => separate(&args),
        Commands::Probe { inputs } => probe(&inputs),
        Commands::Config { options } => {
            let config = options.build()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// File stem of an input, used as its output directory name
fn input_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

/// Output directory per input: `<output>/<input name>`, suffixed with
/// `-2`, `-3`, ... when an earlier input already claimed the name
fn output_dirs(output: &Path, inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let name = input_name(input);
            let mut dir = output.join(&name);
            let mut n = 2;
            while !taken.insert(dir.clone()) {
                dir = output.join(format!("{}-{}", name, n));
                n += 1;
            }
            if n > 2 {
                log::warn!("{}: name already used, writing to {}", input.display(), dir.display());
            }
            dir
        })
        .collect()
}

fn write_file(dir: &Path, input: &Path, info: Option<AudioFileInfo>, stems: &SeparatedStems) -> FileReport {
    match write_stems(dir, &stems.stems) {
        Ok(paths) => FileReport {
            input: input.to_path_buf(),
            info,
            error: None,
            stems: stems
                .stems
                .iter()
                .zip(paths)
                .map(|(stem, path)| StemReport {
                    name: stem.name.clone(),
                    path,
                    peak: stem.peak(),
                    rms: stem.rms(),
                    peak_norm_factor: stem.peak_norm_factor,
                })
                .collect(),
            stats: Some(stems.stats.clone()),
        },
        Err(e) => FileReport::failed(input, info, e),
    }
}

/// Decode, separate and write one file. Only this file's audio is held in
/// memory; every failure ends up in the returned report.
fn separate_file(separator: &Separator, input: &Path, dir: &Path, show_progress: bool) -> FileReport {
    let info = AudioDecoder::probe(input).ok();
    if let Some(info) = &info {
        log::info!(
            "{}: {:.1}s, ~{:.0} MB working memory",
            input.display(),
            info.duration,
            separator.config().estimated_memory_mb(info.duration as f32)
        );
    }

    let waveform = match AudioDecoder::decode(input).and_then(|audio| audio.into_waveform(MODEL_SAMPLE_RATE)) {
        Ok(waveform) => waveform,
        Err(e) => {
            log::error!("{}: {}", input.display(), e);
            return FileReport::failed(input, info, e);
        }
    };

    let result = if show_progress {
        let mut last_state = None;
        separator.separate_with_progress(&waveform, |p| {
            if p.state == PipelineState::Separating {
                log::debug!("Segment {}/{}", p.segments_done, p.segments_total);
            }
            if last_state != Some(p.state) {
                log::info!("{:?} ({:.0}%)", p.state, p.fraction() * 100.0);
                last_state = Some(p.state);
            }
        })
    } else {
        separator.separate(&waveform)
    };
    drop(waveform);

    match result {
        Ok(stems) => write_file(dir, input, info, &stems),
        Err(e) => {
            log::error!("{}: {}", input.display(), e);
            FileReport::failed(input, info, e)
        }
    }
}

/// Run every input as an independent job, in parallel when the backend
/// allows concurrent sessions. Reports keep input order.
fn separate_files(separator: &Separator, output: &Path, inputs: &[PathBuf]) -> Vec<FileReport> {
    let dirs = output_dirs(output, inputs);
    let jobs: Vec<(&PathBuf, &PathBuf)> = inputs.iter().zip(&dirs).collect();

    if separator.supports_concurrent_files() && jobs.len() > 1 {
        log::info!("Separating {} files in parallel", jobs.len());
        jobs.par_iter()
            .map(|(input, dir)| separate_file(separator, input, dir, false))
            .collect()
    } else {
        jobs.iter()
            .map(|(input, dir)| separate_file(separator, input, dir, true))
            .collect()
    }
}

fn separate(args: &SeparateArgs) -> Result<()> {
    let threads = args.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("Failed to configure worker threads")?;

    let config = args.options.build()?;
    log::info!(
        "Config: {} stems, {:.1}s segments, overlap {:.2}, fft {}",
        config.num_stems(),
        config.segment_seconds,
        config.overlap,
        config.fft_size
    );

    let adapter = ModelAdapter::from_config(&config);
    let backend = TractBackend::load(&args.model, &adapter)
        .with_context(|| format!("Failed to load model {}", args.model.display()))?;
    let separator = Separator::new(config.clone(), Arc::new(backend))?;

    let files = separate_files(&separator, &args.output, &args.inputs);
    let failed = files.iter().filter(|f| !f.succeeded()).count();
    let total = files.len();

    if let Some(path) = &args.report {
        let report = RunReport {
            model: args.model.clone(),
            config,
            files,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    if failed > 0 {
        bail!("{} of {} files failed", failed, total);
    }
    log::info!("Separated {} files into {}", total, args.output.display());
    Ok(())
}

fn probe(inputs: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for input in inputs {
        match AudioDecoder::probe(input) {
            Ok(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            Err(e) => {
                log::error!("{}: {}", input.display(), e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} files could not be read", failed, inputs.len());
    }
    Ok(())
}
