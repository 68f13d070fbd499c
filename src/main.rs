//! Command-line front end: annotate a PDF with the provenance of its
//! extracted facts and write the quality report alongside.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use provmark::config::{AnnotatorConfig, APP_VERSION};
use provmark::geometry::Rgb;
use provmark::locate::OcrEngine;
use provmark::orchestrate::{AnnotationEngine, EngineError};

#[derive(Debug, Parser)]
#[command(
    name = "provmark",
    version,
    about = "Anchors machine-extracted facts to the exact text in the source PDF"
)]
struct Args {
    /// Source PDF to annotate.
    input: PathBuf,

    /// Extracted facts JSON carrying provenance records.
    facts: PathBuf,

    /// Annotated PDF destination; defaults to `<input>.annotated.pdf`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Quality report destination; defaults next to the output.
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Optional JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Highlight color as `#RRGGBB`, overriding the config file.
    #[arg(long, value_name = "HEX")]
    highlight_color: Option<String>,

    /// Fuzzy-match acceptance threshold, 0.0-1.0.
    #[arg(long)]
    fuzzy_threshold: Option<f32>,

    /// OCR language passed to Tesseract.
    #[arg(long)]
    ocr_language: Option<String>,

    /// OCR rasterization density in dots per inch.
    #[arg(long)]
    ocr_dpi: Option<u32>,

    /// Success-rate floor below which the report warns.
    #[arg(long)]
    min_success_rate: Option<f32>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();
}

fn run(args: Args) -> Result<(), EngineError> {
    let mut config = match &args.config {
        Some(path) => AnnotatorConfig::from_json_file(path)?,
        None => AnnotatorConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input));
    let report = args
        .report
        .clone()
        .unwrap_or_else(|| default_report(&output));

    tracing::info!(version = APP_VERSION, input = %args.input.display(), "provmark starting");
    let engine = AnnotationEngine::new(config, ocr_engine());
    let summary = engine.run_files(&args.input, &args.facts, &output, Some(&report))?;

    println!(
        "Annotated {} of {} provenance records ({:.1}% success)",
        summary.statistics.annotated,
        summary.statistics.total_items,
        f64::from(summary.statistics.success_rate) * 100.0
    );
    for warning in &summary.warnings {
        println!("warning: {warning}");
    }
    println!("Annotated document: {}", output.display());
    println!("Report: {}", report.display());
    Ok(())
}

fn apply_overrides(config: &mut AnnotatorConfig, args: &Args) {
    if let Some(hex) = &args.highlight_color {
        match Rgb::from_hex(hex) {
            Some(color) => config.highlight_color = color,
            None => tracing::warn!(value = %hex, "ignoring malformed highlight color"),
        }
    }
    if let Some(threshold) = args.fuzzy_threshold {
        config.fuzzy_threshold = threshold;
    }
    if let Some(language) = &args.ocr_language {
        config.ocr_language = language.clone();
    }
    if let Some(dpi) = args.ocr_dpi {
        config.ocr_dpi = dpi;
    }
    if let Some(rate) = args.min_success_rate {
        config.min_success_rate = rate;
    }
    config.clamp();
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("annotated.pdf")
}

fn default_report(output: &Path) -> PathBuf {
    output.with_extension("report.json")
}

#[cfg(feature = "ocr")]
fn ocr_engine() -> Option<Box<dyn OcrEngine + Send + Sync>> {
    Some(Box::new(provmark::locate::TesseractOcr::new()))
}

#[cfg(not(feature = "ocr"))]
fn ocr_engine() -> Option<Box<dyn OcrEngine + Send + Sync>> {
    None
}
