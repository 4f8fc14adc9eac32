//! PDF Image Normalizer CLI
//!
//! Command-line interface for normalizing the images in a PDF onto a fixed canvas.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use normalize_pdf::file_ops::normalized_file_name;
use normalize_pdf::{
    extract_pdf_images_info, normalize_pdf_bytes, Anchor, EncodingPolicy, ErrorKind,
    FootprintPolicy, NormalizeError, NormalizeOptions, NormalizeReport, ScalePolicy, TargetSpec,
};

/// Extra wait on top of the run budget before the worker is abandoned
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Normalize every image in a PDF to a fixed-size canvas
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize all images and write a new PDF
    Run(RunArgs),
    /// List the images on each page
    Inspect {
        /// Input PDF file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input PDF file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output PDF file (defaults to <input>_normalized.pdf)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Canvas width in pixels
    #[arg(long, default_value = "1200")]
    width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value = "1200")]
    height: u32,

    /// Padding color as #rrggbb or r,g,b
    #[arg(long, default_value = "#ffffff", value_parser = parse_color)]
    background: [u8; 3],

    /// Where the image sits on the canvas (center, top-left, bottom, ...)
    #[arg(long, default_value = "center")]
    anchor: Anchor,

    /// Scaling policy: always or shrink-only
    #[arg(long, default_value = "always")]
    scale: ScalePolicy,

    /// Placement on the page: canvas-shaped or preserve-content
    #[arg(long, default_value = "canvas-shaped")]
    footprint: FootprintPolicy,

    /// Image encoding: match-source, lossless or jpeg
    #[arg(long, default_value = "match-source")]
    encoding: EncodingPolicy,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value = "95")]
    quality: u8,

    /// Compress edited content streams
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    compress_streams: bool,

    /// Worker threads (0 = one per CPU)
    #[arg(long, env = "NORMALIZE_PDF_WORKERS", default_value = "0")]
    workers: usize,

    /// Wall-clock budget in seconds (0 disables it)
    #[arg(long, env = "NORMALIZE_PDF_TIMEOUT", default_value = "55")]
    timeout: u64,
}

fn parse_color(s: &str) -> Result<[u8; 3], String> {
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("expected #rrggbb, got '{}'", s));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("'{}': {}", s, e))
        };
        return Ok([channel(0)?, channel(2)?, channel(4)?]);
    }
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<u8>().map_err(|e| format!("'{}': {}", s, e)))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [r, g, b] => Ok([*r, *g, *b]),
        _ => Err(format!("expected r,g,b, got '{}'", s)),
    }
}

/// Process exit code for a failure kind.
fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidTarget | ErrorKind::InvalidOption => 2,
        ErrorKind::MalformedDocument | ErrorKind::Io => 3,
        ErrorKind::Timeout => 5,
        _ => 4,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Inspect { input } => inspect(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let kind = e
                .downcast_ref::<NormalizeError>()
                .map(NormalizeError::root_kind)
                .unwrap_or(ErrorKind::Io);
            if let Some(report) = e
                .downcast_ref::<NormalizeError>()
                .and_then(NormalizeError::partial_report)
            {
                print_failures(report);
            }
            ExitCode::from(exit_code(kind))
        }
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let options = NormalizeOptions {
        target: TargetSpec::new(args.width, args.height)?,
        background: args.background,
        anchor: args.anchor,
        scale_policy: args.scale,
        footprint: args.footprint,
        encoding: args.encoding,
        jpeg_quality: args.quality,
        compress_streams: args.compress_streams,
        max_workers: args.workers,
        budget: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
    };
    options.validate()?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| normalized_file_name(&args.input));

    println!("PDF Image Normalizer");
    println!("====================");
    println!(
        "Target canvas: {}x{} px",
        options.target.width(),
        options.target.height()
    );

    let input_bytes =
        std::fs::read(&args.input).with_context(|| format!("Failed to read {:?}", args.input))?;

    let (output_bytes, report) = run_with_budget(input_bytes, options)?;

    std::fs::write(&output, output_bytes)
        .with_context(|| format!("Failed to write {:?}", output))?;

    println!(
        "\nDone! Processed {} images: {} normalized, {} skipped",
        report.total_images, report.normalized_images, report.skipped_images
    );
    print_failures(&report);
    println!("Output saved to: {:?}", output);

    Ok(())
}

/// Run the pipeline off the main thread and give up once the budget and a
/// grace period have passed.
fn run_with_budget(
    input_bytes: Vec<u8>,
    options: NormalizeOptions,
) -> Result<(Vec<u8>, NormalizeReport), NormalizeError> {
    let budget = options.budget;
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("normalize-worker".to_string())
        .spawn(move || {
            // The receiver may be gone after a timeout
            let _ = tx.send(normalize_pdf_bytes(&input_bytes, &options));
        })?;

    match budget {
        Some(budget) => match rx.recv_timeout(budget + GRACE_PERIOD) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(NormalizeError::Timeout(budget)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(worker_died()),
        },
        None => rx.recv().unwrap_or_else(|_| Err(worker_died())),
    }
}

fn worker_died() -> NormalizeError {
    NormalizeError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "normalization worker exited without a result",
    ))
}

fn print_failures(report: &NormalizeReport) {
    for failure in &report.failures {
        println!(
            "  Skipped image {} {} [{}]: {}",
            failure.object_id.0, failure.object_id.1, failure.kind, failure.message
        );
    }
}

fn inspect(input: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
    let pages = extract_pdf_images_info(&bytes)?;

    if pages.is_empty() {
        println!("No images found");
        return Ok(());
    }

    for page in &pages {
        println!("Page {}:", page.page_number);
        for image in &page.images {
            let placement = match (image.footprint_points, image.dpi_x, image.dpi_y) {
                (Some((w, h)), Some(dx), Some(dy)) => {
                    format!(" @ {:.1}x{:.1} pt = {:.0}x{:.0} DPI", w, h, dx, dy)
                }
                _ => String::new(),
            };
            println!(
                "  {} {} {}: {}x{} px, {} {} bpc, {}, {} bytes{}",
                image.image_type,
                image.object_id.0,
                image.object_id.1,
                image.width,
                image.height,
                image.color_space,
                image.bits_per_component,
                image.filter,
                image.size_bytes,
                placement
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#ff8000"), Ok([255, 128, 0]));
        assert_eq!(parse_color("0, 10,255"), Ok([0, 10, 255]));
        assert!(parse_color("#fff").is_err());
        assert!(parse_color("#a\u{e9}bcd").is_err());
        assert!(parse_color("1,2").is_err());
    }

    #[test]
    fn test_exit_codes_by_kind() {
        assert_eq!(exit_code(ErrorKind::InvalidTarget), 2);
        assert_eq!(exit_code(ErrorKind::MalformedDocument), 3);
        assert_eq!(exit_code(ErrorKind::RewriteConflict), 4);
        assert_eq!(exit_code(ErrorKind::Timeout), 5);
    }

    #[test]
    fn test_cli_parses_run_defaults() {
        let cli = Cli::try_parse_from(["normalize-pdf", "run", "scan.pdf"]).unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!((args.width, args.height), (1200, 1200));
                assert_eq!(args.background, [255, 255, 255]);
                assert_eq!(args.anchor, Anchor::Center);
                assert_eq!(args.footprint, FootprintPolicy::CanvasShaped);
                assert!(args.output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
