use anvilmark::config::Settings;
use anvilmark::convert::{run_conversion, OutputLayout, RunOptions};
use anvilmark::corpus::file_pattern;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "anvilmark")]
#[command(about = "Convert a World Anvil JSON export into Obsidian Markdown notes")]
struct Cli {
    /// Plain-text file filter (example: Material-Mysticum)
    file_filter: Option<String>,

    /// Regex selecting the JSON file to convert (matches file name or full path)
    #[arg(long)]
    file_regex: Option<String>,

    /// Output directory for the Markdown notes
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Write notes without template subfolders
    #[arg(long)]
    output_root: bool,

    /// Root of the JSON export
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Directory for downloaded images
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key for the image metadata API
    #[arg(long)]
    api_key: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = &cli.source_dir {
        settings.source_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        settings.output_dir = dir.clone();
    }
    if let Some(dir) = &cli.image_dir {
        settings.image_dir = dir.clone();
    }
    if let Some(key) = &cli.api_key {
        settings.image_api.api_key = key.clone();
    }
    Ok(settings)
}

fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    let options = RunOptions {
        file_pattern: file_pattern(cli.file_filter.as_deref(), cli.file_regex.as_deref()),
        layout: if cli.output_root {
            OutputLayout::Flat
        } else {
            OutputLayout::TemplateFolders
        },
    };

    let start = Instant::now();
    let stats = run_conversion(&settings, &options)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Total time:          {:.2}s", duration.as_secs_f64());
    println!();
    println!("Articles converted:  {}", stats.converted());
    println!("Articles skipped:    {}", stats.skipped());
    println!("Image jobs queued:   {}", stats.image_jobs());
    println!("Images downloaded:   {}", stats.downloaded());
    println!("Images already here: {}", stats.download_skipped());
    println!("Image failures:      {}", stats.download_failed());
    println!();
    println!("Output written to {}; please validate your results", settings.output_dir.display());

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    match run(cli) {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
