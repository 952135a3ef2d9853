use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "mokuro-rust",
    version,
    about = "Run text detection and OCR over manga volumes"
)]
struct Cli {
    /// Volumes to process (directories, .zip or .cbz files)
    paths: Vec<PathBuf>,

    /// Treat every sub-directory and zip/cbz file in this directory as a volume
    #[arg(long = "parent-dir")]
    parent_dir: Option<PathBuf>,

    /// Do not ask before processing the listed volumes
    #[arg(long = "disable-confirmation")]
    disable_confirmation: bool,

    /// Only record page sizes, without running detection or OCR
    #[arg(long = "disable-ocr")]
    disable_ocr: bool,

    /// Skip pages that fail instead of aborting the volume
    #[arg(long = "ignore-errors")]
    ignore_errors: bool,

    /// Height text lines are normalized to before recognition
    #[arg(long = "text-height")]
    text_height: Option<u32>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "settings")]
    settings: Option<PathBuf>,

    /// Show installed tesseract languages and exit
    #[arg(long = "show-ocr-languages")]
    show_ocr_languages: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    mokuro_rust::logging::init(cli.verbose)?;

    if cli.show_ocr_languages {
        for language in mokuro_rust::ocr::list_tesseract_languages()? {
            println!("{language}");
        }
        return Ok(());
    }

    let config = mokuro_rust::Config {
        paths: cli.paths,
        parent_dir: cli.parent_dir,
        settings_path: cli.settings,
        disable_confirmation: cli.disable_confirmation,
        disable_ocr: cli.disable_ocr,
        ignore_errors: cli.ignore_errors,
        text_height: cli.text_height,
    };
    let summary = mokuro_rust::run(config)?;
    if !summary.cancelled {
        println!(
            "Processed successfully: {}/{}",
            summary.succeeded, summary.volumes
        );
    }
    Ok(())
}
