use anyhow::{Context, Result, anyhow};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub mod archive;
pub mod error;
pub mod generator;
pub mod logging;
pub mod ocr;
pub mod page;
pub mod settings;
#[cfg(test)]
mod test_util;
pub mod volume;

pub use error::{ArchiveWriteError, LineError, PageError, RunError};
pub use generator::{MokuroGenerator, VolumeSummary};
pub use ocr::{Detection, DetectedBlock, Detector, OcrModels, PageOcr, PipelineConfig, Recognizer};
pub use page::{Block, PageResult};
pub use volume::Volume;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub paths: Vec<PathBuf>,
    /// Every sub-directory and zip/cbz file inside is treated as a volume.
    pub parent_dir: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub disable_confirmation: bool,
    pub disable_ocr: bool,
    pub ignore_errors: bool,
    pub text_height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub volumes: usize,
    pub succeeded: usize,
    /// The confirmation prompt was declined; nothing was processed.
    pub cancelled: bool,
    pub outputs: Vec<VolumeSummary>,
}

pub fn run(config: Config) -> Result<RunSummary> {
    let stdin = io::stdin();
    run_with_io(config, stdin.lock(), io::stdout())
}

/// [`run`] with the prompt's input and the volume listing's output supplied
/// by the caller.
pub fn run_with_io<R: BufRead, W: Write>(
    config: Config,
    mut input: R,
    mut out: W,
) -> Result<RunSummary> {
    let settings = settings::load_settings(config.settings_path.as_deref())?;
    if config.disable_ocr {
        info!("running with OCR disabled");
    }

    info!("scanning paths...");
    let volumes = discover_volumes(&config.paths, config.parent_dir.as_deref())?;
    if volumes.is_empty() {
        error!("found no paths to process; did you set the paths correctly?");
        return Err(anyhow!("found no paths to process"));
    }

    writeln!(out, "\nFound {} volumes:\n", volumes.len())?;
    for volume in &volumes {
        writeln!(out, "{volume}")?;
    }
    writeln!(out, "\nEach of the paths above will be treated as one volume.\n")?;

    if !config.disable_confirmation && !confirm(&mut input, &mut out)? {
        return Ok(RunSummary {
            volumes: volumes.len(),
            cancelled: true,
            ..RunSummary::default()
        });
    }

    let page_ocr = build_page_ocr(&config, &settings)?;
    let generator =
        MokuroGenerator::new(page_ocr, config.ignore_errors, settings.compression_level);
    Ok(process_volumes(&generator, &volumes))
}

/// Processes volumes in order; a failing volume is logged and skipped.
pub fn process_volumes(generator: &MokuroGenerator, volumes: &[Volume]) -> RunSummary {
    let mut summary = RunSummary {
        volumes: volumes.len(),
        ..RunSummary::default()
    };
    for (idx, volume) in volumes.iter().enumerate() {
        info!("Processing {}/{}: {}", idx + 1, volumes.len(), volume);
        match generator.process_volume(volume) {
            Ok(result) => {
                summary.succeeded += 1;
                summary.outputs.push(result);
            }
            Err(err) => {
                error!("error while processing {volume}: {:#}", anyhow::Error::from(err));
            }
        }
    }
    info!("Processed successfully: {}/{}", summary.succeeded, summary.volumes);
    summary
}

/// Resolves explicit paths plus the volumes found in `parent_dir`.
///
/// Explicit paths keep their order and must exist. Entries of `parent_dir`
/// are added in natural order, skipping `_ocr`, earlier output archives and
/// paths already listed.
pub fn discover_volumes(paths: &[PathBuf], parent_dir: Option<&Path>) -> Result<Vec<Volume>> {
    let mut normalized: Vec<PathBuf> = Vec::new();
    for path in paths {
        let absolute = std::path::absolute(path)
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        if !absolute.exists() {
            error!("invalid path: {}", absolute.display());
            return Err(anyhow!("invalid path: {}", absolute.display()));
        }
        normalized.push(absolute);
    }

    if let Some(parent) = parent_dir {
        let parent = std::path::absolute(parent)
            .with_context(|| format!("failed to resolve {}", parent.display()))?;
        let mut children: Vec<PathBuf> = fs::read_dir(&parent)
            .with_context(|| format!("failed to read {}", parent.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        children.sort_by(|a, b| volume::natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
        for child in children {
            let is_volume_dir =
                child.is_dir() && child.file_name() != Some(std::ffi::OsStr::new("_ocr"));
            let is_volume_file = child.is_file()
                && volume::has_extension(&child, &volume::ARCHIVE_EXTENSIONS)
                && !volume::is_output_archive(&child);
            if (is_volume_dir || is_volume_file) && !normalized.contains(&child) {
                normalized.push(child);
            }
        }
    }

    normalized.iter().map(|path| Volume::from_path(path)).collect()
}

fn confirm<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<bool> {
    write!(out, "\nContinue? [yes/no] ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn build_page_ocr(config: &Config, settings: &settings::Settings) -> Result<PageOcr> {
    let mut pipeline = settings.pipeline.clone();
    if let Some(height) = config.text_height.filter(|height| *height > 0) {
        pipeline.text_height = height;
    }
    if config.disable_ocr {
        return Ok(PageOcr::disabled(pipeline));
    }
    let detector =
        ocr::CommandDetector::new(&settings.detector_command, &settings.detector_version)
            .with_context(|| "set [detector] command in settings or pass --disable-ocr")?;
    let recognizer = ocr::TesseractRecognizer::new(
        &settings.recognizer_languages,
        &settings.recognizer_vertical_languages,
    )
    .with_context(|| "failed to set up the tesseract recognizer")?;
    Ok(PageOcr::new(
        pipeline,
        OcrModels {
            detector: Box::new(detector),
            recognizer: Box::new(recognizer),
        },
    ))
}
