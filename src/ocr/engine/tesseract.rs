use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, RgbImage};
use std::io::Write;
use std::process::Command;
use tracing::warn;

use crate::ocr::Recognizer;

/// Line recognizer that shells out to the `tesseract` CLI.
///
/// Chunks of horizontal lines are read as a single line (`--psm 7`), the
/// upright chunks of vertical lines as a single vertical block (`--psm 5`).
pub struct TesseractRecognizer {
    languages: String,
    vertical_languages: String,
    version: String,
}

impl TesseractRecognizer {
    pub fn new(languages: &str, vertical_languages: &str) -> Result<Self> {
        Ok(Self {
            languages: normalize_ocr_languages(languages)?,
            vertical_languages: normalize_ocr_languages(vertical_languages)?,
            version: tesseract_version().unwrap_or_else(|_| "unknown".to_string()),
        })
    }

    /// Languages and page segmentation mode for a line of the given orientation.
    fn mode(&self, vertical: bool) -> (&str, u32) {
        if vertical {
            (self.vertical_languages.as_str(), 5)
        } else {
            (self.languages.as_str(), 7)
        }
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&self, image: &RgbImage, vertical: bool) -> Result<String> {
        let (languages, psm) = self.mode(vertical);
        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .with_context(|| "failed to create temp file for OCR")?;
        image
            .write_to(&mut tmp, ImageFormat::Png)
            .with_context(|| "failed to write temp image for OCR")?;
        tmp.flush().ok();

        let text = run_tesseract_text(tmp.path(), languages, psm)?;
        Ok(text.chars().filter(|ch| !ch.is_whitespace()).collect())
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_language_list(&stdout))
}

fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn tesseract_version() -> Result<String> {
    let output = Command::new("tesseract")
        .arg("--version")
        .output()
        .with_context(|| "failed to run tesseract --version")?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("tesseract --version printed nothing"))
}

fn normalize_ocr_languages(requested: &str) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let available = match list_tesseract_languages() {
        Ok(list) => list,
        Err(_) => return Ok(trimmed.to_string()),
    };
    select_languages(trimmed, &available)
}

fn select_languages(requested: &str, available: &[String]) -> Result<String> {
    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for raw in requested.split(['+', ',', ' ']) {
        let lang = raw.trim();
        if lang.is_empty() {
            continue;
        }
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

fn run_tesseract_text(path: &std::path::Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(psm.to_string())
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
