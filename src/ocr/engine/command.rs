use anyhow::{Context, Result, anyhow};
use image::{GrayImage, ImageFormat, RgbImage};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use crate::ocr::{DetectedBlock, Detection, Detector};

/// Text detector run as an external program.
///
/// The program is called as `<argv...> <page.png> <mask.png> <mask_refined.png>`.
/// It must write both masks (same size as the page) and print the blocks as
/// JSON on stdout:
///
/// ```json
/// {"blocks": [{"xyxy": [x0, y0, x1, y1], "vertical": true, "font_size": 31.5,
///              "lines": [[[x, y], [x, y], [x, y], [x, y]]]}]}
/// ```
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    version: String,
}

#[derive(Debug, Deserialize)]
struct DetectorOutput {
    blocks: Vec<DetectedBlock>,
}

impl CommandDetector {
    pub fn new(argv: &[String], version: &str) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("detector command is empty"))?;
        if program.trim().is_empty() {
            return Err(anyhow!("detector command is empty"));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            version: version.to_string(),
        })
    }
}

impl Detector for CommandDetector {
    fn detect(&self, image: &RgbImage) -> Result<Detection> {
        let dir = tempfile::tempdir().with_context(|| "failed to create temp dir for detector")?;
        let page_path = dir.path().join("page.png");
        let mask_path = dir.path().join("mask.png");
        let refined_path = dir.path().join("mask_refined.png");
        image
            .save_with_format(&page_path, ImageFormat::Png)
            .with_context(|| "failed to write temp image for detector")?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&page_path)
            .arg(&mask_path)
            .arg(&refined_path)
            .output()
            .with_context(|| format!("failed to run detector `{}`", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("detector failed: {}", stderr.trim()));
        }

        let parsed: DetectorOutput = serde_json::from_slice(&output.stdout)
            .with_context(|| "failed to parse detector output")?;
        let text_mask = read_mask(&mask_path, image)?;
        let refined_mask = read_mask(&refined_path, image)?;
        Ok(Detection {
            text_mask,
            refined_mask,
            blocks: parsed.blocks,
        })
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

fn read_mask(path: &Path, page: &RgbImage) -> Result<GrayImage> {
    let mask = image::open(path)
        .with_context(|| format!("detector did not write {}", path.display()))?
        .to_luma8();
    if mask.dimensions() != page.dimensions() {
        return Err(anyhow!(
            "detector mask is {}x{}, page is {}x{}",
            mask.width(),
            mask.height(),
            page.width(),
            page.height()
        ));
    }
    Ok(mask)
}
