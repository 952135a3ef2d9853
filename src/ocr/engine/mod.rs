mod chunk;
mod command;
mod geom;
mod tesseract;
mod text;

use image::{GenericImageView, GrayImage, RgbImage};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LineError, PageError};
use crate::ocr::{Detection, Detector, Recognizer};
use crate::page::{Block, LineQuad, PageResult, font_size_px};

pub use chunk::{Segmentation, segment_line};
pub use command::CommandDetector;
pub use geom::extract_line;
pub use tesseract::{TesseractRecognizer, list_tesseract_languages};
pub use text::{normalize_punctuation, recognize_chunks};

/// Line geometry and chunking policy shared by every page of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Height every line crop is normalized to.
    pub text_height: u32,
    pub max_ratio_vert: f32,
    pub max_ratio_hor: f32,
    /// Cut search width around each anchor, in multiples of `text_height`.
    pub anchor_window: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_height: 64,
            max_ratio_vert: 16.0,
            max_ratio_hor: 8.0,
            anchor_window: 2,
        }
    }
}

impl PipelineConfig {
    pub fn max_ratio(&self, vertical: bool) -> f32 {
        if vertical {
            self.max_ratio_vert
        } else {
            self.max_ratio_hor
        }
    }
}

/// Detector and recognizer, loaded once and reused for every page.
pub struct OcrModels {
    pub detector: Box<dyn Detector>,
    pub recognizer: Box<dyn Recognizer>,
}

/// Turns page images into [`PageResult`]s.
///
/// Built without models it only reports page sizes, which is how OCR is
/// switched off.
pub struct PageOcr {
    config: PipelineConfig,
    models: Option<OcrModels>,
}

impl std::fmt::Debug for PageOcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (detector, recognizer) = self.model_versions();
        f.debug_struct("PageOcr")
            .field("config", &self.config)
            .field("detector", &detector)
            .field("recognizer", &recognizer)
            .finish()
    }
}

impl PageOcr {
    pub fn new(config: PipelineConfig, models: OcrModels) -> Self {
        Self {
            config,
            models: Some(models),
        }
    }

    pub fn disabled(config: PipelineConfig) -> Self {
        Self {
            config,
            models: None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.models.is_none()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// `(detector, recognizer)` versions, or `disabled` for both.
    pub fn model_versions(&self) -> (String, String) {
        match &self.models {
            Some(models) => (models.detector.version(), models.recognizer.version()),
            None => ("disabled".to_string(), "disabled".to_string()),
        }
    }

    pub fn process(&self, bytes: &[u8]) -> Result<PageResult, PageError> {
        let image = decode_page(bytes)?;
        self.process_image(&image)
    }

    pub fn process_image(&self, image: &RgbImage) -> Result<PageResult, PageError> {
        let Some(models) = &self.models else {
            return Ok(PageResult::empty(image.width(), image.height()));
        };
        let detection = models
            .detector
            .detect(image)
            .map_err(PageError::DetectorFailure)?;
        assemble(image, &detection, models.recognizer.as_ref(), &self.config)
    }
}

/// Builds the page result from one detector pass.
///
/// Blocks and lines keep detector order. A line whose geometry cannot be
/// cropped keeps its coordinates with empty text; recognizer failures fail
/// the whole page.
pub fn assemble(
    image: &RgbImage,
    detection: &Detection,
    recognizer: &dyn Recognizer,
    config: &PipelineConfig,
) -> Result<PageResult, PageError> {
    let mut page = PageResult::empty(image.width(), image.height());
    for (block_idx, detected) in detection.blocks.iter().enumerate() {
        let mut block = Block::new(
            Uuid::now_v7().simple().to_string(),
            detected.xyxy,
            detected.vertical,
            font_size_px(detected.font_size),
        );
        for (line_idx, quad) in detected.lines.iter().enumerate() {
            let text = match line_chunks(
                image,
                &detection.refined_mask,
                quad,
                detected.vertical,
                config,
            ) {
                Ok(segmentation) => {
                    recognize_chunks(recognizer, &segmentation.chunks, detected.vertical)?
                }
                Err(err) => {
                    debug!("block {block_idx} line {line_idx}: {err}; leaving it empty");
                    String::new()
                }
            };
            block.push_line(*quad, text);
        }
        page.blocks.push(block);
    }
    Ok(page)
}

fn line_chunks(
    image: &RgbImage,
    mask: &GrayImage,
    quad: &LineQuad,
    vertical: bool,
    config: &PipelineConfig,
) -> Result<Segmentation, LineError> {
    let crop = extract_line(image, quad, vertical, config.text_height)?;
    let max_ratio = config.max_ratio(vertical);
    if !chunk::exceeds_ratio(crop.width(), crop.height(), max_ratio) {
        return Ok(Segmentation::whole(crop));
    }
    let line_mask = extract_line(mask, quad, vertical, config.text_height)?;
    segment_line(&crop, &line_mask, max_ratio, config.anchor_window)
}

/// Decodes page bytes to RGB, rejecting non-images and animations.
pub fn decode_page(bytes: &[u8]) -> Result<RgbImage, PageError> {
    match infer::get(bytes) {
        None => return Err(PageError::invalid_image("unrecognized file content")),
        Some(kind) if kind.matcher_type() != infer::MatcherType::Image => {
            return Err(PageError::invalid_image(format!(
                "not an image ({})",
                kind.mime_type()
            )));
        }
        Some(kind) if kind.mime_type() == "image/gif" => {
            return Err(PageError::invalid_image("animation files are not supported"));
        }
        Some(kind) if kind.mime_type() == "image/avif" => {
            return Err(PageError::invalid_image("AVIF pages are not supported"));
        }
        Some(_) => {}
    }
    let image = image::load_from_memory(bytes)
        .map_err(|err| PageError::invalid_image(err.to_string()))?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PageError::invalid_image("image has no pixels"));
    }
    Ok(image.to_rgb8())
}
