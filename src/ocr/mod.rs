mod engine;

use image::{GrayImage, RgbImage};

use crate::page::{BoxXyxy, LineQuad};

pub use engine::{
    CommandDetector, OcrModels, PageOcr, PipelineConfig, Segmentation, TesseractRecognizer,
    assemble, decode_page, extract_line, list_tesseract_languages, normalize_punctuation,
    recognize_chunks, segment_line,
};

/// One region reported by the text detector, before recognition.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct DetectedBlock {
    pub xyxy: BoxXyxy,
    pub vertical: bool,
    pub font_size: f32,
    /// Reading order as produced by the detector.
    pub lines: Vec<LineQuad>,
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub text_mask: GrayImage,
    /// Same size as the page; brighter pixels are more likely ink.
    pub refined_mask: GrayImage,
    pub blocks: Vec<DetectedBlock>,
}

/// Locates text blocks and their lines on a page.
///
/// Implementations hold model state for the whole run and are called once per
/// page, never concurrently.
pub trait Detector {
    fn detect(&self, image: &RgbImage) -> anyhow::Result<Detection>;

    fn version(&self) -> String;
}

/// Reads the text of a single line crop.
///
/// `vertical` is the orientation of the line the crop came from; crops of
/// vertical lines arrive upright.
pub trait Recognizer {
    fn recognize(&self, image: &RgbImage, vertical: bool) -> anyhow::Result<String>;

    fn version(&self) -> String;
}
