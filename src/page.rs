use serde::{Deserialize, Serialize};

/// Axis-aligned block box as `[x0, y0, x1, y1]` in page pixels.
pub type BoxXyxy = [i32; 4];

/// One text line as four corners: top-left, top-right, bottom-right, bottom-left.
pub type LineQuad = [[f64; 2]; 4];

/// The per-page result document stored under `_ocr/<page>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub img_width: u32,
    pub img_height: u32,
    pub blocks: Vec<Block>,
}

impl PageResult {
    pub fn empty(img_width: u32, img_height: u32) -> Self {
        Self {
            img_width,
            img_height,
            blocks: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// A detected text region with its recognised lines.
///
/// `lines_coords[i]` and `lines[i]` describe the same line; both keep the
/// detector's reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub uuid: String,
    #[serde(rename = "box")]
    pub bbox: BoxXyxy,
    pub vertical: bool,
    pub font_size: u32,
    pub lines_coords: Vec<LineQuad>,
    pub lines: Vec<String>,
}

impl Block {
    pub(crate) fn new(uuid: String, bbox: BoxXyxy, vertical: bool, font_size: u32) -> Self {
        Self {
            uuid,
            bbox,
            vertical,
            font_size,
            lines_coords: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub(crate) fn push_line(&mut self, quad: LineQuad, text: String) {
        self.lines_coords.push(quad);
        self.lines.push(text);
    }
}

/// Font sizes are stored as whole pixels; fractions are dropped, not rounded.
pub(crate) fn font_size_px(raw: f32) -> u32 {
    if raw.is_finite() && raw > 0.0 {
        raw.trunc() as u32
    } else {
        0
    }
}
