use std::borrow::Cow;

use image::{RgbImage, imageops};

use crate::error::PageError;
use crate::ocr::Recognizer;

/// Applied in order, once per line, after the chunk texts are joined.
const PUNCTUATION: [(&str, &str); 5] = [
    ("．．．", "⋯"),
    ("。。。", "⋯"),
    ("！！", "‼︎"),
    ("？！", "⁈"),
    ("！？", "⁉︎"),
];

pub fn normalize_punctuation(text: &str) -> String {
    PUNCTUATION
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Reads every chunk of one line and returns the joined, normalized text.
///
/// Chunks of vertical lines are turned 90° clockwise first, undoing the
/// rotation applied when the line was cropped.
pub fn recognize_chunks(
    recognizer: &dyn Recognizer,
    chunks: &[RgbImage],
    vertical: bool,
) -> Result<String, PageError> {
    let mut text = String::new();
    for chunk in chunks {
        let input: Cow<'_, RgbImage> = if vertical {
            Cow::Owned(imageops::rotate90(chunk))
        } else {
            Cow::Borrowed(chunk)
        };
        let part = recognizer
            .recognize(&input, vertical)
            .map_err(PageError::RecognizerFailure)?;
        text.push_str(&part);
    }
    Ok(normalize_punctuation(&text))
}
