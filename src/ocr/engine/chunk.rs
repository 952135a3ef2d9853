use image::{GrayImage, RgbImage, imageops};

use crate::error::LineError;

/// A line crop cut into pieces short enough for the recognizer.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub chunks: Vec<RgbImage>,
    /// Columns of the original crop where each chunk after the first begins.
    pub cut_points: Vec<u32>,
}

impl Segmentation {
    pub(crate) fn whole(crop: RgbImage) -> Self {
        Self {
            chunks: vec![crop],
            cut_points: Vec::new(),
        }
    }

    fn split(crop: &RgbImage, cut_points: Vec<u32>) -> Self {
        let (width, height) = crop.dimensions();
        let edges: Vec<u32> = std::iter::once(0)
            .chain(cut_points.iter().copied())
            .chain(std::iter::once(width))
            .collect();
        let chunks = edges
            .windows(2)
            .map(|pair| imageops::crop_imm(crop, pair[0], 0, pair[1] - pair[0], height).to_image())
            .collect();
        Self { chunks, cut_points }
    }
}

/// Returns true when a `width` x `height` crop is longer than `max_ratio` allows.
pub(crate) fn exceeds_ratio(width: u32, height: u32, max_ratio: f32) -> bool {
    max_ratio > 0.0 && height > 0 && width as f32 / height as f32 > max_ratio
}

/// Splits an overlong line crop at low-ink columns.
///
/// Crops within `max_ratio` come back whole. Longer crops are cut into
/// `ceil(ratio / max_ratio)` chunks: every evenly spaced anchor looks for the
/// emptiest column of the smoothed mask within `anchor_window * height`
/// pixels around it. Cuts are kept strictly increasing and no chunk is ever
/// wider than `max_ratio * height`.
pub fn segment_line(
    crop: &RgbImage,
    mask: &GrayImage,
    max_ratio: f32,
    anchor_window: u32,
) -> Result<Segmentation, LineError> {
    let (width, height) = crop.dimensions();
    if width == 0 || height == 0 {
        return Err(LineError::geometry("empty line crop"));
    }
    if !exceeds_ratio(width, height, max_ratio) {
        return Ok(Segmentation::whole(crop.clone()));
    }
    if mask.dimensions() != crop.dimensions() {
        return Err(LineError::MaskMismatch {
            crop_width: width,
            crop_height: height,
            mask_width: mask.width(),
            mask_height: mask.height(),
        });
    }

    let ratio = width as f32 / height as f32;
    let max_width = ((max_ratio * height as f32).floor() as u32).max(1);
    // integer widths can need one more chunk than the float ratio suggests
    let num_chunks = ((ratio / max_ratio).ceil() as u32)
        .max(width.div_ceil(max_width))
        .min(width);

    let density = density_profile(mask, height);
    let cut_points = find_cut_points(
        &density,
        CutPlan {
            width,
            num_chunks,
            max_width,
            window: anchor_window.saturating_mul(height),
        },
    );
    Ok(Segmentation::split(crop, cut_points))
}

struct CutPlan {
    width: u32,
    num_chunks: u32,
    max_width: u32,
    window: u32,
}

fn find_cut_points(density: &[f32], plan: CutPlan) -> Vec<u32> {
    let CutPlan {
        width,
        num_chunks,
        max_width,
        window,
    } = plan;
    let half = window / 2;
    let mut cuts = Vec::with_capacity(num_chunks.saturating_sub(1) as usize);
    let mut prev = 0u32;

    for i in 1..num_chunks {
        let anchor = (u64::from(i) * u64::from(width) / u64::from(num_chunks)) as u32;
        let remaining = num_chunks - i;
        // keep room for the remaining chunks, each 1..=max_width wide
        let lo = (prev + 1).max(width.saturating_sub(remaining.saturating_mul(max_width)));
        let hi = prev.saturating_add(max_width).min(width - remaining);

        let start = anchor.saturating_sub(half).max(lo);
        let end = anchor.saturating_add(half).min(width).min(hi + 1);
        let cut = if start < end {
            start + argmin(&density[start as usize..end as usize]) as u32
        } else {
            anchor.clamp(lo, hi)
        };
        cuts.push(cut);
        prev = cut;
    }
    cuts
}

/// Column ink sums smoothed with a Gaussian (length `2h`, sigma `h/8`) and
/// scaled into `[0, 1]`. An empty mask stays all zero.
fn density_profile(mask: &GrayImage, text_height: u32) -> Vec<f32> {
    let mut columns = vec![0f32; mask.width() as usize];
    for (x, _, pixel) in mask.enumerate_pixels() {
        columns[x as usize] += f32::from(pixel[0]);
    }

    let kernel = gaussian_window(2 * text_height as usize, text_height as f32 / 8.0);
    let mut smoothed = convolve_same(&columns, &kernel);
    let peak = smoothed.iter().copied().fold(0.0f32, f32::max);
    if peak > 0.0 {
        for value in &mut smoothed {
            *value /= peak;
        }
    }
    smoothed
}

fn gaussian_window(len: usize, sigma: f32) -> Vec<f32> {
    let center = (len as f32 - 1.0) / 2.0;
    (0..len)
        .map(|n| {
            let d = (n as f32 - center) / sigma;
            (-0.5 * d * d).exp()
        })
        .collect()
}

/// Discrete convolution trimmed to the signal's length, centred on the
/// kernel's `(len - 1) / 2` tap.
fn convolve_same(signal: &[f32], kernel: &[f32]) -> Vec<f32> {
    let offset = kernel.len().saturating_sub(1) / 2;
    (0..signal.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, weight)| {
                    (i + offset)
                        .checked_sub(k)
                        .and_then(|j| signal.get(j))
                        .map(|value| value * weight)
                })
                .sum::<f32>()
        })
        .collect()
}

/// Index of the first smallest value.
fn argmin(values: &[f32]) -> usize {
    let mut best = 0;
    for (idx, value) in values.iter().enumerate() {
        if *value < values[best] {
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn patterned_crop(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, ((x * 7 + y * 13) % 256) as u8])
        })
    }

    fn noisy_mask(width: u32, height: u32, seed: u32) -> GrayImage {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        GrayImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            Luma([(state % 256) as u8])
        })
    }

    fn widths(segmentation: &Segmentation) -> Vec<u32> {
        segmentation.chunks.iter().map(|chunk| chunk.width()).collect()
    }

    #[test]
    fn short_line_is_left_whole() {
        let crop = patterned_crop(400, 64);
        let mask = GrayImage::new(400, 64);
        let segmentation = segment_line(&crop, &mask, 8.0, 2).expect("segment");
        assert_eq!(segmentation.chunks.len(), 1);
        assert!(segmentation.cut_points.is_empty());
        assert_eq!(segmentation.chunks[0], crop);
    }

    #[test]
    fn line_at_the_bound_is_left_whole() {
        let crop = patterned_crop(512, 64);
        let segmentation = segment_line(&crop, &GrayImage::new(1, 1), 8.0, 2).expect("segment");
        assert_eq!(segmentation.chunks.len(), 1);
    }

    #[test]
    fn long_line_splits_into_eight() {
        let crop = patterned_crop(4096, 64);
        let mask = noisy_mask(4096, 64, 7);
        let segmentation = segment_line(&crop, &mask, 8.0, 2).expect("segment");
        assert_eq!(segmentation.cut_points.len(), 7);
        assert_eq!(segmentation.chunks.len(), 8);
        assert_eq!(widths(&segmentation).iter().sum::<u32>(), 4096);
    }

    #[test]
    fn chunks_reassemble_into_the_crop() {
        let crop = patterned_crop(2333, 48);
        let mask = noisy_mask(2333, 48, 3);
        let segmentation = segment_line(&crop, &mask, 8.0, 2).expect("segment");
        assert!(segmentation.chunks.len() > 1);

        let mut rebuilt = RgbImage::new(crop.width(), crop.height());
        let mut offset = 0;
        for chunk in &segmentation.chunks {
            imageops::replace(&mut rebuilt, chunk, i64::from(offset), 0);
            offset += chunk.width();
        }
        assert_eq!(offset, crop.width());
        assert_eq!(rebuilt, crop);
    }

    #[test]
    fn chunks_never_exceed_the_ratio() {
        let height = 64;
        let max_width = 8 * height;
        for (seed, width) in (513..=10 * max_width).step_by(97).enumerate() {
            let crop = patterned_crop(width, height);
            let mask = noisy_mask(width, height, seed as u32 + 1);
            let segmentation = segment_line(&crop, &mask, 8.0, 2).expect("segment");
            let chunk_widths = widths(&segmentation);
            assert!(
                chunk_widths.iter().all(|w| (1..=max_width).contains(w)),
                "width {width}: {chunk_widths:?}"
            );
            assert!(segmentation.cut_points.windows(2).all(|p| p[0] < p[1]));
            assert_eq!(chunk_widths.iter().sum::<u32>(), width);
        }
    }

    #[test]
    fn cuts_land_in_ink_gaps() {
        let (width, height) = (1400, 64);
        let mask = GrayImage::from_fn(width, height, |x, _| {
            let gap = (430..450).contains(&x) || (900..920).contains(&x);
            Luma([if gap { 0 } else { 255 }])
        });
        let segmentation =
            segment_line(&patterned_crop(width, height), &mask, 8.0, 2).expect("segment");
        assert_eq!(segmentation.cut_points.len(), 2);
        assert!((430..450).contains(&segmentation.cut_points[0]));
        assert!((900..920).contains(&segmentation.cut_points[1]));
    }

    #[test]
    fn empty_mask_still_yields_valid_cuts() {
        let crop = patterned_crop(1600, 64);
        let segmentation = segment_line(&crop, &GrayImage::new(1600, 64), 8.0, 2).expect("segment");
        assert_eq!(segmentation.chunks.len(), 4);
        assert_eq!(widths(&segmentation).iter().sum::<u32>(), 1600);
    }

    #[test]
    fn zero_window_falls_back_to_anchor() {
        let crop = patterned_crop(1024, 32);
        let mask = noisy_mask(1024, 32, 11);
        let segmentation = segment_line(&crop, &mask, 8.0, 0).expect("segment");
        assert_eq!(segmentation.cut_points, vec![256, 512, 768]);
    }

    #[test]
    fn mismatched_mask_is_a_line_error() {
        let crop = patterned_crop(1024, 32);
        let result = segment_line(&crop, &GrayImage::new(10, 10), 8.0, 2);
        assert!(matches!(result, Err(LineError::MaskMismatch { .. })));
    }

    #[test]
    fn gaussian_window_is_symmetric_and_peaks_in_the_middle() {
        let window = gaussian_window(128, 8.0);
        assert_eq!(window.len(), 128);
        for i in 0..64 {
            assert!((window[i] - window[127 - i]).abs() < 1e-6);
        }
        assert!(window[63] > 0.99 && window[0] < 1e-6);
    }

    #[test]
    fn convolve_same_matches_centred_full_convolution() {
        assert_eq!(convolve_same(&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.5]), vec![1.0, 2.5, 4.0]);
        assert_eq!(convolve_same(&[1.0, 2.0, 3.0], &[0.0, 1.0]), vec![0.0, 1.0, 2.0]);
    }
}
