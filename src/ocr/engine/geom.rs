use image::{ImageBuffer, Pixel, imageops};
use imageproc::definitions::Clamp;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};

use crate::error::LineError;
use crate::page::LineQuad;

type Raster<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// Longest accepted line, as length over thickness. Bounds a crop to
/// `MAX_ELONGATION * target_height` pixels along the line.
const MAX_ELONGATION: f32 = 512.0;
const MAX_CROP_PIXELS: u64 = 1 << 26;

/// Warps one line out of `source` into a crop exactly `target_height` pixels tall.
///
/// Works on any pixel type so the page and its text mask can be cut with the
/// same mapping. Vertical lines are warped upright and then turned 90°
/// counter-clockwise, so the returned crop always runs left to right.
pub fn extract_line<P>(
    source: &Raster<P>,
    quad: &LineQuad,
    vertical: bool,
    target_height: u32,
) -> Result<Raster<P>, LineError>
where
    P: Pixel + Send + Sync + 'static,
    P::Subpixel: Send + Sync + Into<f32> + Clamp<f32>,
{
    if target_height == 0 {
        return Err(LineError::geometry("target height is zero"));
    }
    let corners = quad.map(|[x, y]| (x as f32, y as f32));
    if corners.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(LineError::geometry("non-finite corner"));
    }

    let top = midpoint(corners[0], corners[1]);
    let right = midpoint(corners[1], corners[2]);
    let bottom = midpoint(corners[2], corners[3]);
    let left = midpoint(corners[3], corners[0]);
    let extent_v = distance(top, bottom);
    let extent_h = distance(left, right);
    if extent_v < 1.0 || extent_h < 1.0 {
        return Err(LineError::geometry(format!(
            "line is {extent_h:.2}x{extent_v:.2}, under one pixel across"
        )));
    }
    let ratio = extent_v / extent_h;
    let elongation = ratio.max(ratio.recip());
    if elongation > MAX_ELONGATION {
        return Err(LineError::geometry(format!(
            "line is {elongation:.0} times longer than tall"
        )));
    }

    let (width, height) = if vertical {
        (target_height, (target_height as f32 * ratio).round() as u32)
    } else {
        ((target_height as f32 / ratio).round() as u32, target_height)
    };
    if u64::from(width) * u64::from(height) > MAX_CROP_PIXELS {
        return Err(LineError::geometry(format!(
            "line crop of {width}x{height} is too large"
        )));
    }
    if width < 2 || height < 2 {
        return Err(LineError::geometry(format!(
            "line collapses to {width}x{height}"
        )));
    }

    let right_x = (width - 1) as f32;
    let bottom_y = (height - 1) as f32;
    let target = [(0.0, 0.0), (right_x, 0.0), (right_x, bottom_y), (0.0, bottom_y)];
    let projection = Projection::from_control_points(corners, target)
        .ok_or_else(|| LineError::geometry("corners admit no perspective mapping"))?;

    let mut crop: Raster<P> = ImageBuffer::new(width, height);
    // fresh buffers are zero-filled; reuse that pixel as the border value
    let border = *crop.get_pixel(0, 0);
    warp_into(source, &projection, Interpolation::Bilinear, border, &mut crop);

    if vertical {
        Ok(imageops::rotate270(&crop))
    } else {
        Ok(crop)
    }
}

fn midpoint(a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
    ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> LineQuad {
        [[x0, y0], [x1, y0], [x1, y1], [x0, y1]]
    }

    #[test]
    fn horizontal_line_keeps_aspect_at_target_height() {
        let page = RgbImage::from_pixel(800, 200, Rgb([255, 255, 255]));
        let crop = extract_line(&page, &rect(100.0, 50.0, 500.0, 82.0), false, 64).expect("crop");
        assert_eq!(crop.height(), 64);
        assert_eq!(crop.width(), 800);
    }

    #[test]
    fn vertical_line_is_turned_horizontal() {
        let page = RgbImage::from_pixel(400, 900, Rgb([255, 255, 255]));
        let crop = extract_line(&page, &rect(300.0, 100.0, 340.0, 740.0), true, 64).expect("crop");
        assert_eq!(crop.height(), 64);
        assert_eq!(crop.width(), 1024);
    }

    #[test]
    fn mask_and_page_crops_align() {
        let page = RgbImage::from_pixel(600, 300, Rgb([10, 20, 30]));
        let mask = GrayImage::from_pixel(600, 300, Luma([200]));
        let quad = [[50.0, 40.0], [410.0, 52.0], [408.0, 100.0], [48.0, 88.0]];
        let page_crop = extract_line(&page, &quad, false, 48).expect("page crop");
        let mask_crop = extract_line(&mask, &quad, false, 48).expect("mask crop");
        assert_eq!(page_crop.dimensions(), mask_crop.dimensions());
        let (w, h) = page_crop.dimensions();
        let near = |got: u8, want: u8| got.abs_diff(want) <= 1;
        assert!(near(mask_crop.get_pixel(w / 2, h / 2)[0], 200));
        let Rgb([r, g, b]) = *page_crop.get_pixel(w / 2, h / 2);
        assert!(near(r, 10) && near(g, 20) && near(b, 30));
    }

    #[test]
    fn copies_source_pixels_for_axis_aligned_line() {
        let mut page = GrayImage::new(200, 100);
        for (x, _, pixel) in page.enumerate_pixels_mut() {
            pixel[0] = if x < 100 { 0 } else { 255 };
        }
        let crop = extract_line(&page, &rect(0.0, 0.0, 199.0, 63.0), false, 64).expect("crop");
        assert_eq!(crop.get_pixel(10, 30)[0], 0);
        assert!(crop.get_pixel(190, 30)[0] >= 254);
    }

    #[test]
    fn sub_pixel_sliver_is_invalid_geometry() {
        let page = RgbImage::new(200, 50);
        let sliver = [[0.0, 10.0], [100.0, 10.0], [100.0, 10.000001], [0.0, 10.000001]];
        assert!(matches!(
            extract_line(&page, &sliver, false, 64),
            Err(LineError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            extract_line(&page, &sliver, true, 64),
            Err(LineError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn overlong_line_is_rejected_before_cropping() {
        let page = GrayImage::new(2000, 10);
        // 1800 long, 1.5 thick: would warp to a 76800 px wide crop
        let thread = rect(0.0, 2.0, 1800.0, 3.5);
        assert!(matches!(
            extract_line(&page, &thread, false, 64),
            Err(LineError::InvalidGeometry { .. })
        ));
        let long = rect(0.0, 0.0, 1800.0, 4.0);
        assert_eq!(extract_line(&page, &long, false, 64).expect("crop").width(), 28800);
        assert!(extract_line(&page, &long, false, 4096).is_err());
    }

    #[test]
    fn degenerate_quads_are_rejected() {
        let page = RgbImage::new(100, 100);
        let point = [[5.0, 5.0]; 4];
        assert!(matches!(
            extract_line(&page, &point, false, 64),
            Err(LineError::InvalidGeometry { .. })
        ));
        let flat = rect(10.0, 10.0, 90.0, 10.0);
        assert!(extract_line(&page, &flat, false, 64).is_err());
        let nan = [[f64::NAN, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        assert!(extract_line(&page, &nan, false, 64).is_err());
        assert!(extract_line(&page, &rect(0.0, 0.0, 50.0, 20.0), false, 0).is_err());
    }
}
