//! Mask binarization.
//!
//! Source masks are often stored with lossy compression or anti-aliased
//! edges, which leaves intermediate values around class boundaries. Every
//! channel value above zero is collapsed to 255 so that color matching
//! against the class registry only ever sees strict 0/255 colors.

use image::RgbImage;

/// Value written for every non-zero channel.
pub const MASK_ON: u8 = 255;

/// Returns a binarized copy of `mask`.
pub fn binarize_mask(mask: &RgbImage) -> RgbImage {
    let mut out = mask.clone();
    binarize_mask_in_place(&mut out);
    out
}

/// Sets every channel value `> 0` to 255 and every other value to 0.
pub fn binarize_mask_in_place(mask: &mut RgbImage) {
    for value in mask.iter_mut() {
        *value = if *value > 0 { MASK_ON } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn sample_mask() -> RgbImage {
        RgbImage::from_fn(4, 3, |x, y| match (x + y) % 4 {
            0 => Rgb([0, 0, 0]),
            1 => Rgb([1, 0, 0]),
            2 => Rgb([200, 17, 0]),
            _ => Rgb([255, 255, 128]),
        })
    }

    #[test]
    fn output_only_contains_zero_or_255() {
        let out = binarize_mask(&sample_mask());
        assert!(out.iter().all(|&v| v == 0 || v == MASK_ON));
    }

    #[test]
    fn zero_pixels_stay_zero_and_others_saturate() {
        let mask = sample_mask();
        let out = binarize_mask(&mask);

        for (src, dst) in mask.pixels().zip(out.pixels()) {
            for (s, d) in src.0.iter().zip(dst.0) {
                assert_eq!(d, if *s > 0 { MASK_ON } else { 0 });
            }
        }
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(3, 0), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn binarization_is_idempotent() {
        let once = binarize_mask(&sample_mask());
        let twice = binarize_mask(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn keeps_dimensions() {
        let out = binarize_mask(&sample_mask());
        assert_eq!(out.dimensions(), (4, 3));
    }
}
