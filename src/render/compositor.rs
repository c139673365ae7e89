use crate::error::{Result, TvError};
use image::{Rgb, RgbImage, RgbaImage};

/// Blends `layers` back to front in the given order onto a black background.
///
/// Per channel: `out = (src * a + out * (255 - a) + 127) / 255` with `a` the layer's
/// alpha byte, so a fully opaque first layer is the base image and the last layer ends up
/// on top. All layers must have the same size.
pub fn composite(layers: &[RgbaImage]) -> Result<RgbImage> {
    let Some(first) = layers.first() else {
        return Err(TvError::Layout("nothing to composite".to_string()));
    };
    let (width, height) = first.dimensions();
    for (index, layer) in layers.iter().enumerate().skip(1) {
        if layer.dimensions() != (width, height) {
            let (w, h) = layer.dimensions();
            return Err(TvError::SizeMismatch {
                index,
                expected: (height, width),
                actual: (h, w),
            });
        }
    }

    let mut out = RgbImage::new(width, height);
    for layer in layers {
        for (dst, src) in out.pixels_mut().zip(layer.pixels()) {
            let a = src[3] as u32;
            if a == 0 {
                continue;
            }
            *dst = Rgb([
                blend(src[0], dst[0], a),
                blend(src[1], dst[1], a),
                blend(src[2], dst[2], a),
            ]);
        }
    }
    Ok(out)
}

#[inline]
pub fn blend(src: u8, dst: u8, alpha: u32) -> u8 {
    ((src as u32 * alpha + dst as u32 * (255 - alpha) + 127) / 255) as u8
}
