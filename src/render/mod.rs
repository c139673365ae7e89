mod colormap;
mod compositor;
mod grid;

pub use colormap::{alpha_byte, apply_intensity, apply_labels, label_rgba, Colormap, DEFAULT_SEG_ALPHA, SEG_PALETTE};
pub use compositor::{blend, composite};
pub use grid::{layout, Canvas, CellOrder, FigSize, Fit, Geometry, GridShape, LayoutOptions, Resample};

use crate::error::{Result, TvError};
use crate::tensor::{Normalized, Shape5};
use image::{RgbImage, RgbaImage};
use rayon::prelude::*;
use std::sync::Arc;

/// One `imshow` worth of data: a normalized tensor plus how to color it.
#[derive(Debug, Clone)]
pub struct Layer {
    source: Arc<Normalized>,
    cmap: Colormap,
    alpha: u8,
}
impl Layer {
    pub fn new(source: Normalized, cmap: Colormap, alpha: f32) -> Result<Self> {
        let alpha = alpha_byte(alpha)?;
        match (&source, cmap) {
            (Normalized::Labels(_), Colormap::Seg) => {}
            (Normalized::Labels(_), other) => {
                return Err(TvError::Value(format!(
                    "label maps can only be shown with 'seg', got '{}'",
                    other.name()
                )))
            }
            (Normalized::Intensity(_), Colormap::Seg) => {
                return Err(TvError::Value("'seg' needs a label map, not an intensity image".to_string()))
            }
            (Normalized::Intensity(v), cmap) if v.shape.channels == 3 && cmap != Colormap::Gray => {
                return Err(TvError::Value(format!(
                    "colormap '{}' applies to single channel images only",
                    cmap.name()
                )))
            }
            _ => {}
        }
        Ok(Self {
            source: Arc::new(source),
            cmap,
            alpha,
        })
    }

    pub fn shape(&self) -> Shape5 { self.source.shape() }
    pub fn cmap(&self) -> Colormap { self.cmap }
    pub fn alpha(&self) -> u8 { self.alpha }

    /// RGBA pixels of slice (b, d)
    pub fn rgba(&self, b: usize, d: usize) -> RgbaImage {
        match self.source.as_ref() {
            Normalized::Intensity(volume) => apply_intensity(volume, b, d, self.cmap, self.alpha),
            Normalized::Labels(labels) => apply_labels(labels, b, d, self.alpha),
        }
    }
}

/// Composites every (batch, depth) slice of `layers`, row-major, bottom layer first.
pub fn composite_slices(layers: &[Layer]) -> Result<Vec<RgbImage>> {
    let Some(first) = layers.first() else {
        return Err(TvError::Layout("no layers to render".to_string()));
    };
    let shape = first.shape();
    (0..shape.slices())
        .into_par_iter()
        .map(|i| {
            let (b, d) = (i / shape.depth, i % shape.depth);
            let stack: Vec<RgbaImage> = layers.iter().map(|l| l.rgba(b, d)).collect();
            composite(&stack)
        })
        .collect()
}

/// Pure function from a layer stack to the canvas shown by the viewer.
pub fn render(layers: &[Layer], options: &LayoutOptions) -> Result<Canvas> {
    let slices = composite_slices(layers)?;
    let shape = layers[0].shape();
    layout(&slices, shape.batch, shape.depth, options)
}
