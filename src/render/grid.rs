use crate::error::{Result, TvError};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use itertools::iproduct;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Figure size in pixels, excluding any viewer chrome.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FigSize {
    pub height: u32,
    pub width: u32,
}
impl FigSize {
    pub fn new(height: u32, width: u32) -> Self { Self { height, width } }
}
impl Default for FigSize {
    fn default() -> Self { Self::new(512, 512) }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridShape {
    pub rows: u32,
    pub cols: u32,
}

/// How a slice is fitted into its tile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// keep the aspect ratio, pad the remainder with the background color
    #[default]
    Pad,
    Stretch,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Resample {
    #[default]
    Nearest,
    Bilinear,
}
impl Resample {
    fn filter(&self) -> FilterType {
        match self {
            Resample::Nearest => FilterType::Nearest,
            Resample::Bilinear => FilterType::Triangle,
        }
    }
}

/// Order in which (batch, depth) slices fill the grid cells row by row.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CellOrder {
    /// depth slices run left to right, one batch after the other
    #[default]
    BatchMajor,
    /// batches run left to right, one depth slice after the other
    DepthMajor,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LayoutOptions {
    pub figsize: FigSize,
    /// `None` uses rows = Batch, cols = Depth
    pub grid: Option<GridShape>,
    /// gap between tiles in pixels
    pub spacing: u32,
    pub background: [u8; 3],
    pub fit: Fit,
    pub resample: Resample,
    pub order: CellOrder,
}
impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            figsize: FigSize::default(),
            grid: None,
            spacing: 0,
            background: [0, 0, 0],
            fit: Fit::Pad,
            resample: Resample::Nearest,
            order: CellOrder::BatchMajor,
        }
    }
}

/// Pixel geometry of a canvas. Depends only on figure size, grid shape and spacing.
///
/// Tiles are sized by integer division, so the canvas can come out a few pixels smaller
/// than the figure size; the leftover pixels are dropped rather than padded.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub rows: u32,
    pub cols: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub spacing: u32,
}
impl Geometry {
    pub fn compute(figsize: FigSize, grid: GridShape, spacing: u32) -> Result<Self> {
        if grid.rows == 0 || grid.cols == 0 {
            return Err(TvError::Layout(format!("grid {}x{} has no cells", grid.rows, grid.cols)));
        }
        let tile = |extent: u32, cells: u32, what: &str| {
            let gaps = spacing.saturating_mul(cells - 1);
            match extent.checked_sub(gaps).map(|free| free / cells) {
                Some(t) if t > 0 => Ok(t),
                _ => Err(TvError::Layout(format!(
                    "figure {} of {}px is too small for {} tiles with spacing {}",
                    what, extent, cells, spacing
                ))),
            }
        };
        Ok(Self {
            rows: grid.rows,
            cols: grid.cols,
            tile_width: tile(figsize.width, grid.cols, "width")?,
            tile_height: tile(figsize.height, grid.rows, "height")?,
            spacing,
        })
    }
    pub fn width(&self) -> u32 { self.tile_width * self.cols + self.spacing * (self.cols - 1) }
    pub fn height(&self) -> u32 { self.tile_height * self.rows + self.spacing * (self.rows - 1) }
    /// top left corner of cell `index` (row-major)
    pub fn cell_origin(&self, index: u32) -> (u32, u32) {
        let (row, col) = (index / self.cols, index % self.cols);
        (col * (self.tile_width + self.spacing), row * (self.tile_height + self.spacing))
    }
}

/// The unit of display sent to the viewer.
#[derive(derive_more::Debug, Clone, PartialEq)]
pub struct Canvas {
    #[debug(skip)]
    pub image: RgbImage,
    pub geometry: Geometry,
}
impl Canvas {
    pub fn width(&self) -> u32 { self.image.width() }
    pub fn height(&self) -> u32 { self.image.height() }
    /// Copy of the tile area of cell `index`
    pub fn tile(&self, index: u32) -> RgbImage {
        let (x, y) = self.geometry.cell_origin(index);
        imageops::crop_imm(&self.image, x, y, self.geometry.tile_width, self.geometry.tile_height).to_image()
    }
}

fn fit_into(slice: &RgbImage, tile_w: u32, tile_h: u32, options: &LayoutOptions) -> RgbImage {
    let (w, h) = slice.dimensions();
    let (new_w, new_h) = match options.fit {
        Fit::Stretch => (tile_w, tile_h),
        Fit::Pad => {
            let scale = (tile_w as f64 / w as f64).min(tile_h as f64 / h as f64);
            (
                ((w as f64 * scale).round() as u32).clamp(1, tile_w),
                ((h as f64 * scale).round() as u32).clamp(1, tile_h),
            )
        }
    };
    if (new_w, new_h) == (w, h) {
        slice.clone()
    } else {
        imageops::resize(slice, new_w, new_h, options.resample.filter())
    }
}

/// Tiles the per-slice composites (row-major over (batch, depth)) into one canvas.
pub fn layout(composites: &[RgbImage], batch: usize, depth: usize, options: &LayoutOptions) -> Result<Canvas> {
    let count = batch * depth;
    if count == 0 {
        return Err(TvError::Layout(format!("nothing to lay out for B={} D={}", batch, depth)));
    }
    if composites.len() != count {
        return Err(TvError::Layout(format!(
            "expected {} slices for B={} D={}, got {}",
            count,
            batch,
            depth,
            composites.len()
        )));
    }
    let grid = options.grid.unwrap_or(GridShape {
        rows: batch as u32,
        cols: depth as u32,
    });
    if (grid.rows as usize) * (grid.cols as usize) < count {
        return Err(TvError::Layout(format!(
            "grid {}x{} cannot hold {} slices",
            grid.rows, grid.cols, count
        )));
    }
    let geometry = Geometry::compute(options.figsize, grid, options.spacing)?;

    // cell number -> slice index
    let order: Vec<usize> = match options.order {
        CellOrder::BatchMajor => iproduct!(0..batch, 0..depth).map(|(b, d)| b * depth + d).collect(),
        CellOrder::DepthMajor => iproduct!(0..depth, 0..batch).map(|(d, b)| b * depth + d).collect(),
    };
    let tiles: Vec<RgbImage> = order
        .par_iter()
        .map(|idx| fit_into(&composites[*idx], geometry.tile_width, geometry.tile_height, options))
        .collect();

    let mut image = RgbImage::from_pixel(geometry.width(), geometry.height(), Rgb(options.background));
    for (cell, tile) in tiles.iter().enumerate() {
        let (x, y) = geometry.cell_origin(cell as u32);
        let dx = (geometry.tile_width - tile.width()) / 2;
        let dy = (geometry.tile_height - tile.height()) / 2;
        imageops::replace(&mut image, tile, (x + dx) as i64, (y + dy) as i64);
    }
    Ok(Canvas { image, geometry })
}
