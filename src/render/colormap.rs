use crate::error::{Result, TvError};
use crate::tensor::{IntensityVolume, LabelVolume};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Gray,
    Viridis,
    Magma,
    Hot,
    Bone,
    Jet,
    /// Categorical palette for segmentation label maps
    Seg,
}

type Stop = (f32, [u8; 3]);

const GRAY: &[Stop] = &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])];
const VIRIDIS: &[Stop] = &[
    (0.0, [68, 1, 84]),
    (0.25, [59, 82, 139]),
    (0.5, [33, 145, 140]),
    (0.75, [94, 201, 98]),
    (1.0, [253, 231, 37]),
];
const MAGMA: &[Stop] = &[
    (0.0, [0, 0, 4]),
    (0.25, [81, 18, 124]),
    (0.5, [183, 55, 121]),
    (0.75, [252, 137, 97]),
    (1.0, [252, 253, 191]),
];
const HOT: &[Stop] = &[
    (0.0, [0, 0, 0]),
    (0.375, [255, 0, 0]),
    (0.75, [255, 255, 0]),
    (1.0, [255, 255, 255]),
];
const BONE: &[Stop] = &[
    (0.0, [0, 0, 0]),
    (0.375, [84, 84, 116]),
    (0.75, [166, 198, 198]),
    (1.0, [255, 255, 255]),
];
const JET: &[Stop] = &[
    (0.0, [0, 0, 128]),
    (0.125, [0, 0, 255]),
    (0.375, [0, 255, 255]),
    (0.625, [255, 255, 0]),
    (0.875, [255, 0, 0]),
    (1.0, [128, 0, 0]),
];

/// Label `l > 0` is drawn with `SEG_PALETTE[(l - 1) % len]`.
pub const SEG_PALETTE: [[u8; 3]; 20] = [
    [255, 0, 0],
    [0, 255, 0],
    [255, 255, 0],
    [0, 0, 255],
    [255, 0, 255],
    [0, 255, 255],
    [255, 127, 14],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [188, 189, 34],
    [23, 190, 207],
    [31, 119, 180],
    [44, 160, 44],
    [214, 39, 40],
    [255, 187, 120],
    [152, 223, 138],
    [255, 152, 150],
    [197, 176, 213],
    [127, 127, 127],
];

pub const DEFAULT_SEG_ALPHA: f32 = 0.4;

fn interpolate(stops: &[Stop], t: f32) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    for pair in stops.windows(2) {
        let (p0, c0) = pair[0];
        let (p1, c1) = pair[1];
        if t <= p1 {
            let f = (t - p0) / (p1 - p0);
            let mut out = [0u8; 3];
            for i in 0..3 {
                out[i] = (c0[i] as f32 + (c1[i] as f32 - c0[i] as f32) * f).round() as u8;
            }
            return out;
        }
    }
    stops[stops.len() - 1].1
}

/// Layer opacity in [0, 1] as an alpha byte.
pub fn alpha_byte(alpha: f32) -> Result<u8> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(TvError::Value(format!("alpha must be within [0, 1], got {}", alpha)));
    }
    Ok((alpha * 255.0).round() as u8)
}

impl Colormap {
    pub const ALL: [Colormap; 7] = [
        Colormap::Gray,
        Colormap::Viridis,
        Colormap::Magma,
        Colormap::Hot,
        Colormap::Bone,
        Colormap::Jet,
        Colormap::Seg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Colormap::Gray => "gray",
            Colormap::Viridis => "viridis",
            Colormap::Magma => "magma",
            Colormap::Hot => "hot",
            Colormap::Bone => "bone",
            Colormap::Jet => "jet",
            Colormap::Seg => "seg",
        }
    }
    pub fn is_categorical(&self) -> bool { *self == Colormap::Seg }
    pub fn default_alpha(&self) -> f32 {
        if self.is_categorical() {
            DEFAULT_SEG_ALPHA
        } else {
            1.0
        }
    }

    fn stops(&self) -> &'static [Stop] {
        match self {
            Colormap::Gray | Colormap::Seg => GRAY,
            Colormap::Viridis => VIRIDIS,
            Colormap::Magma => MAGMA,
            Colormap::Hot => HOT,
            Colormap::Bone => BONE,
            Colormap::Jet => JET,
        }
    }

    /// Color of a display value (0 = window low, 255 = window high).
    pub fn rgb(&self, value: u8) -> [u8; 3] {
        match self {
            Colormap::Gray => [value; 3],
            _ => interpolate(self.stops(), value as f32 / 255.0),
        }
    }
    pub fn rgba(&self, value: u8, alpha: u8) -> Rgba<u8> {
        let [r, g, b] = self.rgb(value);
        Rgba([r, g, b, alpha])
    }
}

impl FromStr for Colormap {
    type Err = TvError;

    fn from_str(s: &str) -> Result<Self> {
        Colormap::ALL
            .into_iter()
            .find(|c| c.name() == s || (s == "grey" && *c == Colormap::Gray))
            .ok_or_else(|| {
                TvError::Value(format!(
                    "colormap '{}' is not supported, use one of {}",
                    s,
                    Colormap::ALL.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

/// Color of a segmentation label; label 0 is background and fully transparent.
pub fn label_rgba(label: u32, alpha: u8) -> Rgba<u8> {
    if label == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    let [r, g, b] = SEG_PALETTE[(label as usize - 1) % SEG_PALETTE.len()];
    Rgba([r, g, b, alpha])
}

/// RGBA layer for slice (b, d) of an intensity volume.
pub fn apply_intensity(volume: &IntensityVolume, b: usize, d: usize, cmap: Colormap, alpha: u8) -> RgbaImage {
    let slice = volume.slice(b, d);
    let shape = volume.shape;
    RgbaImage::from_fn(shape.width as u32, shape.height as u32, |x, y| {
        let off = (y as usize * shape.width + x as usize) * shape.channels;
        if shape.channels == 3 {
            Rgba([slice[off], slice[off + 1], slice[off + 2], alpha])
        } else {
            cmap.rgba(slice[off], alpha)
        }
    })
}

/// RGBA layer for slice (b, d) of a label map.
pub fn apply_labels(labels: &LabelVolume, b: usize, d: usize, alpha: u8) -> RgbaImage {
    let slice = labels.slice(b, d);
    let shape = labels.shape;
    RgbaImage::from_fn(shape.width as u32, shape.height as u32, |x, y| {
        label_rgba(slice[y as usize * shape.width + x as usize], alpha)
    })
}
