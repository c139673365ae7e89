mod window;

pub use window::{Window, WindowPreset};

use crate::error::{Result, TvError};
use image::{Rgb, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Float32,
    Float64,
}
impl DType {
    /// numpy style name, as sent by array producers
    pub fn name(&self) -> &'static str {
        match self {
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "uint8" => DType::Uint8,
            "uint16" => DType::Uint16,
            "uint32" => DType::Uint32,
            "int8" => DType::Int8,
            "int16" => DType::Int16,
            "int32" => DType::Int32,
            "float32" => DType::Float32,
            "float64" => DType::Float64,
            other => {
                return Err(TvError::Dtype(format!(
                    "unsupported dtype '{}', expected a real numeric type of at most 32 bit integers or floats",
                    other
                )))
            }
        })
    }
    pub fn size(&self) -> usize {
        match self {
            DType::Uint8 | DType::Int8 => 1,
            DType::Uint16 | DType::Int16 => 2,
            DType::Uint32 | DType::Int32 | DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }
    pub fn is_float(&self) -> bool { matches!(self, DType::Float32 | DType::Float64) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}
impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(v) => v.len(),
            TensorData::U16(v) => v.len(),
            TensorData::U32(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::I16(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
        }
    }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::U8(_) => DType::Uint8,
            TensorData::U16(_) => DType::Uint16,
            TensorData::U32(_) => DType::Uint32,
            TensorData::I8(_) => DType::Int8,
            TensorData::I16(_) => DType::Int16,
            TensorData::I32(_) => DType::Int32,
            TensorData::F32(_) => DType::Float32,
            TensorData::F64(_) => DType::Float64,
        }
    }
    #[inline]
    pub fn get(&self, idx: usize) -> f64 {
        match self {
            TensorData::U8(v) => v[idx] as f64,
            TensorData::U16(v) => v[idx] as f64,
            TensorData::U32(v) => v[idx] as f64,
            TensorData::I8(v) => v[idx] as f64,
            TensorData::I16(v) => v[idx] as f64,
            TensorData::I32(v) => v[idx] as f64,
            TensorData::F32(v) => v[idx] as f64,
            TensorData::F64(v) => v[idx],
        }
    }
    fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Self {
        fn decode<const N: usize, T>(bytes: &[u8], f: fn([u8; N]) -> T) -> Vec<T> {
            bytes
                .chunks_exact(N)
                .map(|c| {
                    let mut buf = [0u8; N];
                    buf.copy_from_slice(c);
                    f(buf)
                })
                .collect()
        }
        match dtype {
            DType::Uint8 => TensorData::U8(bytes.to_vec()),
            DType::Int8 => TensorData::I8(bytes.iter().map(|b| *b as i8).collect()),
            DType::Uint16 => TensorData::U16(decode(bytes, u16::from_le_bytes)),
            DType::Int16 => TensorData::I16(decode(bytes, i16::from_le_bytes)),
            DType::Uint32 => TensorData::U32(decode(bytes, u32::from_le_bytes)),
            DType::Int32 => TensorData::I32(decode(bytes, i32::from_le_bytes)),
            DType::Float32 => TensorData::F32(decode(bytes, f32::from_le_bytes)),
            DType::Float64 => TensorData::F64(decode(bytes, f64::from_le_bytes)),
        }
    }
}

macro_rules! tensor_data_from {
    ($($t:ty => $variant:ident),*) => {
        $(impl From<Vec<$t>> for TensorData {
            fn from(value: Vec<$t>) -> Self { TensorData::$variant(value) }
        })*
    };
}
tensor_data_from!(u8 => U8, u16 => U16, u32 => U32, i8 => I8, i16 => I16, i32 => I32, f32 => F32, f64 => F64);

/// Caller supplied n-dimensional array in row-major order. Never mutated by rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}
impl Tensor {
    pub fn new(shape: Vec<usize>, data: impl Into<TensorData>) -> Result<Self> {
        let data = data.into();
        let Some(expected) = shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d)) else {
            return Err(TvError::Shape(format!("shape {:?} has more elements than fit in memory", shape)));
        };
        if expected != data.len() {
            return Err(TvError::Shape(format!(
                "shape {:?} needs {} elements but {} were given",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }
    /// Decodes little-endian raw element bytes, e.g. the output of numpy's `tobytes()`.
    pub fn from_bytes(shape: Vec<usize>, dtype: &str, bytes: &[u8]) -> Result<Self> {
        let dtype = DType::from_name(dtype)?;
        if bytes.len() % dtype.size() != 0 {
            return Err(TvError::Shape(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype.name()
            )));
        }
        Self::new(shape, TensorData::from_le_bytes(dtype, bytes))
    }

    pub fn shape(&self) -> &[usize] { &self.shape }
    pub fn data(&self) -> &TensorData { &self.data }
    pub fn dtype(&self) -> DType { self.data.dtype() }
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// (min, max) over the whole array; None only for an empty array.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        (0..self.len())
            .into_par_iter()
            .map(|i| {
                let v = self.data.get(i);
                (v, v)
            })
            .reduce_with(|a, b| (a.0.min(b.0), a.1.max(b.1)))
    }

    fn check_finite(&self) -> Result<()> {
        if !self.dtype().is_float() {
            return Ok(());
        }
        match (0..self.len()).into_par_iter().find_any(|i| !self.data.get(*i).is_finite()) {
            Some(i) => Err(TvError::Dtype(format!(
                "element {} is {}, only finite real values can be displayed",
                i,
                self.data.get(i)
            ))),
            None => Ok(()),
        }
    }
}

/// Canonical (Batch, Depth, Height, Width, Channels) extent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape5 {
    pub batch: usize,
    pub depth: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}
impl Shape5 {
    pub fn slices(&self) -> usize { self.batch * self.depth }
    pub fn slice_len(&self) -> usize { self.height * self.width * self.channels }
    pub fn bdhw(&self) -> [usize; 4] { [self.batch, self.depth, self.height, self.width] }
    /// Row-major slice number of (b, d)
    pub fn slice_index(&self, b: usize, d: usize) -> usize { b * self.depth + d }
}

/// Maps an input shape onto (B,D,H,W,C).
///
/// | rank | input       | result      |
/// |------|-------------|-------------|
/// | 2    | (H,W)       | (1,1,H,W,1) |
/// | 3    | (H,W,C)     | (1,1,H,W,C) |
/// | 4    | (B,H,W,C)   | (B,1,H,W,C) |
/// | 5    | (B,D,H,W,C) | unchanged   |
///
/// For ranks 3 to 5 the trailing dimension is Channels and must be 1 or 3.
pub fn infer_shape(dims: &[usize]) -> Result<Shape5> {
    let (batch, depth, height, width, channels) = match *dims {
        [h, w] => (1, 1, h, w, 1),
        [h, w, c] => (1, 1, h, w, c),
        [b, h, w, c] => (b, 1, h, w, c),
        [b, d, h, w, c] => (b, d, h, w, c),
        _ => {
            return Err(TvError::Shape(format!(
                "arrays of rank 2 to 5 are supported [BxDxHxWxC], got rank {} {:?}",
                dims.len(),
                dims
            )))
        }
    };
    if channels != 1 && channels != 3 {
        return Err(TvError::Shape(format!(
            "trailing channel dimension must be 1 or 3, got {} in {:?}",
            channels, dims
        )));
    }
    if dims.iter().any(|d| *d == 0) {
        return Err(TvError::Shape(format!("all dimensions must be positive, got {:?}", dims)));
    }
    Ok(Shape5 {
        batch,
        depth,
        height,
        width,
        channels,
    })
}

/// How a tensor is going to be displayed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Role {
    /// Continuous intensities, windowed into 0..=255. `None` uses [min, max] of the whole array.
    Image { window: Option<Window> },
    /// Categorical label ids, displayed through the segmentation palette.
    Labels,
}

#[derive(derive_more::Debug, Clone, PartialEq)]
pub struct IntensityVolume {
    pub shape: Shape5,
    pub window: Window,
    #[debug(skip)]
    data: Vec<u8>,
}
impl IntensityVolume {
    /// (H,W,C) display values of slice (b, d)
    pub fn slice(&self, b: usize, d: usize) -> &[u8] {
        let len = self.shape.slice_len();
        let start = self.shape.slice_index(b, d) * len;
        &self.data[start..start + len]
    }
    /// (H,W,3) image of slice (b, d); single channel data is broadcast to gray.
    pub fn image(&self, b: usize, d: usize) -> RgbImage {
        let slice = self.slice(b, d);
        let channels = self.shape.channels;
        RgbImage::from_fn(self.shape.width as u32, self.shape.height as u32, |x, y| {
            let off = (y as usize * self.shape.width + x as usize) * channels;
            if channels == 3 {
                Rgb([slice[off], slice[off + 1], slice[off + 2]])
            } else {
                Rgb([slice[off]; 3])
            }
        })
    }
}

#[derive(derive_more::Debug, Clone, PartialEq)]
pub struct LabelVolume {
    pub shape: Shape5,
    #[debug(skip)]
    data: Vec<u32>,
}
impl LabelVolume {
    /// (H,W) label ids of slice (b, d)
    pub fn slice(&self, b: usize, d: usize) -> &[u32] {
        let len = self.shape.slice_len();
        let start = self.shape.slice_index(b, d) * len;
        &self.data[start..start + len]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Intensity(IntensityVolume),
    Labels(LabelVolume),
}
impl Normalized {
    pub fn shape(&self) -> Shape5 {
        match self {
            Normalized::Intensity(v) => v.shape,
            Normalized::Labels(v) => v.shape,
        }
    }
}

/// Validates `tensor` and converts it into display values. The input is left untouched.
pub fn normalize(tensor: &Tensor, role: Role) -> Result<Normalized> {
    let shape = infer_shape(tensor.shape())?;
    tensor.check_finite()?;
    let values = tensor.data();

    match role {
        Role::Image { window } => {
            let window = match window {
                // windows built from the public fields skip `Window::new`
                Some(window) => Window::new(window.low, window.high)?,
                None => {
                    let (low, high) = tensor.min_max().unwrap_or((0.0, 0.0));
                    Window { low, high }
                }
            };
            let data = (0..tensor.len())
                .into_par_iter()
                .map(|i| window.scale(values.get(i)))
                .collect();
            Ok(Normalized::Intensity(IntensityVolume { shape, window, data }))
        }
        Role::Labels => {
            if shape.channels != 1 {
                return Err(TvError::Shape(format!(
                    "label maps must have a single channel, got {}",
                    shape.channels
                )));
            }
            let data = (0..tensor.len())
                .into_par_iter()
                .map(|i| {
                    let v = values.get(i);
                    if v.fract() != 0.0 || v < 0.0 || v > u32::MAX as f64 {
                        Err(TvError::Value(format!(
                            "segmentation labels must be non-negative integers, element {} is {}",
                            i, v
                        )))
                    } else {
                        Ok(v as u32)
                    }
                })
                .collect::<Result<Vec<u32>>>()?;
            Ok(Normalized::Labels(LabelVolume { shape, data }))
        }
    }
}
