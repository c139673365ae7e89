use crate::error::{Result, TvError};
use serde::{Deserialize, Serialize};

/// Intensity window `[low, high]` that is stretched onto the 0..=255 display range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub low: f64,
    pub high: f64,
}
impl Window {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() {
            return Err(TvError::Value(format!("window bounds must be finite, got [{}, {}]", low, high)));
        }
        if low > high {
            return Err(TvError::Value(format!("window low {} is above high {}", low, high)));
        }
        Ok(Self { low, high })
    }
    /// Radiology style window, e.g. center 40 / width 80 covers [0, 80].
    pub fn from_center_width(center: f64, width: f64) -> Result<Self> {
        if width < 0.0 {
            return Err(TvError::Value(format!("window width must not be negative, got {}", width)));
        }
        Self::new(center - width / 2.0, center + width / 2.0)
    }

    pub fn center(&self) -> f64 { (self.low + self.high) / 2.0 }
    pub fn width(&self) -> f64 { self.high - self.low }

    /// Maps a value into the display range. A degenerate window acts as a threshold at `low`.
    pub fn scale(&self, value: f64) -> u8 {
        if self.high <= self.low {
            return if value <= self.low { 0 } else { 255 };
        }
        let v = value.clamp(self.low, self.high);
        ((v - self.low) / (self.high - self.low) * 255.0).round() as u8
    }
}

/// Common CT viewing windows.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WindowPreset {
    SoftTissue,
    Brain,
    Lung,
    Bone,
    Liver,
    Abdomen,
    Mediastinum,
    Stroke,
    Subdural,
    Angio,
}
impl WindowPreset {
    pub const ALL: [WindowPreset; 10] = [
        Self::SoftTissue,
        Self::Brain,
        Self::Lung,
        Self::Bone,
        Self::Liver,
        Self::Abdomen,
        Self::Mediastinum,
        Self::Stroke,
        Self::Subdural,
        Self::Angio,
    ];

    /// (center, width) in Hounsfield units
    pub fn center_width(&self) -> (f64, f64) {
        match self {
            Self::SoftTissue => (50.0, 400.0),
            Self::Brain => (40.0, 80.0),
            Self::Lung => (-600.0, 1500.0),
            Self::Bone => (400.0, 1500.0),
            Self::Liver => (60.0, 150.0),
            Self::Abdomen => (40.0, 350.0),
            Self::Mediastinum => (40.0, 400.0),
            Self::Stroke => (35.0, 40.0),
            Self::Subdural => (100.0, 200.0),
            Self::Angio => (300.0, 600.0),
        }
    }
    pub fn window(&self) -> Window {
        let (center, width) = self.center_width();
        Window {
            low: center - width / 2.0,
            high: center + width / 2.0,
        }
    }
}
impl From<WindowPreset> for Window {
    fn from(value: WindowPreset) -> Self { value.window() }
}
