use thiserror::Error;

#[derive(Error, Debug)]
pub enum TvError {
    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Dtype error: {0}")]
    Dtype(String),

    #[error("Shape mismatch: expected (B,D,H,W) = {expected:?} but got {actual:?}")]
    ShapeMismatch { expected: [usize; 4], actual: [usize; 4] },

    #[error("Size mismatch: layer {index} is {actual:?} (HxW), expected {expected:?}")]
    SizeMismatch {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Value error: {0}")]
    Value(String),

    #[error("Viewer channel is closed")]
    ChannelClosed,

    #[error("Viewer channel timed out after {0:?} while {1}")]
    ChannelTimeout(std::time::Duration, &'static str),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl TvError {
    /// Validation errors are raised before any network I/O happens.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TvError::Shape(_)
                | TvError::Dtype(_)
                | TvError::ShapeMismatch { .. }
                | TvError::SizeMismatch { .. }
                | TvError::Layout(_)
                | TvError::Value(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TvError>;
