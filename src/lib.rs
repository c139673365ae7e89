#![warn(clippy::all, rust_2018_idioms)]

pub mod axes;
pub mod config;
pub mod error;
pub mod render;
pub mod tensor;
pub mod viewer;

#[cfg(test)]
mod tests;

pub use axes::{imshow, show, Axes, ImshowOptions, ShowOptions, ToTensor};
pub use config::Config;
pub use error::{Result, TvError};
pub use render::{Canvas, Colormap, FigSize, LayoutOptions};
pub use tensor::{Tensor, Window, WindowPreset};
pub use viewer::{Metadata, PlotHandle, Session, ViewerServer};
