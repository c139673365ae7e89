use crate::config::Config;
use crate::error::{Result, TvError};
use crate::render::{self, Canvas, Colormap, FigSize, Fit, GridShape, Layer, LayoutOptions, Resample};
use crate::tensor::{infer_shape, normalize, Role, Tensor, Window};
use crate::viewer::{Metadata, PlotHandle, Session};
use log::debug;
use std::borrow::Cow;

/// Conversion hook for volume types that bring their own display hints, such as the voxel
/// spacing of an imaging volume.
pub trait ToTensor {
    fn to_tensor(&self) -> Result<(Cow<'_, Tensor>, Metadata)>;
}
impl ToTensor for Tensor {
    fn to_tensor(&self) -> Result<(Cow<'_, Tensor>, Metadata)> { Ok((Cow::Borrowed(self), Metadata::default())) }
}

/// Per-layer settings of `Axes::imshow`. Unset fields fall back to the axes defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImshowOptions {
    pub cmap: Option<Colormap>,
    pub alpha: Option<f32>,
    pub window: Option<Window>,
}
impl ImshowOptions {
    pub fn cmap(mut self, cmap: Colormap) -> Self {
        self.cmap = Some(cmap);
        self
    }
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = Some(alpha);
        self
    }
    pub fn window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }
    /// Label map overlay with the segmentation palette.
    pub fn seg() -> Self { Self::default().cmap(Colormap::Seg) }
}

/// A plot under construction: an ordered stack of layers over one (B, D) slice grid.
///
/// Layers are immutable once added; `render` is a pure function of them and the layout
/// options. The plot handle is assigned on the first `show` and kept for the lifetime of
/// the axes, so repeated shows update one view in place.
#[derive(Debug, Clone)]
pub struct Axes {
    layout: LayoutOptions,
    default_cmap: Colormap,
    metadata: Metadata,
    layers: Vec<Layer>,
    handle: Option<PlotHandle>,
}

impl Default for Axes {
    fn default() -> Self { Self::new(FigSize::default()) }
}

impl Axes {
    pub fn new(figsize: FigSize) -> Self {
        Self {
            layout: LayoutOptions {
                figsize,
                ..Default::default()
            },
            default_cmap: Colormap::Gray,
            metadata: Metadata::default(),
            layers: Vec::new(),
            handle: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut axes = Self::new(config.figsize);
        axes.default_cmap = config.cmap;
        axes
    }

    pub fn with_layout(mut self, layout: LayoutOptions) -> Self {
        self.layout = layout;
        self
    }
    pub fn with_figsize(mut self, figsize: FigSize) -> Self {
        self.layout.figsize = figsize;
        self
    }
    pub fn with_grid(mut self, rows: u32, cols: u32) -> Self {
        self.layout.grid = Some(GridShape { rows, cols });
        self
    }
    pub fn with_spacing(mut self, spacing: u32) -> Self {
        self.layout.spacing = spacing;
        self
    }
    pub fn with_background(mut self, background: [u8; 3]) -> Self {
        self.layout.background = background;
        self
    }
    pub fn with_fit(mut self, fit: Fit) -> Self {
        self.layout.fit = fit;
        self
    }
    pub fn with_resample(mut self, resample: Resample) -> Self {
        self.layout.resample = resample;
        self
    }
    /// colormap for single channel layers added without one
    pub fn with_default_cmap(mut self, cmap: Colormap) -> Self {
        self.default_cmap = cmap;
        self
    }

    /// Attaches hints that are forwarded with every frame of this plot.
    pub fn metadata(&mut self, metadata: Metadata) -> &mut Self {
        self.metadata = metadata;
        self
    }

    pub fn layout(&self) -> &LayoutOptions { &self.layout }
    pub fn layers(&self) -> &[Layer] { &self.layers }
    pub fn handle(&self) -> Option<PlotHandle> { self.handle }

    /// Drops all layers; the plot handle is kept.
    pub fn clear(&mut self) { self.layers.clear(); }

    /// Adds `tensor` as the new top layer.
    ///
    /// The first layer fixes the (B, D, H, W) extent of the plot and every later layer must
    /// match it. On error the axes are left as they were.
    pub fn imshow(&mut self, tensor: &Tensor, options: ImshowOptions) -> Result<&mut Self> {
        let shape = infer_shape(tensor.shape())?;
        if let Some(first) = self.layers.first() {
            let expected = first.shape().bdhw();
            if expected != shape.bdhw() {
                return Err(TvError::ShapeMismatch {
                    expected,
                    actual: shape.bdhw(),
                });
            }
        }

        let cmap = match options.cmap {
            Some(cmap) => cmap,
            None if shape.channels == 3 => Colormap::Gray,
            None => self.default_cmap,
        };
        let role = if cmap.is_categorical() {
            if options.window.is_some() {
                return Err(TvError::Value("a display window does not apply to 'seg' label maps".to_string()));
            }
            Role::Labels
        } else {
            Role::Image { window: options.window }
        };
        let alpha = options.alpha.unwrap_or_else(|| cmap.default_alpha());

        let layer = Layer::new(normalize(tensor, role)?, cmap, alpha)?;
        debug!(
            "Added layer {} ({}, alpha {}) of shape {:?}",
            self.layers.len(),
            cmap.name(),
            layer.alpha(),
            shape
        );
        self.layers.push(layer);
        Ok(self)
    }

    /// Like `imshow`, for any volume that converts itself into a tensor. Its hints fill
    /// the metadata fields not set on the axes.
    pub fn imshow_volume(&mut self, volume: &impl ToTensor, options: ImshowOptions) -> Result<&mut Self> {
        let (tensor, hints) = volume.to_tensor()?;
        self.imshow(&tensor, options)?;
        self.metadata.merge(hints);
        Ok(self)
    }

    pub fn render(&self) -> Result<Canvas> { render::render(&self.layers, &self.layout) }

    /// Renders the layers and shows them as this plot's current frame.
    pub async fn show(&mut self, session: &Session) -> Result<PlotHandle> {
        // everything that can fail on the data fails before the channel is touched
        let canvas = self.render()?;
        let handle = *self.handle.get_or_insert_with(|| session.new_handle());
        session.push(handle, &canvas, &self.metadata).await?;
        Ok(handle)
    }
}

/// Adds `tensor` to `axes`, or to fresh axes, and hands them back for further layers.
pub fn imshow(axes: Option<Axes>, tensor: &Tensor, options: ImshowOptions) -> Result<Axes> {
    let mut axes = axes.unwrap_or_default();
    axes.imshow(tensor, options)?;
    Ok(axes)
}

/// Settings of the one-shot `show`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShowOptions {
    pub cmap: Option<Colormap>,
    pub alpha: Option<f32>,
    pub window: Option<Window>,
    pub figsize: Option<FigSize>,
}

/// Shows a single tensor in a fresh plot.
pub async fn show(session: &Session, tensor: &Tensor, options: ShowOptions) -> Result<PlotHandle> {
    let mut axes = Axes::from_config(session.config());
    if let Some(figsize) = options.figsize {
        axes = axes.with_figsize(figsize);
    }
    axes.imshow(
        tensor,
        ImshowOptions {
            cmap: options.cmap,
            alpha: options.alpha,
            window: options.window,
        },
    )?;
    axes.show(session).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::alpha_byte;

    fn tensor(dims: &[usize], value: f32) -> Tensor {
        let n: usize = dims.iter().product();
        Tensor::new(dims.to_vec(), vec![value; n]).unwrap()
    }

    fn small() -> Axes { Axes::new(FigSize::new(16, 16)) }

    #[test]
    fn seg_layers_default_to_translucent() {
        let mut axes = small();
        axes.imshow(&tensor(&[4, 4], 3.0), ImshowOptions::default())
            .unwrap()
            .imshow(&tensor(&[4, 4], 1.0), ImshowOptions::seg())
            .unwrap();
        let layers = axes.layers();
        assert_eq!(layers.len(), 2);
        assert_eq!((layers[0].cmap(), layers[0].alpha()), (Colormap::Gray, 255));
        assert_eq!(layers[1].cmap(), Colormap::Seg);
        assert_eq!(layers[1].alpha(), alpha_byte(0.4).unwrap());
    }

    #[test]
    fn mismatched_overlay_leaves_axes_untouched() {
        let mut axes = small();
        axes.imshow(&tensor(&[2, 3, 4, 4, 1], 0.0), ImshowOptions::default()).unwrap();
        let err = axes
            .imshow(&tensor(&[2, 3, 4, 5, 1], 1.0), ImshowOptions::seg())
            .unwrap_err();
        match err {
            TvError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, [2, 3, 4, 4]);
                assert_eq!(actual, [2, 3, 4, 5]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(axes.layers().len(), 1);

        // channels may differ between layers
        axes.imshow(&tensor(&[2, 3, 4, 4, 3], 5.0), ImshowOptions::default().alpha(0.5))
            .unwrap();
        assert_eq!(axes.layers().len(), 2);
    }

    #[test]
    fn invalid_layers_are_rejected() {
        let mut axes = small();
        assert!(matches!(
            axes.imshow(&tensor(&[4, 4], 0.5), ImshowOptions::seg()),
            Err(TvError::Value(_))
        ));
        assert!(matches!(
            axes.imshow(&tensor(&[4, 4], 1.0), ImshowOptions::default().alpha(1.5)),
            Err(TvError::Value(_))
        ));
        assert!(matches!(
            axes.imshow(&tensor(&[4, 4, 2], 1.0), ImshowOptions::default()),
            Err(TvError::Shape(_))
        ));
        assert!(matches!(
            axes.imshow(&tensor(&[4, 4, 3], 1.0), ImshowOptions::default().cmap(Colormap::Jet)),
            Err(TvError::Value(_))
        ));
        let nan = Tensor::new(vec![2, 2], vec![0.0f32, f32::NAN, 1.0, 2.0]).unwrap();
        assert!(matches!(axes.imshow(&nan, ImshowOptions::default()), Err(TvError::Dtype(_))));
        assert!(axes.layers().is_empty());
    }

    #[test]
    fn rgb_input_ignores_the_default_colormap() {
        let mut axes = small().with_default_cmap(Colormap::Viridis);
        axes.imshow(&tensor(&[4, 4, 3], 1.0), ImshowOptions::default()).unwrap();
        axes.imshow(&tensor(&[4, 4, 1], 1.0), ImshowOptions::default()).unwrap();
        assert_eq!(axes.layers()[0].cmap(), Colormap::Gray);
        assert_eq!(axes.layers()[1].cmap(), Colormap::Viridis);
    }

    #[test]
    fn render_is_pure() {
        let mut axes = small().with_spacing(2).with_background([9, 9, 9]);
        let ramp = Tensor::new(vec![2, 2, 4, 4, 1], (0..64).map(|v| v as u16).collect::<Vec<_>>()).unwrap();
        axes.imshow(&ramp, ImshowOptions::default().cmap(Colormap::Magma)).unwrap();
        let a = axes.render().unwrap();
        let b = axes.render().unwrap();
        assert_eq!(a, b);
        assert_eq!((a.geometry.rows, a.geometry.cols), (2, 2));
        assert_eq!(a.image.get_pixel(7, 0).0, [9, 9, 9]);
    }

    struct CtVolume {
        voxels: Tensor,
        spacing: [f64; 3],
    }
    impl ToTensor for CtVolume {
        fn to_tensor(&self) -> Result<(Cow<'_, Tensor>, Metadata)> {
            let hints = Metadata {
                spacing: Some(self.spacing),
                orientation: Some("LPS".to_string()),
                ..Default::default()
            };
            Ok((Cow::Borrowed(&self.voxels), hints))
        }
    }

    #[test]
    fn volumes_hand_over_their_hints() {
        let mut axes = small();
        axes.metadata(Metadata {
            orientation: Some("RAS".to_string()),
            ..Default::default()
        });
        let ct = CtVolume {
            voxels: tensor(&[1, 2, 4, 4, 1], -1000.0),
            spacing: [2.5, 0.7, 0.7],
        };
        axes.imshow_volume(&ct, ImshowOptions::default()).unwrap();
        assert_eq!(axes.layers().len(), 1);
        assert_eq!(axes.metadata.spacing, Some([2.5, 0.7, 0.7]));
        assert_eq!(axes.metadata.orientation.as_deref(), Some("RAS"));
    }

    #[test]
    fn rejected_volume_adds_no_hints() {
        let mut axes = small();
        axes.imshow(&tensor(&[4, 4], 0.0), ImshowOptions::default()).unwrap();
        let ct = CtVolume {
            voxels: tensor(&[5, 5], 0.0),
            spacing: [1.0; 3],
        };
        assert!(matches!(
            axes.imshow_volume(&ct, ImshowOptions::default()),
            Err(TvError::ShapeMismatch { .. })
        ));
        assert_eq!(axes.metadata, Metadata::default());
        assert_eq!(axes.layers().len(), 1);
    }

    #[test]
    fn free_imshow_chains_onto_axes() {
        let axes = imshow(None, &tensor(&[4, 4], 2.0), ImshowOptions::default()).unwrap();
        let axes = imshow(Some(axes), &tensor(&[4, 4], 1.0), ImshowOptions::seg()).unwrap();
        assert_eq!(axes.layers().len(), 2);
        assert_eq!(axes.layers()[1].cmap(), Colormap::Seg);
        assert!(imshow(Some(axes), &tensor(&[3, 3], 1.0), ImshowOptions::default()).is_err());
    }

    #[test]
    fn nan_window_is_a_value_error() {
        let mut axes = small();
        let window = Window { low: f64::NAN, high: 1.0 };
        let err = axes
            .imshow(&tensor(&[4, 4], 0.5), ImshowOptions::default().window(window))
            .unwrap_err();
        assert!(matches!(err, TvError::Value(_)), "{:?}", err);
        assert!(err.is_validation());
        assert!(axes.layers().is_empty());
    }

    #[test]
    fn render_without_layers_is_a_layout_error() {
        assert!(matches!(small().render(), Err(TvError::Layout(_))));
    }

    #[test]
    fn from_config_takes_figsize_and_cmap() {
        let config = Config {
            figsize: FigSize::new(64, 128),
            cmap: Colormap::Bone,
            ..Default::default()
        };
        let axes = Axes::from_config(&config);
        assert_eq!(axes.layout().figsize, FigSize::new(64, 128));
        assert_eq!(axes.default_cmap, Colormap::Bone);
    }
}
