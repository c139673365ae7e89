use crate::axes::{show, Axes, ImshowOptions, ShowOptions, ToTensor};
use crate::config::Config;
use crate::error::TvError;
use crate::render::{blend, Colormap, FigSize, SEG_PALETTE};
use crate::tensor::{Tensor, Window};
use crate::viewer::{FrameStore, Metadata, Session, ViewerServer};
use image::Rgb;
use std::borrow::Cow;

async fn viewer() -> (Session, FrameStore) {
    let server = ViewerServer::bind("127.0.0.1:0", None).await.unwrap();
    let addr = server.local_addr().unwrap();
    let frames = server.frames();
    server.spawn();
    let config = Config {
        timeout_ms: 2000,
        ..Default::default()
    };
    (Session::with_addr(addr.to_string(), config), frames)
}

fn filled<T: Clone>(dims: &[usize], value: T) -> Vec<T> { vec![value; dims.iter().product()] }

#[tokio::test]
async fn zero_volume_shows_a_grid_of_black_tiles() {
    let (session, frames) = viewer().await;
    let dims = [2, 3, 4, 4, 1];
    let tensor = Tensor::new(dims.to_vec(), filled(&dims, 0u16)).unwrap();

    let options = ShowOptions {
        figsize: Some(FigSize::new(8, 12)),
        ..Default::default()
    };
    let handle = show(&session, &tensor, options).await.unwrap();

    let frame = frames.current(handle).unwrap();
    assert_eq!((frame.header.rows, frame.header.cols), (2, 3));
    assert_eq!(frame.image.dimensions(), (12, 8));
    assert!(frame.image.pixels().all(|p| *p == Rgb([0, 0, 0])));
}

#[tokio::test]
async fn segmentation_overlay_blends_over_the_base() {
    let (session, frames) = viewer().await;
    let base = Tensor::new(vec![4, 4], filled(&[4, 4], 100u8)).unwrap();
    let labels = Tensor::new(vec![4, 4], filled(&[4, 4], 1u8)).unwrap();

    let mut axes = Axes::new(FigSize::new(4, 4));
    axes.imshow(&base, ImshowOptions::default().window(Window::new(0.0, 255.0).unwrap()))
        .unwrap()
        .imshow(&labels, ImshowOptions::seg().alpha(0.5))
        .unwrap();
    let handle = axes.show(&session).await.unwrap();

    let [r, g, b] = SEG_PALETTE[0];
    let expected = Rgb([blend(r, 100, 128), blend(g, 100, 128), blend(b, 100, 128)]);
    assert_eq!(expected, Rgb([178, 50, 50]));
    let frame = frames.current(handle).unwrap();
    assert!(frame.image.pixels().all(|p| *p == expected));
}

#[tokio::test]
async fn misaligned_overlay_never_reaches_the_viewer() {
    let (session, frames) = viewer().await;
    let base = Tensor::new(vec![1, 1, 4, 4, 1], filled(&[16], 1.0f32)).unwrap();
    let overlay = Tensor::new(vec![1, 1, 5, 5, 1], filled(&[25], 1u8)).unwrap();

    let mut axes = Axes::new(FigSize::new(4, 4));
    axes.imshow(&base, ImshowOptions::default()).unwrap();
    let err = axes.imshow(&overlay, ImshowOptions::seg()).unwrap_err();
    assert!(matches!(err, TvError::ShapeMismatch { .. }));
    assert!(err.is_validation());
    assert_eq!(axes.layers().len(), 1);
    assert_eq!(frames.received(), 0);

    // an empty plot fails before any I/O too
    let err = Axes::default().show(&session).await.unwrap_err();
    assert!(matches!(err, TvError::Layout(_)));
    assert_eq!(frames.received(), 0);
}

#[tokio::test]
async fn repeated_show_replaces_the_frame() {
    let (session, frames) = viewer().await;
    let mut axes = Axes::new(FigSize::new(4, 4)).with_default_cmap(Colormap::Hot);
    axes.metadata(Metadata {
        title: Some("ct".to_string()),
        ..Default::default()
    });
    let window = Window::new(0.0, 255.0).unwrap();

    axes.imshow(&Tensor::new(vec![4, 4], filled(&[16], 10u8)).unwrap(), ImshowOptions::default().window(window))
        .unwrap();
    let first = axes.show(&session).await.unwrap();

    axes.clear();
    axes.imshow(&Tensor::new(vec![4, 4], filled(&[16], 250u8)).unwrap(), ImshowOptions::default().window(window))
        .unwrap();
    let second = axes.show(&session).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(axes.handle(), Some(first));
    assert_eq!(frames.len(), 1);
    assert_eq!(frames.received(), 2);
    let frame = frames.current(first).unwrap();
    assert_eq!(frame.header.metadata.title.as_deref(), Some("ct"));
    assert_eq!(frame.image.get_pixel(0, 0).0, Colormap::Hot.rgb(250));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_plots_share_one_channel() {
    let (session, frames) = viewer().await;
    let window = Window::new(0.0, 255.0).unwrap();

    let tasks: Vec<_> = (0..4u8)
        .map(|i| {
            let session = session.clone();
            let tensor = Tensor::new(vec![2, 8, 8, 1], filled(&[2, 8, 8, 1], i * 60)).unwrap();
            tokio::spawn(async move {
                let mut axes = Axes::new(FigSize::new(16, 8));
                axes.imshow(&tensor, ImshowOptions::default().window(window))?;
                axes.show(&session).await
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let handle = task.await.unwrap().unwrap();
        let frame = frames.current(handle).unwrap();
        assert_eq!((frame.header.rows, frame.header.cols), (2, 1));
        assert_eq!(frame.image.get_pixel(3, 12).0, [i as u8 * 60; 3]);
    }
    assert_eq!(frames.len(), 4);
    assert_eq!(frames.received(), 4);
}

#[tokio::test]
async fn closed_session_rejects_show() {
    let (session, frames) = viewer().await;
    let tensor = Tensor::new(vec![2, 2], vec![0u8, 1, 2, 3]).unwrap();
    show(&session, &tensor, ShowOptions::default()).await.unwrap();
    session.close().await.unwrap();

    let err = show(&session, &tensor, ShowOptions::default()).await.unwrap_err();
    assert!(matches!(err, TvError::ChannelClosed));
    assert_eq!(frames.received(), 1);
}

struct Scan {
    voxels: Tensor,
}
impl ToTensor for Scan {
    fn to_tensor(&self) -> crate::Result<(Cow<'_, Tensor>, Metadata)> {
        let hints = Metadata {
            spacing: Some([3.0, 1.0, 1.0]),
            ..Default::default()
        };
        Ok((Cow::Borrowed(&self.voxels), hints))
    }
}

#[tokio::test]
async fn volume_hints_travel_with_the_frame() {
    let (session, frames) = viewer().await;
    let scan = Scan {
        voxels: Tensor::new(vec![1, 2, 4, 4, 1], filled(&[32], 7i16)).unwrap(),
    };
    let mut axes = Axes::new(FigSize::new(4, 8));
    axes.imshow_volume(&scan, ImshowOptions::default()).unwrap();
    let handle = axes.show(&session).await.unwrap();

    let frame = frames.current(handle).unwrap();
    assert_eq!(frame.header.metadata.spacing, Some([3.0, 1.0, 1.0]));
    assert_eq!((frame.header.rows, frame.header.cols), (1, 2));
}
