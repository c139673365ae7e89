use super::protocol::{read_message, write_message, Frame, FrameHeader, Header, PlotHandle, PROTOCOL_VERSION};
use crate::error::{Result, TvError};
use fxhash::FxHashMap;
use image::RgbImage;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;

#[derive(derive_more::Debug, Clone, PartialEq)]
pub struct StoredFrame {
    pub header: FrameHeader,
    #[debug(skip)]
    pub image: RgbImage,
}

/// Latest frame per plot, as held by the display surface.
#[derive(Clone, Default)]
pub struct FrameStore {
    frames: Arc<Mutex<FxHashMap<PlotHandle, StoredFrame>>>,
    received: Arc<AtomicU64>,
}
impl FrameStore {
    fn insert(&self, frame: StoredFrame) {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.insert(frame.header.hash, frame);
        self.received.fetch_add(1, Ordering::Relaxed);
    }
    pub fn current(&self, handle: PlotHandle) -> Option<StoredFrame> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).get(&handle).cloned()
    }
    pub fn handles(&self) -> Vec<PlotHandle> {
        let mut handles: Vec<PlotHandle> = self
            .frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        handles.sort();
        handles
    }
    /// number of plots currently shown
    pub fn len(&self) -> usize { self.frames.lock().unwrap_or_else(|e| e.into_inner()).len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    /// number of frames accepted so far, including replaced ones
    pub fn received(&self) -> u64 { self.received.load(Ordering::Relaxed) }
}

/// Display surface that accepts frames from sessions and keeps the latest one per plot.
/// With an output directory every frame is also written to `<dir>/<hash>.png`.
pub struct ViewerServer {
    listener: TcpListener,
    store: FrameStore,
    output_dir: Option<PathBuf>,
}

impl ViewerServer {
    pub async fn bind(addr: impl ToSocketAddrs, output_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &output_dir {
            std::fs::create_dir_all(dir)?;
        }
        let listener = TcpListener::bind(addr).await?;
        info!("Viewer listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            store: FrameStore::default(),
            output_dir,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> { Ok(self.listener.local_addr()?) }
    pub fn frames(&self) -> FrameStore { self.store.clone() }

    pub async fn serve(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("Session connected from {}", peer);
            let store = self.store.clone();
            let output_dir = self.output_dir.clone();
            tokio::spawn(async move {
                match handle_session(stream, store, output_dir).await {
                    Ok(()) => debug!("Session from {} finished", peer),
                    Err(e) => warn!("Session from {} failed: {}", peer, e),
                }
            });
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> { tokio::spawn(self.serve()) }
}

async fn handle_session(mut stream: TcpStream, store: FrameStore, output_dir: Option<PathBuf>) -> Result<()> {
    stream.set_nodelay(true)?;
    write_message(&mut stream, &Header::Hello { version: PROTOCOL_VERSION }, &[]).await?;

    while let Some((header, body)) = read_message(&mut stream).await? {
        let reply = match header {
            Header::Frame(header) => {
                let (hash, key) = (header.hash, header.key);
                match accept_frame(Frame { header, body }, output_dir.clone()).await {
                    Ok(stored) => {
                        store.insert(stored);
                        Header::Ack { hash, key }
                    }
                    Err(e) => {
                        warn!("Rejected frame {} of plot {}: {}", key, hash, e);
                        Header::Error { message: e.to_string() }
                    }
                }
            }
            Header::Close => break,
            other => Header::Error {
                message: format!("unexpected message {:?}", other),
            },
        };
        write_message(&mut stream, &reply, &[]).await?;
    }
    Ok(())
}

/// Decodes the frame and, if requested, writes it out; runs off the async threads.
async fn accept_frame(frame: Frame, output_dir: Option<PathBuf>) -> Result<StoredFrame> {
    tokio::task::spawn_blocking(move || -> Result<StoredFrame> {
        let image = frame.decode_image()?;
        if let Some(dir) = output_dir {
            write_png(&dir, frame.header.hash, &image)?;
        }
        Ok(StoredFrame {
            header: frame.header,
            image,
        })
    })
    .await
    .map_err(|e| TvError::Protocol(format!("frame decoding task failed: {}", e)))?
}

/// Replaces `<dir>/<hash>.png` via a temporary file so readers never see half a frame.
fn write_png(dir: &Path, hash: PlotHandle, image: &RgbImage) -> Result<()> {
    let target = dir.join(format!("{}.png", hash));
    let tmp = dir.join(format!(".{}.png.tmp", hash));
    image.save_with_format(&tmp, image::ImageFormat::Png)?;
    std::fs::rename(&tmp, &target)?;
    Ok(())
}
