use super::protocol::{read_message, write_message, Encoding, Frame, Header, Metadata, PlotHandle, PROTOCOL_VERSION};
use crate::config::Config;
use crate::error::{Result, TvError};
use crate::render::Canvas;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Unopened,
    Open,
    Closed,
}

struct Connection {
    stream: TcpStream,
}
impl Connection {
    /// Connects and waits for the display surface to say hello. Refused connections are
    /// retried since the surface may still be starting up; the caller bounds the wait.
    async fn connect(addr: &str) -> Result<Self> {
        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        };
        stream.set_nodelay(true)?;

        match read_message(&mut stream).await? {
            Some((Header::Hello { version }, _)) if version == PROTOCOL_VERSION => Ok(Self { stream }),
            Some((Header::Hello { version }, _)) => Err(TvError::Protocol(format!(
                "viewer speaks protocol version {}, expected {}",
                version, PROTOCOL_VERSION
            ))),
            Some((other, _)) => Err(TvError::Protocol(format!("expected hello from viewer, got {:?}", other))),
            None => Err(TvError::Protocol("viewer closed the connection before saying hello".to_string())),
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        write_message(&mut self.stream, &Header::Frame(frame.header.clone()), &frame.body).await?;
        match read_message(&mut self.stream).await? {
            Some((Header::Ack { hash, key }, _)) if hash == frame.header.hash && key == frame.header.key => Ok(()),
            Some((Header::Error { message }, _)) => Err(TvError::Protocol(format!("viewer rejected frame: {}", message))),
            Some((other, _)) => Err(TvError::Protocol(format!(
                "expected ack for frame {} of plot {}, got {:?}",
                frame.header.key, frame.header.hash, other
            ))),
            None => Err(TvError::Protocol("viewer closed the connection".to_string())),
        }
    }

    async fn close(mut self) -> Result<()> {
        write_message(&mut self.stream, &Header::Close, &[]).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

enum ChannelState {
    Unopened,
    Open(Connection),
    Closed,
}

struct Inner {
    config: Config,
    addr: String,
    state: Mutex<ChannelState>,
    next_handle: AtomicU64,
    next_key: AtomicU64,
}

/// The one channel to the display surface, shared by every `Axes` of a process.
///
/// Cloning is cheap and yields the same channel. Pushes are serialized by a mutex that is
/// held for the whole frame, so frames of different plots never interleave. The channel
/// opens lazily on the first push and can be closed once; after that every push fails.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Session for the display surface at `config.hostname:config.port`.
    pub fn new(config: Config) -> Result<Self> {
        let addr = config.viewer_addr()?;
        Ok(Self::with_addr(addr, config))
    }

    pub fn with_addr(addr: impl Into<String>, config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                addr: addr.into(),
                state: Mutex::new(ChannelState::Unopened),
                next_handle: AtomicU64::new(1),
                next_key: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &Config { &self.inner.config }
    pub fn addr(&self) -> &str { &self.inner.addr }
    pub fn timeout(&self) -> Duration { self.inner.config.timeout() }

    pub fn new_handle(&self) -> PlotHandle { PlotHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed)) }

    /// Browser URL of the view for `handle`.
    pub fn viewer_url(&self, handle: PlotHandle) -> String { format!("http://{}?hash={}", self.inner.addr, handle) }

    pub async fn status(&self) -> ChannelStatus {
        match *self.inner.state.lock().await {
            ChannelState::Unopened => ChannelStatus::Unopened,
            ChannelState::Open(_) => ChannelStatus::Open,
            ChannelState::Closed => ChannelStatus::Closed,
        }
    }

    async fn connect_once(&self) -> Result<Connection> {
        let limit = self.timeout();
        match timeout(limit, Connection::connect(&self.inner.addr)).await {
            Ok(result) => result,
            Err(_) => Err(TvError::ChannelTimeout(limit, "waiting for the viewer to become ready")),
        }
    }

    /// Connects, allowing a single retry if the first attempt times out.
    async fn connect(&self) -> Result<Connection> {
        let connection = match self.connect_once().await {
            Err(TvError::ChannelTimeout(limit, _)) => {
                warn!("Viewer at {} not ready after {:?}, retrying once", self.inner.addr, limit);
                self.connect_once().await?
            }
            other => other?,
        };
        info!("Connected to viewer at {}", self.inner.addr);
        Ok(connection)
    }

    /// Takes the open connection out of `state`, opening one if needed. `state` is left
    /// `Unopened` so that a push that does not complete drops its connection.
    async fn take_connection(&self, state: &mut ChannelState) -> Result<Connection> {
        match std::mem::replace(state, ChannelState::Unopened) {
            ChannelState::Open(connection) => Ok(connection),
            ChannelState::Unopened => self.connect().await,
            ChannelState::Closed => {
                *state = ChannelState::Closed;
                Err(TvError::ChannelClosed)
            }
        }
    }

    pub async fn open(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let connection = self.take_connection(&mut state).await?;
        *state = ChannelState::Open(connection);
        Ok(())
    }

    /// Shows `canvas` as the current content of `handle`, replacing what was shown before.
    pub async fn push(&self, handle: PlotHandle, canvas: &Canvas, metadata: &Metadata) -> Result<()> {
        let encoding: Encoding = self.inner.config.encoding;
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        // encode fully before touching the channel
        let frame = Frame::encode(handle, key, canvas, encoding, metadata.clone())?;

        let mut state = self.inner.state.lock().await;
        let mut connection = self.take_connection(&mut state).await?;
        let limit = self.timeout();
        match timeout(limit, connection.send(&frame)).await {
            Ok(Ok(())) => {
                debug!(
                    "Pushed frame {} of plot {} ({}x{}, {} bytes)",
                    key,
                    handle,
                    frame.header.width,
                    frame.header.height,
                    frame.body.len()
                );
                *state = ChannelState::Open(connection);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Dropping viewer connection after failed push: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!("Dropping viewer connection after push timed out");
                Err(TvError::ChannelTimeout(limit, "waiting for the viewer to acknowledge a frame"))
            }
        }
    }

    /// Releases the channel. Further pushes fail with `ChannelClosed`.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if let ChannelState::Open(connection) = std::mem::replace(&mut *state, ChannelState::Closed) {
            match timeout(self.timeout(), connection.close()).await {
                Ok(Ok(())) => info!("Closed viewer channel to {}", self.inner.addr),
                Ok(Err(e)) => debug!("Viewer channel closed uncleanly: {}", e),
                Err(_) => debug!("Timed out saying goodbye to the viewer"),
            }
        }
        Ok(())
    }
}
