//! Framing between the plotting session and the display surface.
//!
//! Every message is `u32 BE header length | JSON header | u32 BE body length | body`.

use crate::error::{Result, TvError};
use crate::render::Canvas;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_HEADER_LEN: u32 = 1 << 20;
pub const MAX_BODY_LEN: u32 = 256 << 20;

/// Identifies one logical plot on the display surface. Frames pushed with the same
/// handle replace each other.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PlotHandle(pub u64);
impl fmt::Display for PlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:016x}", self.0) }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// row-major RGB8
    Raw,
    #[default]
    Png,
}

/// Hints passed through to the viewer untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Metadata {
    /// voxel spacing along (depth, height, width)
    pub spacing: Option<[f64; 3]>,
    pub orientation: Option<String>,
    pub title: Option<String>,
}
impl Metadata {
    /// Fills the hints missing here from `other`; hints already set are kept.
    pub fn merge(&mut self, other: Metadata) {
        self.spacing = self.spacing.or(other.spacing);
        self.orientation = self.orientation.take().or(other.orientation);
        self.title = self.title.take().or(other.title);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub hash: PlotHandle,
    pub key: u64,
    pub width: u32,
    pub height: u32,
    pub rows: u32,
    pub cols: u32,
    pub encoding: Encoding,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Header {
    Hello { version: u32 },
    Frame(FrameHeader),
    Ack { hash: PlotHandle, key: u64 },
    Error { message: String },
    Close,
}

#[derive(derive_more::Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    #[debug(skip)]
    pub body: Vec<u8>,
}
impl Frame {
    pub fn encode(hash: PlotHandle, key: u64, canvas: &Canvas, encoding: Encoding, metadata: Metadata) -> Result<Self> {
        let body = match encoding {
            Encoding::Raw => canvas.image.as_raw().clone(),
            Encoding::Png => {
                let mut bytes = Cursor::new(Vec::new());
                canvas.image.write_to(&mut bytes, ImageFormat::Png)?;
                bytes.into_inner()
            }
        };
        Ok(Self {
            header: FrameHeader {
                hash,
                key,
                width: canvas.width(),
                height: canvas.height(),
                rows: canvas.geometry.rows,
                cols: canvas.geometry.cols,
                encoding,
                metadata,
            },
            body,
        })
    }

    pub fn decode_image(&self) -> Result<RgbImage> {
        let (width, height) = (self.header.width, self.header.height);
        let image = match self.header.encoding {
            Encoding::Raw => {
                let expected = width as usize * height as usize * 3;
                if self.body.len() != expected {
                    return Err(TvError::Protocol(format!(
                        "raw frame of {}x{} needs {} bytes, got {}",
                        width,
                        height,
                        expected,
                        self.body.len()
                    )));
                }
                RgbImage::from_raw(width, height, self.body.clone())
                    .ok_or_else(|| TvError::Protocol("raw frame buffer does not fit its size".to_string()))?
            }
            Encoding::Png => image::load_from_memory_with_format(&self.body, ImageFormat::Png)?.to_rgb8(),
        };
        if image.dimensions() != (width, height) {
            return Err(TvError::Protocol(format!(
                "frame header says {}x{} but the image is {}x{}",
                width,
                height,
                image.width(),
                image.height()
            )));
        }
        Ok(image)
    }
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, header: &Header, body: &[u8]) -> Result<()> {
    let json = serde_json::to_vec(header)?;
    if json.len() > MAX_HEADER_LEN as usize || body.len() > MAX_BODY_LEN as usize {
        return Err(TvError::Protocol(format!(
            "message too large (header {} bytes, body {} bytes)",
            json.len(),
            body.len()
        )));
    }
    writer.write_u32(json.len() as u32).await?;
    writer.write_all(&json).await?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next message; `None` if the peer closed the stream between messages.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<(Header, Vec<u8>)>> {
    let header_len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if header_len > MAX_HEADER_LEN {
        return Err(TvError::Protocol(format!("header of {} bytes exceeds the limit", header_len)));
    }
    let mut json = vec![0u8; header_len as usize];
    reader.read_exact(&mut json).await?;
    let header: Header = serde_json::from_slice(&json)?;

    let body_len = reader.read_u32().await?;
    if body_len > MAX_BODY_LEN {
        return Err(TvError::Protocol(format!("body of {} bytes exceeds the limit", body_len)));
    }
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{layout, LayoutOptions};
    use image::Rgb;

    fn canvas() -> Canvas {
        let slices: Vec<RgbImage> = (0..2)
            .map(|i| RgbImage::from_fn(3, 3, |x, y| Rgb([x as u8 * 80, y as u8 * 80, i * 200])))
            .collect();
        let options = LayoutOptions {
            figsize: crate::render::FigSize::new(30, 60),
            ..Default::default()
        };
        layout(&slices, 1, 2, &options).unwrap()
    }

    #[test]
    fn header_json_shape() {
        let json = serde_json::to_value(Header::Ack {
            hash: PlotHandle(7),
            key: 3,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "ack", "hash": 7, "key": 3}));
        let hello: Header = serde_json::from_str(r#"{"type":"hello","version":1}"#).unwrap();
        assert_eq!(hello, Header::Hello { version: 1 });
    }

    #[test]
    fn merge_keeps_hints_that_are_set() {
        let mut metadata = Metadata {
            title: Some("mine".to_string()),
            ..Default::default()
        };
        metadata.merge(Metadata {
            spacing: Some([2.0, 0.5, 0.5]),
            orientation: Some("RAS".to_string()),
            title: Some("theirs".to_string()),
        });
        assert_eq!(metadata.spacing, Some([2.0, 0.5, 0.5]));
        assert_eq!(metadata.orientation.as_deref(), Some("RAS"));
        assert_eq!(metadata.title.as_deref(), Some("mine"));
    }

    #[test]
    fn png_and_raw_frames_decode_to_the_canvas() {
        let canvas = canvas();
        for encoding in [Encoding::Raw, Encoding::Png] {
            let frame = Frame::encode(PlotHandle(1), 0, &canvas, encoding, Metadata::default()).unwrap();
            assert_eq!((frame.header.width, frame.header.height), (60, 30));
            assert_eq!((frame.header.rows, frame.header.cols), (1, 2));
            assert_eq!(frame.decode_image().unwrap(), canvas.image);
        }
    }

    #[test]
    fn truncated_raw_frame_is_rejected() {
        let mut frame = Frame::encode(PlotHandle(1), 0, &canvas(), Encoding::Raw, Metadata::default()).unwrap();
        frame.body.pop();
        assert!(matches!(frame.decode_image(), Err(TvError::Protocol(_))));
    }

    #[tokio::test]
    async fn messages_survive_the_wire() {
        let (mut a, mut b) = tokio::io::duplex(1 << 16);
        let header = Header::Error {
            message: "nope".to_string(),
        };
        write_message(&mut a, &header, b"payload").await.unwrap();
        write_message(&mut a, &Header::Close, &[]).await.unwrap();
        drop(a);

        assert_eq!(read_message(&mut b).await.unwrap(), Some((header, b"payload".to_vec())));
        assert_eq!(read_message(&mut b).await.unwrap(), Some((Header::Close, vec![])));
        assert_eq!(read_message(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_header_is_a_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(MAX_HEADER_LEN + 1).await.unwrap();
        assert!(matches!(read_message(&mut b).await, Err(TvError::Protocol(_))));
    }
}
