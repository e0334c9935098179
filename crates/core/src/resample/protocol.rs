//! Framing for the resample worker pipe.
//!
//! A frame is one JSON header line followed by exactly `payload_len` raw
//! bytes. The parent writes one request frame to the worker's stdin and
//! reads one response frame from its stdout.

use crate::config::ResampleAlgorithm;
use crate::error::{PipelineError, Result};
use crate::raster::{ColorMode, MaxBounds, RawImageBuffer};
use futures::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read};
use std::path::PathBuf;

/// Longest header line accepted. Large enough for a 256-entry palette.
pub const MAX_HEADER_LEN: u64 = 64 * 1024;

/// Largest pixel payload accepted in either direction.
pub const MAX_PAYLOAD_LEN: usize = 1 << 30;

/// Where the worker gets its input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResampleSource {
    /// Pixels already in memory.
    Pixels(RawImageBuffer),
    /// A file the worker opens and decodes itself.
    File(PathBuf),
}

/// One unit of work for a resample worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResampleRequest {
    pub source: ResampleSource,
    pub bounds: MaxBounds,
    pub algorithm: ResampleAlgorithm,
}

/// What a worker sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResampleResponse {
    Image(RawImageBuffer),
    /// Decoding or resampling failed inside the worker.
    Error(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SourceHeader {
    Pixels {
        mode: ColorMode,
        width: u32,
        height: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        palette: Option<Vec<[u8; 4]>>,
    },
    File {
        path: PathBuf,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct RequestHeader {
    source: SourceHeader,
    bounds: MaxBounds,
    algorithm: ResampleAlgorithm,
    payload_len: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ResponseHeader {
    Image {
        mode: ColorMode,
        width: u32,
        height: u32,
        payload_len: usize,
    },
    Error {
        message: String,
    },
}

impl ResponseHeader {
    fn payload_len(&self) -> usize {
        match self {
            ResponseHeader::Image { payload_len, .. } => *payload_len,
            ResponseHeader::Error { .. } => 0,
        }
    }
}

impl RequestHeader {
    fn payload_len(&self) -> usize {
        self.payload_len
    }
}

trait Framed: Sized {
    type Header: Serialize + DeserializeOwned;
    fn header_payload_len(header: &Self::Header) -> usize;
    fn from_frame(header: Self::Header, payload: Vec<u8>) -> Result<Self>;
}

fn encode_frame<H: Serialize>(header: &H, payload: &[u8]) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(header)?;
    frame.push(b'\n');
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn parse_header<H: DeserializeOwned>(line: &str) -> Result<H> {
    if !line.ends_with('\n') {
        return Err(PipelineError::WorkerProtocol(format!(
            "header not newline-terminated within {} bytes",
            MAX_HEADER_LEN
        )));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

fn check_payload_len(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD_LEN {
        return Err(PipelineError::WorkerProtocol(format!(
            "payload of {} bytes exceeds limit",
            len
        )));
    }
    Ok(())
}

/// Read one frame from a blocking reader. `Ok(None)` on a clean end of stream.
fn read_frame<T: Framed, R: BufRead>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    if reader.by_ref().take(MAX_HEADER_LEN).read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let header: T::Header = parse_header(&line)?;
    let len = T::header_payload_len(&header);
    check_payload_len(len)?;
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload)?;
    T::from_frame(header, payload).map(Some)
}

/// Async counterpart of [`read_frame`].
async fn read_frame_async<T: Framed, R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    if (&mut *reader).take(MAX_HEADER_LEN).read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let header: T::Header = parse_header(&line)?;
    let len = T::header_payload_len(&header);
    check_payload_len(len)?;
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;
    T::from_frame(header, payload).map(Some)
}

impl Framed for ResampleRequest {
    type Header = RequestHeader;

    fn header_payload_len(header: &RequestHeader) -> usize {
        header.payload_len()
    }

    fn from_frame(header: RequestHeader, payload: Vec<u8>) -> Result<Self> {
        let source = match header.source {
            SourceHeader::Pixels {
                mode,
                width,
                height,
                palette,
            } => {
                let image = match palette {
                    Some(palette) => RawImageBuffer::indexed(payload, mode, width, height, palette)?,
                    None => RawImageBuffer::new(payload, mode, width, height)?,
                };
                ResampleSource::Pixels(image)
            }
            SourceHeader::File { path } => ResampleSource::File(path),
        };
        Ok(Self {
            source,
            bounds: header.bounds,
            algorithm: header.algorithm,
        })
    }
}

impl Framed for ResampleResponse {
    type Header = ResponseHeader;

    fn header_payload_len(header: &ResponseHeader) -> usize {
        header.payload_len()
    }

    fn from_frame(header: ResponseHeader, payload: Vec<u8>) -> Result<Self> {
        match header {
            ResponseHeader::Image {
                mode,
                width,
                height,
                ..
            } => Ok(Self::Image(RawImageBuffer::new(payload, mode, width, height)?)),
            ResponseHeader::Error { message } => Ok(Self::Error(message)),
        }
    }
}

impl ResampleRequest {
    pub fn new(source: ResampleSource, bounds: MaxBounds, algorithm: ResampleAlgorithm) -> Self {
        Self {
            source,
            bounds,
            algorithm,
        }
    }

    /// Serialize into a single frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (source, payload) = match &self.source {
            ResampleSource::Pixels(image) => (
                SourceHeader::Pixels {
                    mode: image.mode(),
                    width: image.width(),
                    height: image.height(),
                    palette: image.palette().map(<[[u8; 4]]>::to_vec),
                },
                image.pixels(),
            ),
            ResampleSource::File(path) => (SourceHeader::File { path: path.clone() }, &[][..]),
        };
        let header = RequestHeader {
            source,
            bounds: self.bounds,
            algorithm: self.algorithm,
            payload_len: payload.len(),
        };
        encode_frame(&header, payload)
    }

    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<Self>> {
        read_frame(reader)
    }
}

impl ResampleResponse {
    /// Serialize into a single frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            ResampleResponse::Image(image) => {
                if image.mode().is_indexed() {
                    return Err(PipelineError::WorkerProtocol(
                        "responses carry direct colour only".to_string(),
                    ));
                }
                let header = ResponseHeader::Image {
                    mode: image.mode(),
                    width: image.width(),
                    height: image.height(),
                    payload_len: image.pixels().len(),
                };
                encode_frame(&header, image.pixels())
            }
            ResampleResponse::Error(message) => encode_frame(
                &ResponseHeader::Error {
                    message: message.clone(),
                },
                &[],
            ),
        }
    }

    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<Self>> {
        read_frame(reader)
    }

    pub async fn read_from_async<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Self>> {
        read_frame_async(reader).await
    }
}
