//! Line-delimited framing over an agent byte stream.
//!
//! One JSON object per newline-terminated line in both directions. Lines may
//! carry inline base64 artifacts, so the reader accepts lines up to
//! [`MAX_LINE_BYTES`]; anything larger is a protocol violation (the agent is
//! expected to deliver oversized artifacts via the `url` field instead).

use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::{classify, Message};

/// Maximum accepted line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Errors surfaced by the framing layer.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error on agent stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("agent line exceeds {MAX_LINE_BYTES} bytes")]
    LineTooLong,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<LinesCodecError> for CodecError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => CodecError::LineTooLong,
            LinesCodecError::Io(io) => CodecError::Io(io),
        }
    }
}

/// Reading half: framed lines plus message classification.
pub struct RpcReader<R> {
    lines: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin> RpcReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
        }
    }

    /// Next raw line, skipping empty ones. `None` on clean EOF.
    pub async fn next_line(&mut self) -> Result<Option<String>, CodecError> {
        while let Some(line) = self.lines.next().await {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
        Ok(None)
    }

    /// Next classified message. Lines that fail JSON parsing or decode to no
    /// known shape are skipped; the stream survives interleaved noise.
    pub async fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        while let Some(line) = self.next_line().await? {
            match classify(&line) {
                Some(msg) => return Ok(Some(msg)),
                None => {
                    tracing::debug!(len = line.len(), "skipping undecodable agent line");
                }
            }
        }
        Ok(None)
    }
}

/// Writing half: serializes one message per line.
pub struct RpcWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> RpcWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg` and write it as a single newline-terminated line.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), CodecError> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write an already-framed line verbatim (newline appended).
    pub async fn send_raw(&mut self, line: &str) -> Result<(), CodecError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Split a bidirectional agent stream into independent framed halves, for
/// consumers that pump both directions concurrently.
pub fn split<T>(io: T) -> (RpcReader<ReadHalf<T>>, RpcWriter<WriteHalf<T>>)
where
    T: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(io);
    (RpcReader::new(reader), RpcWriter::new(writer))
}

/// A single-owner framed session over a bidirectional agent stream.
pub struct RpcStream<T: AsyncRead + AsyncWrite> {
    reader: RpcReader<ReadHalf<T>>,
    writer: RpcWriter<WriteHalf<T>>,
}

impl<T: AsyncRead + AsyncWrite> RpcStream<T> {
    pub fn new(io: T) -> Self {
        let (reader, writer) = split(io);
        Self { reader, writer }
    }

    pub async fn send<M: Serialize>(&mut self, msg: &M) -> Result<(), CodecError> {
        self.writer.send(msg).await
    }

    pub async fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        self.reader.next_message().await
    }

    pub async fn next_line(&mut self) -> Result<Option<String>, CodecError> {
        self.reader.next_line().await
    }

    pub fn into_split(self) -> (RpcReader<ReadHalf<T>>, RpcWriter<WriteHalf<T>>) {
        (self.reader, self.writer)
    }
}
