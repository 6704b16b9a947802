//! Stream demultiplexer for the engine's hijacked agent stream
//!
//! With TTY disabled, the container engine multiplexes the agent's stdout and
//! stderr onto one byte stream. Each frame carries an 8-byte header: byte 0
//! is the stream type (0 stdin, 1 stdout, 2 stderr), bytes 1..3 are
//! reserved, bytes 4..7 are the big-endian payload length. The JSON-RPC
//! layer must never see those header bytes or any stderr payload.
//!
//! [`DemuxedStream`] is the seam: reads yield a pure concatenation of the
//! agent's stdout bytes, stderr is sidelined to the log, unknown stream
//! types are dropped, and writes pass through unframed to the agent's stdin.

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use bollard::container::LogOutput;

/// Size of the per-frame multiplexing header.
pub const HEADER_LEN: usize = 8;

/// Stream type tag carried in byte 0 of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    /// Control or future stream types; payloads are dropped.
    Other(u8),
}

impl StreamKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => StreamKind::Stdin,
            1 => StreamKind::Stdout,
            2 => StreamKind::Stderr,
            other => StreamKind::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
            StreamKind::Other(byte) => byte,
        }
    }
}

/// One demultiplexed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFrame {
    pub kind: StreamKind,
    pub payload: Bytes,
}

impl MuxFrame {
    pub fn stdout(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: StreamKind::Stdout,
            payload: payload.into(),
        }
    }

    pub fn stderr(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: StreamKind::Stderr,
            payload: payload.into(),
        }
    }
}

impl From<LogOutput> for MuxFrame {
    fn from(output: LogOutput) -> Self {
        match output {
            LogOutput::StdOut { message } | LogOutput::Console { message } => MuxFrame {
                kind: StreamKind::Stdout,
                payload: message,
            },
            LogOutput::StdErr { message } => MuxFrame {
                kind: StreamKind::Stderr,
                payload: message,
            },
            LogOutput::StdIn { message } => MuxFrame {
                kind: StreamKind::Stdin,
                payload: message,
            },
        }
    }
}

/// Codec for the engine's 8-byte multiplexed framing. Decodes frames from a
/// raw hijacked connection and encodes them for simulated agents in tests.
#[derive(Debug, Default)]
pub struct MuxFrameCodec;

impl MuxFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MuxFrameCodec {
    type Item = MuxFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<MuxFrame>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        let header = src.split_to(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(MuxFrame {
            kind: StreamKind::from_byte(header[0]),
            payload,
        }))
    }

    // A short read at a frame boundary is a clean close; a trailing partial
    // frame is discarded rather than treated as an error.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<MuxFrame>, io::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !buf.is_empty() {
                    tracing::debug!(bytes = buf.len(), "discarding truncated frame at stream end");
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<MuxFrame> for MuxFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: MuxFrame, dst: &mut BytesMut) -> Result<(), io::Error> {
        if frame.payload.len() > u32::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame payload exceeds u32 length",
            ));
        }
        let mut header = [0u8; HEADER_LEN];
        header[0] = frame.kind.as_byte();
        header[4..8].copy_from_slice(&(frame.payload.len() as u32).to_be_bytes());
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// The consumer-facing duplex over a multiplexed agent stream.
///
/// Reading yields only stdout payload bytes, in arrival order. Stderr frames
/// are logged and never reach the reader. Writes go straight through to the
/// agent's stdin. Dropping the stream tears down both directions.
pub struct DemuxedStream<W> {
    stdout: mpsc::Receiver<Bytes>,
    pending: Bytes,
    input: W,
}

impl<W: AsyncWrite + Send + Unpin> DemuxedStream<W> {
    /// Build from a stream of demultiplexed frames plus the stdin writer.
    pub fn new<F>(frames: F, input: W) -> Self
    where
        F: Stream<Item = io::Result<MuxFrame>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_frames(frames, tx));
        Self {
            stdout: rx,
            pending: Bytes::new(),
            input,
        }
    }
}

/// Wrap a raw hijacked connection that still carries the 8-byte framing.
pub fn from_raw<S>(raw: S) -> DemuxedStream<WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(raw);
    let frames = FramedRead::new(read, MuxFrameCodec::new());
    DemuxedStream::new(frames, write)
}

/// Wrap an attached exec session whose frames the engine client has already
/// parsed out of the same multiplexed framing.
pub fn from_exec<E>(
    output: E,
    input: Pin<Box<dyn AsyncWrite + Send>>,
) -> DemuxedStream<Pin<Box<dyn AsyncWrite + Send>>>
where
    E: Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send + Unpin + 'static,
{
    let frames = output.map(|item| item.map(MuxFrame::from).map_err(io::Error::other));
    DemuxedStream::new(frames, input)
}

async fn pump_frames<F>(mut frames: F, tx: mpsc::Sender<Bytes>)
where
    F: Stream<Item = io::Result<MuxFrame>> + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => match frame.kind {
                StreamKind::Stdout => {
                    if tx.send(frame.payload).await.is_err() {
                        return;
                    }
                }
                StreamKind::Stderr => {
                    tracing::debug!(
                        stderr = %String::from_utf8_lossy(&frame.payload),
                        "sidelined agent stderr"
                    );
                }
                StreamKind::Stdin | StreamKind::Other(_) => {}
            },
            Err(err) => {
                tracing::debug!(error = %err, "agent stream terminated");
                return;
            }
        }
    }
}

impl<W: AsyncWrite + Send + Unpin> AsyncRead for DemuxedStream<W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }
            match this.stdout.poll_recv(cx) {
                Poll::Ready(Some(bytes)) => this.pending = bytes,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<W: AsyncWrite + Send + Unpin> AsyncWrite for DemuxedStream<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().input).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().input).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().input).poll_shutdown(cx)
    }
}
