//! Wire codec
//!
//! Frames protocol messages as `Content-Length: N\r\n\r\n<N bytes of JSON>`.
//! The read half is a lazy `Stream` of decoded messages; the write half is a
//! single guarded sink that serializes concurrent senders and can be closed
//! exactly once.

use crate::error::{DebugError, Result};
use crate::protocol::ProtocolMessage;
use bytes::{Buf, BufMut, BytesMut};
use futures::SinkExt;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Boxed read half of an adapter connection
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed write half of an adapter connection
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Decoded message stream; ends when the underlying stream closes
pub type MessageStream = FramedRead<BoxedReader, DapCodec>;

/// Content-Length framed JSON codec
#[derive(Debug, Clone)]
pub struct DapCodec {
    max_message_bytes: usize,
    /// Body length of the frame whose header has already been consumed
    pending_body: Option<usize>,
}

impl DapCodec {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            max_message_bytes,
            pending_body: None,
        }
    }

    fn parse_header(&self, header: &[u8]) -> Result<usize> {
        let header = std::str::from_utf8(header)
            .map_err(|e| DebugError::Protocol(format!("Header is not UTF-8: {}", e)))?;

        let mut content_length = None;
        for line in header.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(DebugError::Protocol(format!("Malformed header line: {:?}", line)));
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let len = value.trim().parse::<usize>().map_err(|_| {
                    DebugError::Protocol(format!("Invalid Content-Length: {:?}", value.trim()))
                })?;
                content_length = Some(len);
            }
        }

        let len = content_length
            .ok_or_else(|| DebugError::Protocol("Missing Content-Length header".to_string()))?;
        if len > self.max_message_bytes {
            return Err(DebugError::Protocol(format!(
                "Frame of {} bytes exceeds limit of {} bytes",
                len, self.max_message_bytes
            )));
        }
        Ok(len)
    }
}

impl Default for DapCodec {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl Decoder for DapCodec {
    type Item = ProtocolMessage;
    type Error = DebugError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolMessage>> {
        let body_len = match self.pending_body {
            Some(len) => len,
            None => {
                let Some(end) = src
                    .windows(HEADER_TERMINATOR.len())
                    .position(|w| w == HEADER_TERMINATOR)
                else {
                    if src.len() > self.max_message_bytes {
                        return Err(DebugError::Protocol(
                            "Header section exceeds frame limit".to_string(),
                        ));
                    }
                    return Ok(None);
                };
                let len = self.parse_header(&src[..end])?;
                src.advance(end + HEADER_TERMINATOR.len());
                self.pending_body = Some(len);
                len
            }
        };

        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.pending_body = None;
        let body = src.split_to(body_len);
        let message = serde_json::from_slice::<ProtocolMessage>(&body)
            .map_err(|e| DebugError::Protocol(format!("Invalid message body: {}", e)))?;
        Ok(Some(message))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ProtocolMessage>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() && self.pending_body.is_none() => Ok(None),
            None => Err(DebugError::Protocol(
                "Stream closed in the middle of a frame".to_string(),
            )),
        }
    }
}

impl Encoder<&ProtocolMessage> for DapCodec {
    type Error = DebugError;

    fn encode(&mut self, message: &ProtocolMessage, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Single writer for one adapter connection
///
/// `send` holds the sink lock for the whole frame, so concurrent senders never
/// interleave bytes. Once closed the sender stays closed.
pub struct WireSender {
    sink: Mutex<Option<FramedWrite<BoxedWriter, DapCodec>>>,
}

impl WireSender {
    pub fn new(writer: BoxedWriter, codec: DapCodec) -> Self {
        Self {
            sink: Mutex::new(Some(FramedWrite::new(writer, codec))),
        }
    }

    /// Frame and write one message
    pub async fn send(&self, message: &ProtocolMessage) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| DebugError::Terminated("wire closed".to_string()))?;
        sink.send(message).await
    }

    /// Flush and drop the write half; later sends fail with `Terminated`
    pub async fn close(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = SinkExt::<&ProtocolMessage>::close(&mut sink).await {
                tracing::debug!(error = %e, "Error closing adapter write half");
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.sink.lock().await.is_none()
    }
}

/// Split a duplex connection into a sender and a lazy message stream
pub fn wire(
    reader: BoxedReader,
    writer: BoxedWriter,
    max_message_bytes: usize,
) -> (WireSender, MessageStream) {
    let codec = DapCodec::new(max_message_bytes);
    (
        WireSender::new(writer, codec.clone()),
        FramedRead::new(reader, codec),
    )
}
