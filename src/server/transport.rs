//! Transport seams
//!
//! A connection is split into a [`MessageSource`] that yields decoded client
//! envelopes and a [`MessageSink`] that writes server envelopes. The gateway
//! drives both halves and never sees framing.
//!
//! Two implementations ship with the crate: tokio channels, for in-process
//! clients and tests, and newline-delimited JSON over any async byte stream.

use std::future::Future;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::error::{Error, Result};
use crate::protocol::{ClientEnvelope, Hello};
use crate::session::Outgoing;

/// Longest accepted JSON line
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Inbound half of a connection
pub trait MessageSource: Send {
    /// Next envelope, `None` once the peer has finished sending
    fn recv(&mut self) -> impl Future<Output = Result<Option<ClientEnvelope>>> + Send;
}

/// Outbound half of a connection
pub trait MessageSink: Send {
    fn send(&mut self, msg: Outgoing) -> impl Future<Output = Result<()>> + Send;
}

/// Identity for a connection from its metadata, or a fresh ID when absent
pub fn user_id_from_metadata(user_id: Option<&str>) -> String {
    match user_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

impl MessageSource for mpsc::Receiver<ClientEnvelope> {
    async fn recv(&mut self) -> Result<Option<ClientEnvelope>> {
        Ok(mpsc::Receiver::recv(self).await)
    }
}

impl MessageSink for mpsc::Sender<Outgoing> {
    async fn send(&mut self, msg: Outgoing) -> Result<()> {
        mpsc::Sender::send(self, msg)
            .await
            .map_err(|_| Error::Transport("receiver dropped".into()))
    }
}

/// One decoded input line
#[derive(Debug)]
enum Line {
    Text(String),
    /// Longer than [`MAX_LINE_LENGTH`]; its bytes are skipped up to the next newline
    Oversized,
}

/// Line decoder that reports over-long lines as items
///
/// `FramedRead` stops for good after a decoder error, so the length limit
/// must not surface as one.
struct BoundedLines(LinesCodec);

impl Decoder for BoundedLines {
    type Item = Line;
    type Error = LinesCodecError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<Line>, LinesCodecError> {
        match self.0.decode(buf) {
            Ok(line) => Ok(line.map(Line::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Line::Oversized)),
            Err(e) => Err(e),
        }
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<Line>, LinesCodecError> {
        match self.0.decode_eof(buf) {
            Ok(line) => Ok(line.map(Line::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Line::Oversized)),
            Err(e) => Err(e),
        }
    }
}

/// Reads one JSON envelope per line
pub struct JsonLinesSource<R> {
    lines: FramedRead<R, BoundedLines>,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        let codec = BoundedLines(LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        Self {
            lines: FramedRead::new(reader, codec),
        }
    }

    /// Read the handshake line
    pub async fn hello(&mut self) -> Result<Hello> {
        match self.next_line().await? {
            Some(Line::Text(line)) => Ok(serde_json::from_str(&line)?),
            Some(Line::Oversized) => Err(Error::Transport("hello line too long".into())),
            None => Err(Error::Transport("connection closed before hello".into())),
        }
    }

    async fn next_line(&mut self) -> Result<Option<Line>> {
        while let Some(line) = self.lines.next().await {
            match line.map_err(|e| Error::Transport(e.to_string()))? {
                Line::Text(text) if text.trim().is_empty() => continue,
                line => return Ok(Some(line)),
            }
        }
        Ok(None)
    }
}

impl<R: AsyncRead + Unpin + Send> MessageSource for JsonLinesSource<R> {
    async fn recv(&mut self) -> Result<Option<ClientEnvelope>> {
        let line = match self.next_line().await? {
            Some(Line::Text(line)) => line,
            Some(Line::Oversized) => {
                tracing::debug!(max = MAX_LINE_LENGTH, "Discarding over-long line");
                return Ok(Some(ClientEnvelope::Unknown));
            }
            None => return Ok(None),
        };

        // A bad line is discarded by the engine rather than ending the connection
        match serde_json::from_str(&line) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                tracing::debug!(error = %e, "Malformed envelope");
                Ok(Some(ClientEnvelope::Unknown))
            }
        }
    }
}

/// Writes one JSON envelope per line
pub struct JsonLinesSink<W> {
    lines: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            lines: FramedWrite::new(writer, LinesCodec::new()),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> MessageSink for JsonLinesSink<W> {
    async fn send(&mut self, msg: Outgoing) -> Result<()> {
        let line = serde_json::to_string(&*msg)?;
        self.lines
            .send(line)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
