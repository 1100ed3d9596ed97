/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-connection byte-stream ↔ message-bytes conversion. Owns the
//! socket, the read buffer, and the transport choice latched for the
//! connection's lifetime on the first non-empty read.
//!
//! The socket is split on construction so a [`Writer`] handle can be
//! cloned out and pushed through from another task (the Dispatcher or
//! the Receptionist) while this connection's own task is parked in
//! [`Framer::next`] waiting on the next read — the write mutex the
//! station's Handler is built on lives here, not one layer up.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex as AsyncMutex,
};
use trc::{AddContext, EventType, ProtocolEvent, TransportEvent};

use crate::{
    detect::{detect, Transport},
    mars, ndjson, websocket,
};

const READ_CHUNK: usize = 8192;

pub enum FramerEvent {
    Message(Vec<u8>),
    /// A Mars `cmd=3` body, already split into its NDJSON lines. The
    /// caller processes each line and replies once via
    /// [`Framer::reply_batch`].
    Batch { seq: u32, lines: Vec<Vec<u8>> },
    Heartbeat,
    Eof,
}

struct WriterState<W> {
    stream: W,
    transport: Option<Transport>,
}

/// A cloneable write-side handle. Every outbound byte for a connection
/// — server pushes, receipts, heartbeat echoes, the websocket upgrade
/// response — passes through the single mutex guarding the socket's
/// write half, so concurrent callers never interleave partial frames.
pub struct Writer<W> {
    inner: Arc<AsyncMutex<WriterState<W>>>,
}

impl<W> Clone for Writer<W> {
    fn clone(&self) -> Self {
        Writer { inner: self.inner.clone() }
    }
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    fn new(stream: W) -> Self {
        Writer {
            inner: Arc::new(AsyncMutex::new(WriterState { stream, transport: None })),
        }
    }

    async fn set_transport(&self, transport: Transport) {
        self.inner.lock().await.transport = Some(transport);
    }

    async fn write_raw(&self, bytes: &[u8]) -> trc::Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .stream
            .write_all(bytes)
            .await
            .map_err(|e| EventType::Transport(TransportEvent::WriteError).into_err().reason(e))
            .caused_by(trc::location!())
    }

    /// Encodes `bytes` using the transport latched for this connection
    /// and writes it. Returns an error if the transport hasn't been
    /// detected yet (nothing has been read from this socket).
    pub async fn push(&self, bytes: &[u8]) -> trc::Result<()> {
        let encoded = {
            let guard = self.inner.lock().await;
            match guard.transport {
                Some(Transport::WebSocket) => websocket::encode_frame(bytes),
                Some(Transport::Mars) => mars::encode_packet(mars::CMD_PUSH, 0, bytes),
                Some(Transport::Ndjson) => ndjson::encode_message(bytes),
                None => {
                    return Err(EventType::Protocol(ProtocolEvent::UnknownTransport).into_err())
                        .caused_by(trc::location!())
                }
            }
        };
        self.write_raw(&encoded).await
    }
}

pub struct Framer<R, W> {
    reader: R,
    writer: Writer<W>,
    buf: BytesMut,
    transport: Option<Transport>,
}

impl<S> Framer<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = split(stream);
        Framer {
            reader,
            writer: Writer::new(writer),
            buf: BytesMut::new(),
            transport: None,
        }
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Framer<R, W> {
    pub fn transport(&self) -> Option<Transport> {
        self.transport
    }

    /// A clone of the write-side handle, safe to hand to the
    /// Dispatcher or the Receptionist for concurrent pushes.
    pub fn writer(&self) -> Writer<W> {
        self.writer.clone()
    }

    async fn fill(&mut self) -> trc::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self
            .reader
            .read(&mut chunk)
            .await
            .map_err(|e| EventType::Transport(TransportEvent::ReadError).into_err().reason(e))
            .caused_by(trc::location!())?;
        if n == 0 {
            return Ok(false);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(true)
    }

    async fn ensure_transport(&mut self) -> trc::Result<bool> {
        if self.transport.is_some() {
            return Ok(true);
        }
        loop {
            if let Some(t) = detect(&self.buf) {
                self.transport = Some(t);
                self.writer.set_transport(t).await;
                if t == Transport::WebSocket {
                    self.complete_websocket_handshake().await?;
                }
                return Ok(true);
            }
            // The 20-byte floor is the Mars header's own minimum size, so
            // it only disqualifies a Mars attempt. A WebSocket upgrade
            // (§6: a Host header or other lines may precede
            // Sec-WebSocket-Key, and TCP may deliver the request line in
            // fragments) can still be mid-flight past 20 bytes; keep
            // reading as long as the buffer still looks like text with no
            // terminating blank line yet.
            if self.buf.len() >= 20 && !looks_like_http_request_in_progress(&self.buf) {
                return Err(EventType::Protocol(ProtocolEvent::HeaderImplausible).into_err())
                    .caused_by(trc::location!());
            }
            if !self.fill().await? {
                return Ok(false);
            }
        }
    }

    async fn complete_websocket_handshake(&mut self) -> trc::Result<()> {
        loop {
            if let Some(pos) = find_subslice(&self.buf, b"\r\n\r\n") {
                let header_end = pos + 4;
                let request = String::from_utf8_lossy(&self.buf[..header_end]).into_owned();
                let key = websocket::extract_key(&request).ok_or_else(|| {
                    EventType::Protocol(ProtocolEvent::Malformed)
                        .into_err()
                        .details("missing Sec-WebSocket-Key")
                })
                .caused_by(trc::location!())?;
                let response = websocket::handshake_response(key);
                self.buf.advance(header_end);
                self.writer.write_raw(&response).await?;
                return Ok(());
            }
            if !self.fill().await? {
                return Err(EventType::Transport(TransportEvent::Closed).into_err())
                    .caused_by(trc::location!());
            }
        }
    }

    /// Returns the next dispatchable event: a complete message, a
    /// batch of Mars `cmd=3` lines, a heartbeat (already replied to),
    /// or EOF. Partial frames remain buffered across calls.
    pub async fn next(&mut self) -> trc::Result<FramerEvent> {
        loop {
            if !self.ensure_transport().await? {
                return Ok(FramerEvent::Eof);
            }
            match self.transport.expect("ensured above") {
                Transport::WebSocket => {
                    if let Some(event) = self.try_next_websocket()? {
                        return Ok(event);
                    }
                }
                Transport::Mars => {
                    if let Some(event) = self.try_next_mars().await? {
                        return Ok(event);
                    }
                }
                Transport::Ndjson => {
                    if let Some(event) = self.try_next_ndjson().await? {
                        return Ok(event);
                    }
                }
            }
            if !self.fill().await? {
                return Ok(FramerEvent::Eof);
            }
        }
    }

    fn try_next_websocket(&mut self) -> trc::Result<Option<FramerEvent>> {
        match websocket::decode_frame(&self.buf)? {
            Some((decoded, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(match decoded {
                    websocket::DecodedFrame::Text(bytes) => FramerEvent::Message(bytes),
                    websocket::DecodedFrame::Close => FramerEvent::Eof,
                    websocket::DecodedFrame::ControlIgnored => return Ok(None),
                }))
            }
            None => Ok(None),
        }
    }

    async fn try_next_mars(&mut self) -> trc::Result<Option<FramerEvent>> {
        let Some(packet) = mars::parse_packet(&self.buf) else {
            return Ok(None);
        };
        let raw = self.buf[..packet.consumed].to_vec();
        self.buf.advance(packet.consumed);
        match packet.header.cmd {
            mars::CMD_SEND => {
                let lines = mars::split_send_body(&packet.body);
                Ok(Some(FramerEvent::Batch {
                    seq: packet.header.seq,
                    lines,
                }))
            }
            mars::CMD_NOOP => {
                self.writer.write_raw(&raw).await?;
                Ok(Some(FramerEvent::Heartbeat))
            }
            other => {
                trc::event!(EventType::Protocol(ProtocolEvent::Malformed), cmd = other);
                Ok(None)
            }
        }
    }

    async fn try_next_ndjson(&mut self) -> trc::Result<Option<FramerEvent>> {
        match ndjson::next_line(&self.buf) {
            Some((line, consumed)) => {
                self.buf.advance(consumed);
                match line {
                    ndjson::Line::Envelope(bytes) => Ok(Some(FramerEvent::Message(bytes))),
                    ndjson::Line::Heartbeat => {
                        self.writer.write_raw(&ndjson::encode_heartbeat()).await?;
                        Ok(Some(FramerEvent::Heartbeat))
                    }
                }
            }
            None => Ok(None),
        }
    }

    /// Encodes and writes one outbound message using the transport
    /// currently in force. Equivalent to `self.writer().push(bytes)`,
    /// kept as a direct method for callers that already hold `&mut
    /// Framer` (tests, the handshake reply path).
    pub async fn write_message(&mut self, bytes: &[u8]) -> trc::Result<()> {
        self.writer.push(bytes).await
    }

    /// Replies to a Mars `cmd=3` batch with the concatenation of the
    /// successfully processed lines' responses, echoing `seq`.
    pub async fn reply_batch(&mut self, seq: u32, responses: &[Vec<u8>]) -> trc::Result<()> {
        let body = mars::join_send_responses(responses);
        let packet = mars::encode_packet(mars::CMD_SEND, seq, &body);
        self.writer.write_raw(&packet).await
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Whether `buf` could still be the start of an HTTP request whose
/// blank-line terminator (and `Sec-WebSocket-Key`) just hasn't arrived
/// yet: no NUL bytes (Mars headers are binary and start with one
/// inside the first 20 bytes for any non-trivial version/length) and
/// no `\r\n\r\n` yet (a complete header would already have tripped
/// `detect`'s WebSocket check).
fn looks_like_http_request_in_progress(buf: &[u8]) -> bool {
    !buf.contains(&0u8) && find_subslice(buf, b"\r\n\r\n").is_none()
}
