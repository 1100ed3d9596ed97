/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! RFC 6455 handshake and a minimal text-frame codec: masked client
//! frames in, unmasked opcode-0x81 frames out, no fragmentation.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};
use trc::{AddContext, EventType, ProtocolEvent};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Builds the fixed upgrade response, advertising subprotocol `dimchat`.
pub fn handshake_response(client_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         Sec-WebSocket-Protocol: dimchat\r\n\r\n",
        accept_key(client_key)
    )
    .into_bytes()
}

/// Extracts the `Sec-WebSocket-Key` header value from a raw HTTP
/// upgrade request.
pub fn extract_key(request: &str) -> Option<&str> {
    request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("Sec-WebSocket-Key") {
            Some(value.trim())
        } else {
            None
        }
    })
}

pub enum DecodedFrame {
    Text(Vec<u8>),
    Close,
    ControlIgnored,
}

/// Decodes one frame from the front of `buf`. Returns `None` if the
/// buffer does not yet hold a complete frame (caller should read more).
pub fn decode_frame(buf: &[u8]) -> trc::Result<Option<(DecodedFrame, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let fin = buf[0] & 0x80 != 0;
    let opcode = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;
    let mut len = (buf[1] & 0x7F) as u64;
    let mut offset = 2usize;

    if len == 126 {
        if buf.len() < offset + 2 {
            return Ok(None);
        }
        len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as u64;
        offset += 2;
    } else if len == 127 {
        if buf.len() < offset + 8 {
            return Ok(None);
        }
        len = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
    }

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let total_needed = offset + len as usize;
    if buf.len() < total_needed {
        return Ok(None);
    }

    if !fin {
        return Err(EventType::Protocol(ProtocolEvent::Malformed)
            .into_err()
            .details("fragmented websocket frames are not supported"))
        .caused_by(trc::location!());
    }

    let mut payload = buf[offset..total_needed].to_vec();
    if let Some(key) = mask_key {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }

    let decoded = match opcode {
        OPCODE_TEXT => DecodedFrame::Text(payload),
        OPCODE_BINARY => {
            return Err(EventType::Protocol(ProtocolEvent::Malformed)
                .into_err()
                .details("binary websocket frames are rejected"))
            .caused_by(trc::location!())
        }
        OPCODE_CLOSE => DecodedFrame::Close,
        OPCODE_PING | OPCODE_PONG => DecodedFrame::ControlIgnored,
        _ => DecodedFrame::ControlIgnored,
    };
    Ok(Some((decoded, total_needed)))
}

/// Encodes `payload` as a single unmasked text frame (opcode `0x81`).
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | OPCODE_TEXT);
    let len = payload.len();
    if len <= 125 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}
