/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Mars-TLV framing: a little-endian fixed header followed by a body,
//! the whole packet length being `head_length + body_length`.

pub const CMD_SEND: u16 = 3;
pub const CMD_NOOP: u16 = 6;
pub const CMD_PUSH: u16 = 10001;

const FIXED_FIELDS_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u16,
    pub cmd: u16,
    pub seq: u32,
    pub head_length: u32,
    pub body_length: u32,
}

impl Header {
    pub fn parse(buf: &[u8]) -> Option<Header> {
        if buf.len() < FIXED_FIELDS_LEN {
            return None;
        }
        Some(Header {
            version: u16::from_le_bytes([buf[0], buf[1]]),
            cmd: u16::from_le_bytes([buf[2], buf[3]]),
            seq: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            head_length: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            body_length: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    pub fn total_len(&self) -> usize {
        self.head_length as usize + self.body_length as usize
    }
}

/// A full Mars packet split into header and body, plus the number of
/// bytes it occupied in the source buffer.
pub struct Packet {
    pub header: Header,
    pub body: Vec<u8>,
    pub consumed: usize,
}

/// Attempts to pull one complete packet off the front of `buf`.
/// Returns `None` if the header isn't fully buffered yet, or if the
/// declared `body_length` extends past what has been read so far —
/// the caller must retain the bytes and wait for more.
pub fn parse_packet(buf: &[u8]) -> Option<Packet> {
    let header = Header::parse(buf)?;
    let total = header.total_len();
    if buf.len() < total {
        return None;
    }
    let body = buf[header.head_length as usize..total].to_vec();
    Some(Packet {
        header,
        body,
        consumed: total,
    })
}

/// Encodes a packet: `head_length` is always the fixed 16-byte field
/// set (no reserved padding is emitted on writes we originate).
pub fn encode_packet(cmd: u16, seq: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FIXED_FIELDS_LEN + body.len());
    out.extend_from_slice(&200u16.to_le_bytes());
    out.extend_from_slice(&cmd.to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&(FIXED_FIELDS_LEN as u32).to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Splits a `cmd=3` body into its newline-delimited NDJSON lines,
/// dropping empty lines.
pub fn split_send_body(body: &[u8]) -> Vec<Vec<u8>> {
    body.split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| line.to_vec())
        .collect()
}

/// Joins successful per-line responses into one `cmd=3` reply body,
/// trailing-newline-terminated, per the source's partial-response
/// behavior.
pub fn join_send_responses(responses: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for response in responses {
        out.extend_from_slice(response);
        out.push(b'\n');
    }
    out
}
