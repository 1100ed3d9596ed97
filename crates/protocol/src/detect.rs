/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! One-shot classification of the first bytes read from a freshly
//! accepted socket. The choice is latched for the connection's
//! lifetime by the caller; this module only answers "which, if any".

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    WebSocket,
    Mars,
    Ndjson,
}

const MARS_VERSION: u16 = 200;
const MARS_MIN_HEAD_LEN: u32 = 20;
const MARS_MAX_TOTAL: u64 = 1024 * 1024;

pub fn detect(buf: &[u8]) -> Option<Transport> {
    if contains_subslice(buf, b"Sec-WebSocket-Key") {
        return Some(Transport::WebSocket);
    }
    if buf.len() >= 20 {
        let version = u16::from_le_bytes([buf[0], buf[1]]);
        let head_length = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let body_length = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        if version == MARS_VERSION
            && head_length >= MARS_MIN_HEAD_LEN
            && (head_length as u64 + body_length as u64) <= MARS_MAX_TOTAL
        {
            return Some(Transport::Mars);
        }
    }
    if buf.starts_with(b"{\"") && !buf.contains(&0u8) {
        return Some(Transport::Ndjson);
    }
    None
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
