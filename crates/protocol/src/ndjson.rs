/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Newline-delimited JSON: one envelope per line, an empty line is a
//! heartbeat, the server's heartbeat reply is a bare `\n`.

pub enum Line {
    Envelope(Vec<u8>),
    Heartbeat,
}

/// Pulls one `\n`-terminated line off the front of `buf`. Returns the
/// line (trimmed of the trailing `\r` if present) and the number of
/// bytes consumed including the newline, or `None` if no newline has
/// arrived yet.
pub fn next_line(buf: &[u8]) -> Option<(Line, usize)> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut content = &buf[..pos];
    if content.ends_with(b"\r") {
        content = &content[..content.len() - 1];
    }
    let line = if content.is_empty() {
        Line::Heartbeat
    } else {
        Line::Envelope(content.to_vec())
    };
    Some((line, pos + 1))
}

pub fn encode_message(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.extend_from_slice(bytes);
    out.push(b'\n');
    out
}

pub fn encode_heartbeat() -> Vec<u8> {
    vec![b'\n']
}
