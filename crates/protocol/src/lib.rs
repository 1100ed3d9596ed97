/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Protocol auto-detection and framing: the byte-stream ↔
//! message-bytes boundary for every connection the station accepts.
//! Three transports share this boundary — WebSocket, Mars-TLV, and
//! NDJSON — chosen once per connection and latched for its lifetime.

pub mod detect;
pub mod framer;
pub mod mars;
pub mod ndjson;
pub mod websocket;

pub use detect::{detect, Transport};
pub use framer::{Framer, FramerEvent, Writer};
