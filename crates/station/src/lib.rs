/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The connection-handling core: protocol auto-detection, the session
//! registry, the handshake state machine, the dispatcher, the durable
//! mailbox drain loop, and the per-connection task tying them all
//! together over one TCP socket.

pub mod commands;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod handshake;
pub mod neighbor;
pub mod receptionist;

pub use context::StationContext;
pub use handler::{Handler, Push};
