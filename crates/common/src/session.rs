/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The authenticated binding of an [`Identifier`](crate::id::Identifier)
//! to a socket. A `Session` by itself does no I/O; it is a value the
//! registry and handshake machine mutate under one lock.

use std::{
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::RngCore;

use crate::id::Identifier;

pub type ClientAddress = SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Challenged,
    Running,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identifier,
    pub client_address: ClientAddress,
    pub session_key: [u8; 16],
    pub created_at: u64,
    pub last_seen_at: u64,
    pub state: SessionState,
}

impl Session {
    pub fn fresh(identity: Identifier, client_address: ClientAddress) -> Self {
        let now = now_secs();
        Session {
            identity,
            client_address,
            session_key: [0u8; 16],
            created_at: now,
            last_seen_at: now,
            state: SessionState::Fresh,
        }
    }

    /// FRESH → CHALLENGED. Generates the 128-bit key the client must
    /// echo back to reach RUNNING.
    pub fn challenge(&mut self) -> [u8; 16] {
        let mut key = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key);
        self.session_key = key;
        self.state = SessionState::Challenged;
        self.touch();
        key
    }

    pub fn activate(&mut self) {
        self.state = SessionState::Running;
        self.touch();
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_seen_at = now_secs();
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
