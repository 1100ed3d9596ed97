/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Non-blocking event sink. A bounded channel backs it so a slow or
//! absent consumer never stalls a connection task: `record` uses
//! `try_send` and silently drops the event on saturation, matching the
//! "best-effort, may drop" contract.

use tokio::sync::mpsc;

use crate::{id::Identifier, session::ClientAddress};

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    ClientConnected(ClientAddress),
    UserLoggedIn(Identifier, ClientAddress),
    UserLoggedOut(Identifier, ClientAddress),
    ClientDisconnected(ClientAddress),
}

const CHANNEL_CAPACITY: usize = 1024;

pub struct Monitor {
    tx: mpsc::Sender<MonitorEvent>,
}

impl Monitor {
    /// Returns the sink handle plus the receiver a consumer task pulls
    /// events from. Dropping the receiver turns every `record` call
    /// into a silent no-op, which is an acceptable degraded mode.
    pub fn new() -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Monitor { tx }, rx)
    }

    pub fn record(&self, event: MonitorEvent) {
        let _ = self.tx.try_send(event);
    }
}
