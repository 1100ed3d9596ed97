/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! `StationContext` is the generalized `Server`/`Core`/`Inner`
//! analogue the DESIGN NOTES call for: every global singleton the
//! source reaches for (facebook, database, session server, dispatcher,
//! receptionist, monitor) becomes a field here, constructed once and
//! passed into each connection task instead of looked up through a
//! module-level global.

use std::sync::Arc;

use common::{
    GuestQueue, Identifier, MailboxStore, Monitor, MonitorEvent, NetworkKind, SessionRegistry,
    StationConfig,
};
use tokio::sync::mpsc;

use crate::{
    commands::{self, CommandTable},
    handler::Push,
    neighbor::NeighborForward,
};

pub struct StationContext {
    pub self_id: Identifier,
    pub neighbor_id: Option<Identifier>,
    pub config: StationConfig,
    pub registry: SessionRegistry<Arc<dyn Push>>,
    pub mailbox: MailboxStore,
    pub guests: GuestQueue,
    pub monitor: Monitor,
    pub barrack: Arc<directory::MemoryBarrack>,
    pub commands: CommandTable,
    pub neighbor: Arc<dyn NeighborForward>,
}

impl StationContext {
    /// Builds a context against a real `Barrack` backend, a resolved
    /// station identity, an optional neighboring-station identity, and
    /// the parsed runtime configuration. Returns the monitor's
    /// receiver alongside the context so the caller can spawn whatever
    /// consumes monitor events (a log sink, a metrics exporter).
    pub fn new(
        self_id: Identifier,
        neighbor_id: Option<Identifier>,
        config: StationConfig,
        barrack: Arc<directory::MemoryBarrack>,
        neighbor: Arc<dyn NeighborForward>,
    ) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (monitor, monitor_rx) = Monitor::new();
        let mailbox = MailboxStore::new(config.state_root.clone());
        let ctx = StationContext {
            self_id,
            neighbor_id,
            config,
            registry: SessionRegistry::new(),
            mailbox,
            guests: GuestQueue::new(),
            monitor,
            barrack,
            commands: commands::default_table(),
            neighbor,
        };
        (ctx, monitor_rx)
    }
}

#[cfg(feature = "test_mode")]
impl StationContext {
    /// A context wired to an in-memory `Barrack` and a logging
    /// neighbor-forward stub, for unit and scenario tests.
    pub fn test_default() -> Self {
        let self_id = Identifier::new("station", "dim.chat", NetworkKind::Station);
        let (ctx, _rx) = StationContext::new(
            self_id,
            None,
            StationConfig::default(),
            Arc::new(directory::MemoryBarrack::new()),
            Arc::new(crate::neighbor::LoggingNeighborForward),
        );
        ctx
    }
}
