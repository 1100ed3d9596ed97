/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The per-connection object that owns a socket's write side and is
//! the only thing allowed to write to it. [`Handler`] wraps the
//! [`protocol::framer::Writer`] handle a connection's [`Framer`] hands
//! out; cloning a `Writer` is cheap (one `Arc`), so every `Handler`
//! stored in the [`SessionRegistry`](common::SessionRegistry) can be
//! pushed to from the Dispatcher or the Receptionist while the
//! connection's own task is blocked reading.

use async_trait::async_trait;
use protocol::framer::Writer;
use tokio::io::AsyncWrite;

/// Narrow seam the Dispatcher and Receptionist push through. Kept as a
/// trait object (`Arc<dyn Push>`) so the station's core plumbing never
/// needs to know the concrete socket type a connection was accepted
/// on. The registry keys handlers by [`ClientAddress`](common::ClientAddress)
/// independently (see [`SessionRegistry::bind_handler`](common::SessionRegistry::bind_handler)),
/// so `Push` itself carries no address.
#[async_trait]
pub trait Push: Send + Sync {
    async fn push(&self, bytes: &[u8]) -> trc::Result<()>;
}

pub struct Handler<W> {
    writer: Writer<W>,
}

impl<W> Handler<W> {
    pub fn new(writer: Writer<W>) -> Self {
        Handler { writer }
    }
}

#[async_trait]
impl<W> Push for Handler<W>
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn push(&self, bytes: &[u8]) -> trc::Result<()> {
        self.writer.push(bytes).await
    }
}
