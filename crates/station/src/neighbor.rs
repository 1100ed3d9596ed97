/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The `forward-to-neighbor` hook: peer-station delivery, named as a
//! single interface contract per §1/§9 ("no clustering or
//! multi-station replication... a single `send-to-neighbor` hook").
//! No in-core implementation is required; [`LoggingNeighborForward`]
//! is the default, observability-only stand-in.

use async_trait::async_trait;

#[async_trait]
pub trait NeighborForward: Send + Sync {
    async fn forward(&self, raw: &[u8]) -> trc::Result<()>;
}

/// Logs and succeeds. A real cluster hop would serialize this over
/// whatever transport links stations together; that transport is
/// explicitly out of this core's scope.
pub struct LoggingNeighborForward;

#[async_trait]
impl NeighborForward for LoggingNeighborForward {
    async fn forward(&self, raw: &[u8]) -> trc::Result<()> {
        tracing::debug!(bytes = raw.len(), "forward_to_neighbor (stub)");
        Ok(())
    }
}
