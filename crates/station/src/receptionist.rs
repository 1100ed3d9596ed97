/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The single background worker that drains a newly-online identity's
//! mailbox into its bound handler. A blocking-with-timeout pop on the
//! [`GuestQueue`](common::GuestQueue) replaces the source's
//! thread-plus-sleep loop with no busy-wait (§9 DESIGN NOTES).

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use common::Identifier;
use trc::AddContext;

use crate::context::StationContext;

const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Runs until `running` is cleared. Intended to be spawned once per
/// station and awaited to completion during shutdown.
pub async fn run(ctx: &StationContext, running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        let Some(identity) = ctx.guests.pop_timeout(POLL_TIMEOUT).await else {
            continue;
        };
        if let Err(err) = drain_one(ctx, &identity).await {
            trc::error!(err);
            tokio::time::sleep(RETRY_BACKOFF).await;
            ctx.guests.push_back(identity);
        }
    }
}

async fn drain_one(ctx: &StationContext, identity: &Identifier) -> trc::Result<()> {
    let Some(handler) = ctx.registry.handler_for(identity) else {
        // The guest already left; nothing to drain into.
        return Ok(());
    };
    let records = ctx.mailbox.drain(identity).await.caused_by(trc::location!())?;
    for record in &records {
        handler.push(record).await.caused_by(trc::location!())?;
    }
    ctx.mailbox.truncate(identity).await.caused_by(trc::location!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use common::{ClientAddress, NetworkKind};
    use std::sync::Arc;

    fn bob() -> Identifier {
        Identifier::new("bob", "dim.chat", NetworkKind::User)
    }

    fn addr() -> ClientAddress {
        "127.0.0.1:9200".parse().unwrap()
    }

    #[tokio::test]
    async fn drains_accumulated_mail_in_order() {
        let ctx = StationContext::test_default();
        ctx.mailbox.append(&bob(), b"one").await.unwrap();
        ctx.mailbox.append(&bob(), b"two").await.unwrap();

        let (mut client, server) = tokio::io::duplex(4096);
        let mut framer = protocol::Framer::new(server);
        use tokio::io::AsyncWriteExt;
        client.write_all(b"{\"a\":1}\n").await.unwrap();
        framer.next().await.unwrap(); // latches the NDJSON transport

        let handler: Arc<dyn crate::handler::Push> = Arc::new(Handler::new(framer.writer()));
        ctx.registry.bind_handler(addr(), handler.clone());
        ctx.registry.new_session(bob(), addr());
        ctx.registry.promote(&bob(), addr());
        ctx.registry.activate(&bob(), addr());

        drain_one(&ctx, &bob()).await.unwrap();
        assert!(ctx.mailbox.drain(&bob()).await.unwrap().is_empty());

        let mut buf = vec![0u8; 8];
        use tokio::io::AsyncReadExt;
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"one\ntwo\n");
    }

    #[tokio::test]
    async fn discards_identity_with_no_bound_handler() {
        let ctx = StationContext::test_default();
        ctx.mailbox.append(&bob(), b"stale").await.unwrap();
        drain_one(&ctx, &bob()).await.unwrap();
        // No handler bound, so the mailbox is left untouched for a
        // future connection to drain.
        assert_eq!(ctx.mailbox.drain(&bob()).await.unwrap(), vec![b"stale".to_vec()]);
    }
}
