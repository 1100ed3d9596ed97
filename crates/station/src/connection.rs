/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The per-connection task: owns one accepted socket end to end, from
//! protocol auto-detection through to registry cleanup on EOF. Three
//! listeners (websocket/mars/ndjson bind addresses) all hand their
//! accepted sockets to [`handle_connection`] — auto-detection makes
//! which port accepted the connection irrelevant to what happens next.

use std::sync::Arc;

use common::{envelope::Envelope, ClientAddress, Identifier, MonitorEvent};
use directory::Barrack;
use protocol::{Framer, FramerEvent};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;
use trc::{AuthEvent, EventType};

use crate::{
    commands::{self, CommandContent},
    context::StationContext,
    handler::{Handler, Push},
    handshake::{self, HandshakeOutcome},
};

pub async fn handle_connection<S>(ctx: Arc<StationContext>, stream: S, addr: ClientAddress)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let span = tracing::info_span!("session", addr = %addr);
    session_loop(ctx, stream, addr).instrument(span).await;
}

async fn session_loop<S>(ctx: Arc<StationContext>, stream: S, addr: ClientAddress)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut framer = Framer::new(stream);
    let handler: Arc<dyn Push> = Arc::new(Handler::new(framer.writer()));
    ctx.registry.bind_handler(addr, handler);
    ctx.monitor.record(MonitorEvent::ClientConnected(addr));

    loop {
        let next = tokio::time::timeout(ctx.config.idle_timeout, framer.next()).await;
        let event = match next {
            Ok(Ok(event)) => event,
            Ok(Err(err)) => {
                trc::error!(err);
                break;
            }
            Err(_) => {
                tracing::debug!("idle timeout, closing connection");
                break;
            }
        };
        match event {
            FramerEvent::Eof => break,
            FramerEvent::Heartbeat => continue,
            FramerEvent::Message(bytes) => {
                if let Some(reply) = process_one(&ctx, addr, &bytes).await {
                    if let Err(err) = framer.write_message(&reply.encode()).await {
                        trc::error!(err);
                        break;
                    }
                }
            }
            FramerEvent::Batch { seq, lines } => {
                let mut responses = Vec::with_capacity(lines.len());
                for line in &lines {
                    if let Some(reply) = process_one(&ctx, addr, line).await {
                        responses.push(reply.encode());
                    }
                }
                if let Err(err) = framer.reply_batch(seq, &responses).await {
                    trc::error!(err);
                    break;
                }
            }
        }
    }

    for identity in ctx.registry.running_identities_at(addr) {
        ctx.monitor.record(MonitorEvent::UserLoggedOut(identity, addr));
    }
    ctx.registry.remove_by_addr(addr);
    ctx.monitor.record(MonitorEvent::ClientDisconnected(addr));
}

/// Decodes, authenticates, and routes one wire message. Returns the
/// envelope to send back, if any — a handshake reply, a receipt, or a
/// command response. Silent drops (`None`) cover replay and
/// not-yet-authenticated traffic, matching the "drop, never reply with
/// an error envelope" posture the Dispatcher itself takes for replay.
async fn process_one(ctx: &StationContext, addr: ClientAddress, raw: &[u8]) -> Option<Envelope> {
    let envelope = match Envelope::decode(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            trc::error!(err);
            return None;
        }
    };

    let sender = match ctx.barrack.resolve(&envelope.sender).await {
        Some(sender) => sender,
        None => {
            trc::event!(EventType::Auth(AuthEvent::NotAuthenticated), sender = %envelope.sender);
            return None;
        }
    };

    if let Some(CommandContent::Handshake { session }) = commands::parse_command(&envelope) {
        return Some(handle_handshake(ctx, &sender, addr, session).await);
    }

    if ctx.registry.state(&sender, addr) != Some(common::SessionState::Running) {
        trc::event!(EventType::Auth(AuthEvent::NotAuthenticated), sender = %sender);
        return None;
    }

    let canonical = common::envelope::canonical(&envelope);
    if !ctx.barrack.verify(&sender, &canonical, &envelope.signature).await {
        trc::event!(EventType::Auth(AuthEvent::SignatureInvalid), sender = %sender);
        return None;
    }

    crate::dispatcher::dispatch(ctx, &sender, raw, &envelope).await
}

async fn handle_handshake(
    ctx: &StationContext,
    sender: &Identifier,
    addr: ClientAddress,
    session: Option<[u8; 16]>,
) -> Envelope {
    match handshake::handle(&ctx.registry, sender, addr, session) {
        HandshakeOutcome::Again(key) => commands::build_handshake_again(ctx, sender, key),
        HandshakeOutcome::Success { freshly_activated } => {
            if freshly_activated {
                ctx.guests.push(sender.clone());
                ctx.monitor.record(MonitorEvent::UserLoggedIn(sender.clone(), addr));
            }
            commands::build_handshake_success(ctx, sender)
        }
    }
}
