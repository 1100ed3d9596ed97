/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Routes one inbound envelope, once its sender session is RUNNING, to
//! exactly one of: a station command processor, an online handler, a
//! mailbox, the neighboring station, or a rejection receipt. Handshake
//! envelopes never reach here — the connection task intercepts those
//! before calling [`dispatch`] (see §4.D: RUNNING still answers a
//! stray handshake idempotently, which is the handshake module's job,
//! not the Dispatcher's).

use common::{envelope::Envelope, session::now_secs, Identifier};
use directory::Barrack;
use trc::{AddContext, EventType, ReplayEvent};

use crate::{
    commands::{self, CommandContent, ReceiptStatus},
    context::StationContext,
};

/// `true` once `envelope.time` is more than `window` seconds away from
/// now, in either direction (§7: replay is "too old or too far in the
/// future"). The boundary is inclusive on both sides: `now - window`
/// and `now + window` are still accepted, one second further out on
/// either side is not.
fn is_replay(time: u64, window: std::time::Duration) -> bool {
    let now = now_secs();
    now.saturating_sub(time) > window.as_secs() || time.saturating_sub(now) > window.as_secs()
}

pub async fn dispatch(
    ctx: &StationContext,
    sender: &Identifier,
    raw: &[u8],
    envelope: &Envelope,
) -> Option<Envelope> {
    if is_replay(envelope.time, ctx.config.replay_window) {
        let now = now_secs();
        let kind = if envelope.time > now { ReplayEvent::TooNew } else { ReplayEvent::TooOld };
        trc::event!(
            EventType::Replay(kind),
            sender = %sender,
            receiver = %envelope.receiver,
        );
        return None;
    }

    if envelope.receiver == ctx.self_id.to_string() {
        return Some(route_to_station(ctx, sender, envelope).await);
    }

    if let Some(neighbor) = &ctx.neighbor_id {
        if envelope.receiver == neighbor.to_string() {
            let status = match ctx.neighbor.forward(raw).await {
                Ok(()) => ReceiptStatus::Delivering,
                Err(err) => {
                    trc::error!(err);
                    ReceiptStatus::Failed
                }
            };
            return Some(commands::build_receipt(ctx, status, envelope));
        }
    }

    let Some(receiver) = ctx.barrack.resolve(&envelope.receiver).await else {
        trc::event!(EventType::Route(trc::RouteEvent::Unknown), receiver = %envelope.receiver);
        return Some(commands::build_receipt(ctx, ReceiptStatus::Rejected, envelope));
    };

    let status = if receiver.kind.is_group() {
        deliver_to_group(ctx, sender, &receiver, raw).await
    } else {
        deliver_or_mailbox(ctx, &receiver, raw).await
    };
    Some(commands::build_receipt(ctx, status, envelope))
}

async fn route_to_station(ctx: &StationContext, sender: &Identifier, envelope: &Envelope) -> Envelope {
    match commands::parse_command(envelope) {
        Some(CommandContent::Other { kind, body }) => match ctx.commands.get(&kind) {
            Some(processor) => {
                let reply = processor.handle(sender, &body).await;
                commands::build_command_response(ctx, sender, reply)
            }
            None => {
                trc::event!(EventType::Route(trc::RouteEvent::Unknown), command = %kind);
                commands::build_receipt(ctx, ReceiptStatus::Rejected, envelope)
            }
        },
        // Station-addressed but not a recognized command: rejected,
        // same as any other unroutable receiver.
        Some(CommandContent::Handshake { .. }) | None => {
            commands::build_receipt(ctx, ReceiptStatus::Rejected, envelope)
        }
    }
}

async fn deliver_to_group(
    ctx: &StationContext,
    sender: &Identifier,
    group: &Identifier,
    raw: &[u8],
) -> ReceiptStatus {
    let members: Vec<Identifier> = ctx
        .barrack
        .members(group)
        .await
        .into_iter()
        .filter(|member| member != sender)
        .collect();
    if members.is_empty() {
        return ReceiptStatus::Rejected;
    }
    let mut any_failed = false;
    for member in &members {
        if matches!(deliver_or_mailbox(ctx, member, raw).await, ReceiptStatus::Failed) {
            any_failed = true;
        }
    }
    if any_failed {
        ReceiptStatus::Failed
    } else {
        ReceiptStatus::Delivering
    }
}

async fn deliver_or_mailbox(ctx: &StationContext, receiver: &Identifier, raw: &[u8]) -> ReceiptStatus {
    if let Some(handler) = ctx.registry.handler_for(receiver) {
        if handler.push(raw).await.is_ok() {
            return ReceiptStatus::Delivering;
        }
    }
    match ctx.mailbox.append(receiver, raw).await.caused_by(trc::location!()) {
        Ok(()) => ReceiptStatus::Delivering,
        Err(err) => {
            trc::error!(err);
            ReceiptStatus::Failed
        }
    }
}
