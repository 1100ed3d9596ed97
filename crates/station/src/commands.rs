/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Station-command JSON shapes (`handshake`, `handshake_again`,
//! `handshake_success`, `receipt`) plus the capability-typed dispatch
//! table the Dispatcher hands unrecognized-but-station-addressed
//! content to. A command envelope's `data` is plaintext JSON, not
//! opaque ciphertext — it's meant for the station to read, unlike a
//! regular user-to-user envelope (see [`common::envelope::Envelope`]).
//!
//! The command processors themselves (mute list, contacts storage,
//! text chat-bot) are out of scope (§1): these are routing stubs only,
//! named so an operator can see where a real implementation plugs in.

use ahash::AHashMap;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use common::{envelope::Envelope, Identifier};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::StationContext;

#[derive(Debug, Clone)]
pub enum CommandContent {
    Handshake { session: Option<[u8; 16]> },
    Other { kind: String, body: Value },
}

#[derive(Deserialize)]
struct Wire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    session: Option<String>,
}

/// Best-effort JSON parse of `envelope.data`. Fails silently (returns
/// `None`) for genuine ciphertext, which is the expected outcome for
/// every envelope the Dispatcher doesn't address to the station.
pub fn parse_command(envelope: &Envelope) -> Option<CommandContent> {
    let wire: Wire = serde_json::from_slice(&envelope.data).ok()?;
    if wire.kind == "handshake" {
        let session = wire
            .session
            .as_deref()
            .and_then(|s| STANDARD.decode(s).ok())
            .and_then(|bytes| <[u8; 16]>::try_from(bytes).ok());
        return Some(CommandContent::Handshake { session });
    }
    let body: Value = serde_json::from_slice(&envelope.data).ok()?;
    Some(CommandContent::Other { kind: wire.kind, body })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Delivering,
    Rejected,
    Failed,
}

impl ReceiptStatus {
    fn as_str(self) -> &'static str {
        match self {
            ReceiptStatus::Delivering => "delivering",
            ReceiptStatus::Rejected => "rejected",
            ReceiptStatus::Failed => "failed",
        }
    }
}

fn wrap(ctx: &StationContext, receiver: &str, body: Value) -> Envelope {
    Envelope {
        sender: ctx.self_id.to_string(),
        receiver: receiver.to_string(),
        time: common::session::now_secs(),
        group: None,
        signature: Vec::new(),
        data: serde_json::to_vec(&body).unwrap_or_default(),
        meta: None,
    }
}

pub fn build_handshake_again(ctx: &StationContext, to: &Identifier, key: [u8; 16]) -> Envelope {
    wrap(
        ctx,
        &to.to_string(),
        json!({ "type": "handshake_again", "session": STANDARD.encode(key) }),
    )
}

pub fn build_handshake_success(ctx: &StationContext, to: &Identifier) -> Envelope {
    wrap(ctx, &to.to_string(), json!({ "type": "handshake_success" }))
}

pub fn build_receipt(ctx: &StationContext, status: ReceiptStatus, original: &Envelope) -> Envelope {
    wrap(
        ctx,
        &original.sender,
        json!({
            "type": "receipt",
            "status": status.as_str(),
            "sender": original.sender,
            "receiver": original.receiver,
            "time": original.time,
            "group": original.group,
        }),
    )
}

pub fn build_command_response(ctx: &StationContext, to: &Identifier, body: Value) -> Envelope {
    wrap(ctx, &to.to_string(), body)
}

/// A self-contained reply function the Dispatcher can invoke by
/// content kind. Out-of-scope per §1: these never participate in
/// protocol or routing machinery, only in producing a reply body.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, sender: &Identifier, body: &Value) -> Value;
}

#[derive(Default)]
pub struct CommandTable {
    processors: AHashMap<String, Arc<dyn CommandProcessor>>,
}

impl CommandTable {
    pub fn register(&mut self, processor: Arc<dyn CommandProcessor>) {
        self.processors.insert(processor.name().to_string(), processor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandProcessor>> {
        self.processors.get(name).cloned()
    }
}

pub struct MuteListProcessor;

#[async_trait]
impl CommandProcessor for MuteListProcessor {
    fn name(&self) -> &'static str {
        "mute"
    }

    async fn handle(&self, _sender: &Identifier, _body: &Value) -> Value {
        json!({ "type": "mute_response", "list": [] })
    }
}

pub struct ContactsStorageProcessor;

#[async_trait]
impl CommandProcessor for ContactsStorageProcessor {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn handle(&self, _sender: &Identifier, _body: &Value) -> Value {
        json!({ "type": "storage_response", "data": null })
    }
}

pub struct TextChatBotProcessor;

#[async_trait]
impl CommandProcessor for TextChatBotProcessor {
    fn name(&self) -> &'static str {
        "text"
    }

    async fn handle(&self, _sender: &Identifier, _body: &Value) -> Value {
        json!({ "type": "text", "text": "" })
    }
}

/// The default table every station boots with, matching the three
/// content-type processors §1 names.
pub fn default_table() -> CommandTable {
    let mut table = CommandTable::default();
    table.register(Arc::new(MuteListProcessor));
    table.register(Arc::new(ContactsStorageProcessor));
    table.register(Arc::new(TextChatBotProcessor));
    table
}
