/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The signed outer record carried between stations and clients. The
//! core parses this far and no further: `data` is opaque ciphertext it
//! never decrypts, and `signature` is only ever handed to the
//! `Barrack` collaborator for verification, never inspected here.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use trc::{AddContext, AuthEvent, EventType, ProtocolEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub receiver: String,
    pub time: u64,
    pub group: Option<String>,
    pub signature: Vec<u8>,
    pub data: Vec<u8>,
    pub meta: Option<serde_json::Value>,
}

/// The part of an envelope that is actually signed: everything except
/// the signature itself. Kept as a standalone function rather than a
/// type so canonicalization stays in one place no matter who calls it
/// (decode-time verification, re-signing a receipt, tests).
pub fn canonical(envelope: &Envelope) -> Vec<u8> {
    let wire = EnvelopeWire::from_signed_parts(envelope);
    serde_json::to_vec(&wire).unwrap_or_default()
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeWire {
    sender: String,
    receiver: String,
    time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(rename = "data")]
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<serde_json::Value>,
}

impl EnvelopeWire {
    fn from_signed_parts(envelope: &Envelope) -> Self {
        EnvelopeWire {
            sender: envelope.sender.clone(),
            receiver: envelope.receiver.clone(),
            time: envelope.time,
            group: envelope.group.clone(),
            signature: None,
            data: STANDARD.encode(&envelope.data),
            meta: envelope.meta.clone(),
        }
    }
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> trc::Result<Self> {
        let wire: EnvelopeWire = serde_json::from_slice(bytes)
            .map_err(|e| EventType::Protocol(ProtocolEvent::Malformed).into_err().reason(e))
            .caused_by(trc::location!())?;
        let signature = match wire.signature {
            Some(sig) => STANDARD
                .decode(sig.as_bytes())
                .map_err(|e| EventType::Auth(AuthEvent::DecodeInvalid).into_err().reason(e))
                .caused_by(trc::location!())?,
            None => Vec::new(),
        };
        let data = STANDARD
            .decode(wire.data.as_bytes())
            .map_err(|e| EventType::Auth(AuthEvent::DecodeInvalid).into_err().reason(e))
            .caused_by(trc::location!())?;
        Ok(Envelope {
            sender: wire.sender,
            receiver: wire.receiver,
            time: wire.time,
            group: wire.group,
            signature,
            data,
            meta: wire.meta,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let wire = EnvelopeWire {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            time: self.time,
            group: self.group.clone(),
            signature: Some(STANDARD.encode(&self.signature)),
            data: STANDARD.encode(&self.data),
            meta: self.meta.clone(),
        };
        serde_json::to_vec(&wire).unwrap_or_default()
    }
}
