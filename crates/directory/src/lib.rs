/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The identity/address resolver the connection-handling core treats
//! as an external collaborator: given an identifier string, resolve
//! the full [`Identifier`] (with its network kind), its public key,
//! group membership, and signature verification. Meta/profile
//! verification and the address-name service live behind this trait
//! and are never implemented in this workspace — only the contract a
//! `Barrack` backend must satisfy.

use ahash::AHashMap;
use async_trait::async_trait;
use common::Identifier;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub enum Principal {
    User { identifier: Identifier, public_key: Vec<u8> },
    Group { identifier: Identifier, members: Vec<Identifier> },
}

impl Principal {
    fn identifier(&self) -> &Identifier {
        match self {
            Principal::User { identifier, .. } => identifier,
            Principal::Group { identifier, .. } => identifier,
        }
    }
}

/// Resolves identity strings to identifiers, signing keys, group
/// membership, and signature validity. The core only ever calls
/// through this trait; it never inspects a key or runs a crypto
/// primitive itself (§1: "the cryptographic envelope/content model...
/// is out of scope").
#[async_trait]
pub trait Barrack: Send + Sync {
    /// Resolves `id` (the wire `name@address[/terminal]` string) to a
    /// full identifier carrying its network kind. `None` if `id` is
    /// unknown to this station.
    async fn resolve(&self, id: &str) -> Option<Identifier>;

    async fn public_key(&self, id: &Identifier) -> Option<Vec<u8>>;

    /// Member identifiers of a group-kind identity, excluding `id`
    /// itself. Empty for anything that isn't a group.
    async fn members(&self, id: &Identifier) -> Vec<Identifier>;

    /// Verifies `signature` over `canonical` (the envelope with its
    /// signature field removed) against `sender`'s key. The actual
    /// cryptographic primitive lives entirely behind this call; the
    /// core treats the result as opaque.
    async fn verify(&self, sender: &Identifier, canonical: &[u8], signature: &[u8]) -> bool;
}

/// An in-memory `Barrack` for tests and for bootstrapping a station
/// before a real directory backend is wired in. Its `verify` is a
/// stand-in, not a cryptographic check: a signature is "valid" iff it
/// equals the registered public key, which lets tests "sign" an
/// envelope by setting `signature` to the recipient's registered key.
#[derive(Default)]
pub struct MemoryBarrack {
    principals: RwLock<AHashMap<String, Principal>>,
}

impl MemoryBarrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_user(&self, id: &Identifier, public_key: Vec<u8>) {
        self.principals.write().await.insert(
            id.to_string(),
            Principal::User { identifier: id.clone(), public_key },
        );
    }

    pub async fn register_group(&self, id: &Identifier, members: Vec<Identifier>) {
        self.principals.write().await.insert(
            id.to_string(),
            Principal::Group { identifier: id.clone(), members },
        );
    }
}

#[async_trait]
impl Barrack for MemoryBarrack {
    async fn resolve(&self, id: &str) -> Option<Identifier> {
        self.principals.read().await.get(id).map(|p| p.identifier().clone())
    }

    async fn public_key(&self, id: &Identifier) -> Option<Vec<u8>> {
        match self.principals.read().await.get(&id.to_string())? {
            Principal::User { public_key, .. } => Some(public_key.clone()),
            Principal::Group { .. } => None,
        }
    }

    async fn members(&self, id: &Identifier) -> Vec<Identifier> {
        match self.principals.read().await.get(&id.to_string()) {
            Some(Principal::Group { members, .. }) => members.clone(),
            _ => Vec::new(),
        }
    }

    async fn verify(&self, sender: &Identifier, _canonical: &[u8], signature: &[u8]) -> bool {
        match self.principals.read().await.get(&sender.to_string()) {
            Some(Principal::User { public_key, .. }) => public_key.as_slice() == signature,
            _ => false,
        }
    }
}
