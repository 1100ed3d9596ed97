/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! `byAddr ↔ byId` session bookkeeping behind one lock. Generic over
//! the handler type `H` so this crate never needs to know how a
//! connection is framed or what transport it runs — the `station`
//! crate supplies its concrete `Arc<Handler>` and gets the invariants
//! (one registry mutex, no I/O held under it) for free.

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::{
    id::Identifier,
    session::{ClientAddress, Session, SessionState},
};

struct Inner<H> {
    by_addr: AHashMap<ClientAddress, H>,
    by_id: AHashMap<Identifier, Vec<Session>>,
}

pub struct SessionRegistry<H> {
    inner: Mutex<Inner<H>>,
}

impl<H: Clone> Default for SessionRegistry<H> {
    fn default() -> Self {
        SessionRegistry {
            inner: Mutex::new(Inner {
                by_addr: AHashMap::new(),
                by_id: AHashMap::new(),
            }),
        }
    }
}

impl<H: Clone> SessionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on connect. Inserts into `byAddr`.
    pub fn bind_handler(&self, addr: ClientAddress, handler: H) {
        self.inner.lock().by_addr.insert(addr, handler);
    }

    /// Creates a FRESH session and adds it to `byId`, unless a non-CLOSED
    /// session already exists for this exact `(identity, addr)` pair (at
    /// any state — FRESH, CHALLENGED, or RUNNING), in which case that
    /// session is returned unchanged. This is what keeps a multi-message
    /// handshake (or a client retrying a mismatched key) from piling up
    /// one orphan session per attempt: a CLOSED session naming this addr
    /// means the addr has been reused since (e.g. torn down and
    /// reconnected at the OS level with the same socket tuple), so only
    /// then is a fresh session warranted.
    pub fn new_session(&self, identity: Identifier, addr: ClientAddress) -> Session {
        let mut inner = self.inner.lock();
        let sessions = inner.by_id.entry(identity.clone()).or_default();
        if let Some(existing) = sessions
            .iter()
            .find(|s| s.client_address == addr && s.state != SessionState::Closed)
        {
            return existing.clone();
        }
        let session = Session::fresh(identity, addr);
        sessions.push(session.clone());
        session
    }

    /// FRESH → CHALLENGED. Returns the freshly generated session key.
    pub fn promote(&self, identity: &Identifier, addr: ClientAddress) -> Option<[u8; 16]> {
        let mut inner = self.inner.lock();
        let session = find_mut(&mut inner.by_id, identity, addr)?;
        if session.state != SessionState::Fresh {
            return Some(session.session_key);
        }
        Some(session.challenge())
    }

    pub fn session_key(&self, identity: &Identifier, addr: ClientAddress) -> Option<[u8; 16]> {
        let mut inner = self.inner.lock();
        find_mut(&mut inner.by_id, identity, addr).map(|s| s.session_key)
    }

    pub fn state(&self, identity: &Identifier, addr: ClientAddress) -> Option<SessionState> {
        let mut inner = self.inner.lock();
        find_mut(&mut inner.by_id, identity, addr).map(|s| s.state)
    }

    /// Number of sessions (any state) stored for `identity`. Exists for
    /// tests that assert `new_session` dedups rather than accumulates.
    #[cfg(test)]
    pub fn session_count(&self, identity: &Identifier) -> usize {
        let inner = self.inner.lock();
        inner.by_id.get(identity).map_or(0, Vec::len)
    }

    /// CHALLENGED → RUNNING.
    pub fn activate(&self, identity: &Identifier, addr: ClientAddress) -> bool {
        let mut inner = self.inner.lock();
        match find_mut(&mut inner.by_id, identity, addr) {
            Some(session) => {
                session.activate();
                true
            }
            None => false,
        }
    }

    /// Any RUNNING handler for `id`, tie-broken by most recent
    /// activation (`last_seen_at`).
    pub fn handler_for(&self, identity: &Identifier) -> Option<H> {
        let inner = self.inner.lock();
        let sessions = inner.by_id.get(identity)?;
        let session = sessions
            .iter()
            .filter(|s| s.state == SessionState::Running)
            .max_by_key(|s| s.last_seen_at)?;
        inner.by_addr.get(&session.client_address).cloned()
    }

    /// Identities with a RUNNING session bound to `addr`. Called
    /// before [`Self::remove_by_addr`] so a disconnecting connection's
    /// task can emit a logout event per identity it was serving.
    pub fn running_identities_at(&self, addr: ClientAddress) -> Vec<Identifier> {
        let inner = self.inner.lock();
        inner
            .by_id
            .iter()
            .filter(|(_, sessions)| {
                sessions
                    .iter()
                    .any(|s| s.client_address == addr && s.state == SessionState::Running)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// On disconnect: removes the Handler and transitions every
    /// session naming it to CLOSED, dropping them from `byId`.
    pub fn remove_by_addr(&self, addr: ClientAddress) -> Option<H> {
        let mut inner = self.inner.lock();
        let handler = inner.by_addr.remove(&addr);
        for sessions in inner.by_id.values_mut() {
            for session in sessions.iter_mut() {
                if session.client_address == addr {
                    session.close();
                }
            }
        }
        inner.by_id.retain(|_, sessions| {
            sessions.retain(|s| s.state != SessionState::Closed);
            !sessions.is_empty()
        });
        handler
    }
}

fn find_mut<'a>(
    by_id: &'a mut AHashMap<Identifier, Vec<Session>>,
    identity: &Identifier,
    addr: ClientAddress,
) -> Option<&'a mut Session> {
    by_id
        .get_mut(identity)?
        .iter_mut()
        .find(|s| s.client_address == addr)
}
