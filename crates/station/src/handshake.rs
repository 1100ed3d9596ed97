/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! `FRESH → CHALLENGED → RUNNING → CLOSED`. This module is pure
//! registry bookkeeping: it reads and mutates whatever
//! [`SessionRegistry`] it's handed and returns an outcome; it owns no
//! socket and performs no I/O, which is what lets the connection task
//! call it directly from its read loop without a second lock.

use common::{ClientAddress, Identifier, SessionRegistry, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// CHALLENGED reply, carrying the key the client must echo back.
    /// Also the reply to a FRESH session's first handshake attempt.
    Again([u8; 16]),
    /// RUNNING reached (or already RUNNING, replied idempotently).
    /// `freshly_activated` is `true` only the first time CHALLENGED
    /// transitions to RUNNING — that's the one moment a guest-queue
    /// entry and a login event are due.
    Success { freshly_activated: bool },
}

/// Drives one handshake envelope through the state machine for
/// `(identity, addr)`. Creates the session on first contact.
pub fn handle<H: Clone>(
    registry: &SessionRegistry<H>,
    identity: &Identifier,
    addr: ClientAddress,
    client_key: Option<[u8; 16]>,
) -> HandshakeOutcome {
    registry.new_session(identity.clone(), addr);
    match registry.state(identity, addr) {
        Some(SessionState::Challenged) => {
            let stored = registry.session_key(identity, addr).unwrap_or([0u8; 16]);
            match client_key {
                Some(key) if key == stored => {
                    registry.activate(identity, addr);
                    HandshakeOutcome::Success { freshly_activated: true }
                }
                // No key rotation on mismatch: prevents replay confusion.
                _ => HandshakeOutcome::Again(stored),
            }
        }
        Some(SessionState::Running) => HandshakeOutcome::Success { freshly_activated: false },
        // FRESH (just created above, or reused from an earlier attempt
        // on this same (identity, addr) that never reached RUNNING): both
        // start the challenge over. CLOSED sessions are purged from the
        // registry as soon as they close, so this arm is unreachable in
        // practice; it's kept so an unexpected CLOSED sighting still
        // re-challenges instead of wedging the connection.
        Some(SessionState::Fresh) | Some(SessionState::Closed) | None => {
            let key = registry
                .promote(identity, addr)
                .expect("new_session just created this session");
            HandshakeOutcome::Again(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::NetworkKind;

    fn alice() -> Identifier {
        Identifier::new("alice", "dim.chat", NetworkKind::User)
    }

    fn addr() -> ClientAddress {
        "127.0.0.1:9100".parse().unwrap()
    }

    #[test]
    fn fresh_handshake_challenges() {
        let registry: SessionRegistry<()> = SessionRegistry::new();
        let outcome = handle(&registry, &alice(), addr(), None);
        assert!(matches!(outcome, HandshakeOutcome::Again(_)));
    }

    #[test]
    fn matching_key_activates_once() {
        let registry: SessionRegistry<()> = SessionRegistry::new();
        let key = match handle(&registry, &alice(), addr(), None) {
            HandshakeOutcome::Again(key) => key,
            _ => unreachable!(),
        };
        let outcome = handle(&registry, &alice(), addr(), Some(key));
        assert_eq!(outcome, HandshakeOutcome::Success { freshly_activated: true });

        // Idempotent: a second handshake on an already-RUNNING session
        // succeeds without re-activating.
        let outcome = handle(&registry, &alice(), addr(), Some(key));
        assert_eq!(outcome, HandshakeOutcome::Success { freshly_activated: false });
    }

    #[test]
    fn mismatched_key_repeats_challenge_without_rotating() {
        let registry: SessionRegistry<()> = SessionRegistry::new();
        let key = match handle(&registry, &alice(), addr(), None) {
            HandshakeOutcome::Again(key) => key,
            _ => unreachable!(),
        };
        let outcome = handle(&registry, &alice(), addr(), Some([0xFFu8; 16]));
        assert_eq!(outcome, HandshakeOutcome::Again(key));
    }
}
