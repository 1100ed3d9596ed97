/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! FIFO of identities that just finished a handshake and need a
//! mailbox drain. Producer: the handshake state machine. Consumer:
//! the Receptionist, which blocks with a timeout rather than
//! busy-waiting.

use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::id::Identifier;

pub struct GuestQueue {
    queue: Mutex<VecDeque<Identifier>>,
    notify: Notify,
}

impl Default for GuestQueue {
    fn default() -> Self {
        GuestQueue {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl GuestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, identity: Identifier) {
        self.queue.lock().push_back(identity);
        self.notify.notify_one();
    }

    /// Re-enqueues on the tail, used by the Receptionist's back-off on
    /// push failure.
    pub fn push_back(&self, identity: Identifier) {
        self.push(identity);
    }

    /// Blocks up to `timeout` for an identity to become available.
    /// Returns `None` on timeout, never on an empty queue alone.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Identifier> {
        loop {
            if let Some(identity) = self.queue.lock().pop_front() {
                return Some(identity);
            }
            let notified = self.notify.notified();
            if tokio::time::timeout(timeout, notified).await.is_err() {
                return None;
            }
            // Notified: loop back and try to pop again. Another
            // consumer may have raced us, so this can legitimately
            // spin once with an empty queue before timing out again.
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NetworkKind;

    fn alice() -> Identifier {
        Identifier::new("alice", "dim.chat", NetworkKind::User)
    }

    #[tokio::test]
    async fn pop_returns_pushed_identity() {
        let queue = GuestQueue::new();
        queue.push(alice());
        let got = queue.pop_timeout(Duration::from_millis(50)).await;
        assert_eq!(got, Some(alice()));
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let queue = GuestQueue::new();
        let got = queue.pop_timeout(Duration::from_millis(20)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn preserves_fifo_order() {
        let queue = GuestQueue::new();
        queue.push(Identifier::new("a", "dim.chat", NetworkKind::User));
        queue.push(Identifier::new("b", "dim.chat", NetworkKind::User));
        let first = queue.pop_timeout(Duration::from_millis(50)).await.unwrap();
        let second = queue.pop_timeout(Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(second.name, "b");
    }
}
