/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Append-only per-identity mailbox: `state_root/mailbox/<id-hash>/queue.log`,
//! records as `length-prefix (u32 LE) || bytes`, plus a sibling `meta`
//! file recording the hash → ID string mapping the first time a
//! mailbox directory is created.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex as AsyncMutex,
};
use trc::{AddContext, EventType, MailboxEvent};
use xxhash_rust::xxh3::xxh3_64;

use crate::id::Identifier;

pub struct MailboxStore {
    root: PathBuf,
    /// One lock per identity hash, so append and drain serialize
    /// against each other without holding a single store-wide mutex
    /// across file I/O.
    locks: DashMap<String, std::sync::Arc<AsyncMutex<()>>>,
}

fn hash_id(id: &str) -> String {
    format!("{:016x}", xxh3_64(id.as_bytes()))
}

impl MailboxStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MailboxStore {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    fn dir_for(&self, id: &str) -> PathBuf {
        self.root.join("mailbox").join(hash_id(id))
    }

    fn lock_for(&self, id: &str) -> std::sync::Arc<AsyncMutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| std::sync::Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn ensure_dir(&self, dir: &Path, id: &str) -> trc::Result<()> {
        if fs::metadata(dir).await.is_ok() {
            return Ok(());
        }
        fs::create_dir_all(dir)
            .await
            .map_err(|e| EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
            .caused_by(trc::location!())?;
        fs::write(dir.join("meta"), id.as_bytes())
            .await
            .map_err(|e| EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
            .caused_by(trc::location!())?;
        Ok(())
    }

    /// Durable on return: the record is written and fsynced before
    /// this future resolves.
    pub async fn append(&self, id: &Identifier, bytes: &[u8]) -> trc::Result<()> {
        let key = id.to_string();
        let dir = self.dir_for(&key);
        self.ensure_dir(&dir, &key).await?;
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("queue.log"))
            .await
            .map_err(|e| EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
            .caused_by(trc::location!())?;
        let len = bytes.len() as u32;
        file.write_all(&len.to_le_bytes())
            .await
            .map_err(|e| EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
            .caused_by(trc::location!())?;
        file.write_all(bytes)
            .await
            .map_err(|e| EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
            .caused_by(trc::location!())?;
        file.sync_all()
            .await
            .map_err(|e| EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
            .caused_by(trc::location!())?;
        Ok(())
    }

    /// Reads every record in file order. Records are not removed; the
    /// caller truncates explicitly via [`Self::truncate`] only after
    /// every record has been pushed successfully, which is what makes
    /// a crashed drain re-read the same records (at-least-once).
    pub async fn drain(&self, id: &Identifier) -> trc::Result<Vec<Vec<u8>>> {
        let key = id.to_string();
        let path = self.dir_for(&key).join("queue.log");
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
                    .caused_by(trc::location!())
            }
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
            .caused_by(trc::location!())?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset + 4 <= buf.len() {
            let len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if offset + len > buf.len() {
                break;
            }
            records.push(buf[offset..offset + len].to_vec());
            offset += len;
        }
        Ok(records)
    }

    /// Called once a drain has pushed every record successfully.
    pub async fn truncate(&self, id: &Identifier) -> trc::Result<()> {
        let key = id.to_string();
        let path = self.dir_for(&key).join("queue.log");
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EventType::Mailbox(MailboxEvent::IoError).into_err().reason(e))
                .caused_by(trc::location!()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NetworkKind;

    fn bob() -> Identifier {
        Identifier::new("bob", "dim.chat", NetworkKind::User)
    }

    #[tokio::test]
    async fn append_then_drain_preserves_order() {
        let dir = tempdir();
        let store = MailboxStore::new(&dir);
        store.append(&bob(), b"one").await.unwrap();
        store.append(&bob(), b"two").await.unwrap();
        let records = store.drain(&bob()).await.unwrap();
        assert_eq!(records, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn truncate_empties_mailbox() {
        let dir = tempdir();
        let store = MailboxStore::new(&dir);
        store.append(&bob(), b"one").await.unwrap();
        store.truncate(&bob()).await.unwrap();
        assert!(store.drain(&bob()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn interrupted_drain_rereads_same_records() {
        let dir = tempdir();
        let store = MailboxStore::new(&dir);
        store.append(&bob(), b"one").await.unwrap();
        let first = store.drain(&bob()).await.unwrap();
        let second = store.drain(&bob()).await.unwrap();
        assert_eq!(first, second);
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("dim-mailbox-test-{}", xxh3_64(
            format!("{:?}", std::time::SystemTime::now()).as_bytes()
        )));
        p
    }
}
