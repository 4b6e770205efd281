mod messages;
mod subscribers;
mod users;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use postbox_core::{MessageRecord, PubSubError, SnapshotSource, SubscriberRecord, UserRecord};
use redb::{Database, TableDefinition};

use crate::StorageError;

pub(crate) const USER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("user");
pub(crate) const SUB_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sub");

/// Durable snapshot of the broker: users and subscribers in an embedded
/// key-value database, message payloads as JSON files on disk.
///
/// Only the persistence workers and the cold-start load touch the store;
/// the broker itself never reads or writes it directly.
pub struct SnapshotStore {
    pub(crate) db: Database,
    root: PathBuf,
    write_failures: AtomicU64,
}

impl SnapshotStore {
    /// Opens (or initialises) the store rooted at `root`. Both key-value
    /// tables and the message directory exist afterwards.
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root.join("messages"))?;
        let db = Database::create(root.join("snapshot.db"))?;

        let init = db.begin_write()?;
        init.open_table(USER_TABLE)?;
        init.open_table(SUB_TABLE)?;
        init.commit()?;

        Ok(Self {
            db,
            root: root.to_owned(),
            write_failures: AtomicU64::new(0),
        })
    }

    pub(crate) fn messages_root(&self) -> PathBuf {
        self.root.join("messages")
    }

    /// Failed persistence jobs since launch. Workers log and keep going;
    /// this counter is the aggregate signal.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn note_failure(&self, job: &str, error: &StorageError) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(job, %error, "persistence job failed");
    }
}

#[async_trait]
impl SnapshotSource for SnapshotStore {
    async fn load_users(&self) -> Result<Vec<UserRecord>, PubSubError> {
        SnapshotStore::load_users(self).map_err(|error| PubSubError::Persistence(error.to_string()))
    }

    async fn load_messages(&self) -> Result<Vec<MessageRecord>, PubSubError> {
        SnapshotStore::load_messages(self)
            .await
            .map_err(|error| PubSubError::Persistence(error.to_string()))
    }

    async fn load_subscribers(&self) -> Result<Vec<SubscriberRecord>, PubSubError> {
        SnapshotStore::load_subscribers(self)
            .map_err(|error| PubSubError::Persistence(error.to_string()))
    }
}
