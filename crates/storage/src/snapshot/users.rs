use postbox_core::UserRecord;
use redb::ReadableTable;

use crate::StorageError;

use super::{SnapshotStore, USER_TABLE};

impl SnapshotStore {
    pub fn write_user(&self, record: &UserRecord) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USER_TABLE)?;
            table.insert(record.username_hash.as_str(), encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete_user(&self, username_hash: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USER_TABLE)?;
            table.remove(username_hash)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USER_TABLE)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }
}
