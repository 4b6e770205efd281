#![forbid(unsafe_code)]

mod snapshot;
mod workers;

pub use snapshot::SnapshotStore;
pub use workers::launch;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("open database: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("begin transaction: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("open table: {0}")]
    Table(#[from] redb::TableError),
    #[error("table operation: {0}")]
    Operation(#[from] redb::StorageError),
    #[error("commit transaction: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
