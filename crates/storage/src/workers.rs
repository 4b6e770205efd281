use std::sync::Arc;

use postbox_core::PersistReceivers;
use tokio::task::JoinHandle;

use crate::snapshot::SnapshotStore;

/// Starts the six persistence workers, one per queue. Each worker drains
/// its queue until the producer side closes, logging and counting failures
/// without stopping.
pub fn launch(store: Arc<SnapshotStore>, receivers: PersistReceivers) -> Vec<JoinHandle<()>> {
    let PersistReceivers {
        mut user_writes,
        mut user_deletes,
        mut subscriber_writes,
        mut subscriber_deletes,
        mut message_writes,
        mut message_deletes,
    } = receivers;

    let user_writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(record) = user_writes.recv().await {
                if let Err(error) = store.write_user(&record) {
                    store.note_failure("write user", &error);
                }
            }
        })
    };

    let user_deleter = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(username_hash) = user_deletes.recv().await {
                if let Err(error) = store.delete_user(&username_hash) {
                    store.note_failure("delete user", &error);
                }
            }
        })
    };

    let subscriber_writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(record) = subscriber_writes.recv().await {
                if let Err(error) = store.write_subscriber(&record) {
                    store.note_failure("write subscriber", &error);
                }
            }
        })
    };

    let subscriber_deleter = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(key) = subscriber_deletes.recv().await {
                if let Err(error) = store.delete_subscriber(&key) {
                    store.note_failure("delete subscriber", &error);
                }
            }
        })
    };

    let message_writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(record) = message_writes.recv().await {
                if let Err(error) = store.write_message(&record).await {
                    store.note_failure("write message", &error);
                }
            }
        })
    };

    let message_deleter = tokio::spawn(async move {
        while let Some(key) = message_deletes.recv().await {
            if let Err(error) = store.delete_message(&key).await {
                store.note_failure("delete message", &error);
            }
        }
    });

    vec![
        user_writer,
        user_deleter,
        subscriber_writer,
        subscriber_deleter,
        message_writer,
        message_deleter,
    ]
}
