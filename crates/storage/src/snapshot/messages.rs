use std::path::PathBuf;

use postbox_core::{MessageKey, MessageRecord};

use crate::StorageError;

use super::SnapshotStore;

impl SnapshotStore {
    fn message_path(&self, topic: &str, message_id: i64) -> PathBuf {
        self.messages_root()
            .join(topic)
            .join(format!("{message_id}.json"))
    }

    /// Stores the message as a JSON file under
    /// `messages/<topic>/<id>.json`, so payloads stay human-readable.
    pub async fn write_message(&self, record: &MessageRecord) -> Result<(), StorageError> {
        let dir = self.messages_root().join(&record.topic);
        tokio::fs::create_dir_all(&dir).await?;
        let encoded = serde_json::to_vec(&record.message)?;
        tokio::fs::write(self.message_path(&record.topic, record.message.id), encoded).await?;
        Ok(())
    }

    pub async fn delete_message(&self, key: &MessageKey) -> Result<(), StorageError> {
        tokio::fs::remove_file(self.message_path(&key.topic, key.message_id)).await?;
        Ok(())
    }

    /// Walks the message directory topic by topic. Files that fail to parse
    /// are skipped with a log line rather than aborting the whole load.
    pub async fn load_messages(&self) -> Result<Vec<MessageRecord>, StorageError> {
        let mut records = Vec::new();
        let mut topics = tokio::fs::read_dir(self.messages_root()).await?;
        while let Some(topic_dir) = topics.next_entry().await? {
            if !topic_dir.file_type().await?.is_dir() {
                continue;
            }
            let topic = topic_dir.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(topic_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let content = tokio::fs::read(&path).await?;
                match serde_json::from_slice(&content) {
                    Ok(message) => records.push(MessageRecord {
                        topic: topic.clone(),
                        message,
                    }),
                    Err(error) => {
                        tracing::error!(path = %path.display(), %error, "skipping unreadable message file");
                    }
                }
            }
        }
        Ok(records)
    }
}
