use postbox_core::{SubscriberKey, SubscriberRecord, WILDCARD_MESSAGE_ID};
use redb::ReadableTable;

use crate::StorageError;

use super::{SnapshotStore, SUB_TABLE};

/// Key layout: `topicName/messageId/subscriberId`. The key carries the
/// pointer position so the wildcard delete can match by prefix and suffix;
/// the value is the full record.
fn subscriber_key(topic: &str, message_id: i64, subscriber_id: &str) -> String {
    format!("{topic}/{message_id}/{subscriber_id}")
}

impl SnapshotStore {
    pub fn write_subscriber(&self, record: &SubscriberRecord) -> Result<(), StorageError> {
        let key = subscriber_key(&record.topic, record.message_id, &record.subscriber.id);
        let encoded = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SUB_TABLE)?;
            table.insert(key.as_str(), encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Deletes one subscriber record, or every record of the subscriber in
    /// the topic when the key carries [`WILDCARD_MESSAGE_ID`].
    pub fn delete_subscriber(&self, key: &SubscriberKey) -> Result<(), StorageError> {
        if key.message_id != WILDCARD_MESSAGE_ID {
            let db_key = subscriber_key(&key.topic, key.message_id, &key.subscriber_id);
            let txn = self.db.begin_write()?;
            {
                let mut table = txn.open_table(SUB_TABLE)?;
                table.remove(db_key.as_str())?;
            }
            txn.commit()?;
            return Ok(());
        }

        let prefix = format!("{}/", key.topic);
        let suffix = format!("/{}", key.subscriber_id);
        let matches = {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(SUB_TABLE)?;
            let mut matches = Vec::new();
            for entry in table.range(prefix.as_str()..)? {
                let (stored_key, _) = entry?;
                let stored_key = stored_key.value();
                if !stored_key.starts_with(&prefix) {
                    break;
                }
                if stored_key.ends_with(&suffix) {
                    matches.push(stored_key.to_owned());
                }
            }
            matches
        };

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SUB_TABLE)?;
            for db_key in matches {
                table.remove(db_key.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load_subscribers(&self) -> Result<Vec<SubscriberRecord>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SUB_TABLE)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use postbox_core::{Subscriber, SubscriberKey, SubscriberRecord, WILDCARD_MESSAGE_ID};
    use tempfile::tempdir;
    use url::Url;

    use super::SnapshotStore;

    fn record(topic: &str, message_id: i64, subscriber_id: &str) -> SubscriberRecord {
        SubscriberRecord {
            topic: topic.to_owned(),
            message_id,
            subscriber: Subscriber::new(
                subscriber_id.to_owned(),
                format!("hash-{subscriber_id}"),
                Some(Url::parse("http://example.com/hook").expect("parse url")),
                false,
            ),
        }
    }

    #[test]
    fn subscribers_round_trip() {
        let dir = tempdir().expect("temp store dir");
        let store = SnapshotStore::open(dir.path()).expect("open store");

        let written = record("topicA", 2, "bob");
        store.write_subscriber(&written).expect("write subscriber");

        let loaded = store.load_subscribers().expect("load subscribers");
        assert_eq!(loaded, vec![written]);
    }

    #[test]
    fn positional_delete_removes_exactly_one_record() {
        let dir = tempdir().expect("temp store dir");
        let store = SnapshotStore::open(dir.path()).expect("open store");

        store
            .write_subscriber(&record("topicA", 0, "bob"))
            .expect("write at 0");
        store
            .write_subscriber(&record("topicA", 4, "bob"))
            .expect("write at 4");

        store
            .delete_subscriber(&SubscriberKey {
                topic: "topicA".to_owned(),
                message_id: 0,
                subscriber_id: "bob".to_owned(),
            })
            .expect("delete at 0");

        let loaded = store.load_subscribers().expect("load subscribers");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].message_id, 4);
    }

    #[test]
    fn wildcard_delete_removes_the_subscriber_everywhere_in_the_topic() {
        let dir = tempdir().expect("temp store dir");
        let store = SnapshotStore::open(dir.path()).expect("open store");

        store
            .write_subscriber(&record("topicB", 4, "bob"))
            .expect("bob in topicB");
        store
            .write_subscriber(&record("topicB", 7, "bob"))
            .expect("stray duplicate of bob");
        store
            .write_subscriber(&record("topicB", 0, "alice"))
            .expect("alice in topicB");
        store
            .write_subscriber(&record("topicB2", 1, "bob"))
            .expect("bob in topicB2");

        store
            .delete_subscriber(&SubscriberKey {
                topic: "topicB".to_owned(),
                message_id: WILDCARD_MESSAGE_ID,
                subscriber_id: "bob".to_owned(),
            })
            .expect("wildcard delete");

        let mut remaining: Vec<(String, String)> = store
            .load_subscribers()
            .expect("load subscribers")
            .into_iter()
            .map(|r| (r.topic, r.subscriber.id))
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                ("topicB".to_owned(), "alice".to_owned()),
                ("topicB2".to_owned(), "bob".to_owned()),
            ],
            "only bob's topicB records go; other topics and subscribers stay"
        );
    }
}
