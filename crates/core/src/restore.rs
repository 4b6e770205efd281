use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::Broker;
use crate::error::PubSubError;
use crate::persist::{MessageRecord, SubscriberRecord, UserRecord};
use crate::user::User;

/// Read side of a persisted snapshot, implemented by the storage layer.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load_users(&self) -> Result<Vec<UserRecord>, PubSubError>;
    async fn load_messages(&self) -> Result<Vec<MessageRecord>, PubSubError>;
    async fn load_subscribers(&self) -> Result<Vec<SubscriberRecord>, PubSubError>;
}

impl Broker {
    /// Rehydrates a cold broker from a snapshot: users first, then messages
    /// (creating any missing topic provisionally owned by the superuser),
    /// then subscribers.
    ///
    /// A restored subscriber flagged as creator hands the topic back to its
    /// real owner; `pointer_head` tracks the highest restored message id.
    pub async fn restore_from(
        &self,
        source: &dyn SnapshotSource,
        superuser: &Arc<User>,
    ) -> Result<(), PubSubError> {
        for record in source.load_users().await? {
            self.insert_restored_user(record).await;
        }

        for MessageRecord { topic, message } in source.load_messages().await? {
            let topic = self.obtain_topic(&topic, superuser).await?;
            let mut state = topic.state.write().await;
            state.pointer_head = state.pointer_head.max(message.id + 1);
            state.messages.insert(message.id, message);
        }

        for SubscriberRecord {
            topic,
            message_id,
            subscriber,
        } in source.load_subscribers().await?
        {
            let topic = match self.fetch_topic(&topic).await {
                Ok(topic) => topic,
                Err(_) => {
                    tracing::warn!(
                        topic = %topic,
                        subscriber = %subscriber.id,
                        "skipping restored subscriber of an unknown topic"
                    );
                    continue;
                }
            };
            let mut state = topic.state.write().await;
            if subscriber.creator && subscriber.id != superuser.uuid() {
                state.creator = subscriber.id.clone();
            }
            state
                .pointer_positions
                .entry(message_id)
                .or_default()
                .insert(subscriber.id.clone(), subscriber);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use time::OffsetDateTime;

    use crate::broker::test_support::broker;
    use crate::error::PubSubError;
    use crate::message::Message;
    use crate::persist::{MessageRecord, SubscriberRecord, UserRecord};
    use crate::topic::Subscriber;

    use super::SnapshotSource;

    #[derive(Default)]
    struct FixtureSource {
        users: Vec<UserRecord>,
        messages: Vec<MessageRecord>,
        subscribers: Vec<SubscriberRecord>,
    }

    #[async_trait]
    impl SnapshotSource for FixtureSource {
        async fn load_users(&self) -> Result<Vec<UserRecord>, PubSubError> {
            Ok(self.users.clone())
        }

        async fn load_messages(&self) -> Result<Vec<MessageRecord>, PubSubError> {
            Ok(self.messages.clone())
        }

        async fn load_subscribers(&self) -> Result<Vec<SubscriberRecord>, PubSubError> {
            Ok(self.subscribers.clone())
        }
    }

    fn message_record(topic: &str, id: i64) -> MessageRecord {
        MessageRecord {
            topic: topic.to_owned(),
            message: Message::new(id, json!(format!("payload-{id}")), OffsetDateTime::now_utc()),
        }
    }

    #[tokio::test]
    async fn restore_rebuilds_topics_and_reassigns_the_creator() {
        // Snapshot of a previous life: alice created topicA and wrote 0..=2.
        let (previous, _prev_receivers, _prev_fanout) = broker();
        let alice = previous
            .get_or_create_user("alice", "secret")
            .await
            .expect("create alice");
        let alice_uuid = alice.uuid().to_owned();
        let subscriber = Subscriber::new(
            alice.uuid().to_owned(),
            alice.username_hash().to_owned(),
            None,
            true,
        );
        let source = FixtureSource {
            users: vec![UserRecord {
                uuid: alice.uuid().to_owned(),
                username_hash: alice.username_hash().to_owned(),
                password_hash: "ignored-by-restore".to_owned(),
                created: alice.created(),
                subscriptions: [("topicA".to_owned(), String::new())].into(),
                tombstone: None,
            }],
            messages: vec![
                message_record("topicA", 0),
                message_record("topicA", 1),
                message_record("topicA", 2),
            ],
            subscribers: vec![SubscriberRecord {
                topic: "topicA".to_owned(),
                message_id: 3,
                subscriber,
            }],
        };

        let (broker, _receivers, _fanout) = broker();
        let ping = broker
            .get_or_create_user("ping", "pingpassword")
            .await
            .expect("create superuser");

        broker
            .restore_from(&source, &ping)
            .await
            .expect("restore snapshot");

        let topic = broker.fetch_topic("topicA").await.expect("topic restored");
        let info = topic.info().await;
        assert_eq!(info.pointer_head, 3);
        assert_eq!(info.creator, alice_uuid, "ownership handed back to alice");
        assert_eq!(topic.position_of(&alice_uuid).await, Some(3));
        assert_eq!(
            topic.message(1).await.expect("message 1").data,
            json!("payload-1")
        );
    }

    #[tokio::test]
    async fn restored_superuser_subscriber_keeps_provisional_ownership() {
        let (broker, _receivers, _fanout) = broker();
        let ping = broker
            .get_or_create_user("ping", "pingpassword")
            .await
            .expect("create superuser");

        let source = FixtureSource {
            messages: vec![message_record("orphaned", 0)],
            subscribers: vec![SubscriberRecord {
                topic: "orphaned".to_owned(),
                message_id: 0,
                subscriber: Subscriber::new(
                    ping.uuid().to_owned(),
                    ping.username_hash().to_owned(),
                    None,
                    true,
                ),
            }],
            ..FixtureSource::default()
        };

        broker
            .restore_from(&source, &ping)
            .await
            .expect("restore snapshot");

        let topic = broker.fetch_topic("orphaned").await.expect("topic restored");
        assert_eq!(topic.info().await.creator, ping.uuid());
    }

    #[tokio::test]
    async fn restored_users_round_trip_their_attributes() {
        let (broker, _receivers, _fanout) = broker();
        let ping = broker
            .get_or_create_user("ping", "pingpassword")
            .await
            .expect("create superuser");

        let tombstone = OffsetDateTime::now_utc();
        let source = FixtureSource {
            users: vec![UserRecord {
                uuid: "uuid-1".to_owned(),
                username_hash: "hash-1".to_owned(),
                password_hash: "pw-1".to_owned(),
                created: tombstone,
                subscriptions: [("t".to_owned(), "http://h/ok".to_owned())].into(),
                tombstone: Some(tombstone),
            }],
            ..FixtureSource::default()
        };

        broker
            .restore_from(&source, &ping)
            .await
            .expect("restore snapshot");

        let user = broker
            .user_by_username_hash("hash-1")
            .await
            .expect("user restored");
        assert_eq!(user.uuid(), "uuid-1");
        assert_eq!(user.tombstone().await, Some(tombstone));
        assert_eq!(
            user.subscriptions().await.get("t").map(String::as_str),
            Some("http://h/ok")
        );
    }
}
