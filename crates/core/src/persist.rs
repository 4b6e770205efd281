use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::topic::Subscriber;

/// Sentinel message id meaning "delete every record for this subscriber in
/// this topic regardless of position".
pub const WILDCARD_MESSAGE_ID: i64 = -1;

/// Serialized form of a user, keyed by `username_hash` in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "uuid")]
    pub uuid: String,
    #[serde(rename = "username_hash")]
    pub username_hash: String,
    #[serde(rename = "password_hash")]
    pub password_hash: String,
    #[serde(rename = "created", with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(rename = "subscriptions", default)]
    pub subscriptions: HashMap<String, String>,
    #[serde(
        rename = "tombstone",
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tombstone: Option<OffsetDateTime>,
}

/// A subscriber at a pointer position, keyed `topic/message_id/subscriber_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    #[serde(rename = "topic")]
    pub topic: String,
    #[serde(rename = "message_id")]
    pub message_id: i64,
    #[serde(rename = "subscriber")]
    pub subscriber: Subscriber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberKey {
    pub topic: String,
    /// [`WILDCARD_MESSAGE_ID`] deletes the subscriber at every position.
    pub message_id: i64,
    pub subscriber_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub topic: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub topic: String,
    pub message_id: i64,
}

/// Producer side of the six persistence queues. Sends never block; a
/// dropped worker is logged and the mutation proceeds in memory.
#[derive(Clone)]
pub struct PersistHandle {
    user_writes: mpsc::UnboundedSender<UserRecord>,
    user_deletes: mpsc::UnboundedSender<String>,
    subscriber_writes: mpsc::UnboundedSender<SubscriberRecord>,
    subscriber_deletes: mpsc::UnboundedSender<SubscriberKey>,
    message_writes: mpsc::UnboundedSender<MessageRecord>,
    message_deletes: mpsc::UnboundedSender<MessageKey>,
}

/// Consumer side, handed to the storage workers at launch.
pub struct PersistReceivers {
    pub user_writes: mpsc::UnboundedReceiver<UserRecord>,
    pub user_deletes: mpsc::UnboundedReceiver<String>,
    pub subscriber_writes: mpsc::UnboundedReceiver<SubscriberRecord>,
    pub subscriber_deletes: mpsc::UnboundedReceiver<SubscriberKey>,
    pub message_writes: mpsc::UnboundedReceiver<MessageRecord>,
    pub message_deletes: mpsc::UnboundedReceiver<MessageKey>,
}

pub fn persist_channel() -> (PersistHandle, PersistReceivers) {
    let (user_writes, user_writes_rx) = mpsc::unbounded_channel();
    let (user_deletes, user_deletes_rx) = mpsc::unbounded_channel();
    let (subscriber_writes, subscriber_writes_rx) = mpsc::unbounded_channel();
    let (subscriber_deletes, subscriber_deletes_rx) = mpsc::unbounded_channel();
    let (message_writes, message_writes_rx) = mpsc::unbounded_channel();
    let (message_deletes, message_deletes_rx) = mpsc::unbounded_channel();

    (
        PersistHandle {
            user_writes,
            user_deletes,
            subscriber_writes,
            subscriber_deletes,
            message_writes,
            message_deletes,
        },
        PersistReceivers {
            user_writes: user_writes_rx,
            user_deletes: user_deletes_rx,
            subscriber_writes: subscriber_writes_rx,
            subscriber_deletes: subscriber_deletes_rx,
            message_writes: message_writes_rx,
            message_deletes: message_deletes_rx,
        },
    )
}

impl PersistHandle {
    pub fn write_user(&self, record: UserRecord) {
        if self.user_writes.send(record).is_err() {
            tracing::error!("user write worker is gone; dropping record");
        }
    }

    pub fn delete_user(&self, username_hash: String) {
        if self.user_deletes.send(username_hash).is_err() {
            tracing::error!("user delete worker is gone; dropping key");
        }
    }

    pub fn write_subscriber(&self, record: SubscriberRecord) {
        if self.subscriber_writes.send(record).is_err() {
            tracing::error!("subscriber write worker is gone; dropping record");
        }
    }

    pub fn delete_subscriber(&self, key: SubscriberKey) {
        if self.subscriber_deletes.send(key).is_err() {
            tracing::error!("subscriber delete worker is gone; dropping key");
        }
    }

    pub fn write_message(&self, record: MessageRecord) {
        if self.message_writes.send(record).is_err() {
            tracing::error!("message write worker is gone; dropping record");
        }
    }

    pub fn delete_message(&self, key: MessageKey) {
        if self.message_deletes.send(key).is_err() {
            tracing::error!("message delete worker is gone; dropping key");
        }
    }
}
