use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use url::Url;

use crate::message::Message;
use crate::INITIAL_BACKOFF;

/// A named single-writer append-only log with per-subscriber read pointers.
#[derive(Debug)]
pub struct Topic {
    name: String,
    pub(crate) state: RwLock<TopicState>,
}

#[derive(Debug)]
pub(crate) struct TopicState {
    /// UUID of the only user allowed to write.
    pub(crate) creator: String,
    pub(crate) messages: BTreeMap<i64, Message>,
    /// Message id against the set of subscribers whose next expected
    /// message is that id, keyed by subscriber id.
    pub(crate) pointer_positions: HashMap<i64, HashMap<String, Subscriber>>,
    /// Next message id to assign.
    pub(crate) pointer_head: i64,
    pub(crate) tombstone: Option<OffsetDateTime>,
}

/// The edge between a user and a topic. References both sides by id only;
/// subscriber records must stay pure value trees so the persistence
/// encoders never see a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "username_hash")]
    pub username_hash: String,
    #[serde(rename = "push_url")]
    pub push_url: Option<Url>,
    #[serde(
        rename = "last_attempt",
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_attempt: Option<OffsetDateTime>,
    #[serde(rename = "backoff")]
    pub backoff: Duration,
    #[serde(rename = "creator")]
    pub creator: bool,
    #[serde(
        rename = "tombstone",
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tombstone: Option<OffsetDateTime>,
}

impl Subscriber {
    #[must_use]
    pub fn new(id: String, username_hash: String, push_url: Option<Url>, creator: bool) -> Self {
        Self {
            id,
            username_hash,
            push_url,
            last_attempt: None,
            backoff: INITIAL_BACKOFF,
            creator,
            tombstone: None,
        }
    }

    /// Whether a push attempt may be made now, honouring the backoff set by
    /// the previous failed attempt.
    #[must_use]
    pub fn push_due(&self, now: OffsetDateTime) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => last + self.backoff <= now,
        }
    }
}

/// Point-in-time view of a topic's public attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: String,
    pub creator: String,
    pub pointer_head: i64,
}

impl Topic {
    pub(crate) fn new(name: String, creator: String) -> Self {
        Self {
            name,
            state: RwLock::new(TopicState {
                creator,
                messages: BTreeMap::new(),
                pointer_positions: HashMap::new(),
                pointer_head: 0,
                tombstone: None,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn info(&self) -> TopicInfo {
        let state = self.state.read().await;
        TopicInfo {
            name: self.name.clone(),
            creator: state.creator.clone(),
            pointer_head: state.pointer_head,
        }
    }

    pub async fn pointer_head(&self) -> i64 {
        self.state.read().await.pointer_head
    }

    /// The pointer position a subscriber currently waits at, if any.
    pub async fn position_of(&self, subscriber_id: &str) -> Option<i64> {
        let state = self.state.read().await;
        state
            .pointer_positions
            .iter()
            .find(|(_, subscribers)| subscribers.contains_key(subscriber_id))
            .map(|(position, _)| *position)
    }

    /// Clone of the subscriber record at its current position.
    pub async fn subscriber_snapshot(&self, subscriber_id: &str) -> Option<Subscriber> {
        let state = self.state.read().await;
        state
            .pointer_positions
            .values()
            .find_map(|subscribers| subscribers.get(subscriber_id))
            .cloned()
    }

    pub async fn message(&self, id: i64) -> Option<Message> {
        self.state.read().await.messages.get(&id).cloned()
    }

    pub async fn tombstone(&self) -> Option<OffsetDateTime> {
        self.state.read().await.tombstone
    }
}

impl TopicState {
    /// Removes the subscriber from every pointer position it occupies,
    /// guarding against stray duplicates.
    pub(crate) fn remove_subscriber(&mut self, subscriber_id: &str) {
        for subscribers in self.pointer_positions.values_mut() {
            subscribers.remove(subscriber_id);
        }
    }
}
