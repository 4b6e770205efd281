#![forbid(unsafe_code)]

mod broker;
mod error;
mod identity;
mod message;
mod persist;
pub mod protocol;
mod restore;
mod topic;
mod user;

pub use broker::{Broker, PushBatch, PushDelivery, SweepStats};
pub use error::PubSubError;
pub use identity::DerivedIdentity;
pub use message::Message;
pub use persist::{
    persist_channel, MessageKey, MessageRecord, PersistHandle, PersistReceivers, SubscriberKey,
    SubscriberRecord, UserRecord, WILDCARD_MESSAGE_ID,
};
pub use restore::SnapshotSource;
pub use topic::{Subscriber, Topic, TopicInfo};
pub use user::User;

use std::time::Duration;

/// Backoff a subscriber starts from, and the floor it resets to after a
/// successful delivery.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(80);

/// Ceiling for exponential push backoff.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60 * 60);
