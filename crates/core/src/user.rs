use std::collections::HashMap;

use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::identity::DerivedIdentity;
use crate::persist::UserRecord;

/// A registered identity. Everything derived from the credentials is
/// immutable; the subscription map and tombstone live behind the user's
/// own lock.
#[derive(Debug)]
pub struct User {
    uuid: String,
    username_hash: String,
    password_hash: String,
    created: OffsetDateTime,
    pub(crate) state: RwLock<UserState>,
}

#[derive(Debug, Default)]
pub(crate) struct UserState {
    /// Topic name against the push URL registered for it; an empty string
    /// marks a pull subscription.
    pub(crate) subscriptions: HashMap<String, String>,
    pub(crate) tombstone: Option<OffsetDateTime>,
}

impl User {
    pub(crate) fn new(identity: DerivedIdentity, created: OffsetDateTime) -> Self {
        Self {
            uuid: identity.uuid,
            username_hash: identity.username_hash,
            password_hash: identity.password_hash,
            created,
            state: RwLock::new(UserState::default()),
        }
    }

    pub(crate) fn from_record(record: UserRecord) -> Self {
        Self {
            uuid: record.uuid,
            username_hash: record.username_hash,
            password_hash: record.password_hash,
            created: record.created,
            state: RwLock::new(UserState {
                subscriptions: record.subscriptions,
                tombstone: record.tombstone,
            }),
        }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn username_hash(&self) -> &str {
        &self.username_hash
    }

    pub(crate) fn password_hash(&self) -> &str {
        &self.password_hash
    }

    #[must_use]
    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    /// Current topic-name → push-URL map.
    pub async fn subscriptions(&self) -> HashMap<String, String> {
        self.state.read().await.subscriptions.clone()
    }

    pub async fn tombstone(&self) -> Option<OffsetDateTime> {
        self.state.read().await.tombstone
    }

    /// Value-tree snapshot used by the persistence layer; taken under the
    /// caller's state guard so the record is internally consistent.
    pub(crate) fn record(&self, state: &UserState) -> UserRecord {
        UserRecord {
            uuid: self.uuid.clone(),
            username_hash: self.username_hash.clone(),
            password_hash: self.password_hash.clone(),
            created: self.created,
            subscriptions: state.subscriptions.clone(),
            tombstone: state.tombstone,
        }
    }
}
