mod messaging;
mod sweep;

pub use messaging::{PushBatch, PushDelivery};
pub use sweep::SweepStats;

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};

use crate::error::PubSubError;
use crate::identity::DerivedIdentity;
use crate::persist::{PersistHandle, UserRecord};
use crate::protocol::FanoutEvent;
use crate::topic::Topic;
use crate::user::User;

/// The in-memory pub/sub core: user and topic registries plus the handles
/// every mutation fans out through (persistence queues, live distributor).
///
/// Locking discipline: the registry lock is always taken first and released
/// before entity work where possible. Request paths mutate the user's
/// state, release it, then the topic's; the reclamation sweep holds the
/// registry write lock throughout and takes one entity lock at a time
/// beneath it. No path holds a user lock and a topic lock simultaneously.
pub struct Broker {
    registry: RwLock<Registry>,
    pub(crate) persist: PersistHandle,
    fanout: mpsc::UnboundedSender<FanoutEvent>,
}

#[derive(Default)]
pub(crate) struct Registry {
    /// Topic name against the topic.
    pub(crate) topics: HashMap<String, Arc<Topic>>,
    /// Username hash against the user.
    pub(crate) users: HashMap<String, Arc<User>>,
}

impl Broker {
    #[must_use]
    pub fn new(persist: PersistHandle, fanout: mpsc::UnboundedSender<FanoutEvent>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            persist,
            fanout,
        }
    }

    /// Authenticates or registers a user.
    ///
    /// A known username with a matching password hash returns the existing
    /// user; a mismatch is rejected. An unknown username is registered and
    /// persisted asynchronously.
    pub async fn get_or_create_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<User>, PubSubError> {
        let identity = DerivedIdentity::derive(username, password);

        {
            let registry = self.registry.read().await;
            if let Some(existing) = registry.users.get(&identity.username_hash) {
                return Self::check_password(existing, &identity);
            }
        }

        let mut registry = self.registry.write().await;
        if let Some(existing) = registry.users.get(&identity.username_hash) {
            return Self::check_password(existing, &identity);
        }

        let user = Arc::new(User::new(identity.clone(), OffsetDateTime::now_utc()));
        registry
            .users
            .insert(identity.username_hash, Arc::clone(&user));
        drop(registry);

        let record = {
            let state = user.state.read().await;
            user.record(&state)
        };
        self.persist.write_user(record);

        Ok(user)
    }

    fn check_password(
        existing: &Arc<User>,
        identity: &DerivedIdentity,
    ) -> Result<Arc<User>, PubSubError> {
        if existing.password_hash() == identity.password_hash {
            Ok(Arc::clone(existing))
        } else {
            Err(PubSubError::AuthMismatch)
        }
    }

    /// Returns the topic, failing when it does not exist.
    pub async fn fetch_topic(&self, name: &str) -> Result<Arc<Topic>, PubSubError> {
        let registry = self.registry.read().await;
        registry
            .topics
            .get(name)
            .cloned()
            .ok_or(PubSubError::TopicNotFound)
    }

    /// Creates the topic, failing when it already exists. The creator is
    /// auto-subscribed as a pull subscriber and any tombstone on it cleared.
    pub async fn create_topic(
        &self,
        name: &str,
        user: &Arc<User>,
    ) -> Result<Arc<Topic>, PubSubError> {
        {
            let registry = self.registry.read().await;
            if registry.topics.contains_key(name) {
                return Err(PubSubError::TopicAlreadyExists);
            }
        }

        let topic = Arc::new(Topic::new(name.to_owned(), user.uuid().to_owned()));
        {
            let mut registry = self.registry.write().await;
            if registry.topics.contains_key(name) {
                return Err(PubSubError::TopicAlreadyExists);
            }
            registry.topics.insert(name.to_owned(), Arc::clone(&topic));
        }

        self.subscribe(user, &topic, "").await?;
        Ok(topic)
    }

    /// Returns the topic, creating it when absent.
    pub async fn obtain_topic(
        &self,
        name: &str,
        user: &Arc<User>,
    ) -> Result<Arc<Topic>, PubSubError> {
        match self.fetch_topic(name).await {
            Ok(topic) => Ok(topic),
            Err(_) => self.create_topic(name, user).await,
        }
    }

    /// Topic names, in unspecified order.
    pub async fn list_topics(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        registry.topics.keys().cloned().collect()
    }

    pub async fn user_by_username_hash(&self, username_hash: &str) -> Option<Arc<User>> {
        let registry = self.registry.read().await;
        registry.users.get(username_hash).cloned()
    }

    pub(crate) async fn insert_restored_user(&self, record: UserRecord) -> Arc<User> {
        let user = Arc::new(User::from_record(record));
        let mut registry = self.registry.write().await;
        registry
            .users
            .insert(user.username_hash().to_owned(), Arc::clone(&user));
        user
    }

    pub(crate) async fn registry_read(&self) -> tokio::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().await
    }

    pub(crate) async fn registry_write(&self) -> tokio::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().await
    }

    pub(crate) fn publish_fanout(&self, event: FanoutEvent) {
        if self.fanout.send(event).is_err() {
            tracing::debug!("live fanout distributor is gone; dropping event");
        }
    }
}


#[cfg(test)]
mod tests {
    use crate::error::PubSubError;

    use super::test_support::broker;

    #[tokio::test]
    async fn get_or_create_user_is_idempotent() {
        let (broker, mut receivers, _fanout) = broker();

        let first = broker
            .get_or_create_user("alice", "secret")
            .await
            .expect("create user");
        let second = broker
            .get_or_create_user("alice", "secret")
            .await
            .expect("login user");
        assert_eq!(first.uuid(), second.uuid());

        let record = receivers
            .user_writes
            .try_recv()
            .expect("user persisted on first create");
        assert_eq!(record.uuid, first.uuid());
        assert!(
            receivers.user_writes.try_recv().is_err(),
            "login must not re-persist"
        );
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let (broker, _receivers, _fanout) = broker();

        broker
            .get_or_create_user("alice", "secret")
            .await
            .expect("create user");
        let error = broker
            .get_or_create_user("alice", "wrong")
            .await
            .expect_err("password mismatch should fail");
        assert!(matches!(error, PubSubError::AuthMismatch));
    }

    #[tokio::test]
    async fn create_fails_on_existing_topic_and_obtain_returns_it() {
        let (broker, _receivers, _fanout) = broker();
        let alice = broker
            .get_or_create_user("alice", "secret")
            .await
            .expect("create user");

        let created = broker
            .create_topic("topicA", &alice)
            .await
            .expect("create topic");
        let error = broker
            .create_topic("topicA", &alice)
            .await
            .expect_err("second create should fail");
        assert!(matches!(error, PubSubError::TopicAlreadyExists));

        let obtained = broker
            .obtain_topic("topicA", &alice)
            .await
            .expect("obtain existing topic");
        assert_eq!(obtained.info().await, created.info().await);
    }

    #[tokio::test]
    async fn fetch_fails_on_unknown_topic() {
        let (broker, _receivers, _fanout) = broker();
        let error = broker
            .fetch_topic("missing")
            .await
            .expect_err("fetch of unknown topic should fail");
        assert!(matches!(error, PubSubError::TopicNotFound));
    }

    #[tokio::test]
    async fn create_auto_subscribes_the_creator_as_pull() {
        let (broker, _receivers, _fanout) = broker();
        let alice = broker
            .get_or_create_user("alice", "secret")
            .await
            .expect("create user");
        let topic = broker
            .create_topic("topicA", &alice)
            .await
            .expect("create topic");

        assert_eq!(topic.position_of(alice.uuid()).await, Some(0));
        let subscriptions = alice.subscriptions().await;
        assert_eq!(subscriptions.get("topicA").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn list_topics_returns_all_names() {
        let (broker, _receivers, _fanout) = broker();
        let alice = broker
            .get_or_create_user("alice", "secret")
            .await
            .expect("create user");
        broker.create_topic("a", &alice).await.expect("create a");
        broker.create_topic("b", &alice).await.expect("create b");

        let mut names = broker.list_topics().await;
        names.sort();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
    }
}
