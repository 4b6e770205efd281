use std::sync::Arc;

use time::OffsetDateTime;
use url::Url;

use crate::error::PubSubError;
use crate::message::Message;
use crate::persist::{
    MessageRecord, SubscriberKey, SubscriberRecord, WILDCARD_MESSAGE_ID,
};
use crate::protocol::FanoutEvent;
use crate::topic::{Subscriber, Topic};
use crate::user::User;
use crate::{BACKOFF_CAP, INITIAL_BACKOFF};

use super::Broker;

/// All due webhook deliveries for one (topic, message) pair. The pusher
/// runs the deliveries of a batch concurrently and joins them before
/// moving to the next batch.
pub struct PushBatch {
    pub topic: Arc<Topic>,
    pub message: Message,
    pub deliveries: Vec<PushDelivery>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushDelivery {
    pub subscriber_id: String,
    pub push_url: Url,
}

impl Broker {
    /// Subscribes the user to the topic. A non-empty `push_url` registers a
    /// webhook push subscription; an empty one is a pull subscription.
    ///
    /// Any prior subscription is removed first, so the new one always lands
    /// at the topic's pointer head. This is how "catch me up to now" is
    /// expressed: re-subscribing resets the read pointer.
    pub async fn subscribe(
        &self,
        user: &Arc<User>,
        topic: &Arc<Topic>,
        push_url: &str,
    ) -> Result<(), PubSubError> {
        let parsed = if push_url.is_empty() {
            None
        } else {
            Some(Url::parse(push_url)?)
        };

        self.unsubscribe(user, topic).await;

        let user_record = {
            let mut state = user.state.write().await;
            state
                .subscriptions
                .insert(topic.name().to_owned(), push_url.to_owned());
            state.tombstone = None;
            user.record(&state)
        };

        let subscriber_record = {
            let mut state = topic.state.write().await;
            let subscriber = Subscriber::new(
                user.uuid().to_owned(),
                user.username_hash().to_owned(),
                parsed,
                state.creator == user.uuid(),
            );
            let head = state.pointer_head;
            state
                .pointer_positions
                .entry(head)
                .or_default()
                .insert(subscriber.id.clone(), subscriber.clone());
            state.tombstone = None;
            SubscriberRecord {
                topic: topic.name().to_owned(),
                message_id: head,
                subscriber,
            }
        };

        self.persist.write_user(user_record);
        self.persist.write_subscriber(subscriber_record);
        Ok(())
    }

    /// Removes the user's subscription. Idempotent: unknown subscriptions
    /// are a no-op apart from the tombstone clear and the wildcard delete
    /// handed to the persistence layer.
    pub async fn unsubscribe(&self, user: &Arc<User>, topic: &Arc<Topic>) {
        let user_record = {
            let mut state = user.state.write().await;
            state.subscriptions.remove(topic.name());
            state.tombstone = None;
            user.record(&state)
        };

        {
            let mut state = topic.state.write().await;
            state.remove_subscriber(user.uuid());
        }

        self.persist.write_user(user_record);
        self.persist.delete_subscriber(SubscriberKey {
            topic: topic.name().to_owned(),
            message_id: WILDCARD_MESSAGE_ID,
            subscriber_id: user.uuid().to_owned(),
        });
    }

    /// Appends a message to the topic's log. Only the creator may write.
    ///
    /// The creator's auto-subscription is reset to the new head, the message
    /// is queued for persistence, and a fanout event is published to the
    /// live distributor.
    pub async fn write_message(
        &self,
        user: &Arc<User>,
        topic: &Arc<Topic>,
        data: serde_json::Value,
    ) -> Result<Message, PubSubError> {
        let message = {
            let mut state = topic.state.write().await;
            if state.creator != user.uuid() {
                return Err(PubSubError::Forbidden);
            }
            let message = Message::new(state.pointer_head, data, OffsetDateTime::now_utc());
            state.messages.insert(message.id, message.clone());
            state.pointer_head += 1;
            state.tombstone = None;
            message
        };

        self.subscribe(user, topic, "").await?;

        self.persist.write_message(MessageRecord {
            topic: topic.name().to_owned(),
            message: message.clone(),
        });
        self.publish_fanout(FanoutEvent {
            topic_name: topic.name().to_owned(),
            message: message.clone(),
        });

        Ok(message)
    }

    /// Reads a message by id for a pull subscriber.
    ///
    /// The subscriber's pointer moves to the pulled id when that id is at or
    /// below its current position; pulling ahead of the pointer returns the
    /// message without advancing.
    pub async fn pull_message(
        &self,
        user: &Arc<User>,
        topic: &Arc<Topic>,
        message_id: i64,
    ) -> Result<Message, PubSubError> {
        {
            let state = user.state.read().await;
            match state.subscriptions.get(topic.name()) {
                None => return Err(PubSubError::NotSubscribed),
                Some(push_url) if !push_url.is_empty() => return Err(PubSubError::PullOnPush),
                Some(_) => {}
            }
        }

        let (message, moved) = {
            let mut state = topic.state.write().await;
            let Some(message) = state.messages.get(&message_id).cloned() else {
                return Err(PubSubError::MessageNotFound {
                    id: message_id,
                    head: state.pointer_head,
                });
            };

            let current = state
                .pointer_positions
                .iter()
                .find(|(_, subscribers)| subscribers.contains_key(user.uuid()))
                .map(|(position, _)| *position);

            let mut moved = false;
            if let Some(position) = current {
                if message_id <= position {
                    if let Some(subscriber) = state
                        .pointer_positions
                        .get_mut(&position)
                        .and_then(|subscribers| subscribers.remove(user.uuid()))
                    {
                        state
                            .pointer_positions
                            .entry(message_id)
                            .or_default()
                            .insert(subscriber.id.clone(), subscriber);
                        moved = true;
                    }
                }
            }
            (message, moved)
        };

        if moved {
            let record = {
                let mut state = user.state.write().await;
                state.tombstone = None;
                user.record(&state)
            };
            self.persist.write_user(record);
        }

        Ok(message)
    }

    /// Walks every topic and collects the webhook deliveries whose backoff
    /// has elapsed, grouped per (topic, message) in message-id order.
    pub async fn due_push_batches(&self, now: OffsetDateTime) -> Vec<PushBatch> {
        let topics: Vec<Arc<Topic>> = {
            let registry = self.registry_read().await;
            registry.topics.values().cloned().collect()
        };

        let mut batches = Vec::new();
        for topic in topics {
            let state = topic.state.read().await;
            for (message_id, message) in &state.messages {
                let Some(subscribers) = state.pointer_positions.get(message_id) else {
                    continue;
                };
                let deliveries: Vec<PushDelivery> = subscribers
                    .values()
                    .filter(|subscriber| subscriber.push_due(now))
                    .filter_map(|subscriber| {
                        subscriber.push_url.as_ref().map(|url| PushDelivery {
                            subscriber_id: subscriber.id.clone(),
                            push_url: url.clone(),
                        })
                    })
                    .collect();
                if !deliveries.is_empty() {
                    batches.push(PushBatch {
                        topic: Arc::clone(&topic),
                        message: message.clone(),
                        deliveries,
                    });
                }
            }
        }
        batches
    }
}

impl Topic {
    /// Acknowledged delivery: reset the backoff state and advance the
    /// subscriber to the next pointer position. Removal from the old
    /// position and insertion at the new one happen under one lock.
    pub async fn apply_push_success(&self, message_id: i64, subscriber_id: &str) {
        let mut state = self.state.write().await;
        let Some(mut subscriber) = state
            .pointer_positions
            .get_mut(&message_id)
            .and_then(|subscribers| subscribers.remove(subscriber_id))
        else {
            return;
        };
        subscriber.last_attempt = None;
        subscriber.backoff = INITIAL_BACKOFF;
        state
            .pointer_positions
            .entry(message_id + 1)
            .or_default()
            .insert(subscriber.id.clone(), subscriber);
    }

    /// Failed delivery: stamp the attempt and double the backoff, capped.
    /// The pointer does not move.
    pub async fn apply_push_failure(
        &self,
        message_id: i64,
        subscriber_id: &str,
        now: OffsetDateTime,
    ) {
        let mut state = self.state.write().await;
        let Some(subscriber) = state
            .pointer_positions
            .get_mut(&message_id)
            .and_then(|subscribers| subscribers.get_mut(subscriber_id))
        else {
            return;
        };
        subscriber.last_attempt = Some(now);
        subscriber.backoff = subscriber
            .backoff
            .max(INITIAL_BACKOFF)
            .saturating_mul(2)
            .min(BACKOFF_CAP);
    }
}
