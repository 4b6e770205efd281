use std::time::Duration;

use time::OffsetDateTime;

use crate::persist::{MessageKey, MessageRecord, SubscriberKey, SubscriberRecord};

use super::Broker;

/// Counters reported by one reclamation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub subscribers_tombstoned: usize,
    pub subscribers_reclaimed: usize,
    pub messages_tombstoned: usize,
    pub messages_reclaimed: usize,
    pub topics_tombstoned: usize,
    pub topics_reclaimed: usize,
    pub users_tombstoned: usize,
    pub users_reclaimed: usize,
}

impl Broker {
    /// Two-phase soft-delete/reclaim sweep over subscriptions, messages,
    /// topics and users, in that order.
    ///
    /// Holds the registry write lock for the whole sweep, so every other
    /// operation queues behind it. The sweep is short; this is a known
    /// serialization point.
    pub async fn sweep_tombstones(
        &self,
        stale_window: Duration,
        resurrection_window: Duration,
    ) -> SweepStats {
        self.sweep_tombstones_at(stale_window, resurrection_window, OffsetDateTime::now_utc())
            .await
    }

    pub(crate) async fn sweep_tombstones_at(
        &self,
        stale_window: Duration,
        resurrection_window: Duration,
        now: OffsetDateTime,
    ) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut registry = self.registry_write().await;

        // Subscriptions: a subscriber parked at a message older than the
        // stale window is orphaned. The topic lock is released before the
        // owning users are touched; the sweep never holds both at once.
        for (topic_name, topic) in &registry.topics {
            let mut detached_users = Vec::new();
            {
                let mut state = topic.state.write().await;
                if state.pointer_positions.is_empty() || state.messages.is_empty() {
                    continue;
                }
                let head = state.pointer_head;
                let positions: Vec<i64> = state
                    .pointer_positions
                    .keys()
                    .copied()
                    .filter(|position| *position <= head)
                    .collect();

                for position in positions {
                    let fresh = state
                        .messages
                        .get(&position)
                        .is_some_and(|message| message.created + stale_window >= now);
                    if fresh {
                        continue;
                    }
                    let Some(subscribers) = state.pointer_positions.get_mut(&position) else {
                        continue;
                    };

                    let mut reclaimed = Vec::new();
                    for subscriber in subscribers.values_mut() {
                        match subscriber.tombstone {
                            None => {
                                subscriber.tombstone = Some(now);
                                stats.subscribers_tombstoned += 1;
                                self.persist.write_subscriber(SubscriberRecord {
                                    topic: topic_name.clone(),
                                    message_id: position,
                                    subscriber: subscriber.clone(),
                                });
                            }
                            Some(stamp) if stamp + resurrection_window < now => {
                                reclaimed
                                    .push((subscriber.id.clone(), subscriber.username_hash.clone()));
                            }
                            Some(_) => {}
                        }
                    }

                    for (subscriber_id, username_hash) in reclaimed {
                        subscribers.remove(&subscriber_id);
                        stats.subscribers_reclaimed += 1;
                        detached_users.push(username_hash);
                        self.persist.delete_subscriber(SubscriberKey {
                            topic: topic_name.clone(),
                            message_id: position,
                            subscriber_id,
                        });
                    }
                }
            }

            for username_hash in detached_users {
                match registry.users.get(&username_hash) {
                    Some(user) => {
                        let record = {
                            let mut user_state = user.state.write().await;
                            user_state.subscriptions.remove(topic_name);
                            user.record(&user_state)
                        };
                        self.persist.write_user(record);
                    }
                    None => tracing::warn!(
                        username_hash = %username_hash,
                        topic = %topic_name,
                        "reclaimed subscriber has no owning user"
                    ),
                }
            }
        }

        // Messages: walk upward from the lowest pointer position while no
        // subscriber waits at or below.
        for (topic_name, topic) in &registry.topics {
            let mut state = topic.state.write().await;
            if state.messages.is_empty() {
                continue;
            }
            let mut lowest = state.pointer_head - state.pointer_positions.len() as i64;
            loop {
                match state.pointer_positions.get(&lowest) {
                    Some(subscribers) if subscribers.is_empty() => {}
                    _ => break,
                }
                if let Some(message) = state.messages.get_mut(&lowest) {
                    match message.tombstone {
                        None => {
                            message.tombstone = Some(now);
                            stats.messages_tombstoned += 1;
                            let record = MessageRecord {
                                topic: topic_name.clone(),
                                message: message.clone(),
                            };
                            self.persist.write_message(record);
                        }
                        Some(stamp) if stamp + resurrection_window < now => {
                            state.messages.remove(&lowest);
                            stats.messages_reclaimed += 1;
                            self.persist.delete_message(MessageKey {
                                topic: topic_name.clone(),
                                message_id: lowest,
                            });
                        }
                        Some(_) => {}
                    }
                }
                lowest += 1;
            }
        }

        // Topics: an empty log marks the topic itself for reclamation.
        let mut dead_topics = Vec::new();
        for (topic_name, topic) in &registry.topics {
            let mut state = topic.state.write().await;
            if !state.messages.is_empty() {
                continue;
            }
            match state.tombstone {
                None => {
                    state.tombstone = Some(now);
                    stats.topics_tombstoned += 1;
                }
                Some(stamp) if stamp + stale_window < now => dead_topics.push(topic_name.clone()),
                Some(_) => {}
            }
        }
        for topic_name in dead_topics {
            registry.topics.remove(&topic_name);
            stats.topics_reclaimed += 1;
        }

        // Users: no subscriptions left means nothing keeps the user alive.
        let mut dead_users = Vec::new();
        for (username_hash, user) in &registry.users {
            let mut state = user.state.write().await;
            if !state.subscriptions.is_empty() {
                continue;
            }
            match state.tombstone {
                None => {
                    state.tombstone = Some(now);
                    stats.users_tombstoned += 1;
                    self.persist.write_user(user.record(&state));
                }
                Some(stamp) if stamp + resurrection_window < now => {
                    dead_users.push(username_hash.clone());
                }
                Some(_) => {}
            }
        }
        for username_hash in dead_users {
            registry.users.remove(&username_hash);
            stats.users_reclaimed += 1;
            self.persist.delete_user(username_hash);
        }

        stats
    }
}
