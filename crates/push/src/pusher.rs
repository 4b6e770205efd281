use std::sync::Arc;

use postbox_core::protocol::MessageResponse;
use postbox_core::{Broker, PushBatch};
use time::OffsetDateTime;

use crate::transport::WebhookTransport;

/// Counters reported by one push cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Walks every topic on each tick and POSTs pending messages to webhook
/// subscribers. Deliveries for one (topic, message) pair run concurrently
/// and are joined before the next message is taken up, so a subscriber's
/// pointer only ever advances one position per acknowledged delivery.
pub struct WebhookPusher {
    broker: Arc<Broker>,
    transport: Arc<dyn WebhookTransport>,
}

impl WebhookPusher {
    #[must_use]
    pub fn new(broker: Arc<Broker>, transport: Arc<dyn WebhookTransport>) -> Self {
        Self { broker, transport }
    }

    pub async fn run_cycle(&self) -> PushStats {
        self.run_cycle_at(OffsetDateTime::now_utc()).await
    }

    pub(crate) async fn run_cycle_at(&self, now: OffsetDateTime) -> PushStats {
        let mut stats = PushStats::default();
        for batch in self.broker.due_push_batches(now).await {
            self.deliver_batch(batch, now, &mut stats).await;
        }
        stats
    }

    async fn deliver_batch(&self, batch: PushBatch, now: OffsetDateTime, stats: &mut PushStats) {
        let PushBatch {
            topic,
            message,
            deliveries,
        } = batch;
        let message_id = message.id;
        let envelope = MessageResponse {
            topic_id: topic.name().to_owned(),
            message,
        };

        let mut attempts = tokio::task::JoinSet::new();
        for delivery in deliveries {
            let transport = Arc::clone(&self.transport);
            let envelope = envelope.clone();
            attempts.spawn(async move {
                let outcome = transport.deliver(&delivery.push_url, &envelope).await;
                (delivery, outcome)
            });
        }

        while let Some(joined) = attempts.join_next().await {
            let Ok((delivery, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(200 | 201) => {
                    topic
                        .apply_push_success(message_id, &delivery.subscriber_id)
                        .await;
                    stats.delivered += 1;
                }
                Ok(status) => {
                    tracing::warn!(
                        topic = %envelope.topic_id,
                        message = message_id,
                        subscriber = %delivery.subscriber_id,
                        status,
                        "webhook delivery rejected"
                    );
                    topic
                        .apply_push_failure(message_id, &delivery.subscriber_id, now)
                        .await;
                    stats.failed += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        topic = %envelope.topic_id,
                        message = message_id,
                        subscriber = %delivery.subscriber_id,
                        %error,
                        "webhook delivery failed"
                    );
                    topic
                        .apply_push_failure(message_id, &delivery.subscriber_id, now)
                        .await;
                    stats.failed += 1;
                }
            }
        }
    }
}
