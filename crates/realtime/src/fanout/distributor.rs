use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use postbox_core::protocol::FanoutEvent;
use tokio::sync::{mpsc, RwLock};

use crate::fanout::{FanoutConfig, FanoutError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub(crate) u64);

/// Broadcasts freshly written messages to every attached live-stream
/// client. Events are forwarded unfiltered; per-topic filtering belongs to
/// the client interface boundary.
///
/// Each client gets a bounded buffer. A full buffer drops the event for
/// that client (counted), and a closed client is evicted on the next
/// publish, so one slow consumer can never stall the writers.
pub struct Distributor {
    config: FanoutConfig,
    next_client_id: AtomicU64,
    dropped_events: AtomicU64,
    state: RwLock<HashMap<ClientId, mpsc::Sender<FanoutEvent>>>,
}

impl Distributor {
    #[must_use]
    pub fn new(config: FanoutConfig) -> Self {
        Self {
            config,
            next_client_id: AtomicU64::new(1),
            dropped_events: AtomicU64::new(0),
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new client and returns its event feed.
    pub async fn attach(&self) -> (ClientId, mpsc::Receiver<FanoutEvent>) {
        let client_id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.config.client_buffer);
        let mut state = self.state.write().await;
        state.insert(client_id, sender);
        (client_id, receiver)
    }

    pub async fn detach(&self, client_id: ClientId) -> Result<(), FanoutError> {
        let mut state = self.state.write().await;
        if state.remove(&client_id).is_some() {
            Ok(())
        } else {
            Err(FanoutError::ClientNotFound)
        }
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.len()
    }

    /// Events dropped because a client's buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Forwards the event to every attached client; returns how many
    /// received it.
    pub async fn publish(&self, event: &FanoutEvent) -> usize {
        let recipients: Vec<(ClientId, mpsc::Sender<FanoutEvent>)> = {
            let state = self.state.read().await;
            state
                .iter()
                .map(|(client_id, sender)| (*client_id, sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut stale_clients = Vec::new();
        for (client_id, sender) in recipients {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(client = client_id.0, "client buffer full; dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stale_clients.push(client_id),
            }
        }

        if !stale_clients.is_empty() {
            let mut state = self.state.write().await;
            for client_id in stale_clients {
                state.remove(&client_id);
            }
        }

        delivered
    }

    /// Intake channel for publishers: events sent on it are forwarded to
    /// every attached client by a dedicated task. Message writers never
    /// block on a slow stream consumer.
    pub fn intake(self: &Arc<Self>) -> mpsc::UnboundedSender<FanoutEvent> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<FanoutEvent>();
        let distributor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                distributor.publish(&event).await;
            }
        });
        sender
    }
}
