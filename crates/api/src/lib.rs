#![forbid(unsafe_code)]

mod error;
mod handlers;
mod request;
mod sse;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use postbox_core::Broker;
use postbox_realtime::fanout::Distributor;

pub use error::ApiError;

#[derive(Clone)]
pub struct ApiState {
    broker: Arc<Broker>,
    distributor: Arc<Distributor>,
}

impl ApiState {
    #[must_use]
    pub fn new(broker: Arc<Broker>, distributor: Arc<Distributor>) -> Self {
        Self {
            broker,
            distributor,
        }
    }

    pub(crate) fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub(crate) fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }
}

/// The request/response API. Every route authenticates from the merged
/// body and query credentials; unknown users are registered on the fly.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/users/user/obtain", post(handlers::user_obtain))
        .route("/topics/topic/create", post(handlers::topic_create))
        .route("/topics/topic/fetch", post(handlers::topic_fetch))
        .route("/topics/topic/obtain", post(handlers::topic_obtain))
        .route("/topics/fetch", post(handlers::topics_list))
        .route("/topics/topic/subscribe", post(handlers::subscribe))
        .route("/topics/topic/unsubscribe", post(handlers::unsubscribe))
        .route("/topics/topic/messages/write", post(handlers::message_write))
        .route("/topics/topic/messages/pull", post(handlers::message_pull))
        .with_state(state)
}

/// The live stream listener, served from its own port.
pub fn sse_router(state: ApiState) -> Router {
    Router::new()
        .route("/sse", get(sse::stream))
        .with_state(state)
}
