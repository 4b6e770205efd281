use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use postbox_realtime::fanout::{ClientId, Distributor};
use tokio_stream::wrappers::ReceiverStream;

use crate::ApiState;

/// Reconnect hint sent with every frame.
const RETRY_HINT: Duration = Duration::from_millis(2000);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /sse?topic=<name>&topic=<name>`: attaches to the fanout
/// distributor and streams newly written messages for the requested
/// topics. The distributor broadcasts everything; filtering happens here,
/// at the client boundary.
pub(crate) async fn stream(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let topics = topic_filter(query.as_deref());
    let (client_id, receiver) = state.distributor().attach().await;
    tracing::debug!(client = ?client_id, topics = topics.len(), "live stream client attached");

    let guard = DetachOnDisconnect {
        distributor: Arc::clone(state.distributor()),
        client_id,
    };

    let stream = ReceiverStream::new(receiver)
        .filter(move |event| futures_util::future::ready(topics.contains(&event.topic_name)))
        .enumerate()
        .map(move |(index, event)| {
            let _keep_attached = &guard;
            let frame = Event::default()
                .retry(RETRY_HINT)
                .id((index + 1).to_string());
            let frame = match frame.json_data(&event) {
                Ok(frame) => frame,
                Err(error) => {
                    tracing::error!(%error, "failed to encode stream event");
                    Event::default().comment("encoding error")
                }
            };
            Ok::<Event, Infallible>(frame)
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep alive"),
    )
}

/// Repeated `topic` query parameters select the streams a client wants.
fn topic_filter(query: Option<&str>) -> HashSet<String> {
    let Some(query) = query else {
        return HashSet::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, value)| key == "topic" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
        .collect()
}

/// Detaches the client when the connection (and with it the stream) is
/// dropped, so the distributor stops buffering for it.
struct DetachOnDisconnect {
    distributor: Arc<Distributor>,
    client_id: ClientId,
}

impl Drop for DetachOnDisconnect {
    fn drop(&mut self) {
        let distributor = Arc::clone(&self.distributor);
        let client_id = self.client_id;
        tokio::spawn(async move {
            let _ = distributor.detach(client_id).await;
        });
    }
}
