use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::Json;
use postbox_core::protocol::{
    IncomingRequest, MessageResponse, SubscribeResponse, TopicListResponse, TopicResponse,
    UserResponse,
};
use postbox_core::{PubSubError, Topic, User};
use time::format_description::well_known::Rfc3339;

use crate::error::ApiError;
use crate::request::decode_request;
use crate::ApiState;

async fn authenticate(
    state: &ApiState,
    request: &IncomingRequest,
) -> Result<Arc<User>, ApiError> {
    let username = request.username.as_deref().unwrap_or_default();
    let password = request.password.as_deref().unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err(PubSubError::AuthMissing.into());
    }
    Ok(state.broker().get_or_create_user(username, password).await?)
}

fn topic_name(request: &IncomingRequest) -> &str {
    request.topic.as_deref().unwrap_or_default()
}

async fn topic_response(topic: &Topic, user: &User) -> TopicResponse {
    let info = topic.info().await;
    TopicResponse {
        topic_name: info.name,
        status: "Active".to_owned(),
        writable: info.creator == user.uuid(),
        creator: info.creator,
        pointer_head: info.pointer_head,
    }
}

pub(crate) async fn user_obtain(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<UserResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let subscriptions = user.subscriptions().await;
    let created = user
        .created()
        .format(&Rfc3339)
        .map_err(|error| ApiError::internal(format!("format created timestamp: {error}")))?;

    Ok(Json(UserResponse {
        user_id: user.uuid().to_owned(),
        subscription_count: subscriptions.len(),
        subscriptions,
        created,
    }))
}

pub(crate) async fn topic_create(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<TopicResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let topic = state.broker().create_topic(topic_name(&request), &user).await?;
    Ok(Json(topic_response(&topic, &user).await))
}

pub(crate) async fn topic_fetch(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<TopicResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let topic = state.broker().fetch_topic(topic_name(&request)).await?;
    Ok(Json(topic_response(&topic, &user).await))
}

pub(crate) async fn topic_obtain(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<TopicResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let topic = state.broker().obtain_topic(topic_name(&request), &user).await?;
    Ok(Json(topic_response(&topic, &user).await))
}

pub(crate) async fn topics_list(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<TopicListResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    authenticate(&state, &request).await?;
    let topics = state.broker().list_topics().await;
    Ok(Json(TopicListResponse {
        count: topics.len(),
        topics,
    }))
}

pub(crate) async fn subscribe(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let topic = state.broker().obtain_topic(topic_name(&request), &user).await?;
    state
        .broker()
        .subscribe(&user, &topic, request.webhook_url.as_deref().unwrap_or_default())
        .await?;

    let info = topic.info().await;
    Ok(Json(SubscribeResponse {
        user_id: user.uuid().to_owned(),
        topic_name: info.name,
        status: "Subscribed".to_owned(),
        writable: info.creator == user.uuid(),
    }))
}

pub(crate) async fn unsubscribe(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let topic = state.broker().fetch_topic(topic_name(&request)).await?;
    state.broker().unsubscribe(&user, &topic).await;

    let info = topic.info().await;
    Ok(Json(SubscribeResponse {
        user_id: user.uuid().to_owned(),
        topic_name: info.name,
        status: "Unsubscribed".to_owned(),
        writable: info.creator == user.uuid(),
    }))
}

pub(crate) async fn message_write(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let topic = state.broker().obtain_topic(topic_name(&request), &user).await?;
    let payload = request.message.unwrap_or(serde_json::Value::Null);
    let message = state.broker().write_message(&user, &topic, payload).await?;

    Ok(Json(MessageResponse {
        topic_id: topic.name().to_owned(),
        message,
    }))
}

pub(crate) async fn message_pull(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let request = decode_request(query.as_deref(), &body)?;
    let user = authenticate(&state, &request).await?;
    let topic = state.broker().obtain_topic(topic_name(&request), &user).await?;
    let message = state
        .broker()
        .pull_message(&user, &topic, request.message_id.unwrap_or_default())
        .await?;

    Ok(Json(MessageResponse {
        topic_id: topic.name().to_owned(),
        message,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use postbox_core::{persist_channel, Broker};
    use postbox_realtime::fanout::{Distributor, FanoutConfig};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use crate::{router, ApiState};

    fn test_router() -> (axum::Router, postbox_core::PersistReceivers) {
        let (persist, receivers) = persist_channel();
        let distributor = Arc::new(Distributor::new(FanoutConfig::default()));
        let broker = Arc::new(Broker::new(persist, distributor.intake()));
        (router(ApiState::new(broker, distributor)), receivers)
    }

    async fn dispatch(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("build request"),
            )
            .await
            .expect("dispatch request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = serde_json::from_slice(&bytes).expect("decode response body");
        (status, value)
    }

    fn credentials(extra: Value) -> Value {
        let mut body = json!({"username": "alice", "password": "secret"});
        if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        body
    }

    #[tokio::test]
    async fn obtain_user_registers_and_returns_the_same_uuid() {
        let (app, _receivers) = test_router();

        let (status, first) = dispatch(&app, "/users/user/obtain", credentials(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["subscription_count"], 0);
        assert!(first["created"].as_str().expect("created").contains('T'));

        let (status, second) = dispatch(&app, "/users/user/obtain", credentials(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["user_id"], second["user_id"]);
    }

    #[tokio::test]
    async fn missing_credentials_are_a_bad_request() {
        let (app, _receivers) = test_router();

        let (status, body) =
            dispatch(&app, "/users/user/obtain", json!({"username": "alice"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("username and password"));
    }

    #[tokio::test]
    async fn wrong_password_is_a_bad_request() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/users/user/obtain", credentials(json!({}))).await;

        let (status, body) = dispatch(
            &app,
            "/users/user/obtain",
            json!({"username": "alice", "password": "wrong"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("correct credentials"));
    }

    #[tokio::test]
    async fn create_conflicts_while_obtain_returns_the_existing_topic() {
        let (app, _receivers) = test_router();

        let (status, created) = dispatch(
            &app,
            "/topics/topic/create",
            credentials(json!({"topic": "topicA"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["topic_name"], "topicA");
        assert_eq!(created["status"], "Active");
        assert_eq!(created["writable"], true);
        assert_eq!(created["pointer_head"], 0);

        let (status, body) = dispatch(
            &app,
            "/topics/topic/create",
            credentials(json!({"topic": "topicA"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().expect("error").contains("already exists"));

        let (status, obtained) = dispatch(
            &app,
            "/topics/topic/obtain",
            credentials(json!({"topic": "topicA"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(obtained["creator"], created["creator"]);
    }

    #[tokio::test]
    async fn fetch_of_a_missing_topic_fails() {
        let (app, _receivers) = test_router();

        let (status, body) = dispatch(
            &app,
            "/topics/topic/fetch",
            credentials(json!({"topic": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().expect("error").contains("does not exist"));
    }

    #[tokio::test]
    async fn list_returns_topic_names_and_count() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "a"}))).await;
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "b"}))).await;

        let (status, body) = dispatch(&app, "/topics/fetch", credentials(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        let mut names: Vec<&str> = body["topics"]
            .as_array()
            .expect("topics array")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn write_then_pull_round_trips_the_message() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "topicA"}))).await;

        let (status, written) = dispatch(
            &app,
            "/topics/topic/messages/write",
            credentials(json!({"topic": "topicA", "message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(written["topic_id"], "topicA");
        assert_eq!(written["message"]["id"], 0);
        assert_eq!(written["message"]["data"], "hello");

        let (status, pulled) = dispatch(
            &app,
            "/topics/topic/messages/pull",
            credentials(json!({"topic": "topicA", "message_id": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pulled["message"], written["message"]);
    }

    #[tokio::test]
    async fn non_creator_writes_are_rejected() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "topicA"}))).await;

        let (status, body) = dispatch(
            &app,
            "/topics/topic/messages/write",
            json!({"username": "bob", "password": "pw", "topic": "topicA", "message": "nope"}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().expect("error").contains("authorisation"));
    }

    #[tokio::test]
    async fn pull_on_a_push_subscription_is_rejected() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "topicA"}))).await;
        dispatch(
            &app,
            "/topics/topic/messages/write",
            credentials(json!({"topic": "topicA", "message": "hello"})),
        )
        .await;

        let (status, _) = dispatch(
            &app,
            "/topics/topic/subscribe",
            json!({"username": "bob", "password": "pw", "topic": "topicA", "webhook_url": "http://h/ok"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = dispatch(
            &app,
            "/topics/topic/messages/pull",
            json!({"username": "bob", "password": "pw", "topic": "topicA", "message_id": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().expect("error").contains("push subscription"));
    }

    #[tokio::test]
    async fn pull_of_an_unknown_id_reports_the_pointer_head() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "topicA"}))).await;
        dispatch(
            &app,
            "/topics/topic/messages/write",
            credentials(json!({"topic": "topicA", "message": "hello"})),
        )
        .await;

        let (status, body) = dispatch(
            &app,
            "/topics/topic/messages/pull",
            credentials(json!({"topic": "topicA", "message_id": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().expect("error").contains("pointer head is 1"));
    }

    #[tokio::test]
    async fn invalid_webhook_url_is_a_bad_request() {
        let (app, _receivers) = test_router();

        let (status, body) = dispatch(
            &app,
            "/topics/topic/subscribe",
            credentials(json!({"topic": "topicA", "webhook_url": "::nope::"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("push URL not valid"));
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_report_status_and_writability() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "topicA"}))).await;

        let (status, subscribed) = dispatch(
            &app,
            "/topics/topic/subscribe",
            json!({"username": "bob", "password": "pw", "topic": "topicA"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(subscribed["status"], "Subscribed");
        assert_eq!(subscribed["writable"], false);

        let (status, unsubscribed) = dispatch(
            &app,
            "/topics/topic/unsubscribe",
            json!({"username": "bob", "password": "pw", "topic": "topicA"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unsubscribed["status"], "Unsubscribed");
    }

    #[tokio::test]
    async fn query_parameters_override_the_body() {
        let (app, _receivers) = test_router();
        dispatch(&app, "/topics/topic/create", credentials(json!({"topic": "from-query"}))).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/topics/topic/fetch?topic=from-query")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        credentials(json!({"topic": "from-body"})).to_string(),
                    ))
                    .expect("build request"),
            )
            .await
            .expect("dispatch request");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let body: Value = serde_json::from_slice(&bytes).expect("decode body");
        assert_eq!(body["topic_name"], "from-query");
    }
}
