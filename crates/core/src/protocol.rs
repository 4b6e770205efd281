//! Wire shapes shared by the HTTP API, the webhook pusher, and the live
//! event stream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// The rolled-up request body for every API route: JSON body fields plus
/// URL query overrides, merged by the HTTP layer before use.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IncomingRequest {
    #[serde(rename = "username", default)]
    pub username: Option<String>,
    #[serde(rename = "password", default)]
    pub password: Option<String>,
    #[serde(rename = "topic", default)]
    pub topic: Option<String>,
    #[serde(rename = "webhook_url", default)]
    pub webhook_url: Option<String>,
    #[serde(rename = "message", default)]
    pub message: Option<serde_json::Value>,
    #[serde(rename = "message_id", default)]
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "error")]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(rename = "user_id")]
    pub user_id: String,
    #[serde(rename = "subscription_count")]
    pub subscription_count: usize,
    #[serde(rename = "subscriptions")]
    pub subscriptions: HashMap<String, String>,
    #[serde(rename = "created")]
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResponse {
    #[serde(rename = "topic_name")]
    pub topic_name: String,
    #[serde(rename = "status")]
    pub status: String,
    #[serde(rename = "creator")]
    pub creator: String,
    #[serde(rename = "pointer_head")]
    pub pointer_head: i64,
    /// Whether the requesting user may write (it is the topic creator).
    #[serde(rename = "writable")]
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    #[serde(rename = "user_id")]
    pub user_id: String,
    #[serde(rename = "topic_name")]
    pub topic_name: String,
    #[serde(rename = "status")]
    pub status: String,
    #[serde(rename = "writable")]
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicListResponse {
    #[serde(rename = "topics")]
    pub topics: Vec<String>,
    #[serde(rename = "count")]
    pub count: usize,
}

/// Envelope for pull/write responses and for webhook POST bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(rename = "topic_id")]
    pub topic_id: String,
    #[serde(rename = "message")]
    pub message: Message,
}

/// A freshly written message on its way to attached live-stream clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutEvent {
    #[serde(rename = "topic_name")]
    pub topic_name: String,
    #[serde(rename = "message")]
    pub message: Message,
}
