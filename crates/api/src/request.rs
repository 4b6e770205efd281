use postbox_core::protocol::IncomingRequest;

use crate::error::ApiError;

/// Rolls the JSON body and the URL query into one request. Query values
/// win on conflict; blank query values are ignored and keys are matched
/// case-insensitively.
pub(crate) fn decode_request(
    query: Option<&str>,
    body: &[u8],
) -> Result<IncomingRequest, ApiError> {
    let mut request: IncomingRequest = if body.is_empty() {
        IncomingRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|error| ApiError::bad_request(format!("invalid request body: {error}")))?
    };

    if let Some(query) = query {
        apply_query(&mut request, query)?;
    }
    Ok(request)
}

fn apply_query(request: &mut IncomingRequest, query: &str) -> Result<(), ApiError> {
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        match key.to_ascii_lowercase().as_str() {
            "username" => request.username = Some(value.into_owned()),
            "password" => request.password = Some(value.into_owned()),
            "topic" => request.topic = Some(value.into_owned()),
            "webhook_url" => request.webhook_url = Some(value.into_owned()),
            "message" => request.message = Some(serde_json::Value::String(value.into_owned())),
            "message_id" => {
                let parsed = value.parse().map_err(|_| {
                    ApiError::bad_request(format!("invalid message_id {value:?}"))
                })?;
                request.message_id = Some(parsed);
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::decode_request;

    #[test]
    fn body_alone_is_decoded() {
        let request = decode_request(
            None,
            br#"{"username":"alice","password":"pw","topic":"topicA"}"#,
        )
        .expect("decode request");
        assert_eq!(request.username.as_deref(), Some("alice"));
        assert_eq!(request.topic.as_deref(), Some("topicA"));
    }

    #[test]
    fn query_wins_over_body() {
        let request = decode_request(
            Some("topic=override&MESSAGE_ID=4"),
            br#"{"username":"alice","password":"pw","topic":"topicA","message_id":1}"#,
        )
        .expect("decode request");
        assert_eq!(request.topic.as_deref(), Some("override"));
        assert_eq!(request.message_id, Some(4));
        assert_eq!(request.username.as_deref(), Some("alice"));
    }

    #[test]
    fn blank_query_values_are_ignored() {
        let request = decode_request(
            Some("topic="),
            br#"{"username":"alice","password":"pw","topic":"topicA"}"#,
        )
        .expect("decode request");
        assert_eq!(request.topic.as_deref(), Some("topicA"));
    }

    #[test]
    fn query_message_becomes_a_string_payload() {
        let request =
            decode_request(Some("message=hello%20world"), b"").expect("decode request");
        assert_eq!(request.message, Some(json!("hello world")));
    }

    #[test]
    fn bad_message_id_is_rejected() {
        decode_request(Some("message_id=abc"), b"").expect_err("non-numeric message_id");
    }

    #[test]
    fn malformed_body_is_rejected() {
        decode_request(None, b"{not json").expect_err("malformed body");
    }
}
