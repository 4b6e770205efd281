#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("username and password must be given as request parameters")]
    AuthMissing,
    #[error("user already exists - please enter correct credentials to login or select a new username to create a new user")]
    AuthMismatch,
    #[error("push URL not valid: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("topic does not exist")]
    TopicNotFound,
    #[error("topic already exists")]
    TopicAlreadyExists,
    #[error("user does not have the authorisation to write to this topic")]
    Forbidden,
    #[error("user not subscribed to topic")]
    NotSubscribed,
    #[error("not allowed to pull from a push subscription")]
    PullOnPush,
    #[error("message {id} does not exist, pointer head is {head}")]
    MessageNotFound { id: i64, head: i64 },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PubSubError {
    /// True for failures caused by the request itself rather than broker
    /// state; the HTTP layer maps these to 400.
    #[must_use]
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            PubSubError::AuthMissing | PubSubError::AuthMismatch | PubSubError::BadUrl(_)
        )
    }
}
