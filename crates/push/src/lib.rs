#![forbid(unsafe_code)]

mod pusher;
mod transport;

pub use pusher::{PushStats, WebhookPusher};
pub use transport::{HttpTransport, TransportError, WebhookTransport};
