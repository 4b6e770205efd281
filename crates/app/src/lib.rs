#![forbid(unsafe_code)]

mod driver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use postbox_api::ApiState;
use postbox_core::{persist_channel, Broker};
use postbox_push::{HttpTransport, WebhookPusher};
use postbox_realtime::fanout::{Distributor, FanoutConfig};
use postbox_storage::SnapshotStore;
use rand_core::{OsRng, RngCore};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub sse_port: u16,
    pub stale_window: Duration,
    pub resurrection_window: Duration,
    pub superuser_username: String,
    pub superuser_password: String,
    pub store_root: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_values(
            std::env::var("PS_PORT").ok(),
            std::env::var("PS_SSE_PORT").ok(),
            std::env::var("PS_DURATION_STALE").ok(),
            std::env::var("PS_DURATION_RESURRECT").ok(),
            std::env::var("PS_SUPERADMIN_USERNAME").ok(),
            std::env::var("PS_SUPERADMIN_PASSWORD").ok(),
            std::env::var("PS_STORE").ok(),
        )
    }

    fn from_values(
        port: Option<String>,
        sse_port: Option<String>,
        stale_window: Option<String>,
        resurrection_window: Option<String>,
        superuser_username: Option<String>,
        superuser_password: Option<String>,
        store_root: Option<String>,
    ) -> anyhow::Result<Self> {
        let port = parse_port(port, 8080)?;
        let sse_port = parse_port(sse_port, 4039)?;
        let stale_window = parse_window(stale_window, Duration::from_secs(3 * 60 * 60))?;
        let resurrection_window = parse_window(resurrection_window, Duration::from_secs(30 * 60))?;

        Ok(Self {
            port,
            sse_port,
            stale_window,
            resurrection_window,
            superuser_username: non_empty(superuser_username)
                .unwrap_or_else(|| "ping".to_owned()),
            superuser_password: non_empty(superuser_password)
                .unwrap_or_else(|| random_password(6)),
            store_root: PathBuf::from(non_empty(store_root).unwrap_or_else(|| "store/".to_owned())),
        })
    }
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(SnapshotStore::open(&config.store_root)?);
    let (persist, receivers) = persist_channel();
    let distributor = Arc::new(Distributor::new(FanoutConfig::default()));
    let broker = Arc::new(Broker::new(persist, distributor.intake()));

    let superuser = broker
        .get_or_create_user(&config.superuser_username, &config.superuser_password)
        .await?;
    tracing::info!(uuid = superuser.uuid(), "superuser ready");

    let workers = postbox_storage::launch(Arc::clone(&store), receivers);
    tracing::debug!(count = workers.len(), "persistence workers launched");
    broker.restore_from(store.as_ref(), &superuser).await?;

    let pusher = Arc::new(WebhookPusher::new(
        Arc::clone(&broker),
        Arc::new(HttpTransport::new()),
    ));
    driver::spawn(
        Arc::clone(&broker),
        pusher,
        config.stale_window,
        config.resurrection_window,
    );

    let api_state = ApiState::new(Arc::clone(&broker), Arc::clone(&distributor));

    let sse_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.sse_port)).await?;
    tracing::info!(port = config.sse_port, "live stream listening");
    let sse_router = postbox_api::sse_router(api_state.clone());
    tokio::spawn(async move {
        if let Err(error) = axum::serve(sse_listener, sse_router).await {
            tracing::error!(%error, "live stream server exited");
        }
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "server listening");
    axum::serve(listener, postbox_api::router(api_state)).await?;
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn parse_port(value: Option<String>, default: u16) -> anyhow::Result<u16> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid port {raw:?}")),
    }
}

fn parse_window(value: Option<String>, default: Duration) -> anyhow::Result<Duration> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => parse_duration(&raw),
    }
}

/// Parses `3h`, `30m`, `90s`, `500ms` and combinations like `1h30m`.
fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(anyhow::anyhow!("duration cannot be empty"));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '0'..='9' => digits.push(c),
            'h' | 'm' | 's' => {
                let amount: u64 = digits
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid duration {input:?}"))?;
                digits.clear();
                let unit = if c == 'm' && chars.peek() == Some(&'s') {
                    chars.next();
                    Duration::from_millis(1)
                } else {
                    match c {
                        'h' => Duration::from_secs(60 * 60),
                        'm' => Duration::from_secs(60),
                        _ => Duration::from_secs(1),
                    }
                };
                total += unit * u32::try_from(amount).map_err(|_| {
                    anyhow::anyhow!("duration component too large in {input:?}")
                })?;
            }
            _ => return Err(anyhow::anyhow!("invalid duration {input:?}")),
        }
    }
    if !digits.is_empty() {
        return Err(anyhow::anyhow!("missing unit in duration {input:?}"));
    }
    Ok(total)
}

const PASSWORD_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn random_password(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .into_iter()
        .map(|byte| PASSWORD_LETTERS[byte as usize % PASSWORD_LETTERS.len()] as char)
        .collect()
}
