//! Connects to a host's live room and logs every webcast message for a minute.
//!
//! ```sh
//! RUST_LOG=info cargo run --example watch_room -- <host>
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use webcast_client_sdk::config::{LogLevel, Settings};
use webcast_client_sdk::live::Client;
use webcast_client_sdk::types::CancellationToken;
use webcast_client_sdk::ws::ChannelHandler;

const WATCH_FOR: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: watch_room <host>"))?;

    let handler = ChannelHandler::default();
    let mut responses = Box::pin(handler.stream());

    let client = Client::builder()
        .host(host.as_str())
        .settings(
            Settings::builder()
                .log_levels(BTreeSet::from([
                    LogLevel::Error,
                    LogLevel::Warning,
                    LogLevel::Information,
                ]))
                .build(),
        )
        .handler(Arc::new(handler))
        .build()?;

    let mut exceptions = client.exceptions();
    tokio::spawn(async move {
        while let Ok(error) = exceptions.recv().await {
            warn!(error = %error, "webcast exception");
        }
    });

    let token = CancellationToken::new();
    let Some(room_id) = client.start(&token, true).await? else {
        info!(host, "not connected");
        return Ok(());
    };
    info!(
        host,
        room_id,
        viewers = ?client.viewer_count(),
        gifts = client.available_gifts().len(),
        "connected"
    );

    let deadline = Instant::now() + WATCH_FOR;
    while let Ok(Some(response)) = timeout_at(deadline, responses.next()).await {
        match response {
            Ok(response) => {
                for message in &response.messages {
                    info!(method = %message.method, id = message.msg_id, bytes = message.payload.len());
                }
            }
            Err(e) => warn!(error = %e, "fell behind"),
        }
    }

    client.stop().await;
    info!(state = %client.state(), "done");

    Ok(())
}
