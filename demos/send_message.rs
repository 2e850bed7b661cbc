//! Push a JSON message to a tinymsg relay channel.
//!
//! Usage: `cargo run --example send_message -- <host> <channel> [port]`

use serde::Serialize;
use tinymsg::{Connection, ConnectionConfig, origin_for};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Notice<'a> {
    kind: &'a str,
    body: &'a str,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_owned());
    let channel = args.next().unwrap_or_default();
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?;

    let config = ConnectionConfig::new(channel, host, false, port, origin_for(false, "localhost"))?;
    let mut conn = Connection::connect(config).await?;

    conn.send(&Notice {
        kind: "notice",
        body: "Hello from tinymsg!",
    })
    .await?;
    conn.close().await?;

    Ok(())
}
