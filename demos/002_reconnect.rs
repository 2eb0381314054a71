//! Queueing while the service is unreachable, then replay on connect.
//!
//! Usage:
//!   cargo run --example 002_reconnect

use std::time::Duration;

use mqlight::{Client, ClientEvent, ClientState, Error, EventKind, MockTransport, SendOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (transport, mock) = MockTransport::new();
    mock.fail_connect(Some(Error::network("connect ECONNREFUSED")));

    let client = Client::builder()
        .service(vec!["amqp://primary", "amqp://backup"])
        .transport(transport)
        .retry_interval(Duration::from_millis(200))
        .start()?;

    client.on(EventKind::Error, |event| {
        if let ClientEvent::Error(err) = event {
            println!("error: {err}");
        }
    });
    client.on(EventKind::Started, |_| println!("started"));

    while client.state() != ClientState::Retrying {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let sent = client.send("alerts", "queued while retrying", SendOptions::default(), None)?;
    println!("send returned {sent} in state {}", client.state());

    mock.fail_connect(None);
    client.connect_async().await?;
    while mock.sent().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("replayed to {}", mock.sent()[0].message.address);

    client.disconnect_async().await?;
    Ok(())
}
