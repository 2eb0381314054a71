//! Subscribe, send and receive against the in-memory transport.
//!
//! Usage:
//!   cargo run --example 001_send_receive
//!   RUST_LOG=mqlight=debug cargo run --example 001_send_receive

use std::time::Duration;

use mqlight::{
    Client, ClientEvent, EventKind, MockTransport, Qos, SendOptions, SubscribeOptions,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (transport, mock) = MockTransport::new();
    let client = Client::builder()
        .service("amqp://localhost")
        .transport(transport)
        .connect()
        .await?;
    println!("Connected as {} to {:?}", client.id(), client.service());

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on(EventKind::Message, move |event| {
        if let ClientEvent::Message(delivery) = event {
            let _ = tx.send(delivery.clone());
        }
    });

    let options = SubscribeOptions::default()
        .with_qos(Qos::AtLeastOnce)
        .with_auto_confirm(false);
    client.subscribe("news/#", options, None)?;

    client.send(
        "news/today",
        "hello",
        SendOptions::default().with_qos(Qos::AtLeastOnce),
        Some(Box::new(|result, sent| {
            println!("Sent to {}: {result:?}", sent.topic);
        })),
    )?;

    // The mock does not route sends back; inject the message a broker would deliver.
    mock.deliver("amqp://localhost:5672/news/today", "private:news/#", &"hello".into());

    let delivery = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("listener dropped"))?;
    println!("Received on {}: {:?}", delivery.message.topic, delivery.message.body);
    delivery.confirm()?;

    client.disconnect_async().await?;
    println!("Stopped");
    Ok(())
}
