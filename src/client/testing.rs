//! Shared fixtures for client tests.

use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::error::Error;
use crate::transport::{MockController, MockTransport};

use super::{Client, ClientBuilder};

/// Builder for `amqp://host` with fast loops.
pub(crate) fn builder(transport: MockTransport) -> ClientBuilder {
    Client::builder()
        .service("amqp://host")
        .transport(transport)
        .retry_interval(Duration::from_millis(5))
        .poll_interval(Duration::from_millis(1))
}

/// A client connected to a fresh mock transport.
pub(crate) async fn started_client() -> (Client, MockController) {
    let (transport, mock) = MockTransport::new();
    let client = builder(transport).connect().await.expect("client failed to start");
    (client, mock)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Simulates a transport failure on the live connection.
pub(crate) fn force_reconnect(client: &Client, err: Error) {
    let mut core = client.inner.core.lock();
    client.inner.reconnect(&mut core, err);
}
