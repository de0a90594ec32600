// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end tests: loopback bus → listener → relay → loopback network.
//!
//! These tests validate:
//! - A published request is delivered into the existing DM
//! - Malformed payloads are dropped without stopping the listener
//! - Requests are handled in publish order
//! - An unreachable recipient produces no send
//! - Shutdown releases the subscription and closing the client disconnects it

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use xmtpbridge::bus::BusError;
use xmtpbridge::bus::loopback::LoopbackBus;
use xmtpbridge::client::{ClientLifecycle, ClientSettings};
use xmtpbridge::config::{BusConfig, ReconnectConfig};
use xmtpbridge::listener::{BusListener, ListenerState};
use xmtpbridge::network::NetworkEnv;
use xmtpbridge::network::loopback::LoopbackNetwork;
use xmtpbridge::relay::{Relay, RelayConfig};
use zeroize::Zeroizing;

const BRIDGE_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const BRIDGE_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";
const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
const CHANNEL: &str = "xmtp-messages";

type Listener = BusListener<LoopbackBus, LoopbackNetwork>;

struct Harness {
    bus: LoopbackBus,
    network: LoopbackNetwork,
    clients: Arc<ClientLifecycle<LoopbackNetwork>>,
    listener: Arc<Listener>,
}

impl Harness {
    fn new() -> Self {
        let bus = LoopbackBus::new();
        let network = LoopbackNetwork::new();
        let settings = ClientSettings {
            private_key: Zeroizing::new(BRIDGE_KEY.to_string()),
            db_encryption_key: Zeroizing::new("c3".repeat(32)),
            env: NetworkEnv::Local,
            db_path: PathBuf::from("/tmp/xmtpbridge-bus-listener.db3"),
        };
        let clients = Arc::new(ClientLifecycle::new(network.clone(), settings));
        let relay = Arc::new(Relay::new(Arc::clone(&clients), &RelayConfig::default()));
        let config = BusConfig {
            reconnect: ReconnectConfig {
                enabled: true,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
            },
            ..BusConfig::default()
        };
        let listener = Arc::new(BusListener::new(bus.clone(), relay, &config));
        Self {
            bus,
            network,
            clients,
            listener,
        }
    }

    /// Spawn the listener and wait until it is subscribed.
    async fn start(&self) -> JoinHandle<Result<(), BusError>> {
        let listener = Arc::clone(&self.listener);
        let handle = tokio::spawn(async move { listener.run().await });
        wait_until(|| self.bus.subscriber_count(CHANNEL) > 0).await;
        handle
    }

    fn publish(&self, payload: &serde_json::Value) {
        assert_eq!(self.bus.publish(CHANNEL, payload.to_string()), 1);
    }

    fn seed_dm(&self, address: &str) -> String {
        let bridge = self.network.register_identity(BRIDGE_ADDRESS);
        let peer = self.network.register_identity(address);
        self.network.create_dm_between(&bridge, &peer)
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn published_request_is_delivered_into_existing_dm() {
    let h = Harness::new();
    let dm = h.seed_dm(ALICE);
    let task = h.start().await;

    h.publish(&json!({"ethereumAddress": ALICE, "message": "hi"}));
    wait_until(|| h.network.stats().sends == 1).await;

    let delivered = h.network.messages_in(&dm);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].text, "hi");
    assert_eq!(h.network.stats().can_message_checks, 0);

    h.listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_payload_does_not_stop_listener() {
    let h = Harness::new();
    h.seed_dm(ALICE);
    let task = h.start().await;

    assert_eq!(h.bus.publish(CHANNEL, "{definitely not json"), 1);
    h.publish(&json!({"message": "missing address"}));
    h.publish(&json!({"ethereumAddress": ALICE, "message": "still alive"}));
    wait_until(|| h.network.stats().sends == 1).await;

    assert_eq!(h.network.messages_to(ALICE)[0].text, "still alive");
    assert_eq!(h.listener.state(), ListenerState::Subscribed);

    h.listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn requests_are_handled_in_publish_order() {
    let h = Harness::new();
    let dm = h.seed_dm(ALICE);
    let task = h.start().await;

    for text in ["one", "two", "three"] {
        h.publish(&json!({"ethereumAddress": ALICE, "message": text}));
    }
    wait_until(|| h.network.stats().sends == 3).await;

    let texts: Vec<String> = h
        .network
        .messages_in(&dm)
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, ["one", "two", "three"]);

    h.listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unreachable_recipient_gets_no_send() {
    let h = Harness::new();
    let task = h.start().await;
    let stranger = "0x5712a6e7000000000000000000000000000000ff";

    h.publish(&json!({"ethereumAddress": stranger, "message": "hi"}));
    wait_until(|| h.network.stats().can_message_checks == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = h.network.stats();
    assert_eq!(stats.sends, 0);
    assert_eq!(stats.dm_create_attempts, 0);

    let result = h
        .listener
        .handle_payload(&json!({"ethereumAddress": stranger, "message": "hi"}).to_string())
        .await
        .unwrap();
    assert!(result.error().unwrap().contains(stranger));

    h.listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn relay_failure_does_not_stop_listener() {
    let h = Harness::new();
    h.network.register_identity(ALICE);
    h.network.set_create_dm_fails(true);
    let task = h.start().await;

    h.publish(&json!({"ethereumAddress": ALICE, "message": "first"}));
    wait_until(|| h.network.stats().dm_create_attempts == 1).await;

    h.network.set_create_dm_fails(false);
    h.publish(&json!({"ethereumAddress": ALICE, "message": "second"}));
    wait_until(|| h.network.stats().sends == 1).await;
    assert_eq!(h.network.messages_to(ALICE)[0].text, "second");

    h.listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_unsubscribes_and_client_close_disconnects() {
    let h = Harness::new();
    h.seed_dm(ALICE);
    let task = h.start().await;
    assert!(h.listener.status().connected);

    h.publish(&json!({"ethereumAddress": ALICE, "message": "hi"}));
    wait_until(|| h.network.stats().sends == 1).await;

    h.listener.stop();
    task.await.unwrap().unwrap();
    h.clients.close().await.unwrap();

    assert_eq!(h.bus.subscriber_count(CHANNEL), 0);
    assert!(!h.listener.status().connected);
    assert_eq!(h.network.stats().closes, 1);
    assert!(!h.clients.is_initialized().await);
}

#[tokio::test]
async fn delivery_resumes_after_bus_reconnect() {
    let h = Harness::new();
    let dm = h.seed_dm(ALICE);
    let task = h.start().await;

    h.bus.disconnect_all();
    wait_until(|| h.bus.subscriber_count(CHANNEL) > 0 && h.bus.connects() >= 2).await;

    h.publish(&json!({"ethereumAddress": ALICE, "message": "after reconnect"}));
    wait_until(|| h.network.stats().sends == 1).await;
    assert_eq!(h.network.messages_in(&dm)[0].text, "after reconnect");

    h.listener.stop();
    task.await.unwrap().unwrap();
}
