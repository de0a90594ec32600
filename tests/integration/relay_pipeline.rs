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

//! Integration tests for the relay pipeline against the loopback network.
//!
//! These tests validate:
//! - An existing DM is reused without a capability check or creation
//! - An address that cannot receive messages is never sent to
//! - Creation failures are reported and do not reach the send step
//! - Every failure surfaces as `RelayResult::Failed`, never as a panic or error

use std::path::PathBuf;
use std::sync::Arc;

use xmtpbridge::client::{ClientLifecycle, ClientSettings};
use xmtpbridge::network::loopback::LoopbackNetwork;
use xmtpbridge::network::{InboxId, NetworkEnv};
use xmtpbridge::relay::{Relay, RelayConfig};
use xmtpbridge_proto::request::RelayRequest;
use xmtpbridge_proto::result::RelayResult;
use zeroize::Zeroizing;

const BRIDGE_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const BRIDGE_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";
const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
const BOB: &str = "0xb0b0000000000000000000000000000000000002";

fn settings(private_key: &str) -> ClientSettings {
    ClientSettings {
        private_key: Zeroizing::new(private_key.to_string()),
        db_encryption_key: Zeroizing::new("5a".repeat(32)),
        env: NetworkEnv::Local,
        db_path: PathBuf::from("/tmp/xmtpbridge-relay-pipeline.db3"),
    }
}

fn relay_on(network: &LoopbackNetwork) -> Relay<LoopbackNetwork> {
    Relay::new(
        Arc::new(ClientLifecycle::new(network.clone(), settings(BRIDGE_KEY))),
        &RelayConfig::default(),
    )
}

/// Seed a DM between the bridge and `address`, returning its id.
fn seed_dm(network: &LoopbackNetwork, address: &str) -> (InboxId, String) {
    let bridge = network.register_identity(BRIDGE_ADDRESS);
    let peer = network.register_identity(address);
    let dm = network.create_dm_between(&bridge, &peer);
    (peer, dm)
}

#[tokio::test]
async fn existing_dm_is_used_without_capability_check() {
    let network = LoopbackNetwork::new();
    let (_, dm) = seed_dm(&network, ALICE);
    let relay = relay_on(&network);

    let result = relay.relay(&RelayRequest::new(ALICE, "hi")).await;

    let message_id = result.message_id().expect("relay should succeed");
    let stats = network.stats();
    assert_eq!(stats.can_message_checks, 0);
    assert_eq!(stats.dm_create_attempts, 0);
    assert_eq!(network.conversation_count(), 1);

    let delivered = network.messages_in(&dm);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].text, "hi");
    assert_eq!(delivered[0].id, message_id);
}

#[tokio::test]
async fn recipient_address_case_does_not_matter() {
    let network = LoopbackNetwork::new();
    let (_, dm) = seed_dm(&network, ALICE);
    let relay = relay_on(&network);

    let shouting = format!("0x{}", ALICE[2..].to_uppercase());
    let result = relay
        .relay(&RelayRequest::new(format!("  {shouting} "), "hi"))
        .await;

    assert!(result.is_success(), "unexpected failure: {:?}", result.error());
    assert_eq!(network.stats().dm_create_attempts, 0);
    assert_eq!(network.messages_in(&dm).len(), 1);
}

#[tokio::test]
async fn unreachable_recipient_is_never_sent_to() {
    let network = LoopbackNetwork::new();
    let relay = relay_on(&network);

    let result = relay.relay(&RelayRequest::new(BOB, "hi")).await;

    let error = result.error().expect("relay should fail");
    assert!(error.contains(BOB), "error should name the address: {error}");
    assert!(error.contains("cannot receive messages"));
    let stats = network.stats();
    assert_eq!(stats.can_message_checks, 1);
    assert_eq!(stats.dm_create_attempts, 0);
    assert_eq!(stats.sends, 0);
}

#[tokio::test]
async fn reachable_recipient_gets_new_dm() {
    let network = LoopbackNetwork::new();
    let alice = network.register_identity(ALICE);
    let relay = relay_on(&network);

    let result = relay.relay(&RelayRequest::new(ALICE, "hello there")).await;

    assert!(result.is_success());
    let stats = network.stats();
    assert_eq!(stats.can_message_checks, 1);
    assert_eq!(stats.dm_create_attempts, 1);
    assert_eq!(network.conversation_count(), 1);

    let delivered = network.messages_to(ALICE);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].text, "hello there");
    assert_eq!(relay.inbox_cache().unwrap().get(ALICE), Some(alice));
}

#[tokio::test]
async fn creation_failure_is_reported_and_not_sent() {
    let network = LoopbackNetwork::new();
    network.register_identity(ALICE);
    network.set_create_dm_fails(true);
    let relay = relay_on(&network);

    let result = relay.relay(&RelayRequest::new(ALICE, "hi")).await;

    let error = result.error().expect("relay should fail");
    assert!(error.contains("failed to create conversation"), "{error}");
    assert!(error.contains("dm creation rejected"), "{error}");
    assert_eq!(network.stats().sends, 0);

    network.set_create_dm_fails(false);
    assert!(relay.relay(&RelayRequest::new(ALICE, "hi")).await.is_success());
    assert_eq!(network.stats().sends, 1);
}

#[tokio::test]
async fn init_failure_becomes_failed_result() {
    let network = LoopbackNetwork::new();
    let relay = Relay::new(
        Arc::new(ClientLifecycle::new(network.clone(), settings("not-hex"))),
        &RelayConfig::default(),
    );

    let result = relay.relay(&RelayRequest::new(ALICE, "hi")).await;

    match result {
        RelayResult::Failed { error } => assert!(!error.is_empty()),
        RelayResult::Sent { .. } => panic!("relay with a bad key must fail"),
    }
    assert_eq!(network.stats().connects, 0);
}

#[tokio::test]
async fn dm_created_after_warm_up_is_found_by_sync() {
    let network = LoopbackNetwork::new();
    let relay = relay_on(&network);
    let client = relay.clients().get_or_create().await.unwrap();

    // Created network-side after the client last synced.
    let (_, dm) = seed_dm(&network, ALICE);
    assert!(!client.is_closed());

    let result = relay.relay(&RelayRequest::new(ALICE, "late")).await;

    assert!(result.is_success());
    assert_eq!(network.stats().dm_create_attempts, 0);
    assert_eq!(network.messages_in(&dm).len(), 1);
}

#[tokio::test]
async fn stale_cache_entry_falls_back_to_scan() {
    let network = LoopbackNetwork::new();
    let alice = network.register_identity(ALICE);
    let relay = relay_on(&network);

    // Point the cache at an inbox the bridge has no DM with.
    let bogus = network.register_identity(BOB);
    relay.inbox_cache().unwrap().insert(ALICE, bogus);
    let (_, dm) = seed_dm(&network, ALICE);

    let result = relay.relay(&RelayRequest::new(ALICE, "hi")).await;

    assert!(result.is_success());
    assert_eq!(network.stats().dm_create_attempts, 0);
    assert_eq!(network.messages_in(&dm).len(), 1);
    assert_eq!(relay.inbox_cache().unwrap().get(ALICE), Some(alice));
}

#[tokio::test]
async fn bridge_address_never_reaches_another_inbox() {
    let network = LoopbackNetwork::new();
    let (alice, dm) = seed_dm(&network, ALICE);
    let relay = relay_on(&network);

    assert!(relay.relay(&RelayRequest::new(ALICE, "for alice")).await.is_success());
    let result = relay
        .relay(&RelayRequest::new(BRIDGE_ADDRESS, "for the bridge itself"))
        .await;

    let error = result.error().expect("relay to the bridge itself should fail");
    assert!(error.contains(BRIDGE_ADDRESS), "{error}");
    let texts: Vec<String> = network
        .messages_in(&dm)
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, ["for alice"]);
    assert_eq!(network.stats().dm_create_attempts, 0);

    let cache = relay.inbox_cache().unwrap();
    assert_eq!(cache.get(BRIDGE_ADDRESS), None);
    assert_eq!(cache.get(ALICE), Some(alice));
}
