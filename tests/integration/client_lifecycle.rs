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

//! Integration tests for the messaging client lifecycle.
//!
//! These tests validate:
//! - Concurrent first use builds exactly one client
//! - A key with and without the `0x` prefix yields the same identity
//! - A failed construction is retried by the next caller
//! - Closing disconnects the client and later use reconnects

use std::path::PathBuf;
use std::sync::Arc;

use xmtpbridge::client::{ClientLifecycle, ClientSettings, InitError};
use xmtpbridge::crypto::signer::Signer;
use xmtpbridge::network::loopback::LoopbackNetwork;
use xmtpbridge::network::{MessagingClient, NetworkEnv, NetworkError};
use zeroize::Zeroizing;

const KEY_HEX: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

fn settings(private_key: &str) -> ClientSettings {
    ClientSettings {
        private_key: Zeroizing::new(private_key.to_string()),
        db_encryption_key: Zeroizing::new(format!("0x{}", "7e".repeat(32))),
        env: NetworkEnv::Local,
        db_path: PathBuf::from("/tmp/xmtpbridge-client-lifecycle.db3"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_constructs_once() {
    let network = LoopbackNetwork::new();
    let lifecycle = Arc::new(ClientLifecycle::new(network.clone(), settings(KEY_HEX)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lifecycle = Arc::clone(&lifecycle);
        handles.push(tokio::spawn(async move {
            lifecycle.get_or_create().await.unwrap()
        }));
    }
    let mut clients = Vec::new();
    for handle in handles {
        clients.push(handle.await.unwrap());
    }

    assert_eq!(network.stats().connects, 1);
    assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn key_prefix_does_not_change_identity() {
    let bare = Signer::from_private_key(KEY_HEX).unwrap();
    let prefixed = Signer::from_private_key(&format!("0x{KEY_HEX}")).unwrap();
    assert_eq!(bare.address(), ADDRESS);
    assert_eq!(bare.address(), prefixed.address());
    assert_eq!(bare.identity(), prefixed.identity());

    let network = LoopbackNetwork::new();
    let a = ClientLifecycle::new(network.clone(), settings(KEY_HEX))
        .get_or_create()
        .await
        .unwrap();
    let b = ClientLifecycle::new(network.clone(), settings(&format!("0x{KEY_HEX}")))
        .get_or_create()
        .await
        .unwrap();
    assert_eq!(a.inbox_id(), b.inbox_id());
    assert_eq!(network.inbox_for(ADDRESS).as_ref(), Some(a.inbox_id()));
}

#[tokio::test]
async fn failed_connect_is_retried_by_next_caller() {
    let network = LoopbackNetwork::new();
    network.fail_next_connects(2);
    let lifecycle = ClientLifecycle::new(network.clone(), settings(KEY_HEX));

    for _ in 0..2 {
        let err = lifecycle.get_or_create().await.unwrap_err();
        assert!(matches!(err, InitError::Connect(NetworkError::Request(_))));
    }
    assert!(lifecycle.get_or_create().await.is_ok());
    assert_eq!(network.stats().connects, 3);
}

#[tokio::test]
async fn close_then_use_reconnects() {
    let network = LoopbackNetwork::new();
    let lifecycle = ClientLifecycle::new(network.clone(), settings(KEY_HEX));

    let first = lifecycle.get_or_create().await.unwrap();
    lifecycle.close().await.unwrap();
    assert!(matches!(
        first.sync_conversations().await,
        Err(NetworkError::Closed)
    ));

    let second = lifecycle.get_or_create().await.unwrap();
    assert!(second.sync_conversations().await.is_ok());
    let stats = network.stats();
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.closes, 1);
}
