//! End-to-end tests driving a real `Server` over a real TCP socket with the
//! dependency-free `cacheforge-client`, grounded on the connection lifecycle
//! in `cacheforge_server::connection` and the fake-server pattern used in
//! `cacheforge-client`'s own tests, just with a real server on the other end.

use std::sync::Arc;
use std::time::Duration;

use cacheforge_client::{ClientConfig, ClientTtl, KVClient};
use cacheforge_core::{Keyspace, KeyspaceLimits};
use cacheforge_server::Server;

async fn spawn_test_server() -> (Arc<Server>, String, tokio::task::JoinHandle<()>) {
    let keyspace = Keyspace::with_shard_count(4, KeyspaceLimits::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr").to_string();
    drop(listener);

    let server = Server::new(addr.clone(), 64, keyspace);
    let run_server = Arc::clone(&server);
    let run_handle = tokio::spawn(async move {
        let _ = run_server.run().await;
    });

    // Give the accept loop a moment to bind before clients connect.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, addr, run_handle)
}

/// Calls `stop()` and then joins the accept-loop task, proving `stop()`
/// actually terminates `run()` rather than leaving it parked in `accept`.
async fn stop_and_join(server: Arc<Server>, run_handle: tokio::task::JoinHandle<()>) {
    server.stop();
    tokio::time::timeout(Duration::from_secs(2), run_handle)
        .await
        .expect("run() did not terminate promptly after stop()")
        .expect("server task");
}

fn blocking_client(addr: String) -> KVClient {
    let config = ClientConfig {
        addr,
        max_idle: 4,
        max_total: 8,
        read_timeout: Some(Duration::from_secs(2)),
        write_timeout: Some(Duration::from_secs(2)),
        connect_timeout: Some(Duration::from_secs(2)),
    };
    KVClient::with_config(config).expect("client")
}

#[tokio::test]
async fn set_get_delete_roundtrip_over_real_socket() {
    let (server, addr, run_handle) = spawn_test_server().await;

    let result = tokio::task::spawn_blocking(move || {
        let client = blocking_client(addr);
        client.set(b"hello", b"world").expect("set");
        let value = client.get(b"hello").expect("get");
        assert_eq!(value, Some(b"world".to_vec()));

        let removed = client.delete(b"hello").expect("delete");
        assert!(removed);
        assert_eq!(client.get(b"hello").expect("get"), None);
    })
    .await;

    stop_and_join(server, run_handle).await;
    result.expect("blocking client task");
}

#[tokio::test]
async fn ttl_and_expire_roundtrip_over_real_socket() {
    let (server, addr, run_handle) = spawn_test_server().await;

    let result = tokio::task::spawn_blocking(move || {
        let client = blocking_client(addr);
        client.set(b"k", b"v").expect("set");
        assert_eq!(client.ttl(b"k").expect("ttl"), ClientTtl::NoExpiry);

        let applied = client.expire(b"k", Duration::from_secs(60)).expect("expire");
        assert!(applied);
        match client.ttl(b"k").expect("ttl") {
            ClientTtl::ExpiresIn(remaining) => assert!(remaining <= Duration::from_secs(60)),
            other => panic!("expected ExpiresIn, got {other:?}"),
        }

        client.set_with_ttl(b"short", b"v", Duration::from_secs(30)).expect("set_with_ttl");
        assert_ne!(client.ttl(b"short").expect("ttl"), ClientTtl::NoExpiry);
    })
    .await;

    stop_and_join(server, run_handle).await;
    result.expect("blocking client task");
}

#[tokio::test]
async fn keys_lists_matching_keys_over_real_socket() {
    let (server, addr, run_handle) = spawn_test_server().await;

    let result = tokio::task::spawn_blocking(move || {
        let client = blocking_client(addr);
        client.set(b"user:1", b"a").expect("set");
        client.set(b"user:2", b"b").expect("set");
        client.set(b"order:1", b"c").expect("set");

        let mut keys = client.keys(b"user:*").expect("keys");
        keys.sort();
        assert_eq!(keys, vec![b"user:1".to_vec(), b"user:2".to_vec()]);
    })
    .await;

    stop_and_join(server, run_handle).await;
    result.expect("blocking client task");
}

#[tokio::test]
async fn ping_and_info_respond_over_real_socket() {
    let (server, addr, run_handle) = spawn_test_server().await;

    let result = tokio::task::spawn_blocking(move || {
        let client = blocking_client(addr);
        assert_eq!(client.ping(None).expect("ping"), b"PONG");
        assert_eq!(client.ping(Some(b"hi")).expect("ping")[..], b"hi"[..]);
        let info = client.info().expect("info");
        assert!(info.starts_with(b"role:master"));
    })
    .await;

    stop_and_join(server, run_handle).await;
    result.expect("blocking client task");
}

#[tokio::test]
async fn multiple_connections_share_the_same_keyspace() {
    let (server, addr, run_handle) = spawn_test_server().await;

    let addr_a = addr.clone();
    let addr_b = addr.clone();

    let writer = tokio::task::spawn_blocking(move || {
        let client = blocking_client(addr_a);
        client.set(b"shared", b"value").expect("set");
    });
    writer.await.expect("writer task");

    let reader = tokio::task::spawn_blocking(move || {
        let client = blocking_client(addr_b);
        client.get(b"shared").expect("get")
    });
    let value = reader.await.expect("reader task");
    assert_eq!(value, Some(b"value".to_vec()));

    stop_and_join(server, run_handle).await;
}
