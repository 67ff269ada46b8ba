// Integration tests for tether-client
//
// A real tether-server on loopback ports, driven through the public pool API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tether_client::{
    ClientConfig, ConnectionPool, ProxyState, RemoteServer, RemoteStub, SelectionPolicy,
};
use tether_common::{Command, Param, TetherError};
use tether_server::demo::demo_registry;
use tether_server::{ServerConfig, ServerHandle, TcpServer};

async fn start_server(ports: usize) -> ServerHandle {
    let config = ServerConfig::with_ports(vec![0; ports]).bind_host("127.0.0.1");
    TcpServer::bind(&config, Arc::new(demo_registry()))
        .await
        .unwrap()
        .spawn()
        .unwrap()
}

async fn start_pool(server: &ServerHandle, pool_size: usize) -> Arc<ConnectionPool> {
    let servers = server
        .local_addrs()
        .iter()
        .map(|a| RemoteServer::new("127.0.0.1", a.port()))
        .collect();
    let pool = Arc::new(ConnectionPool::new(ClientConfig {
        servers,
        pool_size,
        connect_timeout_ms: 1000,
        drain_grace_ms: 100,
        reconnect_delay_ms: 50,
        ..Default::default()
    }));
    assert!(pool.start_up().await.unwrap());
    pool
}

fn echo(text: &str) -> Command {
    Command::new("demo.Echo", "echo").with_param(Param::new(json!(text), "string"))
}

#[tokio::test]
async fn test_pause_resume_by_port() {
    let server = start_server(2).await;
    let pool = start_pool(&server, 4).await;
    let paused_port = server.local_addrs()[0].port();

    assert_eq!(pool.pause("127.0.0.1", Some(paused_port)), 2);

    // selection only ever lands on the other port while paused
    for _ in 0..8 {
        let proxy = pool.select_proxy(SelectionPolicy::RoundRobin).await.unwrap();
        assert_ne!(proxy.port(), paused_port);
    }

    let paused = pool.find_proxies("127.0.0.1", Some(paused_port));
    assert!(paused.iter().all(|p| p.state() == ProxyState::Paused));
    assert!(matches!(
        paused[0].send(echo("nope")),
        Err(TetherError::ProxyUnavailable(_))
    ));

    assert_eq!(pool.resume("", Some(paused_port)), 2);
    let response = paused[0].send(echo("back")).unwrap().get().await.unwrap();
    assert_eq!(response.result.unwrap().return_value, json!("back"));
}

#[tokio::test]
async fn test_stop_and_restart_resets_ids() {
    let server = start_server(1).await;
    let pool = start_pool(&server, 1).await;
    let proxy = pool.find_proxy_by_id(1).unwrap();

    for expected in 1..=3 {
        let future = proxy.send(echo("count")).unwrap();
        assert_eq!(future.id(), expected);
        future.get().await.unwrap();
    }

    assert_eq!(pool.stop("", None), 1);
    assert_eq!(proxy.state(), ProxyState::Stopped);

    let err = pool
        .select_proxy_timeout(SelectionPolicy::Workload, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::PoolTimeout(100)));

    assert_eq!(pool.restart("", None).await, 1);
    assert_eq!(proxy.state(), ProxyState::Active);
    let future = proxy.send(echo("fresh")).unwrap();
    assert_eq!(future.id(), 1);
    future.get().await.unwrap();
}

#[tokio::test]
async fn test_stub_round_trip_with_workload_policy() {
    let server = start_server(2).await;
    let pool = start_pool(&server, 4).await;
    let stub = RemoteStub::new(pool.clone())
        .with_policy(SelectionPolicy::Workload)
        .with_timeout(Duration::from_secs(2));

    let calls = (0..32).map(|i| {
        let stub = stub.clone();
        tokio::spawn(async move {
            let text = format!("call-{i}");
            let echoed: String = stub.call_as(echo(&text)).await.unwrap();
            assert_eq!(echoed, text);
        })
    });
    for call in calls.collect::<Vec<_>>() {
        call.await.unwrap();
    }

    assert!(pool.list_proxies().iter().all(|p| p.pending_count() == 0));
    assert_eq!(stub.measurer().snapshot().successful_calls, 32);
}

#[tokio::test]
async fn test_shutdown_then_start_again() {
    let server = start_server(1).await;
    let pool = start_pool(&server, 2).await;

    pool.shutdown().await;
    assert!(!pool.is_started());
    assert!(matches!(
        pool.select().await,
        Err(TetherError::NoAvailableConnection)
    ));

    assert!(pool.start_up().await.unwrap());
    assert_eq!(pool.len(), 2);
    let proxy = pool.select().await.unwrap();
    assert_eq!(proxy.state(), ProxyState::Active);
}
