//! Gateway integration tests: run real listeners on loopback and drive them
//! over HTTP.
//!
//! Run with: `cargo test -p restgate-gateway --test integration`

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde_json::json;

use restgate_core::config::ListenAddress;
use restgate_core::memory::{MemoryServices, OperationRegistry, base_modules};
use restgate_core::streams::StreamsConfiguration;
use restgate_gateway::{GatewayModule, HttpListener, ModuleState};

fn loopback(context_path: &str) -> ListenAddress {
    loopback_on(0, context_path)
}

fn loopback_on(port: u16, context_path: &str) -> ListenAddress {
    ListenAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port, context_path).unwrap()
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_services() -> MemoryServices {
    let mut ops = OperationRegistry::new();
    ops.register("toaster:make-toast", |input| {
        json!({ "toasts": input["count"].as_u64().unwrap_or(1) })
    });
    MemoryServices::new(ops, base_modules())
}

fn gateway(services: &MemoryServices, context_path: &str) -> GatewayModule {
    GatewayModule::new(
        services.handles.clone(),
        loopback(context_path),
        StreamsConfiguration::default(),
    )
}

async fn start_gateway(
    services: &MemoryServices,
    context_path: &str,
) -> (GatewayModule, SocketAddr) {
    let mut gw = gateway(services, context_path);
    assert!(gw.init().await, "gateway failed to initialize");
    let addr = gw.local_addr().await.expect("listener bound");
    (gw, addr)
}

#[tokio::test]
async fn test_stop_releases_port() {
    let services = test_services();
    let (mut gw, addr) = start_gateway(&services, "/restconf").await;
    assert_eq!(gw.state(), ModuleState::Started);

    assert!(gw.stop().await);
    assert_eq!(gw.state(), ModuleState::Stopped);

    let rebound = tokio::net::TcpListener::bind(addr).await;
    assert!(rebound.is_ok(), "port still held after stop");
}

#[tokio::test]
async fn test_start_server_twice_keeps_single_binding() {
    let services = test_services();
    let (mut gw, addr) = start_gateway(&services, "/restconf").await;

    gw.start_server().await.unwrap();
    assert_eq!(gw.local_addr().await, Some(addr));
    assert!(std::net::TcpListener::bind(addr).is_err());

    let resp = reqwest::get(format!("http://{addr}/restconf"))
        .await
        .expect("root request failed");
    assert!(resp.status().is_success());

    assert!(gw.stop().await);
}

#[tokio::test]
async fn test_stop_twice() {
    let services = test_services();
    let (mut gw, _) = start_gateway(&services, "/restconf").await;
    assert!(gw.stop().await);
    assert!(gw.stop().await);
    assert!(!gw.init().await);
}

#[tokio::test]
async fn test_shared_listener_survives_gateway_stop() {
    let services = test_services();
    let shared = HttpListener::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).into_shared();

    let mut gw = gateway(&services, "/restconf").with_shared_listener(shared.clone());
    assert!(!gw.is_listener_owned());
    assert!(gw.init().await);
    assert_eq!(gw.state(), ModuleState::Initialized);
    // Shared listeners are started by their owner.
    assert!(gw.local_addr().await.is_none());
    gw.start_server().await.unwrap();
    assert!(gw.local_addr().await.is_none());

    shared.lock().await.start().await.unwrap();
    let addr = gw.local_addr().await.expect("shared listener bound");

    let url = format!("http://{addr}/.well-known/host-meta.json");
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["links"]["href"], "/restconf");

    assert!(gw.stop().await);
    assert!(shared.lock().await.is_running());
    let resp = reqwest::get(&url).await.expect("shared listener went away");
    assert!(resp.status().is_success());

    shared.lock().await.stop().await.unwrap();
}

#[tokio::test]
async fn test_schema_failure_binds_nothing() {
    let services = test_services();
    services.schema.set_available(false);
    let port = find_free_port();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut gw = GatewayModule::new(
        services.handles.clone(),
        loopback_on(port, "/restconf"),
        StreamsConfiguration::default(),
    );

    assert!(!gw.init().await);
    assert_eq!(gw.state(), ModuleState::Created);
    assert!(gw.local_addr().await.is_none());
    assert!(
        tokio::net::TcpStream::connect(addr).await.is_err(),
        "port bound after failed init"
    );

    services.schema.set_available(true);
    assert!(gw.init().await);
    assert_eq!(gw.local_addr().await, Some(addr));
    assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
    assert!(gw.stop().await);
}

#[tokio::test]
async fn test_occupied_port_fails_init_and_retry_succeeds() {
    let services = test_services();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();
    let mut gw = GatewayModule::new(
        services.handles.clone(),
        loopback_on(addr.port(), "/restconf"),
        StreamsConfiguration::default(),
    );

    assert!(!gw.init().await);
    assert_eq!(gw.state(), ModuleState::Created);
    assert!(gw.local_addr().await.is_none());

    drop(occupied);
    assert!(gw.init().await);
    assert_eq!(gw.state(), ModuleState::Started);
    assert_eq!(gw.local_addr().await, Some(addr));
    assert!(gw.stop().await);
}

#[tokio::test]
async fn test_discovery_reports_context_path() {
    let services = test_services();
    for path in ["/restconf", "/api/v2"] {
        let (mut gw, addr) = start_gateway(&services, path).await;
        assert_eq!(gw.discovery().context_path(), path);

        let body: serde_json::Value =
            reqwest::get(format!("http://{addr}/.well-known/host-meta.json"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(body["links"]["href"], path);

        let resp = reqwest::get(format!("http://{addr}/.well-known/host-meta"))
            .await
            .unwrap();
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "application/xrd+xml"
        );
        let xml = resp.text().await.unwrap();
        assert!(xml.contains(&format!("href='{path}'")));

        assert!(gw.stop().await);
    }
}

#[tokio::test]
async fn test_data_and_rpc_over_http() {
    let services = test_services();
    let (mut gw, addr) = start_gateway(&services, "/restconf").await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/restconf");

    let resp = client
        .put(format!("{base}/data/network-topology:network-topology"))
        .json(&json!({ "topology": [{ "topology-id": "flow:1" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    let body: serde_json::Value = client
        .get(format!("{base}/data/network-topology:network-topology"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["topology"][0]["topology-id"], "flow:1");

    let body: serde_json::Value = client
        .post(format!("{base}/operations/toaster:make-toast"))
        .json(&json!({ "input": { "count": 3 } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["output"]["toasts"], 3);

    let body: serde_json::Value = client
        .get(format!("{base}/data/ietf-yang-library:modules-state"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["module"].as_array().unwrap().len(), 2);

    assert!(gw.stop().await);
}

#[tokio::test]
async fn test_context_path_clashing_with_discovery() {
    let services = test_services();
    let mut gw = gateway(&services, "/.well-known");
    assert!(!gw.init().await);
    assert!(gw.local_addr().await.is_none());
}

#[tokio::test]
async fn test_invalid_streams_config_binds_nothing() {
    let services = test_services();
    let streams = StreamsConfiguration {
        idle_timeout_ms: 1000,
        heartbeat_interval_ms: 5000,
        ..Default::default()
    };
    let mut gw = GatewayModule::new(services.handles.clone(), loopback("/restconf"), streams);
    assert!(!gw.init().await);
    assert_eq!(gw.state(), ModuleState::Created);
    assert!(gw.local_addr().await.is_none());
}
