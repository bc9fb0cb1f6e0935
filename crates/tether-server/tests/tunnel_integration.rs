//! Tunnel server integration tests
//!
//! Drives the registration endpoint over real sockets with a WebSocket
//! client playing the agent.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use tether_core::config::{ServerConfig, TokenEntry};
use tether_core::{Cluster, ClusterKind, Dialer, MemoryInventory, Node, SessionKey};
use tether_protocol::{Frame, FrameCodec, Message};
use tether_server::auth::{NODE_HEADER, TOKEN_HEADER, VERSION_HEADER};
use tether_server::{DialerFactory, SessionRegistry, TokenAuthorizer, TunnelServer};

type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TOKEN: &str = "integration-token";

struct TestServer {
    address: String,
    factory: Arc<DialerFactory>,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

fn build_factory() -> (DialerFactory, Arc<SessionRegistry>) {
    let inventory = Arc::new(MemoryInventory::new());
    inventory.upsert_cluster(
        Cluster::new("c-imported", ClusterKind::Imported, "https://1.2.3.4:6443").with_ready(true),
    );
    inventory.upsert_node(Node::new("c-imported", "m-1"));

    let mut config = ServerConfig::default();
    config.tokens = vec![TokenEntry::from_plain("c-imported", TOKEN)];

    let registry = Arc::new(SessionRegistry::new());
    let authorizer = Arc::new(TokenAuthorizer::new(inventory.clone(), config.tokens.clone()));
    let factory = DialerFactory::from_config(&config, inventory, registry.clone(), authorizer);
    (factory, registry)
}

async fn start_server() -> TestServer {
    let (factory, registry) = build_factory();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();
    let server = TunnelServer::new(&factory, cancel.clone());
    let handle = tokio::spawn(server.serve(listener));

    TestServer {
        address,
        factory: Arc::new(factory),
        registry,
        cancel,
        handle,
    }
}

async fn connect_agent(address: &str, node: Option<&str>) -> AgentSocket {
    let mut request = format!("ws://{}/v3/connect", address)
        .into_client_request()
        .unwrap();
    let headers = request.headers_mut();
    headers.insert(TOKEN_HEADER, TOKEN.parse().unwrap());
    headers.insert(VERSION_HEADER, "1.0".parse().unwrap());
    if let Some(node) = node {
        headers.insert(NODE_HEADER, node.parse().unwrap());
    }
    let (socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    socket
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn send_frame(socket: &mut AgentSocket, frame: Frame) {
    let bytes = frame.to_bytes().unwrap();
    socket.send(WsMessage::Binary(bytes.to_vec())).await.unwrap();
}

/// Next non-heartbeat frame sent by the server
async fn next_frame(socket: &mut AgentSocket) -> Frame {
    let mut codec = FrameCodec::new();
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame from server")
            .expect("transport closed")
            .unwrap();
        if let WsMessage::Binary(data) = message {
            for frame in codec.decode_all(&data).unwrap() {
                if !matches!(frame.message, Message::Heartbeat { .. }) {
                    return frame;
                }
            }
        }
    }
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let (factory, _registry) = build_factory();
    let response = factory
        .tunnel_router()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessions"], 0);
}

#[tokio::test]
async fn test_unauthorized_registration() {
    let (factory, _registry) = build_factory();
    let response = factory
        .tunnel_router()
        .oneshot(
            Request::get("/v3/connect")
                .header(TOKEN_HEADER, "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_registration_without_upgrade() {
    let (factory, _registry) = build_factory();
    let response = factory
        .tunnel_router()
        .oneshot(
            Request::get("/v3/connect")
                .header(TOKEN_HEADER, TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_registration_while_shutting_down() {
    let (factory, registry) = build_factory();
    registry.shutdown_all();
    let response = factory
        .tunnel_router()
        .oneshot(
            Request::get("/v3/connect")
                .header(TOKEN_HEADER, TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_agent_rejected_over_websocket() {
    let server = start_server().await;
    let mut request = format!("ws://{}/v3/connect", server.address)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(TOKEN_HEADER, "wrong".parse().unwrap());

    match tokio_tungstenite::connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected HTTP 401, got {:?}", other.map(|(_, r)| r.status())),
    }
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_cluster_dial_through_agent() {
    let server = start_server().await;
    let mut agent = connect_agent(&server.address, None).await;
    let key = SessionKey::new("c-imported");
    wait_for(|| server.registry.has_session(&key)).await;

    let dialer = server.factory.cluster_dialer("c-imported");
    let dialing = tokio::spawn(async move {
        dialer
            .dial("tcp", "10.43.0.1:443", &CancellationToken::new())
            .await
    });

    let connect = next_frame(&mut agent).await;
    assert_eq!(
        connect.message,
        Message::Connect {
            network: "tcp".to_string(),
            address: "10.43.0.1:443".to_string(),
        }
    );
    send_frame(&mut agent, Frame::new(connect.stream_id, Message::Connected)).await;
    let mut conn = dialing.await.unwrap().unwrap();

    conn.write_all(b"hello agent").await.unwrap();
    let data = next_frame(&mut agent).await;
    assert_eq!(data.stream_id, connect.stream_id);
    match data.message {
        Message::Data(bytes) => assert_eq!(&bytes[..], b"hello agent"),
        other => panic!("unexpected message {:?}", other),
    }

    send_frame(
        &mut agent,
        Frame::new(
            connect.stream_id,
            Message::Data(bytes::Bytes::from_static(b"hello server")),
        ),
    )
    .await;
    let mut buf = [0u8; 12];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello server");

    // Agent goes away: the session is dropped and the stream sees EOF
    agent.close(None).await.unwrap();
    wait_for(|| !server.registry.has_session(&key)).await;
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_node_agent_registration() {
    let server = start_server().await;
    let _agent = connect_agent(&server.address, Some("m-1")).await;

    let key = SessionKey::new("c-imported:m-1");
    wait_for(|| server.registry.has_session(&key)).await;
    assert!(!server.registry.has_session(&SessionKey::new("c-imported")));
}

#[tokio::test]
async fn test_reconnect_evicts_previous_transport() {
    let server = start_server().await;
    let mut first = connect_agent(&server.address, None).await;
    let key = SessionKey::new("c-imported");
    wait_for(|| server.registry.has_session(&key)).await;

    let _second = connect_agent(&server.address, None).await;
    wait_for(|| server.registry.stats().evictions == 1).await;

    // The evicted transport is closed by the server
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert!(server.registry.has_session(&key));
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = start_server().await;
    let _agent = connect_agent(&server.address, None).await;
    let key = SessionKey::new("c-imported");
    wait_for(|| server.registry.has_session(&key)).await;

    server.cancel.cancel();
    timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(server.registry.is_empty());
    assert!(server.registry.is_shutting_down());
}
