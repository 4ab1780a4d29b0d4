//! Shared helpers for integration tests: an in-process server on a random
//! port, token minting and a small JSON WebSocket client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use chatwire_server::config::ChatSettings;

/// Short debounce so typing tests finish quickly.
pub const TEST_TYPING_TIMEOUT: Duration = Duration::from_millis(300);

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    jwt_secret: Vec<u8>,
}

impl TestServer {
    /// Mint an access token for `user_id` with display name `name`.
    pub fn token(&self, user_id: &str, name: &str) -> String {
        chatwire_server::auth::jwt::issue_access_token(&self.jwt_secret, user_id, name, 3600)
            .expect("Failed to issue token")
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Connect a WebSocket for `user_id` and complete the setup handshake.
    pub async fn connect(&self, user_id: &str, name: &str) -> WsClient {
        let mut client = self.connect_unsetup(user_id, name).await;
        client.send("setup", json!({ "userId": user_id })).await;
        client.expect("connected").await;
        client
    }

    /// Connect a WebSocket without sending `setup`.
    pub async fn connect_unsetup(&self, user_id: &str, name: &str) -> WsClient {
        let ws_url = format!("ws://{}/ws?token={}", self.addr, self.token(user_id, name));
        let (stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .expect("Failed to connect to WebSocket");
        WsClient { stream }
    }

    /// Wait until the registry holds exactly `expected` connections.
    pub async fn wait_for_connections(&self, expected: u64) {
        let client = reqwest::Client::new();
        for _ in 0..50 {
            let body: Value = client
                .get(self.url("/health"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if body["connections"].as_u64() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("registry never reached {} connections", expected);
    }
}

/// Helper: start the server on a random port with a fresh data directory.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = chatwire_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = chatwire_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let settings = ChatSettings {
        typing_timeout: TEST_TYPING_TIMEOUT,
        ..ChatSettings::default()
    };
    let state = chatwire_server::state::AppState::new(db, jwt_secret.clone(), settings);

    let app = chatwire_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        jwt_secret,
    }
}

/// REST helper: send `method path` as `token` with an optional JSON body.
pub async fn api(
    server: &TestServer,
    method: reqwest::Method,
    path: &str,
    token: &str,
    body: Option<Value>,
) -> (u16, Value) {
    let mut request = reqwest::Client::new()
        .request(method, server.url(path))
        .header("Authorization", format!("Bearer {}", token));
    if let Some(body) = body {
        request = request.json(&body);
    }
    let resp = request.send().await.unwrap();
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap();
    let value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap()
    };
    (status, value)
}

/// Create the direct conversation between the token's user and `peer`.
pub async fn direct_chat(server: &TestServer, token: &str, peer: &str) -> String {
    let (status, body) = api(
        server,
        reqwest::Method::POST,
        "/api/chats",
        token,
        Some(json!({ "userId": peer })),
    )
    .await;
    assert!(status == 200 || status == 201, "direct chat failed: {} {}", status, body);
    body["id"].as_str().unwrap().to_string()
}

pub struct WsClient {
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .expect("Failed to send frame");
    }

    pub async fn send_raw(&mut self, message: Message) {
        self.stream.send(message).await.expect("Failed to send frame");
    }

    /// Next JSON event, or None if nothing arrives within `wait`.
    pub async fn next_event_within(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.stream.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(text.as_str()).expect("server sent invalid JSON"));
                }
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    }

    /// Read until an event named `name` arrives and return it. Other events are skipped.
    pub async fn expect(&mut self, name: &str) -> Value {
        loop {
            let event = self
                .next_event_within(Duration::from_secs(2))
                .await
                .unwrap_or_else(|| panic!("timed out waiting for '{}'", name));
            if event["event"] == name {
                return event;
            }
        }
    }

    /// Assert no event named `name` arrives within `wait`.
    pub async fn expect_none(&mut self, name: &str, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.next_event_within(remaining).await {
                Some(event) if event["event"] == name => panic!("unexpected '{}' event: {}", name, event),
                Some(_) => continue,
                None => return,
            }
        }
    }

    /// Join a conversation room and wait for the acknowledgement.
    pub async fn join(&mut self, conversation_id: &str) {
        self.send("join room", json!(conversation_id)).await;
        let ack = self.expect("room joined").await;
        assert_eq!(ack["data"], conversation_id);
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }

    pub async fn next_raw(&mut self, wait: Duration) -> Option<Message> {
        match tokio::time::timeout(wait, self.stream.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            _ => None,
        }
    }
}
