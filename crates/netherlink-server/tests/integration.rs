//! End-to-end tests: a relay bound to an ephemeral port, driven by real
//! WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use netherlink_auth::JwtAuth;
use netherlink_core::ids::UserId;
use netherlink_core::models::GroupRole;
use netherlink_server::{RelayServer, ServerConfig, ServerHandle};
use netherlink_store::{SocialStore, SqliteStore};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestRelay {
    handle: ServerHandle,
    store: Arc<SqliteStore>,
    auth: JwtAuth,
}

impl TestRelay {
    async fn start() -> Self {
        Self::with_config(ServerConfig::default()).await
    }

    async fn with_config(config: ServerConfig) -> Self {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let auth = JwtAuth::new("integration-secret", "netherlink", Duration::from_secs(3600));
        let handle = RelayServer::new(config, store.clone(), Arc::new(auth.clone()))
            .start()
            .await
            .unwrap();
        Self { handle, store, auth }
    }

    fn user(&self, uid: &str, name: &str) -> UserId {
        let uid = UserId::from_raw(uid);
        self.store.create_user(&uid, name, "").unwrap();
        uid
    }

    async fn connect(&self) -> Ws {
        let url = format!("ws://127.0.0.1:{}/ws", self.handle.port);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    /// Connect and log in as `uid`.
    async fn online(&self, uid: &str) -> Ws {
        let mut ws = self.connect().await;
        let token = self.auth.issue(&UserId::from_raw(uid)).unwrap();
        send(&mut ws, json!({"type": "login", "payload": {"uid": uid, "token": token}})).await;
        let reply = recv(&mut ws).await;
        assert_eq!(reply["type"], "login_success", "unexpected reply: {reply}");
        ws
    }

    async fn health(&self) -> Value {
        let url = format!("http://127.0.0.1:{}/health", self.handle.port);
        reqwest::get(url).await.unwrap().json().await.unwrap()
    }
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Wait for the server to close the socket.
async fn expect_closed(ws: &mut Ws) {
    loop {
        let next = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close");
        match next {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
        }
    }
}

/// No frame arrives within a short window.
async fn expect_silence(ws: &mut Ws) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

#[tokio::test]
async fn chat_between_online_users() {
    let relay = TestRelay::start().await;
    let mut alice = relay.online("alice").await;
    let mut bob = relay.online("bob").await;

    send(
        &mut alice,
        json!({"type": "chat", "payload": {"to": "bob", "content": "hello", "type": "text", "extra": ""}}),
    )
    .await;

    let ack = recv(&mut alice).await;
    assert_eq!(ack["type"], "chat_response");
    assert_eq!(ack["payload"]["conversation"], "alice_bob");

    let msg = recv(&mut bob).await;
    assert_eq!(msg["type"], "chat");
    assert_eq!(msg["payload"]["from"], "alice");
    assert_eq!(msg["payload"]["content"], "hello");
    assert_eq!(msg["payload"]["message_id"], ack["payload"]["message_id"]);
}

#[tokio::test]
async fn offline_chat_is_never_delivered() {
    let relay = TestRelay::start().await;
    let mut alice = relay.online("alice").await;

    send(
        &mut alice,
        json!({"type": "chat", "payload": {"to": "bob", "content": "are you there", "type": "text"}}),
    )
    .await;
    assert_eq!(recv(&mut alice).await["type"], "chat_response");

    let mut bob = relay.online("bob").await;
    expect_silence(&mut bob).await;
}

#[tokio::test]
async fn second_login_evicts_first() {
    let relay = TestRelay::start().await;
    let mut first = relay.online("alice").await;
    let mut second = relay.online("alice").await;

    let notice = recv(&mut first).await;
    assert_eq!(notice["type"], "error");
    assert_eq!(notice["payload"]["message"], "account signed in on another device");
    expect_closed(&mut first).await;

    // The new session is the live one.
    let mut bob = relay.online("bob").await;
    send(
        &mut bob,
        json!({"type": "chat", "payload": {"to": "alice", "content": "hi", "type": "text"}}),
    )
    .await;
    let _ = recv(&mut bob).await;
    assert_eq!(recv(&mut second).await["payload"]["content"], "hi");
}

#[tokio::test]
async fn invalid_token_closes_connection() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;
    send(
        &mut ws,
        json!({"type": "login", "payload": {"uid": "alice", "token": "not-a-jwt"}}),
    )
    .await;

    let err = recv(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["message"], "authentication failed");
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn token_for_another_user_is_rejected() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;
    let token = relay.auth.issue(&UserId::from_raw("mallory")).unwrap();
    send(
        &mut ws,
        json!({"type": "login", "payload": {"uid": "alice", "token": token}}),
    )
    .await;

    assert_eq!(recv(&mut ws).await["payload"]["message"], "authentication failed");
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn silent_connection_times_out() {
    let relay = TestRelay::with_config(ServerConfig {
        auth_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    })
    .await;
    let mut ws = relay.connect().await;

    let notice = recv(&mut ws).await;
    assert_eq!(notice["type"], "error");
    assert_eq!(notice["payload"]["message"], "login timeout");
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn login_before_deadline_survives_it() {
    let relay = TestRelay::with_config(ServerConfig {
        auth_timeout: Duration::from_millis(300),
        ..ServerConfig::default()
    })
    .await;
    let mut alice = relay.online("alice").await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    send(
        &mut alice,
        json!({"type": "chat", "payload": {"to": "bob", "content": "still here", "type": "text"}}),
    )
    .await;
    assert_eq!(recv(&mut alice).await["type"], "chat_response");
}

#[tokio::test]
async fn requests_before_login_are_refused_without_closing() {
    let relay = TestRelay::start().await;
    let mut ws = relay.connect().await;
    send(
        &mut ws,
        json!({"type": "chat", "payload": {"to": "bob", "content": "x", "type": "text"}}),
    )
    .await;
    assert_eq!(recv(&mut ws).await["payload"]["message"], "authentication required");

    let token = relay.auth.issue(&UserId::from_raw("alice")).unwrap();
    send(
        &mut ws,
        json!({"type": "login", "payload": {"uid": "alice", "token": token}}),
    )
    .await;
    assert_eq!(recv(&mut ws).await["type"], "login_success");
}

#[tokio::test]
async fn malformed_frame_reports_error() {
    let relay = TestRelay::start().await;
    let mut alice = relay.online("alice").await;
    alice.send(Message::Text("{oops".into())).await.unwrap();
    assert_eq!(recv(&mut alice).await["payload"]["message"], "invalid message format");
}

#[tokio::test]
async fn friend_request_scenario() {
    let relay = TestRelay::start().await;
    let alice_id = relay.user("alice", "Alice");
    let bob_id = relay.user("bob", "Bob");
    let mut alice = relay.online("alice").await;
    let mut bob = relay.online("bob").await;

    send(
        &mut alice,
        json!({"type": "friend_request", "payload": {"to_uid": "bob", "message": "let's be friends"}}),
    )
    .await;
    let ack = recv(&mut alice).await;
    assert_eq!(ack["type"], "friend_request_response");
    assert_eq!(ack["payload"]["success"], true);

    let received = recv(&mut bob).await;
    assert_eq!(received["type"], "friend_request_received");
    assert_eq!(received["payload"]["from_name"], "Alice");
    let request_id = received["payload"]["request_id"].clone();

    send(
        &mut bob,
        json!({"type": "friend_request_handle", "payload": {"request_id": request_id, "action": "accept"}}),
    )
    .await;
    assert_eq!(recv(&mut bob).await["type"], "friend_request_handle_response");

    let result = recv(&mut alice).await;
    assert_eq!(result["type"], "friend_request_result");
    assert_eq!(result["payload"]["action"], "accept");
    assert_eq!(result["payload"]["from_uid"], "bob");

    assert!(relay.store.are_friends(&alice_id, &bob_id).unwrap());

    // Handling it again conflicts.
    send(
        &mut bob,
        json!({"type": "friend_request_handle", "payload": {"request_id": request_id, "action": "reject"}}),
    )
    .await;
    let err = recv(&mut bob).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["message"], "friend request already accepted");
}

#[tokio::test]
async fn group_join_requires_moderator() {
    let relay = TestRelay::start().await;
    let owner = relay.user("olga", "Olga");
    let member = relay.user("mia", "Mia");
    let joiner = relay.user("jo", "Jo");
    let group = relay.store.create_group("crabs", &owner, "").unwrap().id;
    relay.store.add_member(group, &member, GroupRole::Member).unwrap();

    let mut olga = relay.online("olga").await;
    let mut mia = relay.online("mia").await;
    let mut jo = relay.online("jo").await;

    send(
        &mut jo,
        json!({"type": "group_join_request", "payload": {"group_id": group, "message": "hi"}}),
    )
    .await;
    assert_eq!(recv(&mut jo).await["type"], "group_join_request_response");
    let received = recv(&mut olga).await;
    assert_eq!(received["type"], "group_join_request_received");
    assert_eq!(received["payload"]["group_name"], "crabs");
    let request_id = received["payload"]["request_id"].clone();

    send(
        &mut mia,
        json!({"type": "group_join_request_handle", "payload": {"request_id": request_id, "action": "accept"}}),
    )
    .await;
    assert_eq!(recv(&mut mia).await["type"], "error");
    assert_eq!(relay.store.get_membership(group, &joiner).unwrap(), None);

    send(
        &mut olga,
        json!({"type": "group_join_request_handle", "payload": {"request_id": request_id, "action": "accept"}}),
    )
    .await;
    assert_eq!(recv(&mut olga).await["type"], "group_join_request_handle_response");
    let result = recv(&mut jo).await;
    assert_eq!(result["type"], "group_join_request_result");
    assert_eq!(result["payload"]["handler_role"], "owner");
    assert_eq!(
        relay.store.get_membership(group, &joiner).unwrap(),
        Some(GroupRole::Member)
    );
}

#[tokio::test]
async fn health_reports_online_users() {
    let relay = TestRelay::start().await;
    let _alice = relay.online("alice").await;
    let _pending = relay.connect().await;

    // The pending connection may still be registering.
    let mut body = relay.health().await;
    for _ in 0..20 {
        if body["connections"] == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        body = relay.health().await;
    }
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["online_users"], 1);
}

#[tokio::test]
async fn disconnect_releases_user() {
    let relay = TestRelay::start().await;
    let mut alice = relay.online("alice").await;
    alice.close(None).await.unwrap();

    let alice_id = UserId::from_raw("alice");
    for _ in 0..40 {
        if !relay.handle.registry().is_online(&alice_id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!relay.handle.registry().is_online(&alice_id));
}

#[tokio::test]
async fn shutdown_notifies_and_closes_sessions() {
    let relay = TestRelay::start().await;
    let mut alice = relay.online("alice").await;

    let TestRelay { handle, .. } = relay;
    let stopping = tokio::spawn(handle.shutdown());

    let notice = recv(&mut alice).await;
    assert_eq!(notice["payload"]["message"], "server shutting down");
    expect_closed(&mut alice).await;
    stopping.await.unwrap();
}
