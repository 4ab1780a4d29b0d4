//! Integration tests for WebSocket auth, rooms, message delivery and typing.

mod common;

use std::time::Duration;

use common::{api, direct_chat, start_test_server, TEST_TYPING_TIMEOUT};
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_ws_invalid_token_closed_with_4002() {
    let server = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token=invalid_jwt_token", server.addr);
    let (mut stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade even with invalid token");

    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("Expected close message within timeout");
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(4002));
        }
        other => panic!("Expected close frame, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let server = start_test_server().await;
    let mut client = server.connect("alice", "Alice").await;

    client.send_raw(Message::Ping(vec![42, 43, 44].into())).await;
    match client.next_raw(Duration::from_secs(2)).await {
        Some(Message::Pong(data)) => assert_eq!(data.as_ref(), &[42, 43, 44]),
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_setup_must_match_token_and_precede_events() {
    let server = start_test_server().await;
    let mut client = server.connect_unsetup("alice", "Alice").await;

    client.send("join room", json!("anything")).await;
    let err = client.expect("error").await;
    assert_eq!(err["data"]["code"], 403);

    client.send("setup", json!({"userId": "mallory"})).await;
    let err = client.expect("error").await;
    assert_eq!(err["data"]["code"], 403);
    server.wait_for_connections(0).await;

    client.send("setup", json!({"userId": "alice"})).await;
    client.expect("connected").await;
    server.wait_for_connections(1).await;
}

#[tokio::test]
async fn test_join_room_requires_membership() {
    let server = start_test_server().await;
    let alice = server.token("alice", "Alice");
    let id = direct_chat(&server, &alice, "bob").await;

    let mut mallory = server.connect("mallory", "Mallory").await;
    mallory.send("join room", json!(id)).await;
    let err = mallory.expect("error").await;
    assert_eq!(err["data"]["code"], 403);

    mallory.send("join room", json!("no-such-conversation")).await;
    let err = mallory.expect("error").await;
    assert_eq!(err["data"]["code"], 404);
}

#[tokio::test]
async fn test_recipient_in_room_receives_message_once() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let id = direct_chat(&server, &alice_token, "bob").await;

    let mut alice = server.connect("alice", "Alice").await;
    let mut bob = server.connect("bob", "Bob").await;
    alice.join(&id).await;
    bob.join(&id).await;

    alice.send("new message", json!({"conversationId": id, "content": "hi bob"})).await;

    let sent = alice.expect("message sent").await;
    assert_eq!(sent["data"]["content"], "hi bob");

    let received = bob.expect("message received").await;
    assert_eq!(received["data"]["content"], "hi bob");
    assert_eq!(received["data"]["senderId"], "alice");
    assert_eq!(received["data"]["senderName"], "Alice");
    assert_eq!(received["data"]["conversation"]["id"], id.as_str());

    bob.expect_none("message received", QUIET).await;
    alice.expect_none("message received", QUIET).await;

    let bob_token = server.token("bob", "Bob");
    let (_, notifications) = api(&server, Method::GET, "/api/notifications", &bob_token, None).await;
    assert!(notifications.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_offline_recipient_gets_notification() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let bob_token = server.token("bob", "Bob");
    let id = direct_chat(&server, &alice_token, "bob").await;

    let mut alice = server.connect("alice", "Alice").await;
    alice.join(&id).await;
    alice.send("new message", json!({"conversationId": id, "content": "are you there?"})).await;
    alice.expect("message sent").await;

    let (status, notifications) = api(&server, Method::GET, "/api/notifications", &bob_token, None).await;
    assert_eq!(status, 200);
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["title"], "Alice");
    assert_eq!(notifications[0]["preview"], "are you there?");
    assert_eq!(notifications[0]["kind"], "message");
    assert_eq!(notifications[0]["referenceId"], id.as_str());
    assert_eq!(notifications[0]["isRead"], false);

    // The message itself is persisted regardless of who was online
    let (_, history) = api(&server, Method::GET, &format!("/api/chats/{}/messages", id), &bob_token, None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_group_delivery_reaches_room_and_elsewhere() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let carol_token = server.token("carol", "Carol");

    let (_, group) = api(&server, Method::POST, "/api/chats/group", &alice_token, Some(json!({"name": "Team"}))).await;
    let id = group["id"].as_str().unwrap().to_string();
    for user in ["bob", "carol"] {
        let (status, _) = api(
            &server,
            Method::POST,
            &format!("/api/chats/{}/members", id),
            &alice_token,
            Some(json!({"userId": user})),
        )
        .await;
        assert_eq!(status, 200);
    }

    let mut alice = server.connect("alice", "Alice").await;
    let mut bob = server.connect("bob", "Bob").await;
    let mut carol = server.connect("carol", "Carol").await;
    alice.join(&id).await;
    bob.join(&id).await;

    // Carol is online but viewing another conversation
    let other = direct_chat(&server, &carol_token, "dave").await;
    carol.join(&other).await;

    alice.send("new message", json!({"conversationId": id, "content": "standup in 5"})).await;
    alice.expect("message sent").await;

    let to_bob = bob.expect("message received").await;
    let to_carol = carol.expect("message received").await;
    assert_eq!(to_bob["data"]["id"], to_carol["data"]["id"]);
    assert_eq!(to_carol["data"]["conversation"]["name"], "Team");

    bob.expect_none("message received", QUIET).await;
    carol.expect_none("message received", QUIET).await;
    alice.expect_none("message received", QUIET).await;

    let (_, notifications) = api(&server, Method::GET, "/api/notifications", &carol_token, None).await;
    assert!(notifications.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sender_other_device_gets_no_echo() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let id = direct_chat(&server, &alice_token, "bob").await;

    let mut phone = server.connect("alice", "Alice").await;
    let mut laptop = server.connect("alice", "Alice").await;
    let mut bob = server.connect("bob", "Bob").await;
    phone.join(&id).await;
    laptop.join(&id).await;
    bob.join(&id).await;

    phone.send("new message", json!({"conversationId": id, "content": "from phone"})).await;
    phone.expect("message sent").await;
    bob.expect("message received").await;
    laptop.expect_none("message received", QUIET).await;
}

#[tokio::test]
async fn test_single_room_per_connection_leaves_previous() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let with_bob = direct_chat(&server, &alice_token, "bob").await;
    let with_carol = direct_chat(&server, &alice_token, "carol").await;

    let mut alice = server.connect("alice", "Alice").await;
    let mut bob = server.connect("bob", "Bob").await;
    alice.join(&with_bob).await;
    alice.join(&with_carol).await;
    bob.join(&with_bob).await;

    // Alice is no longer viewing the chat with Bob, so typing there is rejected
    alice.send("typing", json!(with_bob)).await;
    let err = alice.expect("error").await;
    assert_eq!(err["data"]["code"], 403);
    bob.expect_none("typing", QUIET).await;
}

#[tokio::test]
async fn test_typing_indicator_broadcast_and_expiry() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let id = direct_chat(&server, &alice_token, "bob").await;

    let mut alice = server.connect("alice", "Alice").await;
    let mut bob = server.connect("bob", "Bob").await;
    alice.join(&id).await;
    bob.join(&id).await;

    alice.send("typing", json!(id)).await;
    let typing = bob.expect("typing").await;
    assert_eq!(typing["data"], json!({"conversationId": id, "userId": "alice"}));

    // Refresh within the window: no second start
    alice.send("typing", json!(id)).await;
    bob.expect_none("typing", TEST_TYPING_TIMEOUT / 3).await;

    let stopped = bob.expect("stop typing").await;
    assert_eq!(stopped["data"]["userId"], "alice");
    bob.expect_none("stop typing", TEST_TYPING_TIMEOUT * 2).await;

    alice.expect_none("typing", QUIET).await;
}

#[tokio::test]
async fn test_sending_message_stops_typing() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let id = direct_chat(&server, &alice_token, "bob").await;

    let mut alice = server.connect("alice", "Alice").await;
    let mut bob = server.connect("bob", "Bob").await;
    alice.join(&id).await;
    bob.join(&id).await;

    alice.send("typing", json!(id)).await;
    bob.expect("typing").await;
    alice.send("new message", json!({"conversationId": id, "content": "done"})).await;
    bob.expect("stop typing").await;
    bob.expect_none("stop typing", TEST_TYPING_TIMEOUT * 2).await;
}

#[tokio::test]
async fn test_disconnect_routes_later_messages_to_notifications() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let bob_token = server.token("bob", "Bob");
    let id = direct_chat(&server, &alice_token, "bob").await;

    let mut bob = server.connect("bob", "Bob").await;
    bob.join(&id).await;
    server.wait_for_connections(1).await;
    bob.close().await;
    server.wait_for_connections(0).await;

    let (status, _) = api(
        &server,
        Method::POST,
        "/api/messages",
        &alice_token,
        Some(json!({"conversationId": id, "content": "you left"})),
    )
    .await;
    assert_eq!(status, 201);

    let (_, count) = api(&server, Method::GET, "/api/notifications/unread-count", &bob_token, None).await;
    assert_eq!(count["unread"], 1);
}

#[tokio::test]
async fn test_membership_change_pushes_conversation_update() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let (_, group) = api(&server, Method::POST, "/api/chats/group", &alice_token, Some(json!({"name": "Book Club"}))).await;
    let id = group["id"].as_str().unwrap().to_string();

    let mut bob = server.connect("bob", "Bob").await;
    api(
        &server,
        Method::POST,
        &format!("/api/chats/{}/members", id),
        &alice_token,
        Some(json!({"userId": "bob"})),
    )
    .await;

    let update = bob.expect("conversation updated").await;
    assert_eq!(update["data"]["id"], id.as_str());
    assert_eq!(update["data"]["members"], json!(["alice", "bob"]));

    api(&server, Method::DELETE, &format!("/api/chats/{}/members/bob", id), &alice_token, None).await;
    let update = bob.expect("conversation updated").await;
    assert_eq!(update["data"]["members"], json!(["alice"]));
}

#[tokio::test]
async fn test_removed_member_leaves_group_room() {
    let server = start_test_server().await;
    let alice_token = server.token("alice", "Alice");
    let (_, group) = api(&server, Method::POST, "/api/chats/group", &alice_token, Some(json!({"name": "Crew"}))).await;
    let id = group["id"].as_str().unwrap().to_string();
    api(
        &server,
        Method::POST,
        &format!("/api/chats/{}/members", id),
        &alice_token,
        Some(json!({"userId": "bob"})),
    )
    .await;

    let mut alice = server.connect("alice", "Alice").await;
    let mut bob = server.connect("bob", "Bob").await;
    alice.join(&id).await;
    bob.join(&id).await;

    let (status, _) = api(&server, Method::DELETE, &format!("/api/chats/{}/members/bob", id), &alice_token, None).await;
    assert_eq!(status, 200);
    let update = bob.expect("conversation updated").await;
    assert_eq!(update["data"]["members"], json!(["alice"]));

    alice.send("typing", json!(id)).await;
    bob.expect_none("typing", QUIET).await;

    bob.send("typing", json!(id)).await;
    let err = bob.expect("error").await;
    assert_eq!(err["data"]["code"], 403);
    alice.expect_none("typing", QUIET).await;
}
