//! Integration tests for the notification REST API.

mod common;

use common::{api, direct_chat, start_test_server, TestServer};
use reqwest::Method;
use serde_json::json;

/// Alice messages the offline Bob `count` times in their direct chat.
async fn send_offline_messages(server: &TestServer, count: usize) -> String {
    let alice = server.token("alice", "Alice");
    let id = direct_chat(server, &alice, "bob").await;
    for i in 0..count {
        let (status, _) = api(
            server,
            Method::POST,
            "/api/messages",
            &alice,
            Some(json!({"conversationId": id, "content": format!("message {}", i)})),
        )
        .await;
        assert_eq!(status, 201);
    }
    id
}

#[tokio::test]
async fn test_list_newest_first_and_unread_count() {
    let server = start_test_server().await;
    send_offline_messages(&server, 3).await;
    let bob = server.token("bob", "Bob");

    let (status, list) = api(&server, Method::GET, "/api/notifications", &bob, None).await;
    assert_eq!(status, 200);
    let previews: Vec<_> = list.as_array().unwrap().iter().map(|n| n["preview"].as_str().unwrap()).collect();
    assert_eq!(previews, vec!["message 2", "message 1", "message 0"]);

    let (_, count) = api(&server, Method::GET, "/api/notifications/unread-count", &bob, None).await;
    assert_eq!(count["unread"], 3);

    // The sender is never notified about their own messages
    let alice = server.token("alice", "Alice");
    let (_, count) = api(&server, Method::GET, "/api/notifications/unread-count", &alice, None).await;
    assert_eq!(count["unread"], 0);
}

#[tokio::test]
async fn test_mark_read_unread_and_all() {
    let server = start_test_server().await;
    send_offline_messages(&server, 2).await;
    let bob = server.token("bob", "Bob");

    let (_, list) = api(&server, Method::GET, "/api/notifications", &bob, None).await;
    let first = list[0]["id"].as_str().unwrap().to_string();

    let (status, read) = api(&server, Method::PATCH, &format!("/api/notifications/{}/read", first), &bob, None).await;
    assert_eq!(status, 200);
    assert_eq!(read["isRead"], true);
    let (_, count) = api(&server, Method::GET, "/api/notifications/unread-count", &bob, None).await;
    assert_eq!(count["unread"], 1);

    let (status, unread) = api(&server, Method::PATCH, &format!("/api/notifications/{}/unread", first), &bob, None).await;
    assert_eq!(status, 200);
    assert_eq!(unread["isRead"], false);

    let (status, all) = api(&server, Method::PATCH, "/api/notifications/mark-all-read", &bob, None).await;
    assert_eq!(status, 200);
    assert_eq!(all["updated"], 2);
    let (_, count) = api(&server, Method::GET, "/api/notifications/unread-count", &bob, None).await;
    assert_eq!(count["unread"], 0);
}

#[tokio::test]
async fn test_delete_is_scoped_to_owner() {
    let server = start_test_server().await;
    send_offline_messages(&server, 1).await;
    let bob = server.token("bob", "Bob");
    let mallory = server.token("mallory", "Mallory");

    let (_, list) = api(&server, Method::GET, "/api/notifications", &bob, None).await;
    let id = list[0]["id"].as_str().unwrap().to_string();

    let (status, _) = api(&server, Method::DELETE, &format!("/api/notifications/{}", id), &mallory, None).await;
    assert_eq!(status, 404);
    let (status, _) = api(&server, Method::PATCH, &format!("/api/notifications/{}/read", id), &mallory, None).await;
    assert_eq!(status, 404);

    let (status, _) = api(&server, Method::DELETE, &format!("/api/notifications/{}", id), &bob, None).await;
    assert_eq!(status, 204);
    let (_, list) = api(&server, Method::GET, "/api/notifications", &bob, None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_long_message_preview_truncated() {
    let server = start_test_server().await;
    let alice = server.token("alice", "Alice");
    let bob = server.token("bob", "Bob");
    let id = direct_chat(&server, &alice, "bob").await;

    let long = "a".repeat(150);
    api(
        &server,
        Method::POST,
        "/api/messages",
        &alice,
        Some(json!({"conversationId": id, "content": long})),
    )
    .await;

    let (_, list) = api(&server, Method::GET, "/api/notifications", &bob, None).await;
    let preview = list[0]["preview"].as_str().unwrap();
    assert_eq!(preview.chars().count(), 101);
    assert!(preview.ends_with('…'));
}

#[tokio::test]
async fn test_sender_without_display_name_still_notifies() {
    let server = start_test_server().await;
    let nameless = server.token("alice", "");
    let bob = server.token("bob", "Bob");
    let id = direct_chat(&server, &nameless, "bob").await;

    let (status, _) = api(
        &server,
        Method::POST,
        "/api/messages",
        &nameless,
        Some(json!({"conversationId": id, "content": "who am i"})),
    )
    .await;
    assert_eq!(status, 201);

    let (_, count) = api(&server, Method::GET, "/api/notifications/unread-count", &bob, None).await;
    assert_eq!(count["unread"], 1);
    let (_, list) = api(&server, Method::GET, "/api/notifications", &bob, None).await;
    assert_eq!(list[0]["title"], "alice");
}
