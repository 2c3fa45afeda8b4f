//! End-to-end chat relay over real WebSocket connections.

use formdesk::auth::password::hash_password;
use formdesk::auth::{SessionIssuer, SessionVerifier, StaticCredentialStore, TokenCodec};
use formdesk::chat::{ChatMessage, ChatRelay};
use formdesk::config::builtin_collections;
use formdesk::gateway::{build_router, AppState, GatewayRateLimiter};
use formdesk::records::SqliteRecordStore;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn spawn_gateway() -> (SocketAddr, ChatRelay) {
    let codec = TokenCodec::new("chat-test-secret-chat-test-secret", 3600);
    let hash = hash_password("pw").unwrap();
    let chat = ChatRelay::new(32, 200);
    let state = AppState {
        issuer: SessionIssuer::new(
            Arc::new(StaticCredentialStore::new("admin", &hash).unwrap()),
            codec.clone(),
        ),
        verifier: SessionVerifier::new(codec, "adminToken"),
        records: Arc::new(SqliteRecordStore::in_memory().unwrap()),
        chat: chat.clone(),
        rate_limiter: Arc::new(GatewayRateLimiter::new(10)),
        cookie_secure: false,
        trust_forwarded_headers: false,
    };

    let app = build_router(state, &builtin_collections());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, chat)
}

async fn connect(addr: SocketAddr, name: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/chat?name={name}"))
        .await
        .unwrap();
    ws
}

/// Block until the relay has `n` subscribers, so nothing is sent before
/// every socket is listening.
async fn wait_for_listeners(chat: &ChatRelay, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while chat.listener_count() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listeners never subscribed");
}

async fn next_message(ws: &mut Client) -> ChatMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a chat frame")
            .expect("socket closed")
            .unwrap();
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn message_reaches_every_connected_client_including_sender() {
    let (addr, chat) = spawn_gateway().await;
    let mut ada = connect(addr, "ada").await;
    let mut grace = connect(addr, "grace").await;
    wait_for_listeners(&chat, 2).await;

    ada.send(WsMessage::text("hello everyone")).await.unwrap();

    let seen_by_grace = next_message(&mut grace).await;
    let seen_by_ada = next_message(&mut ada).await;
    assert_eq!(seen_by_grace, seen_by_ada);
    assert_eq!(seen_by_grace.from, "ada");
    assert_eq!(seen_by_grace.text, "hello everyone");
}

#[tokio::test]
async fn empty_messages_are_not_relayed() {
    let (addr, chat) = spawn_gateway().await;
    let mut ada = connect(addr, "ada").await;
    let mut grace = connect(addr, "grace").await;
    wait_for_listeners(&chat, 2).await;

    ada.send(WsMessage::text("   ")).await.unwrap();
    ada.send(WsMessage::text("second")).await.unwrap();

    assert_eq!(next_message(&mut grace).await.text, "second");
}

#[tokio::test]
async fn disconnecting_client_releases_its_subscription() {
    let (addr, chat) = spawn_gateway().await;
    let mut ada = connect(addr, "ada").await;
    let grace = connect(addr, "grace").await;
    wait_for_listeners(&chat, 2).await;

    drop(grace);
    tokio::time::timeout(Duration::from_secs(5), async {
        while chat.listener_count() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("closed socket kept its subscription");

    ada.send(WsMessage::text("still here")).await.unwrap();
    assert_eq!(next_message(&mut ada).await.text, "still here");
}

#[tokio::test]
async fn anonymous_clients_get_a_fallback_name() {
    let (addr, chat) = spawn_gateway().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/chat"))
        .await
        .unwrap();
    wait_for_listeners(&chat, 1).await;

    ws.send(WsMessage::text("hi")).await.unwrap();
    assert_eq!(next_message(&mut ws).await.from, formdesk::chat::ANONYMOUS);
}
