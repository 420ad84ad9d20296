use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chat_gateway::event::SESSION_JOINED;
use chat_gateway::{
    handle_connection, Config, Event, EventHandler, EventPayload, Gateway, HandlerError,
    LocalBus, MemoryMessageStore, Presence, RoomError, RoomId,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

async fn serve(gateway: Gateway) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                let _ = handle_connection(stream, gateway).await;
            });
        }
    });

    addr.to_string()
}

async fn start_gateway() -> (String, Gateway, Arc<MemoryMessageStore>) {
    let store = Arc::new(MemoryMessageStore::new());
    let gateway = Gateway::new(Config::default(), store.clone());
    let addr = serve(gateway.clone()).await;
    (addr, gateway, store)
}

async fn connect(addr: &str, room: &str, name: &str) -> Client {
    let url = format!("ws://{}/chat?room={}&name={}", addr, room, name);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Poll until the room reports `expected` members
async fn wait_for_members(gateway: &Gateway, room: &str, expected: usize) {
    let room_id = RoomId::from(room);
    for _ in 0..200 {
        if let Some(handle) = gateway.rooms().get(&room_id) {
            if handle.member_count().await.ok() == Some(expected) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room {} never reached {} members", room, expected);
}

/// Next text frame, skipping control frames
async fn next_text(client: &mut Client) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Frame::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for text frame")
}

async fn assert_silent(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}

async fn send_text(client: &mut Client, text: &str) {
    client.send(Frame::Text(text.to_string().into())).await.unwrap();
}

/// Records presence events
#[derive(Default)]
struct JoinRecorder {
    joined: Mutex<Vec<Presence>>,
}

#[async_trait]
impl EventHandler for JoinRecorder {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        if let EventPayload::SessionJoined(presence) = event.payload() {
            self.joined.lock().unwrap().push(presence.clone());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_message_fans_out_to_other_members_and_persists_once() {
    let (addr, gateway, store) = start_gateway().await;
    let joins = Arc::new(JoinRecorder::default());
    gateway.events().subscribe(SESSION_JOINED, joins.clone());

    let mut alice = connect(&addr, "lobby", "alice").await;
    wait_for_members(&gateway, "lobby", 1).await;
    let mut bob = connect(&addr, "lobby", "bob").await;
    wait_for_members(&gateway, "lobby", 2).await;

    send_text(&mut alice, "hi").await;

    assert_eq!(next_text(&mut bob).await, "hi");
    assert_silent(&mut alice).await;

    let alice_id = joins
        .joined
        .lock()
        .unwrap()
        .iter()
        .find(|p| p.display_name == "alice")
        .map(|p| p.session_id)
        .unwrap();

    let stored = store.messages();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].room_id, RoomId::from("lobby"));
    assert_eq!(stored[0].sender_id, alice_id);
    assert_eq!(stored[0].kind, "Text");
    assert_eq!(stored[0].body, b"hi");
}

#[tokio::test]
async fn test_empty_message_is_dropped_and_connection_stays_open() {
    let (addr, gateway, store) = start_gateway().await;

    let mut alice = connect(&addr, "lobby", "alice").await;
    let mut bob = connect(&addr, "lobby", "bob").await;
    wait_for_members(&gateway, "lobby", 2).await;

    send_text(&mut alice, "").await;
    send_text(&mut alice, "after").await;

    assert_eq!(next_text(&mut bob).await, "after");
    assert_eq!(store.count(), 1);
}

#[tokio::test]
async fn test_abrupt_disconnect_leaves_room() {
    let (addr, gateway, _store) = start_gateway().await;

    let mut alice = connect(&addr, "lobby", "alice").await;
    let mut bob = connect(&addr, "lobby", "bob").await;
    let carol = connect(&addr, "lobby", "carol").await;
    wait_for_members(&gateway, "lobby", 3).await;

    // Drop without a close handshake
    drop(carol);
    wait_for_members(&gateway, "lobby", 2).await;

    send_text(&mut alice, "still here").await;
    assert_eq!(next_text(&mut bob).await, "still here");
}

#[tokio::test]
async fn test_close_frame_leaves_room() {
    let (addr, gateway, _store) = start_gateway().await;

    let _alice = connect(&addr, "lobby", "alice").await;
    let mut bob = connect(&addr, "lobby", "bob").await;
    wait_for_members(&gateway, "lobby", 2).await;

    bob.close(None).await.unwrap();
    wait_for_members(&gateway, "lobby", 1).await;
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let (addr, gateway, _store) = start_gateway().await;

    let mut alice = connect(&addr, "lobby", "alice").await;
    let mut bob = connect(&addr, "lobby", "bob").await;
    wait_for_members(&gateway, "lobby", 2).await;

    for i in 0..20 {
        send_text(&mut alice, &format!("message {}", i)).await;
    }

    for i in 0..20 {
        assert_eq!(next_text(&mut bob).await, format!("message {}", i));
    }
}

#[tokio::test]
async fn test_binary_frames_keep_their_kind() {
    let (addr, gateway, store) = start_gateway().await;

    let mut alice = connect(&addr, "lobby", "alice").await;
    let mut bob = connect(&addr, "lobby", "bob").await;
    wait_for_members(&gateway, "lobby", 2).await;

    alice.send(Frame::Binary(vec![1, 2, 3].into())).await.unwrap();

    let frame = tokio::time::timeout(WAIT, bob.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(frame, Frame::Binary(vec![1, 2, 3].into()));
    assert_eq!(store.messages()[0].kind, "Binary");
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (addr, gateway, _store) = start_gateway().await;

    let mut alice = connect(&addr, "lobby", "alice").await;
    let mut bob = connect(&addr, "lobby", "bob").await;
    let mut carol = connect(&addr, "other", "carol").await;
    wait_for_members(&gateway, "lobby", 2).await;
    wait_for_members(&gateway, "other", 1).await;

    send_text(&mut alice, "lobby only").await;

    assert_eq!(next_text(&mut bob).await, "lobby only");
    assert_silent(&mut carol).await;
    assert_eq!(gateway.rooms().room_count(), 2);
}

#[tokio::test]
async fn test_handshake_without_room_is_rejected() {
    let (addr, _gateway, _store) = start_gateway().await;

    let result = connect_async(format!("ws://{}/chat?name=alice", addr)).await;
    assert!(result.is_err());

    let result = connect_async(format!("ws://{}/elsewhere?room=lobby", addr)).await;
    assert!(result.is_err());
}

/// Send the request in two segments, splitting the request line
async fn get_health(addr: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /hea").await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream
        .write_all(b"lth HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn test_health_endpoint_reports_storage() {
    let (_addr, gateway, store) = start_gateway().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let health_addr = listener.local_addr().unwrap().to_string();
    gateway.serve_health(listener);

    let response = get_health(&health_addr).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("\"health\":\"Healthy\""));

    store.close();
    let response = get_health(&health_addr).await;
    assert!(response.starts_with("HTTP/1.1 503"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (addr, gateway, _store) = start_gateway().await;

    let mut alice = connect(&addr, "lobby", "alice").await;
    wait_for_members(&gateway, "lobby", 1).await;

    gateway.shutdown().await;
    // Idempotent
    gateway.shutdown().await;

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match alice.next().await {
                Some(Ok(Frame::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    assert!(gateway.events().is_closed());
    assert!(matches!(
        gateway.rooms().get_or_create(&RoomId::from("lobby")),
        Err(RoomError::RegistryClosed)
    ));
}

#[tokio::test]
async fn test_messages_replicate_between_nodes() {
    let bus = Arc::new(LocalBus::new());

    let node_a = Gateway::new(Config::default(), Arc::new(MemoryMessageStore::new()));
    node_a.replicate_via(bus.clone(), bus.subscribe(64));
    let node_b = Gateway::new(Config::default(), Arc::new(MemoryMessageStore::new()));
    node_b.replicate_via(bus.clone(), bus.subscribe(64));

    let addr_a = serve(node_a.clone()).await;
    let addr_b = serve(node_b.clone()).await;

    let mut alice = connect(&addr_a, "lobby", "alice").await;
    let mut bob = connect(&addr_a, "lobby", "bob").await;
    let mut remote = connect(&addr_b, "lobby", "remote").await;
    wait_for_members(&node_a, "lobby", 2).await;
    wait_for_members(&node_b, "lobby", 1).await;

    send_text(&mut alice, "across nodes").await;

    assert_eq!(next_text(&mut bob).await, "across nodes");
    assert_eq!(next_text(&mut remote).await, "across nodes");

    // Node A ignores its own echo from the bus
    assert_silent(&mut bob).await;
    assert_silent(&mut alice).await;
}
