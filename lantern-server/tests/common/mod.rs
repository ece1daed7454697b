//! Shared harness for integration tests: spawns a full server (ingest TCP
//! + subscriber WebSocket) on ephemeral ports and hand-encodes producer
//! frames.

use bytes::BufMut;
use futures_util::{SinkExt, StreamExt};
use lantern_server::fanout::events::ServerEvent;
use lantern_server::{
    AppState, Dispatcher, IngestAuth, IngestServer, PerfCounters, RoomConfig, RoomManager,
    SubscriberAuth, SubscriptionManager, Throttler, create_router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub http_addr: SocketAddr,
    pub ingest_addr: SocketAddr,
    pub rooms: Arc<RoomManager>,
    pub subs: Arc<SubscriptionManager>,
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with(None).await
}

/// Spawn the full stack; `auth` is `(token, required)` when set.
pub async fn spawn_server_with(auth: Option<(String, bool)>) -> TestServer {
    let rooms = Arc::new(RoomManager::new(RoomConfig {
        max_entries: 256,
        max_stream_entries: 16,
        trace_timeout_ms: 60_000,
    }));
    let subs = Arc::new(SubscriptionManager::new(rooms.clone()));
    let counters = Arc::new(PerfCounters::new());
    let throttler = Arc::new(Throttler::new(
        subs.clone(),
        counters.clone(),
        Duration::from_millis(25),
        Duration::from_millis(25),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        rooms.clone(),
        subs.clone(),
        throttler,
        counters.clone(),
    ));

    {
        let subs = subs.clone();
        rooms.set_on_created(Box::new(move |room| {
            subs.broadcast_all(ServerEvent::RoomCreated {
                room: room.to_string(),
            });
        }));
    }

    let (token, required) = match auth {
        Some((token, required)) => (Some(token), required),
        None => (None, false),
    };

    let ingest = Arc::new(IngestServer::new(dispatcher, IngestAuth {
        token: token.clone(),
        required,
    }));
    let ingest_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ingest_addr = ingest_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = ingest.run(ingest_listener).await;
    });

    let app = create_router(AppState {
        rooms: rooms.clone(),
        subs: subs.clone(),
        counters,
        auth: SubscriberAuth { token, required },
    });
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(http_listener, app).await.unwrap();
    });

    TestServer {
        http_addr,
        ingest_addr,
        rooms,
        subs,
    }
}

// ----------------------------------------------------------------------
// Producer-side frame encoding
// ----------------------------------------------------------------------

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn frame(record_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16(record_type);
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out
}

pub fn auth_frame(token: &str) -> Vec<u8> {
    let mut p = Vec::new();
    put_str(&mut p, token);
    frame(0x0001, &p)
}

pub fn log_header(app: &str) -> Vec<u8> {
    let mut p = Vec::new();
    put_str(&mut p, app);
    frame(0x0002, &p)
}

pub fn room_bind(room: &str) -> Vec<u8> {
    let mut p = Vec::new();
    put_str(&mut p, room);
    frame(0x0003, &p)
}

pub fn log_entry(session: &str, level: u8, title: &str) -> Vec<u8> {
    log_entry_with_ctx(session, level, title, &[])
}

pub fn log_entry_with_ctx(session: &str, level: u8, title: &str, ctx: &[(&str, &str)]) -> Vec<u8> {
    let mut p = Vec::new();
    let mut flags = 0b0001u8; // title
    if !ctx.is_empty() {
        flags |= 0b1000;
    }
    p.put_u8(flags);
    p.put_u8(level);
    p.put_u16(0); // Message kind
    put_str(&mut p, session);
    put_str(&mut p, "test-host");
    p.put_u32(100);
    p.put_u32(1);
    p.put_u64(chrono::Utc::now().timestamp_micros() as u64);
    put_str(&mut p, title);
    if !ctx.is_empty() {
        p.put_u16(ctx.len() as u16);
        for (key, value) in ctx {
            put_str(&mut p, key);
            put_str(&mut p, value);
        }
    }
    frame(0x0004, &p)
}

pub fn watch(name: &str, value: &str) -> Vec<u8> {
    let mut p = Vec::new();
    put_str(&mut p, name);
    put_str(&mut p, value);
    p.put_u8(2);
    put_str(&mut p, "");
    p.put_u64(chrono::Utc::now().timestamp_micros() as u64);
    frame(0x0006, &p)
}

pub fn stream(channel: &str, data: &[u8]) -> Vec<u8> {
    let mut p = Vec::new();
    put_str(&mut p, channel);
    p.put_u8(0);
    put_str(&mut p, "");
    p.put_u64(chrono::Utc::now().timestamp_micros() as u64);
    p.put_u32(data.len() as u32);
    p.put_slice(data);
    frame(0x0007, &p)
}

pub fn control(command: u8) -> Vec<u8> {
    frame(0x0008, &[command])
}

pub async fn connect_producer(server: &TestServer) -> TcpStream {
    let stream = TcpStream::connect(server.ingest_addr).await.unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

pub async fn send_frames(stream: &mut TcpStream, frames: &[Vec<u8>]) {
    for frame in frames {
        stream.write_all(frame).await.unwrap();
    }
    stream.flush().await.unwrap();
}

// ----------------------------------------------------------------------
// Subscriber-side WebSocket client
// ----------------------------------------------------------------------

pub async fn connect_subscriber(server: &TestServer, room: &str) -> WsClient {
    let url = format!("ws://{}/ws?room={}", server.http_addr, room);
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

pub async fn send_command(ws: &mut WsClient, command: Value) {
    ws.send(Message::Text(command.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON message, panicking after a 3 s stall
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for a server event")
            .expect("websocket closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip events until one of the given type arrives
pub async fn recv_event(ws: &mut WsClient, event_type: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no {event_type} event in time"
        );
        let event = recv_json(ws).await;
        if event["type"] == event_type {
            return event;
        }
    }
}
