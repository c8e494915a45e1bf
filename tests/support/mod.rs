// Shared server bootstrap and websocket helpers for integration tests.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use sync_server::domain::Message;
use sync_server::interface_adapters::protocol::MessageCodec;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Base URL published once the server thread has bound its port.
static SERVER_URL: OnceLock<String> = OnceLock::new();
static SERVER_READY: OnceLock<()> = OnceLock::new();

/// Starts the shared test server on first use and returns its base URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published_url = Arc::new(OnceLock::<String>::new());
        let published_url_thread = Arc::clone(&published_url);
        // The server gets its own OS thread and runtime so it outlives each `#[tokio::test]`.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("http://{}", addr));
                sync_server::run(listener).await.expect("server failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

fn wait_for_server_url_and_readiness(published_url: Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url
        .strip_prefix("http://")
        .expect("base url should use http://");
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not become ready in time");
}

/// Creates a fresh lobby with the default map and returns its id.
pub async fn create_lobby() -> String {
    let base_url = ensure_server();
    let lobby_id = format!("test-{}", uuid::Uuid::new_v4());
    let res = reqwest::Client::new()
        .post(format!("{base_url}/lobbies"))
        .json(&serde_json::json!({ "lobby_id": lobby_id }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(res.status(), reqwest::StatusCode::CREATED);
    lobby_id
}

pub fn ws_url(lobby_id: &str, nick: &str) -> String {
    let base_url = ensure_server();
    let host = base_url
        .strip_prefix("http://")
        .expect("base url should use http://");
    format!("ws://{host}/ws?lobby_id={lobby_id}&nick={nick}")
}

pub async fn connect(lobby_id: &str, nick: &str) -> Ws {
    let (ws, _response) = tokio_tungstenite::connect_async(ws_url(lobby_id, nick))
        .await
        .expect("websocket should connect");
    ws
}

pub async fn send(ws: &mut Ws, codec: &MessageCodec, msg: &Message) {
    let bytes = codec.encode(msg).expect("client messages encode");
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .expect("send should succeed");
}

/// Next decoded server message, skipping control frames.
pub async fn next_message(ws: &mut Ws, codec: &MessageCodec) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server should send within the timeout")
            .expect("stream should stay open")
            .expect("frame should be valid");
        match frame {
            tungstenite::Message::Binary(bytes) => {
                return codec.decode(&bytes).expect("server frames decode");
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {}
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Reads until the server closes the connection and returns its close frame, if any.
pub async fn wait_for_close(ws: &mut Ws) -> Option<CloseFrame> {
    let drain = async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(tungstenite::Message::Close(frame)) => return frame,
                Ok(_) => {}
                Err(_) => return None,
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("server should close the connection")
}
