#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use hpkv_client::{ClientConfig, ConnectionState, KVClient};
use hpkv_common::{decode_request, encode_response, RequestFrame, ResponseFrame};

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Scripted peer: every accepted connection is handed to `handler` along with
/// its zero-based connection index. Returns the base URL and an accept counter.
pub async fn spawn_server<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            let ws = accept_async(stream).await.expect("handshake");
            tokio::spawn(handler(idx, ws));
        }
    });

    (format!("http://{addr}"), accepted)
}

/// Peer that answers every request with `value = "value-for-<key>"`.
pub async fn echo_server() -> (String, Arc<AtomicUsize>) {
    spawn_server(|_, mut ws| async move {
        while let Some(request) = next_request(&mut ws).await {
            let response = ResponseFrame::with_value(
                request.message_id,
                format!("value-for-{}", request.key),
            );
            reply(&mut ws, &response).await;
        }
    })
    .await
}

pub fn client_for(url: &str) -> KVClient {
    KVClient::new(ClientConfig::new(url, "test-key"))
}

/// Next request frame, or None once the client closes.
pub async fn next_request(ws: &mut ServerSocket) -> Option<RequestFrame> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                return Some(decode_request(text.as_bytes()).expect("request frame"))
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

pub async fn reply(ws: &mut ServerSocket, response: &ResponseFrame) {
    send_text(ws, &encode_response(response).expect("encode")).await;
}

pub async fn send_text(ws: &mut ServerSocket, text: &str) {
    let _ = ws.send(Message::Text(text.to_string())).await;
}

/// Reads until the client goes away.
pub async fn drain_until_closed(ws: &mut ServerSocket) {
    while next_request(ws).await.is_some() {}
}

pub async fn wait_for_state(client: &KVClient, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state never became {state:?}"));
}
