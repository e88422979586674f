mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use common::{client_for, drain_until_closed, echo_server, next_request, reply, spawn_server, wait_for_state};
use hpkv_client::{ClientConfig, ClientError, ConnectionState, KVClient};
use hpkv_common::ResponseFrame;

/// Peer that checks the `apiKey` query parameter during the handshake and
/// reports every request URI it sees.
async fn auth_server(expected_key: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let callback = |request: &Request, response: Response| {
                    let uri = request.uri().to_string();
                    let _ = tx.send(uri.clone());
                    let expected = format!("apiKey={expected_key}");
                    if uri.contains(&expected) {
                        Ok(response)
                    } else {
                        let mut rejection = ErrorResponse::new(Some("invalid api key".to_string()));
                        *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                        Err(rejection)
                    }
                };
                if let Ok(mut ws) = accept_hdr_async(stream, callback).await {
                    while let Some(request) = next_request(&mut ws).await {
                        reply(&mut ws, &ResponseFrame::ok(request.message_id)).await;
                    }
                }
            });
        }
    });

    (format!("http://{addr}"), rx)
}

#[tokio::test]
async fn handshake_carries_api_key_on_ws_path() {
    let (url, mut uris) = auth_server("secret-key").await;
    let client = KVClient::new(ClientConfig::new(&url, "secret-key"));

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(uris.recv().await.unwrap(), "/ws?apiKey=secret-key");
    assert!(client.insert("k", "v").await.unwrap());
}

#[tokio::test]
async fn rejected_handshake_is_a_connection_error() {
    let (url, _uris) = auth_server("secret-key").await;
    let client = KVClient::new(ClientConfig::new(&url, "wrong-key"));

    match client.connect().await {
        Err(ClientError::Connection(message)) => assert!(message.contains("401"), "{message}"),
        other => panic!("unexpected connect outcome: {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Requests surface the same failure rather than hanging.
    assert!(matches!(client.get("k").await, Err(ClientError::Connection(_))));
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(&format!("http://{addr}"));
    assert!(matches!(client.connect().await, Err(ClientError::Connection(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn concurrent_connects_share_one_transport() {
    let (url, accepted) = echo_server().await;
    let client = client_for(&url);

    let outcomes = join_all((0..8).map(|_| client.connect())).await;
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    // Already connected: no new dial.
    client.connect().await.unwrap();
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (url, _) = echo_server().await;
    let client = client_for(&url);

    client.disconnect().await.unwrap();
    client.connect().await.unwrap();
    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_fails_every_pending_request() {
    const IN_FLIGHT: usize = 5;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let (url, _) = spawn_server(move |_, mut ws| {
        let seen_tx = seen_tx.clone();
        async move {
            // Never reply.
            while let Some(request) = next_request(&mut ws).await {
                let _ = seen_tx.send(request.message_id);
            }
        }
    })
    .await;

    let client = client_for(&url);
    client.connect().await.unwrap();

    let tasks: Vec<_> = (0..IN_FLIGHT)
        .map(|idx| {
            let client = client.clone();
            tokio::spawn(async move { client.get(&format!("key-{idx}")).await })
        })
        .collect();
    for _ in 0..IN_FLIGHT {
        seen_rx.recv().await.unwrap();
    }
    assert_eq!(client.pending_requests(), IN_FLIGHT);

    client.disconnect().await.unwrap();

    for task in tasks {
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("request still waiting after disconnect")
            .unwrap();
        assert_eq!(outcome.unwrap_err(), ClientError::ConnectionClosed);
    }
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnect_restarts_message_ids() {
    let (ids_tx, mut ids_rx) = mpsc::unbounded_channel();
    let (url, accepted) = spawn_server(move |idx, mut ws| {
        let ids_tx = ids_tx.clone();
        async move {
            while let Some(request) = next_request(&mut ws).await {
                let _ = ids_tx.send((idx, request.message_id));
                reply(&mut ws, &ResponseFrame::ok(request.message_id)).await;
            }
        }
    })
    .await;

    let client = client_for(&url);
    client.insert("a", "1").await.unwrap();
    client.insert("b", "2").await.unwrap();
    client.disconnect().await.unwrap();
    client.connect().await.unwrap();
    client.insert("c", "3").await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(ids_rx.recv().await.unwrap());
    }
    assert_eq!(seen, vec![(0, 1), (0, 2), (1, 1)]);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transport_loss_drains_and_next_request_redials() {
    let (url, accepted) = spawn_server(|idx, mut ws| async move {
        if idx == 0 {
            // Read one request, then vanish without a close frame.
            let _ = next_request(&mut ws).await;
            drop(ws);
            return;
        }
        while let Some(request) = next_request(&mut ws).await {
            reply(&mut ws, &ResponseFrame::with_value(request.message_id, "back")).await;
        }
    })
    .await;

    let client = client_for(&url);
    let err = client.get("k").await.unwrap_err();
    assert_eq!(err, ClientError::ConnectionClosed);
    assert_eq!(client.pending_requests(), 0);
    wait_for_state(&client, ConnectionState::Disconnected).await;

    assert_eq!(client.get_raw("k").await.unwrap().as_deref(), Some("back"));
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn server_close_frame_settles_disconnected() {
    let (url, _) = spawn_server(|_, mut ws| async move {
        let _ = ws.close(None).await;
        drain_until_closed(&mut ws).await;
    })
    .await;

    let client = client_for(&url);
    client.connect().await.unwrap();
    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn disconnect_during_connect_tears_down_the_new_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                // Hold the upgrade so the client sits in Connecting.
                tokio::time::sleep(Duration::from_millis(200)).await;
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    drain_until_closed(&mut ws).await;
                }
            });
        }
    });

    let client = client_for(&format!("http://{addr}"));
    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    wait_for_state(&client, ConnectionState::Connecting).await;

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.pending_requests(), 0);

    let outcome = connecting.await.unwrap();
    assert!(
        matches!(outcome, Ok(()) | Err(ClientError::ConnectionClosed)),
        "unexpected connect outcome: {outcome:?}"
    );
}

#[tokio::test]
async fn abandoned_disconnect_still_settles_and_allows_reconnect() {
    let (url, accepted) = echo_server().await;
    let client = client_for(&url);
    client.connect().await.unwrap();

    // Poll disconnect() exactly once, then drop it.
    tokio::select! {
        biased;
        _ = client.disconnect() => {}
        _ = std::future::ready(()) => {}
    }

    wait_for_state(&client, ConnectionState::Disconnected).await;
    tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect stuck after an abandoned disconnect")
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(client.get_raw("k").await.unwrap().as_deref(), Some("value-for-k"));
}

#[tokio::test]
async fn disconnect_abandoned_by_timeout_still_fails_pending_requests() {
    let (url, _) = spawn_server(|_, mut ws| async move {
        drain_until_closed(&mut ws).await;
    })
    .await;
    let client = client_for(&url);
    client.connect().await.unwrap();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.get("never").await }
    });
    while client.pending_requests() == 0 {
        tokio::task::yield_now().await;
    }

    let _ = tokio::time::timeout(Duration::ZERO, client.disconnect()).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("request still waiting after disconnect")
        .unwrap();
    assert_eq!(outcome.unwrap_err(), ClientError::ConnectionClosed);
    wait_for_state(&client, ConnectionState::Disconnected).await;
}
