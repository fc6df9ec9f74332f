//! Full client against a local WebSocket server and a mocked HTTP sync API.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tether_client::{ClientConfig, ClientError, ClientHandle, ClientUpdate, SyncClient};
use tether_core::{ReconnectPolicy, SessionId};
use tether_transport::HttpSyncBackend;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

async fn boot_ws() -> (String, mpsc::UnboundedReceiver<ServerSocket>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    drop(tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            if tx.send(ws).is_err() {
                break;
            }
        }
    }));
    (format!("ws://{addr}/ws"), rx)
}

/// HTTP API with only `main`, whose history starts empty.
async fn boot_http() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/worktrees"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "worktrees": [{"id": "main", "name": "main"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/worktrees/main/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "worktreeId": "main",
            "messages": [],
            "state": {"status": "ready"}
        })))
        .mount(&server)
        .await;
    server
}

async fn start_client(ws_url: &str, http: &MockServer) -> (ClientHandle, broadcast::Receiver<ClientUpdate>) {
    let mut config = ClientConfig::new(ws_url);
    config.supervisor.reconnect = ReconnectPolicy {
        base_delay_ms: 10,
        max_delay_ms: 50,
        max_attempts: 5,
        jitter_ms: 5,
    };
    let backend = HttpSyncBackend::new(&http.uri()).unwrap();
    let (handle, _task) = SyncClient::spawn(config, Arc::new(backend));
    let updates = handle.subscribe();
    handle.connect().unwrap();
    (handle, updates)
}

async fn accept(sockets: &mut mpsc::UnboundedReceiver<ServerSocket>) -> ServerSocket {
    timeout(TIMEOUT, sockets.recv())
        .await
        .expect("timeout waiting for connection")
        .expect("server stopped")
}

/// Skip updates until one matches.
async fn wait_for(
    updates: &mut broadcast::Receiver<ClientUpdate>,
    mut matches: impl FnMut(&ClientUpdate) -> bool,
) -> ClientUpdate {
    timeout(TIMEOUT, async {
        loop {
            let update = updates.recv().await.expect("update channel closed");
            if matches(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timeout waiting for update")
}

async fn read_json(ws: &mut ServerSocket) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] != "ping" {
                return value;
            }
        }
    }
}

async fn send(ws: &mut ServerSocket, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

fn texts(view: Option<tether_sync::SessionView>) -> Vec<String> {
    view
        .expect("session exists")
        .messages
        .into_iter()
        .map(|m| m.text)
        .collect()
}

#[tokio::test]
async fn reconnect_mid_stream_keeps_streamed_text() {
    let (ws_url, mut sockets) = boot_ws().await;
    let http = boot_http().await;
    Mock::given(method("GET"))
        .and(path("/api/worktrees/main/messages"))
        .and(query_param("since", "m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [],
            "state": {"status": "processing", "currentTurnId": "t1"}
        })))
        .expect(1)
        .mount(&http)
        .await;

    let (handle, mut updates) = start_client(&ws_url, &http).await;
    let mut server = accept(&mut sockets).await;
    let _ = wait_for(&mut updates, |u| matches!(u, ClientUpdate::ResyncFinished { epoch: 1 })).await;

    send(&mut server, json!({"type": "turn_started", "turnId": "t1"})).await;
    send(&mut server, json!({"type": "assistant_delta", "itemId": "m1", "delta": "Hi", "turnId": "t1"})).await;
    send(&mut server, json!({"type": "assistant_delta", "itemId": "m1", "delta": " there", "turnId": "t1"})).await;
    let _ = wait_for(&mut updates, |u| {
        matches!(u, ClientUpdate::Session(view)
            if view.messages.first().is_some_and(|m| m.text == "Hi there"))
    })
    .await;

    drop(server);
    let _server = accept(&mut sockets).await;
    let _ = wait_for(&mut updates, |u| matches!(u, ClientUpdate::ResyncFinished { epoch: 2 })).await;

    let view = handle.view(None).await.unwrap();
    let turn = view.as_ref().and_then(|v| v.current_turn_id.clone());
    assert_eq!(turn.map(|t| t.to_string()), Some("t1".to_string()));
    assert_eq!(texts(view), vec!["Hi there"]);
}

#[tokio::test]
async fn replay_appends_missed_entries_after_reconnect() {
    let (ws_url, mut sockets) = boot_ws().await;
    let http = boot_http().await;
    Mock::given(method("GET"))
        .and(path("/api/worktrees/main/messages"))
        .and(query_param("since", "m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                {"id": "m1", "role": "assistant", "text": "Hi there"},
                {"id": "m2", "role": "assistant", "text": "Done."}
            ],
            "state": {"status": "ready"}
        })))
        .mount(&http)
        .await;

    let (handle, mut updates) = start_client(&ws_url, &http).await;
    let mut server = accept(&mut sockets).await;
    let _ = wait_for(&mut updates, |u| matches!(u, ClientUpdate::ResyncFinished { epoch: 1 })).await;

    send(&mut server, json!({"type": "assistant_delta", "itemId": "m1", "delta": "Hi"})).await;
    let _ = wait_for(&mut updates, |u| {
        matches!(u, ClientUpdate::Session(view) if !view.messages.is_empty())
    })
    .await;

    drop(server);
    let _server = accept(&mut sockets).await;
    let _ = wait_for(&mut updates, |u| matches!(u, ClientUpdate::ResyncFinished { epoch: 2 })).await;

    assert_eq!(texts(handle.view(None).await.unwrap()), vec!["Hi there", "Done."]);
}

#[tokio::test]
async fn commands_reach_the_server() {
    let (ws_url, mut sockets) = boot_ws().await;
    let http = boot_http().await;
    let (handle, mut updates) = start_client(&ws_url, &http).await;
    let mut server = accept(&mut sockets).await;
    let _ = wait_for(&mut updates, |u| matches!(u, ClientUpdate::ResyncFinished { .. })).await;

    let main = SessionId::main();
    handle.send_user_message(&main, "hello").await.unwrap();
    let frame = read_json(&mut server).await;
    assert_eq!(frame["type"], "user_message");
    assert_eq!(frame["text"], "hello");

    assert_matches!(handle.interrupt(&main).await, Err(ClientError::NoActiveTurn(_)));

    send(&mut server, json!({"type": "turn_started", "turnId": "t9"})).await;
    let _ = wait_for(&mut updates, |u| {
        matches!(u, ClientUpdate::Session(view) if view.current_turn_id.is_some())
    })
    .await;
    handle.interrupt(&main).await.unwrap();
    let frame = read_json(&mut server).await;
    assert_eq!(frame["type"], "turn_interrupt");
    assert_eq!(frame["turnId"], "t9");

    assert_matches!(handle.close_worktree(&main).await, Err(ClientError::MainSession));
    assert_matches!(
        handle.send_user_message(&SessionId::from("wt-404"), "hi").await,
        Err(ClientError::Sync(_))
    );
}

#[tokio::test]
async fn server_created_sessions_can_be_selected_and_closed() {
    let (ws_url, mut sockets) = boot_ws().await;
    let http = boot_http().await;
    let (handle, mut updates) = start_client(&ws_url, &http).await;
    let mut server = accept(&mut sockets).await;
    let _ = wait_for(&mut updates, |u| matches!(u, ClientUpdate::ResyncFinished { .. })).await;

    send(
        &mut server,
        json!({"type": "worktree_created", "worktree": {"id": "wt-1", "name": "fix ci"}}),
    )
    .await;
    let created = wait_for(&mut updates, |u| matches!(u, ClientUpdate::SessionCreated(_))).await;
    assert_matches!(created, ClientUpdate::SessionCreated(id) if id.as_str() == "wt-1");

    let wt = SessionId::from("wt-1");
    handle.select_active(&wt).await.unwrap();
    assert_eq!(handle.view(None).await.unwrap().unwrap().id, wt);

    send(&mut server, json!({"type": "worktree_removed", "worktreeId": "wt-1"})).await;
    let _ = wait_for(&mut updates, |u| matches!(u, ClientUpdate::SessionClosed(_))).await;
    let active = wait_for(&mut updates, |u| matches!(u, ClientUpdate::ActiveChanged(_))).await;
    assert_matches!(active, ClientUpdate::ActiveChanged(id) if id.is_main());

    // Frames for the closed session are dropped.
    send(
        &mut server,
        json!({"type": "assistant_delta", "worktreeId": "wt-1", "itemId": "x", "delta": "late"}),
    )
    .await;
    assert!(handle.view(Some(&wt)).await.unwrap().is_none());
}

#[tokio::test]
async fn shutdown_stops_the_client() {
    let (ws_url, _sockets) = boot_ws().await;
    let http = boot_http().await;
    let (handle, _updates) = start_client(&ws_url, &http).await;
    handle.shutdown().unwrap();
    let result = timeout(TIMEOUT, async {
        loop {
            match handle.request_models().await {
                Err(ClientError::Stopped) => break,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await;
    assert!(result.is_ok());
}
