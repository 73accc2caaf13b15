//! End-to-end round trip against a mock gateway on loopback.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use gateway_link::{
    Collaborators, ConnectionStatus, Credentials, HttpFallback, Link, LinkConfig, Message,
    RequestInfo, Transport, TungsteniteConnector,
};

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(run_gateway)
}

/// Answers the handshake with a pushed event and echoes every correlated
/// request back to its sender.
async fn run_gateway(socket: WebSocket) {
    let (mut tx, mut rx) = socket.split();
    while let Some(Ok(frame)) = rx.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let verb = request
            .pointer("/Data/Verb")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let reply = if verb == "AUTH" {
            json!({ "Type": "Users#Profile#Updated", "Data": { "Id": 1 } })
        } else {
            json!({
                "ID": request.get("ID"),
                "Type": request.get("Type"),
                "Data": { "Echo": request.pointer("/Data/ServiceName") }
            })
        };
        if tx.send(WsMessage::text(reply.to_string())).await.is_err() {
            break;
        }
    }
}

async fn profile() -> Json<Value> {
    Json(json!({ "Name": "Ada" }))
}

async fn spawn_gateway() -> reqwest::Url {
    let app = Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/api/Users/Profile", get(profile));
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind loopback");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let Ok(url) = reqwest::Url::parse(&format!("http://{addr}/api/")) else {
        panic!("valid gateway url");
    };
    url
}

#[tokio::test]
async fn round_trip_over_websocket_and_http() {
    let mut config = LinkConfig::new(spawn_gateway().await);
    config.credentials = Credentials::new("s-1", "d-1");
    let Ok(fallback) = HttpFallback::new(Duration::from_secs(5)) else {
        panic!("http client");
    };
    let link = Link::new(
        config,
        Collaborators::new(Arc::new(TungsteniteConnector), Arc::new(fallback)),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    link.register_service_processor(
        "Users",
        move |message: &Message| {
            let _ = tx.send(message.clone());
            Ok(())
        },
        "it",
    );

    if let Err(err) = link.connect(Duration::from_secs(5)).await {
        panic!("connect failed: {err}");
    }
    assert_eq!(link.status(), ConnectionStatus::Ready);

    let Ok(Some(pushed)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await else {
        panic!("no pushed event");
    };
    assert_eq!(pushed.message_type.to_string(), "Users#Profile#Updated");

    let reply = link.send_request(RequestInfo::new("Users", "Profile"), false);
    assert_eq!(reply.transport(), Transport::Duplex);
    let Ok(Ok(echo)) = tokio::time::timeout(Duration::from_secs(5), reply).await else {
        panic!("no duplex reply");
    };
    assert_eq!(echo, json!({ "Echo": "Users" }));
    assert_eq!(link.outstanding_requests(), 0);

    let Ok(fetched) = link
        .request(RequestInfo::from_path("/Users/Profile"), true)
        .await
    else {
        panic!("fallback request failed");
    };
    assert_eq!(fetched, json!({ "Name": "Ada" }));

    link.shutdown();
    assert_eq!(link.status(), ConnectionStatus::Closed);
}
