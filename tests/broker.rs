//! End-to-end scenarios (spec.md §8) driven over a real socket: an
//! in-process `axum::serve` plus `tokio-tungstenite` clients, the same
//! shape the teacher's own integration suite favors for its WS services.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use topic_broker::config::{Config, StorageType};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn base_config() -> Config {
    Config {
        api_key: None,
        storage_type: StorageType::None,
        storage_path: PathBuf::from("./tmp/unused-in-tests"),
        port: 0,
        log_level: "error".to_owned(),
    }
}

async fn spawn(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let broker = topic_broker::build(config).await.expect("build broker");
    tokio::spawn(async move {
        let _ = axum::serve(listener, broker.router).await;
    });
    addr
}

async fn try_connect(addr: SocketAddr, client_id: &str, api_key: Option<&str>) -> Result<Client, ()> {
    let mut request = format!("ws://{addr}/ws").into_client_request().expect("valid url");
    request
        .headers_mut()
        .insert("ClientId", client_id.parse().expect("header value"));
    if let Some(key) = api_key {
        request
            .headers_mut()
            .insert("Authorization", key.parse().expect("header value"));
    }
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(ws, _)| ws)
        .map_err(|_| ())
}

async fn connect(addr: SocketAddr, client_id: &str) -> Client {
    try_connect(addr, client_id, None).await.expect("connection should succeed")
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

async fn recv(client: &mut Client) -> Value {
    loop {
        match client.next().await.expect("stream open").expect("no transport error") {
            Message::Text(text) => return serde_json::from_str(&text).expect("valid json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn register_then_get_empty() {
    let addr = spawn(base_config()).await;
    let mut c1 = connect(addr, "c1").await;

    send(
        &mut c1,
        json!({"id": "a", "action": "registerTopic", "topic": "T", "data": {"x": 0}, "requireAck": true}),
    )
    .await;
    let response = recv(&mut c1).await;
    assert_eq!(response["id"], "a");
    assert_eq!(response["code"], 200);
    assert_eq!(response["data"]["name"], "T");
    assert_eq!(response["data"]["schema"]["version"], 0);
    assert_eq!(response["data"]["schema"]["schema"], json!({"x": 0}));

    send(&mut c1, json!({"id": "b", "action": "get", "topic": "T", "requireAck": true})).await;
    let response = recv(&mut c1).await;
    assert_eq!(response["id"], "b");
    assert_eq!(response["code"], 200);
    assert_eq!(response["data"], Value::Null);
}

#[tokio::test]
async fn publish_fans_out_and_acks_the_publisher() {
    let addr = spawn(base_config()).await;
    let mut c1 = connect(addr, "c1").await;
    let mut c2 = connect(addr, "c2").await;

    send(
        &mut c1,
        json!({"id": "reg", "action": "registerTopic", "topic": "T", "data": {"m": ""}, "requireAck": true}),
    )
    .await;
    recv(&mut c1).await;

    send(&mut c2, json!({"id": "sub", "action": "subscribe", "topic": "T", "requireAck": true})).await;
    recv(&mut c2).await;

    send(
        &mut c1,
        json!({"id": "p1", "action": "publish", "topic": "T", "data": {"m": "hi"}, "requireAck": true}),
    )
    .await;

    let delivery = recv(&mut c2).await;
    assert_eq!(delivery["id"], "p1");
    assert_eq!(delivery["action"], "publish");
    assert_eq!(delivery["topic"], "T");
    assert_eq!(delivery["data"], json!({"m": "hi"}));
    assert!(delivery.get("type").is_none());

    let ack = recv(&mut c1).await;
    assert_eq!(ack["id"], "p1");
    assert_eq!(ack["code"], 200);
    assert_eq!(ack["type"], "response");
}

#[tokio::test]
async fn schema_mismatch_on_publish_is_rejected_and_not_delivered() {
    let addr = spawn(base_config()).await;
    let mut c1 = connect(addr, "c1").await;
    let mut c2 = connect(addr, "c2").await;

    send(
        &mut c1,
        json!({"id": "reg", "action": "registerTopic", "topic": "T", "data": {"m": ""}, "requireAck": true}),
    )
    .await;
    recv(&mut c1).await;
    send(&mut c2, json!({"id": "sub", "action": "subscribe", "topic": "T", "requireAck": true})).await;
    recv(&mut c2).await;

    send(
        &mut c1,
        json!({"id": "p2", "action": "publish", "topic": "T", "data": {"n": "nope"}, "requireAck": true}),
    )
    .await;
    let response = recv(&mut c1).await;
    assert_eq!(response["code"], 400);
    assert_eq!(response["message"], "schema doesn't match topics current schema");

    // No delivery should arrive at the subscriber; prove it by getting a
    // response to an unrelated request instead of blocking forever.
    send(&mut c2, json!({"id": "ping", "action": "get", "topic": "T", "requireAck": true})).await;
    let next = recv(&mut c2).await;
    assert_eq!(next["id"], "ping");
}

#[tokio::test]
async fn duplicate_client_id_is_rejected_at_upgrade() {
    let addr = spawn(base_config()).await;
    let _c1 = connect(addr, "dup").await;

    let second = try_connect(addr, "dup", None).await;
    assert!(second.is_err(), "second connection with a reused ClientId must fail");
}

#[tokio::test]
async fn auth_failure_rejects_the_upgrade() {
    let mut config = base_config();
    config.api_key = Some("k1".to_owned());
    let addr = spawn(config).await;

    let result = try_connect(addr, "c1", Some("k2")).await;
    assert!(result.is_err(), "mismatched Authorization header must be rejected");

    let result = try_connect(addr, "c2", Some("k1")).await;
    assert!(result.is_ok(), "matching Authorization header must be accepted");
}

#[tokio::test]
async fn unsubscribe_of_non_member_reports_not_subscribed() {
    let addr = spawn(base_config()).await;
    let mut c1 = connect(addr, "c1").await;
    send(
        &mut c1,
        json!({"id": "reg", "action": "registerTopic", "topic": "T", "data": {"m": ""}, "requireAck": true}),
    )
    .await;
    recv(&mut c1).await;

    send(&mut c1, json!({"id": "u", "action": "unsubscribe", "topic": "T", "requireAck": true})).await;
    let response = recv(&mut c1).await;
    assert_eq!(response["code"], 500);
}

#[tokio::test]
async fn register_topic_is_idempotent_for_an_identical_shape() {
    let addr = spawn(base_config()).await;
    let mut c1 = connect(addr, "c1").await;

    for id in ["first", "second"] {
        send(
            &mut c1,
            json!({"id": id, "action": "registerTopic", "topic": "T", "data": {"m": ""}, "requireAck": true}),
        )
        .await;
        let response = recv(&mut c1).await;
        assert_eq!(response["data"]["schema"]["version"], 0);
    }
}
