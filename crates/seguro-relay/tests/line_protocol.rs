use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::sync::watch;

use seguro_relay::{config::ServerConfig, line::serve_connection, Relay};

const KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

struct LineClient {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl LineClient {
    async fn raw(&mut self, line: &str) -> Option<Value> {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.lines
            .next_line()
            .await
            .unwrap()
            .map(|l| serde_json::from_str(&l).unwrap())
    }

    async fn call(&mut self, request: Value) -> Value {
        self.raw(&request.to_string()).await.expect("response line")
    }
}

async fn connect(relay: &Relay) -> (LineClient, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(serve_connection(server, relay.clone(), rx));
    let (reader, writer) = tokio::io::split(client);
    let client = LineClient {
        lines: BufReader::new(reader).lines(),
        writer,
    };
    (client, tx, task)
}

#[tokio::test]
async fn legacy_client_session() {
    let relay = Relay::new(&ServerConfig::default()).await.unwrap();
    let (mut alice, _tx, _task) = connect(&relay).await;

    let resp = alice
        .call(json!({"type": "publish_key", "client_id": "alice", "pubkey": KEY}))
        .await;
    assert_eq!(resp["status"], "ok");

    let resp = alice
        .call(json!({"type": "get_key", "client_id": "alice"}))
        .await;
    assert_eq!(resp["pubkey"], KEY);

    let resp = alice
        .call(json!({"type": "list_all", "client_id": "alice"}))
        .await;
    assert_eq!(resp["clients"], json!([]));

    let resp = alice
        .call(json!({"type": "send_blob", "to": "bob", "from": "alice", "blob": "Zm9v"}))
        .await;
    assert_eq!(resp, json!({"status": "ok", "message": "queued"}));

    let resp = alice
        .call(json!({"type": "fetch_blobs", "client_id": "bob"}))
        .await;
    assert_eq!(resp["messages"][0]["blob"], "Zm9v");
    assert_eq!(resp["messages"][0]["id"], 1);
}

#[tokio::test]
async fn history_and_groups_are_reachable_over_lines() {
    let relay = Relay::new(&ServerConfig::default()).await.unwrap();
    let (mut c, _tx, _task) = connect(&relay).await;

    let resp = c
        .call(json!({"type": "create_group", "group_id": "g1", "members": ["bob", "carol"], "admin": "alice"}))
        .await;
    assert_eq!(resp["status"], "ok");
    let resp = c
        .call(json!({"type": "create_group", "group_id": "g1", "members": [], "admin": "zed"}))
        .await;
    assert_eq!(resp["status"], "error");

    let resp = c
        .call(json!({"type": "send_group_blob", "group_id": "g1", "from": "alice", "blob": "Zm9v"}))
        .await;
    assert_eq!(resp["status"], "ok");

    let resp = c.call(json!({"type": "list_groups", "member": "carol"})).await;
    assert_eq!(resp["groups"], json!(["g1"]));

    let resp = c
        .call(json!({"type": "fetch_history", "client_id": "bob", "since_id": 0}))
        .await;
    assert_eq!(resp["messages"][0]["group_id"], "g1");
    assert_eq!(resp["messages"][0]["type"], "group");
}

#[tokio::test]
async fn bad_lines_get_errors_without_closing() {
    let relay = Relay::new(&ServerConfig::default()).await.unwrap();
    let (mut c, _tx, _task) = connect(&relay).await;

    let resp = c.raw("this is not json").await.unwrap();
    assert_eq!(resp["status"], "error");
    let resp = c.call(json!({"type": "launch_missiles"})).await;
    assert_eq!(resp["status"], "error");
    let resp = c
        .call(json!({"type": "get_key", "client_id": "nobody"}))
        .await;
    assert_eq!(resp["status"], "error");
    assert!(resp["reason"].as_str().unwrap().contains("not found"));

    // Still serving.
    let resp = c.call(json!({"type": "list_clients"})).await;
    assert_eq!(resp["status"], "ok");
}

#[tokio::test]
async fn disconnect_answers_then_closes() {
    let relay = Relay::new(&ServerConfig::default()).await.unwrap();
    let (mut c, _tx, task) = connect(&relay).await;

    let resp = c
        .call(json!({"type": "disconnect", "client_id": "alice"}))
        .await;
    assert_eq!(resp["status"], "ok");
    task.await.unwrap();
    assert!(c.lines.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn shutdown_ends_the_connection() {
    let relay = Relay::new(&ServerConfig::default()).await.unwrap();
    let (_c, tx, task) = connect(&relay).await;
    tx.send(true).unwrap();
    task.await.unwrap();
}
