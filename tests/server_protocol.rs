// Wire-level tests: a raw socket client speaking newline-delimited JSON
// against a running daemon, plus the real client library end to end.

mod common;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use slogd::{FilterOptions, LogClient, LogLevel, LogServer};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{Framed, LinesCodec};

const STEP: Duration = Duration::from_millis(300);

async fn connect(server: &LogServer) -> Framed<UnixStream, LinesCodec> {
    let stream = UnixStream::connect(server.socket_path())
        .await
        .expect("daemon socket reachable");
    Framed::new(stream, LinesCodec::new())
}

/// Send one envelope and read one reply envelope.
async fn roundtrip(
    wire: &mut Framed<UnixStream, LinesCodec>,
    msg_type: &str,
    data: Value,
) -> Value {
    send(wire, msg_type, data).await;
    let line = timeout(Duration::from_secs(5), wire.next())
        .await
        .expect("reply before deadline")
        .expect("connection open")
        .expect("valid frame");
    serde_json::from_str(&line).expect("reply is json")
}

async fn send(wire: &mut Framed<UnixStream, LinesCodec>, msg_type: &str, data: Value) {
    let frame = serde_json::to_string(&json!({ "type": msg_type, "data": data })).unwrap();
    wire.send(frame).await.expect("send succeeds");
}

#[tokio::test]
async fn test_ping_pong() {
    let config = common::test_config("ping");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut wire = connect(&server).await;
    let reply = roundtrip(&mut wire, "ping", json!("PING")).await;
    assert_eq!(reply["type"], "pong");
    assert_eq!(reply["data"], "pong");

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_log_message_reaches_file() {
    let config = common::test_config("log");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut wire = connect(&server).await;
    send(
        &mut wire,
        "log",
        json!({ "service": "API", "level": 1, "message": "hello from test" }),
    )
    .await;
    sleep(STEP).await;

    let content = std::fs::read_to_string(&config.log_file).unwrap();
    assert!(content.contains("\"hello from test\""));
    assert!(content.contains("[API "));
    assert!(content.contains("server started"));

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_query_filters_by_service_and_level() {
    let config = common::test_config("query");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut wire = connect(&server).await;
    send(&mut wire, "log", json!({ "service": "API", "level": 1, "message": "info line" })).await;
    send(&mut wire, "log", json!({ "service": "DB", "level": 3, "message": "db error" })).await;
    send(&mut wire, "log", json!({ "service": "API", "level": 3, "message": "api error" })).await;
    sleep(STEP).await;

    let reply = roundtrip(
        &mut wire,
        "get_entries",
        json!({ "service": "API", "level": 3, "limit": 10 }),
    )
    .await;
    assert_eq!(reply["type"], "response");

    let entries = reply["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["service"], "API");
    assert_eq!(entries[0]["message"], "api error");

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_bad_filter_is_rejected() {
    let config = common::test_config("badfilter");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut wire = connect(&server).await;
    let reply = roundtrip(&mut wire, "get_entries", json!({ "limit": 20000 })).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["data"].as_str().unwrap().contains("limit"));

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_update_level_and_set_level_are_aliases() {
    let config = common::test_config("levels");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut wire = connect(&server).await;

    let reply = roundtrip(&mut wire, "update_level", json!("ERROR")).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(server.min_level(), LogLevel::Error);

    // Below the new floor: silently discarded
    send(&mut wire, "log", json!({ "service": "API", "level": 1, "message": "too quiet" })).await;
    sleep(STEP).await;
    let content = std::fs::read_to_string(&config.log_file).unwrap();
    assert!(!content.contains("too quiet"));

    // The alias behaves identically
    let reply = roundtrip(&mut wire, "set_level", json!("debug")).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(server.min_level(), LogLevel::Debug);

    send(&mut wire, "log", json!({ "service": "API", "level": 1, "message": "audible again" })).await;
    sleep(STEP).await;
    let content = std::fs::read_to_string(&config.log_file).unwrap();
    assert!(content.contains("audible again"));
    assert!(content.contains("log level changed to ERROR"));

    let reply = roundtrip(&mut wire, "set_level", json!("NOISE")).await;
    assert_eq!(reply["type"], "error");

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_get_log_file_reports_configured_path() {
    let config = common::test_config("logfile");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut wire = connect(&server).await;
    let reply = roundtrip(&mut wire, "get_log_file", json!("")).await;
    assert_eq!(reply["type"], "log_file");
    assert_eq!(
        reply["data"].as_str().unwrap(),
        config.log_file.display().to_string()
    );

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_unknown_type_gets_error_reply() {
    let config = common::test_config("unknown");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut wire = connect(&server).await;
    let reply = roundtrip(&mut wire, "frobnicate", json!(null)).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["data"]
        .as_str()
        .unwrap()
        .contains("unsupported request type: frobnicate"));

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let config = common::test_config("oversize");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let mut stream = UnixStream::connect(&config.socket_path).await.unwrap();
    let huge = format!(
        r#"{{"type":"log","data":{{"service":"API","level":1,"message":"{}"}}}}"#,
        "x".repeat(4096)
    );
    stream.write_all(huge.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    // The daemon drops the connection instead of parsing the frame
    let mut buffer = Vec::new();
    let read = timeout(Duration::from_secs(5), stream.read_to_end(&mut buffer)).await;
    assert!(matches!(read, Ok(Ok(0))));

    // And keeps serving new connections
    let mut wire = connect(&server).await;
    let reply = roundtrip(&mut wire, "ping", json!("PING")).await;
    assert_eq!(reply["type"], "pong");

    server.stop().await.unwrap();
    common::cleanup(&config);
}

#[tokio::test]
async fn test_client_library_end_to_end() {
    let config = common::test_config("client");
    let server = LogServer::new(config.clone()).unwrap();
    server.start().await.unwrap();

    let client = LogClient::connect(config.clone()).await.unwrap();
    client.ping().await.unwrap();

    client.log("MAIN", LogLevel::Info, "client says hi").await.unwrap();
    client.log("MAIN", LogLevel::Error, "client error").await.unwrap();
    sleep(STEP).await;

    let entries = client
        .get_entries(&FilterOptions {
            service: Some("MAIN".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message, "client says hi");
    assert_eq!(entries[1].message, "client error");
    assert_eq!(entries[1].level, LogLevel::Error);

    // The configured path short-circuits the round trip
    assert_eq!(client.get_log_file().await.unwrap(), config.log_file);

    client.set_server_level(LogLevel::Warn).await.unwrap();
    assert_eq!(server.min_level(), LogLevel::Warn);

    // Local floor: the client does not even send below its own level
    client.set_level(LogLevel::Error);
    client.log("MAIN", LogLevel::Warn, "held back locally").await.unwrap();
    sleep(STEP).await;
    let content = std::fs::read_to_string(&config.log_file).unwrap();
    assert!(!content.contains("held back locally"));

    client.close().await;
    server.stop().await.unwrap();
    common::cleanup(&config);
}
