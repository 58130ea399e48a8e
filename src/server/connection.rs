// SPDX-License-Identifier: Apache-2.0 OR MIT
// Socket acceptor and per-connection protocol handling.

use super::{current_min_level, post_notice, query, writer, ServerState};
use crate::error::LogError;
use crate::levels::parse_level;
use crate::message::{
    LogMessage, ProtocolMessage, CONNECTION_TIMEOUT, MAX_FRAME_SIZE, MSG_ERROR, MSG_GET_ENTRIES,
    MSG_GET_LOG_FILE, MSG_LOG, MSG_LOG_FILE, MSG_PING, MSG_PONG, MSG_RESPONSE, MSG_SET_LEVEL,
    MSG_UPDATE_LEVEL,
};
use crate::security::validate_message;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

/// Simultaneous client ceiling for the embedded profile
const MAX_CONNECTIONS: usize = 10;

/// Pause imposed on a client that tripped the rate limiter
const RATE_LIMIT_PENALTY: Duration = Duration::from_secs(1);

/// Back-off after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type Wire = Framed<UnixStream, LinesCodec>;

/// Accept loop. Connections over the cap are closed immediately; everything
/// else gets a `client_<N>` identity and its own task.
pub(crate) async fn run_acceptor(state: Arc<ServerState>, listener: UnixListener) {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let at_capacity = state.clients.read().unwrap().len() >= MAX_CONNECTIONS;
                        if at_capacity {
                            drop(stream);
                            continue;
                        }

                        let id = state.conn_counter.fetch_add(1, Ordering::Relaxed) + 1;
                        let client_id = format!("client_{}", id);
                        state.clients.write().unwrap().insert(client_id.clone());
                        state.stats.current_clients.fetch_add(1, Ordering::Relaxed);
                        state.stats.total_clients.fetch_add(1, Ordering::Relaxed);

                        let tracker = state.connections.clone();
                        let state = Arc::clone(&state);
                        tracker.spawn(async move {
                            handle_client(state, stream, client_id).await;
                        });
                    }
                    Err(_) => tokio::time::sleep(ACCEPT_RETRY_DELAY).await,
                }
            }
        }
    }
}

/// One task per accepted connection. The read deadline is refreshed on each
/// iteration; a decode failure, an oversized frame, the deadline or daemon
/// shutdown all land in the single teardown path at the bottom.
async fn handle_client(state: Arc<ServerState>, stream: UnixStream, client_id: String) {
    let mut wire = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_SIZE));

    loop {
        let frame = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            frame = timeout(CONNECTION_TIMEOUT, wire.next()) => frame,
        };

        let line = match frame {
            Err(_elapsed) => {
                let _ = send(&mut wire, MSG_ERROR, json!("read timeout")).await;
                break;
            }
            Ok(None) => break,               // client disconnected
            Ok(Some(Err(_))) => break,       // oversized frame or invalid utf-8
            Ok(Some(Ok(line))) => line,
        };

        if !state.limiter.is_allowed(&client_id) {
            let _ = send(&mut wire, MSG_ERROR, json!("rate limited")).await;
            tokio::time::sleep(RATE_LIMIT_PENALTY).await;
            continue;
        }

        let Ok(request) = serde_json::from_str::<ProtocolMessage>(&line) else {
            break;
        };

        match request.msg_type.as_str() {
            MSG_LOG => handle_log(&state, request.data, &client_id),
            MSG_GET_ENTRIES => handle_get_entries(&state, request.data, &mut wire).await,
            MSG_UPDATE_LEVEL | MSG_SET_LEVEL => {
                handle_update_level(&state, request.data, &mut wire).await
            }
            MSG_GET_LOG_FILE => {
                let path = state.config.log_file.display().to_string();
                let _ = send(&mut wire, MSG_LOG_FILE, json!(path)).await;
            }
            MSG_PING => {
                let _ = send(&mut wire, MSG_PONG, json!("pong")).await;
            }
            other => {
                let err = LogError::Unsupported(other.to_string());
                let _ = send(&mut wire, MSG_ERROR, json!(err.to_string())).await;
            }
        }
    }

    state.clients.write().unwrap().remove(&client_id);
    state.stats.current_clients.fetch_sub(1, Ordering::Relaxed);
}

async fn send(wire: &mut Wire, msg_type: &str, data: Value) -> Result<(), ()> {
    let Ok(payload) = serde_json::to_string(&ProtocolMessage::new(msg_type, data)) else {
        return Err(());
    };
    match timeout(CONNECTION_TIMEOUT, wire.send(payload)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

/// Ingress admission. Rejections are silent: the client gets no response
/// and nothing is written.
pub(crate) fn handle_log(state: &ServerState, data: Value, client_id: &str) {
    let Ok(incoming) = serde_json::from_value::<LogMessage>(data) else {
        return;
    };
    if validate_message(&incoming, &state.security).is_err() {
        return;
    }
    if incoming.level < current_min_level(state) {
        return;
    }
    if state.config.restrict_services
        && !state.config.services.iter().any(|s| *s == incoming.service)
    {
        return;
    }

    let mut msg = state.pool.acquire();
    msg.service = incoming.service;
    msg.level = incoming.level;
    msg.message = incoming.message;
    msg.timestamp = incoming.timestamp;
    msg.client_id.push_str(client_id);

    match state.ingress.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(msg)) => {
            // Channel saturated: ERROR and above bypass the queue, the
            // rest are dropped.
            if msg.level >= crate::levels::LogLevel::Error {
                writer::write_message(state, &msg);
            }
            state.pool.release(msg);
        }
        Err(TrySendError::Closed(msg)) => state.pool.release(msg),
    }
}

async fn handle_get_entries(state: &ServerState, data: Value, wire: &mut Wire) {
    let Ok(filter) = serde_json::from_value(data) else {
        let _ = send(wire, MSG_ERROR, json!("invalid filter data")).await;
        return;
    };
    match query::get_entries(state, &filter) {
        Ok(entries) => {
            let data = serde_json::to_value(entries).unwrap_or(Value::Null);
            let _ = send(wire, MSG_RESPONSE, data).await;
        }
        Err(e) => {
            let _ = send(wire, MSG_ERROR, json!(e.to_string())).await;
        }
    }
}

async fn handle_update_level(state: &ServerState, data: Value, wire: &mut Wire) {
    let Ok(level_str) = serde_json::from_value::<String>(data) else {
        let _ = send(wire, MSG_ERROR, json!("invalid level data")).await;
        return;
    };
    match parse_level(&level_str) {
        Ok(level) => {
            state.min_level.store(level as u8, Ordering::Relaxed);
            post_notice(state, &format!("log level changed to {}", level));
            let _ = send(wire, MSG_RESPONSE, json!("log level updated")).await;
        }
        Err(e) => {
            let _ = send(wire, MSG_ERROR, json!(e.to_string())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::LogLevel;
    use crate::server::test_support::{state_for, temp_config};

    fn log_payload(service: &str, level: LogLevel, text: &str) -> Value {
        json!({ "service": service, "level": level.as_u8(), "message": text })
    }

    fn fresh_state(
        tag: &str,
        buffer_size: usize,
    ) -> (
        Arc<ServerState>,
        tokio::sync::mpsc::Receiver<LogMessage>,
    ) {
        let mut config = temp_config(tag);
        config.buffer_size = buffer_size;
        if let Some(dir) = config.log_file.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
        let (state, rx) = state_for(config);
        writer::init_log_file(&state).unwrap();
        (state, rx)
    }

    #[test]
    fn test_log_admission_enqueues() {
        let (state, mut rx) = fresh_state("admit", 8);
        handle_log(&state, log_payload("API", LogLevel::Info, "hello"), "client_1");

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.service, "API");
        assert_eq!(msg.message, "hello");
        assert_eq!(msg.client_id, "client_1");
    }

    #[test]
    fn test_log_below_min_level_dropped() {
        let (state, mut rx) = fresh_state("minlevel", 8);
        state.min_level.store(LogLevel::Warn as u8, Ordering::Relaxed);

        handle_log(&state, log_payload("API", LogLevel::Info, "quiet"), "client_1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_log_invalid_service_dropped() {
        let (state, mut rx) = fresh_state("badservice", 8);
        handle_log(
            &state,
            log_payload("lower case", LogLevel::Info, "nope"),
            "client_1",
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_log_restricted_services() {
        let mut config = temp_config("restrict");
        config.services = vec!["DNS".to_string()];
        config.restrict_services = true;
        if let Some(dir) = config.log_file.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
        let (state, mut rx) = state_for(config);

        handle_log(&state, log_payload("API", LogLevel::Info, "no"), "client_1");
        assert!(rx.try_recv().is_err());

        handle_log(&state, log_payload("DNS", LogLevel::Info, "yes"), "client_1");
        assert_eq!(rx.try_recv().unwrap().service, "DNS");
    }

    #[test]
    fn test_backpressure_drops_info_keeps_error() {
        let (state, _rx) = fresh_state("backpressure", 1);

        // Saturate the single-slot channel
        handle_log(&state, log_payload("API", LogLevel::Info, "fills"), "client_1");

        // A further INFO is dropped silently
        handle_log(&state, log_payload("API", LogLevel::Info, "dropped"), "client_1");
        let content = std::fs::read_to_string(&state.config.log_file).unwrap();
        assert!(!content.contains("dropped"));

        // An ERROR takes the direct path to the file
        handle_log(
            &state,
            log_payload("API", LogLevel::Error, "kept"),
            "client_1",
        );
        let content = std::fs::read_to_string(&state.config.log_file).unwrap();
        assert!(content.contains("\"kept\""));
    }

    #[test]
    fn test_malformed_log_payload_dropped() {
        let (state, mut rx) = fresh_state("malformed", 8);
        handle_log(&state, json!({ "level": 1 }), "client_1");
        handle_log(&state, json!("not an object"), "client_1");
        handle_log(&state, json!({ "service": "API", "level": 99, "message": "x" }), "client_1");
        assert!(rx.try_recv().is_err());
    }
}
