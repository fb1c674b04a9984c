//! Realtime channel over the backend's Phoenix websocket

use std::sync::Arc;
use std::time::Duration;

use campus_backend_traits::{BackendError, ConversationScope, FeedEvent, MessageRow};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;

use crate::records::MessageRecord;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const JOIN_REF: &str = "1";

/// Websocket endpoint for `base_url` (`http(s)` becomes `ws(s)`).
pub(crate) fn realtime_url(base_url: &str, anon_key: &str) -> Result<String, BackendError> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(BackendError::Transport(format!(
            "unsupported backend url: {base_url}"
        )));
    };
    Ok(format!(
        "{ws_base}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0"
    ))
}

pub(crate) fn topic(scope: &ConversationScope) -> String {
    format!("realtime:campus:{}", scope.key())
}

/// Server-side INSERT filters. Private scopes listen to both authors and
/// leave the recipient check to [`ConversationScope::matches`].
fn change_filters(scope: &ConversationScope) -> Vec<Value> {
    let filters = match scope {
        ConversationScope::Club { club_id } => vec![format!("club_id=eq.{club_id}")],
        ConversationScope::Private { peer_a, peer_b } if peer_a == peer_b => {
            vec![format!("sender_id=eq.{peer_a}")]
        }
        ConversationScope::Private { peer_a, peer_b } => vec![
            format!("sender_id=eq.{peer_a}"),
            format!("sender_id=eq.{peer_b}"),
        ],
    };
    filters
        .into_iter()
        .map(|filter| {
            json!({
                "event": "INSERT",
                "schema": "public",
                "table": "messages",
                "filter": filter,
            })
        })
        .collect()
}

pub(crate) fn join_frame(scope: &ConversationScope, access_token: &str) -> String {
    json!({
        "topic": topic(scope),
        "event": "phx_join",
        "payload": {
            "config": { "postgres_changes": change_filters(scope) },
            "access_token": access_token,
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    })
    .to_string()
}

fn heartbeat_frame(seq: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": format!("hb-{seq}"),
    })
    .to_string()
}

fn leave_frame(scope: &ConversationScope) -> String {
    json!({
        "topic": topic(scope),
        "event": "phx_leave",
        "payload": {},
        "ref": "leave",
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// What an incoming frame means for the channel.
#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    JoinOk,
    JoinRejected(String),
    Insert(MessageRow),
    Closed(String),
    Ignore,
}

pub(crate) fn decode_frame(text: &str, scope: &ConversationScope) -> Inbound {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(%e, "undecodable realtime frame");
            return Inbound::Ignore;
        }
    };
    let own_topic = frame.topic == topic(scope);
    match frame.event.as_str() {
        "phx_reply" if own_topic && frame.reference.as_deref() == Some(JOIN_REF) => {
            if frame.payload["status"] == "ok" {
                Inbound::JoinOk
            } else {
                Inbound::JoinRejected(frame.payload["response"].to_string())
            }
        }
        "postgres_changes" if own_topic => {
            let data = &frame.payload["data"];
            if data["type"] != "INSERT" {
                return Inbound::Ignore;
            }
            match MessageRecord::deserialize(&data["record"]) {
                Ok(record) => {
                    let row = MessageRow::from(record);
                    if scope.matches(&row) {
                        Inbound::Insert(row)
                    } else {
                        Inbound::Ignore
                    }
                }
                Err(e) => {
                    tracing::warn!(%e, "undecodable realtime record");
                    Inbound::Ignore
                }
            }
        }
        "phx_error" | "phx_close" if own_topic => Inbound::Closed(frame.event),
        _ => Inbound::Ignore,
    }
}

/// Connect, join the scope's channel and wait for the join reply.
pub(crate) async fn open_channel(
    url: &str,
    scope: &ConversationScope,
    access_token: &str,
) -> Result<WsStream, BackendError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| BackendError::Transport(format!("realtime connect failed: {e}")))?;
    ws.send(Message::Text(join_frame(scope, access_token).into()))
        .await
        .map_err(|e| BackendError::Transport(format!("realtime join failed: {e}")))?;

    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| BackendError::ChannelClosed(e.to_string()))?;
        let Message::Text(text) = msg else {
            continue;
        };
        match decode_frame(text.as_str(), scope) {
            Inbound::JoinOk => return Ok(ws),
            Inbound::JoinRejected(response) => {
                return Err(BackendError::Rejected {
                    status: 403,
                    message: format!("realtime join rejected: {response}"),
                });
            }
            Inbound::Closed(reason) => return Err(BackendError::ChannelClosed(reason)),
            Inbound::Insert(_) | Inbound::Ignore => {}
        }
    }
    Err(BackendError::ChannelClosed(
        "socket closed before join reply".to_string(),
    ))
}

/// Pump frames into `events` until the socket drops, the consumer goes away,
/// or `stop` is notified.
pub(crate) async fn run_channel(
    mut ws: WsStream,
    scope: ConversationScope,
    events: mpsc::UnboundedSender<FeedEvent>,
    stop: Arc<Notify>,
    heartbeat_every: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;
    let mut seq: u64 = 0;

    let reason = loop {
        tokio::select! {
            _ = stop.notified() => {
                let _ = ws.send(Message::Text(leave_frame(&scope).into())).await;
                let _ = ws.close(None).await;
                tracing::debug!(topic = %topic(&scope), "realtime channel closed by consumer");
                return;
            }
            _ = heartbeat.tick() => {
                seq += 1;
                if let Err(e) = ws.send(Message::Text(heartbeat_frame(seq).into())).await {
                    break format!("heartbeat failed: {e}");
                }
            }
            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break "socket closed".to_string(),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break e.to_string(),
                };
                match decode_frame(text.as_str(), &scope) {
                    Inbound::Insert(row) => {
                        if events.send(FeedEvent::Insert(row)).is_err() {
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                    Inbound::Closed(reason) => break reason,
                    Inbound::JoinOk | Inbound::JoinRejected(_) | Inbound::Ignore => {}
                }
            }
        }
    };

    tracing::info!(topic = %topic(&scope), %reason, "realtime channel dropped");
    let _ = events.send(FeedEvent::Closed { reason });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_frame(scope: &ConversationScope, record: Value) -> String {
        json!({
            "topic": topic(scope),
            "event": "postgres_changes",
            "payload": { "data": { "type": "INSERT", "record": record } },
            "ref": null,
        })
        .to_string()
    }

    #[test]
    fn realtime_url_swaps_scheme() {
        assert_eq!(
            realtime_url("https://x.example.co", "k").unwrap(),
            "wss://x.example.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
        assert!(realtime_url("ftp://x", "k").is_err());
    }

    #[test]
    fn join_frame_filters_private_scope_by_both_authors() {
        let scope = ConversationScope::private("bob", "alice");
        let frame: Value = serde_json::from_str(&join_frame(&scope, "tok")).unwrap();
        assert_eq!(frame["topic"], "realtime:campus:private:alice:bob");
        let filters: Vec<&str> = frame["payload"]["config"]["postgres_changes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["filter"].as_str().unwrap())
            .collect();
        assert_eq!(filters, vec!["sender_id=eq.alice", "sender_id=eq.bob"]);
    }

    #[test]
    fn join_reply_is_recognized() {
        let scope = ConversationScope::club("chess");
        let ok = json!({
            "topic": topic(&scope),
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": JOIN_REF,
        })
        .to_string();
        assert_eq!(decode_frame(&ok, &scope), Inbound::JoinOk);

        let err = ok.replace("\"ok\"", "\"error\"");
        assert!(matches!(decode_frame(&err, &scope), Inbound::JoinRejected(_)));
    }

    #[test]
    fn inserts_outside_the_scope_are_ignored() {
        let scope = ConversationScope::private("alice", "bob");
        let ours = insert_frame(
            &scope,
            json!({
                "id": "m1", "sender_id": "bob", "receiver_id": "alice",
                "content": "hi", "created_at": "2025-03-01T10:00:00Z"
            }),
        );
        let theirs = insert_frame(
            &scope,
            json!({
                "id": "m2", "sender_id": "bob", "receiver_id": "carol",
                "content": "psst", "created_at": "2025-03-01T10:00:01Z"
            }),
        );
        assert!(matches!(decode_frame(&ours, &scope), Inbound::Insert(row) if row.id == "m1"));
        assert_eq!(decode_frame(&theirs, &scope), Inbound::Ignore);
    }

    #[test]
    fn channel_errors_close_the_feed() {
        let scope = ConversationScope::club("chess");
        let frame = json!({ "topic": topic(&scope), "event": "phx_error", "payload": {} });
        assert_eq!(
            decode_frame(&frame.to_string(), &scope),
            Inbound::Closed("phx_error".to_string())
        );
        assert_eq!(decode_frame("not json", &scope), Inbound::Ignore);
    }
}
