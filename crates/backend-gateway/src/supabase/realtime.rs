//! Realtime websocket: one connection per row-insert subscription.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{
    PhoenixMessage, EVENT_CLOSE, EVENT_ERROR, EVENT_POSTGRES_CHANGES, EVENT_REPLY, EVENT_SYSTEM,
    HEARTBEAT_TOPIC,
};
use crate::error::SubscriptionResult;
use crate::subscription::{ChannelStatus, ListenerId, ListenerRegistry, Subscription};
use crate::types::Row;

const PROTOCOL_VERSION: &str = "1.0.0";

/// Websocket endpoint for a project URL: `wss://<host>/realtime/v1/websocket`.
pub fn realtime_url(base: &Url, publishable_key: &str) -> SubscriptionResult<Url> {
    let scheme = match base.scheme() {
        "http" => "ws",
        _ => "wss",
    };
    let base = base.as_str().trim_end_matches('/');
    let rest = base.split_once("://").map(|(_, rest)| rest).unwrap_or(base);
    let mut url = Url::parse(&format!("{scheme}://{rest}/realtime/v1/websocket"))?;
    url.query_pairs_mut()
        .append_pair("apikey", publishable_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

/// Connects, then hands the socket to a background task that joins the
/// table channel and forwards inserts.
///
/// The returned subscription stays `Pending` until the join is
/// acknowledged. Releasing it aborts the task, which closes the socket.
pub async fn subscribe_inserts(
    endpoint: Url,
    table: String,
    access_token: String,
    heartbeat: Duration,
) -> SubscriptionResult<Subscription<Row>> {
    info!(table = %table, "Connecting to realtime");
    let (ws_stream, _) = connect_async(endpoint.as_str()).await?;

    let registry = ListenerRegistry::<Row>::new();
    let (id, subscription) = registry.register(ChannelStatus::Pending);

    let task = tokio::spawn(run_channel(
        ws_stream,
        registry,
        id,
        table,
        access_token,
        heartbeat,
    ));

    Ok(subscription.with_release_hook(move || task.abort()))
}

async fn run_channel<S>(
    ws_stream: S,
    registry: ListenerRegistry<Row>,
    id: ListenerId,
    table: String,
    access_token: String,
    heartbeat: Duration,
) where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = ws_stream.split();
    let mut channel = ChannelState::new(table);

    let join = PhoenixMessage::join(&channel.table, &access_token, &channel.join_ref);
    let sent = match join.to_json() {
        Ok(json) => write.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    };
    if !sent {
        registry.close(id, Some("failed to send channel join".to_string()));
        return;
    }
    debug!(table = %channel.table, "Sent channel join");

    let mut ticker = interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let reason = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(msg_ref) = channel.begin_heartbeat() else {
                    break Some("heartbeat timeout".to_string());
                };
                let Ok(json) = PhoenixMessage::heartbeat(&msg_ref).to_json() else {
                    continue;
                };
                if write.send(Message::Text(json.into())).await.is_err() {
                    break Some("heartbeat send failed".to_string());
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let msg = match PhoenixMessage::from_json(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(error = %e, "Failed to parse realtime message");
                                continue;
                            }
                        };
                        match handle_message(&msg, &registry, id, &mut channel) {
                            ChannelStep::Continue => {}
                            ChannelStep::Close(reason) => break reason,
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break Some("realtime connection closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Some(format!("realtime connection error: {e}"));
                    }
                }
            }
        }
    };

    warn!(table = %channel.table, reason = ?reason, "Realtime subscription closed");
    registry.close(id, reason);
}

/// Per-connection refs: the channel join, and the one heartbeat allowed in
/// flight. A heartbeat still unacknowledged at the next tick means the
/// connection is dead even if writes keep succeeding.
struct ChannelState {
    table: String,
    join_ref: String,
    last_ref: u64,
    pending_heartbeat: Option<String>,
}

impl ChannelState {
    fn new(table: String) -> Self {
        Self {
            table,
            join_ref: "1".to_string(),
            last_ref: 1,
            pending_heartbeat: None,
        }
    }

    /// Ref for the next heartbeat, or `None` if the previous one is unanswered.
    fn begin_heartbeat(&mut self) -> Option<String> {
        if self.pending_heartbeat.is_some() {
            return None;
        }
        self.last_ref += 1;
        let msg_ref = self.last_ref.to_string();
        self.pending_heartbeat = Some(msg_ref.clone());
        Some(msg_ref)
    }

    fn acknowledge_heartbeat(&mut self, msg_ref: Option<&str>) {
        if msg_ref.is_some() && self.pending_heartbeat.as_deref() == msg_ref {
            self.pending_heartbeat = None;
        }
    }
}

enum ChannelStep {
    Continue,
    Close(Option<String>),
}

fn handle_message(
    msg: &PhoenixMessage,
    registry: &ListenerRegistry<Row>,
    id: ListenerId,
    channel: &mut ChannelState,
) -> ChannelStep {
    let table = channel.table.as_str();
    match msg.event.as_str() {
        EVENT_REPLY if msg.topic == HEARTBEAT_TOPIC => {
            channel.acknowledge_heartbeat(msg.msg_ref.as_deref());
            ChannelStep::Continue
        }
        EVENT_REPLY if msg.msg_ref.as_deref() == Some(channel.join_ref.as_str()) => {
            match msg.status() {
                Some("ok") => {
                    info!(table = %table, "Realtime subscription active");
                    registry.set_status(id, ChannelStatus::Active);
                    ChannelStep::Continue
                }
                _ => ChannelStep::Close(Some(
                    msg.reason().unwrap_or_else(|| "channel join rejected".to_string()),
                )),
            }
        }
        EVENT_SYSTEM if msg.status() == Some("error") => ChannelStep::Close(msg.reason()),
        EVENT_ERROR | EVENT_CLOSE => ChannelStep::Close(Some(format!("channel {}", msg.event))),
        EVENT_POSTGRES_CHANGES => {
            if let Some(record) = msg.inserted_record() {
                debug!(table = %table, "Realtime insert received");
                if !registry.emit_to(id, record) {
                    return ChannelStep::Close(None);
                }
            }
            ChannelStep::Continue
        }
        _ => ChannelStep::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(status: &str, msg_ref: &str) -> PhoenixMessage {
        reply_on("realtime:public:posts", status, msg_ref)
    }

    fn reply_on(topic: &str, status: &str, msg_ref: &str) -> PhoenixMessage {
        PhoenixMessage::from_json(
            &json!({
                "topic": topic,
                "event": "phx_reply",
                "payload": { "status": status, "response": {} },
                "ref": msg_ref,
            })
            .to_string(),
        )
        .unwrap()
    }

    fn posts_channel() -> ChannelState {
        ChannelState::new("posts".to_string())
    }

    #[test]
    fn realtime_url_from_https_base() {
        let base = Url::parse("https://abc.supabase.co").unwrap();
        let url = realtime_url(&base, "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn realtime_url_from_local_http_base() {
        let base = Url::parse("http://127.0.0.1:54321/").unwrap();
        let url = realtime_url(&base, "anon").unwrap();
        assert!(url.as_str().starts_with("ws://127.0.0.1:54321/realtime/v1/websocket"));
    }

    #[tokio::test]
    async fn join_reply_ok_activates() {
        let registry = ListenerRegistry::<Row>::new();
        let (id, mut sub) = registry.register(ChannelStatus::Pending);

        let step = handle_message(&reply("ok", "1"), &registry, id, &mut posts_channel());
        assert!(matches!(step, ChannelStep::Continue));
        sub.wait_active().await.unwrap();
    }

    #[test]
    fn reply_to_other_ref_is_ignored() {
        let registry = ListenerRegistry::<Row>::new();
        let (id, sub) = registry.register(ChannelStatus::Pending);

        handle_message(&reply("ok", "2"), &registry, id, &mut posts_channel());
        assert_eq!(sub.status(), ChannelStatus::Pending);
    }

    #[test]
    fn join_reply_error_closes() {
        let registry = ListenerRegistry::<Row>::new();
        let (id, _sub) = registry.register(ChannelStatus::Pending);

        let step = handle_message(&reply("error", "1"), &registry, id, &mut posts_channel());
        assert!(matches!(step, ChannelStep::Close(Some(_))));
    }

    #[test]
    fn insert_is_forwarded() {
        let registry = ListenerRegistry::<Row>::new();
        let (id, mut sub) = registry.register(ChannelStatus::Active);

        let msg = PhoenixMessage::from_json(
            &json!({
                "topic": "realtime:public:posts",
                "event": "postgres_changes",
                "payload": { "data": { "type": "INSERT", "record": { "id": "p9" } } },
                "ref": null,
            })
            .to_string(),
        )
        .unwrap();

        handle_message(&msg, &registry, id, &mut posts_channel());
        assert_eq!(sub.try_recv().unwrap()["id"], "p9");
    }

    #[test]
    fn heartbeat_reply_clears_the_pending_ref() {
        let registry = ListenerRegistry::<Row>::new();
        let (id, sub) = registry.register(ChannelStatus::Active);
        let mut channel = posts_channel();

        let first = channel.begin_heartbeat().unwrap();
        assert_eq!(first, "2");

        // A reply for another ref does not count.
        handle_message(&reply_on("phoenix", "ok", "9"), &registry, id, &mut channel);
        assert_eq!(channel.pending_heartbeat.as_deref(), Some("2"));

        let step = handle_message(&reply_on("phoenix", "ok", &first), &registry, id, &mut channel);
        assert!(matches!(step, ChannelStep::Continue));
        assert_eq!(channel.pending_heartbeat, None);
        assert_eq!(channel.begin_heartbeat().as_deref(), Some("3"));
        assert_eq!(sub.status(), ChannelStatus::Active);
    }

    #[test]
    fn unanswered_heartbeat_blocks_the_next_one() {
        let mut channel = posts_channel();

        assert!(channel.begin_heartbeat().is_some());
        assert_eq!(channel.begin_heartbeat(), None);
    }

    #[test]
    fn heartbeat_reply_does_not_activate_a_pending_join() {
        let registry = ListenerRegistry::<Row>::new();
        let (id, sub) = registry.register(ChannelStatus::Pending);
        let mut channel = posts_channel();

        handle_message(&reply_on("phoenix", "ok", "1"), &registry, id, &mut channel);
        assert_eq!(sub.status(), ChannelStatus::Pending);
    }
}
