//! Realtime `postgres_changes` channels over the Phoenix WebSocket protocol.
//!
//! [`RealtimeClient::subscribe`] opens a socket, joins one channel and hands
//! back a [`RealtimeChannel`]: a receiver of [`ChannelEvent`]s plus a
//! [`ChannelHandle`] that owns the socket task. Each channel gets its own
//! socket so that dropping the handle releases everything.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::{Result, SupabaseError};

/// Interval between Phoenix heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long `unsubscribe` waits for the socket task to say goodbye.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A Phoenix channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    fn join(topic: &str, filter: &PostgresChangesFilter, token: &str, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [filter],
                },
                "access_token": token,
            }),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    fn leave(topic: &str, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    fn heartbeat(msg_ref: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }
}

/// Which row changes a channel listens for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostgresChangesFilter {
    pub event: String,
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PostgresChangesFilter {
    /// All change events (`*`) on `public.<table>`.
    pub fn all(table: &str) -> Self {
        Self {
            event: "*".to_string(),
            schema: "public".to_string(),
            table: table.to_string(),
            filter: None,
        }
    }

    /// Restrict to rows where `column` equals `value` (`column=eq.value`).
    pub fn with_eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value.to_string()));
        self
    }
}

/// Events delivered on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server confirmed the join.
    Subscribed,
    /// A row change; the payload is the server's `data` object.
    Change(serde_json::Value),
    /// The server rejected the join or reported a channel error.
    Error(String),
    /// The socket or channel closed.
    Closed,
}

/// Builds Realtime sockets for one project.
pub struct RealtimeClient {
    base_url: Url,
    anon_key: SecretBox<str>,
    access_token: Option<String>,
}

impl RealtimeClient {
    pub(crate) fn new(base_url: Url, anon_key: &str, access_token: Option<String>) -> Self {
        Self {
            base_url,
            anon_key: SecretBox::new(Box::from(anon_key)),
            access_token,
        }
    }

    /// WebSocket URL for the project's Realtime endpoint.
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = self.base_url.join("realtime/v1/websocket")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(SupabaseError::Config(format!(
                    "unsupported scheme for realtime: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SupabaseError::Config("cannot switch to websocket scheme".into()))?;
        url.query_pairs_mut()
            .append_pair("apikey", self.anon_key.expose_secret())
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    /// Open a socket and join `realtime:<channel>` listening for `filter`.
    ///
    /// Returns as soon as the join has been sent; the server's confirmation
    /// arrives as [`ChannelEvent::Subscribed`].
    pub async fn subscribe(
        &self,
        channel: &str,
        filter: PostgresChangesFilter,
    ) -> Result<RealtimeChannel> {
        let url = self.socket_url()?;
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SupabaseError::Realtime(format!("connect failed: {}", e)))?;

        let topic = format!("realtime:{}", channel);
        let token = self
            .access_token
            .clone()
            .unwrap_or_else(|| self.anon_key.expose_secret().to_string());

        let (mut write, read) = ws.split();
        let join_ref = 1;
        send(&mut write, &PhoenixMessage::join(&topic, &filter, &token, join_ref)).await?;
        tracing::info!(topic = %topic, filter = ?filter.filter, "Joined realtime channel");

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (leave_tx, leave_rx) = oneshot::channel();
        let task = tokio::spawn(run_channel(
            write,
            read,
            ChannelState {
                topic: topic.clone(),
                join_ref: join_ref.to_string(),
                next_ref: join_ref,
            },
            event_tx,
            leave_rx,
        ));

        Ok(RealtimeChannel {
            events: event_rx,
            handle: ChannelHandle {
                topic,
                leave: Some(leave_tx),
                task: Some(task),
            },
        })
    }
}

/// A joined channel.
pub struct RealtimeChannel {
    pub events: mpsc::Receiver<ChannelEvent>,
    pub handle: ChannelHandle,
}

/// Owns the socket task of a channel. Dropping it aborts the task.
pub struct ChannelHandle {
    topic: String,
    leave: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send `phx_leave`, close the socket and wait for the task to finish.
    pub async fn unsubscribe(mut self) {
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
        }
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(LEAVE_TIMEOUT, task).await.is_err() {
                tracing::warn!(topic = %self.topic, "Realtime channel did not close in time");
                abort.abort();
            }
        }
        tracing::debug!(topic = %self.topic, "Left realtime channel");
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ChannelState {
    topic: String,
    join_ref: String,
    next_ref: u64,
}

impl ChannelState {
    fn next_ref(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }
}

async fn send(write: &mut SplitSink<WsStream, Message>, msg: &PhoenixMessage) -> Result<()> {
    let text = serde_json::to_string(msg)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| SupabaseError::Realtime(e.to_string()))
}

async fn run_channel(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    mut state: ChannelState,
    events: mpsc::Sender<ChannelEvent>,
    mut leave: oneshot::Receiver<()>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let msg = PhoenixMessage::heartbeat(state.next_ref());
                if let Err(e) = send(&mut write, &msg).await {
                    tracing::warn!(topic = %state.topic, error = %e, "Heartbeat failed");
                    let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                    break;
                }
            }
            _ = &mut leave => {
                let msg_ref = state.next_ref();
                let msg = PhoenixMessage::leave(&state.topic, msg_ref);
                let _ = send(&mut write, &msg).await;
                let _ = write.close().await;
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<PhoenixMessage>(&text) {
                        Ok(msg) => {
                            if let Some(event) = classify(&msg, &state.topic, &state.join_ref) {
                                if events.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, raw_message = %text, "Failed to parse realtime frame");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(topic = %state.topic, ?frame, "Realtime socket closed");
                    let _ = events.send(ChannelEvent::Closed).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(topic = %state.topic, error = %e, "Realtime receive error");
                    let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    let _ = events.send(ChannelEvent::Closed).await;
                    break;
                }
            }
        }
    }
}

/// Map a server frame to a channel event. Frames for other topics
/// (heartbeat replies on `phoenix`) and informational frames yield `None`.
pub(crate) fn classify(msg: &PhoenixMessage, topic: &str, join_ref: &str) -> Option<ChannelEvent> {
    if msg.topic != topic {
        return None;
    }

    match msg.event.as_str() {
        "phx_reply" if msg.msg_ref.as_deref() == Some(join_ref) => {
            match msg.payload.get("status").and_then(|s| s.as_str()) {
                Some("ok") => Some(ChannelEvent::Subscribed),
                _ => Some(ChannelEvent::Error(reply_reason(&msg.payload))),
            }
        }
        "postgres_changes" => Some(ChannelEvent::Change(
            msg.payload
                .get("data")
                .cloned()
                .unwrap_or_else(|| msg.payload.clone()),
        )),
        "system" if msg.payload.get("status").and_then(|s| s.as_str()) == Some("error") => {
            Some(ChannelEvent::Error(reply_reason(&msg.payload)))
        }
        "phx_error" => Some(ChannelEvent::Error("channel error".to_string())),
        "phx_close" => Some(ChannelEvent::Closed),
        _ => None,
    }
}

fn reply_reason(payload: &serde_json::Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(|r| r.as_str())
        .unwrap_or("subscription rejected")
        .to_string()
}
