// Push-update connection manager.
//
// Owns the single persistent WebSocket connection to the platform's push
// origin. Establishes the connection, sends keep-alive pings while it is
// open, decodes inbound event frames, and re-establishes the connection
// after any close using exponential backoff with jitter. Decoded events are
// forwarded over an mpsc channel; this layer never touches the challenge
// cache directly.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::challenge::Challenge;

// ---------------------------------------------------------------------------
// Events and status
// ---------------------------------------------------------------------------

/// Events emitted by the connection manager to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The connection is open. `reconnect` is `false` only for the first
    /// successful open of the session, so consumers can show a "connected"
    /// notice exactly once instead of on every recovery.
    Connected { reconnect: bool },
    /// The connection closed (locally or remotely); a reconnect is pending.
    Disconnected,
    /// A participant toggled a challenge; carries the full updated payload.
    ChallengeToggled {
        challenge_id: i64,
        is_active: bool,
        challenge: Challenge,
    },
}

/// Lifecycle state of the push connection, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never started.
    Idle,
    /// Transport handshake in progress.
    Connecting,
    /// Live connection; keep-alive pings are being sent.
    Open,
    /// Waiting out the reconnect delay after a close or failed connect.
    Backoff,
    /// Stopped by the owner; terminal until `start()` is called again.
    Terminated,
}

// ---------------------------------------------------------------------------
// Endpoint derivation
// ---------------------------------------------------------------------------

/// Derive the push endpoint from the configured HTTP(S) API base URL:
/// rewrite the scheme to its WebSocket equivalent and append the
/// event-stream path.
pub fn push_endpoint(api_base: &str, path: &str) -> String {
    let base = api_base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https") {
        format!("wss{rest}")
    } else if let Some(rest) = base.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}{path}")
}

// ---------------------------------------------------------------------------
// Backoff policy
// ---------------------------------------------------------------------------

/// Reconnect delay policy: `min(cap, 2^attempt * base) + jitter`, with no
/// attempt limit. Transient connectivity loss self-heals without user
/// intervention.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_jitter: Duration,
}

impl BackoffPolicy {
    /// The delay for the given attempt number with the supplied jitter.
    /// Jitter is passed in so the deterministic part is unit-testable.
    pub fn delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap) + jitter
    }
}

/// A uniformly random jitter in `[0, max]`.
fn sample_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let ms = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(ms)
}

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

/// A recognized inbound frame. Anything else is dropped where it is parsed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Toggled {
        challenge_id: i64,
        is_active: bool,
        challenge: Challenge,
    },
    /// Keep-alive acknowledgment; liveness only, no side effect.
    Pong,
}

/// Decode a text frame from the push origin.
///
/// Returns `None` for malformed JSON, unknown frame types, and toggle
/// frames missing any of their three required fields — all are logged and
/// dropped, never fatal to the connection.
pub(crate) fn decode_frame(text: &str) -> Option<Frame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("dropping malformed push frame: {e}");
            return None;
        }
    };

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        warn!("dropping push frame without a type field");
        return None;
    };

    match kind {
        "challenge_toggled" | "challenge_updated" => {
            let (Some(challenge_id), Some(is_active), Some(challenge_value)) = (
                value.get("challenge_id").and_then(Value::as_i64),
                value.get("is_active").and_then(Value::as_bool),
                value.get("challenge").cloned(),
            ) else {
                warn!(kind, "dropping toggle frame with missing fields");
                return None;
            };
            match serde_json::from_value::<Challenge>(challenge_value) {
                Ok(challenge) => Some(Frame::Toggled {
                    challenge_id,
                    is_active,
                    challenge,
                }),
                Err(e) => {
                    warn!(kind, challenge_id, "dropping toggle frame with bad challenge payload: {e}");
                    None
                }
            }
        }
        "pong" => Some(Frame::Pong),
        other => {
            debug!(kind = other, "ignoring unknown push frame type");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Connection driver
// ---------------------------------------------------------------------------

/// Drive one open connection: forward decoded events through `events` and
/// send a `"ping"` text frame every `keepalive` interval. Returns when the
/// transport closes or errors (`Ok`), or when the event channel is closed
/// because the consumer went away (`Err`).
///
/// Generic over the sink/stream halves so it can be exercised with
/// in-memory frames without opening sockets.
pub(crate) async fn drive_connection<W, R>(
    mut write: W,
    mut read: R,
    keepalive: Duration,
    events: &mpsc::Sender<PushEvent>,
) -> Result<(), ()>
where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut ping_timer = tokio::time::interval(keepalive);
    // The first tick completes immediately; consume it so the first ping
    // goes out one full interval after open.
    ping_timer.tick().await;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(Frame::Toggled { challenge_id, is_active, challenge }) =
                        decode_frame(text.as_str())
                    {
                        let event = PushEvent::ChallengeToggled {
                            challenge_id,
                            is_active,
                            challenge,
                        };
                        if events.send(event).await.is_err() {
                            return Err(());
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("push origin sent close frame");
                    return Ok(());
                }
                Some(Ok(_)) => {
                    // Ignore Binary, Ping, Pong, Frame variants.
                }
                Some(Err(e)) => {
                    warn!("push connection error: {e}");
                    return Ok(());
                }
                None => return Ok(()),
            },
            _ = ping_timer.tick() => {
                if let Err(e) = write.send(Message::Text("ping".into())).await {
                    warn!("keep-alive ping failed: {e}");
                    return Ok(());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PushClient
// ---------------------------------------------------------------------------

/// Settings for the push connection, assembled from the client config.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub endpoint: String,
    pub keepalive: Duration,
    pub backoff: BackoffPolicy,
}

/// Owns the push connection task and its timers.
///
/// There is exactly one `PushClient` per application; the connect/reconnect
/// loop, keep-alive timer, and backoff timer all live inside the spawned
/// task, so aborting the task cancels every pending timer and closes the
/// transport in one step.
pub struct PushClient {
    config: PushConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
}

impl PushClient {
    pub fn new(config: PushConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);
        PushClient {
            config,
            status_tx,
            task: None,
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status transitions (connected/not-connected indicator).
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Whether the connection task is live.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the connection loop. Idempotent: if the task is already live
    /// this is a no-op returning `false`, so a second concurrent transport
    /// to the same endpoint can never be opened.
    pub fn start(&mut self, events: mpsc::Sender<PushEvent>) -> bool {
        if self.is_running() {
            debug!("push client already running, ignoring start");
            return false;
        }
        let config = self.config.clone();
        let status = self.status_tx.clone();
        self.task = Some(tokio::spawn(run_loop(config, status, events)));
        true
    }

    /// Stop the connection loop. Aborting the task synchronously cancels
    /// the keep-alive and reconnect timers it owns and drops the transport.
    /// Safe to call any number of times; `start()` recovers from it.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("push client stopped");
        }
        self.status_tx.send_replace(ConnectionStatus::Terminated);
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The connect/reconnect loop. Runs until the event channel's consumer goes
/// away; there is no attempt limit.
async fn run_loop(
    config: PushConfig,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::Sender<PushEvent>,
) {
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        status.send_replace(ConnectionStatus::Connecting);
        match connect_async(&config.endpoint).await {
            Ok((stream, _response)) => {
                info!(
                    endpoint = %config.endpoint,
                    reconnect = ever_connected,
                    "push connection open"
                );
                attempt = 0;
                status.send_replace(ConnectionStatus::Open);
                let connected = PushEvent::Connected {
                    reconnect: ever_connected,
                };
                if events.send(connected).await.is_err() {
                    return;
                }
                ever_connected = true;

                let (write, read) = stream.split();
                let consumer_gone =
                    drive_connection(write, read, config.keepalive, &events)
                        .await
                        .is_err();

                status.send_replace(ConnectionStatus::Backoff);
                if consumer_gone || events.send(PushEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(endpoint = %config.endpoint, "push connect failed: {e}");
                status.send_replace(ConnectionStatus::Backoff);
            }
        }

        let delay = config
            .backoff
            .delay(attempt, sample_jitter(config.backoff.max_jitter));
        attempt = attempt.saturating_add(1);
        debug!(attempt, ?delay, "scheduling push reconnect");
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
