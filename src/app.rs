// Application orchestrator.
//
// One event loop joins the three input sources: push events from the
// connection manager, user commands, and completions of spawned REST calls.
// The loop is the only writer of the challenge store, so every cache
// mutation is serialized here. Outcomes surface to the UI as typed updates
// on a channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, Page};
use crate::challenge::Challenge;
use crate::push::PushEvent;
use crate::store::{ChallengeStore, ViewId};

/// Commands from the user-facing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Activate a view; serves the cache or refetches if stale.
    SwitchView(ViewId),
    /// Optimistically flip a toggle challenge, then confirm server-side.
    ToggleChallenge(i64),
    /// Join a challenge; invalidates the joined view on success.
    JoinChallenge(i64),
    /// Force a refetch of the active view.
    Refresh,
    Quit,
}

/// Updates for the user-facing layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Push connection came up or went down.
    ConnectionChanged { online: bool },
    /// One-shot informational notice.
    Toast(String),
    /// Fresh contents for a view, in server order.
    ViewSnapshot {
        view: ViewId,
        challenges: Vec<Challenge>,
    },
    Error(String),
}

/// Completion of a spawned REST call, delivered back into the loop.
#[derive(Debug)]
enum ApiOutcome {
    ViewFetched {
        view: ViewId,
        generation: u64,
        result: Result<Vec<Challenge>, ApiError>,
    },
    ToggleConfirmed {
        challenge_id: i64,
        result: Result<Challenge, ApiError>,
    },
    Joined {
        challenge_id: i64,
        result: Result<Challenge, ApiError>,
    },
}

pub struct App {
    store: ChallengeStore,
    api: Arc<ApiClient>,
    active_view: ViewId,
    /// Monotonic fetch generation per view. A completed fetch is applied
    /// only if its generation still matches, so a slow response can never
    /// clobber the result of a newer request.
    fetch_generation: HashMap<ViewId, u64>,
    ui_tx: mpsc::Sender<UiUpdate>,
    api_tx: mpsc::Sender<ApiOutcome>,
}

/// Internal channel for REST completions plus the app that feeds it.
pub struct AppChannels {
    api_rx: mpsc::Receiver<ApiOutcome>,
}

impl App {
    pub fn new(api: Arc<ApiClient>, ui_tx: mpsc::Sender<UiUpdate>) -> (Self, AppChannels) {
        let (api_tx, api_rx) = mpsc::channel(32);
        let app = App {
            store: ChallengeStore::new(),
            api,
            active_view: ViewId::All,
            fetch_generation: HashMap::new(),
            ui_tx,
            api_tx,
        };
        (app, AppChannels { api_rx })
    }

    /// Run until `Quit`, the command channel closes, or the UI goes away.
    pub async fn run(
        mut self,
        channels: AppChannels,
        mut push_rx: mpsc::Receiver<PushEvent>,
        mut cmd_rx: mpsc::Receiver<UserCommand>,
    ) {
        let mut api_rx = channels.api_rx;
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = push_rx.recv() => {
                    self.handle_push_event(event).await;
                }
                Some(outcome) = api_rx.recv() => {
                    self.handle_api_outcome(outcome).await;
                }
                else => break,
            }
        }
        info!("application loop stopped");
    }

    /// Returns `false` on `Quit`.
    async fn handle_command(&mut self, cmd: UserCommand) -> bool {
        match cmd {
            UserCommand::SwitchView(view) => {
                self.active_view = view;
                if self.store.is_stale(view) {
                    self.start_view_fetch(view);
                } else {
                    self.emit_snapshot(view).await;
                }
            }
            UserCommand::ToggleChallenge(challenge_id) => {
                if self.store.apply_optimistic_toggle(challenge_id) {
                    self.emit_snapshot(self.active_view).await;
                } else {
                    debug!(challenge_id, "toggle requested for uncached or non-toggle challenge");
                }
                let api = Arc::clone(&self.api);
                let api_tx = self.api_tx.clone();
                tokio::spawn(async move {
                    let result = api.toggle_challenge(challenge_id).await;
                    let _ = api_tx
                        .send(ApiOutcome::ToggleConfirmed {
                            challenge_id,
                            result,
                        })
                        .await;
                });
            }
            UserCommand::JoinChallenge(challenge_id) => {
                let api = Arc::clone(&self.api);
                let api_tx = self.api_tx.clone();
                tokio::spawn(async move {
                    let result = api.join_challenge(challenge_id).await;
                    let _ = api_tx
                        .send(ApiOutcome::Joined {
                            challenge_id,
                            result,
                        })
                        .await;
                });
            }
            UserCommand::Refresh => {
                self.start_view_fetch(self.active_view);
            }
            UserCommand::Quit => return false,
        }
        true
    }

    async fn handle_push_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::Connected { reconnect } => {
                self.send_ui(UiUpdate::ConnectionChanged { online: true }).await;
                if reconnect {
                    // Events may have been missed during the gap; everything
                    // cached is suspect. Refetch the active view now, the
                    // rest on their next activation.
                    for view in ViewId::ALL_VIEWS {
                        self.store.invalidate(view);
                    }
                    self.start_view_fetch(self.active_view);
                } else {
                    self.send_ui(UiUpdate::Toast("Live updates connected".to_string()))
                        .await;
                }
            }
            PushEvent::Disconnected => {
                self.send_ui(UiUpdate::ConnectionChanged { online: false }).await;
            }
            PushEvent::ChallengeToggled {
                challenge_id,
                challenge,
                ..
            } => {
                if self.store.apply_remote_update(challenge_id, &challenge) {
                    self.emit_snapshot(self.active_view).await;
                } else {
                    debug!(challenge_id, "push update for challenge not in any view");
                }
            }
        }
    }

    async fn handle_api_outcome(&mut self, outcome: ApiOutcome) {
        match outcome {
            ApiOutcome::ViewFetched {
                view,
                generation,
                result,
            } => {
                if self.current_generation(view) != generation {
                    debug!(view = view.as_str(), generation, "discarding stale view fetch");
                    return;
                }
                match result {
                    Ok(entries) => {
                        self.store.populate(view, entries);
                        if view == self.active_view {
                            self.emit_snapshot(view).await;
                        }
                    }
                    Err(e) => {
                        warn!(view = view.as_str(), "view fetch failed: {e}");
                        self.send_ui(UiUpdate::Error(format!("Could not load challenges: {e}")))
                            .await;
                    }
                }
            }
            ApiOutcome::ToggleConfirmed {
                challenge_id,
                result,
            } => match result {
                Ok(confirmed) => {
                    // Confirmation normally matches the optimistic edit and
                    // leaves the cache unchanged; if another write raced us,
                    // the server's state wins.
                    self.store.apply_remote_update(challenge_id, &confirmed);
                    self.emit_snapshot(self.active_view).await;
                }
                Err(e) => {
                    warn!(challenge_id, "toggle confirmation failed: {e}");
                    self.send_ui(UiUpdate::Error(format!("Toggle failed: {e}"))).await;
                    // The optimistic edit is now wrong; recover by refetching
                    // rather than computing an inverse edit.
                    self.store.invalidate(self.active_view);
                    self.start_view_fetch(self.active_view);
                }
            },
            ApiOutcome::Joined {
                challenge_id,
                result,
            } => match result {
                Ok(joined) => {
                    self.send_ui(UiUpdate::Toast(format!("Joined \"{}\"", joined.name)))
                        .await;
                    self.store.invalidate(ViewId::Joined);
                    if self.active_view == ViewId::Joined {
                        self.start_view_fetch(ViewId::Joined);
                    }
                }
                Err(e) => {
                    warn!(challenge_id, "join failed: {e}");
                    self.send_ui(UiUpdate::Error(format!("Join failed: {e}"))).await;
                }
            },
        }
    }

    fn current_generation(&self, view: ViewId) -> u64 {
        self.fetch_generation.get(&view).copied().unwrap_or(0)
    }

    /// Kick off an async snapshot fetch for a view under a new generation.
    fn start_view_fetch(&mut self, view: ViewId) {
        let generation = self.current_generation(view) + 1;
        self.fetch_generation.insert(view, generation);

        let api = Arc::clone(&self.api);
        let api_tx = self.api_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_view(view, Page::default()).await;
            let _ = api_tx
                .send(ApiOutcome::ViewFetched {
                    view,
                    generation,
                    result,
                })
                .await;
        });
    }

    async fn emit_snapshot(&self, view: ViewId) {
        self.send_ui(UiUpdate::ViewSnapshot {
            view,
            challenges: self.store.entries(view).to_vec(),
        })
        .await;
    }

    async fn send_ui(&self, update: UiUpdate) {
        if self.ui_tx.send(update).await.is_err() {
            debug!("ui channel closed, dropping update");
        }
    }
}
