//! The notification center: one view's worth of notification state.
//!
//! A single task owns the [`NotificationFeed`] and processes, one at a time:
//! live events from the relay, history load completions, mark-read
//! completions, transport reconnects, and commands from handles. Network
//! requests run in spawned tasks and report back through a completion
//! channel, so a slow request never blocks live events.
//!
//! Closing the center discards the list. Responses that arrive afterwards
//! find no receiver and are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::NotificationApi;
use crate::config::FeedConfig;
use crate::error::{ClientError, Result};
use crate::metrics::FeedMetrics;
use crate::notification::{
    HistoryLoader, HistoryOutcome, LiveOutcome, LoadTicket, NotificationFeed, NotificationId,
    NotificationRecord, ReadState, ShipmentUpdate,
};
use crate::relay::RelaySubscription;
use crate::transport::ChannelStatus;

const COMMAND_BUFFER_SIZE: usize = 32;

/// Snapshot of the notification list
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedView {
    pub records: Vec<NotificationRecord>,
    pub unread_count: usize,
    /// At least one history load has been applied
    pub history_loaded: bool,
}

/// Result of a mark-read call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkReadOutcome {
    /// Server confirmed; local flag flipped
    Marked,
    /// Already read; no request sent
    AlreadyRead,
    /// No listed record has this id; no request sent
    NotFound,
    /// A request for this id is still pending; no request sent
    InFlight,
    /// Request failed; local state unchanged
    Failed,
}

impl MarkReadOutcome {
    fn as_label(self) -> &'static str {
        match self {
            MarkReadOutcome::Marked => "marked",
            MarkReadOutcome::AlreadyRead => "already_read",
            MarkReadOutcome::NotFound => "not_found",
            MarkReadOutcome::InFlight => "in_flight",
            MarkReadOutcome::Failed => "failed",
        }
    }
}

enum Command {
    MarkRead {
        id: NotificationId,
        reply: oneshot::Sender<MarkReadOutcome>,
    },
    Refresh,
}

enum Completion {
    History {
        ticket: LoadTicket,
        result: Result<Vec<NotificationRecord>>,
        elapsed: Duration,
    },
    MarkRead {
        id: NotificationId,
        result: Result<()>,
    },
}

/// Cloneable handle to a running notification center
#[derive(Clone)]
pub struct NotificationCenterHandle {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<FeedView>,
    shutdown: broadcast::Sender<()>,
}

impl NotificationCenterHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Mark a notification read once the server confirms it
    pub async fn mark_read(&self, id: impl Into<NotificationId>) -> Result<MarkReadOutcome> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::MarkRead {
                id: id.into(),
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)
    }

    /// Start another history load
    pub async fn refresh(&self) -> Result<()> {
        self.commands
            .send(Command::Refresh)
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub fn snapshot(&self) -> FeedView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    /// Stream of views, starting with the current one
    pub fn updates(&self) -> WatchStream<FeedView> {
        WatchStream::new(self.view.clone())
    }

    /// Tear the view down
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Owner task of the notification list
pub struct NotificationCenter {
    feed: NotificationFeed,
    loader: HistoryLoader,
    api: Arc<dyn NotificationApi>,
    history_limit: u32,
    backfill_on_reconnect: bool,
    history_loaded: bool,
    live: RelaySubscription,
    live_open: bool,
    channel_status: Option<watch::Receiver<ChannelStatus>>,
    last_epoch: u64,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    pending_reads: HashMap<NotificationId, oneshot::Sender<MarkReadOutcome>>,
    view: watch::Sender<FeedView>,
    shutdown: broadcast::Receiver<()>,
}

impl NotificationCenter {
    /// Spawn a center fed by `live` and start the initial history load
    ///
    /// `channel_status` enables history backfill after transport reconnects.
    pub fn start(
        api: Arc<dyn NotificationApi>,
        config: &FeedConfig,
        live: RelaySubscription,
        channel_status: Option<watch::Receiver<ChannelStatus>>,
    ) -> (NotificationCenterHandle, JoinHandle<()>) {
        let session_id = Uuid::new_v4();
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(FeedView::default());
        let (shutdown_tx, shutdown) = broadcast::channel(1);

        let defaults = config.record_defaults();
        let last_epoch = channel_status
            .as_ref()
            .map(|rx| rx.borrow().epoch)
            .unwrap_or(0);

        let center = Self {
            feed: NotificationFeed::new(config.history_policy, defaults.clone()),
            loader: HistoryLoader::new(api.clone(), defaults),
            api,
            history_limit: config.history_limit,
            backfill_on_reconnect: config.backfill_on_reconnect,
            history_loaded: false,
            live,
            live_open: true,
            channel_status,
            last_epoch,
            commands,
            completions_tx,
            completions_rx,
            pending_reads: HashMap::new(),
            view: view_tx,
            shutdown,
        };

        let span = tracing::info_span!("notification_center", session_id = %session_id);
        let task = tokio::spawn(center.run().instrument(span));

        let handle = NotificationCenterHandle {
            session_id,
            commands: commands_tx,
            view: view_rx,
            shutdown: shutdown_tx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        tracing::info!(
            policy = ?self.feed.policy(),
            history_limit = self.history_limit,
            "Notification center started"
        );
        self.start_history_load("initial");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle dropped
                    None => break,
                },
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion);
                }
                payload = self.live.recv(), if self.live_open => match payload {
                    Some(payload) => self.handle_live(payload),
                    None => {
                        tracing::warn!("Live relay closed, no further live events");
                        self.live_open = false;
                    }
                },
                status = next_status(&mut self.channel_status) => match status {
                    Some(status) => self.handle_channel_status(status),
                    None => self.channel_status = None,
                },
            }
        }

        self.feed.close();
        self.pending_reads.clear();
        self.publish_view();
        tracing::info!("Notification center closed");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::MarkRead { id, reply } => self.mark_read(id, reply),
            Command::Refresh => self.start_history_load("refresh"),
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::History {
                ticket,
                result,
                elapsed,
            } => self.apply_history(ticket, result, elapsed),
            Completion::MarkRead { id, result } => self.finish_mark_read(id, result),
        }
    }

    fn handle_live(&mut self, payload: Value) {
        let update = match ShipmentUpdate::from_payload(payload) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected live notification payload");
                FeedMetrics::record_live_event("rejected");
                return;
            }
        };

        let id = update.id.clone();
        match self.feed.accept_live(update, Utc::now()) {
            LiveOutcome::Prepended => {
                FeedMetrics::record_live_event("accepted");
                tracing::debug!(notification_id = ?id, "Live notification added");
                self.publish_view();
            }
            LiveOutcome::Duplicate => {
                FeedMetrics::record_live_event("duplicate");
                tracing::debug!(notification_id = ?id, "Live notification already listed");
            }
            // Only reachable once the feed is closed
            LiveOutcome::Ignored => {}
        }
    }

    fn handle_channel_status(&mut self, status: ChannelStatus) {
        if status.epoch <= self.last_epoch {
            return;
        }
        let reconnected = self.last_epoch > 0;
        self.last_epoch = status.epoch;

        if reconnected && self.backfill_on_reconnect {
            tracing::info!(epoch = status.epoch, "Transport reconnected, backfilling history");
            self.start_history_load("reconnect");
        }
    }

    fn start_history_load(&mut self, reason: &'static str) {
        let ticket = self.feed.begin_history_load();
        let loader = self.loader.clone();
        let limit = self.history_limit;
        let completions = self.completions_tx.clone();

        tracing::debug!(reason, generation = ticket.generation(), limit, "Loading history");

        tokio::spawn(async move {
            let started = Instant::now();
            let result = loader.fetch_recent(limit).await;
            let _ = completions.send(Completion::History {
                ticket,
                result,
                elapsed: started.elapsed(),
            });
        });
    }

    fn apply_history(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<NotificationRecord>>,
        elapsed: Duration,
    ) {
        FeedMetrics::observe_history_latency(elapsed);

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                FeedMetrics::record_history_load("error");
                tracing::error!(error = %e, kind = e.kind(), "Failed to load notification history");
                return;
            }
        };

        let outcome = self.feed.apply_history(ticket, records);
        FeedMetrics::record_history_load(outcome.as_label());
        match outcome {
            HistoryOutcome::Stale => {
                tracing::debug!(generation = ticket.generation(), "Discarded stale history load");
            }
            HistoryOutcome::Applied {
                loaded,
                kept_live,
                dropped_live,
            } => {
                if dropped_live > 0 {
                    tracing::warn!(
                        dropped_live,
                        "History load replaced live notifications received during the load"
                    );
                }
                tracing::info!(loaded, kept_live, elapsed_ms = elapsed.as_millis() as u64, "History applied");
                self.history_loaded = true;
                self.publish_view();
            }
        }
    }

    fn mark_read(&mut self, id: NotificationId, reply: oneshot::Sender<MarkReadOutcome>) {
        let immediate = match self.feed.read_state(&id) {
            ReadState::Read => Some(MarkReadOutcome::AlreadyRead),
            ReadState::Missing => Some(MarkReadOutcome::NotFound),
            ReadState::Unread if self.pending_reads.contains_key(&id) => {
                Some(MarkReadOutcome::InFlight)
            }
            ReadState::Unread => None,
        };

        if let Some(outcome) = immediate {
            FeedMetrics::record_mark_read(outcome.as_label());
            let _ = reply.send(outcome);
            return;
        }

        self.pending_reads.insert(id.clone(), reply);
        let api = self.api.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.mark_read(&id).await;
            let _ = completions.send(Completion::MarkRead { id, result });
        });
    }

    fn finish_mark_read(&mut self, id: NotificationId, result: Result<()>) {
        let outcome = match result {
            Ok(()) => {
                self.feed.mark_read_local(&id);
                self.publish_view();
                MarkReadOutcome::Marked
            }
            Err(e) => {
                tracing::warn!(notification_id = %id, error = %e, "Failed to mark notification read");
                MarkReadOutcome::Failed
            }
        };

        FeedMetrics::record_mark_read(outcome.as_label());
        if let Some(reply) = self.pending_reads.remove(&id) {
            let _ = reply.send(outcome);
        }
    }

    fn publish_view(&self) {
        let unread_count = self.feed.unread_count();
        FeedMetrics::set_list_size(self.feed.len(), unread_count);
        self.view.send_replace(FeedView {
            records: self.feed.records().to_vec(),
            unread_count,
            history_loaded: self.history_loaded,
        });
    }
}

/// Next transport status change; `None` once the channel is gone
async fn next_status(rx: &mut Option<watch::Receiver<ChannelStatus>>) -> Option<ChannelStatus> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}
