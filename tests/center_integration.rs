//! Notification center integration tests
//!
//! The center runs against a scripted in-memory API and a real relay, so
//! the interleaving of history loads and live events is fully controlled.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;

use ara_notification_client::api::NotificationApi;
use ara_notification_client::center::{
    FeedView, MarkReadOutcome, NotificationCenter, NotificationCenterHandle,
};
use ara_notification_client::config::FeedConfig;
use ara_notification_client::error::{ClientError, Result};
use ara_notification_client::notification::{
    HistoryPolicy, NotificationId, RawNotification, RecordOrigin,
};
use ara_notification_client::relay::LiveEventRelay;
use ara_notification_client::transport::{ChannelState, ChannelStatus};

const WAIT: Duration = Duration::from_secs(2);

/// API whose history responses are released by the test
#[derive(Default)]
struct ScriptedApi {
    page: Mutex<Vec<Value>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    list_calls: AtomicUsize,
    mark_calls: AtomicUsize,
    mark_delay: Mutex<Option<Duration>>,
    fail_marks: AtomicBool,
    fail_lists: AtomicBool,
}

impl ScriptedApi {
    fn with_page(page: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            page: Mutex::new(page),
            ..Self::default()
        })
    }

    /// Hold the next history response until the returned sender fires
    fn hold_next_load(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(gate);
        release
    }
}

#[async_trait]
impl NotificationApi for ScriptedApi {
    async fn list_notifications(&self, _limit: u32) -> Result<Vec<RawNotification>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let page = self.page.lock().unwrap().clone();
        Ok(page
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect())
    }

    async fn mark_read(&self, _id: &NotificationId) -> Result<()> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.mark_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(())
    }

    async fn emit_test(&self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    api: Arc<ScriptedApi>,
    relay: LiveEventRelay,
    center: NotificationCenterHandle,
    task: tokio::task::JoinHandle<()>,
}

fn start(api: Arc<ScriptedApi>, policy: HistoryPolicy) -> Harness {
    start_with_status(api, policy, None)
}

fn start_with_status(
    api: Arc<ScriptedApi>,
    policy: HistoryPolicy,
    status: Option<watch::Receiver<ChannelStatus>>,
) -> Harness {
    let config = FeedConfig {
        history_policy: policy,
        ..FeedConfig::default()
    };
    let relay = LiveEventRelay::new(16);
    let (center, task) = NotificationCenter::start(api.clone(), &config, relay.subscribe(), status);
    Harness {
        api,
        relay,
        center,
        task,
    }
}

async fn wait_for(
    center: &NotificationCenterHandle,
    predicate: impl FnMut(&FeedView) -> bool,
) -> FeedView {
    let mut rx = center.watch();
    let view = timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for view")
        .expect("center dropped its view");
    view.clone()
}

fn titles(view: &FeedView) -> Vec<&str> {
    view.records.iter().map(|r| r.title.as_str()).collect()
}

fn history_record(id: i64, title: &str, is_read: bool) -> Value {
    json!({
        "id": id,
        "title": title,
        "message": "m",
        "createdAt": "2024-05-01T10:00:00Z",
        "icon": "icons/box.png",
        "color": "info",
        "isRead": is_read,
    })
}

// =============================================================================
// History / live reconciliation
// =============================================================================

mod reconciliation_tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_drops_live_event_received_during_load() {
        let api = ScriptedApi::with_page(vec![history_record(1, "A", false)]);
        let release = api.hold_next_load();
        let h = start(api, HistoryPolicy::Replace);

        h.relay.publish(json!({ "id": 99, "title": "E" }));
        wait_for(&h.center, |v| v.records.len() == 1).await;

        release.send(()).unwrap();
        let view = wait_for(&h.center, |v| v.history_loaded).await;
        assert_eq!(titles(&view), vec!["A"]);
    }

    #[tokio::test]
    async fn test_merge_keeps_live_event_received_during_load() {
        let api = ScriptedApi::with_page(vec![history_record(1, "A", false)]);
        let release = api.hold_next_load();
        let h = start(api, HistoryPolicy::Merge);

        h.relay.publish(json!({ "id": 99, "title": "E" }));
        wait_for(&h.center, |v| v.records.len() == 1).await;

        release.send(()).unwrap();
        let view = wait_for(&h.center, |v| v.history_loaded).await;
        assert_eq!(titles(&view), vec!["E", "A"]);
        assert_eq!(view.records[0].origin, RecordOrigin::Live);
        assert_eq!(view.unread_count, 2);
    }

    #[tokio::test]
    async fn test_history_wins_over_live_copy_of_same_id() {
        let api = ScriptedApi::with_page(vec![history_record(5, "persisted", true)]);
        let release = api.hold_next_load();
        let h = start(api, HistoryPolicy::Merge);

        h.relay.publish(json!({ "id": 5, "title": "live" }));
        wait_for(&h.center, |v| v.records.len() == 1).await;

        release.send(()).unwrap();
        let view = wait_for(&h.center, |v| v.history_loaded).await;
        assert_eq!(titles(&view), vec!["persisted"]);
        assert_eq!(view.unread_count, 0);
    }

    #[tokio::test]
    async fn test_live_events_are_newest_first() {
        let h = start(ScriptedApi::with_page(vec![]), HistoryPolicy::Merge);
        wait_for(&h.center, |v| v.history_loaded).await;

        h.relay.publish(json!({ "id": 1, "title": "A" }));
        h.relay.publish(json!({ "id": 2, "title": "B" }));

        let view = wait_for(&h.center, |v| v.records.len() == 2).await;
        assert_eq!(titles(&view), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_duplicate_live_event_is_not_listed_twice() {
        let h = start(
            ScriptedApi::with_page(vec![history_record(5, "A", false)]),
            HistoryPolicy::Merge,
        );
        wait_for(&h.center, |v| v.history_loaded).await;

        h.relay.publish(json!({ "id": 5, "title": "again" }));
        h.relay.publish(json!({ "id": 6, "title": "B" }));

        let view = wait_for(&h.center, |v| v.records.len() == 2).await;
        assert_eq!(titles(&view), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_live_fallbacks_and_rejected_payloads() {
        let h = start(ScriptedApi::with_page(vec![]), HistoryPolicy::Merge);
        wait_for(&h.center, |v| v.history_loaded).await;

        h.relay.publish(json!("not an object"));
        h.relay.publish(json!({}));

        let view = wait_for(&h.center, |v| !v.records.is_empty()).await;
        assert_eq!(view.records.len(), 1);
        let record = &view.records[0];
        assert_eq!(record.title, "Actualización de envío");
        assert_eq!(record.message, "Se ha actualizado un envío");
        assert_eq!(record.icon, "assets/images/notification/shipping.png");
        assert_eq!(record.color, "success");
        assert!(record.id.is_none());
        assert!(!record.time.is_empty());
    }

    #[tokio::test]
    async fn test_history_fallbacks_for_icon_and_color() {
        let api = ScriptedApi::with_page(vec![json!({ "id": 1, "title": "A", "isRead": false })]);
        let h = start(api, HistoryPolicy::Merge);

        let view = wait_for(&h.center, |v| v.history_loaded).await;
        assert_eq!(view.records[0].icon, "assets/images/notification/shipping.png");
        assert_eq!(view.records[0].color, "success");
        assert_eq!(view.records[0].time, "");
    }

    #[tokio::test]
    async fn test_reconnect_triggers_backfill() {
        let (status_tx, status_rx) = watch::channel(ChannelStatus {
            state: ChannelState::Connected,
            epoch: 1,
        });
        let h = start_with_status(
            ScriptedApi::with_page(vec![history_record(1, "A", false)]),
            HistoryPolicy::Merge,
            Some(status_rx),
        );
        wait_for(&h.center, |v| v.history_loaded).await;
        assert_eq!(h.api.list_calls.load(Ordering::SeqCst), 1);

        status_tx.send_replace(ChannelStatus {
            state: ChannelState::Disconnected,
            epoch: 1,
        });
        status_tx.send_replace(ChannelStatus {
            state: ChannelState::Connected,
            epoch: 2,
        });

        timeout(WAIT, async {
            while h.api.list_calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no backfill after reconnect");
    }
}

// =============================================================================
// Refresh
// =============================================================================

mod refresh_tests {
    use super::*;

    async fn wait_for_list_calls(api: &ScriptedApi, calls: usize) {
        timeout(WAIT, async {
            while api.list_calls.load(Ordering::SeqCst) < calls {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("history was not requested");
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_list_unchanged() {
        let h = start(
            ScriptedApi::with_page(vec![history_record(1, "H", false)]),
            HistoryPolicy::Merge,
        );
        wait_for(&h.center, |v| v.history_loaded).await;
        h.relay.publish(json!({ "id": 2, "title": "L" }));
        wait_for(&h.center, |v| v.records.len() == 2).await;

        h.api.fail_lists.store(true, Ordering::SeqCst);
        h.center.refresh().await.unwrap();
        wait_for_list_calls(&h.api, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let view = h.center.snapshot();
        assert_eq!(titles(&view), vec!["L", "H"]);
        assert!(view.history_loaded);
        // No retry after the failure
        assert_eq!(h.api.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_initial_load_keeps_live_events_flowing() {
        let api = ScriptedApi::with_page(vec![history_record(1, "H", false)]);
        api.fail_lists.store(true, Ordering::SeqCst);
        let h = start(api, HistoryPolicy::Merge);
        wait_for_list_calls(&h.api, 1).await;

        h.relay.publish(json!({ "id": 2, "title": "L" }));
        let view = wait_for(&h.center, |v| v.records.len() == 1).await;
        assert_eq!(titles(&view), vec!["L"]);
        assert!(!view.history_loaded);
        assert_eq!(h.api.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_history() {
        let h = start(
            ScriptedApi::with_page(vec![history_record(1, "A", false)]),
            HistoryPolicy::Merge,
        );
        wait_for(&h.center, |v| v.history_loaded).await;

        *h.api.page.lock().unwrap() = vec![
            history_record(2, "B", false),
            history_record(1, "A", true),
        ];
        h.center.refresh().await.unwrap();

        let view = wait_for(&h.center, |v| v.records.len() == 2).await;
        assert_eq!(titles(&view), vec!["B", "A"]);
        assert_eq!(view.unread_count, 1);
        assert_eq!(h.api.list_calls.load(Ordering::SeqCst), 2);
    }
}

// =============================================================================
// Mark as read
// =============================================================================

mod mark_read_tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let h = start(
            ScriptedApi::with_page(vec![history_record(1, "A", false)]),
            HistoryPolicy::Merge,
        );
        wait_for(&h.center, |v| v.history_loaded).await;

        assert_eq!(h.center.mark_read(1).await.unwrap(), MarkReadOutcome::Marked);
        assert_eq!(h.center.mark_read(1).await.unwrap(), MarkReadOutcome::AlreadyRead);

        assert_eq!(h.api.mark_calls.load(Ordering::SeqCst), 1);
        let view = h.center.snapshot();
        assert_eq!(view.records[0].is_read, Some(true));
        assert_eq!(view.unread_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_mark_read_sends_one_request() {
        let api = ScriptedApi::with_page(vec![history_record(1, "A", false)]);
        *api.mark_delay.lock().unwrap() = Some(Duration::from_millis(100));
        let h = start(api, HistoryPolicy::Merge);
        wait_for(&h.center, |v| v.history_loaded).await;

        let (first, second) = tokio::join!(h.center.mark_read(1), h.center.mark_read(1));
        assert_eq!(first.unwrap(), MarkReadOutcome::Marked);
        assert_eq!(second.unwrap(), MarkReadOutcome::InFlight);
        assert_eq!(h.api.mark_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_read_sends_nothing() {
        let h = start(
            ScriptedApi::with_page(vec![history_record(1, "A", true)]),
            HistoryPolicy::Merge,
        );
        wait_for(&h.center, |v| v.history_loaded).await;

        assert_eq!(h.center.mark_read(1).await.unwrap(), MarkReadOutcome::AlreadyRead);
        assert_eq!(h.center.mark_read(42).await.unwrap(), MarkReadOutcome::NotFound);
        assert_eq!(h.api.mark_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_mark_read_leaves_state_unchanged() {
        let api = ScriptedApi::with_page(vec![history_record(1, "A", false)]);
        api.fail_marks.store(true, Ordering::SeqCst);
        let h = start(api, HistoryPolicy::Merge);
        wait_for(&h.center, |v| v.history_loaded).await;

        assert_eq!(h.center.mark_read(1).await.unwrap(), MarkReadOutcome::Failed);
        let view = h.center.snapshot();
        assert_eq!(view.records[0].is_read, Some(false));
        assert_eq!(view.unread_count, 1);

        // A later attempt is allowed once the first one settled
        h.api.fail_marks.store(false, Ordering::SeqCst);
        assert_eq!(h.center.mark_read(1).await.unwrap(), MarkReadOutcome::Marked);
        assert_eq!(h.api.mark_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_live_record_can_be_marked_read() {
        let h = start(ScriptedApi::with_page(vec![]), HistoryPolicy::Merge);
        wait_for(&h.center, |v| v.history_loaded).await;

        h.relay.publish(json!({ "id": 8, "title": "live" }));
        wait_for(&h.center, |v| v.unread_count == 1).await;

        assert_eq!(h.center.mark_read(8).await.unwrap(), MarkReadOutcome::Marked);
        let view = wait_for(&h.center, |v| v.unread_count == 0).await;
        assert_eq!(view.records[0].is_read, Some(true));
    }
}

// =============================================================================
// Teardown
// =============================================================================

mod teardown_tests {
    use super::*;

    #[tokio::test]
    async fn test_close_discards_late_history_response() {
        let api = ScriptedApi::with_page(vec![history_record(1, "A", false)]);
        let release = api.hold_next_load();
        let h = start(api, HistoryPolicy::Merge);

        h.center.close();
        timeout(WAIT, h.task).await.unwrap().unwrap();

        // The response arrives after teardown and has nowhere to go
        let _ = release.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let view = h.center.snapshot();
        assert!(view.records.is_empty());
        assert!(!view.history_loaded);
        assert!(matches!(h.center.mark_read(1).await, Err(ClientError::Closed)));
        assert!(matches!(h.center.refresh().await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_close_clears_list_and_detaches_from_relay() {
        let h = start(ScriptedApi::with_page(vec![]), HistoryPolicy::Merge);
        wait_for(&h.center, |v| v.history_loaded).await;

        h.relay.publish(json!({ "id": 1 }));
        wait_for(&h.center, |v| v.records.len() == 1).await;

        h.center.close();
        timeout(WAIT, h.task).await.unwrap().unwrap();
        assert!(h.center.snapshot().records.is_empty());
        assert_eq!(h.relay.publish(json!({ "id": 2 })), 0);
    }
}
