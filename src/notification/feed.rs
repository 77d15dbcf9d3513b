//! Reconciliation of the persisted notification list with live events.
//!
//! `NotificationFeed` holds the working list shown by the notification bell.
//! It is plain synchronous state: exactly one task owns it (see
//! [`crate::center`]) and applies history loads, live events and read-state
//! transitions one at a time.
//!
//! Invariant: no two records share a non-null id. Id-less live events are
//! always prepended and never deduplicated.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{
    NotificationId, NotificationRecord, RecordDefaults, RecordOrigin, ShipmentUpdate,
};

/// How a completed history load combines with the current list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryPolicy {
    /// Replace the list wholesale. Live events accepted while the load was
    /// in flight are lost.
    Replace,
    /// Keep live records the history does not contain, ahead of the history.
    #[default]
    Merge,
}

/// Generation token handed out when a history load starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of applying a history page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    Applied {
        /// Records taken from the history page
        loaded: usize,
        /// Live records kept in front of them
        kept_live: usize,
        /// Live records dropped by the load
        dropped_live: usize,
    },
    /// A newer load started or the feed was closed
    Stale,
}

impl HistoryOutcome {
    /// Metric label for a completed load
    pub fn as_label(&self) -> &'static str {
        match self {
            HistoryOutcome::Applied { .. } => "ok",
            HistoryOutcome::Stale => "stale",
        }
    }
}

/// Result of offering a live event to the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Prepended,
    /// A record with the same id is already listed
    Duplicate,
    /// The feed was closed
    Ignored,
}

/// Read state of a listed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Read,
    Unread,
    Missing,
}

/// Deduplicated, ordered notification list
#[derive(Debug)]
pub struct NotificationFeed {
    records: Vec<NotificationRecord>,
    policy: HistoryPolicy,
    defaults: RecordDefaults,
    generation: u64,
    closed: bool,
}

impl NotificationFeed {
    pub fn new(policy: HistoryPolicy, defaults: RecordDefaults) -> Self {
        Self {
            records: Vec::new(),
            policy,
            defaults,
            generation: 0,
            closed: false,
        }
    }

    pub fn policy(&self) -> HistoryPolicy {
        self.policy
    }

    /// Start a history load; only the latest ticket can be applied
    pub fn begin_history_load(&mut self) -> LoadTicket {
        self.generation += 1;
        LoadTicket {
            generation: self.generation,
        }
    }

    /// Apply a completed history load
    pub fn apply_history(
        &mut self,
        ticket: LoadTicket,
        history: Vec<NotificationRecord>,
    ) -> HistoryOutcome {
        if self.closed || ticket.generation != self.generation {
            return HistoryOutcome::Stale;
        }

        // Duplicates inside one page keep the first occurrence
        let mut seen: HashSet<NotificationId> = HashSet::with_capacity(history.len());
        let history: Vec<NotificationRecord> = history
            .into_iter()
            .filter(|r| match &r.id {
                Some(id) => seen.insert(id.clone()),
                None => true,
            })
            .collect();

        let current = std::mem::take(&mut self.records);
        let live_total = current
            .iter()
            .filter(|r| r.origin == RecordOrigin::Live)
            .count();

        let kept: Vec<NotificationRecord> = match self.policy {
            HistoryPolicy::Replace => Vec::new(),
            HistoryPolicy::Merge => current
                .into_iter()
                .filter(|r| r.origin == RecordOrigin::Live)
                .filter(|r| match &r.id {
                    Some(id) => !seen.contains(id),
                    None => true,
                })
                .collect(),
        };

        let outcome = HistoryOutcome::Applied {
            loaded: history.len(),
            kept_live: kept.len(),
            dropped_live: live_total - kept.len(),
        };

        self.records = kept;
        self.records.extend(history);
        outcome
    }

    /// Offer a live event; prepends unless its id is already listed
    pub fn accept_live(&mut self, update: ShipmentUpdate, received_at: DateTime<Utc>) -> LiveOutcome {
        if self.closed {
            return LiveOutcome::Ignored;
        }

        if let Some(id) = &update.id {
            if self.contains(id) {
                return LiveOutcome::Duplicate;
            }
        }

        let record = NotificationRecord::from_live(update, received_at, &self.defaults);
        self.records.insert(0, record);
        LiveOutcome::Prepended
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.find(id).is_some()
    }

    pub fn read_state(&self, id: &NotificationId) -> ReadState {
        match self.find(id) {
            Some(record) if record.is_read == Some(true) => ReadState::Read,
            Some(_) => ReadState::Unread,
            None => ReadState::Missing,
        }
    }

    /// Flip the local read flag after the server confirmed it
    pub fn mark_read_local(&mut self, id: &NotificationId) -> bool {
        match self.records.iter_mut().find(|r| r.id.as_ref() == Some(id)) {
            Some(record) if record.is_read != Some(true) => {
                record.is_read = Some(true);
                true
            }
            _ => false,
        }
    }

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_unread()).count()
    }

    /// Discard the list; later loads and events become no-ops
    pub fn close(&mut self) {
        self.closed = true;
        self.records.clear();
    }

    fn find(&self, id: &NotificationId) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id.as_ref() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::types::RawNotification;

    fn feed(policy: HistoryPolicy) -> NotificationFeed {
        NotificationFeed::new(policy, RecordDefaults::default())
    }

    fn live(id: Option<i64>, title: &str) -> ShipmentUpdate {
        ShipmentUpdate {
            id: id.map(NotificationId::from),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn history(id: i64, title: &str, is_read: bool) -> NotificationRecord {
        let raw = RawNotification {
            id: Some(NotificationId::from(id)),
            title: Some(title.to_string()),
            message: Some("m".to_string()),
            created_at: Some("2024-01-01T10:00:00Z".to_string()),
            icon: None,
            color: None,
            is_read: Some(is_read),
        };
        NotificationRecord::from_history(raw, &RecordDefaults::default())
    }

    fn titles(feed: &NotificationFeed) -> Vec<&str> {
        feed.records().iter().map(|r| r.title.as_str()).collect()
    }

    fn assert_unique_ids(feed: &NotificationFeed) {
        let mut seen = HashSet::new();
        for record in feed.records() {
            if let Some(id) = &record.id {
                assert!(seen.insert(id.clone()), "duplicate id {}", id);
            }
        }
    }

    #[test]
    fn test_live_events_prepend_in_arrival_order() {
        let mut feed = feed(HistoryPolicy::Replace);
        let ticket = feed.begin_history_load();
        feed.apply_history(ticket, vec![]);

        feed.accept_live(live(Some(1), "A"), Utc::now());
        feed.accept_live(live(Some(2), "B"), Utc::now());

        assert_eq!(titles(&feed), vec!["B", "A"]);
    }

    #[test]
    fn test_duplicate_live_event_is_discarded() {
        let mut feed = feed(HistoryPolicy::Merge);
        let ticket = feed.begin_history_load();
        feed.apply_history(ticket, vec![history(7, "H7", false)]);

        assert_eq!(feed.accept_live(live(Some(7), "again"), Utc::now()), LiveOutcome::Duplicate);
        assert_eq!(titles(&feed), vec!["H7"]);
    }

    #[test]
    fn test_idless_events_are_never_deduplicated() {
        let mut feed = feed(HistoryPolicy::Merge);
        assert_eq!(feed.accept_live(live(None, "x"), Utc::now()), LiveOutcome::Prepended);
        assert_eq!(feed.accept_live(live(None, "x"), Utc::now()), LiveOutcome::Prepended);
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_replace_policy_drops_live_event_received_during_load() {
        let mut feed = feed(HistoryPolicy::Replace);
        let ticket = feed.begin_history_load();

        feed.accept_live(live(Some(99), "E"), Utc::now());
        let outcome = feed.apply_history(ticket, vec![history(1, "H1", false), history(2, "H2", true)]);

        assert_eq!(titles(&feed), vec!["H1", "H2"]);
        assert_eq!(
            outcome,
            HistoryOutcome::Applied {
                loaded: 2,
                kept_live: 0,
                dropped_live: 1
            }
        );
    }

    #[test]
    fn test_merge_policy_keeps_live_event_received_during_load() {
        let mut feed = feed(HistoryPolicy::Merge);
        let ticket = feed.begin_history_load();

        feed.accept_live(live(Some(99), "E"), Utc::now());
        feed.accept_live(live(None, "anon"), Utc::now());
        feed.apply_history(ticket, vec![history(1, "H1", false), history(2, "H2", true)]);

        assert_eq!(titles(&feed), vec!["anon", "E", "H1", "H2"]);
    }

    #[test]
    fn test_merge_policy_prefers_history_for_shared_ids() {
        let mut feed = feed(HistoryPolicy::Merge);
        let ticket = feed.begin_history_load();

        feed.accept_live(live(Some(1), "live copy"), Utc::now());
        let outcome = feed.apply_history(ticket, vec![history(1, "H1", true)]);

        assert_eq!(titles(&feed), vec!["H1"]);
        assert_eq!(feed.read_state(&NotificationId::from(1)), ReadState::Read);
        assert_eq!(
            outcome,
            HistoryOutcome::Applied {
                loaded: 1,
                kept_live: 0,
                dropped_live: 1
            }
        );
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let mut feed = feed(HistoryPolicy::Merge);
        let first = feed.begin_history_load();
        let second = feed.begin_history_load();

        let stale = feed.apply_history(first, vec![history(1, "old", false)]);
        assert_eq!(stale, HistoryOutcome::Stale);
        assert_eq!(stale.as_label(), "stale");
        assert!(feed.is_empty());

        let applied = feed.apply_history(second, vec![history(2, "new", false)]);
        assert!(matches!(applied, HistoryOutcome::Applied { loaded: 1, .. }));
        assert_eq!(applied.as_label(), "ok");
        assert_eq!(titles(&feed), vec!["new"]);
    }

    #[test]
    fn test_history_page_duplicates_keep_first() {
        let mut feed = feed(HistoryPolicy::Replace);
        let ticket = feed.begin_history_load();
        feed.apply_history(ticket, vec![history(3, "first", false), history(3, "second", false)]);

        assert_eq!(titles(&feed), vec!["first"]);
    }

    #[test]
    fn test_dedup_invariant_over_interleavings() {
        for policy in [HistoryPolicy::Replace, HistoryPolicy::Merge] {
            let mut feed = feed(policy);
            let ticket = feed.begin_history_load();
            for id in [1, 2, 3, 2, 1] {
                feed.accept_live(live(Some(id), "l"), Utc::now());
            }
            feed.apply_history(
                ticket,
                vec![history(2, "h2", false), history(4, "h4", false), history(4, "h4", false)],
            );
            for id in [4, 5, 5, 3] {
                feed.accept_live(live(Some(id), "l"), Utc::now());
            }
            feed.accept_live(live(None, "anon"), Utc::now());
            assert_unique_ids(&feed);
        }
    }

    #[test]
    fn test_mark_read_local_is_idempotent() {
        let mut feed = feed(HistoryPolicy::Merge);
        let ticket = feed.begin_history_load();
        feed.apply_history(ticket, vec![history(1, "H1", false)]);

        let id = NotificationId::from(1);
        assert_eq!(feed.read_state(&id), ReadState::Unread);
        assert_eq!(feed.unread_count(), 1);
        assert!(feed.mark_read_local(&id));
        assert!(!feed.mark_read_local(&id));
        assert_eq!(feed.read_state(&id), ReadState::Read);
        assert_eq!(feed.unread_count(), 0);
        assert_eq!(feed.read_state(&NotificationId::from(2)), ReadState::Missing);
    }

    #[test]
    fn test_closed_feed_ignores_everything() {
        let mut feed = feed(HistoryPolicy::Merge);
        let ticket = feed.begin_history_load();
        feed.accept_live(live(Some(1), "A"), Utc::now());
        feed.close();

        assert!(feed.is_empty());
        assert_eq!(feed.accept_live(live(Some(2), "B"), Utc::now()), LiveOutcome::Ignored);
        assert_eq!(feed.apply_history(ticket, vec![history(3, "H", false)]), HistoryOutcome::Stale);
        assert!(feed.is_empty());
    }
}
