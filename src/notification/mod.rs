//! Notification records, history loading, and reconciliation.
//!
//! - `types`: record shapes for persisted and live notifications
//! - `history`: one-shot loader for the persisted list
//! - `feed`: the deduplicated working list shown by the notification bell

mod feed;
mod history;
mod types;

pub use feed::{HistoryOutcome, HistoryPolicy, LiveOutcome, LoadTicket, NotificationFeed, ReadState};
pub use history::HistoryLoader;
pub use types::{
    NotificationId, NotificationRecord, PayloadError, RawNotification, RecordDefaults,
    RecordOrigin, ShipmentUpdate,
};
