//! Reminder log entries written by the collection scheduler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which reminder was sent. Stored as `due_soon` or `overdue_<days>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderKind {
    DueSoon,
    Overdue(u32),
}

impl ReminderKind {
    pub fn tag(&self) -> String {
        match self {
            ReminderKind::DueSoon => "due_soon".to_string(),
            ReminderKind::Overdue(days) => format!("overdue_{days}"),
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        if tag == "due_soon" {
            return Some(ReminderKind::DueSoon);
        }
        tag.strip_prefix("overdue_")
            .and_then(|days| days.parse().ok())
            .map(ReminderKind::Overdue)
    }
}

/// One row of reminder history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReminderLogEntry {
    pub reminder_id: Uuid,
    pub invoice_id: Uuid,
    pub reminder_type: String,
    pub created_utc: DateTime<Utc>,
}

impl ReminderLogEntry {
    pub fn new(invoice_id: Uuid, kind: ReminderKind, now: DateTime<Utc>) -> Self {
        Self {
            reminder_id: Uuid::new_v4(),
            invoice_id,
            reminder_type: kind.tag(),
            created_utc: now,
        }
    }

    pub fn kind(&self) -> Option<ReminderKind> {
        ReminderKind::parse(&self.reminder_type)
    }

    /// True when this entry is of `kind` and younger than `window` at `now`.
    pub fn suppresses(&self, kind: ReminderKind, window: Duration, now: DateTime<Utc>) -> bool {
        self.kind() == Some(kind) && self.created_utc > now - window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_back() {
        assert_eq!(ReminderKind::parse("due_soon"), Some(ReminderKind::DueSoon));
        assert_eq!(ReminderKind::parse("overdue_14"), Some(ReminderKind::Overdue(14)));
        assert_eq!(ReminderKind::parse("overdue_x"), None);
        assert_eq!(ReminderKind::Overdue(7).tag(), "overdue_7");
    }

    #[test]
    fn suppression_window_is_exclusive_of_older_entries() {
        let now = Utc::now();
        let entry = ReminderLogEntry::new(Uuid::new_v4(), ReminderKind::Overdue(7), now - Duration::hours(30));
        assert!(entry.suppresses(ReminderKind::Overdue(7), Duration::days(2), now));
        assert!(!entry.suppresses(ReminderKind::Overdue(7), Duration::days(1), now));
        assert!(!entry.suppresses(ReminderKind::Overdue(14), Duration::days(2), now));
    }
}
