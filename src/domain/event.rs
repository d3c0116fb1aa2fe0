use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Digest, WatchId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Change,
}

/// Emitted when a watch that already had a baseline digest observes a
/// different one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub watch_id: WatchId,
    pub url: String,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
    pub previous_digest: Digest,
    pub current_digest: Digest,
}

impl ChangeEvent {
    pub fn change(
        watch_id: WatchId,
        url: impl Into<String>,
        occurred_at: DateTime<Utc>,
        previous_digest: Digest,
        current_digest: Digest,
    ) -> Self {
        Self {
            watch_id,
            url: url.into(),
            occurred_at,
            kind: EventKind::Change,
            previous_digest,
            current_digest,
        }
    }

    pub fn subject(&self) -> &'static str {
        "Website Content Changed"
    }

    /// One-line human message shared by the text channels.
    pub fn message(&self) -> String {
        format!(
            "🔔 Change detected on: {} at {}",
            self.url,
            self.occurred_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fingerprint;
    use chrono::TimeZone;

    #[test]
    fn message_names_url_and_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let e = ChangeEvent::change(
            WatchId::new(3),
            "https://example.com/",
            at,
            fingerprint(b"A"),
            fingerprint(b"B"),
        );
        assert_eq!(
            e.message(),
            "🔔 Change detected on: https://example.com/ at 2024-03-01 12:30:05"
        );
        assert_eq!(e.kind, EventKind::Change);
    }

    #[test]
    fn serializes_kind_as_lowercase() {
        let e = ChangeEvent::change(
            WatchId::new(1),
            "https://example.com/",
            Utc::now(),
            fingerprint(b"A"),
            fingerprint(b"B"),
        );
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "change");
        assert_eq!(json["watch_id"], 1);
    }
}
