use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Digest, DomainError, IntervalPolicy, WatchId};

/// A tracked (url, interval) pair together with its last observed state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
    pub id: WatchId,
    pub url: String,
    pub interval_secs: u64,
    pub active: bool,
    pub last_digest: Option<Digest>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
}

impl Watch {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn state(&self) -> WatchState {
        WatchState {
            last_digest: self.last_digest,
            last_checked_at: self.last_checked_at,
            last_changed_at: self.last_changed_at,
            consecutive_failures: self.consecutive_failures,
        }
    }

    /// Apply the named fields of `patch`; absent fields are left alone.
    pub fn apply(&mut self, patch: &WatchPatch) {
        if let Some(secs) = patch.interval_secs {
            self.interval_secs = secs;
        }
        if let Some(d) = patch.last_digest {
            self.last_digest = Some(d);
        }
        if let Some(t) = patch.last_checked_at {
            self.last_checked_at = Some(t);
        }
        if let Some(t) = patch.last_changed_at {
            self.last_changed_at = Some(t);
        }
        if let Some(n) = patch.consecutive_failures {
            self.consecutive_failures = n;
        }
    }
}

/// Validated input for creating a watch. New watches start inactive with no
/// observed state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewWatch {
    pub url: String,
    pub interval_secs: u64,
}

impl NewWatch {
    pub fn new(url: &str, interval_secs: u64, policy: &IntervalPolicy) -> Result<Self, DomainError> {
        let url = validate_url(url)?;
        policy.validate(interval_secs)?;
        Ok(Self { url, interval_secs })
    }
}

fn validate_url(raw: &str) -> Result<String, DomainError> {
    let invalid = |reason: &str| DomainError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let parsed = reqwest::Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https are supported"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(parsed.to_string())
}

/// Partial update of a watch record. Only `Some` fields are written, so the
/// check loop (state fields) and an operator (interval) never overwrite each
/// other's columns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchPatch {
    pub interval_secs: Option<u64>,
    pub last_digest: Option<Digest>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: Option<u32>,
}

impl WatchPatch {
    pub fn interval(secs: u64) -> Self {
        Self {
            interval_secs: Some(secs),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The fields owned by a watch's check loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchState {
    pub last_digest: Option<Digest>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// What one fetch produced, reduced to what the state machine needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    Content(Digest),
    Failure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// First successful observation; no change event.
    Baseline(Digest),
    Unchanged,
    Changed { previous: Digest, current: Digest },
    Failed { consecutive_failures: u32 },
}

impl Transition {
    pub fn is_change(&self) -> bool {
        matches!(self, Transition::Changed { .. })
    }
}

impl WatchState {
    /// Fold one observation taken at `at` into the state.
    ///
    /// A failure never touches `last_digest`.
    pub fn observe(&mut self, observation: Observation, at: DateTime<Utc>) -> Transition {
        self.last_checked_at = Some(at);
        match observation {
            Observation::Failure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                Transition::Failed {
                    consecutive_failures: self.consecutive_failures,
                }
            }
            Observation::Content(current) => {
                self.consecutive_failures = 0;
                match self.last_digest.replace(current) {
                    None => Transition::Baseline(current),
                    Some(previous) if previous == current => Transition::Unchanged,
                    Some(previous) => {
                        self.last_changed_at = Some(at);
                        Transition::Changed { previous, current }
                    }
                }
            }
        }
    }

    pub fn to_patch(&self) -> WatchPatch {
        WatchPatch {
            interval_secs: None,
            last_digest: self.last_digest,
            last_checked_at: self.last_checked_at,
            last_changed_at: self.last_changed_at,
            consecutive_failures: Some(self.consecutive_failures),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fingerprint;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn first_content_is_a_baseline_not_a_change() {
        let mut state = WatchState::default();
        let h1 = fingerprint(b"A");

        assert_eq!(state.observe(Observation::Content(h1), at(0)), Transition::Baseline(h1));
        assert_eq!(state.last_digest, Some(h1));
        assert_eq!(state.last_changed_at, None);
    }

    #[test]
    fn identical_content_never_changes_digest() {
        let mut state = WatchState::default();
        let h1 = fingerprint(b"A");
        state.observe(Observation::Content(h1), at(0));

        for i in 1..5 {
            assert_eq!(state.observe(Observation::Content(h1), at(i)), Transition::Unchanged);
        }
        assert_eq!(state.last_digest, Some(h1));
        assert_eq!(state.last_checked_at, Some(at(4)));
        assert_eq!(state.last_changed_at, None);
    }

    #[test]
    fn different_content_is_one_change_stamped_with_fetch_time() {
        let mut state = WatchState::default();
        let (h1, h2) = (fingerprint(b"A"), fingerprint(b"B"));
        state.observe(Observation::Content(h1), at(0));

        let t = state.observe(Observation::Content(h2), at(60));
        assert_eq!(t, Transition::Changed { previous: h1, current: h2 });
        assert_eq!(state.last_digest, Some(h2));
        assert_eq!(state.last_changed_at, Some(at(60)));
    }

    #[test]
    fn failures_count_up_and_keep_the_digest() {
        let mut state = WatchState::default();
        let h1 = fingerprint(b"A");
        state.observe(Observation::Content(h1), at(0));

        for n in 1..=3 {
            assert_eq!(
                state.observe(Observation::Failure, at(n)),
                Transition::Failed { consecutive_failures: n as u32 }
            );
        }
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.last_digest, Some(h1));
        assert_eq!(state.last_checked_at, Some(at(3)));

        state.observe(Observation::Content(h1), at(4));
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn patch_touches_only_named_fields() {
        let mut w = Watch {
            id: WatchId::new(1),
            url: "https://example.com/".into(),
            interval_secs: 60,
            active: true,
            last_digest: Some(fingerprint(b"A")),
            last_checked_at: Some(at(0)),
            last_changed_at: None,
            consecutive_failures: 2,
            created_at: at(0),
        };
        w.apply(&WatchPatch::interval(10));

        assert_eq!(w.interval(), Duration::from_secs(10));
        assert_eq!(w.last_digest, Some(fingerprint(b"A")));
        assert_eq!(w.consecutive_failures, 2);
        assert!(WatchPatch::default().is_empty());
    }

    #[test]
    fn new_watch_validates_url_and_interval() {
        let policy = IntervalPolicy::default();
        assert!(NewWatch::new("https://example.com", 60, &policy).is_ok());
        assert!(matches!(
            NewWatch::new("ftp://example.com", 60, &policy),
            Err(DomainError::InvalidUrl { .. })
        ));
        assert!(matches!(
            NewWatch::new("not a url", 60, &policy),
            Err(DomainError::InvalidUrl { .. })
        ));
        assert_eq!(
            NewWatch::new("https://example.com", 5, &policy),
            Err(DomainError::IntervalTooShort { got: 5, min: 10 })
        );
    }
}
