use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user-curated blocklist entry, as served by the blocked-sites
/// collection. The `domain` is a bare registrable hostname; comparisons are
/// case-insensitive and a leading `www.` is ignored (see `matcher`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockedDomain {
    pub id: i64,
    pub domain: String,
}

impl BlockedDomain {
    pub fn validate(&self) -> Result<(), String> {
        let domain = self.domain.trim();
        if domain.is_empty() {
            return Err("blocked_domain.domain must not be empty".to_string());
        }
        if domain.contains("://") {
            return Err("blocked_domain.domain must not include a scheme".to_string());
        }
        if domain.contains('/') {
            return Err("blocked_domain.domain must not include a path".to_string());
        }
        if domain.chars().any(char::is_whitespace) {
            return Err("blocked_domain.domain must not contain whitespace".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: i64,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pomodoros_completed: u32,
    /// Accumulated focus time in seconds, as tracked server-side.
    #[serde(default)]
    pub total_focus_time: u32,
    pub is_completed: bool,
    pub is_interrupted: bool,
    #[serde(default)]
    pub interruption_reason: Option<String>,
}

impl FocusSession {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("session.name must not be empty".to_string());
        }
        if let Some(end_time) = self.end_time {
            if end_time < self.start_time {
                return Err("session.end_time must be >= session.start_time".to_string());
            }
        }
        Ok(())
    }

    /// A session with any terminal marker can never become active again.
    pub fn is_terminal(&self) -> bool {
        self.end_time.is_some() || self.is_completed || self.is_interrupted
    }
}

/// User timer preferences from the timer-settings collection. Only the
/// durations matter to the blocking core; sound and notification switches are
/// carried through for the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSettings {
    /// Work interval length in minutes.
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub long_break_interval: u32,
    #[serde(default)]
    pub sound_enabled: bool,
    #[serde(default)]
    pub notifications_enabled: bool,
}

impl TimerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.work_duration == 0 {
            return Err("timer_settings.work_duration must be > 0".to_string());
        }
        if self.long_break_interval == 0 {
            return Err("timer_settings.long_break_interval must be > 0".to_string());
        }
        Ok(())
    }

    pub fn session_duration_ms(&self) -> i64 {
        i64::from(self.work_duration) * 60 * 1000
    }
}

/// The last known blocking state within one execution context. Rebuilt on
/// every refresh; the cached copy in local storage lets a new context start
/// from this instead of empty state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockingSnapshot {
    pub blocked_domains: Vec<BlockedDomain>,
    pub active_session: Option<FocusSession>,
    pub session_duration_ms: i64,
    pub fetched_at: DateTime<Utc>,
}

impl BlockingSnapshot {
    pub fn empty(fetched_at: DateTime<Utc>) -> Self {
        Self {
            blocked_domains: Vec::new(),
            active_session: None,
            session_duration_ms: crate::domain::session_clock::DEFAULT_SESSION_DURATION_MS,
            fetched_at,
        }
    }

    pub fn has_active_session(&self, now: DateTime<Utc>) -> bool {
        self.active_session
            .as_ref()
            .map(|session| {
                crate::domain::session_clock::is_active(session, now, self.session_duration_ms)
            })
            .unwrap_or(false)
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        self.active_session
            .as_ref()
            .map(|session| {
                crate::domain::session_clock::remaining_ms(session, now, self.session_duration_ms)
            })
            .unwrap_or(0)
    }
}

/// Outcome of evaluating one candidate URL against a snapshot. Derived on
/// demand, never stored.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDecision {
    pub is_blocked: bool,
    pub matched_domain: Option<String>,
    pub time_remaining_ms: i64,
}

impl BlockDecision {
    pub fn allow() -> Self {
        Self {
            is_blocked: false,
            matched_domain: None,
            time_remaining_ms: 0,
        }
    }
}
