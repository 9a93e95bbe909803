use crate::application::blocking_store::{NowProvider, SnapshotSource};
use crate::application::synchronizer::SyncMessage;
use crate::domain::matcher;
use chrono::Utc;
use std::sync::Arc;

/// Per-tab enforcement state. The machine is defined purely in terms of the
/// current snapshot, so duplicate or out-of-order push messages are safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabPhase {
    /// No active session; nothing is enforced.
    Idle,
    /// Session active, no block surface showing.
    Monitoring,
    /// Block surface currently shown in this tab.
    Blocked,
}

impl TabPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Allow,
    Blocked {
        matched_domain: String,
        time_remaining_ms: i64,
    },
}

impl NavigationOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Hooks one tab's observable navigation points: pre-navigation events where
/// the platform can cancel them, and the periodic self-check against the
/// location the tab is already on.
pub struct NavigationInterceptor {
    source: Arc<dyn SnapshotSource>,
    phase: TabPhase,
    now_provider: NowProvider,
}

impl NavigationInterceptor {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        let mut interceptor = Self {
            source,
            phase: TabPhase::Idle,
            now_provider: Arc::new(Utc::now),
        };
        interceptor.sync_phase_with_snapshot();
        interceptor
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self.sync_phase_with_snapshot();
        self
    }

    pub fn phase(&self) -> TabPhase {
        self.phase
    }

    /// Decision for a navigation or in-page click targeting `url`. A blocked
    /// target moves the tab to the Blocked phase; the caller prevents the
    /// default navigation and presents the surface.
    pub fn handle_navigation(&mut self, url: &str) -> NavigationOutcome {
        self.evaluate(url)
    }

    /// Periodic self-check of the location the tab is already showing.
    /// Covers blocking that activates while the user is on a distracting
    /// site, and tabs that attach after the session-start push was sent.
    pub fn check_current_location(&mut self, current_url: &str) -> NavigationOutcome {
        self.evaluate(current_url)
    }

    /// User explicitly left the block surface.
    pub fn dismiss_block(&mut self) {
        if self.phase == TabPhase::Blocked {
            self.phase = TabPhase::Monitoring;
        }
    }

    /// Applies a push message from the synchronizer. Pure latency hint: the
    /// snapshot remains the source of truth, so stray or repeated messages
    /// cannot corrupt the phase.
    pub fn apply_message(&mut self, message: &SyncMessage) {
        match message {
            SyncMessage::SessionStarted { .. } => {
                if self.phase == TabPhase::Idle {
                    self.phase = TabPhase::Monitoring;
                }
            }
            SyncMessage::SessionEnded => {
                self.phase = TabPhase::Idle;
            }
            SyncMessage::Recheck => self.sync_phase_with_snapshot(),
        }
    }

    fn evaluate(&mut self, url: &str) -> NavigationOutcome {
        let snapshot = self.source.snapshot();
        let now = (self.now_provider)();

        if !snapshot.has_active_session(now) {
            self.phase = TabPhase::Idle;
            return NavigationOutcome::Allow;
        }

        let decision = matcher::compute_block_decision(&snapshot, url, now);
        if decision.is_blocked {
            self.phase = TabPhase::Blocked;
            NavigationOutcome::Blocked {
                matched_domain: decision.matched_domain.unwrap_or_default(),
                time_remaining_ms: decision.time_remaining_ms,
            }
        } else {
            if self.phase == TabPhase::Idle {
                self.phase = TabPhase::Monitoring;
            }
            NavigationOutcome::Allow
        }
    }

    fn sync_phase_with_snapshot(&mut self) {
        let snapshot = self.source.snapshot();
        let now = (self.now_provider)();
        match (snapshot.has_active_session(now), self.phase) {
            (false, _) => self.phase = TabPhase::Idle,
            (true, TabPhase::Idle) => self.phase = TabPhase::Monitoring,
            (true, _) => {}
        }
    }
}

/// Display state for one tick of a visible block surface. The surface
/// re-polls once per second purely for display and auto-dismisses once the
/// remaining time reaches zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownTick {
    pub remaining_ms: i64,
    pub display: String,
    pub expired: bool,
}

pub struct BlockSurfaceCountdown {
    source: Arc<dyn SnapshotSource>,
    now_provider: NowProvider,
}

impl BlockSurfaceCountdown {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            source,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn tick(&self) -> CountdownTick {
        let snapshot = self.source.snapshot();
        let now = (self.now_provider)();
        let remaining_ms = snapshot.remaining_ms(now);
        CountdownTick {
            remaining_ms,
            display: format_remaining(remaining_ms),
            expired: !snapshot.has_active_session(now),
        }
    }
}

pub fn format_remaining(remaining_ms: i64) -> String {
    let total_seconds = (remaining_ms.max(0)) / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BlockedDomain, BlockingSnapshot, FocusSession};
    use crate::domain::session_clock::DEFAULT_SESSION_DURATION_MS;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Mutex;

    struct FakeSnapshotSource {
        snapshot: Mutex<BlockingSnapshot>,
    }

    impl FakeSnapshotSource {
        fn new(snapshot: BlockingSnapshot) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(snapshot),
            })
        }

        fn set(&self, snapshot: BlockingSnapshot) {
            *self.snapshot.lock().expect("snapshot lock poisoned") = snapshot;
        }
    }

    impl SnapshotSource for FakeSnapshotSource {
        fn snapshot(&self) -> BlockingSnapshot {
            self.snapshot.lock().expect("snapshot lock poisoned").clone()
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn fixed_now(now: DateTime<Utc>) -> NowProvider {
        Arc::new(move || now)
    }

    fn session_started_at(start: DateTime<Utc>) -> FocusSession {
        FocusSession {
            id: 1,
            name: "Focus Session".to_string(),
            start_time: start,
            end_time: None,
            pomodoros_completed: 0,
            total_focus_time: 0,
            is_completed: false,
            is_interrupted: false,
            interruption_reason: None,
        }
    }

    fn snapshot_with(
        domains: &[&str],
        active_session: Option<FocusSession>,
        fetched_at: DateTime<Utc>,
    ) -> BlockingSnapshot {
        BlockingSnapshot {
            blocked_domains: domains
                .iter()
                .enumerate()
                .map(|(index, domain)| BlockedDomain {
                    id: index as i64 + 1,
                    domain: (*domain).to_string(),
                })
                .collect(),
            active_session,
            session_duration_ms: DEFAULT_SESSION_DURATION_MS,
            fetched_at,
        }
    }

    #[test]
    fn blocked_click_during_active_session_shows_surface() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let now = start + Duration::minutes(15);
        let source = FakeSnapshotSource::new(snapshot_with(
            &["youtube.com"],
            Some(session_started_at(start)),
            now,
        ));
        let mut interceptor =
            NavigationInterceptor::new(source).with_now_provider(fixed_now(now));
        assert_eq!(interceptor.phase(), TabPhase::Monitoring);

        let outcome = interceptor.handle_navigation("https://m.youtube.com/watch?v=x");
        assert_eq!(
            outcome,
            NavigationOutcome::Blocked {
                matched_domain: "youtube.com".to_string(),
                time_remaining_ms: 10 * 60 * 1000,
            }
        );
        assert_eq!(interceptor.phase(), TabPhase::Blocked);
    }

    #[test]
    fn same_click_without_active_session_is_not_intercepted() {
        let now = fixed_time("2026-02-16T09:15:00Z");
        let source = FakeSnapshotSource::new(snapshot_with(&["youtube.com"], None, now));
        let mut interceptor =
            NavigationInterceptor::new(source).with_now_provider(fixed_now(now));
        assert_eq!(interceptor.phase(), TabPhase::Idle);

        let outcome = interceptor.handle_navigation("https://m.youtube.com/watch?v=x");
        assert_eq!(outcome, NavigationOutcome::Allow);
        assert_eq!(interceptor.phase(), TabPhase::Idle);
    }

    #[test]
    fn self_check_blocks_when_already_on_distracting_site() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let now = start + Duration::minutes(1);
        let source = FakeSnapshotSource::new(snapshot_with(
            &["reddit.com"],
            Some(session_started_at(start)),
            now,
        ));
        let mut interceptor =
            NavigationInterceptor::new(source).with_now_provider(fixed_now(now));

        let outcome = interceptor.check_current_location("https://www.reddit.com/r/all");
        assert!(outcome.is_blocked());
        assert_eq!(interceptor.phase(), TabPhase::Blocked);
    }

    #[test]
    fn surface_auto_dismisses_once_session_elapses() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let during = start + Duration::minutes(10);
        let source = FakeSnapshotSource::new(snapshot_with(
            &["youtube.com"],
            Some(session_started_at(start)),
            during,
        ));
        let mut interceptor = NavigationInterceptor::new(Arc::clone(&source) as Arc<dyn SnapshotSource>)
            .with_now_provider(fixed_now(during));
        assert!(interceptor
            .handle_navigation("https://youtube.com/")
            .is_blocked());

        let countdown = BlockSurfaceCountdown::new(Arc::clone(&source) as Arc<dyn SnapshotSource>)
            .with_now_provider(fixed_now(during));
        assert_eq!(countdown.tick().display, "15:00");
        assert!(!countdown.tick().expired);

        // the session runs out while the surface is showing
        let after = start + Duration::minutes(26);
        let countdown = BlockSurfaceCountdown::new(Arc::clone(&source) as Arc<dyn SnapshotSource>)
            .with_now_provider(fixed_now(after));
        let tick = countdown.tick();
        assert!(tick.expired);
        assert_eq!(tick.display, "00:00");

        // subsequent navigation to the same domain is allowed again
        let mut interceptor = interceptor.with_now_provider(fixed_now(after));
        let outcome = interceptor.handle_navigation("https://youtube.com/");
        assert_eq!(outcome, NavigationOutcome::Allow);
        assert_eq!(interceptor.phase(), TabPhase::Idle);
    }

    #[test]
    fn dismiss_returns_to_monitoring() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let now = start + Duration::minutes(2);
        let source = FakeSnapshotSource::new(snapshot_with(
            &["youtube.com"],
            Some(session_started_at(start)),
            now,
        ));
        let mut interceptor =
            NavigationInterceptor::new(source).with_now_provider(fixed_now(now));
        interceptor.handle_navigation("https://youtube.com/");
        assert_eq!(interceptor.phase(), TabPhase::Blocked);

        interceptor.dismiss_block();
        assert_eq!(interceptor.phase(), TabPhase::Monitoring);

        // dismissing twice is harmless
        interceptor.dismiss_block();
        assert_eq!(interceptor.phase(), TabPhase::Monitoring);
    }

    #[test]
    fn push_messages_are_idempotent_hints() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let now = start + Duration::minutes(2);
        let source = FakeSnapshotSource::new(snapshot_with(
            &["youtube.com"],
            Some(session_started_at(start)),
            now,
        ));
        let mut interceptor = NavigationInterceptor::new(Arc::clone(&source) as Arc<dyn SnapshotSource>)
            .with_now_provider(fixed_now(now));

        // sessionEnded before any sessionStarted: safe, goes Idle
        interceptor.apply_message(&SyncMessage::SessionEnded);
        assert_eq!(interceptor.phase(), TabPhase::Idle);

        let started = SyncMessage::SessionStarted {
            session: session_started_at(start),
        };
        interceptor.apply_message(&started);
        assert_eq!(interceptor.phase(), TabPhase::Monitoring);

        // a duplicate start changes nothing
        interceptor.apply_message(&started);
        assert_eq!(interceptor.phase(), TabPhase::Monitoring);

        // a recheck nudge resolves against the snapshot
        source.set(snapshot_with(&["youtube.com"], None, now));
        interceptor.apply_message(&SyncMessage::Recheck);
        assert_eq!(interceptor.phase(), TabPhase::Idle);
    }

    #[test]
    fn new_interceptor_picks_up_in_progress_session() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let now = start + Duration::minutes(3);
        let source = FakeSnapshotSource::new(snapshot_with(
            &["youtube.com"],
            Some(session_started_at(start)),
            now,
        ));

        // a tab attaching after the start push was broadcast
        let interceptor =
            NavigationInterceptor::new(source).with_now_provider(fixed_now(now));
        assert_eq!(interceptor.phase(), TabPhase::Monitoring);
    }

    #[test]
    fn format_remaining_pads_minutes_and_seconds() {
        assert_eq!(format_remaining(0), "00:00");
        assert_eq!(format_remaining(-500), "00:00");
        assert_eq!(format_remaining(61_000), "01:01");
        assert_eq!(format_remaining(600_000), "10:00");
        assert_eq!(format_remaining(25 * 60 * 1000), "25:00");
    }
}
