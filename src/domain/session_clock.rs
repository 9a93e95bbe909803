use crate::domain::models::FocusSession;
use chrono::{DateTime, Utc};

/// Product default when the user has no timer settings: 25-minute work
/// intervals.
pub const DEFAULT_SESSION_DURATION_MS: i64 = 25 * 60 * 1000;

/// A session counts as active while it carries no terminal marker and its
/// work interval has not yet elapsed. Active exactly at `start_time`,
/// inactive from `start_time + duration` onward.
pub fn is_active(session: &FocusSession, now: DateTime<Utc>, session_duration_ms: i64) -> bool {
    if session.is_terminal() {
        return false;
    }
    elapsed_ms(session, now) < session_duration_ms
}

/// Milliseconds left in the work interval, clamped at zero. Once this hits
/// zero the owning store must treat the session as ended even if the server
/// has not yet confirmed it.
pub fn remaining_ms(session: &FocusSession, now: DateTime<Utc>, session_duration_ms: i64) -> i64 {
    (session_duration_ms - elapsed_ms(session, now)).max(0)
}

/// Picks the session the snapshot should treat as active: the first entry in
/// list order (server order) that satisfies the invariant. At most one
/// session is expected to qualify; first match wins when upstream data
/// violates that.
pub fn select_active_session(
    sessions: &[FocusSession],
    now: DateTime<Utc>,
    session_duration_ms: i64,
) -> Option<&FocusSession> {
    sessions
        .iter()
        .find(|session| is_active(session, now, session_duration_ms))
}

fn elapsed_ms(session: &FocusSession, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(session.start_time).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn session_started_at(id: i64, start: DateTime<Utc>) -> FocusSession {
        FocusSession {
            id,
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

    #[test]
    fn active_at_start_inactive_at_duration_boundary() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let session = session_started_at(1, start);

        assert!(is_active(&session, start, DEFAULT_SESSION_DURATION_MS));
        assert!(is_active(
            &session,
            start + Duration::minutes(24),
            DEFAULT_SESSION_DURATION_MS
        ));
        assert!(!is_active(
            &session,
            start + Duration::minutes(25),
            DEFAULT_SESSION_DURATION_MS
        ));
        assert!(!is_active(
            &session,
            start + Duration::hours(3),
            DEFAULT_SESSION_DURATION_MS
        ));
    }

    #[test]
    fn terminal_markers_deactivate_regardless_of_clock() {
        let start = fixed_time("2026-02-16T09:00:00Z");

        let mut completed = session_started_at(1, start);
        completed.is_completed = true;
        assert!(!is_active(&completed, start, DEFAULT_SESSION_DURATION_MS));

        let mut interrupted = session_started_at(2, start);
        interrupted.is_interrupted = true;
        assert!(!is_active(&interrupted, start, DEFAULT_SESSION_DURATION_MS));

        let mut ended = session_started_at(3, start);
        ended.end_time = Some(start + Duration::minutes(10));
        assert!(!is_active(&ended, start, DEFAULT_SESSION_DURATION_MS));
    }

    #[test]
    fn remaining_counts_down_and_clamps_at_zero() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let session = session_started_at(1, start);

        assert_eq!(
            remaining_ms(&session, start, DEFAULT_SESSION_DURATION_MS),
            DEFAULT_SESSION_DURATION_MS
        );
        assert_eq!(
            remaining_ms(
                &session,
                start + Duration::minutes(15),
                DEFAULT_SESSION_DURATION_MS
            ),
            10 * 60 * 1000
        );
        assert_eq!(
            remaining_ms(
                &session,
                start + Duration::minutes(40),
                DEFAULT_SESSION_DURATION_MS
            ),
            0
        );
    }

    #[test]
    fn select_active_session_first_match_wins() {
        let start = fixed_time("2026-02-16T09:00:00Z");
        let mut stale = session_started_at(1, start - Duration::hours(2));
        stale.is_completed = true;
        let first_active = session_started_at(2, start - Duration::minutes(5));
        let second_active = session_started_at(3, start - Duration::minutes(1));

        let sessions = vec![stale, first_active.clone(), second_active];
        let selected = select_active_session(&sessions, start, DEFAULT_SESSION_DURATION_MS)
            .expect("one active session");
        assert_eq!(selected.id, first_active.id);
    }

    #[test]
    fn select_active_session_none_when_all_terminal_or_elapsed() {
        let now = fixed_time("2026-02-16T12:00:00Z");
        let mut interrupted = session_started_at(1, now - Duration::minutes(3));
        interrupted.is_interrupted = true;
        let elapsed = session_started_at(2, now - Duration::hours(1));

        let sessions = vec![interrupted, elapsed];
        assert!(select_active_session(&sessions, now, DEFAULT_SESSION_DURATION_MS).is_none());
    }

    proptest! {
        #[test]
        fn remaining_is_zero_exactly_when_inactive(
            elapsed_minutes in 0i64..180,
            duration_minutes in 1i64..120
        ) {
            let start = fixed_time("2026-02-16T09:00:00Z");
            let session = session_started_at(1, start);
            let now = start + Duration::minutes(elapsed_minutes);
            let duration_ms = duration_minutes * 60 * 1000;

            let remaining = remaining_ms(&session, now, duration_ms);
            prop_assert!(remaining >= 0);
            prop_assert!(remaining <= duration_ms);
            prop_assert_eq!(is_active(&session, now, duration_ms), remaining > 0);
        }
    }
}
