use crate::domain::models::{BlockingSnapshot, FocusSession};
use crate::domain::session_clock;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_api_client::FocusApiClient;
use crate::infrastructure::snapshot_cache::SnapshotCacheRepository;
use chrono::{DateTime, Utc};
use log::warn;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{sleep, Duration as TokioDuration};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Change of the active session between two consecutive snapshots. The
/// synchronizer turns these into push messages for open tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    Started(FocusSession),
    Ended,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub snapshot: BlockingSnapshot,
    pub transition: Option<SessionTransition>,
}

/// Read access to the freshest known snapshot. Implemented by the store and
/// by test fakes; consumers (interceptors, surfaces) depend only on this.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> BlockingSnapshot;
}

/// Authoritative blocking state within one execution context. Polls the
/// server collaborators, persists a bootstrap copy to local storage, and
/// exposes the last known snapshot synchronously.
pub struct BlockingStateStore<C, R>
where
    C: FocusApiClient,
    R: SnapshotCacheRepository,
{
    api_client: Arc<C>,
    cache_repository: Arc<R>,
    snapshot: Mutex<BlockingSnapshot>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<C, R> BlockingStateStore<C, R>
where
    C: FocusApiClient,
    R: SnapshotCacheRepository,
{
    pub fn new(api_client: Arc<C>, cache_repository: Arc<R>) -> Self {
        Self {
            api_client,
            cache_repository,
            snapshot: Mutex::new(BlockingSnapshot::empty(Utc::now())),
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Seeds the in-memory snapshot from the persisted cache so the context
    /// is useful before its first refresh completes. Returns whether a
    /// cached snapshot was found.
    pub fn bootstrap(&self) -> Result<bool, InfraError> {
        let Some(cached) = self.cache_repository.load()? else {
            return Ok(false);
        };
        let mut guard = self.lock_snapshot();
        *guard = cached;
        Ok(true)
    }

    /// Last known snapshot, synchronously. Never blocks the caller on I/O.
    pub fn current_snapshot(&self) -> BlockingSnapshot {
        self.lock_snapshot().clone()
    }

    /// Full refresh: blocklist, sessions and timer settings. The snapshot is
    /// rebuilt atomically; any fetch failure leaves the previous snapshot in
    /// place (stale-but-available) for the caller to retry on the next tick.
    pub async fn refresh(&self, auth_token: &str) -> Result<RefreshOutcome, InfraError> {
        let blocked_domains = self
            .call_with_retry(|| self.api_client.list_blocked_sites(auth_token))
            .await?;
        let sessions = self
            .call_with_retry(|| self.api_client.list_sessions(auth_token))
            .await?;
        let timer_settings = self
            .call_with_retry(|| self.api_client.fetch_timer_settings(auth_token))
            .await?;

        let now = (self.now_provider)();
        let session_duration_ms = timer_settings
            .map(|settings| settings.session_duration_ms())
            .unwrap_or(session_clock::DEFAULT_SESSION_DURATION_MS);
        let active_session =
            session_clock::select_active_session(&sessions, now, session_duration_ms).cloned();

        let next = BlockingSnapshot {
            blocked_domains,
            active_session,
            session_duration_ms,
            fetched_at: now,
        };
        let transition = self.install_snapshot(next.clone());
        Ok(RefreshOutcome {
            snapshot: next,
            transition,
        })
    }

    /// Sessions-only refresh for the faster poll cadence. Keeps the cached
    /// blocklist and duration from the last full refresh.
    pub async fn refresh_session_status(
        &self,
        auth_token: &str,
    ) -> Result<RefreshOutcome, InfraError> {
        let sessions = self
            .call_with_retry(|| self.api_client.list_sessions(auth_token))
            .await?;

        let now = (self.now_provider)();
        let (blocked_domains, session_duration_ms) = {
            let guard = self.lock_snapshot();
            (guard.blocked_domains.clone(), guard.session_duration_ms)
        };
        let active_session =
            session_clock::select_active_session(&sessions, now, session_duration_ms).cloned();

        let next = BlockingSnapshot {
            blocked_domains,
            active_session,
            session_duration_ms,
            fetched_at: now,
        };
        let transition = self.install_snapshot(next.clone());
        Ok(RefreshOutcome {
            snapshot: next,
            transition,
        })
    }

    /// Local expiry check: once the remaining time hits zero the session is
    /// treated as ended ahead of server confirmation, and the cleared
    /// snapshot is persisted so other contexts bootstrap consistently.
    pub fn expire_if_elapsed(&self) -> Option<SessionTransition> {
        let now = (self.now_provider)();
        let cleared = {
            let mut guard = self.lock_snapshot();
            let Some(session) = guard.active_session.as_ref() else {
                return None;
            };
            if session_clock::is_active(session, now, guard.session_duration_ms) {
                return None;
            }
            guard.active_session = None;
            guard.clone()
        };

        if let Err(error) = self.cache_repository.save(&cleared) {
            warn!("failed to persist expired snapshot: {error}");
        }
        Some(SessionTransition::Ended)
    }

    fn install_snapshot(&self, next: BlockingSnapshot) -> Option<SessionTransition> {
        // Cache persistence is best effort: the server stays authoritative
        // and a write failure must not fail the refresh.
        if let Err(error) = self.cache_repository.save(&next) {
            warn!("failed to persist snapshot cache: {error}");
        }

        let mut guard = self.lock_snapshot();
        let transition = match (guard.active_session.as_ref(), next.active_session.as_ref()) {
            (None, Some(started)) => Some(SessionTransition::Started(started.clone())),
            (Some(_), None) => Some(SessionTransition::Ended),
            (Some(previous), Some(current)) if previous.id != current.id => {
                Some(SessionTransition::Started(current.clone()))
            }
            _ => None,
        };
        *guard = next;
        transition
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, BlockingSnapshot> {
        // The snapshot is a plain value with no internal invariants to
        // corrupt, so a poisoned lock is recoverable.
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn call_with_retry<T, F, Fut>(&self, operation: F) -> Result<T, InfraError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if Self::should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(error: &InfraError) -> bool {
        match error {
            InfraError::Api(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

impl<C, R> SnapshotSource for BlockingStateStore<C, R>
where
    C: FocusApiClient,
    R: SnapshotCacheRepository,
{
    fn snapshot(&self) -> BlockingSnapshot {
        self.current_snapshot()
    }
}
