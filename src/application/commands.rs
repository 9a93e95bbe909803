use crate::application::blocking_store::{BlockingStateStore, SessionTransition, SnapshotSource};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::interceptor::{
    BlockSurfaceCountdown, NavigationInterceptor, NavigationOutcome,
};
use crate::application::synchronizer::{
    CrossContextSynchronizer, SyncMessage, SyncRequest, SyncResponse, TabChannel,
};
use crate::domain::models::{BlockedDomain, BlockingSnapshot, FocusSession};
use crate::infrastructure::config::{
    read_api_base_url, read_poll_config, read_timezone, PollConfig,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_api_client::{
    FocusApiClient, ReqwestFocusApiClient, SessionUpdate,
};
use crate::infrastructure::snapshot_cache::SqliteSnapshotCacheRepository;
use crate::infrastructure::token_store::{KeyringTokenStore, TokenStore};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::warn;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_SESSION_NAME: &str = "Focus Session";
const STATS_DAILY_WINDOW_DAYS: i64 = 30;
const STATS_WEEKLY_WINDOW_DAYS: i64 = 7;

type AppBlockingStore = BlockingStateStore<ReqwestFocusApiClient, SqliteSnapshotCacheRepository>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    timezone: Tz,
    poll: PollConfig,
    api_client: Arc<ReqwestFocusApiClient>,
    store: Arc<AppBlockingStore>,
    synchronizer: Arc<CrossContextSynchronizer>,
    token_store: Arc<dyn TokenStore>,
    runtime: Mutex<RuntimeState>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = workspace_root.join("config");
        let logs_dir = workspace_root.join("logs");

        let api_base_url = read_api_base_url(&config_dir)?;
        let poll = read_poll_config(&config_dir)?;
        let timezone = read_timezone(&config_dir)?
            .and_then(|raw| match raw.parse::<Tz>() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    warn!("unknown timezone '{raw}', falling back to UTC");
                    None
                }
            })
            .unwrap_or(Tz::UTC);

        let api_client = Arc::new(ReqwestFocusApiClient::new(api_base_url));
        let cache_repository = Arc::new(SqliteSnapshotCacheRepository::new(
            &bootstrap.database_path,
        ));
        let store = Arc::new(BlockingStateStore::new(
            Arc::clone(&api_client),
            cache_repository,
        ));
        if let Err(error) = store.bootstrap() {
            warn!("snapshot cache bootstrap failed: {error}");
        }

        Ok(Self {
            config_dir,
            database_path: bootstrap.database_path,
            logs_dir,
            timezone,
            poll,
            api_client,
            store,
            synchronizer: Arc::new(CrossContextSynchronizer::new()),
            token_store: Arc::new(KeyringTokenStore::default()),
            runtime: Mutex::new(RuntimeState::default()),
            log_guard: Mutex::new(()),
        })
    }

    pub fn with_token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = token_store;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn snapshot_source(&self) -> Arc<dyn SnapshotSource> {
        Arc::clone(&self.store) as Arc<dyn SnapshotSource>
    }
}

#[derive(Default)]
struct RuntimeState {
    interceptors: HashMap<String, NavigationInterceptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockingStateResponse {
    pub is_session_active: bool,
    pub active_session: Option<FocusSession>,
    pub time_remaining_ms: i64,
    pub session_duration_ms: i64,
    pub blocked_domains: Vec<BlockedDomain>,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationDecisionResponse {
    pub blocked: bool,
    pub matched_domain: Option<String>,
    pub time_remaining_ms: i64,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountdownTickResponse {
    pub remaining_ms: i64,
    pub display: String,
    pub expired: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStatsResponse {
    pub total_sessions: u32,
    pub completed_sessions: u32,
    pub total_focus_time_seconds: u64,
    pub daily_focus_time: HashMap<String, u64>,
    pub weekly_focus_time: Vec<u64>,
}

pub fn login_impl(state: &AppState, token: String) -> Result<(), InfraError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(InfraError::InvalidConfig(
            "token must not be empty".to_string(),
        ));
    }
    state.token_store.save_token(token)?;
    state.log_info("login", "stored api token");
    Ok(())
}

pub fn logout_impl(state: &AppState) -> Result<(), InfraError> {
    state.token_store.delete_token()?;
    state.log_info("logout", "cleared api token");
    Ok(())
}

pub async fn refresh_blocking_state_impl(
    state: &AppState,
) -> Result<BlockingStateResponse, InfraError> {
    let token = required_auth_token(state)?;
    let outcome = state.store.refresh(&token).await?;
    apply_transition(state, outcome.transition);
    Ok(to_blocking_state_response(&outcome.snapshot, Utc::now()))
}

pub fn get_blocking_state_impl(state: &AppState) -> Result<BlockingStateResponse, InfraError> {
    let snapshot = state.store.current_snapshot();
    Ok(to_blocking_state_response(&snapshot, Utc::now()))
}

/// Blocklist-cadence poll tick. Returns false when no token is stored yet;
/// the loop simply tries again on the next tick.
pub async fn poll_blocklist_once(state: &AppState) -> Result<bool, InfraError> {
    let Some(token) = try_auth_token(state)? else {
        return Ok(false);
    };
    let previous_domains = state.store.current_snapshot().blocked_domains;
    let outcome = state.store.refresh(&token).await?;
    apply_transition(state, outcome.transition);

    // A changed blocklist carries no session transition of its own, so tabs
    // only get a best-effort hint to re-check their current location.
    if state.poll.cross_tab_nudge && outcome.snapshot.blocked_domains != previous_domains {
        state.synchronizer.nudge();
    }
    Ok(true)
}

/// Session-cadence poll tick: local expiry check first (so `remaining == 0`
/// takes effect ahead of server confirmation), then a sessions-only fetch.
pub async fn poll_session_status_once(state: &AppState) -> Result<bool, InfraError> {
    apply_transition(state, state.store.expire_if_elapsed());

    let Some(token) = try_auth_token(state)? else {
        return Ok(false);
    };
    let outcome = state.store.refresh_session_status(&token).await?;
    apply_transition(state, outcome.transition);
    Ok(true)
}

pub async fn start_focus_session_impl(
    state: &AppState,
    name: Option<String>,
) -> Result<FocusSession, InfraError> {
    let token = required_auth_token(state)?;
    let now = Utc::now();
    if state.store.current_snapshot().has_active_session(now) {
        return Err(InfraError::InvalidConfig(
            "a focus session is already active".to_string(),
        ));
    }

    let name = name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SESSION_NAME);
    let created = state.api_client.create_session(&token, name, now).await?;

    match state.store.refresh_session_status(&token).await {
        Ok(outcome) => apply_transition(state, outcome.transition),
        Err(error) => state.log_error("start_focus_session", &error.to_string()),
    }

    state.log_info(
        "start_focus_session",
        &format!("started session_id={}", created.id),
    );
    Ok(created)
}

pub async fn complete_focus_session_impl(state: &AppState) -> Result<FocusSession, InfraError> {
    finish_active_session(state, "complete_focus_session", |session, now| SessionUpdate {
        end_time: Some(now),
        is_completed: Some(true),
        pomodoros_completed: Some(session.pomodoros_completed.saturating_add(1)),
        total_focus_time: Some(elapsed_focus_seconds(session, now)),
        ..SessionUpdate::default()
    })
    .await
}

pub async fn interrupt_focus_session_impl(
    state: &AppState,
    reason: Option<String>,
) -> Result<FocusSession, InfraError> {
    let reason = reason
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("interrupted")
        .to_string();

    finish_active_session(state, "interrupt_focus_session", move |session, now| {
        SessionUpdate {
            end_time: Some(now),
            is_interrupted: Some(true),
            interruption_reason: Some(reason.clone()),
            total_focus_time: Some(elapsed_focus_seconds(session, now)),
            ..SessionUpdate::default()
        }
    })
    .await
}

pub fn register_tab_impl(
    state: &AppState,
    tab_id: String,
    channel: Arc<dyn TabChannel>,
) -> Result<BlockingStateResponse, InfraError> {
    let tab_id = tab_id.trim();
    if tab_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "tab_id must not be empty".to_string(),
        ));
    }

    state.synchronizer.register_tab(tab_id, channel);
    {
        let mut runtime = lock_runtime(state)?;
        runtime
            .interceptors
            .insert(tab_id.to_string(), NavigationInterceptor::new(state.snapshot_source()));
    }

    // The attach answers with the state the tab may have missed, the same
    // request/response a content script performs on initialization.
    let SyncResponse::State { snapshot } = state
        .synchronizer
        .handle_request(&*state.store, SyncRequest::GetState);

    state.log_info("register_tab", &format!("registered tab_id={tab_id}"));
    Ok(to_blocking_state_response(&snapshot, Utc::now()))
}

pub fn unregister_tab_impl(state: &AppState, tab_id: String) -> Result<bool, InfraError> {
    let tab_id = tab_id.trim();
    if tab_id.is_empty() {
        return Ok(false);
    }

    let removed_channel = state.synchronizer.unregister_tab(tab_id);
    let removed_interceptor = {
        let mut runtime = lock_runtime(state)?;
        runtime.interceptors.remove(tab_id).is_some()
    };

    if removed_channel || removed_interceptor {
        state.log_info("unregister_tab", &format!("unregistered tab_id={tab_id}"));
    }
    Ok(removed_channel || removed_interceptor)
}

pub fn handle_navigation_impl(
    state: &AppState,
    tab_id: String,
    url: String,
) -> Result<NavigationDecisionResponse, InfraError> {
    with_tab_interceptor(state, &tab_id, |interceptor| {
        interceptor.handle_navigation(&url)
    })
    .inspect(|response| {
        if response.blocked {
            state.log_info(
                "handle_navigation",
                &format!("blocked navigation to {url} in tab {tab_id}"),
            );
        }
    })
}

pub fn check_current_page_impl(
    state: &AppState,
    tab_id: String,
    url: String,
) -> Result<NavigationDecisionResponse, InfraError> {
    with_tab_interceptor(state, &tab_id, |interceptor| {
        interceptor.check_current_location(&url)
    })
}

pub fn dismiss_block_impl(state: &AppState, tab_id: String) -> Result<String, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let Some(interceptor) = runtime.interceptors.get_mut(tab_id.trim()) else {
        return Err(InfraError::InvalidConfig(format!(
            "tab not registered: {tab_id}"
        )));
    };
    interceptor.dismiss_block();
    Ok(interceptor.phase().as_str().to_string())
}

/// One display tick of the block surface shown in `tab_id`. When the
/// session has run out the tab's interceptor falls back to the snapshot,
/// which dismisses the surface and re-allows navigation.
pub fn block_surface_tick_impl(
    state: &AppState,
    tab_id: String,
) -> Result<CountdownTickResponse, InfraError> {
    let tick = BlockSurfaceCountdown::new(state.snapshot_source()).tick();

    if tick.expired {
        let mut runtime = lock_runtime(state)?;
        if let Some(interceptor) = runtime.interceptors.get_mut(tab_id.trim()) {
            interceptor.apply_message(&SyncMessage::Recheck);
        }
    }

    Ok(CountdownTickResponse {
        remaining_ms: tick.remaining_ms,
        display: tick.display,
        expired: tick.expired,
    })
}

pub fn get_blocked_domains_impl(state: &AppState) -> Result<Vec<BlockedDomain>, InfraError> {
    Ok(state.store.current_snapshot().blocked_domains)
}

pub async fn get_session_history_impl(
    state: &AppState,
) -> Result<Vec<FocusSession>, InfraError> {
    let token = required_auth_token(state)?;
    let mut sessions = state.api_client.list_sessions(&token).await?;
    sessions.sort_by(|left, right| right.start_time.cmp(&left.start_time));
    Ok(sessions)
}

pub async fn get_session_stats_impl(
    state: &AppState,
) -> Result<SessionStatsResponse, InfraError> {
    let token = required_auth_token(state)?;
    let sessions = state.api_client.list_sessions(&token).await?;
    Ok(aggregate_session_stats(&sessions, Utc::now(), state.timezone))
}

fn aggregate_session_stats(
    sessions: &[FocusSession],
    now: DateTime<Utc>,
    timezone: Tz,
) -> SessionStatsResponse {
    let today = now.with_timezone(&timezone).date_naive();
    let mut daily_focus_time: HashMap<String, u64> = HashMap::new();
    let mut weekly_focus_time = vec![0u64; STATS_WEEKLY_WINDOW_DAYS as usize];

    for session in sessions {
        let session_day = session.start_time.with_timezone(&timezone).date_naive();
        let day_diff = (today - session_day).num_days();
        if day_diff < 0 {
            continue;
        }
        let focus_seconds = u64::from(session.total_focus_time);
        if day_diff < STATS_DAILY_WINDOW_DAYS {
            *daily_focus_time
                .entry(session_day.to_string())
                .or_insert(0) += focus_seconds;
        }
        if day_diff < STATS_WEEKLY_WINDOW_DAYS {
            // index 6 is today, index 0 is six days ago
            weekly_focus_time[(STATS_WEEKLY_WINDOW_DAYS - 1 - day_diff) as usize] +=
                focus_seconds;
        }
    }

    SessionStatsResponse {
        total_sessions: sessions.len() as u32,
        completed_sessions: sessions.iter().filter(|s| s.is_completed).count() as u32,
        total_focus_time_seconds: sessions
            .iter()
            .map(|s| u64::from(s.total_focus_time))
            .sum(),
        daily_focus_time,
        weekly_focus_time,
    }
}

async fn finish_active_session<F>(
    state: &AppState,
    command: &str,
    build_update: F,
) -> Result<FocusSession, InfraError>
where
    F: Fn(&FocusSession, DateTime<Utc>) -> SessionUpdate,
{
    let token = required_auth_token(state)?;
    let now = Utc::now();
    let snapshot = state.store.current_snapshot();
    let Some(session) = snapshot
        .active_session
        .as_ref()
        .filter(|_| snapshot.has_active_session(now))
    else {
        return Err(InfraError::InvalidConfig(
            "no active focus session".to_string(),
        ));
    };

    let update = build_update(session, now);
    let updated = state
        .api_client
        .update_session(&token, session.id, &update)
        .await?;

    let outcome = state.store.refresh_session_status(&token).await?;
    apply_transition(state, outcome.transition);

    state.log_info(command, &format!("finished session_id={}", updated.id));
    Ok(updated)
}

fn elapsed_focus_seconds(session: &FocusSession, now: DateTime<Utc>) -> u32 {
    now.signed_duration_since(session.start_time)
        .num_seconds()
        .clamp(0, i64::from(u32::MAX)) as u32
}

fn with_tab_interceptor<F>(
    state: &AppState,
    tab_id: &str,
    act: F,
) -> Result<NavigationDecisionResponse, InfraError>
where
    F: FnOnce(&mut NavigationInterceptor) -> NavigationOutcome,
{
    let tab_id = tab_id.trim();
    if tab_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "tab_id must not be empty".to_string(),
        ));
    }

    let mut runtime = lock_runtime(state)?;
    // A tab that navigates before registering attaches lazily, covering
    // contexts created after the session-start push already went out.
    let interceptor = runtime
        .interceptors
        .entry(tab_id.to_string())
        .or_insert_with(|| NavigationInterceptor::new(state.snapshot_source()));

    let outcome = act(interceptor);
    let phase = interceptor.phase().as_str().to_string();
    Ok(match outcome {
        NavigationOutcome::Allow => NavigationDecisionResponse {
            blocked: false,
            matched_domain: None,
            time_remaining_ms: 0,
            phase,
        },
        NavigationOutcome::Blocked {
            matched_domain,
            time_remaining_ms,
        } => NavigationDecisionResponse {
            blocked: true,
            matched_domain: Some(matched_domain),
            time_remaining_ms,
            phase,
        },
    })
}

fn apply_transition(state: &AppState, transition: Option<SessionTransition>) {
    let Some(transition) = transition else {
        return;
    };

    let delivered = state.synchronizer.publish_transition(&transition);
    let message = match &transition {
        SessionTransition::Started(session) => SyncMessage::SessionStarted {
            session: session.clone(),
        },
        SessionTransition::Ended => SyncMessage::SessionEnded,
    };

    match lock_runtime(state) {
        Ok(mut runtime) => {
            for interceptor in runtime.interceptors.values_mut() {
                interceptor.apply_message(&message);
            }
        }
        Err(error) => state.log_error("sync", &error.to_string()),
    }

    state.log_info(
        "sync",
        &format!("pushed session transition to {delivered} tabs"),
    );
}

fn required_auth_token(state: &AppState) -> Result<String, InfraError> {
    try_auth_token(state)?.ok_or(InfraError::Unauthorized)
}

fn try_auth_token(state: &AppState) -> Result<Option<String>, InfraError> {
    Ok(state
        .token_store
        .load_token()?
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty()))
}

fn to_blocking_state_response(
    snapshot: &BlockingSnapshot,
    now: DateTime<Utc>,
) -> BlockingStateResponse {
    BlockingStateResponse {
        is_session_active: snapshot.has_active_session(now),
        active_session: snapshot.active_session.clone(),
        time_remaining_ms: snapshot.remaining_ms(now),
        session_duration_ms: snapshot.session_duration_ms,
        blocked_domains: snapshot.blocked_domains.clone(),
        fetched_at: snapshot.fetched_at.to_rfc3339(),
    }
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
}
