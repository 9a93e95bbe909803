mod application;
mod domain;
mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    block_surface_tick_impl, check_current_page_impl, complete_focus_session_impl,
    dismiss_block_impl, get_blocked_domains_impl, get_blocking_state_impl,
    get_session_history_impl, get_session_stats_impl, handle_navigation_impl, interrupt_focus_session_impl,
    login_impl, logout_impl, poll_blocklist_once, poll_session_status_once,
    refresh_blocking_state_impl, register_tab_impl, start_focus_session_impl,
    unregister_tab_impl, AppState, BlockingStateResponse, CountdownTickResponse,
    NavigationDecisionResponse, SessionStatsResponse,
};
use application::synchronizer::{SyncMessage, TabChannel};
use domain::models::{BlockedDomain, FocusSession};
use infrastructure::error::InfraError;
use log::{debug, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{Emitter, Manager};

const SYNC_EVENT_NAME: &str = "blocking-sync";

#[derive(Debug, Serialize)]
struct BootstrapResponse {
    workspace_root: String,
    database_path: String,
}

/// Pushes sync messages into one webview as events; the frontend's listener
/// plays the content-script role.
struct WebviewTabChannel {
    handle: tauri::AppHandle,
    label: String,
}

impl TabChannel for WebviewTabChannel {
    fn push(&self, message: &SyncMessage) -> Result<(), InfraError> {
        self.handle
            .emit_to(&self.label, SYNC_EVENT_NAME, message)
            .map_err(|error| InfraError::Channel(format!("event emit failed: {error}")))
    }
}

#[tauri::command]
fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}

#[tauri::command]
fn ping() -> &'static str {
    "pong"
}

#[tauri::command]
fn login(state: tauri::State<'_, AppState>, token: String) -> Result<(), String> {
    login_impl(state.inner(), token).map_err(|error| state.command_error("login", &error))
}

#[tauri::command]
fn logout(state: tauri::State<'_, AppState>) -> Result<(), String> {
    logout_impl(state.inner()).map_err(|error| state.command_error("logout", &error))
}

#[tauri::command]
async fn refresh_blocking_state(
    state: tauri::State<'_, AppState>,
) -> Result<BlockingStateResponse, String> {
    refresh_blocking_state_impl(state.inner())
        .await
        .map_err(|error| state.command_error("refresh_blocking_state", &error))
}

#[tauri::command]
fn get_blocking_state(state: tauri::State<'_, AppState>) -> Result<BlockingStateResponse, String> {
    get_blocking_state_impl(state.inner())
        .map_err(|error| state.command_error("get_blocking_state", &error))
}

#[tauri::command]
async fn start_focus_session(
    state: tauri::State<'_, AppState>,
    name: Option<String>,
) -> Result<FocusSession, String> {
    start_focus_session_impl(state.inner(), name)
        .await
        .map_err(|error| state.command_error("start_focus_session", &error))
}

#[tauri::command]
async fn complete_focus_session(
    state: tauri::State<'_, AppState>,
) -> Result<FocusSession, String> {
    complete_focus_session_impl(state.inner())
        .await
        .map_err(|error| state.command_error("complete_focus_session", &error))
}

#[tauri::command]
async fn interrupt_focus_session(
    state: tauri::State<'_, AppState>,
    reason: Option<String>,
) -> Result<FocusSession, String> {
    interrupt_focus_session_impl(state.inner(), reason)
        .await
        .map_err(|error| state.command_error("interrupt_focus_session", &error))
}

#[tauri::command]
fn register_tab(
    app_handle: tauri::AppHandle,
    state: tauri::State<'_, AppState>,
    tab_id: String,
) -> Result<BlockingStateResponse, String> {
    let channel = Arc::new(WebviewTabChannel {
        handle: app_handle,
        label: tab_id.clone(),
    });
    register_tab_impl(state.inner(), tab_id, channel)
        .map_err(|error| state.command_error("register_tab", &error))
}

#[tauri::command]
fn unregister_tab(state: tauri::State<'_, AppState>, tab_id: String) -> Result<bool, String> {
    unregister_tab_impl(state.inner(), tab_id)
        .map_err(|error| state.command_error("unregister_tab", &error))
}

#[tauri::command]
fn handle_navigation(
    state: tauri::State<'_, AppState>,
    tab_id: String,
    url: String,
) -> Result<NavigationDecisionResponse, String> {
    handle_navigation_impl(state.inner(), tab_id, url)
        .map_err(|error| state.command_error("handle_navigation", &error))
}

#[tauri::command]
fn check_current_page(
    state: tauri::State<'_, AppState>,
    tab_id: String,
    url: String,
) -> Result<NavigationDecisionResponse, String> {
    check_current_page_impl(state.inner(), tab_id, url)
        .map_err(|error| state.command_error("check_current_page", &error))
}

#[tauri::command]
fn dismiss_block(state: tauri::State<'_, AppState>, tab_id: String) -> Result<String, String> {
    dismiss_block_impl(state.inner(), tab_id)
        .map_err(|error| state.command_error("dismiss_block", &error))
}

#[tauri::command]
fn block_surface_tick(
    state: tauri::State<'_, AppState>,
    tab_id: String,
) -> Result<CountdownTickResponse, String> {
    block_surface_tick_impl(state.inner(), tab_id)
        .map_err(|error| state.command_error("block_surface_tick", &error))
}

#[tauri::command]
fn get_blocked_domains(state: tauri::State<'_, AppState>) -> Result<Vec<BlockedDomain>, String> {
    get_blocked_domains_impl(state.inner())
        .map_err(|error| state.command_error("get_blocked_domains", &error))
}

#[tauri::command]
async fn get_session_history(
    state: tauri::State<'_, AppState>,
) -> Result<Vec<FocusSession>, String> {
    get_session_history_impl(state.inner())
        .await
        .map_err(|error| state.command_error("get_session_history", &error))
}

#[tauri::command]
async fn get_session_stats(
    state: tauri::State<'_, AppState>,
) -> Result<SessionStatsResponse, String> {
    get_session_stats_impl(state.inner())
        .await
        .map_err(|error| state.command_error("get_session_stats", &error))
}

/// The polling loops are this process's alarms: a slower full refresh for
/// the blocklist and a faster sessions-only refresh plus local expiry check.
/// Errors keep the stale snapshot and are retried on the next tick.
async fn run_poll_loops(handle: tauri::AppHandle) {
    let state = handle.state::<AppState>();
    let poll = state.poll_config().clone();
    let mut blocklist_tick =
        tokio::time::interval(std::time::Duration::from_secs(poll.blocklist_poll_seconds));
    let mut session_tick =
        tokio::time::interval(std::time::Duration::from_secs(poll.session_poll_seconds));

    loop {
        tokio::select! {
            _ = blocklist_tick.tick() => {
                match poll_blocklist_once(state.inner()).await {
                    Ok(true) => {}
                    Ok(false) => debug!("skipping blocklist poll: no api token stored"),
                    Err(error) => warn!("blocklist poll failed, keeping stale snapshot: {error}"),
                }
            }
            _ = session_tick.tick() => {
                match poll_session_status_once(state.inner()).await {
                    Ok(_) => {}
                    Err(error) => warn!("session poll failed, keeping stale snapshot: {error}"),
                }
            }
        }
    }
}

pub fn run() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let workspace_root = std::env::current_dir().expect("failed to resolve current directory");
    let app_state = AppState::new(workspace_root).expect("failed to initialize app state");

    tauri::Builder::default()
        .manage(app_state)
        .setup(|app| {
            let handle = app.handle().clone();
            tauri::async_runtime::spawn(run_poll_loops(handle));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            ping,
            bootstrap,
            login,
            logout,
            refresh_blocking_state,
            get_blocking_state,
            start_focus_session,
            complete_focus_session,
            interrupt_focus_session,
            register_tab,
            unregister_tab,
            handle_navigation,
            check_current_page,
            dismiss_block,
            block_surface_tick,
            get_blocked_domains,
            get_session_history,
            get_session_stats
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}
