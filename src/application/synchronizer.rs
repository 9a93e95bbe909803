use crate::application::blocking_store::{SessionTransition, SnapshotSource};
use crate::domain::models::{BlockingSnapshot, FocusSession};
use crate::infrastructure::error::InfraError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub type TabId = String;

/// Fire-and-forget push from the canonical context to a tab. Wire shape
/// matches the extension protocol (`{"action": "sessionStarted", ...}`).
/// Pushes are latency hints only: every consumer can rediscover the true
/// state through its own refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SyncMessage {
    SessionStarted { session: FocusSession },
    SessionEnded,
    /// Best-effort "re-check now" nudge, the cross-tab analog of a
    /// storage-change event. Not authoritative.
    Recheck,
}

/// Typed request/response pair used when a tab attaches and needs the state
/// it may have missed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SyncRequest {
    GetState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SyncResponse {
    State { snapshot: BlockingSnapshot },
}

/// One tab's end of the push channel. Implementations exist for in-process
/// mpsc (tests, embedded consumers) and for webview event emission (shell).
pub trait TabChannel: Send + Sync {
    fn push(&self, message: &SyncMessage) -> Result<(), InfraError>;
}

/// Bridges contexts that share no memory: keeps the registry of open tabs
/// and fans blocking-state changes out to them.
#[derive(Default)]
pub struct CrossContextSynchronizer {
    tabs: Mutex<HashMap<TabId, Arc<dyn TabChannel>>>,
}

impl CrossContextSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tab(&self, tab_id: impl Into<TabId>, channel: Arc<dyn TabChannel>) {
        self.lock_tabs().insert(tab_id.into(), channel);
    }

    pub fn unregister_tab(&self, tab_id: &str) -> bool {
        self.lock_tabs().remove(tab_id).is_some()
    }

    pub fn tab_count(&self) -> usize {
        self.lock_tabs().len()
    }

    /// Pushes a message to every registered tab. A failing channel (its tab
    /// closed, its receiver gone) is skipped without aborting the rest of
    /// the broadcast. Returns the number of successful deliveries.
    pub fn broadcast(&self, message: &SyncMessage) -> usize {
        let channels: Vec<(TabId, Arc<dyn TabChannel>)> = self
            .lock_tabs()
            .iter()
            .map(|(tab_id, channel)| (tab_id.clone(), Arc::clone(channel)))
            .collect();

        let mut delivered = 0;
        for (tab_id, channel) in channels {
            match channel.push(message) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!("failed to push {message:?} to tab {tab_id}: {error}");
                }
            }
        }
        delivered
    }

    /// Maps a store transition onto the push protocol.
    pub fn publish_transition(&self, transition: &SessionTransition) -> usize {
        let message = match transition {
            SessionTransition::Started(session) => SyncMessage::SessionStarted {
                session: session.clone(),
            },
            SessionTransition::Ended => SyncMessage::SessionEnded,
        };
        self.broadcast(&message)
    }

    /// Best-effort re-check hint to all tabs.
    pub fn nudge(&self) -> usize {
        self.broadcast(&SyncMessage::Recheck)
    }

    /// Request/response path for a tab that just attached: it asks the
    /// canonical context for the state instead of waiting for the next push.
    pub fn handle_request(
        &self,
        source: &dyn SnapshotSource,
        request: SyncRequest,
    ) -> SyncResponse {
        match request {
            SyncRequest::GetState => SyncResponse::State {
                snapshot: source.snapshot(),
            },
        }
    }

    fn lock_tabs(&self) -> std::sync::MutexGuard<'_, HashMap<TabId, Arc<dyn TabChannel>>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process channel endpoint backed by an unbounded tokio mpsc sender.
pub struct MpscTabChannel {
    sender: UnboundedSender<SyncMessage>,
}

impl MpscTabChannel {
    pub fn channel() -> (Arc<Self>, UnboundedReceiver<SyncMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl TabChannel for MpscTabChannel {
    fn push(&self, message: &SyncMessage) -> Result<(), InfraError> {
        self.sender
            .send(message.clone())
            .map_err(|error| InfraError::Channel(format!("tab receiver dropped: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::BlockingSnapshot;
    use chrono::{DateTime, Utc};

    struct RecordingChannel {
        messages: Mutex<Vec<SyncMessage>>,
    }

    impl RecordingChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
            })
        }

        fn recorded(&self) -> Vec<SyncMessage> {
            self.messages.lock().expect("messages lock poisoned").clone()
        }
    }

    impl TabChannel for RecordingChannel {
        fn push(&self, message: &SyncMessage) -> Result<(), InfraError> {
            self.messages
                .lock()
                .expect("messages lock poisoned")
                .push(message.clone());
            Ok(())
        }
    }

    struct FailingChannel;

    impl TabChannel for FailingChannel {
        fn push(&self, _message: &SyncMessage) -> Result<(), InfraError> {
            Err(InfraError::Channel("tab went away".to_string()))
        }
    }

    struct FixedSnapshotSource {
        snapshot: BlockingSnapshot,
    }

    impl SnapshotSource for FixedSnapshotSource {
        fn snapshot(&self) -> BlockingSnapshot {
            self.snapshot.clone()
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_session() -> FocusSession {
        FocusSession {
            id: 1,
            name: "Focus Session".to_string(),
            start_time: fixed_time("2026-02-16T09:00:00Z"),
            end_time: None,
            pomodoros_completed: 0,
            total_focus_time: 0,
            is_completed: false,
            is_interrupted: false,
            interruption_reason: None,
        }
    }

    #[test]
    fn broadcast_skips_failing_tab_and_delivers_to_the_rest() {
        let synchronizer = CrossContextSynchronizer::new();
        let healthy = RecordingChannel::new();
        synchronizer.register_tab("tab-1", Arc::clone(&healthy) as Arc<dyn TabChannel>);
        synchronizer.register_tab("tab-2", Arc::new(FailingChannel));
        let also_healthy = RecordingChannel::new();
        synchronizer.register_tab("tab-3", Arc::clone(&also_healthy) as Arc<dyn TabChannel>);

        let delivered = synchronizer.broadcast(&SyncMessage::SessionEnded);

        assert_eq!(delivered, 2);
        assert_eq!(healthy.recorded(), vec![SyncMessage::SessionEnded]);
        assert_eq!(also_healthy.recorded(), vec![SyncMessage::SessionEnded]);
    }

    #[test]
    fn publish_transition_maps_to_protocol_messages() {
        let synchronizer = CrossContextSynchronizer::new();
        let channel = RecordingChannel::new();
        synchronizer.register_tab("tab-1", Arc::clone(&channel) as Arc<dyn TabChannel>);

        synchronizer.publish_transition(&SessionTransition::Started(sample_session()));
        synchronizer.publish_transition(&SessionTransition::Ended);
        synchronizer.nudge();

        let recorded = channel.recorded();
        assert_eq!(recorded.len(), 3);
        assert!(matches!(recorded[0], SyncMessage::SessionStarted { .. }));
        assert_eq!(recorded[1], SyncMessage::SessionEnded);
        assert_eq!(recorded[2], SyncMessage::Recheck);
    }

    #[test]
    fn unregistered_tab_no_longer_receives_pushes() {
        let synchronizer = CrossContextSynchronizer::new();
        let channel = RecordingChannel::new();
        synchronizer.register_tab("tab-1", Arc::clone(&channel) as Arc<dyn TabChannel>);
        assert_eq!(synchronizer.tab_count(), 1);

        assert!(synchronizer.unregister_tab("tab-1"));
        assert!(!synchronizer.unregister_tab("tab-1"));
        assert_eq!(synchronizer.broadcast(&SyncMessage::SessionEnded), 0);
        assert!(channel.recorded().is_empty());
    }

    #[test]
    fn get_state_request_answers_with_current_snapshot() {
        let synchronizer = CrossContextSynchronizer::new();
        let snapshot = BlockingSnapshot {
            blocked_domains: Vec::new(),
            active_session: Some(sample_session()),
            session_duration_ms: 25 * 60 * 1000,
            fetched_at: fixed_time("2026-02-16T09:05:00Z"),
        };
        let source = FixedSnapshotSource {
            snapshot: snapshot.clone(),
        };

        let SyncResponse::State { snapshot: answered } =
            synchronizer.handle_request(&source, SyncRequest::GetState);
        assert_eq!(answered, snapshot);
    }

    #[tokio::test]
    async fn mpsc_channel_delivers_messages_until_receiver_drops() {
        let synchronizer = CrossContextSynchronizer::new();
        let (channel, mut receiver) = MpscTabChannel::channel();
        synchronizer.register_tab("tab-1", channel as Arc<dyn TabChannel>);

        assert_eq!(synchronizer.broadcast(&SyncMessage::SessionEnded), 1);
        assert_eq!(receiver.recv().await, Some(SyncMessage::SessionEnded));

        drop(receiver);
        assert_eq!(synchronizer.broadcast(&SyncMessage::Recheck), 0);
    }

    #[test]
    fn messages_serialize_with_the_extension_action_tag() {
        let ended = serde_json::to_value(SyncMessage::SessionEnded).expect("serialize");
        assert_eq!(ended, serde_json::json!({"action": "sessionEnded"}));

        let started = serde_json::to_value(SyncMessage::SessionStarted {
            session: sample_session(),
        })
        .expect("serialize");
        assert_eq!(started.get("action").and_then(serde_json::Value::as_str), Some("sessionStarted"));
    }
}
