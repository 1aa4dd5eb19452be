//! Call service
//!
//! Entry point for the call use cases. Owns the registry of sessions running
//! in this process; two clients talking to the same store are two services.

use crate::application::call::error::{CallError, CallResult};
use crate::application::call::handle::{request, CallHandle, SessionCommand, SessionStatus};
use crate::application::call::incoming::IncomingCallWatcher;
use crate::application::call::session::{
    write_terminal_status, SessionEntry, SessionIo, SessionRegistry, SessionSettings, SessionTask,
};
use crate::config::Config;
use crate::domain::call::{
    CallAttempt, CallDocument, CallDomainService, CallRole, CallStatus, CallType, EndReason,
    IncomingCallFilter, Participants,
};
use crate::domain::call_history::{CallHistoryEntry, CallHistoryLogger, HistoryStatus};
use crate::domain::media::{
    IceServer, MediaConstraints, MediaEngine, MediaStream, PeerConnection, PeerEventReceiver,
};
use crate::domain::shared::value_objects::{ChatId, SessionId, UserId};
use crate::domain::signaling::{DocumentPath, Precondition, SignalingStore, StoreError, Subscription};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

fn constraints_for(call_type: CallType) -> MediaConstraints {
    if call_type.wants_video() {
        MediaConstraints::audio_video()
    } else {
        MediaConstraints::audio_only()
    }
}

async fn release(pc: &Arc<dyn PeerConnection>, stream: &MediaStream) {
    pc.close().await;
    stream.stop_all();
}

/// Media and transport acquired for a session that is not running yet
struct PreparedSession {
    attempt: CallAttempt,
    local_uid: UserId,
    pc: Arc<dyn PeerConnection>,
    local_stream: MediaStream,
    subscription: Subscription,
    peer_events: PeerEventReceiver,
}

pub struct CallService {
    store: Arc<dyn SignalingStore>,
    media: Arc<dyn MediaEngine>,
    history: Arc<dyn CallHistoryLogger>,
    ice_servers: Vec<IceServer>,
    stale_after: chrono::Duration,
    settings: SessionSettings,
    sessions: SessionRegistry,
}

impl CallService {
    pub fn new(
        store: Arc<dyn SignalingStore>,
        media: Arc<dyn MediaEngine>,
        history: Arc<dyn CallHistoryLogger>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            media,
            history,
            ice_servers: config.media.ice_servers.clone(),
            stale_after: config.signaling.stale_after(),
            settings: SessionSettings {
                grace_delay: config.signaling.grace_delay(),
                ring_timeout: config.signaling.ring_timeout(),
                quality_interval: config.quality.sample_interval(),
                quality_thresholds: config.quality.thresholds.clone(),
            },
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Place an outgoing call
    pub async fn start_call(
        &self,
        chat_id: &ChatId,
        caller_uid: &UserId,
        callee_uid: &UserId,
        call_type: CallType,
    ) -> CallResult<CallHandle> {
        CallDomainService::validate_call_setup(caller_uid, callee_uid)?;

        let chat = self.store.read(&DocumentPath::chat(chat_id)).await?;
        CallDomainService::check_participant(chat.as_ref(), caller_uid)?;
        CallDomainService::check_participant(chat.as_ref(), callee_uid)
            .map_err(|e| CallError::Validation(e.to_string()))?;

        let session_id = SessionId::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        self.reserve(chat_id, session_id, CallRole::Caller, commands_tx.clone())
            .await?;

        let participants = Participants::new(caller_uid.clone(), callee_uid.clone());
        let attempt = CallAttempt::new(
            session_id,
            chat_id.clone(),
            CallRole::Caller,
            participants,
            call_type,
        );

        match self.prepare_outgoing(attempt).await {
            Ok(prepared) => {
                info!(
                    chat_id = %chat_id,
                    session_id = %session_id,
                    call_type = call_type.as_str(),
                    "Outgoing call ringing"
                );
                Ok(self.spawn_session(prepared, commands_tx, commands_rx))
            }
            Err(e) => {
                warn!(chat_id = %chat_id, "Failed to start call: {}", e);
                self.unregister(chat_id, session_id).await;
                Err(e)
            }
        }
    }

    async fn prepare_outgoing(&self, mut attempt: CallAttempt) -> CallResult<PreparedSession> {
        let chat_id = attempt.chat_id().clone();
        let path = DocumentPath::current_call(&chat_id);
        let caller_uid = attempt.participants().caller().clone();
        let callee_uid = attempt.participants().callee().clone();
        let call_type = attempt.call_type();

        self.clear_line(&chat_id).await?;

        let local_stream = self.media.get_local_stream(constraints_for(call_type)).await?;
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let pc = match self.media.create_peer_connection(&self.ice_servers, peer_tx).await {
            Ok(pc) => pc,
            Err(e) => {
                local_stream.stop_all();
                return Err(e.into());
            }
        };

        let negotiated = async {
            pc.add_stream(&local_stream).await?;
            let offer = pc.create_offer().await?;
            pc.set_local_description(offer.clone()).await?;

            // Never retried: a second offer would race the callee
            self.store
                .create(
                    &path,
                    CallDocument::ringing_fields(&caller_uid, &callee_uid, call_type, &offer.sdp),
                )
                .await
                .map_err(|e| match e {
                    // The other participant rang first
                    StoreError::AlreadyExists(_) => CallError::LineBusy(chat_id.clone()),
                    other => other.into(),
                })?;

            match self.store.subscribe(&path).await {
                Ok(subscription) => Ok::<_, CallError>(subscription),
                Err(e) => {
                    if let Err(delete_err) = self.store.delete(&path).await {
                        warn!(chat_id = %chat_id, "Failed to remove orphaned call document: {}", delete_err);
                    }
                    Err(e.into())
                }
            }
        }
        .await;

        let subscription = match negotiated {
            Ok(subscription) => subscription,
            Err(e) => {
                release(&pc, &local_stream).await;
                return Err(e);
            }
        };

        if let Err(e) = attempt.ring() {
            subscription.unsubscribe();
            release(&pc, &local_stream).await;
            return Err(e.into());
        }

        Ok(PreparedSession {
            attempt,
            local_uid: caller_uid,
            pc,
            local_stream,
            subscription,
            peer_events,
        })
    }

    /// Take up the call ringing for `callee_uid`
    pub async fn answer_call(&self, chat_id: &ChatId, callee_uid: &UserId) -> CallResult<CallHandle> {
        let chat = self.store.read(&DocumentPath::chat(chat_id)).await?;
        CallDomainService::check_participant(chat.as_ref(), callee_uid)?;

        let session_id = SessionId::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        self.reserve(chat_id, session_id, CallRole::Callee, commands_tx.clone())
            .await?;

        match self.prepare_incoming(session_id, chat_id, callee_uid).await {
            Ok(prepared) => {
                info!(chat_id = %chat_id, session_id = %session_id, "Answering incoming call");
                Ok(self.spawn_session(prepared, commands_tx, commands_rx))
            }
            Err(e) => {
                warn!(chat_id = %chat_id, "Failed to answer call: {}", e);
                self.unregister(chat_id, session_id).await;
                Err(e)
            }
        }
    }

    async fn prepare_incoming(
        &self,
        session_id: SessionId,
        chat_id: &ChatId,
        callee_uid: &UserId,
    ) -> CallResult<PreparedSession> {
        let path = DocumentPath::current_call(chat_id);
        let raw = self
            .store
            .read(&path)
            .await?
            .ok_or_else(|| CallError::NoIncomingCall(chat_id.clone()))?;
        let doc = CallDocument::from_document(&raw)?;

        if &doc.callee_uid != callee_uid
            || doc.status() != CallStatus::Ringing
            || doc.is_stale(Utc::now(), self.stale_after)
        {
            return Err(CallError::NoIncomingCall(chat_id.clone()));
        }

        let mut attempt = CallAttempt::new(
            session_id,
            chat_id.clone(),
            CallRole::Callee,
            Participants::new(doc.caller_uid.clone(), doc.callee_uid.clone()),
            doc.call_type,
        );

        let local_stream = self
            .media
            .get_local_stream(constraints_for(doc.call_type))
            .await?;
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let pc = match self.media.create_peer_connection(&self.ice_servers, peer_tx).await {
            Ok(pc) => pc,
            Err(e) => {
                local_stream.stop_all();
                return Err(e.into());
            }
        };

        let subscribed = async {
            pc.add_stream(&local_stream).await?;
            attempt.ring()?;
            let subscription = self.store.subscribe(&path).await?;
            Ok::<_, CallError>(subscription)
        }
        .await;

        match subscribed {
            Ok(subscription) => Ok(PreparedSession {
                attempt,
                local_uid: callee_uid.clone(),
                pc,
                local_stream,
                subscription,
                peer_events,
            }),
            Err(e) => {
                release(&pc, &local_stream).await;
                Err(e)
            }
        }
    }

    fn spawn_session(
        &self,
        prepared: PreparedSession,
        commands_tx: mpsc::UnboundedSender<SessionCommand>,
        commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> CallHandle {
        let PreparedSession {
            attempt,
            local_uid,
            pc,
            local_stream,
            subscription,
            peer_events,
        } = prepared;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let handle = CallHandle::new(
            attempt.chat_id().clone(),
            attempt.session_id(),
            attempt.role(),
            attempt.call_type(),
            local_stream.clone(),
            commands_tx,
            events_rx,
            status_rx,
            self.store.clone(),
        );

        let task = SessionTask::new(
            attempt,
            local_uid,
            pc,
            local_stream,
            self.store.clone(),
            self.history.clone(),
            self.sessions.clone(),
            self.settings.clone(),
            events_tx,
            status_tx,
        );
        tokio::spawn(task.run(SessionIo {
            subscription,
            peer_events,
            commands: commands_rx,
        }));

        handle
    }

    /// Withdraw an unanswered outgoing call
    pub async fn cancel_call(&self, chat_id: &ChatId) -> CallResult<()> {
        if let Some(entry) = self.session(chat_id).await {
            return request(&entry.commands, SessionCommand::Cancel).await;
        }

        let Some(doc) = self.read_call(chat_id).await? else {
            return Ok(());
        };
        match doc.status() {
            CallStatus::Ringing => self.cancel_document(chat_id, &doc).await,
            CallStatus::Answered => Err(CallError::InvalidState(
                "cannot cancel an answered call".to_string(),
            )),
            CallStatus::Cancelled | CallStatus::Ended => Ok(()),
        }
    }

    /// Hang up; cancels a call that is still ringing
    pub async fn end_call(&self, chat_id: &ChatId) -> CallResult<()> {
        if let Some(entry) = self.session(chat_id).await {
            return request(&entry.commands, SessionCommand::Hangup).await;
        }

        let Some(doc) = self.read_call(chat_id).await? else {
            return Ok(());
        };
        match doc.status() {
            CallStatus::Ringing => self.cancel_document(chat_id, &doc).await,
            CallStatus::Answered => {
                let result = write_terminal_status(
                    self.store.as_ref(),
                    &DocumentPath::current_call(chat_id),
                    CallDocument::end_fields(EndReason::Hangup),
                    Precondition::Exists,
                    self.settings.grace_delay,
                )
                .await;
                match result {
                    Ok(()) => {
                        self.log_detached(chat_id, &doc, HistoryStatus::Completed).await;
                        Ok(())
                    }
                    Err(StoreError::NotFound(_)) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            CallStatus::Cancelled | CallStatus::Ended => Ok(()),
        }
    }

    /// Reject an incoming call that has not been answered
    pub async fn decline_call(&self, chat_id: &ChatId, callee_uid: &UserId) -> CallResult<()> {
        if let Some(entry) = self.session(chat_id).await {
            if entry.role != CallRole::Callee {
                return Err(CallError::InvalidState(
                    "only the callee can decline a call".to_string(),
                ));
            }
            return request(&entry.commands, SessionCommand::Decline).await;
        }

        let Some(doc) = self.read_call(chat_id).await? else {
            return Ok(());
        };
        if &doc.callee_uid != callee_uid {
            return Err(CallError::Unauthorized(format!(
                "{} is not the callee of this call",
                callee_uid
            )));
        }

        match doc.status() {
            CallStatus::Ringing => {
                let result = write_terminal_status(
                    self.store.as_ref(),
                    &DocumentPath::current_call(chat_id),
                    CallDocument::end_fields(EndReason::Declined),
                    CallDocument::status_is(CallStatus::Ringing),
                    self.settings.grace_delay,
                )
                .await;
                match result {
                    Ok(()) => {
                        info!(chat_id = %chat_id, "Incoming call declined");
                        self.log_detached(chat_id, &doc, HistoryStatus::Declined).await;
                        Ok(())
                    }
                    Err(StoreError::NotFound(_)) | Err(StoreError::PreconditionFailed(_)) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            CallStatus::Answered => Err(CallError::InvalidState(
                "cannot decline an answered call".to_string(),
            )),
            CallStatus::Cancelled | CallStatus::Ended => Ok(()),
        }
    }

    /// Delete a call document left behind by a crashed or abandoned call
    ///
    /// Returns whether anything was deleted.
    pub async fn reap_stale_call(&self, chat_id: &ChatId) -> CallResult<bool> {
        let path = DocumentPath::current_call(chat_id);
        let Some(raw) = self.store.read(&path).await? else {
            return Ok(false);
        };

        match CallDocument::from_document(&raw) {
            Ok(doc) if !doc.is_stale(Utc::now(), self.stale_after) => return Ok(false),
            Ok(doc) => {
                info!(chat_id = %chat_id, status = doc.status().as_str(), "Reaping stale call document");
            }
            Err(e) => {
                info!(chat_id = %chat_id, "Reaping malformed call document: {}", e);
            }
        }

        self.store.delete(&path).await?;
        Ok(true)
    }

    /// Watch the chat for calls addressed to `uid`
    pub async fn watch_incoming(&self, chat_id: &ChatId, uid: &UserId) -> CallResult<IncomingCallWatcher> {
        let subscription = self
            .store
            .subscribe(&DocumentPath::current_call(chat_id))
            .await?;
        let filter = IncomingCallFilter::new(uid.clone(), self.stale_after);
        Ok(IncomingCallWatcher::spawn(chat_id.clone(), subscription, filter))
    }

    /// Reap stale state, then start watching for incoming calls
    pub async fn open_chat(&self, chat_id: &ChatId, uid: &UserId) -> CallResult<IncomingCallWatcher> {
        self.reap_stale_call(chat_id).await?;
        self.watch_incoming(chat_id, uid).await
    }

    pub async fn has_session(&self, chat_id: &ChatId) -> bool {
        self.sessions.read().await.contains_key(chat_id)
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session(&self, chat_id: &ChatId) -> Option<SessionEntry> {
        self.sessions.read().await.get(chat_id).cloned()
    }

    async fn reserve(
        &self,
        chat_id: &ChatId,
        session_id: SessionId,
        role: CallRole,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> CallResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(chat_id) {
            return Err(CallError::AlreadyInCall(chat_id.clone()));
        }
        sessions.insert(
            chat_id.clone(),
            SessionEntry {
                session_id,
                role,
                commands,
            },
        );
        Ok(())
    }

    async fn unregister(&self, chat_id: &ChatId, session_id: SessionId) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(chat_id)
            .map_or(false, |entry| entry.session_id == session_id)
        {
            sessions.remove(chat_id);
        }
    }

    /// Fails with `LineBusy` when a live call document exists
    async fn clear_line(&self, chat_id: &ChatId) -> CallResult<()> {
        if self.reap_stale_call(chat_id).await? {
            return Ok(());
        }
        match self.store.read(&DocumentPath::current_call(chat_id)).await? {
            Some(_) => Err(CallError::LineBusy(chat_id.clone())),
            None => Ok(()),
        }
    }

    async fn read_call(&self, chat_id: &ChatId) -> CallResult<Option<CallDocument>> {
        let Some(raw) = self.store.read(&DocumentPath::current_call(chat_id)).await? else {
            return Ok(None);
        };
        Ok(Some(CallDocument::from_document(&raw)?))
    }

    async fn cancel_document(&self, chat_id: &ChatId, doc: &CallDocument) -> CallResult<()> {
        let result = write_terminal_status(
            self.store.as_ref(),
            &DocumentPath::current_call(chat_id),
            CallDocument::cancel_fields(),
            CallDocument::status_is(CallStatus::Ringing),
            self.settings.grace_delay,
        )
        .await;

        match result {
            Ok(()) => {
                info!(chat_id = %chat_id, "Call cancelled");
                self.log_detached(chat_id, doc, HistoryStatus::Missed).await;
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(StoreError::PreconditionFailed(_)) => match self.read_call(chat_id).await? {
                Some(current) if current.status() == CallStatus::Answered => Err(
                    CallError::InvalidState("call was answered before it was cancelled".to_string()),
                ),
                _ => Ok(()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// History for a termination written without a local session
    async fn log_detached(&self, chat_id: &ChatId, doc: &CallDocument, status: HistoryStatus) {
        let now = Utc::now();
        let participants = Participants::new(doc.caller_uid.clone(), doc.callee_uid.clone());
        let mut entry = CallHistoryEntry::new(chat_id.clone(), &participants, doc.call_type, status);

        match (status, doc.answered_at()) {
            (HistoryStatus::Completed, Some(answered_at)) => {
                entry = entry
                    .with_times(answered_at, now)
                    .with_duration((now - answered_at).num_seconds());
            }
            _ => {
                if let Some(started) = doc.timestamp {
                    entry = entry.with_times(started, now);
                }
            }
        }

        if let Err(e) = self.history.append(&entry).await {
            warn!(chat_id = %chat_id, "Failed to log call history: {}", e);
        } else {
            debug!(chat_id = %chat_id, status = status.as_str(), "Logged call history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call_history::MockCallHistoryLogger;
    use crate::infrastructure::media::LoopbackMediaEngine;
    use crate::infrastructure::signaling::InMemorySignalingStore;

    fn config() -> Config {
        let mut config = Config::default();
        config.signaling.grace_delay_ms = 1;
        config.signaling.ring_timeout_secs = 0;
        config
    }

    async fn seeded_store(answered: bool) -> (InMemorySignalingStore, ChatId) {
        let store = InMemorySignalingStore::new();
        let chat_id = ChatId::new("c1");
        let path = DocumentPath::current_call(&chat_id);
        let mut fields =
            CallDocument::ringing_fields(&"u1".into(), &"u2".into(), CallType::Audio, "O1");
        if answered {
            for (key, value) in CallDocument::answer_fields("A1").resolve(Utc::now()) {
                fields = fields.set(&key, value);
            }
        }
        store.seed(&path, fields.resolve(Utc::now())).await;
        (store, chat_id)
    }

    fn service(store: &InMemorySignalingStore, history: MockCallHistoryLogger) -> CallService {
        CallService::new(
            Arc::new(store.clone()),
            Arc::new(LoopbackMediaEngine::new()),
            Arc::new(history),
            &config(),
        )
    }

    #[tokio::test]
    async fn test_cancel_without_session_logs_missed_once() {
        let (store, chat_id) = seeded_store(false).await;
        let mut history = MockCallHistoryLogger::new();
        history
            .expect_append()
            .withf(|entry| entry.status == HistoryStatus::Missed && entry.callee_uid.as_str() == "u2")
            .times(1)
            .returning(|_| Ok(()));
        let service = service(&store, history);

        service.cancel_call(&chat_id).await.unwrap();
        service.cancel_call(&chat_id).await.unwrap();
        assert_eq!(store.document_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_answered_call_is_invalid() {
        let (store, chat_id) = seeded_store(true).await;
        let mut history = MockCallHistoryLogger::new();
        history.expect_append().never();
        let service = service(&store, history);

        let err = service.cancel_call(&chat_id).await.unwrap_err();
        assert_eq!(err.code(), "invalid-state");
        assert_eq!(store.document_count().await, 1);
    }

    #[tokio::test]
    async fn test_end_without_session_survives_history_failure() {
        let (store, chat_id) = seeded_store(true).await;
        let mut history = MockCallHistoryLogger::new();
        history
            .expect_append()
            .withf(|entry| entry.status == HistoryStatus::Completed && entry.duration.is_some())
            .times(1)
            .returning(|_| Err("history unavailable".to_string()));
        let service = service(&store, history);

        service.end_call(&chat_id).await.unwrap();
        assert_eq!(store.document_count().await, 0);

        let ended = store
            .operations()
            .await
            .into_iter()
            .any(|op| op.touches("endReason"));
        assert!(ended);
    }

    #[tokio::test]
    async fn test_end_while_ringing_cancels() {
        let (store, chat_id) = seeded_store(false).await;
        let mut history = MockCallHistoryLogger::new();
        history
            .expect_append()
            .withf(|entry| entry.status == HistoryStatus::Missed)
            .times(1)
            .returning(|_| Ok(()));
        let service = service(&store, history);

        service.end_call(&chat_id).await.unwrap();
        let ops = store.operations().await;
        assert!(ops.iter().any(|op| op.touches("cancelledAt")));
        assert!(ops.iter().all(|op| !op.touches("endedAt")));
    }

    #[tokio::test]
    async fn test_reap_ignores_missing_document() {
        let store = InMemorySignalingStore::new();
        let service = service(&store, MockCallHistoryLogger::new());
        assert!(!service.reap_stale_call(&ChatId::new("c9")).await.unwrap());
    }
}
