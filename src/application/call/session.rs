//! Per-session handler task
//!
//! One task per call session owns the peer connection, the document
//! subscription and the local stream. It selects over document snapshots,
//! peer connection events, commands from the handle and service, the quality
//! sampling tick and the ring timeout. Nothing else mutates session state.

use crate::application::call::error::{CallError, CallResult};
use crate::application::call::handle::{CommandReply, SessionCommand, SessionEvent, SessionStatus};
use crate::domain::call::{
    CallAttempt, CallDocument, CallRole, CallState, CallStatus, EndReason, SessionPhase,
    TerminationReason,
};
use crate::domain::call_history::{CallHistoryEntry, CallHistoryLogger, HistoryStatus};
use crate::domain::call_quality::{QualityMonitor, QualityThresholds};
use crate::domain::media::{
    IceCandidateInit, MediaStream, PeerConnection, PeerConnectionState, PeerEvent,
    PeerEventReceiver, SessionDescription, SignalingState,
};
use crate::domain::shared::value_objects::{ChatId, SessionId, UserId};
use crate::domain::signaling::{
    DocumentPath, Fields, Precondition, SignalingStore, Snapshot, StoreError, StoreResult,
    Subscription,
};
use crate::infrastructure::call_metrics;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// Sessions owned by one `CallService`, keyed by chat
pub(crate) type SessionRegistry = Arc<RwLock<HashMap<ChatId, SessionEntry>>>;

#[derive(Clone)]
pub(crate) struct SessionEntry {
    pub session_id: SessionId,
    pub role: CallRole,
    pub commands: mpsc::UnboundedSender<SessionCommand>,
}

/// Timing and thresholds a session runs with
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub grace_delay: Duration,
    pub ring_timeout: Option<Duration>,
    pub quality_interval: Duration,
    pub quality_thresholds: QualityThresholds,
}

/// Write a terminal status, give the other side a moment to observe it,
/// then delete the document
pub(crate) async fn write_terminal_status(
    store: &dyn SignalingStore,
    path: &DocumentPath,
    fields: Fields,
    precondition: Precondition,
    grace_delay: Duration,
) -> StoreResult<()> {
    store.update(path, fields, precondition).await?;
    tokio::time::sleep(grace_delay).await;
    store.delete(path).await
}

/// Event sources the task selects over
pub(crate) struct SessionIo {
    pub subscription: Subscription,
    pub peer_events: PeerEventReceiver,
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
}

/// How and why a session unwinds
struct Termination {
    reason: TerminationReason,
    /// This side initiated the termination and owns its history entry
    local: bool,
    reply: Option<CommandReply>,
    result: CallResult<()>,
}

impl Termination {
    fn remote(reason: TerminationReason) -> Self {
        Self {
            reason,
            local: false,
            reply: None,
            result: Ok(()),
        }
    }

    fn local(reason: TerminationReason, reply: Option<CommandReply>) -> Self {
        Self {
            reason,
            local: true,
            reply,
            result: Ok(()),
        }
    }

    fn with_result(mut self, result: CallResult<()>) -> Self {
        self.result = result;
        self
    }

    fn with_reply(mut self, reply: Option<CommandReply>) -> Self {
        self.reply = reply;
        self
    }
}

/// Termination reason for a terminal status written by the other side
fn remote_reason(state: &CallState) -> Option<TerminationReason> {
    match state {
        CallState::Cancelled { .. } => Some(TerminationReason::Cancelled),
        CallState::Ended { reason, .. } => Some(match reason {
            Some(EndReason::Declined) => TerminationReason::Declined,
            Some(EndReason::Failed) => TerminationReason::Failed("remote side failed".to_string()),
            Some(EndReason::Hangup) | None => TerminationReason::RemoteHangup,
        }),
        CallState::Ringing { .. } | CallState::Answered { .. } => None,
    }
}

enum Flow {
    Continue,
    Finish(Termination),
}

pub(crate) struct SessionTask {
    attempt: CallAttempt,
    local_uid: UserId,
    path: DocumentPath,
    pc: Arc<dyn PeerConnection>,
    local_stream: MediaStream,
    remote_stream: Option<MediaStream>,
    store: Arc<dyn SignalingStore>,
    history: Arc<dyn CallHistoryLogger>,
    registry: SessionRegistry,
    settings: SessionSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
    quality: QualityMonitor,
    applied_candidates: HashSet<IceCandidateInit>,
    answered_at: Option<DateTime<Utc>>,
}

impl SessionTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        attempt: CallAttempt,
        local_uid: UserId,
        pc: Arc<dyn PeerConnection>,
        local_stream: MediaStream,
        store: Arc<dyn SignalingStore>,
        history: Arc<dyn CallHistoryLogger>,
        registry: SessionRegistry,
        settings: SessionSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
        status: watch::Sender<SessionStatus>,
    ) -> Self {
        let path = DocumentPath::current_call(attempt.chat_id());
        let quality = QualityMonitor::new(settings.quality_thresholds.clone());
        Self {
            attempt,
            local_uid,
            path,
            pc,
            local_stream,
            remote_stream: None,
            store,
            history,
            registry,
            settings,
            events,
            status,
            quality,
            applied_candidates: HashSet::new(),
            answered_at: None,
        }
    }

    fn chat_id(&self) -> &ChatId {
        self.attempt.chat_id()
    }

    fn session_id(&self) -> SessionId {
        self.attempt.session_id()
    }

    fn role(&self) -> CallRole {
        self.attempt.role()
    }

    fn emit(&self, event: SessionEvent) {
        // Handle may be gone; the session still has to unwind
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.status.send_modify(|s| s.phase = phase);
        self.emit(SessionEvent::PhaseChanged(phase));
    }

    pub(crate) async fn run(mut self, io: SessionIo) {
        let SessionIo {
            mut subscription,
            mut peer_events,
            mut commands,
        } = io;

        info!(
            chat_id = %self.chat_id(),
            session_id = %self.session_id(),
            role = self.role().as_str(),
            "Call session started"
        );
        call_metrics::record_session_started(self.role());
        self.set_phase(SessionPhase::Ringing);

        let ring_timeout = self.settings.ring_timeout;
        let ring_deadline = tokio::time::sleep(ring_timeout.unwrap_or(Duration::from_secs(86_400)));
        tokio::pin!(ring_deadline);

        let mut quality_tick = tokio::time::interval(self.settings.quality_interval);
        quality_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let termination = loop {
            let ringing = self.attempt.phase() == SessionPhase::Ringing;
            let active = self.attempt.phase() == SessionPhase::Active;
            let ring_armed = ring_timeout.is_some() && ringing && self.role() == CallRole::Caller;

            let flow = tokio::select! {
                snapshot = subscription.next() => match snapshot {
                    Some(snapshot) => self.on_snapshot(snapshot).await,
                    None => Flow::Finish(Termination::local(
                        TerminationReason::Failed("document subscription closed".to_string()),
                        None,
                    )),
                },
                Some(event) = peer_events.recv() => self.on_peer_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => Flow::Finish(Termination::local(TerminationReason::LocalStop, None)),
                },
                _ = quality_tick.tick(), if active => {
                    self.sample_quality().await;
                    Flow::Continue
                }
                _ = &mut ring_deadline, if ring_armed => {
                    info!(chat_id = %self.chat_id(), "Ring timeout reached, cancelling");
                    self.cancel(TerminationReason::Missed, None).await
                }
            };

            if let Flow::Finish(termination) = flow {
                break termination;
            }
        };

        subscription.unsubscribe();
        self.finish(termination).await;
    }

    // Document snapshots

    async fn on_snapshot(&mut self, snapshot: Snapshot) -> Flow {
        let Some(raw) = snapshot.data else {
            debug!(chat_id = %self.chat_id(), "Call document deleted");
            return Flow::Finish(Termination::remote(TerminationReason::DocumentDeleted));
        };

        let doc = match CallDocument::from_document(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(chat_id = %self.chat_id(), "Ignoring malformed call document: {}", e);
                return Flow::Continue;
            }
        };

        let participants = self.attempt.participants();
        if &doc.caller_uid != participants.caller() || &doc.callee_uid != participants.callee() {
            // Someone else's call replaced ours
            return Flow::Finish(Termination::remote(TerminationReason::DocumentDeleted));
        }

        if let Some(answered_at) = doc.answered_at() {
            self.answered_at = Some(answered_at);
        }

        if let Some(reason) = remote_reason(&doc.state) {
            return Flow::Finish(Termination::remote(reason));
        }

        let flow = match (&doc.state, self.role()) {
            (CallState::Ringing { offer }, CallRole::Callee) => self.answer_offer(offer).await,
            (CallState::Answered { answer, .. }, CallRole::Caller) => self.accept_answer(answer).await,
            _ => Flow::Continue,
        };

        if let Flow::Finish(_) = flow {
            return flow;
        }

        if let Some(candidate) = doc.remote_candidate(&self.local_uid) {
            self.apply_remote_candidate(candidate.clone()).await;
        }
        Flow::Continue
    }

    /// Callee side of the offer/answer exchange; runs at most once
    async fn answer_offer(&mut self, offer: &str) -> Flow {
        if self.pc.has_remote_description().await
            || self.pc.signaling_state() != SignalingState::Stable
        {
            return Flow::Continue;
        }

        let answer = match self.negotiate_answer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(chat_id = %self.chat_id(), "Failed to answer offer: {}", e);
                return self.fail(e.to_string()).await;
            }
        };

        let result = self
            .store
            .update(
                &self.path,
                CallDocument::answer_fields(&answer.sdp),
                CallDocument::status_is(CallStatus::Ringing),
            )
            .await;

        match result {
            Ok(()) => {
                self.mark_answered();
                Flow::Continue
            }
            Err(StoreError::NotFound(_)) | Err(StoreError::PreconditionFailed(_)) => {
                info!(chat_id = %self.chat_id(), "Call was cancelled before the answer landed");
                Flow::Finish(Termination::remote(TerminationReason::Cancelled))
            }
            Err(e) => {
                error!(chat_id = %self.chat_id(), "Failed to write answer: {}", e);
                Flow::Finish(
                    Termination::local(TerminationReason::Failed(e.to_string()), None)
                        .with_result(Err(e.into())),
                )
            }
        }
    }

    async fn negotiate_answer(&self, offer: &str) -> CallResult<SessionDescription> {
        self.pc
            .set_remote_description(SessionDescription::offer(offer))
            .await?;
        let answer = self.pc.create_answer().await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    /// Caller side: apply the callee's answer once
    async fn accept_answer(&mut self, answer: &str) -> Flow {
        if self.pc.has_remote_description().await
            || self.pc.signaling_state() != SignalingState::HaveLocalOffer
        {
            return Flow::Continue;
        }

        match self
            .pc
            .set_remote_description(SessionDescription::answer(answer))
            .await
        {
            Ok(()) => {
                self.mark_answered();
                Flow::Continue
            }
            Err(e) => {
                error!(chat_id = %self.chat_id(), "Failed to apply answer: {}", e);
                self.fail(e.to_string()).await
            }
        }
    }

    fn mark_answered(&mut self) {
        if let Err(e) = self.attempt.answer() {
            warn!(chat_id = %self.chat_id(), "Unexpected answer: {}", e);
            return;
        }
        info!(chat_id = %self.chat_id(), role = self.role().as_str(), "Call answered");
        call_metrics::record_call_answered();
        self.set_phase(SessionPhase::Active);
    }

    async fn apply_remote_candidate(&mut self, candidate: IceCandidateInit) {
        if self.applied_candidates.contains(&candidate) {
            return;
        }
        if !self.pc.has_remote_description().await {
            debug!(chat_id = %self.chat_id(), "Candidate before remote description, ignored");
            call_metrics::record_ice_dropped("no_remote_description");
            return;
        }

        match self.pc.add_ice_candidate(candidate.clone()).await {
            Ok(()) => call_metrics::record_ice_applied(),
            Err(e) => {
                warn!(chat_id = %self.chat_id(), "Failed to add remote candidate: {}", e);
                call_metrics::record_ice_dropped("rejected");
            }
        }
        self.applied_candidates.insert(candidate);
    }

    // Peer connection events

    async fn on_peer_event(&mut self, event: PeerEvent) -> Flow {
        match event {
            PeerEvent::IceCandidate(candidate) => {
                let fields = CallDocument::candidate_fields(&candidate, &self.local_uid);
                match self.store.update(&self.path, fields, Precondition::Exists).await {
                    Ok(()) => call_metrics::record_ice_sent(),
                    Err(e) => {
                        warn!(chat_id = %self.chat_id(), "Dropping local candidate: {}", e);
                        call_metrics::record_ice_dropped("write_failed");
                    }
                }
                Flow::Continue
            }
            PeerEvent::Track(stream) => {
                info!(
                    chat_id = %self.chat_id(),
                    tracks = stream.tracks().len(),
                    "Remote stream received"
                );
                self.remote_stream = Some(stream.clone());
                self.status
                    .send_modify(|s| s.remote_stream = Some(stream.clone()));
                self.emit(SessionEvent::RemoteStream(stream));
                Flow::Continue
            }
            PeerEvent::ConnectionState(state) => {
                debug!(chat_id = %self.chat_id(), ?state, "Connection state changed");
                self.status.send_modify(|s| s.connection = state);
                self.emit(SessionEvent::ConnectionState(state));
                if state == PeerConnectionState::Failed {
                    return self.fail("peer connection failed".to_string()).await;
                }
                Flow::Continue
            }
        }
    }

    // Commands

    async fn on_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Stop(reply) => {
                Flow::Finish(Termination::local(TerminationReason::LocalStop, reply))
            }
            SessionCommand::Cancel(reply) => {
                if self.attempt.phase() == SessionPhase::Active {
                    let _ = reply.send(Err(CallError::InvalidState(
                        "cannot cancel an answered call".to_string(),
                    )));
                    return Flow::Continue;
                }
                self.cancel(TerminationReason::Cancelled, Some(reply)).await
            }
            SessionCommand::Decline(reply) => {
                if self.role() != CallRole::Callee || self.attempt.phase() == SessionPhase::Active
                {
                    let _ = reply.send(Err(CallError::InvalidState(
                        "only an unanswered incoming call can be declined".to_string(),
                    )));
                    return Flow::Continue;
                }
                self.decline(Some(reply)).await
            }
            SessionCommand::Hangup(reply) => match (self.attempt.phase(), self.role()) {
                (SessionPhase::Active, _) => self.hangup(Some(reply)).await,
                (_, CallRole::Caller) => self.cancel(TerminationReason::Cancelled, Some(reply)).await,
                (_, CallRole::Callee) => self.decline(Some(reply)).await,
            },
        }
    }

    /// Caller withdraws an unanswered call
    async fn cancel(&mut self, reason: TerminationReason, reply: Option<CommandReply>) -> Flow {
        let result = write_terminal_status(
            self.store.as_ref(),
            &self.path,
            CallDocument::cancel_fields(),
            CallDocument::status_is(CallStatus::Ringing),
            self.settings.grace_delay,
        )
        .await;

        match result {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                Flow::Finish(Termination::local(reason, reply))
            }
            Err(StoreError::PreconditionFailed(_)) => self.after_lost_cancel(reason, reply).await,
            Err(e) => {
                error!(chat_id = %self.chat_id(), "Failed to cancel call: {}", e);
                Flow::Finish(Termination::local(reason, reply).with_result(Err(e.into())))
            }
        }
    }

    /// The document left `ringing` before the cancel landed
    async fn after_lost_cancel(
        &mut self,
        reason: TerminationReason,
        reply: Option<CommandReply>,
    ) -> Flow {
        let current = match self.store.read(&self.path).await {
            Ok(doc) => doc.and_then(|raw| CallDocument::from_document(&raw).ok()),
            Err(e) => {
                return Flow::Finish(Termination::local(reason, reply).with_result(Err(e.into())))
            }
        };

        match current.map(|doc| doc.state) {
            Some(CallState::Answered { answered_at, .. }) => {
                // Answered in the meantime; end the call instead
                info!(chat_id = %self.chat_id(), "Call answered while cancelling, hanging up");
                self.answered_at = answered_at.or(self.answered_at);
                if self.attempt.phase() == SessionPhase::Ringing {
                    self.mark_answered();
                }
                self.hangup(reply).await
            }
            Some(state) => match remote_reason(&state) {
                Some(remote) => Flow::Finish(Termination::remote(remote).with_reply(reply)),
                None => Flow::Finish(Termination::local(reason, reply)),
            },
            None => Flow::Finish(Termination::local(reason, reply)),
        }
    }

    /// Callee rejects a call it has not answered
    async fn decline(&mut self, reply: Option<CommandReply>) -> Flow {
        let result = write_terminal_status(
            self.store.as_ref(),
            &self.path,
            CallDocument::end_fields(EndReason::Declined),
            CallDocument::status_is(CallStatus::Ringing),
            self.settings.grace_delay,
        )
        .await;

        match result {
            Ok(()) => Flow::Finish(Termination::local(TerminationReason::Declined, reply)),
            Err(StoreError::NotFound(_)) | Err(StoreError::PreconditionFailed(_)) => {
                Flow::Finish(Termination::remote(TerminationReason::Cancelled).with_reply(reply))
            }
            Err(e) => Flow::Finish(
                Termination::local(TerminationReason::Declined, reply).with_result(Err(e.into())),
            ),
        }
    }

    /// Either side ends an answered call
    async fn hangup(&mut self, reply: Option<CommandReply>) -> Flow {
        let result = write_terminal_status(
            self.store.as_ref(),
            &self.path,
            CallDocument::end_fields(EndReason::Hangup),
            Precondition::Exists,
            self.settings.grace_delay,
        )
        .await;

        match result {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                Flow::Finish(Termination::local(TerminationReason::Hangup, reply))
            }
            Err(e) => {
                error!(chat_id = %self.chat_id(), "Failed to end call: {}", e);
                Flow::Finish(
                    Termination::local(TerminationReason::Hangup, reply).with_result(Err(e.into())),
                )
            }
        }
    }

    /// Local negotiation failure: mark the document failed and unwind
    async fn fail(&mut self, cause: String) -> Flow {
        let result = write_terminal_status(
            self.store.as_ref(),
            &self.path,
            CallDocument::end_fields(EndReason::Failed),
            Precondition::Exists,
            self.settings.grace_delay,
        )
        .await;
        if let Err(e) = result {
            if !e.is_not_found() {
                warn!(chat_id = %self.chat_id(), "Failed to mark call as failed: {}", e);
            }
        }
        Flow::Finish(Termination::local(TerminationReason::Failed(cause), None))
    }

    async fn sample_quality(&mut self) {
        let Some(stats) = self.pc.stats().await else {
            return;
        };

        if let Some(rating) = self.quality.record(&stats) {
            debug!(chat_id = %self.chat_id(), rating = rating.as_str(), "Connection quality changed");
            self.status.send_modify(|s| s.quality = rating);
            self.emit(SessionEvent::QualityChanged(rating));
        }
        for alert in self.quality.check_alerts() {
            warn!(chat_id = %self.chat_id(), ?alert, "Call quality alert");
        }
    }

    // Release

    async fn finish(mut self, termination: Termination) {
        let Termination {
            reason,
            local,
            reply,
            result,
        } = termination;

        self.pc.close().await;
        self.local_stream.stop_all();
        if let Some(remote) = self.remote_stream.take() {
            remote.stop_all();
        }

        if let Err(e) = self.attempt.terminate(reason.clone()) {
            warn!(chat_id = %self.chat_id(), "{}", e);
        }
        for event in self.attempt.take_events() {
            debug!(chat_id = %event.chat_id(), event_type = event.event_type(), "Call event");
        }

        if local {
            self.log_history(&reason).await;
        }

        {
            let mut sessions = self.registry.write().await;
            if sessions
                .get(self.attempt.chat_id())
                .map_or(false, |entry| entry.session_id == self.attempt.session_id())
            {
                sessions.remove(self.attempt.chat_id());
            }
        }

        call_metrics::record_session_ended(&reason);
        let report = self.quality.report();
        info!(
            chat_id = %self.chat_id(),
            session_id = %self.session_id(),
            reason = reason.as_str(),
            samples = report.samples,
            average_mos = report.average_mos,
            quality = report.final_rating.as_str(),
            "Call session ended"
        );

        self.status.send_modify(|s| {
            s.phase = SessionPhase::Idle;
            s.connection = PeerConnectionState::Closed;
            s.termination = Some(reason.clone());
        });
        self.emit(SessionEvent::PhaseChanged(SessionPhase::Idle));
        self.emit(SessionEvent::Terminated(reason));

        if let Some(reply) = reply {
            let _ = reply.send(result);
        } else if let Err(e) = result {
            warn!(chat_id = %self.chat_id(), "Session ended with error: {}", e);
        }
    }

    async fn log_history(&self, reason: &TerminationReason) {
        let Some(status) = HistoryStatus::for_local_termination(reason) else {
            return;
        };

        let now = Utc::now();
        let mut entry = CallHistoryEntry::new(
            self.attempt.chat_id().clone(),
            self.attempt.participants(),
            self.attempt.call_type(),
            status,
        );
        if status == HistoryStatus::Completed {
            let answered_at = self
                .answered_at
                .or(self.attempt.answered_at())
                .unwrap_or(now);
            entry = entry
                .with_times(answered_at, now)
                .with_duration((now - answered_at).num_seconds());
        } else {
            entry = entry.with_times(self.attempt.started_at(), now);
        }

        if let Err(e) = self.history.append(&entry).await {
            warn!(chat_id = %self.chat_id(), "Failed to log call history: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::signaling::{InMemorySignalingStore, StoreOpKind};
    use serde_json::json;

    #[test]
    fn test_remote_reason_mapping() {
        let ended = |reason| CallState::Ended {
            reason,
            answered_at: None,
            ended_at: None,
        };

        assert_eq!(
            remote_reason(&CallState::Cancelled { cancelled_at: None }),
            Some(TerminationReason::Cancelled)
        );
        assert_eq!(
            remote_reason(&ended(Some(EndReason::Declined))),
            Some(TerminationReason::Declined)
        );
        assert_eq!(remote_reason(&ended(None)), Some(TerminationReason::RemoteHangup));
        assert!(matches!(
            remote_reason(&ended(Some(EndReason::Failed))),
            Some(TerminationReason::Failed(_))
        ));
        assert_eq!(
            remote_reason(&CallState::Ringing {
                offer: "O1".to_string()
            }),
            None
        );
    }

    #[tokio::test]
    async fn test_terminal_write_then_delete() {
        let store = InMemorySignalingStore::new();
        let path = DocumentPath::new("chats/c1/call/current");
        let mut doc = crate::domain::signaling::Document::new();
        doc.insert("status".to_string(), json!("ringing"));
        store.seed(&path, doc).await;

        write_terminal_status(
            &store,
            &path,
            CallDocument::cancel_fields(),
            CallDocument::status_is(CallStatus::Ringing),
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        let kinds: Vec<_> = store.operations().await.iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![StoreOpKind::Write, StoreOpKind::Update, StoreOpKind::Delete]
        );
    }

    #[tokio::test]
    async fn test_terminal_write_requires_precondition() {
        let store = InMemorySignalingStore::new();
        let path = DocumentPath::new("chats/c1/call/current");
        let mut doc = crate::domain::signaling::Document::new();
        doc.insert("status".to_string(), json!("answered"));
        store.seed(&path, doc).await;

        let err = write_terminal_status(
            &store,
            &path,
            CallDocument::cancel_fields(),
            CallDocument::status_is(CallStatus::Ringing),
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
        assert_eq!(store.document_count().await, 1);
    }
}
