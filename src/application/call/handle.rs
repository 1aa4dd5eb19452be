//! Caller-facing handle to a running call session

use crate::application::call::error::{CallError, CallResult};
use crate::domain::call::{CallRole, CallType, SessionPhase, TerminationReason};
use crate::domain::call_quality::ConnectionQuality;
use crate::domain::media::{MediaStream, PeerConnectionState};
use crate::domain::shared::value_objects::{ChatId, SessionId};
use crate::domain::signaling::{DocumentPath, SignalingStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Notifications from the session task, in order
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    ConnectionState(PeerConnectionState),
    RemoteStream(MediaStream),
    QualityChanged(ConnectionQuality),
    Terminated(TerminationReason),
}

/// Latest known state of a session
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub connection: PeerConnectionState,
    pub quality: ConnectionQuality,
    pub remote_stream: Option<MediaStream>,
    pub termination: Option<TerminationReason>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            connection: PeerConnectionState::New,
            quality: ConnectionQuality::Unknown,
            remote_stream: None,
            termination: None,
        }
    }
}

impl SessionStatus {
    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }
}

pub(crate) type CommandReply = oneshot::Sender<CallResult<()>>;

/// Requests handled by the session task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Cancel(CommandReply),
    Hangup(CommandReply),
    Decline(CommandReply),
    /// Release locally without touching the document
    Stop(Option<CommandReply>),
}

/// Sends a command and waits for the task to act on it
pub(crate) async fn request(
    commands: &mpsc::UnboundedSender<SessionCommand>,
    command: impl FnOnce(CommandReply) -> SessionCommand,
) -> CallResult<()> {
    let (tx, rx) = oneshot::channel();
    if commands.send(command(tx)).is_err() {
        // Task already finished
        return Ok(());
    }
    rx.await.unwrap_or(Ok(()))
}

/// Handle returned by `start_call` and `answer_call`
///
/// Dropping the handle releases the local media and the peer connection.
pub struct CallHandle {
    chat_id: ChatId,
    session_id: SessionId,
    role: CallRole,
    call_type: CallType,
    local_stream: MediaStream,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    status: watch::Receiver<SessionStatus>,
    store: Arc<dyn SignalingStore>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("chat_id", &self.chat_id)
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("call_type", &self.call_type)
            .finish_non_exhaustive()
    }
}

impl CallHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        chat_id: ChatId,
        session_id: SessionId,
        role: CallRole,
        call_type: CallType,
        local_stream: MediaStream,
        commands: mpsc::UnboundedSender<SessionCommand>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        status: watch::Receiver<SessionStatus>,
        store: Arc<dyn SignalingStore>,
    ) -> Self {
        Self {
            chat_id,
            session_id,
            role,
            call_type,
            local_stream,
            commands,
            events,
            status,
            store,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn local_stream(&self) -> &MediaStream {
        &self.local_stream
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.status.borrow().phase
    }

    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.status.borrow().remote_stream.clone()
    }

    /// Next session event; `None` once the session task is gone
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Wait until the session status satisfies `predicate`
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&SessionStatus) -> bool,
    ) -> CallResult<SessionStatus> {
        self.status
            .wait_for(predicate)
            .await
            .map(|status| status.clone())
            .map_err(|_| CallError::InvalidState("session task is gone".to_string()))
    }

    /// Wait until the session has unwound
    pub async fn terminated(&mut self) -> Option<TerminationReason> {
        let status = self.wait_for(SessionStatus::is_terminated).await.ok()?;
        status.termination
    }

    /// Hang up: cancel while ringing, end once answered
    pub async fn hangup(&self) -> CallResult<()> {
        request(&self.commands, SessionCommand::Hangup).await
    }

    /// Cancel an unanswered outgoing call
    pub async fn cancel(&self) -> CallResult<()> {
        request(&self.commands, SessionCommand::Cancel).await
    }

    /// Release the subscription, the peer connection and local tracks
    ///
    /// Leaves the call document alone. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.local_stream.stop_all();
        let _ = request(&self.commands, |reply| SessionCommand::Stop(Some(reply))).await;
    }

    /// `stop` plus deletion of the call document
    pub async fn cleanup(&self) -> CallResult<()> {
        self.stop().await;
        self.store
            .delete(&DocumentPath::current_call(&self.chat_id))
            .await?;
        Ok(())
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(chat_id = %self.chat_id, session_id = %self.session_id, "Call handle dropped");
        self.local_stream.stop_all();
        let _ = self.commands.send(SessionCommand::Stop(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_request_after_task_exit_is_ok() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert_ok!(request(&tx, SessionCommand::Hangup).await);
    }

    #[tokio::test]
    async fn test_request_returns_task_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            if let Some(SessionCommand::Cancel(reply)) = rx.recv().await {
                let _ = reply.send(Err(CallError::InvalidState("answered".to_string())));
            }
        });

        let err = assert_err!(request(&tx, SessionCommand::Cancel).await);
        assert_eq!(err.code(), "invalid-state");
        task.await.unwrap();
    }

    #[test]
    fn test_default_status() {
        let status = SessionStatus::default();
        assert_eq!(status.phase, SessionPhase::Idle);
        assert_eq!(status.quality, ConnectionQuality::Unknown);
        assert!(!status.is_terminated());
    }
}
