//! Call bounded context - one side's view of a call attempt and the shared
//! signaling document both sides negotiate through

pub mod aggregate;
pub mod document;
pub mod entity;
pub mod event;
pub mod incoming;
pub mod service;
pub mod value_object;

pub use aggregate::CallAttempt;
pub use document::{CallDocument, CallState, CandidateBroadcast};
pub use entity::Participants;
pub use event::CallEvent;
pub use incoming::{IncomingCallEvent, IncomingCallFilter};
pub use service::CallDomainService;
pub use value_object::{CallRole, CallStatus, CallType, EndReason, SessionPhase, TerminationReason};
