//! chatcall - Peer-to-peer call signaling for a chat application
//!
//! Two users of a chat negotiate an audio/video call through a single shared
//! document in a real-time document store. This crate implements the caller
//! and callee state machines on top of that document, following the same
//! layered layout as the rest of the code base: domain rules, application
//! services, and infrastructure adapters for the store and the media stack.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::call::{
    CallError, CallHandle, CallHistoryService, CallResult, CallService, IncomingCallWatcher,
    SessionEvent, SessionStatus,
};
pub use config::Config;
pub use domain::shared::error::DomainError;
pub use domain::shared::error::Result;
