//! Call use cases: placing, answering and tearing down calls

pub mod error;
pub mod handle;
pub mod history;
pub mod incoming;
pub mod service;
mod session;

pub use error::{CallError, CallResult};
pub use handle::{CallHandle, SessionEvent, SessionStatus};
pub use history::CallHistoryService;
pub use incoming::IncomingCallWatcher;
pub use service::CallService;
