//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Signaling store implementations
//! - Media engine implementations (loopback, native WebRTC)
//! - Call history log implementations
//! - Metrics recording

pub mod call_metrics;
pub mod history;
pub mod media;
pub mod signaling;
