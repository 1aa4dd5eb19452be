//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases.
//! It's responsible for:
//! - Owning the per-chat call sessions of one client
//! - Driving the signaling document through the call protocol
//! - Releasing media on every exit path
//! - Converting store and media failures into call errors

pub mod call;
