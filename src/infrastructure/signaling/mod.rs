//! Signaling store adapters

pub mod memory;

pub use memory::{InMemorySignalingStore, StoreOp, StoreOpKind};
