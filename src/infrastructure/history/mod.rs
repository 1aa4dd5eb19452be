//! Call history log adapters

pub mod memory;

pub use memory::MemoryCallHistoryLog;
