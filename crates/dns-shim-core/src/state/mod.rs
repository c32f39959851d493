// # State Store Implementations
//
// This module provides implementations of the StateStore trait for
// different persistence strategies, plus the on-disk document format.

pub mod file;
pub mod format;
pub mod memory;

pub use file::FileStateStore;
pub use format::{DocumentShape, STATE_FORMAT_VERSION};
pub use memory::MemoryStateStore;
