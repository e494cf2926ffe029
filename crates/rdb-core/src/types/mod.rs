//! # Types
//!
//! Small value types shared by the binary readers, the breakpoint manager and
//! the process controller.

pub mod address;
pub mod process;

// Re-export all public types
pub use address::Address;
pub use process::{signal_name, ProcessId, ProgramState, StopReason};
