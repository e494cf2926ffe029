//! Common module for library exports

pub use crate::binary::BinaryImage;
pub use crate::breakpoints::{Breakpoint, BreakpointId};
pub use crate::config::EngineConfig;
pub use crate::dwarf::{DebugInfo, SourceLocation};
pub use crate::error::{DebuggerError, Result};
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use crate::program::Program;
pub use crate::symbols::SymbolTable;
pub use crate::types::{Address, ProcessId, ProgramState, StopReason};
