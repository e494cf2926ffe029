//! # rdb-core
//!
//! A small native debugger engine for Linux on x86-64.
//!
//! Given an ELF64 executable built with DWARF debug information, the engine:
//! - reads the function and file symbols from `.symtab`
//! - decodes the first compile unit and every line-number program
//! - launches the executable under `ptrace` control
//! - sets software breakpoints by symbol name or `file:line`
//! - resumes execution past breakpoints
//!
//! [`Program`] is the entry point. The readers in [`binary`], [`symbols`] and
//! [`dwarf`] are usable on their own on any platform.
//!
//! ## Why unsafe code is needed
//!
//! Launching the debuggee requires `fork()`, which `nix` exposes as an
//! `unsafe` function, and the child must leave through `_exit` when `execve`
//! fails. Both calls are confined to [`platform::linux`](crate::platform).

#![allow(unsafe_code)] // fork() and _exit() in the launch path

pub mod binary;
pub mod breakpoints;
pub mod config;
pub mod dwarf;
pub mod error;
pub mod platform;
pub mod prelude;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod program;
pub mod symbols;
pub mod types;

pub use breakpoints::{Breakpoint, BreakpointId};
pub use config::EngineConfig;
pub use error::{DebuggerError, Result};
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use program::Program;
pub use types::{Address, ProcessId, ProgramState, StopReason};
