//! Process identity and lifecycle types.

use std::fmt;

/// Process identifier (PID) of a launched debuggee
///
/// Wraps the kernel PID as a newtype so it can't be confused with breakpoint
/// ids, exit codes or other integers flowing through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub i32);

impl From<i32> for ProcessId
{
    fn from(pid: i32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for i32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a [`Program`](crate::Program)
///
/// ## State Transitions
///
/// - `Unstarted` → `Stopped`: the debuggee was launched and halted at its
///   initial exec trap
/// - `Stopped` → `Running`: `continue_execution()` resumed it
/// - `Running` → `Stopped`: `update_state()` observed a trace stop
/// - `Running`/`Stopped` → `Exited`: the debuggee terminated or was killed
///
/// `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState
{
    /// Symbols are loaded but no process exists yet
    Unstarted,
    /// The debuggee is executing
    Running,
    /// The debuggee is halted under trace control
    Stopped,
    /// The debuggee has terminated
    Exited,
}

impl fmt::Display for ProgramState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            ProgramState::Unstarted => "unstarted",
            ProgramState::Running => "running",
            ProgramState::Stopped => "stopped",
            ProgramState::Exited => "exited",
        };
        write!(f, "{label}")
    }
}

/// Reason the debuggee last stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason
{
    /// Not stopped, or stopped for a reason that carries no information
    /// (the initial exec trap, or after exit)
    None,
    /// Executed an armed breakpoint's trap instruction
    BreakpointHit,
    /// Completed a single-instruction step requested by the caller
    SingleStep,
    /// Stopped by a signal that is not attributable to a breakpoint
    ///
    /// The value is the raw signal number. `SIGTRAP` shows up here when the
    /// program raises it itself.
    Signal(i32),
}

impl fmt::Display for StopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            StopReason::None => write!(f, "none"),
            StopReason::BreakpointHit => write!(f, "breakpoint hit"),
            StopReason::SingleStep => write!(f, "single step"),
            StopReason::Signal(sig) => write!(f, "signal {sig} ({})", signal_name(*sig)),
        }
    }
}

/// Real-time signals have no fixed names.
const REALTIME_SIGNALS: std::ops::RangeInclusive<i32> = 32..=64;

/// Name of a Linux signal number, for log and display output
///
/// Standard signals are named by [`nix::sys::signal::Signal`]; real-time
/// signals share the name `SIGRT`.
///
/// ```rust
/// use rdb_core::types::signal_name;
///
/// assert_eq!(signal_name(40), "SIGRT");
/// assert_eq!(signal_name(-1), "unknown");
/// ```
#[must_use]
pub fn signal_name(signal: i32) -> &'static str
{
    match standard_signal_name(signal) {
        Some(name) => name,
        None if REALTIME_SIGNALS.contains(&signal) => "SIGRT",
        None => "unknown",
    }
}

#[cfg(target_os = "linux")]
fn standard_signal_name(signal: i32) -> Option<&'static str>
{
    nix::sys::signal::Signal::try_from(signal)
        .ok()
        .map(nix::sys::signal::Signal::as_str)
}

#[cfg(not(target_os = "linux"))]
fn standard_signal_name(_signal: i32) -> Option<&'static str>
{
    None
}
