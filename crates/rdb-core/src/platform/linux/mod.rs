//! # Linux Tracee
//!
//! A child process started under `PTRACE_TRACEME` and controlled with the
//! `nix` wrappers around `ptrace(2)`, `waitpid(2)` and `kill(2)`.
//!
//! ## Launch sequence
//!
//! 1. every `argv`/`envp` string is converted to a `CString` before forking,
//!    so the child does not allocate
//! 2. the child requests tracing and `execve`s the executable; if either
//!    step fails it exits with status 127
//! 3. the kernel stops the child with `SIGTRAP` once the new image is loaded;
//!    the parent waits for that stop
//!
//! ## References
//!
//! - [ptrace(2)](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [waitpid(2)](https://man7.org/linux/man-pages/man2/waitpid.2.html)

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::libc::c_long;
use nix::sys::ptrace::{self, AddressType, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execve, fork, ForkResult, Pid};
use tracing::{debug, trace, warn};

use crate::breakpoints::{BreakpointOperations, StepOutcome};
use crate::error::{DebuggerError, Result};
use crate::types::{Address, ProcessId};

/// Exit status of a child whose `traceme`/`execve` failed.
const EXEC_FAILED_STATUS: i32 = 127;

/// What `waitpid` reported for the tracee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent
{
    /// No state change yet (only with `WNOHANG`)
    Running,
    /// Trace-stop with the given signal
    Stopped(i32),
    /// Exited normally with the given status
    Exited(i32),
    /// Terminated by the given signal
    Killed(i32),
}

/// A traced child process.
#[derive(Debug)]
pub struct Tracee
{
    pid: Pid,
}

impl Tracee
{
    /// Fork and exec `path` under trace control and wait for the initial
    /// exec stop.
    ///
    /// ## Errors
    ///
    /// `LaunchFailed` when an argument contains a NUL byte, `fork` fails, or
    /// the child terminates instead of reaching the exec stop.
    pub fn launch(path: &Path, argv: &[String], env: &[(String, String)]) -> Result<Self>
    {
        let failed = |reason: String| DebuggerError::LaunchFailed {
            path: path.display().to_string(),
            reason,
        };
        let program = CString::new(path.as_os_str().as_bytes()).map_err(|err| failed(err.to_string()))?;
        let argv = argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| failed(err.to_string()))?;
        let envp = env
            .iter()
            .map(|(key, value)| CString::new(format!("{key}={value}")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| failed(err.to_string()))?;

        // SAFETY: the child only calls async-signal-safe functions
        // (ptrace, execve, _exit) before replacing its image.
        match unsafe { fork() } {
            Err(errno) => Err(failed(format!("fork failed: {errno}"))),
            Ok(ForkResult::Child) => {
                if ptrace::traceme().is_ok() {
                    let _ = execve(program.as_c_str(), &argv, &envp);
                }
                // SAFETY: terminating the forked child without running the
                // parent's destructors or atexit handlers.
                unsafe { nix::libc::_exit(EXEC_FAILED_STATUS) }
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), path = %path.display(), "forked debuggee");
                match waitpid(child, None)? {
                    WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                        let tracee = Self { pid: child };
                        if let Err(errno) = ptrace::setoptions(child, Options::PTRACE_O_EXITKILL) {
                            warn!(%errno, "could not set PTRACE_O_EXITKILL");
                        }
                        Ok(tracee)
                    }
                    WaitStatus::Exited(_, EXEC_FAILED_STATUS) => Err(failed("could not execute the file".to_string())),
                    WaitStatus::Exited(_, status) => Err(failed(format!("exited with status {status} during exec"))),
                    WaitStatus::Signaled(_, signal, _) => Err(failed(format!("killed by {signal} during exec"))),
                    other => {
                        let _ = signal::kill(child, Signal::SIGKILL);
                        let _ = waitpid(child, None);
                        Err(failed(format!("unexpected initial stop {other:?}")))
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn pid(&self) -> ProcessId
    {
        ProcessId(self.pid.as_raw())
    }

    /// Poll (`blocking == false`) or wait for the next state change.
    pub fn wait(&self, blocking: bool) -> Result<TraceEvent>
    {
        let flags = if blocking { None } else { Some(WaitPidFlag::WNOHANG) };
        let status = waitpid(self.pid, flags)?;
        trace!(?status, "waitpid");
        Ok(match status {
            WaitStatus::StillAlive | WaitStatus::Continued(_) => TraceEvent::Running,
            WaitStatus::Stopped(_, signal) | WaitStatus::PtraceEvent(_, signal, _) => TraceEvent::Stopped(signal as i32),
            WaitStatus::PtraceSyscall(_) => TraceEvent::Stopped(Signal::SIGTRAP as i32),
            WaitStatus::Exited(_, status) => TraceEvent::Exited(status),
            WaitStatus::Signaled(_, signal, _) => TraceEvent::Killed(signal as i32),
        })
    }

    /// Current `rip`.
    pub fn instruction_pointer(&self) -> Result<Address>
    {
        Ok(Address::new(ptrace::getregs(self.pid)?.rip))
    }

    /// Execute one instruction. Does not wait.
    pub fn step(&self) -> Result<()>
    {
        ptrace::step(self.pid, None)?;
        Ok(())
    }

    /// Resume, delivering `signal` if given. Does not wait.
    pub fn resume(&self, signal: Option<i32>) -> Result<()>
    {
        let signal = match signal.map(Signal::try_from).transpose() {
            Ok(signal) => signal,
            Err(errno) => {
                warn!(%errno, "dropping undeliverable signal");
                None
            }
        };
        debug!(pid = self.pid.as_raw(), ?signal, "PTRACE_CONT");
        ptrace::cont(self.pid, signal)?;
        Ok(())
    }

    /// Send `SIGKILL` and reap the child.
    pub fn kill(&self) -> Result<()>
    {
        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => return Err(errno.into()),
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => return Ok(()),
                Ok(_) => {}
                Err(errno) => return Err(errno.into()),
            }
        }
    }
}

impl BreakpointOperations for Tracee
{
    fn read_word(&self, address: Address) -> Result<u64>
    {
        let word = ptrace::read(self.pid, address.value() as AddressType)?;
        trace!(%address, word = format_args!("0x{word:016x}"), "PTRACE_PEEKDATA");
        Ok(word as u64)
    }

    fn write_word(&mut self, address: Address, word: u64) -> Result<()>
    {
        trace!(%address, word = format_args!("0x{word:016x}"), "PTRACE_POKEDATA");
        ptrace::write(self.pid, address.value() as AddressType, word as c_long)?;
        Ok(())
    }

    fn set_instruction_pointer(&mut self, address: Address) -> Result<()>
    {
        let mut registers = ptrace::getregs(self.pid)?;
        registers.rip = address.value();
        ptrace::setregs(self.pid, registers)?;
        Ok(())
    }

    fn single_step_and_wait(&mut self) -> Result<StepOutcome>
    {
        self.step()?;
        match self.wait(true)? {
            TraceEvent::Stopped(signal) if signal == Signal::SIGTRAP as i32 => {
                Ok(StepOutcome::Trapped(self.instruction_pointer()?))
            }
            TraceEvent::Stopped(signal) => Ok(StepOutcome::Signaled(signal)),
            TraceEvent::Exited(_) | TraceEvent::Killed(_) => Ok(StepOutcome::Exited),
            TraceEvent::Running => Err(DebuggerError::UnexpectedStop(
                "blocking wait returned without a state change".to_string(),
            )),
        }
    }
}
