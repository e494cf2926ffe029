//! # Program
//!
//! The engine's facade: one executable, its symbol and line information, and
//! at most one traced process running it.
//!
//! ## Lifecycle
//!
//! ```text
//! load ──► Unstarted ──launch──► Stopped ◄──update_state── Running
//!                                   │  ▲                     ▲
//!                                   │  └─step_instruction─┐  │
//!                                   └───continue_execution─┴─┘
//!                         any live state ──exit / kill──► Exited
//! ```
//!
//! `update_state` never blocks. The only blocking waits are the initial exec
//! stop, the single step inside the breakpoint step-over, `step_instruction`
//! and `kill`.

use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;
use tracing::{debug, error, info, warn};

use crate::binary::BinaryImage;
use crate::breakpoints::{
    Breakpoint, BreakpointId, BreakpointManager, BreakpointOperations, BreakpointRegistry, StepOutcome,
};
use crate::config::EngineConfig;
use crate::dwarf::DebugInfo;
use crate::error::{DebuggerError, Result};
use crate::platform::linux::{TraceEvent, Tracee};
use crate::symbols::SymbolTable;
use crate::types::{Address, ProcessId, ProgramState, StopReason};

const SIGTRAP: i32 = Signal::SIGTRAP as i32;

/// An executable under the debugger's control
#[derive(Debug)]
pub struct Program
{
    path: PathBuf,
    config: EngineConfig,
    symbols: SymbolTable,
    debug_info: DebugInfo,
    tracee: Option<Tracee>,
    state: ProgramState,
    stop_reason: StopReason,
    rip: Address,
    breakpoint_id: Option<BreakpointId>,
    pending_signal: Option<i32>,
    registry: BreakpointRegistry,
}

impl Program
{
    /// Load `path` and launch it, stopped at its first instruction.
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use rdb_core::{EngineConfig, Program, ProgramState, StopReason};
    ///
    /// let mut program = Program::open("./demo", EngineConfig::default())?;
    /// program.create_breakpoint_at_symbol("main")?;
    /// program.continue_execution()?;
    /// while !program.update_state()? {
    ///     std::thread::sleep(std::time::Duration::from_millis(10));
    /// }
    /// assert_eq!(program.state(), ProgramState::Stopped);
    /// assert_eq!(program.stop_reason(), StopReason::BreakpointHit);
    /// # Ok::<(), rdb_core::DebuggerError>(())
    /// ```
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self>
    {
        let mut program = Self::load(path, config)?;
        program.launch()?;
        Ok(program)
    }

    /// Read symbols and debug information without starting a process.
    ///
    /// ## Errors
    ///
    /// Any setup error: the file is unreadable or not ELF64, a required
    /// section is missing, or the DWARF data cannot be decoded.
    pub fn load(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self>
    {
        let path = path.as_ref();
        let image = BinaryImage::load(path)?;
        let symbols = SymbolTable::extract(&image)?;
        let debug_info = DebugInfo::parse(&image, config.max_abbreviations)?;
        info!(
            path = %path.display(),
            functions = symbols.function_count(),
            files = symbols.file_count(),
            "loaded program"
        );

        Ok(Self {
            path: path.to_path_buf(),
            registry: BreakpointRegistry::new(config.max_breakpoints),
            config,
            symbols,
            debug_info,
            tracee: None,
            state: ProgramState::Unstarted,
            stop_reason: StopReason::None,
            rip: Address::ZERO,
            breakpoint_id: None,
            pending_signal: None,
        })
    }

    /// Start the executable under trace control.
    ///
    /// On success the program is `Stopped` at the exec trap with no stop
    /// reason and no breakpoint.
    pub fn launch(&mut self) -> Result<()>
    {
        self.require(ProgramState::Unstarted, "launch")?;

        let mut argv = Vec::with_capacity(self.config.args.len() + 1);
        if self.config.pass_argv0 {
            argv.push(self.path.display().to_string());
        }
        argv.extend(self.config.args.iter().cloned());

        let tracee = Tracee::launch(&self.path, &argv, &self.config.env)?;
        info!(pid = %tracee.pid(), path = %self.path.display(), "launched debuggee");
        self.tracee = Some(tracee);
        self.state = ProgramState::Stopped;
        self.stop_reason = StopReason::None;
        self.breakpoint_id = None;
        self.rip = Address::ZERO;
        Ok(())
    }

    fn require(&self, expected: ProgramState, operation: &'static str) -> Result<()>
    {
        if self.state == expected {
            Ok(())
        } else {
            Err(DebuggerError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn stopped_tracee(&mut self, operation: &'static str) -> Result<&mut Tracee>
    {
        stopped(&mut self.tracee, self.state, operation)
    }

    fn mark_exited(&mut self)
    {
        self.tracee = None;
        self.state = ProgramState::Exited;
        self.stop_reason = StopReason::None;
        self.breakpoint_id = None;
        self.pending_signal = None;
    }

    /// Poll the debuggee without blocking.
    ///
    /// Returns whether the state changed. Always `false` for programs that
    /// are unstarted or have exited.
    pub fn update_state(&mut self) -> Result<bool>
    {
        if matches!(self.state, ProgramState::Unstarted | ProgramState::Exited) {
            return Ok(false);
        }
        let Some(tracee) = self.tracee.as_ref() else {
            return Ok(false);
        };

        match tracee.wait(false)? {
            TraceEvent::Running => Ok(false),
            TraceEvent::Exited(status) => {
                info!(status, "debuggee exited");
                self.mark_exited();
                Ok(true)
            }
            TraceEvent::Killed(signal) => {
                info!(signal = crate::types::signal_name(signal), "debuggee killed by signal");
                self.mark_exited();
                Ok(true)
            }
            TraceEvent::Stopped(SIGTRAP) => {
                let rip = tracee.instruction_pointer()?;
                self.state = ProgramState::Stopped;
                self.pending_signal = None;
                match BreakpointManager::hit_at(&self.registry, rip) {
                    Some(id) => {
                        self.rip = Address::new(rip.value() - 1);
                        self.stop_reason = StopReason::BreakpointHit;
                        self.breakpoint_id = Some(id);
                        info!(%id, rip = %self.rip, "breakpoint hit");
                    }
                    None => {
                        self.rip = rip;
                        self.stop_reason = StopReason::Signal(SIGTRAP);
                        self.breakpoint_id = None;
                        warn!(%rip, "SIGTRAP outside any breakpoint");
                    }
                }
                Ok(true)
            }
            TraceEvent::Stopped(signal) => {
                self.rip = tracee.instruction_pointer()?;
                self.state = ProgramState::Stopped;
                self.stop_reason = StopReason::Signal(signal);
                self.breakpoint_id = None;
                self.pending_signal = Some(signal);
                info!(signal = crate::types::signal_name(signal), rip = %self.rip, "debuggee stopped by signal");
                Ok(true)
            }
        }
    }

    /// Run the step-over protocol for the breakpoint the program is stopped
    /// on, if any.
    fn step_over_breakpoint(&mut self, operation: &'static str) -> Result<Option<StepOutcome>>
    {
        let Some(id) = self.breakpoint_id else {
            return Ok(None);
        };
        let tracee = stopped(&mut self.tracee, self.state, operation)?;
        let outcome = BreakpointManager::step_over(tracee, &self.registry, id)?;
        Ok(Some(outcome))
    }

    /// Resume a stopped debuggee.
    ///
    /// If it is stopped on a breakpoint, the original instruction is executed
    /// first and the breakpoint re-armed. A signal that caused the last stop
    /// is delivered on resume.
    ///
    /// ## Errors
    ///
    /// - `InvalidState`: the program is not stopped
    /// - `UnexpectedStop`: the step over a breakpoint did not end in a trap
    pub fn continue_execution(&mut self) -> Result<()>
    {
        self.stopped_tracee("continue")?;

        match self.step_over_breakpoint("continue")? {
            None | Some(StepOutcome::Trapped(_)) => {}
            Some(StepOutcome::Exited) => {
                self.mark_exited();
                error!("debuggee exited while stepping over a breakpoint");
                return Err(DebuggerError::UnexpectedStop(
                    "debuggee exited while stepping over a breakpoint".to_string(),
                ));
            }
            Some(StepOutcome::Signaled(signal)) => {
                self.stop_reason = StopReason::Signal(signal);
                self.breakpoint_id = None;
                self.pending_signal = Some(signal);
                if let Some(tracee) = self.tracee.as_ref() {
                    self.rip = tracee.instruction_pointer()?;
                }
                error!(signal = crate::types::signal_name(signal), "signal while stepping over a breakpoint");
                return Err(DebuggerError::UnexpectedStop(format!(
                    "{} while stepping over a breakpoint",
                    crate::types::signal_name(signal)
                )));
            }
        }

        let signal = self.pending_signal.take();
        self.stopped_tracee("continue")?.resume(signal)?;
        self.state = ProgramState::Running;
        self.stop_reason = StopReason::None;
        self.breakpoint_id = None;
        self.rip = Address::ZERO;
        Ok(())
    }

    /// Execute exactly one instruction and wait for it to finish.
    ///
    /// Reports `SingleStep`, or `BreakpointHit` when the next instruction is
    /// an armed breakpoint. A breakpoint the program is stopped on is stepped
    /// over, so its original instruction is the one executed.
    pub fn step_instruction(&mut self) -> Result<StopReason>
    {
        let outcome = match self.step_over_breakpoint("step")? {
            Some(outcome) => outcome,
            None => self.stopped_tracee("step")?.single_step_and_wait()?,
        };
        debug!(?outcome, "single step");

        match outcome {
            StepOutcome::Trapped(rip) => {
                self.rip = rip;
                self.breakpoint_id = self.registry.find(rip);
                self.stop_reason = if self.breakpoint_id.is_some() {
                    StopReason::BreakpointHit
                } else {
                    StopReason::SingleStep
                };
            }
            StepOutcome::Signaled(signal) => {
                if let Some(tracee) = self.tracee.as_ref() {
                    self.rip = tracee.instruction_pointer()?;
                }
                self.stop_reason = StopReason::Signal(signal);
                self.breakpoint_id = None;
                self.pending_signal = Some(signal);
            }
            StepOutcome::Exited => {
                info!("debuggee exited during single step");
                self.mark_exited();
            }
        }
        Ok(self.stop_reason)
    }

    /// Set a breakpoint on the first function symbol named `name`.
    ///
    /// Both linkage names and demangled Rust names are accepted. Setting a
    /// breakpoint where one already exists returns the existing id.
    ///
    /// ## Errors
    ///
    /// - `UnresolvedSymbol`: no function has that name
    /// - `InvalidState`: the program is not stopped
    /// - `ResourceExhausted`: the breakpoint limit is reached
    pub fn create_breakpoint_at_symbol(&mut self, name: &str) -> Result<BreakpointId>
    {
        let address = self
            .symbols
            .find_function(name)
            .map(|function| function.address)
            .ok_or_else(|| DebuggerError::UnresolvedSymbol(name.to_string()))?;
        debug!(symbol = name, %address, "resolved symbol");
        self.create_breakpoint_at_address(address)
    }

    /// Set a breakpoint on the lowest statement address of `file:line`.
    ///
    /// ## Errors
    ///
    /// - `UnresolvedLocation`: no line-table row matches
    /// - otherwise as [`create_breakpoint_at_symbol`](Self::create_breakpoint_at_symbol)
    pub fn create_breakpoint_at_location(&mut self, file: &str, line: u64) -> Result<BreakpointId>
    {
        let address = self
            .debug_info
            .address_for(file, line)
            .ok_or_else(|| DebuggerError::UnresolvedLocation {
                file: file.to_string(),
                line,
            })?;
        debug!(file, line, %address, "resolved location");
        self.create_breakpoint_at_address(address)
    }

    /// Set a breakpoint at an absolute address.
    pub fn create_breakpoint_at_address(&mut self, address: Address) -> Result<BreakpointId>
    {
        let tracee = stopped(&mut self.tracee, self.state, "create a breakpoint")?;
        BreakpointManager::install(tracee, &mut self.registry, address)
    }

    /// Kill the debuggee and reap it.
    ///
    /// Does nothing if no process is running.
    pub fn kill(&mut self) -> Result<()>
    {
        if let Some(tracee) = self.tracee.take() {
            info!(pid = %tracee.pid(), "killing debuggee");
            tracee.kill()?;
            self.mark_exited();
        }
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    #[must_use]
    pub fn state(&self) -> ProgramState
    {
        self.state
    }

    #[must_use]
    pub fn stop_reason(&self) -> StopReason
    {
        self.stop_reason
    }

    /// Instruction pointer at the last stop; for a breakpoint hit, the
    /// breakpoint's address.
    #[must_use]
    pub fn rip(&self) -> Address
    {
        self.rip
    }

    /// Breakpoint the program is stopped on.
    #[must_use]
    pub fn breakpoint_id(&self) -> Option<BreakpointId>
    {
        self.breakpoint_id
    }

    #[must_use]
    pub fn pid(&self) -> Option<ProcessId>
    {
        self.tracee.as_ref().map(Tracee::pid)
    }

    #[must_use]
    pub fn symbol_table(&self) -> &SymbolTable
    {
        &self.symbols
    }

    #[must_use]
    pub fn debug_info(&self) -> &DebugInfo
    {
        &self.debug_info
    }

    /// Breakpoints in creation order.
    pub fn breakpoints(&self) -> impl Iterator<Item = (BreakpointId, &Breakpoint)>
    {
        self.registry.iter()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig
    {
        &self.config
    }
}

/// The tracee, if the program is stopped under trace control.
fn stopped<'a>(tracee: &'a mut Option<Tracee>, state: ProgramState, operation: &'static str) -> Result<&'a mut Tracee>
{
    match tracee.as_mut() {
        Some(tracee) if state == ProgramState::Stopped => Ok(tracee),
        _ => Err(DebuggerError::InvalidState { operation, state }),
    }
}

impl Drop for Program
{
    fn drop(&mut self)
    {
        if let Some(tracee) = self.tracee.take() {
            if let Err(err) = tracee.kill() {
                warn!(pid = %tracee.pid(), %err, "failed to kill debuggee on drop");
            }
        }
    }
}
