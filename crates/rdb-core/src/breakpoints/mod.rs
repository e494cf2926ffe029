//! # Breakpoints
//!
//! Software breakpoints for x86-64: the first byte of the target instruction
//! is replaced with `int3` (`0xCC`) and the original machine word is kept so
//! it can be put back.
//!
//! [`BreakpointRegistry`] is the per-program bookkeeping. It is append-only:
//! a breakpoint's id is its index and stays valid for the program's lifetime.
//!
//! [`BreakpointManager`] holds the memory-patching logic and the step-over
//! protocol. It talks to the debuggee through [`BreakpointOperations`], so the
//! protocol runs the same against a traced process or an in-memory target.
//!
//! ## Stepping over a breakpoint
//!
//! When the debuggee stops on a breakpoint, `rip` points one byte past the
//! trap. Before resuming:
//!
//! 1. restore the original first byte at the breakpoint address
//! 2. move `rip` back to the breakpoint address
//! 3. single-step the original instruction and wait for the trap
//! 4. write the trap byte back
//!
//! after which the debuggee can be resumed normally.

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{DebuggerError, Result};
use crate::types::Address;

/// The x86-64 `int3` opcode.
pub const TRAP_OPCODE: u8 = 0xCC;

/// Index of a breakpoint in its program's registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BreakpointId(usize);

impl BreakpointId
{
    /// Create an identifier from a raw registry index.
    #[must_use]
    pub const fn from_raw(value: usize) -> Self
    {
        Self(value)
    }

    /// Registry index of the breakpoint.
    #[must_use]
    pub const fn raw(self) -> usize
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// An installed breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint
{
    /// Address of the patched instruction
    pub instruction_address: Address,
    /// Machine word read from `instruction_address` before patching
    pub replaced_memory: u64,
}

impl Breakpoint
{
    /// Original first byte of the patched instruction.
    #[must_use]
    pub fn original_byte(&self) -> u8
    {
        self.replaced_memory.to_le_bytes()[0]
    }
}

/// Append-only breakpoint storage with a fixed capacity.
#[derive(Debug, Clone)]
pub struct BreakpointRegistry
{
    entries: Vec<Breakpoint>,
    capacity: usize,
}

impl BreakpointRegistry
{
    #[must_use]
    pub fn new(capacity: usize) -> Self
    {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Add a breakpoint and return its id.
    ///
    /// ## Errors
    ///
    /// `ResourceExhausted` when the registry is full.
    pub fn register(&mut self, breakpoint: Breakpoint) -> Result<BreakpointId>
    {
        if self.is_full() {
            return Err(self.exhausted());
        }
        self.entries.push(breakpoint);
        Ok(BreakpointId(self.entries.len() - 1))
    }

    fn exhausted(&self) -> DebuggerError
    {
        DebuggerError::ResourceExhausted(format!("breakpoint limit of {} reached", self.capacity))
    }

    #[must_use]
    pub fn is_full(&self) -> bool
    {
        self.entries.len() >= self.capacity
    }

    #[must_use]
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint>
    {
        self.entries.get(id.0)
    }

    /// Id of the breakpoint installed at `address`.
    #[must_use]
    pub fn find(&self, address: Address) -> Option<BreakpointId>
    {
        self.entries
            .iter()
            .position(|entry| entry.instruction_address == address)
            .map(BreakpointId)
    }

    /// Breakpoints in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (BreakpointId, &Breakpoint)>
    {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (BreakpointId(index), entry))
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize
    {
        self.capacity
    }
}

/// How a single step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome
{
    /// Stopped with `SIGTRAP`; carries the new instruction pointer
    Trapped(Address),
    /// Stopped by some other signal
    Signaled(i32),
    /// The debuggee terminated
    Exited,
}

/// Access to a stopped debuggee needed to install and step over breakpoints.
pub trait BreakpointOperations
{
    /// Read the machine word at `address`.
    fn read_word(&self, address: Address) -> Result<u64>;

    /// Write the machine word at `address`.
    fn write_word(&mut self, address: Address, word: u64) -> Result<()>;

    /// Set the instruction pointer.
    fn set_instruction_pointer(&mut self, address: Address) -> Result<()>;

    /// Execute one instruction and block until the debuggee stops again.
    fn single_step_and_wait(&mut self) -> Result<StepOutcome>;
}

/// Breakpoint patching and the step-over protocol.
pub struct BreakpointManager;

impl BreakpointManager
{
    /// `word` with its low byte replaced by the trap opcode.
    #[must_use]
    pub const fn patch(word: u64) -> u64
    {
        (word & !0xff) | TRAP_OPCODE as u64
    }

    /// `current` with its low byte taken from `original`.
    ///
    /// Only the first byte is restored so writes made by the debuggee to the
    /// rest of the word survive.
    #[must_use]
    pub const fn restore(current: u64, original: u64) -> u64
    {
        (current & !0xff) | (original & 0xff)
    }

    /// Install a breakpoint at `address`, or return the id of the one
    /// already there.
    ///
    /// ## Errors
    ///
    /// - `ResourceExhausted`: the registry is full
    /// - `Ptrace`: the debuggee's memory could not be read or written
    pub fn install<T>(target: &mut T, registry: &mut BreakpointRegistry, address: Address) -> Result<BreakpointId>
    where
        T: BreakpointOperations + ?Sized,
    {
        if let Some(existing) = registry.find(address) {
            debug!(%address, id = %existing, "breakpoint already installed");
            return Ok(existing);
        }
        if registry.is_full() {
            return Err(registry.exhausted());
        }

        let original = target.read_word(address)?;
        target.write_word(address, Self::patch(original))?;
        let id = registry.register(Breakpoint {
            instruction_address: address,
            replaced_memory: original,
        })?;
        info!(%address, %id, original = format_args!("0x{original:016x}"), "breakpoint installed");
        Ok(id)
    }

    /// Id of the breakpoint whose trap was just executed, given the
    /// instruction pointer reported at the stop.
    #[must_use]
    pub fn hit_at(registry: &BreakpointRegistry, rip: Address) -> Option<BreakpointId>
    {
        rip.checked_sub(1).and_then(|address| registry.find(address))
    }

    /// Execute the original instruction under breakpoint `id` and re-arm it.
    ///
    /// On return the debuggee is stopped after the original instruction and
    /// the trap byte is back in place, unless the step did not end in a trap.
    /// The caller decides what a non-trap outcome means.
    ///
    /// ## Errors
    ///
    /// - `UnexpectedStop`: `id` is not in the registry
    /// - `Ptrace`: any underlying memory, register or wait failure
    pub fn step_over<T>(target: &mut T, registry: &BreakpointRegistry, id: BreakpointId) -> Result<StepOutcome>
    where
        T: BreakpointOperations + ?Sized,
    {
        let breakpoint = registry
            .get(id)
            .ok_or_else(|| DebuggerError::UnexpectedStop(format!("no breakpoint with id {id}")))?;
        let address = breakpoint.instruction_address;

        let current = target.read_word(address)?;
        target.write_word(address, Self::restore(current, breakpoint.replaced_memory))?;
        target.set_instruction_pointer(address)?;

        let outcome = target.single_step_and_wait()?;
        debug!(%address, %id, ?outcome, "stepped over breakpoint");

        match outcome {
            StepOutcome::Exited => warn!(%address, "debuggee exited while stepping over a breakpoint"),
            StepOutcome::Trapped(_) | StepOutcome::Signaled(_) => {
                let current = target.read_word(address)?;
                target.write_word(address, Self::patch(current))?;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    /// Flat memory of 8-byte words plus an instruction pointer. Every
    /// instruction is one byte long; executing `0xCC` traps.
    #[derive(Default)]
    struct FakeTarget
    {
        memory: HashMap<u64, u64>,
        rip: u64,
        executed: Vec<(u64, u8)>,
        exit_on_step: bool,
    }

    impl FakeTarget
    {
        fn byte_at(&self, address: u64) -> u8
        {
            self.memory.get(&address).copied().unwrap_or_default().to_le_bytes()[0]
        }
    }

    impl BreakpointOperations for FakeTarget
    {
        fn read_word(&self, address: Address) -> Result<u64>
        {
            Ok(self.memory.get(&address.value()).copied().unwrap_or_default())
        }

        fn write_word(&mut self, address: Address, word: u64) -> Result<()>
        {
            self.memory.insert(address.value(), word);
            Ok(())
        }

        fn set_instruction_pointer(&mut self, address: Address) -> Result<()>
        {
            self.rip = address.value();
            Ok(())
        }

        fn single_step_and_wait(&mut self) -> Result<StepOutcome>
        {
            if self.exit_on_step {
                return Ok(StepOutcome::Exited);
            }
            self.executed.push((self.rip, self.byte_at(self.rip)));
            self.rip += 1;
            Ok(StepOutcome::Trapped(Address::new(self.rip)))
        }
    }

    fn target_with_code() -> FakeTarget
    {
        let mut target = FakeTarget::default();
        target.memory.insert(0x401000, 0x1122_3344_5566_7755);
        target.memory.insert(0x401010, 0x0000_0000_e589_4855);
        target
    }

    #[test]
    fn test_patch_and_restore_words()
    {
        let word = 0x1122_3344_5566_7788;
        assert_eq!(BreakpointManager::patch(word), 0x1122_3344_5566_77cc);
        assert_eq!(BreakpointManager::restore(BreakpointManager::patch(word), word), word);
        assert_eq!(BreakpointManager::patch(BreakpointManager::patch(word)), BreakpointManager::patch(word));
        assert_eq!(BreakpointManager::restore(0xaaaa_aaaa_aaaa_aacc, word), 0xaaaa_aaaa_aaaa_aa88);
    }

    #[test]
    fn test_install_patches_low_byte()
    {
        let mut target = target_with_code();
        let mut registry = BreakpointRegistry::new(16);

        let id = BreakpointManager::install(&mut target, &mut registry, Address::new(0x401000)).unwrap();
        assert_eq!(id, BreakpointId::from_raw(0));
        assert_eq!(target.memory[&0x401000], 0x1122_3344_5566_77cc);

        let breakpoint = registry.get(id).unwrap();
        assert_eq!(breakpoint.replaced_memory, 0x1122_3344_5566_7755);
        assert_eq!(breakpoint.original_byte(), 0x55);
    }

    #[test]
    fn test_duplicate_address_returns_existing_id()
    {
        let mut target = target_with_code();
        let mut registry = BreakpointRegistry::new(16);
        let address = Address::new(0x401000);

        let first = BreakpointManager::install(&mut target, &mut registry, address).unwrap();
        let second = BreakpointManager::install(&mut target, &mut registry, address).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(first).unwrap().original_byte(), 0x55);
    }

    #[test]
    fn test_capacity_is_enforced()
    {
        let mut target = target_with_code();
        let mut registry = BreakpointRegistry::new(1);

        BreakpointManager::install(&mut target, &mut registry, Address::new(0x401000)).unwrap();
        let result = BreakpointManager::install(&mut target, &mut registry, Address::new(0x401010));
        assert!(matches!(result, Err(DebuggerError::ResourceExhausted(_))));
        assert_eq!(target.memory[&0x401010], 0x0000_0000_e589_4855);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_hit_detection_uses_rip_minus_one()
    {
        let mut target = target_with_code();
        let mut registry = BreakpointRegistry::new(16);
        let id = BreakpointManager::install(&mut target, &mut registry, Address::new(0x401010)).unwrap();

        assert_eq!(BreakpointManager::hit_at(&registry, Address::new(0x401011)), Some(id));
        assert_eq!(BreakpointManager::hit_at(&registry, Address::new(0x401010)), None);
        assert_eq!(BreakpointManager::hit_at(&registry, Address::ZERO), None);
    }

    #[test]
    fn test_step_over_runs_original_instruction_and_rearms()
    {
        let mut target = target_with_code();
        let mut registry = BreakpointRegistry::new(16);
        let id = BreakpointManager::install(&mut target, &mut registry, Address::new(0x401000)).unwrap();
        target.rip = 0x401001;

        let outcome = BreakpointManager::step_over(&mut target, &registry, id).unwrap();

        assert_eq!(outcome, StepOutcome::Trapped(Address::new(0x401001)));
        assert_eq!(target.executed, [(0x401000, 0x55)]);
        assert_eq!(target.byte_at(0x401000), TRAP_OPCODE);
        assert_eq!(target.memory[&0x401000], 0x1122_3344_5566_77cc);
    }

    #[test]
    fn test_step_over_preserves_upper_bytes_written_meanwhile()
    {
        let mut target = target_with_code();
        let mut registry = BreakpointRegistry::new(16);
        let id = BreakpointManager::install(&mut target, &mut registry, Address::new(0x401000)).unwrap();
        target.memory.insert(0x401000, 0xdead_beef_0000_00cc);

        BreakpointManager::step_over(&mut target, &registry, id).unwrap();
        assert_eq!(target.executed, [(0x401000, 0x55)]);
        assert_eq!(target.memory[&0x401000], 0xdead_beef_0000_00cc);
    }

    #[test]
    fn test_step_over_reports_exit()
    {
        let mut target = target_with_code();
        let mut registry = BreakpointRegistry::new(16);
        let id = BreakpointManager::install(&mut target, &mut registry, Address::new(0x401000)).unwrap();
        target.exit_on_step = true;

        assert_eq!(
            BreakpointManager::step_over(&mut target, &registry, id).unwrap(),
            StepOutcome::Exited
        );
        assert!(matches!(
            BreakpointManager::step_over(&mut target, &registry, BreakpointId::from_raw(9)),
            Err(DebuggerError::UnexpectedStop(_))
        ));
    }
}
