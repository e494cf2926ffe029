//! # Error Types
//!
//! General error handling for the debugger engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::ProgramState;

/// Main error type for debugger operations
///
/// ## Error Categories
///
/// 1. **Setup errors**: Io, InvalidElf, MissingSection, UnexpectedEof, Dwarf,
///    CorruptAbbrev, TooManyAbbrevs, UnsupportedForm, UnsupportedDwarfVersion,
///    InvalidLineProgram, LaunchFailed
/// 2. **Resolution errors**: UnresolvedSymbol, UnresolvedLocation
/// 3. **Protocol errors**: InvalidState, ResourceExhausted, UnexpectedStop
/// 4. **Platform errors**: Ptrace (Linux-specific)
///
/// Setup errors are fatal to [`Program::open`](crate::Program::open): no
/// program is returned. Resolution errors leave the program untouched.
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// The file is not a little-endian ELF64 image, or its headers are malformed
    #[error("Invalid ELF image: {0}")]
    InvalidElf(String),

    /// A section the engine depends on is absent from the executable
    ///
    /// The engine requires `.symtab`, `.strtab`, `.debug_info`,
    /// `.debug_abbrev`, `.debug_str` and `.debug_line`. Stripped binaries or
    /// binaries built without `-g` fail here.
    #[error("Missing section: {0}")]
    MissingSection(&'static str),

    /// A read ran past the end of the buffer being decoded
    #[error("Unexpected end of data at offset 0x{offset:x} (needed {needed} bytes)")]
    UnexpectedEof
    {
        /// Offset of the read that failed, relative to the start of the buffer
        offset: usize,
        /// Number of bytes the read required
        needed: usize,
    },

    /// An abbreviation declaration in `.debug_abbrev` could not be decoded
    #[error("Corrupt abbreviation at offset 0x{offset:x}: {reason}")]
    CorruptAbbrev
    {
        /// Offset of the declaration inside `.debug_abbrev`
        offset: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The abbreviation table holds more declarations than the configured limit
    #[error("Too many abbreviations: limit is {limit}")]
    TooManyAbbrevs
    {
        /// Configured capacity
        limit: usize,
    },

    /// A compile-unit attribute uses a form whose size is not fixed
    ///
    /// Field offsets inside the compile-unit DIE are computed from fixed form
    /// sizes. Variable-length forms (`exprloc`, blocks, LEB128 data) would make
    /// every following offset wrong, so decoding stops instead.
    #[error("Unsupported attribute form {0}")]
    UnsupportedForm(gimli::DwForm),

    /// The DWARF unit or line program uses a version this engine does not decode
    #[error("Unsupported DWARF version {version} in {section}")]
    UnsupportedDwarfVersion
    {
        /// Section the unit lives in
        section: &'static str,
        /// Version found in the header
        version: u16,
    },

    /// Malformed DWARF encoding, such as an overlong LEB128 value
    #[error("DWARF decode error: {0}")]
    Dwarf(#[from] gimli::Error),

    /// The line program header or body is inconsistent
    #[error("Invalid line program: {0}")]
    InvalidLineProgram(String),

    /// Failed to start the debuggee under trace control
    #[error("Failed to launch {path}: {reason}")]
    LaunchFailed
    {
        /// Executable that was being launched
        path: String,
        /// What went wrong
        reason: String,
    },

    /// No function symbol with the requested name exists
    #[error("Could not resolve symbol {0}")]
    UnresolvedSymbol(String),

    /// No line-table row matches the requested source location
    #[error("Could not resolve location {file}:{line}")]
    UnresolvedLocation
    {
        /// Requested file name or path suffix
        file: String,
        /// Requested line number
        line: u64,
    },

    /// The operation is not legal in the program's current state
    ///
    /// For example, continuing a program that is already running or has
    /// exited, or patching memory before the debuggee was launched.
    #[error("Cannot {operation} while program is {state}")]
    InvalidState
    {
        /// Operation that was attempted
        operation: &'static str,
        /// State the program was in
        state: ProgramState,
    },

    /// A configured capacity has been reached
    ///
    /// Raised when the breakpoint registry is full.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The debuggee stopped in a way the trace protocol did not expect
    ///
    /// Raised when the single step of the breakpoint step-over protocol does
    /// not end in a trap stop.
    #[error("Unexpected stop: {0}")]
    UnexpectedStop(String),

    /// Linux-specific ptrace / wait failure
    #[cfg(target_os = "linux")]
    #[error("ptrace error: {0}")]
    Ptrace(#[from] nix::errno::Errno),

    /// I/O error (reading the executable, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, DebuggerError>`
///
/// ```rust
/// use rdb_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DebuggerError>;
