//! # Line Program Interpreter
//!
//! Runs the DWARF 2 line-number state machine over each unit in
//! `.debug_line` and records the resulting rows.
//!
//! ## State machine
//!
//! Registers `address`, `file`, `line`, `column`, `is_stmt`, `basic_block`
//! and `end_sequence` start as `(0, 1, 1, 0, default_is_stmt, false, false)`
//! and are reset to those values after every end-of-sequence.
//!
//! A row is emitted by `DW_LNS_copy`, by every special opcode, by
//! `DW_LNS_negate_stmt` when `is_stmt` becomes true, and by
//! `DW_LNE_end_sequence` (flagged as the end of the sequence). Emitting a
//! row closes the previous row of the same sequence: its end line and column
//! become the new row's begin line and column.
//!
//! ## References
//!
//! - [DWARF 2 §6.2](https://dwarfstd.org/doc/dwarf-2.0.0.pdf)

use std::path::Path;

use gimli::constants::{self, DwLne, DwLns};
use tracing::{debug, trace, warn};

use crate::binary::Cursor;
use crate::error::{DebuggerError, Result};
use crate::types::Address;

const DWARF64_ESCAPE: u32 = 0xffff_ffff;
const SUPPORTED_VERSION: u16 = 2;

/// Fixed part of a line program header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineProgramHeader
{
    /// Offset of the unit inside `.debug_line`
    pub offset: usize,
    pub unit_length: u32,
    pub version: u16,
    pub header_length: u32,
    pub minimum_instruction_length: u8,
    pub default_is_stmt: bool,
    pub line_base: i8,
    pub line_range: u8,
    pub opcode_base: u8,
    /// Operand counts of standard opcodes `1..opcode_base`
    pub standard_opcode_lengths: Vec<u8>,
}

/// An entry of the file name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry
{
    pub path: String,
    /// 1-based index into the include directories; 0 is the compilation directory
    pub directory_index: u64,
    pub modification_time: u64,
    pub size: u64,
}

/// One row of the line-number matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow
{
    pub address: Address,
    /// 1-based index into [`LineProgram::files`]
    pub file: u64,
    pub line_begin: u64,
    pub line_end: u64,
    pub column_begin: u64,
    pub column_end: u64,
    pub is_stmt: bool,
    /// Marks the first address past the end of a sequence
    pub end_sequence: bool,
}

/// A resolved source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    pub file: String,
    pub line: u64,
    pub column: u64,
    /// Address of the row the location was taken from
    pub address: Address,
}

/// A decoded line program unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineProgram
{
    pub header: LineProgramHeader,
    pub include_directories: Vec<String>,
    pub files: Vec<FileEntry>,
    pub rows: Vec<LineRow>,
}

#[derive(Debug, Clone, Copy)]
struct Registers
{
    address: u64,
    file: u64,
    line: u64,
    column: u64,
    is_stmt: bool,
    basic_block: bool,
    end_sequence: bool,
}

impl Registers
{
    fn new(default_is_stmt: bool) -> Self
    {
        Self {
            address: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block: false,
            end_sequence: false,
        }
    }
}

/// Interpret every line program unit in `.debug_line`, in section order.
///
/// Units with a version other than 2 are skipped. If no unit could be
/// decoded, the version error of the first unit is returned.
pub fn parse_all(debug_line: &[u8]) -> Result<Vec<LineProgram>>
{
    let mut programs = Vec::new();
    let mut first_unsupported = None;
    let mut offset = 0;

    while offset < debug_line.len() {
        match LineProgram::parse(debug_line, offset) {
            Ok((program, next)) => {
                programs.push(program);
                offset = next;
            }
            Err(DebuggerError::UnsupportedDwarfVersion { section, version }) => {
                warn!(offset, version, "skipping line program with unsupported version");
                first_unsupported.get_or_insert(DebuggerError::UnsupportedDwarfVersion { section, version });
                offset = LineProgram::unit_end(debug_line, offset)?;
            }
            Err(error) => return Err(error),
        }
    }

    match first_unsupported {
        Some(error) if programs.is_empty() => Err(error),
        _ => Ok(programs),
    }
}

impl LineProgram
{
    fn unit_end(debug_line: &[u8], offset: usize) -> Result<usize>
    {
        let mut cursor = Cursor::at(debug_line, offset)?;
        let unit_length = cursor.read_u32()?;
        if unit_length == DWARF64_ESCAPE {
            return Err(DebuggerError::InvalidLineProgram(format!(
                "unit at 0x{offset:x} uses 64-bit DWARF"
            )));
        }
        let end = cursor.position() + unit_length as usize;
        if end > debug_line.len() {
            return Err(DebuggerError::UnexpectedEof {
                offset: cursor.position(),
                needed: unit_length as usize,
            });
        }
        Ok(end)
    }

    /// Decode and run the unit at `offset`. Returns the program and the
    /// offset of the next unit.
    pub fn parse(debug_line: &[u8], offset: usize) -> Result<(Self, usize)>
    {
        let unit_end = Self::unit_end(debug_line, offset)?;
        let mut cursor = Cursor::at(&debug_line[..unit_end], offset)?;
        let unit_length = cursor.read_u32()?;
        let version = cursor.read_u16()?;
        if version != SUPPORTED_VERSION {
            return Err(DebuggerError::UnsupportedDwarfVersion {
                section: ".debug_line",
                version,
            });
        }
        let header_length = cursor.read_u32()?;
        let program_start = cursor.position() + header_length as usize;
        if program_start > unit_end {
            return Err(DebuggerError::InvalidLineProgram(format!(
                "header length {header_length} runs past the unit at 0x{offset:x}"
            )));
        }

        let minimum_instruction_length = cursor.read_u8()?;
        let default_is_stmt = cursor.read_u8()? != 0;
        let line_base = cursor.read_i8()?;
        let line_range = cursor.read_u8()?;
        let opcode_base = cursor.read_u8()?;
        if line_range == 0 || opcode_base == 0 {
            return Err(DebuggerError::InvalidLineProgram(format!(
                "unit at 0x{offset:x} has line_range {line_range} and opcode_base {opcode_base}"
            )));
        }
        let standard_opcode_lengths = cursor.read_bytes(usize::from(opcode_base) - 1)?.to_vec();

        let mut include_directories = Vec::new();
        loop {
            let directory = cursor.read_cstr()?;
            if directory.is_empty() {
                break;
            }
            include_directories.push(String::from_utf8_lossy(directory).into_owned());
        }

        let mut files = Vec::new();
        loop {
            let path = cursor.read_cstr()?;
            if path.is_empty() {
                break;
            }
            files.push(read_file_entry(path, &mut cursor)?);
        }

        let header = LineProgramHeader {
            offset,
            unit_length,
            version,
            header_length,
            minimum_instruction_length,
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            standard_opcode_lengths,
        };
        debug!(
            offset,
            version,
            directories = include_directories.len(),
            files = files.len(),
            "line program header"
        );

        let mut program = Self {
            header,
            include_directories,
            files,
            rows: Vec::new(),
        };
        program.run(&debug_line[program_start..unit_end])?;
        debug!(offset, rows = program.rows.len(), "line program finished");
        Ok((program, unit_end))
    }

    fn run(&mut self, opcodes: &[u8]) -> Result<()>
    {
        let header = self.header.clone();
        let min_inst = u64::from(header.minimum_instruction_length);
        let mut cursor = Cursor::new(opcodes);
        let mut state = Registers::new(header.default_is_stmt);

        while !cursor.is_empty() {
            let opcode = cursor.read_u8()?;

            if opcode >= header.opcode_base {
                let adjusted = opcode - header.opcode_base;
                let address_advance = u64::from(adjusted / header.line_range) * min_inst;
                let line_advance = i64::from(header.line_base) + i64::from(adjusted % header.line_range);
                state.address = state.address.wrapping_add(address_advance);
                state.line = state.line.wrapping_add_signed(line_advance);
                self.emit(&state);
                state.basic_block = false;
                continue;
            }

            if opcode == 0 {
                self.run_extended(&mut cursor, &mut state)?;
                continue;
            }

            match DwLns(opcode) {
                constants::DW_LNS_copy => {
                    self.emit(&state);
                    state.basic_block = false;
                }
                constants::DW_LNS_advance_pc => {
                    state.address = state.address.wrapping_add(cursor.read_uleb128()?.wrapping_mul(min_inst));
                }
                constants::DW_LNS_advance_line => {
                    state.line = state.line.wrapping_add_signed(cursor.read_sleb128()?);
                }
                constants::DW_LNS_set_file => state.file = cursor.read_uleb128()?,
                constants::DW_LNS_set_column => state.column = cursor.read_uleb128()?,
                constants::DW_LNS_negate_stmt => {
                    state.is_stmt = !state.is_stmt;
                    if state.is_stmt {
                        self.emit(&state);
                    }
                }
                constants::DW_LNS_set_basic_block => state.basic_block = true,
                constants::DW_LNS_const_add_pc => {
                    let adjusted = 255 - header.opcode_base;
                    state.address = state
                        .address
                        .wrapping_add(u64::from(adjusted / header.line_range) * min_inst);
                }
                constants::DW_LNS_fixed_advance_pc => {
                    state.address = state.address.wrapping_add(u64::from(cursor.read_u16()?));
                }
                constants::DW_LNS_set_prologue_end => {}
                other => {
                    let operands = header.standard_opcode_lengths[usize::from(opcode) - 1];
                    trace!(opcode = %other, operands, "skipping standard opcode");
                    for _ in 0..operands {
                        cursor.read_uleb128()?;
                    }
                }
            }
        }

        if self.rows.last().is_some_and(|row| !row.end_sequence) {
            warn!(offset = header.offset, "line program ends without an end_sequence");
        }
        Ok(())
    }

    fn run_extended(&mut self, cursor: &mut Cursor<'_>, state: &mut Registers) -> Result<()>
    {
        let length = usize::try_from(cursor.read_uleb128()?)
            .map_err(|_| DebuggerError::InvalidLineProgram("extended opcode length overflows".to_string()))?;
        if length == 0 {
            return Ok(());
        }
        let body = cursor.position();
        let end = body.checked_add(length).ok_or(DebuggerError::UnexpectedEof {
            offset: body,
            needed: length,
        })?;

        match DwLne(cursor.read_u8()?) {
            constants::DW_LNE_end_sequence => {
                state.end_sequence = true;
                self.emit(state);
                *state = Registers::new(self.header.default_is_stmt);
            }
            constants::DW_LNE_set_address => {
                state.address = match length - 1 {
                    8 => cursor.read_u64()?,
                    4 => u64::from(cursor.read_u32()?),
                    size => {
                        return Err(DebuggerError::InvalidLineProgram(format!(
                            "DW_LNE_set_address with a {size}-byte operand"
                        )))
                    }
                };
            }
            constants::DW_LNE_define_file => {
                let path = cursor.read_cstr()?;
                let entry = read_file_entry(path, cursor)?;
                trace!(path = %entry.path, "define_file");
                self.files.push(entry);
            }
            other => trace!(opcode = %other, length, "skipping extended opcode"),
        }

        cursor.seek(end)
    }

    fn emit(&mut self, state: &Registers)
    {
        if let Some(previous) = self.rows.last_mut().filter(|row| !row.end_sequence) {
            previous.line_end = state.line;
            previous.column_end = state.column;
        }
        self.rows.push(LineRow {
            address: Address::new(state.address),
            file: state.file,
            line_begin: state.line,
            line_end: state.line,
            column_begin: state.column,
            column_end: state.column,
            is_stmt: state.is_stmt,
            end_sequence: state.end_sequence,
        });
    }

    /// File entry for a row's 1-based file index.
    #[must_use]
    pub fn file(&self, index: u64) -> Option<&FileEntry>
    {
        let index = usize::try_from(index.checked_sub(1)?).ok()?;
        self.files.get(index)
    }

    /// Path of a file entry joined with its include directory.
    #[must_use]
    pub fn file_path(&self, entry: &FileEntry) -> String
    {
        let directory = usize::try_from(entry.directory_index)
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| self.include_directories.get(index));
        match directory {
            Some(directory) if !Path::new(&entry.path).is_absolute() => format!("{directory}/{}", entry.path),
            _ => entry.path.clone(),
        }
    }

    fn file_matches(&self, index: u64, request: &str) -> bool
    {
        self.file(index).is_some_and(|entry| {
            let full = self.file_path(entry);
            [entry.path.as_str(), full.as_str()]
                .iter()
                .any(|candidate| *candidate == request || candidate.ends_with(&format!("/{request}")))
        })
    }

    /// Lowest address of a statement row for `file:line`.
    ///
    /// `file` matches a file entry by exact path or by trailing path
    /// components, so `"demo.c"` matches `"src/demo.c"`.
    #[must_use]
    pub fn address_for(&self, file: &str, line: u64) -> Option<Address>
    {
        self.rows
            .iter()
            .filter(|row| row.is_stmt && !row.end_sequence && row.line_begin == line)
            .filter(|row| self.file_matches(row.file, file))
            .map(|row| row.address)
            .min()
    }

    /// Source position of the row covering `address`.
    #[must_use]
    pub fn location_for(&self, address: Address) -> Option<SourceLocation>
    {
        let mut sequence_start = 0;
        for (index, row) in self.rows.iter().enumerate() {
            if !row.end_sequence {
                continue;
            }
            let sequence = &self.rows[sequence_start..index];
            sequence_start = index + 1;
            if row.address <= address {
                continue;
            }
            let Some(covering) = sequence.iter().rev().find(|candidate| candidate.address <= address) else {
                continue;
            };
            return Some(SourceLocation {
                file: self
                    .file(covering.file)
                    .map(|entry| self.file_path(entry))
                    .unwrap_or_default(),
                line: covering.line_begin,
                column: covering.column_begin,
                address: covering.address,
            });
        }
        None
    }
}

fn read_file_entry(path: &[u8], cursor: &mut Cursor<'_>) -> Result<FileEntry>
{
    Ok(FileEntry {
        path: String::from_utf8_lossy(path).into_owned(),
        directory_index: cursor.read_uleb128()?,
        modification_time: cursor.read_uleb128()?,
        size: cursor.read_uleb128()?,
    })
}
