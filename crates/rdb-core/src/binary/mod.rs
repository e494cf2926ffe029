//! # Binary Reader
//!
//! Loads an ELF64 executable into memory and indexes the sections the engine
//! needs: the symbol table, its string table, and the four DWARF sections used
//! for compile-unit and line-number information.
//!
//! Only little-endian ELF64 images are accepted. The file and section headers
//! are read through [`object::read::elf`]; the engine keeps its own owned
//! copy of the section table so the image can hold the file contents.
//!
//! ## References
//!
//! - [ELF-64 Object File Format](https://uclibc.org/docs/elf-64-gen.pdf)

pub mod cursor;

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use object::elf;
use object::read::elf::{FileHeader as _, SectionHeader as _};
use object::{FileKind, LittleEndian};
use tracing::debug;

pub use self::cursor::Cursor;
use crate::error::{DebuggerError, Result};
use crate::types::Address;

type ElfHeader = elf::FileHeader64<LittleEndian>;

/// Sections that must be present for a program to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionId
{
    /// `.symtab`
    SymbolTable,
    /// `.strtab`
    StringTable,
    /// `.debug_abbrev`
    DebugAbbrev,
    /// `.debug_info`
    DebugInfo,
    /// `.debug_str`
    DebugStr,
    /// `.debug_line`
    DebugLine,
}

impl SectionId
{
    /// Every required section, in the order they are checked.
    pub const ALL: [SectionId; 6] = [
        SectionId::SymbolTable,
        SectionId::StringTable,
        SectionId::DebugInfo,
        SectionId::DebugAbbrev,
        SectionId::DebugStr,
        SectionId::DebugLine,
    ];

    /// Section name as it appears in the section header string table.
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            SectionId::SymbolTable => ".symtab",
            SectionId::StringTable => ".strtab",
            SectionId::DebugAbbrev => ".debug_abbrev",
            SectionId::DebugInfo => ".debug_info",
            SectionId::DebugStr => ".debug_str",
            SectionId::DebugLine => ".debug_line",
        }
    }
}

impl fmt::Display for SectionId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// One entry of the section header table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader
{
    /// Name resolved through the section header string table
    pub name: String,
    /// `sh_type`
    pub kind: u32,
    /// `sh_addr`
    pub address: Address,
    /// `sh_offset`
    pub offset: u64,
    /// `sh_size`
    pub size: u64,
    /// `sh_link`
    pub link: u32,
    /// `sh_entsize`
    pub entry_size: u64,
}

impl SectionHeader
{
    fn from_elf(name: &[u8], section: &elf::SectionHeader64<LittleEndian>) -> Self
    {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            kind: section.sh_type(LittleEndian),
            address: Address::from(section.sh_addr(LittleEndian)),
            offset: section.sh_offset(LittleEndian),
            size: section.sh_size(LittleEndian),
            link: section.sh_link(LittleEndian),
            entry_size: section.sh_entsize(LittleEndian),
        }
    }

    /// File-backed byte range, or `None` for `SHT_NOBITS`.
    fn file_range(&self) -> Option<Range<usize>>
    {
        if self.kind == elf::SHT_NOBITS {
            return None;
        }
        let start = usize::try_from(self.offset).ok()?;
        let end = start.checked_add(usize::try_from(self.size).ok()?)?;
        Some(start..end)
    }
}

/// An ELF64 executable loaded into memory with its required sections indexed
///
/// The image owns the file contents; every section accessor borrows from it,
/// so symbol and DWARF decoding never copy section data.
#[derive(Debug)]
pub struct BinaryImage
{
    path: PathBuf,
    data: Vec<u8>,
    entry: Address,
    machine: u16,
    sections: Vec<SectionHeader>,
    required: [usize; SectionId::ALL.len()],
}

impl BinaryImage
{
    /// Read and index the executable at `path`.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file cannot be read
    /// - `InvalidElf`: bad magic, not ELF64, not little-endian, or truncated headers
    /// - `MissingSection`: one of the required sections is absent
    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!(path = %path.display(), size = data.len(), "loaded executable");
        Self::parse(path.to_path_buf(), data)
    }

    /// Index an ELF64 image that is already in memory.
    pub fn parse(path: PathBuf, data: Vec<u8>) -> Result<Self>
    {
        let invalid = |reason: String| DebuggerError::InvalidElf(format!("{}: {reason}", path.display()));

        match FileKind::parse(&*data) {
            Ok(FileKind::Elf64) => {}
            Ok(FileKind::Elf32) => return Err(invalid("not a 64-bit ELF binary".to_string())),
            _ => return Err(invalid("not a valid ELF binary".to_string())),
        }
        let header = ElfHeader::parse(&*data).map_err(|err| invalid(err.to_string()))?;
        let endian = header
            .endian()
            .map_err(|_| invalid("not little-endian".to_string()))?;
        let entry = Address::from(header.e_entry(endian));
        let machine = header.e_machine(endian);

        let table = header
            .sections(endian, &*data)
            .map_err(|err| invalid(err.to_string()))?;
        if table.is_empty() {
            return Err(invalid("no section headers".to_string()));
        }

        let mut sections = Vec::with_capacity(table.len());
        for section in table.iter() {
            let name = table
                .section_name(endian, section)
                .map_err(|err| invalid(err.to_string()))?;
            let indexed = SectionHeader::from_elf(name, section);
            section.data(endian, &*data).map_err(|_| {
                invalid(format!(
                    "section {} (offset 0x{:x}, size 0x{:x}) lies outside the file",
                    indexed.name, indexed.offset, indexed.size
                ))
            })?;
            sections.push(indexed);
        }

        let mut required = [0usize; SectionId::ALL.len()];
        for id in SectionId::ALL {
            let (index, _) = table
                .section_by_name(endian, id.name().as_bytes())
                .ok_or(DebuggerError::MissingSection(id.name()))?;
            let section = &sections[index.0];
            debug!(section = %section.name, offset = section.offset, size = section.size, "indexed section");
            required[Self::slot(id)] = index.0;
        }

        if machine != elf::EM_X86_64 {
            tracing::warn!(machine, "executable is not x86-64; breakpoints will not work");
        }

        Ok(Self {
            path,
            data,
            entry,
            machine,
            sections,
            required,
        })
    }

    fn slot(id: SectionId) -> usize
    {
        SectionId::ALL
            .iter()
            .position(|candidate| *candidate == id)
            .unwrap_or_default()
    }

    /// Path the image was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Entry point address (`e_entry`).
    #[must_use]
    pub fn entry(&self) -> Address
    {
        self.entry
    }

    /// `e_machine`
    #[must_use]
    pub fn machine(&self) -> u16
    {
        self.machine
    }

    /// All section headers in file order.
    #[must_use]
    pub fn sections(&self) -> &[SectionHeader]
    {
        &self.sections
    }

    /// Header of a required section.
    #[must_use]
    pub fn section_header(&self, id: SectionId) -> &SectionHeader
    {
        &self.sections[self.required[Self::slot(id)]]
    }

    /// Contents of a required section, borrowed from the image.
    #[must_use]
    pub fn section_data(&self, id: SectionId) -> &[u8]
    {
        // Ranges were validated in `parse`.
        self.section_header(id)
            .file_range()
            .and_then(|range| self.data.get(range))
            .unwrap_or_default()
    }
}
