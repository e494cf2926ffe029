//! # Symbol Extraction
//!
//! Builds the [`SymbolTable`] from `.symtab` and `.strtab`.
//!
//! The table keeps function names and source-file names as two packed blocks
//! of null-terminated strings, plus the function addresses in a parallel
//! vector. Entries appear in symbol-table order, so the i-th function name
//! and the i-th address always describe the same ELF symbol.
//!
//! Extraction runs in two passes over the symbol entries: the first sizes the
//! name blocks and counts entries, the second copies into buffers allocated
//! with exactly that capacity.

pub mod demangle;

use std::borrow::Cow;
use std::mem;

use object::elf::{self, Sym64};
use object::read::elf::Sym as _;
use object::read::StringTable;
use object::LittleEndian;
use tracing::debug;

use crate::binary::{BinaryImage, SectionId};
use crate::error::{DebuggerError, Result};
use crate::types::Address;

type ElfSymbol = Sym64<LittleEndian>;

/// Size of one `Elf64_Sym` entry.
pub const ELF64_SYMBOL_SIZE: u64 = mem::size_of::<ElfSymbol>() as u64;

/// A function symbol borrowed from a [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSymbol<'a>
{
    /// Linkage name
    pub name: &'a str,
    /// `st_value`
    pub address: Address,
    /// `st_size`, zero when unknown
    pub size: u64,
}

impl FunctionSymbol<'_>
{
    /// Demangled name if the symbol is Rust-mangled, otherwise the raw name.
    #[must_use]
    pub fn display_name(&self) -> String
    {
        demangle::demangle(self.name).unwrap_or_else(|| self.name.to_string())
    }

    /// Source language guessed from the linkage name's mangling.
    #[must_use]
    pub fn language(&self) -> demangle::SymbolLanguage
    {
        demangle::language_of(self.name)
    }

    /// Whether `address` falls inside this function.
    ///
    /// Zero-sized symbols only contain their own start address.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        let start = self.address.value();
        let end = start.saturating_add(self.size.max(1));
        (start..end).contains(&address.value())
    }
}

/// Function and file names with function addresses, in symbol-table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable
{
    function_names: String,
    file_names: String,
    function_addresses: Vec<Address>,
    function_sizes: Vec<u64>,
    file_count: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Sizing
{
    function_bytes: usize,
    file_bytes: usize,
    functions: usize,
    files: usize,
}

impl SymbolTable
{
    /// Extract function and file symbols from a loaded image.
    pub fn extract(image: &BinaryImage) -> Result<Self>
    {
        let header = image.section_header(SectionId::SymbolTable);
        Self::from_sections(
            image.section_data(SectionId::SymbolTable),
            header.entry_size,
            image.section_data(SectionId::StringTable),
        )
    }

    /// Extract from raw `.symtab` contents with entry size `entry_size` and
    /// the matching string table.
    ///
    /// Entry 0 (the null symbol) is skipped. A trailing partial entry is
    /// ignored.
    ///
    /// ## Panics
    ///
    /// Panics if the copy pass disagrees with the sizing pass, which means
    /// the table was mutated between passes.
    pub fn from_sections(symtab: &[u8], entry_size: u64, strtab: &[u8]) -> Result<Self>
    {
        if entry_size != ELF64_SYMBOL_SIZE {
            return Err(DebuggerError::InvalidElf(format!(
                ".symtab entry size is {entry_size}, expected {ELF64_SYMBOL_SIZE}"
            )));
        }
        let count = symtab.len() / ELF64_SYMBOL_SIZE as usize;
        let (symbols, _) = object::pod::slice_from_bytes::<ElfSymbol>(symtab, count)
            .map_err(|()| DebuggerError::InvalidElf(".symtab cannot be read as Elf64_Sym entries".to_string()))?;
        let strings = StringTable::new(strtab, 0, strtab.len() as u64);
        let symbols = symbols.iter().skip(1);

        let mut sizing = Sizing::default();
        for symbol in symbols.clone() {
            match symbol.st_type() {
                elf::STT_FUNC => {
                    sizing.function_bytes += Self::name_of(strings, symbol)?.len() + 1;
                    sizing.functions += 1;
                }
                elf::STT_FILE => {
                    sizing.file_bytes += Self::name_of(strings, symbol)?.len() + 1;
                    sizing.files += 1;
                }
                _ => {}
            }
        }

        let mut table = Self {
            function_names: String::with_capacity(sizing.function_bytes),
            file_names: String::with_capacity(sizing.file_bytes),
            function_addresses: Vec::with_capacity(sizing.functions),
            function_sizes: Vec::with_capacity(sizing.functions),
            file_count: 0,
        };
        for symbol in symbols {
            match symbol.st_type() {
                elf::STT_FUNC => {
                    table.function_names.push_str(&Self::name_of(strings, symbol)?);
                    table.function_names.push('\0');
                    table.function_addresses.push(Address::from(symbol.st_value(LittleEndian)));
                    table.function_sizes.push(symbol.st_size(LittleEndian));
                }
                elf::STT_FILE => {
                    table.file_names.push_str(&Self::name_of(strings, symbol)?);
                    table.file_names.push('\0');
                    table.file_count += 1;
                }
                _ => {}
            }
        }

        let copied = Sizing {
            function_bytes: table.function_names.len(),
            file_bytes: table.file_names.len(),
            functions: table.function_addresses.len(),
            files: table.file_count,
        };
        assert_eq!(sizing, copied, "symbol copy pass disagrees with sizing pass");

        debug!(
            symbols = count.saturating_sub(1),
            functions = table.function_count(),
            files = table.file_count,
            "extracted symbol table"
        );
        Ok(table)
    }

    fn name_of<'a>(strings: StringTable<'a>, symbol: &ElfSymbol) -> Result<Cow<'a, str>>
    {
        let offset = symbol.st_name(LittleEndian);
        let raw = strings.get(offset).map_err(|()| {
            DebuggerError::InvalidElf(format!("symbol name offset {offset} lies outside .strtab"))
        })?;
        Ok(String::from_utf8_lossy(raw))
    }

    /// Number of `STT_FUNC` symbols.
    #[must_use]
    pub fn function_count(&self) -> usize
    {
        self.function_addresses.len()
    }

    /// Number of `STT_FILE` symbols.
    #[must_use]
    pub fn file_count(&self) -> usize
    {
        self.file_count
    }

    /// Function addresses, parallel to [`function_names`](Self::function_names).
    #[must_use]
    pub fn function_addresses(&self) -> &[Address]
    {
        &self.function_addresses
    }

    /// Function names in symbol-table order.
    pub fn function_names(&self) -> impl Iterator<Item = &str> + '_
    {
        self.function_names.split_terminator('\0')
    }

    /// Source file names in symbol-table order.
    pub fn file_names(&self) -> impl Iterator<Item = &str> + '_
    {
        self.file_names.split_terminator('\0')
    }

    /// The packed, null-terminated function name block.
    #[must_use]
    pub fn function_name_block(&self) -> &str
    {
        &self.function_names
    }

    /// The packed, null-terminated file name block.
    #[must_use]
    pub fn file_name_block(&self) -> &str
    {
        &self.file_names
    }

    /// Functions in symbol-table order.
    pub fn functions(&self) -> impl Iterator<Item = FunctionSymbol<'_>> + '_
    {
        self.function_names()
            .zip(self.function_addresses.iter().zip(&self.function_sizes))
            .map(|(name, (address, size))| FunctionSymbol {
                name,
                address: *address,
                size: *size,
            })
    }

    /// First function whose linkage name, or demangled name, equals `name`.
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<FunctionSymbol<'_>>
    {
        self.functions().find(|function| function.name == name).or_else(|| {
            self.functions()
                .find(|function| demangle::demangle(function.name).is_some_and(|demangled| demangled == name))
        })
    }

    /// Function whose `[address, address + size)` range contains `address`.
    ///
    /// When several overlap, the one with the highest start address wins.
    #[must_use]
    pub fn function_containing(&self, address: Address) -> Option<FunctionSymbol<'_>>
    {
        self.functions()
            .filter(|function| function.contains(address))
            .max_by_key(|function| function.address)
    }
}
