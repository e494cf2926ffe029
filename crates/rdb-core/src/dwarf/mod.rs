//! # DWARF Debug Information
//!
//! Decodes the parts of DWARF the engine needs:
//!
//! - [`abbrev`]: abbreviation tables from `.debug_abbrev`
//! - [`info`]: the first compile unit's name, producer and language
//! - [`line`]: the line-number programs in `.debug_line`
//!
//! [`DebugInfo`] bundles the decoded results and answers source-location
//! queries across every line program.
//!
//! Typed tag, attribute, form and opcode constants come from
//! [`gimli::constants`]; the decoding itself walks the sections with
//! [`Cursor`](crate::binary::Cursor).

pub mod abbrev;
pub mod info;
pub mod line;

pub use self::abbrev::AbbreviationTable;
pub use self::info::CompileUnit;
pub use self::line::{LineProgram, SourceLocation};
use crate::binary::{BinaryImage, SectionId};
use crate::error::Result;
use crate::types::Address;

/// Decoded debug information of one executable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo
{
    compile_unit: CompileUnit,
    abbreviations: AbbreviationTable,
    line_programs: Vec<LineProgram>,
}

impl DebugInfo
{
    /// Decode the compile unit and line programs of `image`.
    pub fn parse(image: &BinaryImage, max_abbreviations: usize) -> Result<Self>
    {
        let (compile_unit, abbreviations) = info::read_first_unit(
            info::InfoSections {
                debug_info: image.section_data(SectionId::DebugInfo),
                debug_abbrev: image.section_data(SectionId::DebugAbbrev),
                debug_str: image.section_data(SectionId::DebugStr),
            },
            max_abbreviations,
        )?;
        let line_programs = line::parse_all(image.section_data(SectionId::DebugLine))?;
        tracing::info!(
            unit = compile_unit.name.as_deref().unwrap_or("<unnamed>"),
            line_programs = line_programs.len(),
            rows = line_programs.iter().map(|program| program.rows.len()).sum::<usize>(),
            "decoded debug info"
        );
        Ok(Self {
            compile_unit,
            abbreviations,
            line_programs,
        })
    }

    /// Summary of the first compile unit.
    #[must_use]
    pub fn compile_unit(&self) -> &CompileUnit
    {
        &self.compile_unit
    }

    /// Abbreviation table of the first compile unit.
    #[must_use]
    pub fn abbreviations(&self) -> &AbbreviationTable
    {
        &self.abbreviations
    }

    /// Line programs in `.debug_line` order.
    #[must_use]
    pub fn line_programs(&self) -> &[LineProgram]
    {
        &self.line_programs
    }

    /// Lowest statement address for `file:line` across all line programs.
    #[must_use]
    pub fn address_for(&self, file: &str, line: u64) -> Option<Address>
    {
        self.line_programs
            .iter()
            .filter_map(|program| program.address_for(file, line))
            .min()
    }

    /// Source position covering `address`.
    #[must_use]
    pub fn location_for(&self, address: Address) -> Option<SourceLocation>
    {
        self.line_programs
            .iter()
            .find_map(|program| program.location_for(address))
    }
}
