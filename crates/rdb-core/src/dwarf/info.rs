//! First compile unit of `.debug_info`.

use gimli::constants::{self, DwLang};
use tracing::debug;

use super::abbrev::{self, AbbreviationTable, FieldOffset};
use crate::binary::{cursor, Cursor};
use crate::error::{DebuggerError, Result};

const DWARF64_ESCAPE: u32 = 0xffff_ffff;

/// Summary of the first compile unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileUnit
{
    /// Unit header version (2 to 4)
    pub version: u16,
    /// Size of a target address in bytes
    pub address_size: u8,
    /// Offset of the unit's abbreviation table in `.debug_abbrev`
    pub abbrev_offset: usize,
    /// `DW_AT_name`, usually the primary source file
    pub name: Option<String>,
    /// `DW_AT_producer`, the compiler identification string
    pub producer: Option<String>,
    /// `DW_AT_language`
    pub language: Option<DwLang>,
}

/// Sections the compile unit reader needs.
#[derive(Debug, Clone, Copy)]
pub struct InfoSections<'a>
{
    pub debug_info: &'a [u8],
    pub debug_abbrev: &'a [u8],
    pub debug_str: &'a [u8],
}

/// Read the header and root DIE of the first unit in `.debug_info`.
///
/// Returns the unit summary and the abbreviation table the unit refers to.
pub fn read_first_unit(sections: InfoSections<'_>, max_abbreviations: usize) -> Result<(CompileUnit, AbbreviationTable)>
{
    let mut cursor = Cursor::new(sections.debug_info);
    let unit_length = cursor.read_u32()?;
    if unit_length == DWARF64_ESCAPE {
        return Err(DebuggerError::InvalidElf(
            "64-bit DWARF units in .debug_info are not supported".to_string(),
        ));
    }
    let version = cursor.read_u16()?;
    if !(2..=4).contains(&version) {
        return Err(DebuggerError::UnsupportedDwarfVersion {
            section: ".debug_info",
            version,
        });
    }
    let abbrev_offset = cursor.read_u32()? as usize;
    let address_size = cursor.read_u8()?;

    let table = abbrev::parse_table(sections.debug_abbrev, abbrev_offset, max_abbreviations)?;

    let code = cursor.read_uleb128()?;
    let root = table.get(code).ok_or_else(|| DebuggerError::CorruptAbbrev {
        offset: abbrev_offset,
        reason: format!("root DIE uses undeclared code {code}"),
    })?;
    let layout = match root.layout {
        Some(layout) if root.tag == constants::DW_TAG_compile_unit => layout,
        _ => {
            return Err(DebuggerError::CorruptAbbrev {
                offset: abbrev_offset,
                reason: format!("root DIE is {}, not a compile unit", root.tag),
            })
        }
    };

    let fields = cursor.position();
    let unit = CompileUnit {
        version,
        address_size,
        abbrev_offset,
        name: layout
            .name
            .map(|field| read_string(sections, fields, field))
            .transpose()?,
        producer: layout
            .producer
            .map(|field| read_string(sections, fields, field))
            .transpose()?,
        language: layout
            .language
            .map(|field| read_constant(sections.debug_info, fields, field))
            .transpose()?
            .and_then(|value| u16::try_from(value).ok())
            .map(DwLang),
    };

    debug!(
        version,
        address_size,
        name = unit.name.as_deref().unwrap_or("<unnamed>"),
        producer = unit.producer.as_deref().unwrap_or("<unknown>"),
        language = %unit.language.map(|lang| lang.to_string()).unwrap_or_default(),
        "compile unit"
    );
    Ok((unit, table))
}

fn read_string(sections: InfoSections<'_>, fields: usize, field: FieldOffset) -> Result<String>
{
    let mut cursor = Cursor::at(sections.debug_info, fields + field.offset)?;
    let raw = match field.form {
        constants::DW_FORM_strp => cursor::string_at(sections.debug_str, cursor.read_u32()? as usize)?,
        constants::DW_FORM_string => cursor.read_cstr()?,
        other => return Err(DebuggerError::UnsupportedForm(other)),
    };
    Ok(String::from_utf8_lossy(raw).into_owned())
}

fn read_constant(debug_info: &[u8], fields: usize, field: FieldOffset) -> Result<u64>
{
    let mut cursor = Cursor::at(debug_info, fields + field.offset)?;
    match field.form {
        constants::DW_FORM_data1 => Ok(u64::from(cursor.read_u8()?)),
        constants::DW_FORM_data2 => Ok(u64::from(cursor.read_u16()?)),
        constants::DW_FORM_data4 => Ok(u64::from(cursor.read_u32()?)),
        constants::DW_FORM_data8 => cursor.read_u64(),
        other => Err(DebuggerError::UnsupportedForm(other)),
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::DwForm;
    use gimli::leb128;

    use super::*;

    fn abbrev_table(name_form: DwForm) -> Vec<u8>
    {
        let mut data = Vec::new();
        for value in [1, u64::from(constants::DW_TAG_compile_unit.0)] {
            leb128::write::unsigned(&mut data, value).unwrap();
        }
        data.push(0);
        for (name, form) in [
            (constants::DW_AT_producer, constants::DW_FORM_strp),
            (constants::DW_AT_language, constants::DW_FORM_data1),
            (constants::DW_AT_name, name_form),
        ] {
            leb128::write::unsigned(&mut data, u64::from(name.0)).unwrap();
            leb128::write::unsigned(&mut data, u64::from(form.0)).unwrap();
        }
        data.extend_from_slice(&[0, 0, 0]);
        data
    }

    fn unit(version: u16, body: &[u8]) -> Vec<u8>
    {
        let mut data = Vec::new();
        let length = u32::try_from(2 + 4 + 1 + 1 + body.len()).unwrap();
        data.extend_from_slice(&length.to_le_bytes());
        data.extend_from_slice(&version.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(8);
        data.push(1);
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_reads_name_producer_language()
    {
        let debug_str = b"GNU C17 11.4.0\0demo.c\0";
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(0x0c);
        body.extend_from_slice(&15u32.to_le_bytes());

        let info = unit(2, &body);
        let abbrev = abbrev_table(constants::DW_FORM_strp);
        let (cu, table) = read_first_unit(
            InfoSections {
                debug_info: &info,
                debug_abbrev: &abbrev,
                debug_str,
            },
            64,
        )
        .unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(cu.version, 2);
        assert_eq!(cu.address_size, 8);
        assert_eq!(cu.producer.as_deref(), Some("GNU C17 11.4.0"));
        assert_eq!(cu.name.as_deref(), Some("demo.c"));
        assert_eq!(cu.language, Some(constants::DW_LANG_C99));
    }

    #[test]
    fn test_inline_name()
    {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(0x1c);
        body.extend_from_slice(b"main.rs\0");

        let info = unit(4, &body);
        let abbrev = abbrev_table(constants::DW_FORM_string);
        let (cu, _) = read_first_unit(
            InfoSections {
                debug_info: &info,
                debug_abbrev: &abbrev,
                debug_str: b"rustc\0",
            },
            64,
        )
        .unwrap();
        assert_eq!(cu.name.as_deref(), Some("main.rs"));
        assert_eq!(cu.producer.as_deref(), Some("rustc"));
        assert_eq!(cu.language, Some(constants::DW_LANG_Rust));
    }

    #[test]
    fn test_rejects_dwarf5_units()
    {
        let info = unit(5, &[]);
        let abbrev = abbrev_table(constants::DW_FORM_strp);
        let result = read_first_unit(
            InfoSections {
                debug_info: &info,
                debug_abbrev: &abbrev,
                debug_str: b"\0",
            },
            64,
        );
        assert!(matches!(
            result,
            Err(DebuggerError::UnsupportedDwarfVersion {
                section: ".debug_info",
                version: 5
            })
        ));
    }
}
