//! `.debug_abbrev` decoding.
//!
//! An abbreviation table is a list of declarations, each giving a code, a
//! tag, a children flag and the attribute/form pairs of every DIE that uses
//! the code. The table ends at a zero code.
//!
//! For `DW_TAG_compile_unit` declarations the decoder also computes where the
//! name, producer and language attributes sit inside the DIE, so the compile
//! unit reader can pick them out without decoding every attribute.

use gimli::constants::{self, DwAt, DwForm, DwTag};
use tracing::debug;

use crate::binary::Cursor;
use crate::error::{DebuggerError, Result};

/// One attribute/form pair of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec
{
    pub name: DwAt,
    pub form: DwForm,
}

/// Position of an attribute value relative to the first byte after the
/// DIE's abbreviation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOffset
{
    pub offset: usize,
    pub form: DwForm,
}

/// Offsets of the compile-unit attributes the engine reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileUnitLayout
{
    pub name: Option<FieldOffset>,
    pub producer: Option<FieldOffset>,
    pub language: Option<FieldOffset>,
}

/// A decoded abbreviation declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbreviation
{
    pub code: u64,
    pub tag: DwTag,
    pub has_children: bool,
    pub attributes: Vec<AttributeSpec>,
    /// Present only for `DW_TAG_compile_unit`
    pub layout: Option<CompileUnitLayout>,
}

/// Declarations of one abbreviation table, in section order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbbreviationTable
{
    entries: Vec<Abbreviation>,
}

impl AbbreviationTable
{
    /// Declaration with the given code.
    #[must_use]
    pub fn get(&self, code: u64) -> Option<&Abbreviation>
    {
        self.entries.iter().find(|entry| entry.code == code)
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

    pub fn iter(&self) -> impl Iterator<Item = &Abbreviation>
    {
        self.entries.iter()
    }
}

/// Encoded size of a fixed-size form, or `None` for variable-length and
/// unknown forms.
#[must_use]
pub fn fixed_form_size(form: DwForm) -> Option<usize>
{
    match form {
        constants::DW_FORM_flag_present => Some(0),
        constants::DW_FORM_data1 | constants::DW_FORM_ref1 | constants::DW_FORM_flag => Some(1),
        constants::DW_FORM_data2 | constants::DW_FORM_ref2 => Some(2),
        constants::DW_FORM_data4
        | constants::DW_FORM_ref4
        | constants::DW_FORM_ref_addr
        | constants::DW_FORM_strp
        | constants::DW_FORM_sec_offset => Some(4),
        constants::DW_FORM_data8 | constants::DW_FORM_ref8 | constants::DW_FORM_addr => Some(8),
        _ => None,
    }
}

/// Decode the abbreviation table starting at `offset` in `.debug_abbrev`.
///
/// Decoding stops at a zero code or at the end of the section. At most
/// `limit` declarations are accepted.
///
/// ## Errors
///
/// - `UnexpectedEof`: a declaration is truncated
/// - `CorruptAbbrev`: children flag other than 0 or 1, or a zero code
///   inside an attribute list with a non-zero partner
/// - `TooManyAbbrevs`: more than `limit` declarations
/// - `UnsupportedForm`: a compile-unit attribute the engine reads follows a
///   form whose size is not fixed
pub fn parse_table(debug_abbrev: &[u8], offset: usize, limit: usize) -> Result<AbbreviationTable>
{
    let mut cursor = Cursor::at(debug_abbrev, offset)?;
    let mut entries = Vec::new();

    while !cursor.is_empty() {
        let start = cursor.position();
        let code = cursor.read_uleb128()?;
        if code == 0 {
            break;
        }
        if entries.len() == limit {
            return Err(DebuggerError::TooManyAbbrevs { limit });
        }

        let tag = DwTag(u16::try_from(cursor.read_uleb128()?).map_err(|_| DebuggerError::CorruptAbbrev {
            offset: start,
            reason: "tag does not fit in 16 bits".to_string(),
        })?);
        let has_children = match cursor.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(DebuggerError::CorruptAbbrev {
                    offset: start,
                    reason: format!("children flag is {other}"),
                })
            }
        };

        let attributes = parse_attributes(&mut cursor, start)?;
        let layout = if tag == constants::DW_TAG_compile_unit {
            Some(compile_unit_layout(&attributes)?)
        } else {
            None
        };
        debug!(code, tag = %tag, attributes = attributes.len(), has_children, "abbreviation");

        entries.push(Abbreviation {
            code,
            tag,
            has_children,
            attributes,
            layout,
        });
    }

    Ok(AbbreviationTable { entries })
}

fn parse_attributes(cursor: &mut Cursor<'_>, start: usize) -> Result<Vec<AttributeSpec>>
{
    let mut attributes = Vec::new();
    loop {
        let name = cursor.read_uleb128()?;
        let form = cursor.read_uleb128()?;
        match (name, form) {
            (0, 0) => return Ok(attributes),
            (0, _) | (_, 0) => {
                return Err(DebuggerError::CorruptAbbrev {
                    offset: start,
                    reason: format!("half-terminated attribute list (attribute {name}, form {form})"),
                })
            }
            _ => {}
        }
        let (Ok(name), Ok(form)) = (u16::try_from(name), u16::try_from(form)) else {
            return Err(DebuggerError::CorruptAbbrev {
                offset: start,
                reason: format!("attribute {name} or form {form} out of range"),
            });
        };
        attributes.push(AttributeSpec {
            name: DwAt(name),
            form: DwForm(form),
        });
    }
}

fn compile_unit_layout(attributes: &[AttributeSpec]) -> Result<CompileUnitLayout>
{
    let mut layout = CompileUnitLayout::default();
    // Offset of the next attribute, or the form that made it unknowable.
    let mut offset: std::result::Result<usize, DwForm> = Ok(0);

    for spec in attributes {
        let slot = match spec.name {
            constants::DW_AT_name => Some(&mut layout.name),
            constants::DW_AT_producer => Some(&mut layout.producer),
            constants::DW_AT_language => Some(&mut layout.language),
            _ => None,
        };
        if let Some(slot) = slot {
            *slot = Some(FieldOffset {
                offset: offset.map_err(DebuggerError::UnsupportedForm)?,
                form: spec.form,
            });
        }

        offset = match (offset, fixed_form_size(spec.form)) {
            (Ok(current), Some(size)) => Ok(current + size),
            (Ok(_), None) => Err(spec.form),
            (unknown, _) => unknown,
        };
    }

    Ok(layout)
}

#[cfg(test)]
mod tests
{
    use gimli::leb128;

    use super::*;

    fn declaration(out: &mut Vec<u8>, code: u64, tag: DwTag, children: u8, attributes: &[(DwAt, DwForm)])
    {
        leb128::write::unsigned(out, code).unwrap();
        leb128::write::unsigned(out, u64::from(tag.0)).unwrap();
        out.push(children);
        for (name, form) in attributes {
            leb128::write::unsigned(out, u64::from(name.0)).unwrap();
            leb128::write::unsigned(out, u64::from(form.0)).unwrap();
        }
        out.extend_from_slice(&[0, 0]);
    }

    fn gcc_style_table() -> Vec<u8>
    {
        let mut data = Vec::new();
        declaration(
            &mut data,
            1,
            constants::DW_TAG_compile_unit,
            1,
            &[
                (constants::DW_AT_producer, constants::DW_FORM_strp),
                (constants::DW_AT_language, constants::DW_FORM_data1),
                (constants::DW_AT_name, constants::DW_FORM_strp),
                (constants::DW_AT_comp_dir, constants::DW_FORM_strp),
                (constants::DW_AT_low_pc, constants::DW_FORM_addr),
                (constants::DW_AT_high_pc, constants::DW_FORM_data8),
                (constants::DW_AT_stmt_list, constants::DW_FORM_sec_offset),
            ],
        );
        declaration(
            &mut data,
            2,
            constants::DW_TAG_subprogram,
            0,
            &[
                (constants::DW_AT_external, constants::DW_FORM_flag_present),
                (constants::DW_AT_name, constants::DW_FORM_string),
                (constants::DW_AT_frame_base, constants::DW_FORM_exprloc),
            ],
        );
        data.push(0);
        data
    }

    #[test]
    fn test_compile_unit_offsets()
    {
        let table = parse_table(&gcc_style_table(), 0, 64).unwrap();
        assert_eq!(table.len(), 2);

        let unit = table.get(1).unwrap();
        assert_eq!(unit.tag, constants::DW_TAG_compile_unit);
        assert!(unit.has_children);
        let layout = unit.layout.unwrap();
        assert_eq!(layout.producer.unwrap().offset, 0);
        assert_eq!(layout.language.unwrap().offset, 4);
        assert_eq!(layout.language.unwrap().form, constants::DW_FORM_data1);
        assert_eq!(layout.name.unwrap().offset, 5);
    }

    #[test]
    fn test_other_tags_are_opaque()
    {
        let table = parse_table(&gcc_style_table(), 0, 64).unwrap();
        let subprogram = table.get(2).unwrap();
        assert_eq!(subprogram.tag, constants::DW_TAG_subprogram);
        assert_eq!(subprogram.attributes.len(), 3);
        assert!(subprogram.layout.is_none());
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_flag_present_occupies_no_bytes()
    {
        let mut data = Vec::new();
        declaration(
            &mut data,
            1,
            constants::DW_TAG_compile_unit,
            0,
            &[
                (constants::DW_AT_external, constants::DW_FORM_flag_present),
                (constants::DW_AT_name, constants::DW_FORM_strp),
            ],
        );
        let table = parse_table(&data, 0, 64).unwrap();
        assert_eq!(table.get(1).unwrap().layout.unwrap().name.unwrap().offset, 0);
    }

    #[test]
    fn test_inline_string_must_be_last_needed_attribute()
    {
        let mut trailing = Vec::new();
        declaration(
            &mut trailing,
            1,
            constants::DW_TAG_compile_unit,
            0,
            &[
                (constants::DW_AT_language, constants::DW_FORM_data2),
                (constants::DW_AT_name, constants::DW_FORM_string),
                (constants::DW_AT_low_pc, constants::DW_FORM_addr),
            ],
        );
        let layout = parse_table(&trailing, 0, 64).unwrap().get(1).unwrap().layout.unwrap();
        assert_eq!(layout.name.unwrap().offset, 2);

        let mut leading = Vec::new();
        declaration(
            &mut leading,
            1,
            constants::DW_TAG_compile_unit,
            0,
            &[
                (constants::DW_AT_producer, constants::DW_FORM_string),
                (constants::DW_AT_name, constants::DW_FORM_strp),
            ],
        );
        match parse_table(&leading, 0, 64) {
            Err(DebuggerError::UnsupportedForm(form)) => assert_eq!(form, constants::DW_FORM_string),
            other => panic!("expected UnsupportedForm, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_children_flag()
    {
        let mut data = Vec::new();
        declaration(&mut data, 1, constants::DW_TAG_base_type, 2, &[]);
        assert!(matches!(
            parse_table(&data, 0, 64),
            Err(DebuggerError::CorruptAbbrev { offset: 0, .. })
        ));
    }

    #[test]
    fn test_capacity_limit()
    {
        let mut data = Vec::new();
        for code in 1..=3 {
            declaration(&mut data, code, constants::DW_TAG_base_type, 0, &[]);
        }
        assert_eq!(parse_table(&data, 0, 3).unwrap().len(), 3);
        assert!(matches!(
            parse_table(&data, 0, 2),
            Err(DebuggerError::TooManyAbbrevs { limit: 2 })
        ));
    }

    #[test]
    fn test_table_at_offset_and_truncation()
    {
        let mut data = vec![0xff, 0xff];
        declaration(&mut data, 7, constants::DW_TAG_variable, 0, &[]);
        let table = parse_table(&data, 2, 64).unwrap();
        assert_eq!(table.iter().map(|entry| entry.code).collect::<Vec<_>>(), [7]);

        let truncated = [0x01, 0x11];
        assert!(matches!(
            parse_table(&truncated, 0, 64),
            Err(DebuggerError::UnexpectedEof { .. })
        ));
    }
}
