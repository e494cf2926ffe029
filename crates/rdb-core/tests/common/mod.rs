//! Synthetic ELF64 images for the loader tests.
//!
//! The builder lays out a minimal but well-formed executable: ELF header,
//! section contents, then the section header table. Only the fields the
//! engine reads are meaningful.

#![allow(dead_code)]

use std::mem;
use std::path::PathBuf;

use gimli::{constants, leb128};
use object::{bytes_of, elf, LittleEndian, U16, U32, U64};

pub const MAIN_ADDRESS: u64 = 0x401126;
pub const HELPER_ADDRESS: u64 = 0x401140;

struct Section
{
    name: &'static str,
    kind: u32,
    link: u32,
    entry_size: u64,
    data: Vec<u8>,
}

/// Builder for a small x86-64 executable with symbols and DWARF 2 data.
pub struct ElfBuilder
{
    sections: Vec<Section>,
}

impl Default for ElfBuilder
{
    fn default() -> Self
    {
        Self::with_debug_info()
    }
}

impl ElfBuilder
{
    /// `.symtab`/`.strtab` with `main`, `helper`, a data object and a file
    /// symbol, plus every debug section.
    pub fn with_debug_info() -> Self
    {
        let (symtab, strtab) = symbols();
        let mut builder = Self { sections: Vec::new() };
        // .symtab links to .strtab, which is section 2 once the null entry is counted
        builder.push(".symtab", elf::SHT_SYMTAB, 2, 24, symtab);
        builder.push(".strtab", elf::SHT_STRTAB, 0, 0, strtab);
        builder.push(".debug_abbrev", elf::SHT_PROGBITS, 0, 0, debug_abbrev());
        builder.push(".debug_info", elf::SHT_PROGBITS, 0, 0, debug_info());
        builder.push(".debug_str", elf::SHT_PROGBITS, 0, 0, debug_str().to_vec());
        builder.push(".debug_line", elf::SHT_PROGBITS, 0, 0, debug_line());
        builder
    }

    fn push(&mut self, name: &'static str, kind: u32, link: u32, entry_size: u64, data: Vec<u8>)
    {
        self.sections.push(Section {
            name,
            kind,
            link,
            entry_size,
            data,
        });
    }

    /// Drop the section called `name`.
    pub fn without(mut self, name: &str) -> Self
    {
        self.sections.retain(|section| section.name != name);
        self
    }

    /// Replace the contents of the section called `name`.
    pub fn replace(mut self, name: &str, data: Vec<u8>) -> Self
    {
        if let Some(section) = self.sections.iter_mut().find(|section| section.name == name) {
            section.data = data;
        }
        self
    }

    pub fn build(&self) -> Vec<u8>
    {
        self.build_with_class(elf::ELFCLASS64)
    }

    /// Build the image with `class` in the identification bytes.
    pub fn build_with_class(&self, class: u8) -> Vec<u8>
    {
        let header_size = mem::size_of::<elf::FileHeader64<LittleEndian>>();
        let section_header_size = mem::size_of::<elf::SectionHeader64<LittleEndian>>();

        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for name in self.sections.iter().map(|section| section.name).chain([".shstrtab"]) {
            name_offsets.push(u32::try_from(shstrtab.len()).unwrap());
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }

        let mut image = vec![0u8; header_size];
        let mut placed = Vec::new();
        for data in self.sections.iter().map(|section| &section.data).chain([&shstrtab]) {
            placed.push((image.len() as u64, data.len() as u64));
            image.extend_from_slice(data);
        }
        while image.len() % 8 != 0 {
            image.push(0);
        }
        let section_header_offset = image.len() as u64;
        let section_count = u16::try_from(self.sections.len() + 2).unwrap();

        // null section
        image.resize(image.len() + section_header_size, 0);
        let kinds = self
            .sections
            .iter()
            .map(|section| (section.kind, section.link, section.entry_size))
            .chain([(elf::SHT_STRTAB, 0, 0)]);
        for ((name, (offset, size)), (kind, link, entry_size)) in name_offsets.iter().zip(&placed).zip(kinds) {
            let section = elf::SectionHeader64 {
                sh_name: U32::new(LittleEndian, *name),
                sh_type: U32::new(LittleEndian, kind),
                sh_flags: U64::new(LittleEndian, 0),
                sh_addr: U64::new(LittleEndian, 0),
                sh_offset: U64::new(LittleEndian, *offset),
                sh_size: U64::new(LittleEndian, *size),
                sh_link: U32::new(LittleEndian, link),
                sh_info: U32::new(LittleEndian, 0),
                sh_addralign: U64::new(LittleEndian, 1),
                sh_entsize: U64::new(LittleEndian, entry_size),
            };
            image.extend_from_slice(bytes_of(&section));
        }

        let header = elf::FileHeader64 {
            e_ident: elf::Ident {
                magic: elf::ELFMAG,
                class,
                data: elf::ELFDATA2LSB,
                version: elf::EV_CURRENT,
                os_abi: elf::ELFOSABI_NONE,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: U16::new(LittleEndian, elf::ET_EXEC),
            e_machine: U16::new(LittleEndian, elf::EM_X86_64),
            e_version: U32::new(LittleEndian, u32::from(elf::EV_CURRENT)),
            e_entry: U64::new(LittleEndian, MAIN_ADDRESS),
            e_phoff: U64::new(LittleEndian, 0),
            e_shoff: U64::new(LittleEndian, section_header_offset),
            e_flags: U32::new(LittleEndian, 0),
            e_ehsize: U16::new(LittleEndian, header_size as u16),
            e_phentsize: U16::new(LittleEndian, 0),
            e_phnum: U16::new(LittleEndian, 0),
            e_shentsize: U16::new(LittleEndian, section_header_size as u16),
            e_shnum: U16::new(LittleEndian, section_count),
            e_shstrndx: U16::new(LittleEndian, section_count - 1),
        };
        image[..header_size].copy_from_slice(bytes_of(&header));
        image
    }

    /// Write the image to a fresh file under the system temp directory.
    pub fn write(&self, label: &str) -> TempImage
    {
        let path = std::env::temp_dir().join(format!("rdb-core-{label}-{}.elf", std::process::id()));
        std::fs::write(&path, self.build()).unwrap();
        TempImage { path }
    }
}

/// Path to a written image, removed on drop.
pub struct TempImage
{
    pub path: PathBuf,
}

impl Drop for TempImage
{
    fn drop(&mut self)
    {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn symbols() -> (Vec<u8>, Vec<u8>)
{
    let strtab = b"\0demo.c\0main\0helper\0counter\0".to_vec();
    let entries: [(u32, u8, u64, u64); 5] = [
        (0, 0, 0, 0),
        (1, elf::STT_FILE, 0, 0),
        (8, elf::STT_FUNC, MAIN_ADDRESS, 0x1a),
        (13, elf::STT_FUNC, HELPER_ADDRESS, 0x10),
        (20, elf::STT_OBJECT, 0x404010, 4),
    ];
    let mut symtab = Vec::new();
    for (name, kind, value, size) in entries {
        let symbol = elf::Sym64 {
            st_name: U32::new(LittleEndian, name),
            st_info: (elf::STB_GLOBAL << 4) | kind,
            st_other: 0,
            st_shndx: U16::new(LittleEndian, 1),
            st_value: U64::new(LittleEndian, value),
            st_size: U64::new(LittleEndian, size),
        };
        symtab.extend_from_slice(bytes_of(&symbol));
    }
    (symtab, strtab)
}

fn debug_str() -> &'static [u8]
{
    b"GNU C17 11.4.0 -gdwarf-2\0demo.c\0"
}

fn debug_abbrev() -> Vec<u8>
{
    let mut data = Vec::new();
    leb128::write::unsigned(&mut data, 1).unwrap();
    leb128::write::unsigned(&mut data, u64::from(constants::DW_TAG_compile_unit.0)).unwrap();
    data.push(1);
    for (name, form) in [
        (constants::DW_AT_producer, constants::DW_FORM_strp),
        (constants::DW_AT_language, constants::DW_FORM_data1),
        (constants::DW_AT_name, constants::DW_FORM_strp),
        (constants::DW_AT_stmt_list, constants::DW_FORM_data4),
    ] {
        leb128::write::unsigned(&mut data, u64::from(name.0)).unwrap();
        leb128::write::unsigned(&mut data, u64::from(form.0)).unwrap();
    }
    data.extend_from_slice(&[0, 0, 0]);
    data
}

/// Compile unit with the given version whose root DIE uses abbreviation 1.
pub fn debug_info_with_version(version: u16) -> Vec<u8>
{
    let mut body = vec![1];
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(constants::DW_LANG_C99.0 as u8);
    body.extend_from_slice(&25u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(0);

    let mut unit = Vec::new();
    unit.extend_from_slice(&version.to_le_bytes());
    unit.extend_from_slice(&0u32.to_le_bytes());
    unit.push(8);
    unit.extend_from_slice(&body);

    let mut data = u32::try_from(unit.len()).unwrap().to_le_bytes().to_vec();
    data.extend_from_slice(&unit);
    data
}

fn debug_info() -> Vec<u8>
{
    debug_info_with_version(2)
}

/// One sequence covering `main` (lines 3 to 6) and `helper` (line 9).
fn debug_line() -> Vec<u8>
{
    const LINE_BASE: i8 = -5;
    const LINE_RANGE: u8 = 14;
    const OPCODE_BASE: u8 = 13;
    let special = |address_advance: u8, line_advance: i8| {
        let adjusted = i16::from(line_advance - LINE_BASE) + i16::from(LINE_RANGE) * i16::from(address_advance);
        u8::try_from(adjusted + i16::from(OPCODE_BASE)).unwrap()
    };

    let mut program = vec![0, 9, 2];
    program.extend_from_slice(&MAIN_ADDRESS.to_le_bytes());
    program.push(3);
    leb128::write::signed(&mut program, 2).unwrap();
    program.push(1);
    program.push(special(8, 1));
    program.push(special(8, 2));
    program.push(2);
    leb128::write::unsigned(&mut program, HELPER_ADDRESS - MAIN_ADDRESS - 16).unwrap();
    program.push(3);
    leb128::write::signed(&mut program, 3).unwrap();
    program.push(1);
    program.push(2);
    leb128::write::unsigned(&mut program, 0x10).unwrap();
    program.extend_from_slice(&[0, 1, 1]);

    let mut header = vec![1, 1, LINE_BASE as u8, LINE_RANGE, OPCODE_BASE];
    header.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    header.extend_from_slice(b"/home/dev/demo\0\0");
    header.extend_from_slice(b"demo.c\0");
    header.extend_from_slice(&[1, 0, 0, 0]);

    let mut unit = Vec::new();
    unit.extend_from_slice(&2u16.to_le_bytes());
    unit.extend_from_slice(&u32::try_from(header.len()).unwrap().to_le_bytes());
    unit.extend_from_slice(&header);
    unit.extend_from_slice(&program);

    let mut data = u32::try_from(unit.len()).unwrap().to_le_bytes().to_vec();
    data.extend_from_slice(&unit);
    data
}
