//! Section loader: one walk of the ELF section table that allocates
//! runtime storage for every allocatable section and records the handful
//! of offsets the rest of the pipeline needs (`.symtab`, `.strtab`, the
//! section-header string table, and each relocation section's target).

use crate::alloc::SectionAllocator;
use crate::elf::{self, Elf32Ehdr, Elf32Shdr, Elf32Sym};
use crate::error::{LoaderError, Result};
use crate::reader::{read_cstr, read_record, ByteSource};
use std::ptr::NonNull;

/// Longest section/symbol name this loader bothers reading; matches the
/// reference's `name[33]` scratch buffers closely enough for diagnostics
/// without hardcoding a tiny cap on meaningful names.
const MAX_NAME_LEN: usize = 64;

/// Runtime record for one loaded, allocatable section.
pub struct SectionRecord {
    /// This section's index in the ELF section header table.
    pub sec_idx: usize,
    /// The section's runtime storage.
    pub data: NonNull<u8>,
    /// Size of `data`, in bytes (equal to `sh_size`).
    pub size: usize,
    /// Whether `data` was allocated from the executable-capable pool.
    pub executable: bool,
    /// Index of the `SHT_RELA` section that relocates this section, or 0
    /// if none does.
    pub rel_sec_idx: usize,
}

/// Everything the section walk discovers, handed back to the context
/// constructor to drive the relocation pass.
pub(crate) struct SectionWalk {
    pub sections: Vec<Option<SectionRecord>>,
    pub text_base: Option<NonNull<u8>>,
    pub symtab_offset: u64,
    pub symtab_count: usize,
    pub strtab_offset: u64,
    #[allow(dead_code)]
    pub shstrtab_offset: u64,
}

fn section_header_at<S: ByteSource + ?Sized>(
    src: &mut S,
    e_shoff: u64,
    idx: usize,
) -> Result<Elf32Shdr> {
    let offset = e_shoff + (idx as u64) * core::mem::size_of::<Elf32Shdr>() as u64;
    read_record(src, offset)
}

fn section_name<S: ByteSource + ?Sized>(
    src: &mut S,
    shstrtab_offset: u64,
    shdr: &Elf32Shdr,
) -> Result<String> {
    if shdr.sh_name == 0 {
        return Ok(String::new());
    }
    read_cstr(src, shstrtab_offset + shdr.sh_name as u64, MAX_NAME_LEN)
}

/// Reads symbol `n` of the symbol table, plus its name (from the string
/// table, or from the section-header string table when the symbol is
/// section-defined and carries no name of its own).
pub(crate) fn read_symbol<S: ByteSource + ?Sized>(
    src: &mut S,
    symtab_offset: u64,
    strtab_offset: u64,
    shstrtab_offset: u64,
    e_shoff: u64,
    n: usize,
) -> Result<(Elf32Sym, String)> {
    let offset = symtab_offset + (n as u64) * core::mem::size_of::<Elf32Sym>() as u64;
    let sym: Elf32Sym = read_record(src, offset)?;
    let name = if sym.st_name != 0 {
        read_cstr(src, strtab_offset + sym.st_name as u64, MAX_NAME_LEN)?
    } else {
        let shdr = section_header_at(src, e_shoff, sym.st_shndx as usize)?;
        section_name(src, shstrtab_offset, &shdr)?
    };
    Ok((sym, name))
}

/// Runs the section walk described in the section loader design: validates
/// the ELF header, then walks `1 .. e_shnum`, allocating, loading, and
/// classifying each section exactly once.
pub(crate) fn walk_sections<S: ByteSource + ?Sized>(
    src: &mut S,
    allocator: &dyn SectionAllocator,
) -> Result<SectionWalk> {
    let header: Elf32Ehdr = read_record(src, 0)?;
    if !header.has_valid_magic() {
        return Err(LoaderError::BadIdentification);
    }

    let shstrtab_hdr = section_header_at(src, header.e_shoff as u64, header.e_shstrndx as usize)?;
    let shstrtab_offset = shstrtab_hdr.sh_offset as u64;
    let e_shnum = header.e_shnum as usize;
    let e_shoff = header.e_shoff as u64;

    let mut sections: Vec<Option<SectionRecord>> = (0..e_shnum).map(|_| None).collect();
    let mut text_base = None;
    let mut symtab_offset = 0u64;
    let mut symtab_count = 0usize;
    let mut strtab_offset = 0u64;

    for n in 1..e_shnum {
        let shdr = section_header_at(src, e_shoff, n)?;
        let name = section_name(src, shstrtab_offset, &shdr)?;

        if shdr.is_alloc() && shdr.sh_size > 0 {
            let size = shdr.sh_size as usize;
            let executable = shdr.is_executable();
            let data = if executable {
                allocator.alloc_exec(size)?
            } else {
                allocator.alloc_data(size)?
            };
            if shdr.sh_type != elf::SHT_NOBITS {
                let mut buf = vec![0u8; size];
                src.read_at(shdr.sh_offset as u64, &mut buf)?;
                unsafe {
                    std::ptr::copy_nonoverlapping(buf.as_ptr(), data.as_ptr(), size);
                }
            } else {
                unsafe {
                    std::ptr::write_bytes(data.as_ptr(), 0, size);
                }
            }
            if name == ".text" {
                text_base = Some(data);
            }
            sections[n] = Some(SectionRecord {
                sec_idx: n,
                data,
                size,
                executable,
                rel_sec_idx: 0,
            });
        } else if shdr.sh_type == elf::SHT_RELA {
            let target_idx = shdr.sh_info as usize;
            if target_idx >= n {
                return Err(LoaderError::BadRelocationLinkage {
                    rela_idx: n,
                    target_idx,
                });
            }
            if let Some(Some(target)) = sections.get_mut(target_idx) {
                target.rel_sec_idx = n;
            }
            // Else: the relocation targets a section we never loaded
            // (e.g. `.debug_*`); nothing to record, not an error.
        } else if name == ".symtab" {
            symtab_offset = shdr.sh_offset as u64;
            symtab_count = shdr.sh_size as usize / core::mem::size_of::<Elf32Sym>();
        } else if name == ".strtab" {
            // Last `.strtab`-named section wins, matching the reference's
            // behavior exactly (see the dual string-table note in the
            // design notes).
            strtab_offset = shdr.sh_offset as u64;
        }
    }

    if symtab_offset == 0 || strtab_offset == 0 {
        return Err(LoaderError::MissingTables);
    }

    Ok(SectionWalk {
        sections,
        text_base,
        symtab_offset,
        symtab_count,
        strtab_offset,
        shstrtab_offset,
    })
}
