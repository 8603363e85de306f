//! Synthetic ELF32 Xtensa object builder, for assembling minimal
//! relocatable objects in memory without depending on a real toolchain.

use bytemuck::bytes_of;
use xtensa_elfloader::elf::relocation::Elf32Rela;
use xtensa_elfloader::elf::{
    Elf32Ehdr, Elf32Shdr, Elf32Sym, EI_NIDENT, ELF_MAGIC, EM_XTENSA, ET_REL, SHT_NULL, SHT_RELA,
    SHT_STRTAB, SHT_SYMTAB,
};

struct SectionSpec {
    name: &'static str,
    sh_type: u32,
    sh_flags: u32,
    data: Vec<u8>,
    sh_info: u32,
}

struct SymbolSpec {
    name: &'static str,
    st_value: u32,
    st_size: u32,
    st_info: u8,
    st_shndx: u16,
}

/// Builds a minimal ELF32 Xtensa relocatable object byte-for-byte,
/// mirroring the on-disk layout the section loader expects: a header, a
/// section header table, then each section's raw bytes, then the symbol
/// table, the symbol string table, and the section-header string table.
pub struct ElfBuilder {
    sections: Vec<SectionSpec>,
    symbols: Vec<SymbolSpec>,
    include_tables: bool,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            symbols: vec![SymbolSpec {
                name: "",
                st_value: 0,
                st_size: 0,
                st_info: 0,
                st_shndx: 0,
            }],
            include_tables: true,
        }
    }

    /// Omits `.symtab`/`.strtab` from the built object, for exercising the
    /// "missing tables" failure path.
    pub fn without_symbol_tables(mut self) -> Self {
        self.include_tables = false;
        self
    }

    /// Adds a section, returning its 1-based section index (index `0` is
    /// the reserved `SHT_NULL` section every ELF file starts with).
    pub fn add_section(
        &mut self,
        name: &'static str,
        sh_type: u32,
        sh_flags: u32,
        data: Vec<u8>,
    ) -> usize {
        self.sections.push(SectionSpec {
            name,
            sh_type,
            sh_flags,
            data,
            sh_info: 0,
        });
        self.sections.len()
    }

    /// Adds a symbol table entry, returning its symbol table index.
    pub fn add_symbol(
        &mut self,
        name: &'static str,
        st_value: u32,
        st_size: u32,
        st_info: u8,
        st_shndx: u16,
    ) -> usize {
        self.symbols.push(SymbolSpec {
            name,
            st_value,
            st_size,
            st_info,
            st_shndx,
        });
        self.symbols.len() - 1
    }

    /// Adds a `SHT_RELA` section relocating `target_sec_idx`, from
    /// `(r_offset, sym_idx, r_type, r_addend)` tuples.
    pub fn add_rela_section(
        &mut self,
        name: &'static str,
        target_sec_idx: usize,
        relas: &[(u32, u32, u32, i32)],
    ) -> usize {
        let mut data = Vec::new();
        for &(r_offset, sym_idx, r_type, r_addend) in relas {
            let rela = Elf32Rela {
                r_offset,
                r_info: (sym_idx << 8) | r_type,
                r_addend,
            };
            data.extend_from_slice(bytes_of(&rela));
        }
        self.sections.push(SectionSpec {
            name,
            sh_type: SHT_RELA,
            sh_flags: 0,
            data,
            sh_info: target_sec_idx as u32,
        });
        self.sections.len()
    }

    /// Serializes the whole object to bytes.
    pub fn build(self) -> Vec<u8> {
        // String table layout: byte 0 is always the empty string.
        let mut shstrtab = vec![0u8];
        let mut shstrtab_offsets = Vec::new();
        for s in &self.sections {
            shstrtab_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        let symtab_name_off = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".symtab\0");
        let strtab_name_off = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".strtab\0");
        let shstrtab_name_off = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let mut strtab = vec![0u8];
        let mut sym_name_offsets = Vec::new();
        for sym in &self.symbols {
            if sym.name.is_empty() {
                sym_name_offsets.push(0);
                continue;
            }
            sym_name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
        }

        let mut symtab_data = Vec::new();
        for (i, sym) in self.symbols.iter().enumerate() {
            let rec = Elf32Sym {
                st_name: sym_name_offsets[i],
                st_value: sym.st_value,
                st_size: sym.st_size,
                st_info: sym.st_info,
                st_other: 0,
                st_shndx: sym.st_shndx,
            };
            symtab_data.extend_from_slice(bytes_of(&rec));
        }

        // Section order: NULL, user sections, [.symtab, .strtab], .shstrtab.
        let n_user = self.sections.len();
        let table_count = if self.include_tables { 3 } else { 1 };
        let e_shnum = 1 + n_user + table_count;
        let symtab_idx = 1 + n_user;
        let strtab_idx = symtab_idx + 1;
        let shstrtab_idx = if self.include_tables {
            strtab_idx + 1
        } else {
            symtab_idx
        };

        let ehdr_size = core::mem::size_of::<Elf32Ehdr>();
        let shdr_size = core::mem::size_of::<Elf32Shdr>();
        let shoff = ehdr_size as u32;
        let mut data_cursor = shoff + (e_shnum as u32) * shdr_size as u32;

        let mut shdrs = Vec::with_capacity(e_shnum);
        shdrs.push(Elf32Shdr {
            sh_name: 0,
            sh_type: SHT_NULL,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: 0,
            sh_size: 0,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 0,
            sh_entsize: 0,
        });

        let mut section_bytes = Vec::new();
        for (i, s) in self.sections.iter().enumerate() {
            let offset = data_cursor;
            let size = s.data.len() as u32;
            data_cursor += size;
            section_bytes.push(s.data.clone());
            shdrs.push(Elf32Shdr {
                sh_name: shstrtab_offsets[i],
                sh_type: s.sh_type,
                sh_flags: s.sh_flags,
                sh_addr: 0,
                sh_offset: offset,
                sh_size: size,
                sh_link: if s.sh_type == SHT_RELA {
                    symtab_idx as u32
                } else {
                    0
                },
                sh_info: s.sh_info,
                sh_addralign: 4,
                sh_entsize: if s.sh_type == SHT_RELA {
                    core::mem::size_of::<Elf32Rela>() as u32
                } else {
                    0
                },
            });
        }

        if self.include_tables {
            let symtab_offset = data_cursor;
            data_cursor += symtab_data.len() as u32;
            shdrs.push(Elf32Shdr {
                sh_name: symtab_name_off,
                sh_type: SHT_SYMTAB,
                sh_flags: 0,
                sh_addr: 0,
                sh_offset: symtab_offset,
                sh_size: symtab_data.len() as u32,
                sh_link: strtab_idx as u32,
                sh_info: 0,
                sh_addralign: 4,
                sh_entsize: core::mem::size_of::<Elf32Sym>() as u32,
            });

            let strtab_offset = data_cursor;
            data_cursor += strtab.len() as u32;
            shdrs.push(Elf32Shdr {
                sh_name: strtab_name_off,
                sh_type: SHT_STRTAB,
                sh_flags: 0,
                sh_addr: 0,
                sh_offset: strtab_offset,
                sh_size: strtab.len() as u32,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: 1,
                sh_entsize: 0,
            });
        }

        let shstrtab_offset = data_cursor;
        data_cursor += shstrtab.len() as u32;
        shdrs.push(Elf32Shdr {
            sh_name: shstrtab_name_off,
            sh_type: SHT_STRTAB,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: shstrtab_offset,
            sh_size: shstrtab.len() as u32,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        });
        let _ = data_cursor;

        let mut e_ident = [0u8; EI_NIDENT];
        e_ident[..4].copy_from_slice(&ELF_MAGIC);
        e_ident[4] = 1; // ELFCLASS32
        e_ident[5] = 1; // ELFDATA2LSB
        e_ident[6] = 1; // EV_CURRENT

        let ehdr = Elf32Ehdr {
            e_ident,
            e_type: ET_REL,
            e_machine: EM_XTENSA,
            e_version: 1,
            e_entry: 0,
            e_phoff: 0,
            e_shoff: shoff,
            e_flags: 0,
            e_ehsize: ehdr_size as u16,
            e_phentsize: 0,
            e_phnum: 0,
            e_shentsize: shdr_size as u16,
            e_shnum: e_shnum as u16,
            e_shstrndx: shstrtab_idx as u16,
        };

        let mut out = Vec::new();
        out.extend_from_slice(bytes_of(&ehdr));
        for shdr in &shdrs {
            out.extend_from_slice(bytes_of(shdr));
        }
        for bytes in &section_bytes {
            out.extend_from_slice(bytes);
        }
        out.extend_from_slice(&symtab_data);
        out.extend_from_slice(&strtab);
        out.extend_from_slice(&shstrtab);
        out
    }
}
