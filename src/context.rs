//! Context lifecycle: the six-operation public surface (`init-and-
//! relocate`, `set-entry`, `run`, `one-shot`, `get-text-base`, `free`) and
//! the `Context` type that owns everything a load produces.

use crate::alloc::{HostAllocator, SectionAllocator};
use crate::elf::relocation::Elf32Rela;
use crate::elf::{self, Elf32Shdr};
use crate::error::{LoaderError, Result};
use crate::reader::{read_record, ByteSource};
use crate::relocation::relocate_one;
use crate::section::{read_symbol, walk_sections, SectionRecord};
use crate::symbol::{resolve, Environment, Resolved};
use log::{debug, error, info, warn};
use std::ptr::NonNull;

/// A loaded, relocated ELF32 Xtensa object, ready to have an entry point
/// selected and invoked.
///
/// Owns the byte source it was built from (re-read during `set_entry` to
/// scan the symbol table) and the environment it was loaded against (to
/// resolve that same entry); the source is never closed early, it simply
/// lives as long as the context does.
///
/// Not safe to use concurrently from multiple threads against the same
/// instance; distinct `Context`s share no mutable state. The loaded
/// module's calls back into host-exported symbols are not guaranteed safe
/// against re-entering the loader on the same `Context` — this is the
/// caller's responsibility to avoid, exactly as for the reference loader.
pub struct Context<'env, S: ByteSource, A: SectionAllocator = HostAllocator> {
    source: S,
    allocator: A,
    env: Environment<'env>,
    sections: Vec<Option<SectionRecord>>,
    text_base: Option<NonNull<u8>>,
    symtab_offset: u64,
    symtab_count: usize,
    strtab_offset: u64,
    shstrtab_offset: u64,
    e_shoff: u64,
    entry: Option<NonNull<u8>>,
}

// SAFETY: a `Context` owns its section buffers and byte source outright
// and holds no thread-local state; moving it between threads is sound. It
// is simply not safe to *share* (hence no `Sync` is claimed here).
unsafe impl<'env, S: ByteSource + Send, A: SectionAllocator + Send> Send for Context<'env, S, A> {}

// Written by hand rather than derived: a derive would add `S: Debug` and
// `A: Debug` bounds that have nothing to do with what's useful to print
// here, and would make innocuous `ByteSource`/`SectionAllocator`
// implementors un-Debug-able contexts for no reason.
impl<'env, S: ByteSource, A: SectionAllocator> std::fmt::Debug for Context<'env, S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("sections", &self.sections.len())
            .field("text_base", &self.text_base)
            .field("entry", &self.entry)
            .finish()
    }
}

impl<'env, S: ByteSource, A: SectionAllocator> Drop for Context<'env, S, A> {
    fn drop(&mut self) {
        for section in self.sections.iter_mut().flatten() {
            unsafe {
                if section.executable {
                    self.allocator.dealloc_exec(section.data, section.size);
                } else {
                    self.allocator.dealloc_data(section.data, section.size);
                }
            }
        }
    }
}

/// Loads, allocates, and relocates every section of the ELF32 object read
/// from `source`, using the default host allocator.
///
/// This is the `init-and-relocate` operation of the library surface.
pub fn init_load_and_relocate<'env, S: ByteSource>(
    source: S,
    env: &Environment<'env>,
) -> Result<Context<'env, S, HostAllocator>> {
    init_load_and_relocate_with_allocator(source, env, HostAllocator)
}

/// Like [`init_load_and_relocate`], but with a caller-supplied allocator.
pub fn init_load_and_relocate_with_allocator<'env, S: ByteSource, A: SectionAllocator>(
    mut source: S,
    env: &Environment<'env>,
    allocator: A,
) -> Result<Context<'env, S, A>> {
    info!("loading ELF32 Xtensa relocatable object");

    let walk = walk_sections(&mut source, &allocator).map_err(|e| {
        error!("section walk failed: {e}");
        e
    })?;
    let header: elf::Elf32Ehdr = read_record(&mut source, 0)?;

    let mut ctx = Context {
        source,
        allocator,
        env: *env,
        sections: walk.sections,
        text_base: walk.text_base,
        symtab_offset: walk.symtab_offset,
        symtab_count: walk.symtab_count,
        strtab_offset: walk.strtab_offset,
        shstrtab_offset: walk.shstrtab_offset,
        e_shoff: header.e_shoff as u64,
        entry: None,
    };

    info!("relocating sections");
    let sec_indices: Vec<usize> = ctx
        .sections
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.as_ref().map(|_| i))
        .collect();
    let mut first_err = None;
    for idx in sec_indices {
        if let Err(e) = relocate_section(&mut ctx, idx) {
            error!("section {idx} failed to relocate: {e}");
            first_err.get_or_insert(e);
        }
    }
    if let Some(err) = first_err {
        error!("relocation failed; tearing down context");
        return Err(err);
    }

    Ok(ctx)
}

fn relocate_section<'env, S: ByteSource, A: SectionAllocator>(
    ctx: &mut Context<'env, S, A>,
    sec_idx: usize,
) -> Result<()> {
    let rel_sec_idx = match &ctx.sections[sec_idx] {
        Some(s) if s.rel_sec_idx != 0 => s.rel_sec_idx,
        _ => return Ok(()),
    };

    let rela_hdr: Elf32Shdr = {
        let offset = ctx.e_shoff + (rel_sec_idx as u64) * core::mem::size_of::<Elf32Shdr>() as u64;
        read_record(&mut ctx.source, offset)?
    };

    let entry_size = core::mem::size_of::<Elf32Rela>() as u64;
    let count = rela_hdr.sh_size as u64 / entry_size;

    let data_base = ctx.sections[sec_idx].as_ref().unwrap().data;
    debug!("  Offset   Sym  Type  relAddr  symAddr  defValue  Name + addend");

    let mut first_err: Option<LoaderError> = None;
    for i in 0..count {
        let rela: Elf32Rela =
            read_record(&mut ctx.source, rela_hdr.sh_offset as u64 + i * entry_size)?;
        let sym_entry = rela.sym();
        let rel_type = rela.r_type();

        let (sym, name) = read_symbol(
            &mut ctx.source,
            ctx.symtab_offset,
            ctx.strtab_offset,
            ctx.shstrtab_offset,
            ctx.e_shoff,
            sym_entry as usize,
        )?;

        let rel_addr = unsafe { data_base.as_ptr().add(rela.r_offset as usize) };
        let resolved = resolve(&ctx.env, &ctx.sections, &sym, &name);
        let sym_addr = resolved.as_sentinel().wrapping_add(rela.r_addend as u32);

        if rel_type == elf::R_XTENSA_NONE || rel_type == elf::R_XTENSA_ASM_EXPAND {
            debug!(
                "  {:08X} {:04X} {:<20} {:08X} {} + {:X}",
                rela.r_offset,
                sym_entry,
                elf::relocation_type_name(rel_type),
                rel_addr as usize,
                name,
                rela.r_addend
            );
            continue;
        }

        if matches!(resolved, Resolved::Undefined) && sym.st_value == 0 {
            error!("relocation - undefined symAddr: {name}");
            first_err.get_or_insert(LoaderError::UndefinedSymbol { name: name.clone() });
            continue;
        }

        match unsafe { relocate_one(rel_addr, rel_type, sym_addr, sym.st_value) } {
            Ok((from, to)) => {
                debug!(
                    "  {:08X} {:04X} {:<20} {:08X} {:08X} {:08X} {:08X}->{:08X} {} + {:X}",
                    rela.r_offset,
                    sym_entry,
                    elf::relocation_type_name(rel_type),
                    rel_addr as usize,
                    sym_addr,
                    sym.st_value,
                    from,
                    to,
                    name,
                    rela.r_addend
                );
            }
            Err(e) => {
                error!("  relocation failed at {:08X}: {e}", rel_addr as usize);
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(cause) => Err(LoaderError::SectionRelocationFailed {
            sec_idx,
            cause: Box::new(cause),
        }),
        None => Ok(()),
    }
}

impl<'env, S: ByteSource, A: SectionAllocator> Context<'env, S, A> {
    /// Scans the symbol table for `name`; on an exact match with a
    /// resolvable address, stores it as the entry point. A match against
    /// an undefined symbol is logged but does not stop the scan (the name
    /// may be re-declared later in the table), matching the reference.
    ///
    /// Resolution consults the same environment the object was loaded
    /// with, mirroring the reference's `findSymAddr(ctx, &sym, name)`.
    ///
    /// This is the `set-entry` operation.
    pub fn set_entry(&mut self, name: &str) -> Result<()> {
        self.entry = None;
        info!("scanning ELF symbols for entry `{name}`");

        for i in 0..self.symtab_count {
            let (sym, sym_name) = read_symbol(
                &mut self.source,
                self.symtab_offset,
                self.strtab_offset,
                self.shstrtab_offset,
                self.e_shoff,
                i,
            )?;
            if sym_name != name {
                continue;
            }
            match resolve(&self.env, &self.sections, &sym, &sym_name) {
                Resolved::Undefined if sym.st_value == 0 => {
                    warn!("  {i:04X} {sym_name:<30} unresolved, continuing scan");
                }
                resolved => {
                    let addr = resolved.as_sentinel();
                    self.entry = NonNull::new(addr as *mut u8);
                    info!("  {i:04X} {sym_name:<30} -> {addr:08X}");
                }
            }
        }

        if self.entry.is_none() {
            return Err(LoaderError::EntryNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Invokes the stored entry point with `arg`, returning its result, or
    /// `0` if no entry has been set.
    ///
    /// The entry's signature is fixed at `(i32) -> i32` by the library
    /// surface; dispatch is a plain indirect call, with no sandboxing of
    /// the callee.
    pub fn run(&self, arg: i32) -> i32 {
        let Some(entry) = self.entry else {
            return 0;
        };
        info!("running...");
        // SAFETY: `entry` was produced by resolving a symbol address
        // through relocations this same context applied; whether that
        // address is actually a valid `(i32) -> i32` entry point is a
        // property of the loaded object, not something this call can
        // verify.
        let func: extern "C" fn(i32) -> i32 =
            unsafe { core::mem::transmute(entry.as_ptr() as *const ()) };
        let result = func(arg);
        info!("result: {result:08X}");
        result
    }

    /// Returns the runtime base address of `.text`, if the object had one.
    ///
    /// This is the `get-text-base` operation.
    pub fn text_base(&self) -> Option<NonNull<u8>> {
        self.text_base
    }

    /// Consumes and tears down the context, freeing every section buffer.
    /// Equivalent to `drop(self)`; kept as an explicit method so callers
    /// have an unambiguous place to end a context's lifetime.
    ///
    /// This is the `free` operation. Safe to call even if `set_entry` was
    /// never called or failed.
    pub fn free(self) {
        drop(self);
    }
}

/// Loads `source`, relocates it, resolves `entry_name`, and runs it with
/// `arg` in one call, tearing the context down afterwards regardless of
/// outcome.
///
/// This is the `one-shot` operation: it returns `-1` on any failure
/// (matching the reference's `int` return convention) rather than a
/// [`Result`], since its signature is fixed by the library surface.
pub fn one_shot<S: ByteSource>(source: S, env: &Environment, entry_name: &str, arg: i32) -> i32 {
    let mut ctx = match init_load_and_relocate(source, env) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("one-shot: load failed: {e}");
            return -1;
        }
    };
    if let Err(e) = ctx.set_entry(entry_name) {
        error!("one-shot: set-entry failed: {e}");
        return -1;
    }
    ctx.run(arg)
}
