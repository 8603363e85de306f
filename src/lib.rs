//! Runtime loader and relocator for ELF32 relocatable object files targeting
//! the Xtensa processor family.
//!
//! The library surface is six operations: load-and-relocate an object
//! ([`init_load_and_relocate`] / [`init_load_and_relocate_with_allocator`]),
//! pick an entry point ([`Context::set_entry`]), invoke it
//! ([`Context::run`]), do all three in one call ([`one_shot`]), read back
//! the loaded `.text` base ([`Context::text_base`]), and tear everything
//! down ([`Context::free`], or simply dropping the [`Context`]).
//!
//! ```no_run
//! use xtensa_elfloader::{Environment, SymbolExport, init_load_and_relocate};
//! use std::fs::File;
//!
//! let exports = [SymbolExport::new("putchar", 0x4000_1000)];
//! let env = Environment::new(&exports);
//! let file = File::open("module.o")?;
//! let mut ctx = init_load_and_relocate(file, &env)?;
//! ctx.set_entry("main")?;
//! let result = ctx.run(0);
//! # Ok::<(), xtensa_elfloader::LoaderError>(())
//! ```

mod alloc;
mod context;
pub mod elf;
mod error;
mod reader;
mod relocation;
mod section;
mod symbol;
mod unaligned;

pub use alloc::{HostAllocator, SectionAllocator};
pub use context::{init_load_and_relocate, init_load_and_relocate_with_allocator, one_shot, Context};
pub use error::{LoaderError, Result};
pub use reader::{ByteSource, SliceSource};
pub use section::SectionRecord;
pub use symbol::{Environment, Resolved, SymbolExport};
