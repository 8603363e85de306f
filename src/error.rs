//! Error taxonomy for the loader.
//!
//! Every fallible operation in this crate returns [`Result`], and every
//! variant below is logged once, at the point it is constructed, via the
//! `error` level of the [`log`] facade.

use thiserror::Error;

/// The crate-wide result alias.
pub type Result<T> = core::result::Result<T, LoaderError>;

/// An error produced while loading or relocating an ELF32 Xtensa object.
///
/// All variants are terminal for the current load attempt: there is no
/// retry path, and a `Context` that failed to come up is always torn down
/// before the error is returned to the caller.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The first four bytes of the file did not match the ELF magic
    /// `{0x7F, 'E', 'L', 'F'}`.
    #[error("bad ELF identification")]
    BadIdentification,

    /// A read against the byte source failed at the given offset.
    #[error("I/O failure reading {len} byte(s) at offset {offset:#x}")]
    Io {
        /// Offset the read was attempted at.
        offset: u64,
        /// Number of bytes requested.
        len: usize,
    },

    /// Either `.symtab` or `.strtab` was never seen during the section walk.
    #[error("missing .symtab or .strtab section")]
    MissingTables,

    /// A `SHT_RELA` section linked to a section at or after its own index.
    #[error("rela section {rela_idx} links to invalid or forward section {target_idx}")]
    BadRelocationLinkage {
        /// Index of the offending `SHT_RELA` section.
        rela_idx: usize,
        /// The (invalid) target index it named via `sh_info`.
        target_idx: usize,
    },

    /// The executable or data allocator returned null.
    #[error("allocation of {size} byte(s) failed (executable = {executable})")]
    Allocation {
        /// Requested size in bytes.
        size: usize,
        /// Whether the request was for the executable-capable pool.
        executable: bool,
    },

    /// A relocation referenced a symbol the resolver could not find and
    /// whose `st_value` was zero.
    #[error("undefined symbol `{name}`")]
    UndefinedSymbol {
        /// The unresolved symbol's name.
        name: String,
    },

    /// An alignment or range constraint was violated while encoding a
    /// `R_XTENSA_SLOT0_OP` operand.
    #[error("relocation arithmetic error ({kind}) at {rel_addr:#x}")]
    RelocationArithmetic {
        /// Which instruction format failed (`"L32R"`, `"CALL"`, ...).
        kind: &'static str,
        /// The patch-site address.
        rel_addr: usize,
    },

    /// A displacement computed for a `R_XTENSA_SLOT0_OP` operand was out of
    /// the encodable range. The truncated bytes are still written, matching
    /// the reference loader, but the section is marked failed regardless.
    #[error("relocation displacement out of range ({kind}) at {rel_addr:#x}")]
    RelocationRange {
        /// Which instruction format failed (`"BRI8"`, `"BRI12"`, `"RI6"`).
        kind: &'static str,
        /// The patch-site address.
        rel_addr: usize,
    },

    /// The instruction word at a `R_XTENSA_SLOT0_OP` site matched none of
    /// the recognized opcode patterns.
    #[error("unknown opcode {0:#010x} in R_XTENSA_SLOT0_OP")]
    UnknownOpcode(u32),

    /// A relocation entry named a type this engine does not handle.
    #[error("unknown relocation type {0}")]
    UnknownRelocationType(u32),

    /// At least one relocation within a section could not be applied. The
    /// section's bytes may still have been partially patched before this
    /// was raised, matching the reference loader's "patch, then report"
    /// behavior.
    #[error("relocation failed in section {sec_idx}: {cause}")]
    SectionRelocationFailed {
        /// Index of the section whose relocations failed.
        sec_idx: usize,
        /// The first underlying failure encountered while relocating it.
        #[source]
        cause: Box<LoaderError>,
    },

    /// `set-entry` scanned the whole symbol table without a name match.
    #[error("entry symbol `{0}` not found")]
    EntryNotFound(String),
}
