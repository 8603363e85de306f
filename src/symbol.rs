//! Symbol resolution: unifying host-exported symbols, section-defined
//! symbols, and the undefined case.

use crate::elf::Elf32Sym;
use crate::section::SectionRecord;

/// One (name, host-address) pair supplied by the embedder.
#[derive(Clone, Copy, Debug)]
pub struct SymbolExport<'a> {
    /// The symbol's name, as it appears in the object being loaded.
    pub name: &'a str,
    /// The symbol's address in the host's address space.
    pub address: u32,
}

impl<'a> SymbolExport<'a> {
    /// Convenience constructor.
    pub fn new(name: &'a str, address: u32) -> Self {
        Self { name, address }
    }
}

/// An immutable, ordered set of host-exported symbols. Lookup is linear by
/// name — environments are expected to hold tens of entries, not
/// thousands, so this is not worth a hash map.
#[derive(Clone, Copy, Debug, Default)]
pub struct Environment<'a> {
    exported: &'a [SymbolExport<'a>],
}

impl<'a> Environment<'a> {
    /// Wraps a slice of exported symbols as an environment.
    pub fn new(exported: &'a [SymbolExport<'a>]) -> Self {
        Self { exported }
    }

    /// Looks up `name`, returning its host address on an exact match.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.exported
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.address)
    }
}

/// The sentinel the reference loader uses in place of this enum; kept
/// around only for the one place the original semantics require comparing
/// against it directly (see [`resolve`]'s doc comment).
pub(crate) const UNDEFINED_SENTINEL: u32 = 0xFFFF_FFFF;

/// The outcome of resolving a symbol, as an explicit two-case value rather
/// than the raw `0xFFFFFFFF` sentinel the reference uses — this is the one
/// place this crate deliberately diverges from the reference's own data
/// representation, to avoid accidental arithmetic on an unresolved address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolved {
    /// The symbol resolved to this runtime address.
    Address(u32),
    /// The symbol could not be resolved against the environment or the
    /// loaded section list.
    Undefined,
}

impl Resolved {
    /// Reconstructs the reference loader's raw sentinel representation.
    pub(crate) fn as_sentinel(self) -> u32 {
        match self {
            Resolved::Address(addr) => addr,
            Resolved::Undefined => UNDEFINED_SENTINEL,
        }
    }
}

/// Resolves `sym`/`name` by consulting, in order: the environment, then the
/// loaded section list (for section-relative symbols), else reports
/// undefined.
pub(crate) fn resolve(
    env: &Environment,
    sections: &[Option<SectionRecord>],
    sym: &Elf32Sym,
    name: &str,
) -> Resolved {
    if let Some(address) = env.lookup(name) {
        return Resolved::Address(address);
    }
    if let Some(Some(section)) = sections.get(sym.st_shndx as usize) {
        return Resolved::Address((section.data.as_ptr() as u32).wrapping_add(sym.st_value));
    }
    Resolved::Undefined
}
