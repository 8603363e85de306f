//! The Xtensa relocation engine: computing the target address for one
//! relocation entry and patching the instruction word at its site,
//! including the `R_XTENSA_SLOT0_OP` opcode-dispatch decoder.

use crate::elf;
use crate::error::{LoaderError, Result};
use crate::symbol::UNDEFINED_SENTINEL;
use crate::unaligned;

/// Resolves the reference loader's `symAddr == undefined && st_value == 0`
/// fallback: if `sym_addr` is the sentinel, fall back to `def_addr`
/// (`sym.st_value`), and if that is also zero, the relocation cannot be
/// performed.
fn resolve_fallback(sym_addr: u32, def_addr: u32) -> Result<u32> {
    if sym_addr == UNDEFINED_SENTINEL {
        if def_addr == 0 {
            return Err(LoaderError::UndefinedSymbol {
                name: String::new(),
            });
        }
        Ok(def_addr)
    } else {
        Ok(sym_addr)
    }
}

/// Applies one relocation at `rel_addr`, given the already-addend-applied
/// symbol address `sym_addr` (or the sentinel) and the symbol's own
/// `st_value` as a fallback. Returns the pre- and post-patch words for
/// diagnostics.
///
/// # Safety
///
/// `rel_addr` must point at a valid, writable instruction word within the
/// section being relocated.
pub(crate) unsafe fn relocate_one(
    rel_addr: *mut u8,
    rel_type: u32,
    sym_addr: u32,
    def_addr: u32,
) -> Result<(u32, u32)> {
    match rel_type {
        elf::R_XTENSA_NONE | elf::R_XTENSA_ASM_EXPAND => {
            let word = unaligned::get32(rel_addr);
            Ok((word, word))
        }
        elf::R_XTENSA_32 => {
            let sym_addr = resolve_fallback(sym_addr, def_addr)?;
            let from = unaligned::get32(rel_addr);
            let to = from.wrapping_add(sym_addr);
            unaligned::set32(rel_addr, to);
            Ok((from, to))
        }
        elf::R_XTENSA_SLOT0_OP => {
            let sym_addr = resolve_fallback(sym_addr, def_addr)?;
            apply_slot0_op(rel_addr, sym_addr)
        }
        other => Err(LoaderError::UnknownRelocationType(other)),
    }
}

/// Decodes the instruction word at `rel_addr` and patches the operand
/// field for whichever of L32R / CALLn-J / J / BRI8 / BRI12 / RI6 it
/// matches, per the opcode table. Range checks still write the (possibly
/// truncated) result before reporting failure, matching the reference.
///
/// # Safety
///
/// `rel_addr` must point at a valid, writable instruction word.
unsafe fn apply_slot0_op(rel_addr: *mut u8, sym_addr: u32) -> Result<(u32, u32)> {
    let v = unaligned::get32(rel_addr);
    let from = v;
    let addr = rel_addr as u32;

    // L32R: literal load, target rounded up to the enclosing 4-byte word.
    if v & 0x0000_000f == 0x0000_0001 {
        let base = addr.wrapping_add(3) & !3;
        let delta = sym_addr.wrapping_sub(base) as i32;
        if delta & 0x3 != 0 {
            return Err(LoaderError::RelocationArithmetic {
                kind: "L32R",
                rel_addr: rel_addr as usize,
            });
        }
        let delta = delta >> 2;
        let bytes = delta.to_le_bytes();
        unaligned::set8(rel_addr.add(1), bytes[0]);
        unaligned::set8(rel_addr.add(2), bytes[1]);
        return Ok((from, unaligned::get32(rel_addr)));
    }

    // CALLn / J (call form): 4-byte-aligned target, 18-bit field shifted by 6.
    if v & 0x0000_000f == 0x0000_0005 {
        let base = addr.wrapping_add(4) & !3;
        let delta = sym_addr.wrapping_sub(base) as i32;
        if delta & 0x3 != 0 {
            return Err(LoaderError::RelocationArithmetic {
                kind: "CALL",
                rel_addr: rel_addr as usize,
            });
        }
        let mut delta = (delta >> 2) << 6;
        delta |= unaligned::get8(rel_addr) as i32;
        let bytes = delta.to_le_bytes();
        unaligned::set8(rel_addr, bytes[0]);
        unaligned::set8(rel_addr.add(1), bytes[1]);
        unaligned::set8(rel_addr.add(2), bytes[2]);
        return Ok((from, unaligned::get32(rel_addr)));
    }

    // J (jump form): unaligned PC-relative target.
    if v & 0x0000_003f == 0x0000_0006 {
        let delta = sym_addr.wrapping_sub(addr.wrapping_add(4)) as i32;
        let mut delta = delta << 6;
        delta |= unaligned::get8(rel_addr) as i32;
        let bytes = delta.to_le_bytes();
        unaligned::set8(rel_addr, bytes[0]);
        unaligned::set8(rel_addr.add(1), bytes[1]);
        unaligned::set8(rel_addr.add(2), bytes[2]);
        return Ok((from, unaligned::get32(rel_addr)));
    }

    // BRI8: 8-bit displacement, byte 2.
    if v & 0x0000_000f == 0x0000_0007
        || v & 0x0000_003f == 0x0000_0026
        || (v & 0x0000_003f == 0x0000_0036 && v & 0x0000_00ff != 0x0000_0036)
    {
        let delta = sym_addr.wrapping_sub(addr.wrapping_add(4)) as i32;
        unaligned::set8(rel_addr.add(2), delta.to_le_bytes()[0]);
        let to = unaligned::get32(rel_addr);
        if delta < -(1 << 7) || delta >= (1 << 7) {
            return Err(LoaderError::RelocationRange {
                kind: "BRI8",
                rel_addr: rel_addr as usize,
            });
        }
        return Ok((from, to));
    }

    // BRI12: 12-bit displacement spanning bytes 1-2. Only the low two bytes
    // of the merged value are ever written back, so only those two original
    // bytes need to be read (not a full word, which would reach one byte
    // past the instruction word this site is already assumed to own).
    if v & 0x0000_003f == 0x0000_0016 {
        let delta0 = sym_addr.wrapping_sub(addr.wrapping_add(4)) as i32;
        let mut delta = delta0 << 4;
        delta |= unaligned::get8(rel_addr.add(1)) as i32;
        delta |= (unaligned::get8(rel_addr.add(2)) as i32) << 8;
        let bytes = delta.to_le_bytes();
        unaligned::set8(rel_addr.add(1), bytes[0]);
        unaligned::set8(rel_addr.add(2), bytes[1]);
        let to = unaligned::get32(rel_addr);
        let delta_check = sym_addr.wrapping_sub(addr.wrapping_add(4)) as i32;
        if delta_check < -(1 << 11) || delta_check >= (1 << 11) {
            return Err(LoaderError::RelocationRange {
                kind: "BRI12",
                rel_addr: rel_addr as usize,
            });
        }
        return Ok((from, to));
    }

    // RI6 (narrow): 6-bit displacement split across bytes 0-1. As with
    // BRI12, only the low byte of each merged value is ever written back.
    if v & 0x0000_008f == 0x0000_008c {
        let delta = sym_addr.wrapping_sub(addr.wrapping_add(4)) as i32;
        let mut d2 = delta & 0x30;
        let mut d1 = (delta << 4) & 0xf0;
        d2 |= unaligned::get8(rel_addr) as i32;
        d1 |= unaligned::get8(rel_addr.add(1)) as i32;
        unaligned::set8(rel_addr, d2.to_le_bytes()[0]);
        unaligned::set8(rel_addr.add(1), d1.to_le_bytes()[0]);
        let to = unaligned::get32(rel_addr);
        if !(0..=0x111111).contains(&delta) {
            return Err(LoaderError::RelocationRange {
                kind: "RI6",
                rel_addr: rel_addr as usize,
            });
        }
        return Ok((from, to));
    }

    Err(LoaderError::UnknownOpcode(v))
}
