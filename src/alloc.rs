//! Allocator capabilities: the two abstract pools the section loader draws
//! from, "executable-capable" and "data-only."
//!
//! The loader's core depends only on the [`SectionAllocator`] trait; it
//! never assumes a particular mechanism. [`HostAllocator`] is the default,
//! process-hosted implementation: the executable pool is backed by an
//! anonymous `mmap` mapping with `PROT_EXEC` (so relocated code is actually
//! callable), and the data pool is plain heap storage.

use crate::error::{LoaderError, Result};
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// The two allocation capabilities the section loader needs from the host.
///
/// # Safety
///
/// Implementations must return pointers valid for `size` bytes, and must
/// free exactly what they allocated — [`Context`](crate::context::Context)
/// calls `dealloc_exec`/`dealloc_data` with the same `size` it requested at
/// allocation time, never less.
pub unsafe trait SectionAllocator {
    /// Allocates `size` bytes from the executable-capable pool.
    fn alloc_exec(&self, size: usize) -> Result<NonNull<u8>>;

    /// Allocates `size` bytes from the data-only pool.
    fn alloc_data(&self, size: usize) -> Result<NonNull<u8>>;

    /// Frees a buffer previously returned by `alloc_exec`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `alloc_exec(size)` on this same
    /// allocator, and must not be used again afterwards.
    unsafe fn dealloc_exec(&self, ptr: NonNull<u8>, size: usize);

    /// Frees a buffer previously returned by `alloc_data`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `alloc_data(size)` on this same
    /// allocator, and must not be used again afterwards.
    unsafe fn dealloc_data(&self, ptr: NonNull<u8>, size: usize);
}

/// Word alignment every section buffer is allocated at, regardless of pool
/// — relocation patching assumes 4-byte-aligned section bases.
const SECTION_ALIGN: usize = 4;

fn data_layout(size: usize) -> Layout {
    Layout::from_size_align(size.max(1), SECTION_ALIGN).expect("section size overflow")
}

/// The default allocator: `mmap`/`mprotect` for executable memory, the
/// process heap for data memory. Suitable for running a loaded module
/// in-process on a POSIX host.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostAllocator;

unsafe impl SectionAllocator for HostAllocator {
    fn alloc_exec(&self, size: usize) -> Result<NonNull<u8>> {
        let len = size.max(1);
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(LoaderError::Allocation {
                size,
                executable: true,
            });
        }
        // SAFETY: mmap succeeded, so `ptr` is non-null.
        Ok(unsafe { NonNull::new_unchecked(ptr as *mut u8) })
    }

    fn alloc_data(&self, size: usize) -> Result<NonNull<u8>> {
        let layout = data_layout(size);
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).ok_or(LoaderError::Allocation {
            size,
            executable: false,
        })
    }

    unsafe fn dealloc_exec(&self, ptr: NonNull<u8>, size: usize) {
        libc::munmap(ptr.as_ptr() as *mut libc::c_void, size.max(1));
    }

    unsafe fn dealloc_data(&self, ptr: NonNull<u8>, size: usize) {
        dealloc(ptr.as_ptr(), data_layout(size));
    }
}
