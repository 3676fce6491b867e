//! Executable memory management using mmap.
//!
//! This module provides a safe abstraction over the OS-level memory mapping
//! that backs the Code Buffer. Unlike a staging buffer that is later copied
//! into a separate executable mapping, this memory is R+W+X from the moment
//! it is allocated: the reader, emitter, and compiler write directly into it
//! as the process runs, and compiled functions are called out of the same
//! region, possibly while later definitions are still being appended.

use std::ptr::NonNull;

use crate::error::MicaError;

/// Size of a new code buffer mapping. Fixed for the lifetime of the process;
/// there is no reclamation and no growth.
pub const CODE_BUFFER_SIZE: usize = 512 * 1024;

/// The one-byte trap pattern the buffer is pre-filled with.
///
/// `int3` (0xCC): any accidental jump into unemitted bytes traps immediately
/// instead of running into whatever garbage follows.
const TRAP_BYTE: u8 = 0xCC;

/// A page-aligned R+W+X mapping, pre-filled with `int3`.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
}

impl ExecutableMemory {
    /// Allocate a new mapping of at least `size` bytes, rounded up to a
    /// whole number of pages, filled with the trap byte.
    pub fn new(size: usize) -> Result<Self, MicaError> {
        if size == 0 {
            return Err(MicaError::AllocationFailed("zero-size code buffer requested".into()));
        }

        let page_size = Self::page_size();
        let aligned_size = (size + page_size - 1) & !(page_size - 1);
        let ptr = Self::mmap_alloc(aligned_size)?;

        let mem = Self { ptr, size: aligned_size };
        unsafe {
            std::ptr::write_bytes(mem.ptr.as_ptr(), TRAP_BYTE, mem.size);
        }
        Ok(mem)
    }

    fn page_size() -> usize {
        #[cfg(unix)]
        {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }
        #[cfg(not(unix))]
        {
            4096
        }
    }

    #[cfg(unix)]
    fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MicaError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MicaError::AllocationFailed(
                "mmap refused an executable mapping".into(),
            ));
        }

        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| MicaError::AllocationFailed("mmap returned a null pointer".into()))
    }

    #[cfg(not(unix))]
    fn mmap_alloc(_size: usize) -> Result<NonNull<u8>, MicaError> {
        Err(MicaError::AllocationFailed(
            "executable memory is only supported on unix targets".into(),
        ))
    }

    /// Base address of the mapping.
    pub fn base_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapping in bytes (page-rounded).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Overwrite `data` at `offset`. The caller (the Code Buffer) is
    /// responsible for keeping `offset + data.len()` within `size()`.
    ///
    /// # Safety
    /// The caller must ensure no other thread is concurrently executing
    /// code at `offset..offset + data.len()`.
    pub unsafe fn write(&mut self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.size);
        unsafe {
            let dest = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        }
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

// The mapping is only ever touched from the single cooperative thread that
// owns the Code Buffer; Send/Sync are not implemented, matching the
// single-threaded scheduling model in the specification.
