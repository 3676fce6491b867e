//! The Code Buffer: a single, process-wide, monotonically advancing region
//! of executable memory that every compiled definition is appended to.
//!
//! Unlike a per-function staging buffer, there is exactly one `CodeBuffer`
//! per process. `DEFUN`/`DEFMACRO`/`DEFVAL` capture `cursor()` before
//! emitting a body; that address becomes the definition's entry point, and
//! later definitions keep appending after it. The cursor never rewinds.

use super::memory::{CODE_BUFFER_SIZE, ExecutableMemory};
use crate::error::MicaError;

/// The JIT's single executable memory region plus its write cursor.
pub struct CodeBuffer {
    memory: ExecutableMemory,
    cursor: usize,
}

impl CodeBuffer {
    /// Allocate a new code buffer of the default size.
    pub fn new() -> Result<Self, MicaError> {
        Self::with_size(CODE_BUFFER_SIZE)
    }

    /// Allocate a new code buffer of exactly `size` bytes (rounded up to a
    /// page). Exposed for tests that want to exercise the overflow path
    /// without allocating the full default size.
    pub fn with_size(size: usize) -> Result<Self, MicaError> {
        Ok(Self { memory: ExecutableMemory::new(size)?, cursor: 0 })
    }

    /// The current write position: the address a definition started here
    /// would be entered at.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Base address of the underlying mapping. `base_ptr() + offset` is an
    /// absolute, callable address for any `offset` that has been emitted.
    pub fn base_ptr(&self) -> *mut u8 {
        self.memory.base_ptr()
    }

    /// Absolute address corresponding to a cursor value returned earlier by
    /// this same buffer.
    pub fn address_of(&self, offset: usize) -> usize {
        self.memory.base_ptr() as usize + offset
    }

    /// Append `bytes` at the cursor and advance it. Fatal if the buffer is
    /// exhausted — the specification treats the buffer as effectively
    /// unbounded for intended programs, so running out is a hard error
    /// rather than a silent wraparound or reallocation.
    pub fn emit(&mut self, bytes: &[u8]) -> Result<(), MicaError> {
        if self.cursor + bytes.len() > self.memory.size() {
            return Err(MicaError::AllocationFailed(
                "code buffer exhausted".into(),
            ));
        }
        unsafe {
            self.memory.write(self.cursor, bytes);
        }
        self.cursor += bytes.len();
        Ok(())
    }

    pub fn emit_u8(&mut self, byte: u8) -> Result<(), MicaError> {
        self.emit(&[byte])
    }

    pub fn emit_u32(&mut self, value: u32) -> Result<(), MicaError> {
        self.emit(&value.to_le_bytes())
    }

    pub fn emit_u64(&mut self, value: u64) -> Result<(), MicaError> {
        self.emit(&value.to_le_bytes())
    }

    /// Overwrite already-emitted bytes at `offset` without moving the
    /// cursor. Used by `patch_call` to rewrite a 64-bit absolute call's
    /// immediate once a later definition's address is known — callers must
    /// only ever touch sites this buffer itself emitted.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> Result<(), MicaError> {
        if offset + bytes.len() > self.cursor {
            return Err(MicaError::InternalBug("patch site beyond the written cursor"));
        }
        unsafe {
            self.memory.write(offset, bytes);
        }
        Ok(())
    }
}
