//! The process-wide engine: owns every shared singleton spec.md §5 names
//! (parameter stack, symbol table, code buffer, reader/readtable, output
//! stream) plus the one `static` pointer host intrinsics and definition
//! forms reach them through.
//!
//! Single-threaded, cooperative, exactly as spec.md §5 describes: no
//! locking, because there is never more than one thread running guest or
//! host code at a time.

use std::io::Write;

use crate::error::Result;
use crate::jit::CodeBuffer;
use crate::reader::Reader;
use crate::stack::ParameterStack;
use crate::symtab::SymbolTable;

/// Every shared singleton the core and its intrinsics reach through.
pub struct Engine {
    pub stack: ParameterStack,
    pub symtab: SymbolTable,
    pub code: CodeBuffer,
    pub reader: Reader,
    pub out: Box<dyn Write>,
}

/// The single process-wide instance, reached by every intrinsic and
/// definition form through `current()`. A raw pointer rather than
/// `thread_local!`/`OnceLock<Mutex<_>>`: spec.md §5 calls for exactly one
/// of these, mutated without locking, for the process's single-threaded
/// lifetime, and that's what a bare `static mut` gives directly.
static mut CURRENT: *mut Engine = std::ptr::null_mut();

/// Serialises `Engine::install` across cargo's multi-threaded test harness,
/// which otherwise races on the single `CURRENT` pointer even though the
/// real runtime installs exactly one engine per (single-threaded) process.
/// Shared across this module's and `intrinsics`'s test modules so tests in
/// either file that call `install()` don't step on each other.
#[cfg(test)]
pub(crate) static INSTALL_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

impl Engine {
    /// Build a fresh engine: empty symbol table, default readtable, a
    /// freshly allocated Code Buffer, and every pre-registered symbol and
    /// intrinsic from spec.md §4.4 wired in. `reader` starts over an empty
    /// stream; `main` swaps in each input file via `Reader::set_input`
    /// before driving the top-level loop.
    pub fn new() -> Result<Self> {
        let mut engine = Self {
            stack: ParameterStack::new(),
            symtab: SymbolTable::new(),
            code: CodeBuffer::new()?,
            reader: Reader::new(Box::new(std::io::empty())),
            out: Box::new(std::io::stdout()),
        };
        crate::intrinsics::register_all(&mut engine);
        Ok(engine)
    }

    /// Install `self` as the process-wide singleton that intrinsics and
    /// definition forms reach through `current()`.
    ///
    /// This is also the point at which `*SYMTAB*`/`*READTAB*`/`*PROGRAM*`
    /// get their real handles: `self` has reached the address it will
    /// occupy for the rest of the process (see the safety note below), so
    /// `rebind_live_handles` can finally take addresses from it that won't
    /// go stale the way taking them inside `Engine::new` would (its local
    /// `engine` binding is moved out by the function's return).
    ///
    /// # Safety
    /// `self` must outlive every call into compiled code or an intrinsic
    /// made after this call, and must never move in memory afterward
    /// (don't call this on a value you're about to move or drop).
    pub unsafe fn install(&mut self) {
        crate::intrinsics::rebind_live_handles(self);
        unsafe {
            CURRENT = self as *mut Engine;
        }
    }
}

impl Engine {
    /// Invoke a symbol table entry's native callable — a compiled
    /// definition, a host intrinsic, or a definition form — directly from
    /// host code: hands it the live parameter stack through
    /// `intrinsics::trampoline::call_compiled` and re-synchronises
    /// `self.stack` from whatever it returns. This is the host-side half
    /// of spec.md §5's calling convention; compiled code's own `call`
    /// sites (`jit::emitter::call`) are the guest-side half.
    pub fn call_native(&mut self, value: usize) -> Result<()> {
        let ptr = self.stack.top_ptr();
        let new_ptr = unsafe { crate::intrinsics::trampoline::call_compiled(value, ptr) };
        unsafe { self.stack.set_top_ptr(new_ptr) };
        Ok(())
    }
}

/// Borrow the installed engine.
///
/// # Safety
/// Must only be called after `Engine::install` has run on this thread,
/// and only while that `Engine` is still alive — spec.md §5's
/// single-threaded, no-locking model means there is no synchronization
/// to enforce this beyond the caller's own discipline.
pub unsafe fn current() -> &'static mut Engine {
    unsafe { CURRENT.as_mut().expect("Engine::install must run before current()") }
}
