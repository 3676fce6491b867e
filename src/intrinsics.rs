//! The concrete intrinsic library: arithmetic, I/O, stack shuffling,
//! pointer load/store/alloc, and the `DEFUN`/`DEFMACRO`/`DEFVAL`
//! definition forms — the "external collaborators" spec.md §1 describes
//! only by the calling-convention contract they must honour (§5).
//!
//! Every intrinsic here has the signature `NativeFn`: it takes the
//! parameter-stack top pointer and returns the new one, exactly like a
//! compiled definition's entry point. Internally each one re-synchronises
//! `Engine::stack` from the incoming pointer, does its work through the
//! ordinary `ParameterStack` API, and hands back `stack.top_ptr()` — the
//! one place that dance happens is `enter`, below.

use crate::compiler;
use crate::engine::{self, Engine};
use crate::error::{MicaError, Result};
use crate::jit::emitter;
use crate::reader::ReadObject;
use crate::symtab::Kind;

/// The calling convention spec.md §5 describes, expressed as a Rust fn
/// pointer type: takes and returns the parameter-stack top. Ordinary
/// System V ABI (argument in `rdi`, return in `rax`) already matches this
/// signature exactly; `jit::emitter::call`'s trailing `mov rdi, rax`
/// (guest side) and `Engine::call_native` (host side) are what make a
/// plain Rust function honour "returned in the same register" without
/// any hand-written assembly shim.
pub type NativeFn = extern "C" fn(*mut i64) -> *mut i64;

/// The one place in this crate that turns a raw address into a callable
/// function pointer and invokes it with the parameter-stack register
/// (spec.md §5, §9 "isolate it to a narrow, explicitly unsafe boundary").
pub mod trampoline {
    use super::NativeFn;

    /// Call the native code at `target`, passing `stack_top` as the
    /// parameter-stack register and returning whatever it leaves there.
    ///
    /// # Safety
    /// `target` must be the address of code honouring spec.md §5's
    /// calling convention exactly: a compiled definition's entry point
    /// (captured from `CodeBuffer::address_of`) or one of this module's
    /// intrinsics/definition forms. `stack_top` must point within the
    /// live parameter stack.
    pub unsafe fn call_compiled(target: usize, stack_top: *mut i64) -> *mut i64 {
        let f: NativeFn = unsafe { std::mem::transmute(target) };
        f(stack_top)
    }
}

/// Print a fatal error and terminate, per spec.md §7: every error kind is
/// fatal, there is no recovery path through an intrinsic's fixed
/// `extern "C"` signature.
fn fatal(e: MicaError) -> ! {
    eprintln!("mica: {}", e);
    std::process::exit(1);
}

/// Shared entry sequence for every intrinsic and definition form below:
/// resynchronise `Engine::stack` from the incoming register value, run
/// `body` against the engine through the ordinary safe API, and hand back
/// the resulting top pointer. Any error is fatal (spec.md §7).
fn enter(sp: *mut i64, body: impl FnOnce(&mut Engine) -> Result<()>) -> *mut i64 {
    let engine = unsafe { engine::current() };
    unsafe { engine.stack.set_top_ptr(sp) };
    if let Err(e) = body(engine) {
        fatal(e);
    }
    engine.stack.top_ptr()
}

extern "C" fn dup(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let top = e.stack.peek()?;
        e.stack.push(top)
    })
}

extern "C" fn swap(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let a = e.stack.pop()?;
        let b = e.stack.pop()?;
        e.stack.push(a)?;
        e.stack.push(b)
    })
}

extern "C" fn mul(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let a = e.stack.pop()?;
        let b = e.stack.pop()?;
        e.stack.push(a.wrapping_mul(b))
    })
}

extern "C" fn add(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let a = e.stack.pop()?;
        let b = e.stack.pop()?;
        e.stack.push(a.wrapping_add(b))
    })
}

/// Pop an address, push the `i64` stored there.
extern "C" fn pget(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let addr = e.stack.pop()?;
        let value = unsafe { *(addr as *const i64) };
        e.stack.push(value)
    })
}

/// Pop an address then a value, store the value at the address.
extern "C" fn pset(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let addr = e.stack.pop()?;
        let value = e.stack.pop()?;
        unsafe { *(addr as *mut i64) = value };
        Ok(())
    })
}

/// Pop a byte count, push a pointer to that many freshly allocated,
/// zeroed, process-lifetime bytes.
extern "C" fn alloc_bytes(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let size = e.stack.pop()?;
        if size < 0 {
            return Err(MicaError::AllocationFailed("negative size".into()));
        }
        let buf = vec![0u8; size as usize].into_boxed_slice();
        let ptr = Box::leak(buf).as_ptr() as i64;
        e.stack.push(ptr)
    })
}

extern "C" fn printi(sp: *mut i64) -> *mut i64 {
    use std::io::Write;
    enter(sp, |e| {
        let v = e.stack.pop()?;
        writeln!(e.out, "{}", v).map_err(|_| MicaError::InternalBug("write to *OUT* failed"))
    })
}

/// Pop a pointer to a NUL-terminated byte buffer (the representation
/// `compiler::capture_string` gives every `String` read-object) and print
/// it followed by a newline.
extern "C" fn prints(sp: *mut i64) -> *mut i64 {
    use std::io::Write;
    enter(sp, |e| {
        let ptr = e.stack.pop()? as *const u8;
        let mut len = 0usize;
        while unsafe { *ptr.add(len) } != 0 {
            len += 1;
        }
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        e.out
            .write_all(bytes)
            .and_then(|_| e.out.write_all(b"\n"))
            .map_err(|_| MicaError::InternalBug("write to *OUT* failed"))
    })
}

/// Read one top-level datum from `*IN*` and evaluate it, exposing the
/// reader/evaluator pipeline as a single guest-callable step (spec.md
/// §4.4 registers `READ` as a "reader / evaluator entry point" without
/// spelling out its stack effect further; this is the literal reading —
/// a bootstrapping primitive a macro body could use to consume and act
/// on a further datum, rather than a bare lexer call with nowhere to put
/// its result).
extern "C" fn read_then_evaluate(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| match e.reader.read()? {
        Some(obj) => compiler::evaluate(e, obj),
        None => Ok(()),
    })
}

/// Pop a native address and invoke it with the remaining stack — a
/// guest-level "funcall" built directly on the same trampoline compiled
/// `call` sites use.
extern "C" fn eval_indirect(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| {
        let target = e.stack.pop()?;
        e.call_native(target as usize)
    })
}

/// State the `DEFUN`/`DEFMACRO`/`DEFVAL` protocol shares; only the kind
/// registered for the name and whether the body is compiled or evaluated
/// differ (spec.md §4.5).
#[derive(Clone, Copy)]
enum DefMode {
    Function,
    Macro,
    Value,
}

/// The full `Idle -> AwaitingName -> AwaitingBody -> Emitted` state
/// machine (spec.md §4.5), parameterised over which of the three
/// definition forms is running.
fn run_definition(e: &mut Engine, mode: DefMode) -> Result<()> {
    let name = match e.reader.read()? {
        Some(ReadObject::Symbol(s)) => s,
        _ => return Err(MicaError::BadDefName),
    };

    // Captured before the body is emitted so DEFUN/DEFMACRO can recurse.
    let entry_addr = e.code.address_of(e.code.cursor());
    if let DefMode::Function | DefMode::Macro = mode {
        let kind = if matches!(mode, DefMode::Function) { Kind::Function } else { Kind::Macro };
        e.symtab.add(name.clone(), entry_addr, kind);
    }

    emitter::prologue(&mut e.code)?;

    loop {
        match e.reader.read()? {
            None => return Err(MicaError::UnterminatedDefinition),
            Some(ReadObject::Symbol(s)) if s == "DONE" => break,
            Some(obj) => match mode {
                DefMode::Function | DefMode::Macro => {
                    compiler::compile(e, obj)?;
                }
                DefMode::Value => {
                    compiler::evaluate(e, obj)?;
                }
            },
        }
    }

    if let DefMode::Value = mode {
        let value = e.stack.pop()?;
        e.symtab.add(name, value as usize, Kind::Value);
    }

    emitter::epilogue(&mut e.code)?;
    emitter::ret(&mut e.code)?;
    Ok(())
}

extern "C" fn defun(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| run_definition(e, DefMode::Function))
}

extern "C" fn defmacro(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| run_definition(e, DefMode::Macro))
}

extern "C" fn defval(sp: *mut i64) -> *mut i64 {
    enter(sp, |e| run_definition(e, DefMode::Value))
}

/// Wire every pre-registered symbol spec.md §4.4's table lists into a
/// freshly constructed engine's symbol table.
///
/// `*SYMTAB*`/`*READTAB*`/`*PROGRAM*` are **not** resolved here: `register_all`
/// runs inside `Engine::new`, while `engine` still lives in that function's
/// local frame and is about to be moved out by its `Ok(engine)` return, so
/// any address taken from `engine`'s fields here would point into a stack
/// frame that no longer exists by the time a guest program could dereference
/// it. Those three handles are placeholders until `rebind_live_handles`
/// shadows them with the engine's final, move-stable address, once
/// `Engine::install` has pinned it there.
pub fn register_all(engine: &mut Engine) {
    use Kind::*;

    let t = &mut engine.symtab;
    t.add("*SYMTAB*", 0, Value);
    t.add("*READTAB*", 0, Value);
    // *IN*/*OUT* are opaque per spec.md §4.4; intrinsics reach the live
    // reader/output stream through the engine singleton directly rather
    // than by dereferencing these handles, so they carry no usable
    // address today (documented in DESIGN.md).
    t.add("*IN*", 0, Value);
    t.add("*OUT*", 0, Value);
    t.add("*PROGRAM*", 0, Value);
    t.add("PTRSIZE", std::mem::size_of::<i64>(), Value);

    t.add("READ", read_then_evaluate as usize, Function);
    t.add("EVAL", eval_indirect as usize, Function);
    t.add("DUP", dup as usize, Function);
    t.add("SWAP", swap as usize, Function);
    t.add("*", mul as usize, Function);
    t.add("+", add as usize, Function);
    t.add("PGET", pget as usize, Function);
    t.add("PSET", pset as usize, Function);
    t.add("ALLOC", alloc_bytes as usize, Function);
    t.add("PRINTI", printi as usize, Function);
    t.add("PRINTS", prints as usize, Function);
    t.add("DEFUN", defun as usize, Function);
    t.add("DEFMACRO", defmacro as usize, Function);
    t.add("DEFVAL", defval as usize, Function);
}

/// Shadow `*SYMTAB*`/`*READTAB*`/`*PROGRAM*` with handles computed from
/// `engine`'s final address. Must only be called once `engine` has reached
/// the location it will occupy for the rest of the process — `Engine::install`
/// calls this right before publishing `self` as the process-wide singleton,
/// which is also the point spec.md §5 requires `self` to stop moving.
///
/// `*PROGRAM*` is the Code Buffer's mmap base address (`CodeBuffer::base_ptr`),
/// not the address of the `CodeBuffer` struct itself — the struct can still
/// move with `Engine` if some future caller relocates it, but the mmap
/// region it owns never does, so the mmap base is the more durable handle
/// and matches spec.md §4.4's "the write-cursor handle" wording (the cursor
/// is an offset into that same region).
pub(crate) fn rebind_live_handles(engine: &mut Engine) {
    use Kind::*;

    let symtab_handle = &engine.symtab as *const _ as usize;
    let readtable_handle = engine.reader.readtable() as *const _ as usize;
    let program_handle = engine.code.base_ptr() as usize;

    let t = &mut engine.symtab;
    t.add("*SYMTAB*", symtab_handle, Value);
    t.add("*READTAB*", readtable_handle, Value);
    t.add("*PROGRAM*", program_handle, Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::INSTALL_LOCK;
    use crate::stack::ParameterStack;

    fn fresh_engine() -> Engine {
        let mut engine = Engine {
            stack: ParameterStack::new(),
            symtab: crate::symtab::SymbolTable::new(),
            code: crate::jit::CodeBuffer::new().unwrap(),
            reader: crate::reader::Reader::new(Box::new(std::io::empty())),
            out: Box::new(Vec::<u8>::new()),
        };
        register_all(&mut engine);
        engine
    }

    #[test]
    fn dup_duplicates_the_top_value() {
        let _guard = INSTALL_LOCK.lock().unwrap();
        let mut engine = fresh_engine();
        unsafe { engine.install() };
        engine.stack.push(9).unwrap();
        let sp = engine.stack.top_ptr();
        let new_sp = dup(sp);
        unsafe { engine.stack.set_top_ptr(new_sp) };
        assert_eq!(engine.stack.pop().unwrap(), 9);
        assert_eq!(engine.stack.pop().unwrap(), 9);
    }

    #[test]
    fn swap_exchanges_the_top_two_values() {
        let _guard = INSTALL_LOCK.lock().unwrap();
        let mut engine = fresh_engine();
        unsafe { engine.install() };
        engine.stack.push(1).unwrap();
        engine.stack.push(2).unwrap();
        let sp = engine.stack.top_ptr();
        let new_sp = swap(sp);
        unsafe { engine.stack.set_top_ptr(new_sp) };
        assert_eq!(engine.stack.pop().unwrap(), 1);
        assert_eq!(engine.stack.pop().unwrap(), 2);
    }

    #[test]
    fn add_pops_two_and_pushes_their_sum() {
        let _guard = INSTALL_LOCK.lock().unwrap();
        let mut engine = fresh_engine();
        unsafe { engine.install() };
        engine.stack.push(3).unwrap();
        engine.stack.push(4).unwrap();
        let sp = engine.stack.top_ptr();
        let new_sp = add(sp);
        unsafe { engine.stack.set_top_ptr(new_sp) };
        assert_eq!(engine.stack.pop().unwrap(), 7);
    }

    #[test]
    fn pset_then_pget_round_trips_a_value() {
        let _guard = INSTALL_LOCK.lock().unwrap();
        let mut engine = fresh_engine();
        unsafe { engine.install() };
        let mut cell: i64 = 0;
        let addr = &mut cell as *mut i64 as i64;

        // pset pops the address first, then the value: push value, then
        // address, so the address ends up on top.
        engine.stack.push(99).unwrap();
        engine.stack.push(addr).unwrap();
        let sp = engine.stack.top_ptr();
        let new_sp = pset(sp); // pops addr, then 99 -> cell = 99
        unsafe { engine.stack.set_top_ptr(new_sp) };

        engine.stack.push(addr).unwrap();
        let sp = engine.stack.top_ptr();
        let new_sp = pget(sp); // pops addr, pushes cell's value
        unsafe { engine.stack.set_top_ptr(new_sp) };
        assert_eq!(engine.stack.pop().unwrap(), 99);
        assert_eq!(cell, 99);
    }

    #[test]
    fn alloc_returns_a_writable_region_of_the_requested_size() {
        let _guard = INSTALL_LOCK.lock().unwrap();
        let mut engine = fresh_engine();
        unsafe { engine.install() };
        engine.stack.push(64).unwrap();
        let sp = engine.stack.top_ptr();
        let new_sp = alloc_bytes(sp);
        unsafe { engine.stack.set_top_ptr(new_sp) };
        let ptr = engine.stack.pop().unwrap() as *mut u8;
        unsafe {
            *ptr = 0xAB;
            assert_eq!(*ptr, 0xAB);
        }
    }

    #[test]
    fn defmacro_registers_a_callable_with_empty_body() {
        let _guard = INSTALL_LOCK.lock().unwrap();
        let mut engine = fresh_engine();
        unsafe { engine.install() };
        engine.reader.set_input(Box::new(std::io::Cursor::new(b"NOOP DONE".to_vec())));
        run_definition(&mut engine, DefMode::Macro).unwrap();

        let entry = engine.symtab.lookup("NOOP").unwrap();
        assert_eq!(entry.kind, Kind::Macro);
        let target = entry.value;

        // An empty macro body compiles to prologue+epilogue+ret only, so
        // calling it directly leaves the parameter stack untouched.
        engine.stack.push(7).unwrap();
        let sp = engine.stack.top_ptr();
        let new_sp = unsafe { trampoline::call_compiled(target, sp) };
        unsafe { engine.stack.set_top_ptr(new_sp) };
        assert_eq!(engine.stack.pop().unwrap(), 7);
    }
}
