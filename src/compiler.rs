//! The Compiler/Evaluator: glues Reader output to Emitter output, and
//! hosts the two dispatch modes spec.md §4.5 describes (`evaluate` for
//! immediate semantics, `compile` for deferred code generation). The
//! `DEFUN`/`DEFMACRO`/`DEFVAL` definition protocol itself lives in
//! `intrinsics::run_definition`, since the forms are host intrinsics
//! invoked through the ordinary calling convention, not a third dispatch
//! mode here.

use crate::engine::Engine;
use crate::error::{MicaError, Result};
use crate::jit::emitter;
use crate::reader::ReadObject;
use crate::symtab::Kind;

/// Leak `s`'s bytes as a NUL-terminated buffer and return its address.
/// This is the "owning pointer" a `String` read-object becomes, both
/// under `evaluate` and under `compile` (spec.md §4.5); leaking for the
/// process lifetime trivially satisfies "backing storage must outlive
/// the Code Buffer" (spec.md §3) without a reference-counted arena this
/// single-run, never-reclaiming process has no other use for.
fn capture_string(s: String) -> i64 {
    let mut bytes = s.into_bytes();
    bytes.push(0);
    let leaked: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    leaked.as_ptr() as i64
}

/// Immediate semantics (spec.md §4.5 `Evaluate`).
pub fn evaluate(engine: &mut Engine, obj: ReadObject) -> Result<()> {
    match obj {
        ReadObject::Symbol(name) => {
            let (kind, value) = lookup(engine, &name)?;
            match kind {
                Kind::Function | Kind::Macro => engine.call_native(value),
                Kind::Value => engine.stack.push(value as i64),
            }
        }
        ReadObject::Integer(v) => engine.stack.push(v),
        ReadObject::String(s) => engine.stack.push(capture_string(s)),
        ReadObject::Quote(_) | ReadObject::Cons(_, _) => {
            Err(MicaError::Unimplemented("evaluating a quote/cons read-object"))
        }
    }
}

/// Deferred semantics (spec.md §4.5 `Compile`). Returns the Code Buffer
/// cursor after the emission — or, for a `macro` symbol, after whatever
/// code the macro emitted while running at compile time.
pub fn compile(engine: &mut Engine, obj: ReadObject) -> Result<usize> {
    match obj {
        ReadObject::Symbol(name) => {
            let (kind, value) = lookup(engine, &name)?;
            match kind {
                Kind::Function => {
                    let (cursor, _shape) = emitter::call(&mut engine.code, value)?;
                    Ok(cursor)
                }
                // Macros run now, in the host, with the live parameter
                // stack — they may re-enter the reader and emit further
                // code directly (spec.md §4.5).
                Kind::Macro => {
                    engine.call_native(value)?;
                    Ok(engine.code.cursor())
                }
                Kind::Value => emitter::integer(&mut engine.code, value as i64),
            }
        }
        ReadObject::Integer(v) => emitter::integer(&mut engine.code, v),
        ReadObject::String(s) => emitter::integer(&mut engine.code, capture_string(s)),
        ReadObject::Quote(_) | ReadObject::Cons(_, _) => {
            Err(MicaError::Unimplemented("compiling a quote/cons read-object"))
        }
    }
}

/// Look up `name`, copying out its `(kind, value)` so the borrow of
/// `engine.symtab` ends before the caller needs `engine` mutably again.
fn lookup(engine: &Engine, name: &str) -> Result<(Kind, usize)> {
    engine
        .symtab
        .lookup(name)
        .map(|e| (e.kind, e.value))
        .ok_or_else(|| MicaError::UndefinedName(name.to_string()))
}

/// The top-level loop (spec.md §2): read one datum from the engine's
/// active input, evaluate it, repeat until end-of-file.
pub fn run_top_level(engine: &mut Engine) -> Result<()> {
    while let Some(obj) = engine.reader.read()? {
        evaluate(engine, obj)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::CodeBuffer;
    use crate::reader::Reader;
    use crate::stack::ParameterStack;
    use crate::symtab::SymbolTable;

    fn bare_engine() -> Engine {
        Engine {
            stack: ParameterStack::new(),
            symtab: SymbolTable::new(),
            code: CodeBuffer::new().unwrap(),
            reader: Reader::new(Box::new(std::io::empty())),
            out: Box::new(Vec::<u8>::new()),
        }
    }

    #[test]
    fn evaluating_an_integer_pushes_it() {
        let mut engine = bare_engine();
        evaluate(&mut engine, ReadObject::Integer(42)).unwrap();
        assert_eq!(engine.stack.pop().unwrap(), 42);
    }

    #[test]
    fn evaluating_a_value_symbol_pushes_its_pointer() {
        let mut engine = bare_engine();
        engine.symtab.add("TEN", 10, Kind::Value);
        evaluate(&mut engine, ReadObject::Symbol("TEN".into())).unwrap();
        assert_eq!(engine.stack.pop().unwrap(), 10);
    }

    #[test]
    fn evaluating_an_undefined_symbol_is_an_error() {
        let mut engine = bare_engine();
        assert!(matches!(
            evaluate(&mut engine, ReadObject::Symbol("NOPE".into())),
            Err(MicaError::UndefinedName(name)) if name == "NOPE"
        ));
    }

    #[test]
    fn evaluating_a_string_pushes_a_nul_terminated_pointer() {
        let mut engine = bare_engine();
        evaluate(&mut engine, ReadObject::String("hi".into())).unwrap();
        let ptr = engine.stack.pop().unwrap() as *const u8;
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 3) };
        assert_eq!(bytes, b"hi\0");
    }

    #[test]
    fn compiling_an_integer_advances_the_cursor() {
        let mut engine = bare_engine();
        let before = engine.code.cursor();
        compile(&mut engine, ReadObject::Integer(7)).unwrap();
        assert!(engine.code.cursor() > before);
    }

    #[test]
    fn compiling_a_function_symbol_emits_a_call() {
        let mut engine = bare_engine();
        engine.symtab.add("NOOP", 0x1000, Kind::Function);
        let before = engine.code.cursor();
        compile(&mut engine, ReadObject::Symbol("NOOP".into())).unwrap();
        assert!(engine.code.cursor() > before);
    }

    #[test]
    fn compiling_a_quote_is_unimplemented() {
        let mut engine = bare_engine();
        let obj = ReadObject::Quote(Box::new(ReadObject::Integer(1)));
        assert!(matches!(compile(&mut engine, obj), Err(MicaError::Unimplemented(_))));
    }
}
