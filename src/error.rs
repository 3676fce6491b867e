//! Fatal error kinds for the reader, JIT emitter, and compiler/evaluator.
//!
//! Every error in this crate is fatal: there is no recovery path once the
//! code buffer may have been partially written, so a `MicaError` is always
//! printed to stderr and the process exits with status 1 (see `main`).

use std::fmt;

/// A fatal error raised anywhere in the reader / JIT / compiler triad.
#[derive(Debug)]
pub enum MicaError {
    /// A byte with the `ERROR` readtable property was seen at a datum start.
    IllegalCharacter(u8),
    /// A byte has no property bits set in the active readtable.
    NoProperties(u8),
    /// A `NUMBER` byte was seen outside of an in-progress number.
    NumberContinuationOutsideNumber(u8),
    /// End of file was reached before a closing `"`.
    UnterminatedString,
    /// End of file was reached inside a `DEFUN`/`DEFMACRO`/`DEFVAL` body.
    UnterminatedDefinition,
    /// A symbol had no entry in the symbol table.
    UndefinedName(String),
    /// `DEFUN`/`DEFMACRO`/`DEFVAL` was followed by something other than a symbol.
    BadDefName,
    /// The platform refused to provide the requested memory mapping/protection.
    AllocationFailed(String),
    /// A reserved/stubbed reader or compiler path was exercised (quote, list).
    Unimplemented(&'static str),
    /// An invariant internal to this implementation was violated.
    InternalBug(&'static str),
    /// A CLI-level file could not be opened. Not one of spec.md §7's core
    /// reader/JIT/compiler error kinds — an ambient addition for the
    /// surface `main` sits behind, still fatal the same way.
    Io(String),
}

impl fmt::Display for MicaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MicaError::IllegalCharacter(c) => {
                write!(f, "illegal character '{}' (0x{:02X})", *c as char, c)
            }
            MicaError::NoProperties(c) => {
                write!(f, "character '{}' (0x{:02X}) has no readtable properties", *c as char, c)
            }
            MicaError::NumberContinuationOutsideNumber(c) => write!(
                f,
                "number continuation character '{}' (0x{:02X}) outside a number",
                *c as char, c
            ),
            MicaError::UnterminatedString => write!(f, "unterminated string literal"),
            MicaError::UnterminatedDefinition => {
                write!(f, "unterminated definition: end of file before DONE")
            }
            MicaError::UndefinedName(name) => write!(f, "undefined name: {}", name),
            MicaError::BadDefName => write!(f, "expected a symbol naming the definition"),
            MicaError::AllocationFailed(msg) => write!(f, "allocation failed: {}", msg),
            MicaError::Unimplemented(what) => write!(f, "unimplemented: {}", what),
            MicaError::InternalBug(what) => write!(f, "internal bug: {}", what),
            MicaError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for MicaError {}

pub type Result<T> = std::result::Result<T, MicaError>;
