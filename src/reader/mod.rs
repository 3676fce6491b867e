//! The Reader: lexes source text into tagged read-objects, one per call,
//! driven by the active readtable (spec.md §4.3).

use std::io::Read;

use crate::error::{MicaError, Result};
use crate::readtable::{Readtable, prop};

/// A tagged value produced by the reader from source text, before
/// compilation. `Quote`/`Cons` carry payloads but are never produced by
/// this reader's default dispatch — they are reserved (spec.md §3, §9).
#[derive(Debug, Clone, PartialEq)]
pub enum ReadObject {
    Symbol(String),
    Integer(i64),
    String(String),
    Quote(Box<ReadObject>),
    Cons(Box<ReadObject>, Box<ReadObject>),
}

/// Lexes bytes from an input stream into `ReadObject`s, one datum per
/// `read()` call.
pub struct Reader {
    input: Box<dyn Read>,
    /// The one byte of pushback the specification allows. Re-entering the
    /// reader on the same stream (as `DEFUN` does) is only safe once this
    /// is flushed, which every subordinate reader below does synchronously
    /// before returning.
    pending: Option<u8>,
    readtable: Readtable,
}

impl Reader {
    pub fn new(input: Box<dyn Read>) -> Self {
        Self { input, pending: None, readtable: Readtable::default_table() }
    }

    pub fn readtable(&self) -> &Readtable {
        &self.readtable
    }

    pub fn readtable_mut(&mut self) -> &mut Readtable {
        &mut self.readtable
    }

    /// Swap in a new input stream, flushing any pushback. Used to move the
    /// reader from one source file to the next within a single run while
    /// keeping the same active readtable (spec.md §6: persistent state is
    /// none *across runs*, but nothing resets it mid-run between files).
    pub fn set_input(&mut self, input: Box<dyn Read>) {
        self.input = input;
        self.pending = None;
    }

    /// Read the next raw byte off the stream, consulting pushback first.
    /// `Ok(None)` is end-of-file.
    fn next_byte(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.pending.take() {
            return Ok(Some(b));
        }
        let mut byte = [0u8; 1];
        match self.input.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(_) => Ok(None),
        }
    }

    fn pushback(&mut self, byte: u8) {
        debug_assert!(self.pending.is_none(), "at most one byte of pushback");
        self.pending = Some(byte);
    }

    /// Read one datum. `Ok(None)` means end-of-file was reached before any
    /// datum byte was seen — a legal, non-fatal end (spec.md §4.3 step 2).
    pub fn read(&mut self) -> Result<Option<ReadObject>> {
        loop {
            let Some(raw) = self.next_byte()? else {
                return Ok(None);
            };
            let c = raw.to_ascii_uppercase();
            let props = self.readtable.properties(c);

            if props & prop::ERROR != 0 {
                return Err(MicaError::IllegalCharacter(c));
            }
            if props & prop::WHITESPACE != 0 {
                continue;
            }
            if props & prop::MACRO != 0 {
                let handler = self
                    .readtable
                    .dispatch(c)
                    .ok_or(MicaError::InternalBug("MACRO property set with no dispatch"))?;
                return handler(self, c).map(Some);
            }
            if props & prop::NUMBER_INIT != 0 {
                return self.read_integer(c).map(Some);
            }
            if props & prop::CONSTITUENT != 0 {
                return self.read_symbol(c).map(Some);
            }
            if props & prop::NUMBER != 0 {
                return Err(MicaError::NumberContinuationOutsideNumber(c));
            }
            return Err(MicaError::NoProperties(c));
        }
    }

    /// Accumulate uppercased bytes while they carry `CONSTITUENT`; the
    /// first non-constituent byte is pushed back.
    fn read_symbol(&mut self, first: u8) -> Result<ReadObject> {
        let mut name = String::new();
        name.push(first as char);
        loop {
            let Some(raw) = self.next_byte()? else { break };
            let c = raw.to_ascii_uppercase();
            if self.readtable.has(c, prop::CONSTITUENT) {
                name.push(c as char);
            } else {
                self.pushback(raw);
                break;
            }
        }
        Ok(ReadObject::Symbol(name))
    }

    /// `first` is `+`, `-`, or a digit. Accumulate further `NUMBER` bytes;
    /// push back the first non-matching byte. Converts right-to-left with
    /// ascending factors of ten starting at one (spec.md §4.3, §9 — not the
    /// historically buggy factors-starting-at-ten variant).
    fn read_integer(&mut self, first: u8) -> Result<ReadObject> {
        let mut sign: i64 = 1;
        let mut digits = Vec::new();

        match first {
            b'+' => sign = 1,
            b'-' => sign = -1,
            d => digits.push(d - b'0'),
        }

        loop {
            let Some(raw) = self.next_byte()? else { break };
            let c = raw.to_ascii_uppercase();
            if self.readtable.has(c, prop::NUMBER) {
                digits.push(c - b'0');
            } else {
                self.pushback(raw);
                break;
            }
        }

        let mut value: i64 = 0;
        for d in &digits {
            value = value * 10 + *d as i64;
        }
        Ok(ReadObject::Integer(sign * value))
    }

    /// Consume bytes until the next `"`, with no escape processing.
    fn read_string(&mut self) -> Result<ReadObject> {
        let mut s = String::new();
        loop {
            match self.next_byte()? {
                None => return Err(MicaError::UnterminatedString),
                Some(b'"') => return Ok(ReadObject::String(s)),
                Some(b) => s.push(b as char),
            }
        }
    }
}

/// Macro-dispatch handler for `"`: reads a string literal.
pub fn read_string_macro(reader: &mut Reader, _classifier: u8) -> Result<ReadObject> {
    reader.read_string()
}

/// Macro-dispatch handler for `[`: reserved.
pub fn read_quote_macro(_reader: &mut Reader, _classifier: u8) -> Result<ReadObject> {
    Err(MicaError::Unimplemented("quote reader"))
}

/// Macro-dispatch handler for `(`: reserved.
pub fn read_list_macro(_reader: &mut Reader, _classifier: u8) -> Result<ReadObject> {
    Err(MicaError::Unimplemented("list reader"))
}
