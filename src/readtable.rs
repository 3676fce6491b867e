//! The readtable: per-character classification plus per-character macro
//! dispatch used by the Reader (spec.md §3/§4.3).

/// Bitset of per-character properties. Plain `u8` flags rather than a
/// `bitflags` dependency — the teacher crate's core modules don't pull in
/// `bitflags` either, and five flags fit comfortably in hand-rolled consts.
pub mod prop {
    pub const CONSTITUENT: u8 = 1 << 0;
    pub const NUMBER_INIT: u8 = 1 << 1;
    pub const NUMBER: u8 = 1 << 2;
    pub const MACRO: u8 = 1 << 3;
    pub const WHITESPACE: u8 = 1 << 4;
    pub const ERROR: u8 = 1 << 5;
}

/// A reader handler invoked when a `MACRO`-classified byte is seen at a
/// datum start. Takes the classifier byte itself (already consumed from
/// the stream) and the reader driving it, and returns a completed datum.
pub type MacroHandler = fn(&mut crate::reader::Reader, u8) -> crate::error::Result<crate::reader::ReadObject>;

/// Per-character classification and macro dispatch, indexed 0..256 by byte
/// value. One mutable active copy per process; the default is immutable
/// and cheap to clone into a fresh active copy.
#[derive(Clone)]
pub struct Readtable {
    properties: [u8; 256],
    macro_dispatch: [Option<MacroHandler>; 256],
}

impl Readtable {
    /// An empty readtable: every byte has no properties (so it is a fatal
    /// `NoProperties` error to read). Used only as a base for `default()`.
    fn empty() -> Self {
        Self { properties: [0; 256], macro_dispatch: [None; 256] }
    }

    pub fn properties(&self, c: u8) -> u8 {
        self.properties[c as usize]
    }

    pub fn has(&self, c: u8, flag: u8) -> bool {
        self.properties[c as usize] & flag != 0
    }

    pub fn dispatch(&self, c: u8) -> Option<MacroHandler> {
        self.macro_dispatch[c as usize]
    }

    /// Replace the macro handler for `c`, setting its `MACRO` property.
    /// Readtables are user-replaceable at the active copy (spec.md §3).
    pub fn set_macro(&mut self, c: u8, handler: MacroHandler) {
        self.properties[c as usize] |= prop::MACRO;
        self.macro_dispatch[c as usize] = Some(handler);
    }

    pub fn set_properties(&mut self, c: u8, flags: u8) {
        self.properties[c as usize] = flags;
    }

    /// The mandatory default readtable from spec.md §4.3.
    pub fn default_table() -> Self {
        let mut t = Self::empty();

        for c in b'a'..=b'z' {
            t.set_properties(c, prop::CONSTITUENT);
        }
        for c in b'A'..=b'Z' {
            t.set_properties(c, prop::CONSTITUENT);
        }
        for &c in b"_!@#$%^&*:,.<>=/?;" {
            t.set_properties(c, prop::CONSTITUENT);
        }
        for c in b'0'..=b'9' {
            t.set_properties(c, prop::NUMBER_INIT | prop::NUMBER | prop::CONSTITUENT);
        }
        t.set_properties(b'-', prop::NUMBER_INIT | prop::CONSTITUENT);
        t.set_properties(b'+', prop::NUMBER_INIT | prop::CONSTITUENT);

        for &c in b" \t\r\n" {
            t.set_properties(c, prop::WHITESPACE);
        }

        t.set_macro(b'"', crate::reader::read_string_macro);
        t.set_macro(b'[', crate::reader::read_quote_macro);
        t.set_macro(b'(', crate::reader::read_list_macro);

        t.set_properties(b']', prop::ERROR);
        t.set_properties(b')', prop::ERROR);

        t
    }
}

impl Default for Readtable {
    fn default() -> Self {
        Self::default_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_are_constituent() {
        let t = Readtable::default_table();
        assert!(t.has(b'A', prop::CONSTITUENT));
        assert!(t.has(b'z', prop::CONSTITUENT));
    }

    #[test]
    fn digits_carry_all_three_numeric_flags() {
        let t = Readtable::default_table();
        for c in b'0'..=b'9' {
            assert!(t.has(c, prop::NUMBER_INIT));
            assert!(t.has(c, prop::NUMBER));
            assert!(t.has(c, prop::CONSTITUENT));
        }
    }

    #[test]
    fn sign_characters_are_number_init_and_constituent_only() {
        let t = Readtable::default_table();
        for c in [b'+', b'-'] {
            assert!(t.has(c, prop::NUMBER_INIT));
            assert!(t.has(c, prop::CONSTITUENT));
            assert!(!t.has(c, prop::NUMBER));
        }
    }

    #[test]
    fn macro_characters_have_non_null_dispatch() {
        let t = Readtable::default_table();
        for c in [b'"', b'[', b'('] {
            assert!(t.has(c, prop::MACRO));
            assert!(t.dispatch(c).is_some());
        }
    }

    #[test]
    fn closing_brackets_are_error() {
        let t = Readtable::default_table();
        assert!(t.has(b']', prop::ERROR));
        assert!(t.has(b')', prop::ERROR));
    }

    #[test]
    fn whitespace_bytes_are_classified() {
        let t = Readtable::default_table();
        for c in [b' ', b'\t', b'\r', b'\n'] {
            assert!(t.has(c, prop::WHITESPACE));
        }
    }

    #[test]
    fn byte_with_no_assigned_property_is_blank() {
        let t = Readtable::default_table();
        assert_eq!(t.properties(0x00), 0);
    }
}
