//! x86-64 instruction encoding for JIT compilation.
//!
//! This module provides functions for encoding the small, fixed set of
//! x86-64 instruction sequences the Emitter needs, as raw machine code
//! bytes. Uses System V AMD64 ABI register conventions throughout.

use super::codebuf::CodeBuffer;
use crate::error::MicaError;

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,  // Return value, scratch
    Rcx = 1,  // Scratch
    Rdx = 2,  // Scratch
    Rbx = 3,  // Callee-saved
    Rsp = 4,  // Native stack pointer
    Rbp = 5,  // Frame pointer (callee-saved)
    Rsi = 6,  // 2nd argument
    Rdi = 7,  // 1st argument — the parameter-stack top pointer lives here
    R8 = 8,   // Scratch
    R9 = 9,   // Scratch
    R10 = 10, // Scratch
    R11 = 11, // Scratch, used here for call-target materialisation
    R12 = 12, // Callee-saved
    R13 = 13, // Callee-saved
    R14 = 14, // Callee-saved
    R15 = 15, // Callee-saved
}

impl Reg {
    /// Lower 3 bits, used directly in ModR/M and opcode+reg encodings.
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register needs a REX.B/REX.R extension bit.
    pub fn needs_rex_ext(self) -> bool {
        (self as u8) >= 8
    }

    pub fn rex_b(self) -> u8 {
        if self.needs_rex_ext() { 0x01 } else { 0x00 }
    }

    pub fn rex_r(self) -> u8 {
        if self.needs_rex_ext() { 0x04 } else { 0x00 }
    }
}

/// x86-64 assembler: encodes instructions directly into a `CodeBuffer`.
///
/// Every method appends bytes at the buffer's current cursor; none of them
/// look at or rewrite earlier bytes. The buffer itself is responsible for
/// cursor bookkeeping and the hard bound check.
pub struct X86_64Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> X86_64Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    fn rex_w(&mut self, reg: Reg, rm: Reg) -> Result<(), MicaError> {
        self.buf.emit_u8(0x48 | reg.rex_r() | rm.rex_b())
    }

    fn rex_w_single(&mut self, rm: Reg) -> Result<(), MicaError> {
        self.buf.emit_u8(0x48 | rm.rex_b())
    }

    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// MOV r64, r64
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) -> Result<(), MicaError> {
        self.rex_w(src, dst)?;
        self.buf.emit_u8(0x89)?; // MOV r/m64, r64
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()))
    }

    /// MOV r64, imm64 (full 64-bit immediate to register)
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) -> Result<(), MicaError> {
        self.rex_w_single(dst)?;
        self.buf.emit_u8(0xB8 + dst.code())?; // MOV r64, imm64
        self.buf.emit_u64(imm as u64)
    }

    /// MOV r64, imm32 (sign-extended to 64 bits)
    pub fn mov_ri32(&mut self, dst: Reg, imm: i32) -> Result<(), MicaError> {
        self.rex_w_single(dst)?;
        self.buf.emit_u8(0xC7)?; // MOV r/m64, imm32
        self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()))?;
        self.buf.emit_u32(imm as u32)
    }

    /// MOV r32, imm32 (zero-extended into the full 64-bit register) —
    /// distinct from `mov_ri32`, which sign-extends: needed when a value
    /// fits in 32 *unsigned* bits but has its top bit set.
    pub fn mov_ri32_zx(&mut self, dst: Reg, imm: u32) -> Result<(), MicaError> {
        if dst.needs_rex_ext() {
            self.buf.emit_u8(0x41)?; // REX.B, no REX.W: 32-bit dest zero-extends
        }
        self.buf.emit_u8(0xB8 + dst.code())?; // MOV r32, imm32
        self.buf.emit_u32(imm)
    }

    /// MOV [base + disp8], r64 — store to memory, small-displacement form
    /// only (the one shape the Emitter actually needs: storing through the
    /// parameter-stack register right after it has been decremented).
    pub fn mov_mr(&mut self, base: Reg, disp: i8, src: Reg) -> Result<(), MicaError> {
        self.rex_w(src, base)?;
        self.buf.emit_u8(0x89)?; // MOV r/m64, r64
        if base == Reg::Rsp || base == Reg::R12 {
            if disp == 0 {
                self.buf.emit_u8(Self::modrm(0b00, src.code(), 0b100))?;
                self.buf.emit_u8(0x24)?;
            } else {
                self.buf.emit_u8(Self::modrm(0b01, src.code(), 0b100))?;
                self.buf.emit_u8(0x24)?;
                self.buf.emit_u8(disp as u8)?;
            }
        } else if disp == 0 && base != Reg::Rbp && base != Reg::R13 {
            self.buf.emit_u8(Self::modrm(0b00, src.code(), base.code()))?;
        } else {
            self.buf.emit_u8(Self::modrm(0b01, src.code(), base.code()))?;
            self.buf.emit_u8(disp as u8)?;
        }
        Ok(())
    }

    /// ADD r64, imm32 (sign-extended); used for the epilogue's +8.
    pub fn add_ri32(&mut self, dst: Reg, imm: i32) -> Result<(), MicaError> {
        self.rex_w_single(dst)?;
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83)?; // ADD r/m64, imm8
            self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()))?;
            self.buf.emit_u8(imm as u8)
        } else {
            self.buf.emit_u8(0x81)?; // ADD r/m64, imm32
            self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()))?;
            self.buf.emit_u32(imm as u32)
        }
    }

    /// SUB r64, imm32 (sign-extended); used for the prologue's -8 and for
    /// the parameter-stack decrement in `integer`.
    pub fn sub_ri32(&mut self, dst: Reg, imm: i32) -> Result<(), MicaError> {
        self.rex_w_single(dst)?;
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83)?; // SUB r/m64, imm8
            self.buf.emit_u8(Self::modrm(0b11, 5, dst.code()))?;
            self.buf.emit_u8(imm as u8)
        } else {
            self.buf.emit_u8(0x81)?; // SUB r/m64, imm32
            self.buf.emit_u8(Self::modrm(0b11, 5, dst.code()))?;
            self.buf.emit_u32(imm as u32)
        }
    }

    /// CALL rel32 (direct relative call, near)
    pub fn call_rel32(&mut self, offset: i32) -> Result<(), MicaError> {
        self.buf.emit_u8(0xE8)?; // CALL rel32
        self.buf.emit_u32(offset as u32)
    }

    /// CALL r64 (indirect call through register)
    pub fn call_r(&mut self, reg: Reg) -> Result<(), MicaError> {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41)?; // REX.B
        }
        self.buf.emit_u8(0xFF)?; // CALL r/m64
        self.buf.emit_u8(Self::modrm(0b11, 2, reg.code()))
    }

    /// RET
    pub fn ret(&mut self) -> Result<(), MicaError> {
        self.buf.emit_u8(0xC3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_rr_encodes_rex_w() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let mut asm = X86_64Assembler::new(&mut buf);
        asm.mov_rr(Reg::Rax, Reg::Rbx).unwrap();
        assert_eq!(&unsafe { std::slice::from_raw_parts(buf.base_ptr(), 3) }, &[0x48, 0x89, 0xD8]);
    }

    #[test]
    fn mov_ri64_full_width_immediate() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let mut asm = X86_64Assembler::new(&mut buf);
        asm.mov_ri64(Reg::Rax, 0x123456789ABCDEF0u64 as i64).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(buf.base_ptr(), 10) };
        assert_eq!(bytes, &[0x48, 0xB8, 0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn mov_ri32_zx_zero_extends_high_bit_values() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let mut asm = X86_64Assembler::new(&mut buf);
        asm.mov_ri32_zx(Reg::R11, 0xFFFF_FFFF).unwrap();
        // REX.B B8+3 FF FF FF FF — no REX.W, so bits 32-63 are zeroed by the CPU.
        let bytes = unsafe { std::slice::from_raw_parts(buf.base_ptr(), 6) };
        assert_eq!(bytes, &[0x41, 0xBB, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn sub_ri32_small_imm_uses_imm8_form() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let mut asm = X86_64Assembler::new(&mut buf);
        asm.sub_ri32(Reg::Rsp, 8).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(buf.base_ptr(), 4) };
        assert_eq!(bytes, &[0x48, 0x83, 0xEC, 0x08]);
    }

    #[test]
    fn ret_is_single_byte() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let mut asm = X86_64Assembler::new(&mut buf);
        asm.ret().unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(buf.base_ptr(), 1) };
        assert_eq!(bytes, &[0xC3]);
    }

    #[test]
    fn call_r_r12_needs_rex_b() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let mut asm = X86_64Assembler::new(&mut buf);
        asm.call_r(Reg::R12).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(buf.base_ptr(), 3) };
        assert_eq!(bytes, &[0x41, 0xFF, 0xD4]);
    }
}
