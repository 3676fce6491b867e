//! The Emitter: pure functions that append one x86-64 instruction sequence
//! to the Code Buffer and return the buffer's new cursor.
//!
//! None of these functions inspect bytes written earlier; emission is
//! strictly append-only (`patch_call` is the one documented exception,
//! and it only ever rewrites a site this module itself emitted).

use super::codebuf::CodeBuffer;
use super::x86_64::{Reg, X86_64Assembler};
use crate::error::MicaError;

/// The register the parameter-stack top pointer lives in, both on entry to
/// and on return from every compiled function and every intrinsic callable
/// from compiled code: `rdi`, the first System V integer-argument register.
pub const STACK_REG: Reg = Reg::Rdi;

/// Scratch register used to materialise call targets and literal values.
/// Caller-saved, never the stack register, never touched across a `call`.
const SCRATCH: Reg = Reg::R11;

/// Emit the function prologue: keeps the native stack 16-byte aligned at
/// the first `call` inside the body. Must appear once, at the very start
/// of every compiled function.
pub fn prologue(buf: &mut CodeBuffer) -> Result<usize, MicaError> {
    let mut asm = X86_64Assembler::new(buf);
    asm.sub_ri32(Reg::Rsp, 8)?;
    Ok(buf.cursor())
}

/// Emit the function epilogue: inverse of `prologue`. Must appear
/// immediately before the final `ret`.
pub fn epilogue(buf: &mut CodeBuffer) -> Result<usize, MicaError> {
    let mut asm = X86_64Assembler::new(buf);
    asm.add_ri32(Reg::Rsp, 8)?;
    Ok(buf.cursor())
}

/// Emit the function's exit sequence: stages the parameter-stack register
/// into `rax` (ordinary System V return-value register) before the actual
/// `ret`. This is the half of the "returned in the same register" contract
/// that lets a compiled function or a native intrinsic share one return
/// path — the callee always hands back its result the normal way, in
/// `rax`; `call` below restores it into `rdi` for the caller's benefit.
pub fn ret(buf: &mut CodeBuffer) -> Result<usize, MicaError> {
    let mut asm = X86_64Assembler::new(buf);
    asm.mov_rr(Reg::Rax, STACK_REG)?;
    asm.ret()?;
    Ok(buf.cursor())
}

/// How a `call` site was encoded; returned so a caller that needs to patch
/// it later (nothing in this crate currently does, but the contract in
/// the specification requires the shape to exist) knows which case applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Direct `call rel32` — `target` was within +/-2GiB of the next instruction.
    DirectRel32,
    /// `mov r11, imm32` (zero-extended) + `call r11` — `target` fit in 32 unsigned bits.
    Imm32Indirect,
    /// `movabs r11, imm64` + `call r11` — the general case. The `mov`'s
    /// immediate can be rewritten in place by `patch_call`.
    Imm64Indirect { imm_offset: usize },
}

/// Emit a call to the absolute address `target`, picking the cheapest
/// encoding that can reach it, plus the fixed `mov rdi, rax` that follows
/// every call regardless of shape. The callee — compiled function or
/// plain-Rust intrinsic alike — hands its result back in `rax` per
/// ordinary System V convention; this instruction is what turns that into
/// "the parameter-stack register holds the result," satisfying the
/// contract at the one place every call site shares. Returns the new
/// cursor and the shape used.
pub fn call(buf: &mut CodeBuffer, target: usize) -> Result<(usize, CallShape), MicaError> {
    // A direct call's displacement is relative to the address of the
    // *next* instruction, i.e. after these 5 bytes.
    let next_instr = buf.address_of(buf.cursor()) + 5;
    let rel = target as i64 - next_instr as i64;

    if rel >= i32::MIN as i64 && rel <= i32::MAX as i64 {
        let mut asm = X86_64Assembler::new(buf);
        asm.call_rel32(rel as i32)?;
        asm.mov_rr(STACK_REG, Reg::Rax)?;
        return Ok((buf.cursor(), CallShape::DirectRel32));
    }

    if target <= u32::MAX as usize {
        let mut asm = X86_64Assembler::new(buf);
        asm.mov_ri32_zx(SCRATCH, target as u32)?;
        asm.call_r(SCRATCH)?;
        asm.mov_rr(STACK_REG, Reg::Rax)?;
        return Ok((buf.cursor(), CallShape::Imm32Indirect));
    }

    let mut asm = X86_64Assembler::new(buf);
    // The immediate starts two bytes into the `mov r11, imm64` encoding
    // (REX prefix + opcode byte).
    let imm_offset = buf.cursor() + 2;
    asm.mov_ri64(SCRATCH, target as i64)?;
    asm.call_r(SCRATCH)?;
    asm.mov_rr(STACK_REG, Reg::Rax)?;
    Ok((buf.cursor(), CallShape::Imm64Indirect { imm_offset }))
}

/// Rewrite a previously emitted `Imm64Indirect` call's target in place.
/// The only shape `call` produces that supports patching, per the
/// specification.
pub fn patch_call(buf: &mut CodeBuffer, shape: CallShape, target: usize) -> Result<(), MicaError> {
    match shape {
        CallShape::Imm64Indirect { imm_offset } => {
            buf.patch(imm_offset, &(target as u64).to_le_bytes())
        }
        _ => Err(MicaError::InternalBug(
            "patch_call called on a non-patchable call shape",
        )),
    }
}

/// Emit code that, at run time, decrements the parameter-stack register by
/// one slot and stores the literal `value` into the new top slot. This is
/// how integer and captured-string-pointer literals become stack pushes.
pub fn integer(buf: &mut CodeBuffer, value: i64) -> Result<usize, MicaError> {
    let mut asm = X86_64Assembler::new(buf);
    asm.sub_ri32(STACK_REG, 8)?;
    // mov_mr only stores a register operand, so the literal is always
    // materialised into the scratch register first, even when it would
    // fit a narrower immediate-to-memory encoding.
    asm.mov_ri64(SCRATCH, value)?;
    asm.mov_mr(STACK_REG, 0, SCRATCH)?;
    Ok(buf.cursor())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue_then_epilogue_then_ret_is_balanced() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let c0 = buf.cursor();
        prologue(&mut buf).unwrap();
        let c1 = buf.cursor();
        epilogue(&mut buf).unwrap();
        let c2 = buf.cursor();
        ret(&mut buf).unwrap();
        let c3 = buf.cursor();
        assert!(c1 > c0);
        assert!(c2 > c1);
        assert!(c3 > c2);
    }

    #[test]
    fn call_to_nearby_address_uses_direct_rel32() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let target = buf.address_of(0) + 4096; // well within +/-2GiB
        let (_, shape) = call(&mut buf, target).unwrap();
        assert_eq!(shape, CallShape::DirectRel32);
    }

    #[test]
    fn call_to_far_64bit_address_is_patchable() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let far_target = 0x7FFF_0000_0000_0000usize;
        let (_, shape) = call(&mut buf, far_target).unwrap();
        match shape {
            CallShape::Imm64Indirect { .. } => {}
            other => panic!("expected Imm64Indirect, got {:?}", other),
        }
        patch_call(&mut buf, shape, far_target + 8).unwrap();
    }

    #[test]
    fn integer_advances_the_cursor() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let before = buf.cursor();
        integer(&mut buf, 42).unwrap();
        assert!(buf.cursor() > before);
    }

    #[test]
    fn ret_stages_rdi_into_rax_before_returning() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        ret(&mut buf).unwrap();
        // mov rax, rdi; ret
        let bytes = unsafe { std::slice::from_raw_parts(buf.base_ptr(), 4) };
        assert_eq!(bytes, &[0x48, 0x89, 0xF8, 0xC3]);
    }

    #[test]
    fn direct_call_restores_rdi_from_rax_afterward() {
        let mut buf = CodeBuffer::with_size(4096).unwrap();
        let target = buf.address_of(0) + 4096;
        call(&mut buf, target).unwrap();
        // call rel32 (5 bytes), then mov rdi, rax
        let bytes = unsafe { std::slice::from_raw_parts(buf.base_ptr(), 8) };
        assert_eq!(&bytes[5..8], &[0x48, 0x89, 0xC7]);
    }
}
