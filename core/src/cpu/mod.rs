//! The instruction interpreter (§4.D): fetch-decode-dispatch loop, flag
//! computation, stack discipline, and the minimal Linux syscall handler.

pub mod cpuid;
pub mod flags;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::decode;
use crate::error::{EmuError, EmuResult};
use crate::fetcher::InstructionFetcher;
use crate::instruction::{Instruction, Opcode, Operand, Size};
use crate::memory::Memory;
use crate::registers::{Flag, Gpr, GprView, RegisterFile, Width};

pub use cpuid::CpuidProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Halted,
}

/// Fetch-decode-dispatch interpreter (§2.D). Owns the register file;
/// memory is threaded through each call rather than owned, so the loader
/// and the CPU can share one `Memory` via `ExecutionContext`.
pub struct Cpu {
    pub regs: RegisterFile,
    state: CpuState,
    cpuid_profile: CpuidProfile,
    check_instructions: bool,
    stack_bottom: u64,
    stack_top: u64,
}

impl Cpu {
    pub fn new(cpuid_profile: CpuidProfile, check_instructions: bool) -> Self {
        Cpu {
            regs: RegisterFile::new(),
            state: CpuState::Halted,
            cpuid_profile,
            check_instructions,
            stack_bottom: 0,
            stack_top: u64::MAX,
        }
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    /// Transitions to `Running`; the only state the interpreter loop runs
    /// from.
    pub fn turn_on(&mut self) {
        self.state = CpuState::Running;
    }

    /// Narrows the `[bottom, top)` range `PUSH`/`POP` are checked against
    /// (§4.E step 3, §7). Unset, the CPU behaves as if the stack were
    /// unbounded — useful for unit tests exercising arithmetic in
    /// isolation.
    pub fn set_stack_bounds(&mut self, bottom: u64, top: u64) {
        self.stack_bottom = bottom;
        self.stack_top = top;
    }

    /// Runs until `Halted`. Equivalent to `run_with_cancel` with a cancel
    /// flag that is never set.
    pub fn execute(&mut self, memory: &mut Memory) -> EmuResult<()> {
        self.run_with_cancel(memory, &AtomicBool::new(false))
    }

    /// Runs a subroutine at `target` to completion by pushing a sentinel
    /// return address and running until `RIP` reaches it again (the loader's
    /// way of invoking `.init_array`/`.init`/`.fini_array`/`.fini` entries
    /// as ordinary called-and-returned-from functions, per §4.E steps 5-6).
    /// Temporarily turns the CPU on if it was not already running, and
    /// restores the prior state afterward.
    pub fn call_subroutine(&mut self, memory: &mut Memory, target: u64) -> EmuResult<()> {
        const SENTINEL: u64 = u64::MAX;
        let was_running = self.state == CpuState::Running;
        if !was_running {
            self.turn_on();
        }
        self.push(memory, SENTINEL)?;
        self.regs.set_rip(target);
        let result = self.run_until(memory, SENTINEL);
        if !was_running {
            self.state = CpuState::Halted;
        }
        result
    }

    fn run_until(&mut self, memory: &mut Memory, until_rip: u64) -> EmuResult<()> {
        while self.state == CpuState::Running && self.regs.rip() != until_rip {
            let instr = {
                let mut fetcher = InstructionFetcher::new(&mut self.regs, memory);
                decode::decode_one(&mut fetcher)?
            };
            if self.check_instructions {
                check_instruction(&instr)?;
            }
            self.execute_one(memory, instr)?;
        }
        Ok(())
    }

    /// As `execute`, but checked between instructions against `cancel`; on
    /// cancellation the CPU halts cleanly and `Cancelled` is returned
    /// (§5's optional host cancellation hook).
    pub fn run_with_cancel(&mut self, memory: &mut Memory, cancel: &AtomicBool) -> EmuResult<()> {
        while self.state == CpuState::Running {
            if cancel.load(Ordering::Relaxed) {
                self.state = CpuState::Halted;
                return Err(EmuError::Cancelled);
            }
            let instr = {
                let mut fetcher = InstructionFetcher::new(&mut self.regs, memory);
                decode::decode_one(&mut fetcher)?
            };
            if self.check_instructions {
                check_instruction(&instr)?;
            }
            self.execute_one(memory, instr)?;
        }
        Ok(())
    }

    /// Executes one pre-decoded instruction without touching `RIP` beyond
    /// what the instruction's own semantics dictate (§4.D).
    pub fn execute_one(&mut self, memory: &mut Memory, instr: Instruction) -> EmuResult<()> {
        assert_eq!(
            self.state,
            CpuState::Running,
            "execute_one called on a Halted CPU"
        );
        self.dispatch(memory, instr)
    }

    fn flag_bits(&self) -> (bool, bool, bool, bool, bool) {
        (
            self.regs.get_flag(Flag::Cf),
            self.regs.get_flag(Flag::Zf),
            self.regs.get_flag(Flag::Sf),
            self.regs.get_flag(Flag::Of),
            self.regs.get_flag(Flag::Pf),
        )
    }

    fn read_operand(&mut self, memory: &mut Memory, operand: Operand) -> EmuResult<u64> {
        match operand {
            Operand::Imm(v) => Ok(v as u64),
            Operand::Reg(view) => Ok(self.regs.get(view)),
            Operand::SReg(seg) => Ok(self.regs.get_segment(seg) as u64),
            Operand::Mem(ind) => {
                let addr = ind.effective_address(&self.regs);
                match ind.pointer_size {
                    Size::Byte => memory.read8(addr).map(|v| v as u64),
                    Size::Word => memory.read_le_u16(addr).map(|v| v as u64),
                    Size::Dword => memory.read_le_u32(addr).map(|v| v as u64),
                    Size::Qword => memory.read_le_u64(addr),
                }
            }
        }
    }

    fn write_operand(&mut self, memory: &mut Memory, operand: Operand, value: u64) -> EmuResult<()> {
        match operand {
            Operand::Reg(view) => {
                self.regs.set(view, value);
                Ok(())
            }
            Operand::SReg(seg) => {
                self.regs.set_segment(seg, value as u16);
                Ok(())
            }
            Operand::Mem(ind) => {
                let addr = ind.effective_address(&self.regs);
                match ind.pointer_size {
                    Size::Byte => memory.write8(addr, value as u8),
                    Size::Word => memory.write_le_u16(addr, value as u16),
                    Size::Dword => memory.write_le_u32(addr, value as u32),
                    Size::Qword => memory.write_le_u64(addr, value),
                }
            }
            Operand::Imm(_) => {
                Err(EmuError::InvalidInstruction("cannot write to an immediate operand".to_string()))
            }
        }
    }

    /// `ADD`/`SUB`'s shared result-plus-flags path (§9's design note):
    /// computes at `size`, sets CF/OF/ZF/SF/PF, and returns the masked
    /// result for the caller to write back (or discard, for `CMP`).
    fn apply_add(&mut self, size: Size, a: u64, b: u64) -> u64 {
        let mask = size.to_width().mask();
        let result = a.wrapping_add(b) & mask;
        let cf = flags::will_carry_add(a, b, size);
        let of = flags::will_overflow_add(a, b, result, size);
        self.set_arith_flags(size, result, cf, of);
        result
    }

    fn apply_sub(&mut self, size: Size, a: u64, b: u64) -> u64 {
        let mask = size.to_width().mask();
        let result = a.wrapping_sub(b) & mask;
        let cf = flags::will_carry_sub(a, b, size);
        let of = flags::will_overflow_sub(a, b, result, size);
        self.set_arith_flags(size, result, cf, of);
        result
    }

    fn set_arith_flags(&mut self, size: Size, result: u64, cf: bool, of: bool) {
        self.regs.set_flag(Flag::Cf, cf);
        self.regs.set_flag(Flag::Of, of);
        self.regs.set_flag(Flag::Zf, flags::zero_flag(result, size));
        self.regs.set_flag(Flag::Sf, flags::sign_flag(result, size));
        self.regs.set_flag(Flag::Pf, flags::parity_flag(result));
    }

    fn apply_logic(&mut self, size: Size, raw: u64) -> u64 {
        let result = raw & size.to_width().mask();
        self.regs.set_flag(Flag::Cf, false);
        self.regs.set_flag(Flag::Of, false);
        self.regs.set_flag(Flag::Zf, flags::zero_flag(result, size));
        self.regs.set_flag(Flag::Sf, flags::sign_flag(result, size));
        self.regs.set_flag(Flag::Pf, flags::parity_flag(result));
        result
    }

    fn apply_shift(&mut self, size: Size, raw: u64) -> u64 {
        let result = raw & size.to_width().mask();
        self.regs.set_flag(Flag::Zf, flags::zero_flag(result, size));
        self.regs.set_flag(Flag::Sf, flags::sign_flag(result, size));
        self.regs.set_flag(Flag::Pf, flags::parity_flag(result));
        result
    }

    fn push(&mut self, memory: &mut Memory, value: u64) -> EmuResult<()> {
        let new_rsp = self.regs.get64(Gpr::Rsp).wrapping_sub(8);
        if new_rsp < self.stack_bottom {
            return Err(EmuError::StackOverflow);
        }
        memory.write_le_u64(new_rsp, value)?;
        self.regs.set64(Gpr::Rsp, new_rsp);
        Ok(())
    }

    fn pop(&mut self, memory: &mut Memory) -> EmuResult<u64> {
        let rsp = self.regs.get64(Gpr::Rsp);
        if rsp.wrapping_add(8) > self.stack_top {
            return Err(EmuError::StackUnderflow);
        }
        let value = memory.read_le_u64(rsp)?;
        self.regs.set64(Gpr::Rsp, rsp.wrapping_add(8));
        Ok(value)
    }

    fn stos_step(&mut self, memory: &mut Memory, ptr_size: Size) -> EmuResult<()> {
        let rdi = self.regs.get64(Gpr::Rdi);
        let value = self.regs.get(GprView::new(Gpr::Rax, ptr_size.to_width()));
        match ptr_size {
            Size::Byte => memory.write8(rdi, value as u8)?,
            Size::Word => memory.write_le_u16(rdi, value as u16)?,
            Size::Dword => memory.write_le_u32(rdi, value as u32)?,
            Size::Qword => memory.write_le_u64(rdi, value)?,
        }
        let step = ptr_size.bytes() as u64;
        let df = self.regs.get_flag(Flag::Df);
        let new_rdi = if df { rdi.wrapping_sub(step) } else { rdi.wrapping_add(step) };
        self.regs.set64(Gpr::Rdi, new_rdi);
        Ok(())
    }

    fn dispatch(&mut self, memory: &mut Memory, instr: Instruction) -> EmuResult<()> {
        match instr.opcode {
            Opcode::Add => {
                let dst = instr.dst().expect("ADD requires a destination");
                let src = instr.src().expect("ADD requires a source");
                let size = dst.size();
                let a = self.read_operand(memory, dst)?;
                let b = self.read_operand(memory, src)?;
                let result = self.apply_add(size, a, b);
                self.write_operand(memory, dst, result)?;
            }
            Opcode::Sub => {
                let dst = instr.dst().expect("SUB requires a destination");
                let src = instr.src().expect("SUB requires a source");
                let size = dst.size();
                let a = self.read_operand(memory, dst)?;
                let b = self.read_operand(memory, src)?;
                let result = self.apply_sub(size, a, b);
                self.write_operand(memory, dst, result)?;
            }
            Opcode::Xor => {
                let dst = instr.dst().expect("XOR requires a destination");
                let src = instr.src().expect("XOR requires a source");
                let size = dst.size();
                let a = self.read_operand(memory, dst)?;
                let b = self.read_operand(memory, src)?;
                let result = self.apply_logic(size, a ^ b);
                self.write_operand(memory, dst, result)?;
            }
            Opcode::And => {
                let dst = instr.dst().expect("AND requires a destination");
                let src = instr.src().expect("AND requires a source");
                let size = dst.size();
                let a = self.read_operand(memory, dst)?;
                let b = self.read_operand(memory, src)?;
                let result = self.apply_logic(size, a & b);
                self.write_operand(memory, dst, result)?;
            }
            Opcode::Cmp => {
                let dst = instr.dst().expect("CMP requires a destination");
                let src = instr.src().expect("CMP requires a source");
                let size = dst.size();
                let a = self.read_operand(memory, dst)?;
                let b = self.read_operand(memory, src)?;
                self.apply_sub(size, a, b);
            }
            Opcode::Test => {
                let dst = instr.dst().expect("TEST requires a destination");
                let src = instr.src().expect("TEST requires a source");
                let size = dst.size();
                let a = self.read_operand(memory, dst)?;
                let b = self.read_operand(memory, src)?;
                self.apply_logic(size, a & b);
            }
            Opcode::Shl | Opcode::Shr | Opcode::Sar => {
                let dst = instr.dst().expect("shift requires a destination");
                let count_operand = instr.src().expect("shift requires a count");
                let size = dst.size();
                let count_mask: u64 = if size == Size::Qword { 0x3F } else { 0x1F };
                let count = (self.read_operand(memory, count_operand)? & count_mask) as u32;
                let value = self.read_operand(memory, dst)?;
                let raw = match instr.opcode {
                    Opcode::Shl => value.wrapping_shl(count),
                    Opcode::Shr => value.wrapping_shr(count),
                    Opcode::Sar => {
                        let signed = sign_extend(value, size);
                        (signed >> count.min(63)) as u64
                    }
                    _ => unreachable!(),
                };
                let result = self.apply_shift(size, raw);
                self.write_operand(memory, dst, result)?;
            }
            Opcode::Jmp => {
                let offset = self.read_operand(memory, instr.dst().expect("JMP requires an offset"))? as i64;
                let new_rip = (self.regs.rip() as i64).wrapping_add(offset) as u64;
                self.regs.set_rip(new_rip);
            }
            Opcode::Jcc(cond) => {
                let offset = self.read_operand(memory, instr.dst().expect("Jcc requires an offset"))? as i64;
                let (cf, zf, sf, of, pf) = self.flag_bits();
                if cond.is_taken(cf, zf, sf, of, pf) {
                    let new_rip = (self.regs.rip() as i64).wrapping_add(offset) as u64;
                    self.regs.set_rip(new_rip);
                }
            }
            Opcode::Mov | Opcode::Movabs => {
                let dst = instr.dst().expect("MOV requires a destination");
                let src = instr.src().expect("MOV requires a source");
                let value = self.read_operand(memory, src)?;
                self.write_operand(memory, dst, value)?;
            }
            Opcode::Movsxd => {
                let dst = instr.dst().expect("MOVSXD requires a destination");
                let src = instr.src().expect("MOVSXD requires a source");
                let raw = self.read_operand(memory, src)?;
                let sign_extended = (raw as u32) as i32 as i64 as u64;
                self.write_operand(memory, dst, sign_extended)?;
            }
            Opcode::Movzx => {
                let dst = instr.dst().expect("MOVZX requires a destination");
                let src = instr.src().expect("MOVZX requires a source");
                let value = self.read_operand(memory, src)?;
                self.write_operand(memory, dst, value)?;
            }
            Opcode::Stos => {
                let ptr_size = match instr.dst() {
                    Some(Operand::Imm(v)) => Size::from_encoded(v),
                    _ => unreachable!("the decoder always encodes STOS's size as an immediate"),
                };
                if instr.rep {
                    while self.regs.get64(Gpr::Rcx) != 0 {
                        self.stos_step(memory, ptr_size)?;
                        let rcx = self.regs.get64(Gpr::Rcx);
                        self.regs.set64(Gpr::Rcx, rcx.wrapping_sub(1));
                    }
                } else {
                    self.stos_step(memory, ptr_size)?;
                }
            }
            Opcode::Push => {
                let operand = instr.dst().expect("PUSH requires a source");
                let value = self.read_operand(memory, operand)?;
                self.push(memory, value)?;
            }
            Opcode::Pop => {
                let dst = instr.dst().expect("POP requires a destination");
                let value = self.pop(memory)?;
                self.write_operand(memory, dst, value)?;
            }
            Opcode::Lea => {
                let dst = instr.dst().expect("LEA requires a destination");
                let src = instr.src().expect("LEA requires a memory source");
                let addr = match src {
                    Operand::Mem(ind) => ind.effective_address(&self.regs),
                    _ => return Err(EmuError::InvalidInstruction("LEA source must be memory".to_string())),
                };
                self.write_operand(memory, dst, addr)?;
            }
            Opcode::Call => {
                let target = instr.dst().expect("CALL requires a target");
                let return_addr = self.regs.rip();
                match target {
                    Operand::Imm(offset) => {
                        self.push(memory, return_addr)?;
                        let new_rip = (return_addr as i64).wrapping_add(offset) as u64;
                        self.regs.set_rip(new_rip);
                    }
                    Operand::Reg(view) => {
                        let target_addr = self.regs.get(view);
                        self.push(memory, return_addr)?;
                        self.regs.set_rip(target_addr);
                    }
                    Operand::Mem(ind) => {
                        let addr = ind.effective_address(&self.regs);
                        let target_addr = memory.read_le_u64(addr)?;
                        self.push(memory, return_addr)?;
                        self.regs.set_rip(target_addr);
                    }
                    Operand::SReg(_) => {
                        return Err(EmuError::InvalidInstruction(
                            "CALL cannot target a segment register".to_string(),
                        ));
                    }
                }
            }
            Opcode::Ret => {
                let target = self.pop(memory)?;
                self.regs.set_rip(target);
            }
            Opcode::Leave => {
                let rbp = self.regs.get64(Gpr::Rbp);
                self.regs.set64(Gpr::Rsp, rbp);
                let value = self.pop(memory)?;
                self.regs.set64(Gpr::Rbp, value);
            }
            Opcode::Cmovne => {
                let dst = instr.dst().expect("CMOVNE requires a destination");
                let src = instr.src().expect("CMOVNE requires a source");
                if !self.regs.get_flag(Flag::Zf) {
                    let value = self.read_operand(memory, src)?;
                    self.write_operand(memory, dst, value)?;
                }
            }
            Opcode::Syscall => {
                let eax = self.regs.get(GprView::new(Gpr::Rax, Width::Dword));
                match eax {
                    60 => {
                        let exit_code = self.regs.get64(Gpr::Rdi);
                        tracing::info!(exit_code, "process exited via SYSCALL");
                        self.state = CpuState::Halted;
                    }
                    other => return Err(EmuError::UnsupportedSyscall(other)),
                }
            }
            Opcode::Cpuid => {
                let leaf = self.regs.get(GprView::new(Gpr::Rax, Width::Dword)) as u32;
                let (eax, ebx, ecx, edx) = self.cpuid_profile.query(leaf)?;
                self.regs.set(GprView::new(Gpr::Rax, Width::Dword), eax as u64);
                self.regs.set(GprView::new(Gpr::Rbx, Width::Dword), ebx as u64);
                self.regs.set(GprView::new(Gpr::Rcx, Width::Dword), ecx as u64);
                self.regs.set(GprView::new(Gpr::Rdx, Width::Dword), edx as u64);
            }
            Opcode::Setcc(cond) => {
                let dst = instr.dst().expect("SETcc requires a destination");
                let (cf, zf, sf, of, pf) = self.flag_bits();
                let value = if cond.is_taken(cf, zf, sf, of, pf) { 1u64 } else { 0u64 };
                self.write_operand(memory, dst, value)?;
            }
            Opcode::Nop => {}
            Opcode::Endbr64 => {
                tracing::warn!("ENDBR64 executed (advisory only; no landing-pad check is performed)");
            }
            Opcode::Hlt => {
                self.state = CpuState::Halted;
            }
            Opcode::Ud2 => {
                tracing::warn!("UD2 executed: halting");
                self.state = CpuState::Halted;
            }
        }
        Ok(())
    }
}

/// `width(signed value) >> count` for a value masked to `size`'s width.
fn sign_extend(value: u64, size: Size) -> i64 {
    match size {
        Size::Byte => (value as u8) as i8 as i64,
        Size::Word => (value as u16) as i16 as i64,
        Size::Dword => (value as u32) as i32 as i64,
        Size::Qword => value as i64,
    }
}

/// The structural validator §4.D's instruction-check gate names: operand
/// widths on the two operands must match, except where an opcode names its
/// own extension or where one side is an immediate or a fixed-width count
/// (shift instructions' `CL`/immediate count operand).
fn check_instruction(instr: &Instruction) -> EmuResult<()> {
    if matches!(
        instr.opcode,
        Opcode::Movsxd | Opcode::Movzx | Opcode::Shl | Opcode::Shr | Opcode::Sar
    ) {
        return Ok(());
    }
    if let (Some(dst), Some(src)) = (instr.dst(), instr.src()) {
        let both_sized = !matches!(dst, Operand::Imm(_)) && !matches!(src, Operand::Imm(_));
        if both_sized && dst.size() != src.size() {
            return Err(EmuError::InvalidInstruction(format!(
                "operand width mismatch: dst={:?} src={:?}",
                dst.size(),
                src.size()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FillPolicy;
    use crate::registers::Width;

    fn cpu_and_memory() -> (Cpu, Memory) {
        let mut cpu = Cpu::new(CpuidProfile::default(), true);
        cpu.turn_on();
        let mut mem = Memory::new(FillPolicy::Zero, true, true);
        mem.set_permissions(0, 0xFFFF, true, true, true);
        (cpu, mem)
    }

    fn reg64(reg: Gpr) -> GprView {
        GprView::new(reg, Width::Qword)
    }

    #[test]
    fn add_r64_r64() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.regs.set(reg64(Gpr::Rax), 0x1);
        cpu.regs.set(reg64(Gpr::Rbx), 0x2);
        let instr = Instruction::new(
            Opcode::Add,
            false,
            [Some(Operand::Reg(reg64(Gpr::Rax))), Some(Operand::Reg(reg64(Gpr::Rbx)))],
        );
        cpu.execute_one(&mut mem, instr).unwrap();
        assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), 0x3);
        assert!(!cpu.regs.get_flag(Flag::Zf));
        assert!(!cpu.regs.get_flag(Flag::Cf));
        assert!(!cpu.regs.get_flag(Flag::Of));
    }

    #[test]
    fn sub_to_zero_sets_zf() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.regs.set(reg64(Gpr::Rax), 5);
        cpu.regs.set(reg64(Gpr::Rbx), 5);
        let instr = Instruction::new(
            Opcode::Sub,
            false,
            [Some(Operand::Reg(reg64(Gpr::Rax))), Some(Operand::Reg(reg64(Gpr::Rbx)))],
        );
        cpu.execute_one(&mut mem, instr).unwrap();
        assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), 0);
        assert!(cpu.regs.get_flag(Flag::Zf));
    }

    #[test]
    fn sub_unsigned_underflow_sets_carry_and_sign() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.regs.set(reg64(Gpr::Rax), 1);
        cpu.regs.set(reg64(Gpr::Rbx), 2);
        let instr = Instruction::new(
            Opcode::Sub,
            false,
            [Some(Operand::Reg(reg64(Gpr::Rax))), Some(Operand::Reg(reg64(Gpr::Rbx)))],
        );
        cpu.execute_one(&mut mem, instr).unwrap();
        assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), u64::MAX);
        assert!(cpu.regs.get_flag(Flag::Cf));
        assert!(cpu.regs.get_flag(Flag::Sf));
        assert!(!cpu.regs.get_flag(Flag::Zf));
    }

    #[test]
    fn mov_r32_zero_extends() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.regs.set(reg64(Gpr::Rax), u64::MAX);
        let instr = Instruction::new(
            Opcode::Mov,
            false,
            [
                Some(Operand::Reg(GprView::new(Gpr::Rax, Width::Dword))),
                Some(Operand::Imm(1)),
            ],
        );
        cpu.execute_one(&mut mem, instr).unwrap();
        assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), 1);
    }

    #[test]
    fn push_pop_round_trip_with_sign_extended_immediate() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.set_stack_bounds(0, 0x1000);
        cpu.regs.set(reg64(Gpr::Rsp), 0x1000);
        let push = Instruction::new(Opcode::Push, false, [Some(Operand::Imm(0xDEAD_BEEFu32 as i32 as i64)), None]);
        cpu.execute_one(&mut mem, push).unwrap();
        let pop = Instruction::new(Opcode::Pop, false, [Some(Operand::Reg(reg64(Gpr::Rbx))), None]);
        cpu.execute_one(&mut mem, pop).unwrap();
        assert_eq!(cpu.regs.get(reg64(Gpr::Rbx)), 0xFFFF_FFFF_DEAD_BEEF);
        assert_eq!(cpu.regs.get(reg64(Gpr::Rsp)), 0x1000);
    }

    #[test]
    fn call_then_ret_restores_rip_and_rsp() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.set_stack_bounds(0, 0x1000);
        cpu.regs.set(reg64(Gpr::Rsp), 0x1000);
        cpu.regs.set_rip(0x105); // already past a 5-byte CALL at 0x100
        let call = Instruction::new(Opcode::Call, false, [Some(Operand::Imm(0x20)), None]);
        cpu.execute_one(&mut mem, call).unwrap();
        assert_eq!(cpu.regs.rip(), 0x125);
        let ret = Instruction::new(Opcode::Ret, false, [None, None]);
        cpu.execute_one(&mut mem, ret).unwrap();
        assert_eq!(cpu.regs.rip(), 0x105);
        assert_eq!(cpu.regs.get(reg64(Gpr::Rsp)), 0x1000);
    }

    #[test]
    fn syscall_exit_halts() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.regs.set(GprView::new(Gpr::Rax, Width::Dword), 60);
        cpu.regs.set(reg64(Gpr::Rdi), 42);
        let instr = Instruction::new(Opcode::Syscall, false, [None, None]);
        cpu.execute_one(&mut mem, instr).unwrap();
        assert_eq!(cpu.state(), CpuState::Halted);
    }

    #[test]
    fn jmp_zero_offset_leaves_rip_unchanged() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.regs.set_rip(0x1000);
        let instr = Instruction::new(Opcode::Jmp, false, [Some(Operand::Imm(0)), None]);
        cpu.execute_one(&mut mem, instr).unwrap();
        assert_eq!(cpu.regs.rip(), 0x1000);
    }

    #[test]
    fn stos_with_rcx_zero_is_a_no_op() {
        let (mut cpu, mut mem) = cpu_and_memory();
        cpu.regs.set64(Gpr::Rcx, 0);
        cpu.regs.set64(Gpr::Rdi, 0x10);
        cpu.regs.set(GprView::new(Gpr::Rax, Width::Byte), 0xAB);
        let instr = Instruction::new(
            Opcode::Stos,
            true,
            [Some(Operand::Imm(Size::Byte as i64)), None],
        );
        cpu.execute_one(&mut mem, instr).unwrap();
        assert!(!mem.is_initialized(0x10));
        assert_eq!(cpu.regs.get64(Gpr::Rdi), 0x10);
    }

    #[test]
    fn check_instruction_rejects_mismatched_register_widths() {
        let instr = Instruction::new(
            Opcode::Add,
            false,
            [
                Some(Operand::Reg(GprView::new(Gpr::Rax, Width::Dword))),
                Some(Operand::Reg(reg64(Gpr::Rbx))),
            ],
        );
        assert!(matches!(check_instruction(&instr), Err(EmuError::InvalidInstruction(_))));
    }

    #[test]
    fn check_instruction_allows_shift_by_cl() {
        let instr = Instruction::new(
            Opcode::Shl,
            false,
            [
                Some(Operand::Reg(reg64(Gpr::Rax))),
                Some(Operand::Reg(GprView::new(Gpr::Rcx, Width::Byte))),
            ],
        );
        assert!(check_instruction(&instr).is_ok());
    }
}
