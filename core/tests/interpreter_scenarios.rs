//! End-to-end interpreter scenarios, driven through the public fetch-decode-
//! execute path rather than by constructing `Instruction`s by hand. Each
//! test hand-assembles the raw bytes for one of the closed opcode set's
//! behaviors and checks the resulting architectural state.

use amd64_emu_core::cpu::CpuidProfile;
use amd64_emu_core::memory::FillPolicy;
use amd64_emu_core::registers::{Flag, Gpr, GprView, Width};
use amd64_emu_core::{Cpu, CpuState, Memory};

const CODE_BASE: u64 = 0x1000;
const STACK_TOP: u64 = 0x9000;
const STACK_BOTTOM: u64 = 0x8000;

fn running(code: &[u8]) -> (Cpu, Memory) {
    let mut cpu = Cpu::new(CpuidProfile::default(), true);
    let mut mem = Memory::new(FillPolicy::Zero, true, true);
    mem.set_permissions(CODE_BASE, CODE_BASE + 0xFFF, true, false, true);
    mem.set_permissions(STACK_BOTTOM, STACK_TOP - 1, true, true, false);
    mem.initialize_bytes(CODE_BASE, code);
    cpu.set_stack_bounds(STACK_BOTTOM, STACK_TOP);
    cpu.regs.set_rip(CODE_BASE);
    cpu.turn_on();
    (cpu, mem)
}

fn reg64(reg: Gpr) -> GprView {
    GprView::new(reg, Width::Qword)
}

#[test]
fn add_r64_r64_adds_and_clears_flags() {
    // add rax, rbx ; hlt
    let (mut cpu, mut mem) = running(&[0x48, 0x01, 0xD8, 0xF4]);
    cpu.regs.set(reg64(Gpr::Rax), 1);
    cpu.regs.set(reg64(Gpr::Rbx), 2);
    cpu.execute(&mut mem).unwrap();
    assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), 3);
    assert_eq!(cpu.state(), CpuState::Halted);
    assert!(!cpu.regs.get_flag(Flag::Cf));
    assert!(!cpu.regs.get_flag(Flag::Of));
}

#[test]
fn sub_to_zero_sets_the_zero_flag() {
    // sub rax, rbx ; hlt
    let (mut cpu, mut mem) = running(&[0x48, 0x29, 0xD8, 0xF4]);
    cpu.regs.set(reg64(Gpr::Rax), 5);
    cpu.regs.set(reg64(Gpr::Rbx), 5);
    cpu.execute(&mut mem).unwrap();
    assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), 0);
    assert!(cpu.regs.get_flag(Flag::Zf));
}

#[test]
fn sub_unsigned_underflow_sets_carry_and_sign() {
    // sub rax, rbx ; hlt
    let (mut cpu, mut mem) = running(&[0x48, 0x29, 0xD8, 0xF4]);
    cpu.regs.set(reg64(Gpr::Rax), 1);
    cpu.regs.set(reg64(Gpr::Rbx), 2);
    cpu.execute(&mut mem).unwrap();
    assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), u64::MAX);
    assert!(cpu.regs.get_flag(Flag::Cf));
    assert!(cpu.regs.get_flag(Flag::Sf));
    assert!(!cpu.regs.get_flag(Flag::Zf));
}

#[test]
fn mov_into_a_32_bit_register_zero_extends_to_64_bits() {
    // mov eax, 1 ; hlt
    let (mut cpu, mut mem) = running(&[0xB8, 0x01, 0x00, 0x00, 0x00, 0xF4]);
    cpu.regs.set(reg64(Gpr::Rax), u64::MAX);
    cpu.execute(&mut mem).unwrap();
    assert_eq!(cpu.regs.get(reg64(Gpr::Rax)), 1);
}

#[test]
fn push_then_pop_round_trips_a_sign_extended_immediate() {
    // push 0xDEADBEEF ; pop rbx ; hlt
    let (mut cpu, mut mem) = running(&[0x68, 0xEF, 0xBE, 0xAD, 0xDE, 0x5B, 0xF4]);
    cpu.regs.set(reg64(Gpr::Rsp), STACK_TOP);
    cpu.execute(&mut mem).unwrap();
    assert_eq!(cpu.regs.get(reg64(Gpr::Rbx)), 0xFFFF_FFFF_DEAD_BEEF);
    assert_eq!(cpu.regs.get(reg64(Gpr::Rsp)), STACK_TOP);
}

#[test]
fn call_pushes_a_return_address_that_ret_restores() {
    // call +5 (lands on the ret at CODE_BASE+0xA) ; hlt ; ... ; ret
    let (mut cpu, mut mem) = running(&[0xE8, 0x05, 0x00, 0x00, 0x00]);
    mem.initialize_bytes(CODE_BASE + 0x5, &[0xF4]);
    mem.initialize_bytes(CODE_BASE + 0xA, &[0xC3]);
    cpu.regs.set(reg64(Gpr::Rsp), STACK_TOP);
    cpu.execute(&mut mem).unwrap();
    // RET lands back at CODE_BASE+0x5, then the HLT byte there is fetched
    // (advancing RIP past it, to CODE_BASE+0x6) before it halts the CPU.
    assert_eq!(cpu.regs.rip(), CODE_BASE + 0x6);
    assert_eq!(cpu.regs.get(reg64(Gpr::Rsp)), STACK_TOP);
    assert_eq!(cpu.state(), CpuState::Halted);
}

#[test]
fn syscall_exit_halts_the_cpu_with_the_exit_code_in_rdi() {
    // mov eax, 60 ; mov edi, 42 ; syscall
    let (mut cpu, mut mem) = running(&[
        0xB8, 0x3C, 0x00, 0x00, 0x00, 0xBF, 0x2A, 0x00, 0x00, 0x00, 0x0F, 0x05,
    ]);
    cpu.execute(&mut mem).unwrap();
    assert_eq!(cpu.state(), CpuState::Halted);
    assert_eq!(cpu.regs.get(reg64(Gpr::Rdi)), 42);
}
