//! End-to-end ELF loading: hand-assembles a minimal, valid ELF64 executable
//! (one `PT_LOAD` segment, no section headers) with `goblin`-parseable
//! headers, writes it to a real file via `tempfile`, loads it through
//! `Loader::load`, and runs it to a clean `exit`.

use std::io::Write;

use amd64_emu_core::context::{Config, ExecutionContext};
use amd64_emu_core::cpu::CpuState;
use amd64_emu_core::elf::Loader;
use amd64_emu_core::registers::Gpr;

const BASE_VADDR: u64 = 0x0040_0000;
const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;

/// `mov eax, 60 ; mov edi, 42 ; syscall` — the same bytes the interpreter
/// scenario tests use, laid out right after the single program header.
fn code() -> Vec<u8> {
    vec![
        0xB8, 0x3C, 0x00, 0x00, 0x00, 0xBF, 0x2A, 0x00, 0x00, 0x00, 0x0F, 0x05,
    ]
}

fn build_minimal_executable() -> Vec<u8> {
    let code = code();
    let code_offset = EHDR_SIZE + PHDR_SIZE;
    let total_size = code_offset + code.len() as u64;
    let entry = BASE_VADDR + code_offset;

    let mut bytes = Vec::with_capacity(total_size as usize);

    // e_ident
    bytes.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    bytes.extend_from_slice(&[0u8; 8]);
    bytes.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    bytes.extend_from_slice(&62u16.to_le_bytes()); // e_machine = EM_X86_64
    bytes.extend_from_slice(&1u32.to_le_bytes()); // e_version
    bytes.extend_from_slice(&entry.to_le_bytes()); // e_entry
    bytes.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_phoff
    bytes.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    bytes.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    bytes.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
    bytes.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    bytes.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    bytes.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    bytes.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    bytes.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    assert_eq!(bytes.len() as u64, EHDR_SIZE);

    // Single PT_LOAD segment covering the whole file, R+X.
    bytes.extend_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    bytes.extend_from_slice(&5u32.to_le_bytes()); // p_flags = PF_R | PF_X
    bytes.extend_from_slice(&0u64.to_le_bytes()); // p_offset
    bytes.extend_from_slice(&BASE_VADDR.to_le_bytes()); // p_vaddr
    bytes.extend_from_slice(&BASE_VADDR.to_le_bytes()); // p_paddr
    bytes.extend_from_slice(&total_size.to_le_bytes()); // p_filesz
    bytes.extend_from_slice(&total_size.to_le_bytes()); // p_memsz
    bytes.extend_from_slice(&0x1000u64.to_le_bytes()); // p_align
    assert_eq!(bytes.len() as u64, EHDR_SIZE + PHDR_SIZE);

    bytes.extend_from_slice(&code);
    bytes
}

#[test]
fn loads_and_runs_a_minimal_static_executable_to_a_clean_exit() {
    let file_bytes = build_minimal_executable();

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&file_bytes).unwrap();
    let on_disk = std::fs::read(tmp.path()).unwrap();

    let elf = goblin::elf::Elf::parse(&on_disk).unwrap();
    assert_eq!(elf.header.e_machine, 62);

    let config = Config::safe();
    let mut ctx = ExecutionContext::new(&config);

    let argv = vec!["prog".to_string()];
    let envp: Vec<String> = Vec::new();

    Loader::load(
        &elf,
        &on_disk,
        &argv,
        &envp,
        0,
        config.base_stack_address,
        config.stack_size,
        &mut ctx.memory,
        &mut ctx.cpu,
    )
    .unwrap();

    assert_eq!(ctx.cpu.regs.rip(), BASE_VADDR + EHDR_SIZE + PHDR_SIZE);

    ctx.cpu.turn_on();
    ctx.cpu.execute(&mut ctx.memory).unwrap();

    assert_eq!(ctx.cpu.state(), CpuState::Halted);
    assert_eq!(ctx.cpu.regs.get64(Gpr::Rdi), 42);

    Loader::unload(&elf, 0, &mut ctx.memory, &mut ctx.cpu).unwrap();
}
