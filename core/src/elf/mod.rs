//! ELF loader (§2.E, §4.E): maps `PT_LOAD` segments and `SHF_ALLOC` sections
//! into memory, builds the initial stack frame, and runs constructor and
//! destructor arrays. ELF parsing itself is the external collaborator §1
//! calls "a pure data provider" — `goblin::elf::Elf` plays that role here;
//! this module is its consumer.

pub mod auxv;
mod stack_frame;

pub use stack_frame::{build_stack_frame, StackFrame};

use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};
use goblin::elf::section_header::{SHF_ALLOC, SHT_NOBITS};
use goblin::elf::sym::STT_FUNC;
use goblin::elf::Elf;

use crate::cpu::Cpu;
use crate::error::{EmuError, EmuResult};
use crate::memory::Memory;
use crate::registers::Gpr;

const EM_X86_64: u16 = 62;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

pub struct Loader;

impl Loader {
    fn check_preconditions(elf: &Elf) -> EmuResult<()> {
        if elf.header.e_type != ET_EXEC && elf.header.e_type != ET_DYN {
            return Err(EmuError::InvalidElf(format!("unsupported e_type {}", elf.header.e_type)));
        }
        if elf.header.e_machine != EM_X86_64 {
            return Err(EmuError::InvalidElf(format!(
                "unsupported ISA (e_machine {}); only AMD64 is supported",
                elf.header.e_machine
            )));
        }
        Ok(())
    }

    /// Executes §4.E's load sequence end to end: segments, sections, the
    /// stack region and frame, `.preinit_array`/`.init_array`/`.init`, then
    /// sets `RIP` to the entry point.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        elf: &Elf,
        file_bytes: &[u8],
        argv: &[String],
        envp: &[String],
        base_address: u64,
        base_stack_address: u64,
        stack_size: u64,
        memory: &mut Memory,
        cpu: &mut Cpu,
    ) -> EmuResult<()> {
        Self::check_preconditions(elf)?;

        let mut segments: Vec<(u64, u64)> = Vec::new();
        for ph in &elf.program_headers {
            if ph.p_type != PT_LOAD {
                continue;
            }
            let lo = base_address + ph.p_vaddr;
            let hi = lo + ph.p_memsz;
            let r = ph.p_flags & PF_R != 0;
            let w = ph.p_flags & PF_W != 0;
            let x = ph.p_flags & PF_X != 0;
            memory.set_permissions(lo, hi.saturating_sub(1), r, w, x);
            segments.push((lo, hi));

            let file_len = ph.p_filesz as usize;
            if file_len > 0 {
                let file_lo = ph.p_offset as usize;
                memory.initialize_bytes(lo, &file_bytes[file_lo..file_lo + file_len]);
            }
            let bss_len = ph.p_memsz.saturating_sub(ph.p_filesz);
            if bss_len > 0 {
                memory.initialize_fill(lo + ph.p_filesz, bss_len, 0);
            }
        }

        for sh in &elf.section_headers {
            if sh.sh_flags & (SHF_ALLOC as u64) == 0 || sh.sh_addr == 0 {
                continue;
            }
            let lo = base_address + sh.sh_addr;
            let hi = lo + sh.sh_size;
            if !segments.iter().any(|&(slo, shi)| lo >= slo && hi <= shi) {
                let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("<unnamed section>");
                return Err(EmuError::SectionOutsideAnySegment(name.to_string()));
            }
            if sh.sh_type == SHT_NOBITS {
                memory.initialize_fill(lo, sh.sh_size, 0);
            } else {
                let file_lo = sh.sh_offset as usize;
                let file_len = sh.sh_size as usize;
                memory.initialize_bytes(lo, &file_bytes[file_lo..file_lo + file_len]);
            }
        }

        // Step 3: stack region.
        let stack_top = align_up(base_stack_address, 16);
        let stack_bottom = stack_top.saturating_sub(stack_size);
        memory.set_permissions(stack_bottom, stack_top.saturating_sub(1), true, true, false);
        memory.initialize_fill(stack_bottom, stack_size, 0);
        cpu.set_stack_bounds(stack_bottom, stack_top);

        // Step 4: initial stack frame.
        let aux = auxv::build(auxv::AuxvInputs {
            phdr_address: base_address + elf.header.e_phoff,
            phent_size: elf.header.e_phentsize as u64,
            phnum: elf.header.e_phnum as u64,
            uid: 0,
            euid: 0,
            gid: 0,
            egid: 0,
        });
        let frame = build_stack_frame(stack_top, argv, envp, &aux);
        memory.initialize_bytes(frame.base_address, &frame.bytes);
        cpu.regs.set64(Gpr::Rsp, frame.base_address);
        cpu.regs.set64(Gpr::Rdi, argv.len() as u64);

        // Steps 5-6: constructors.
        Self::run_function_array(elf, base_address, memory, cpu, ".preinit_array")?;
        Self::run_function_array(elf, base_address, memory, cpu, ".init_array")?;
        Self::run_symbols_in_section(elf, base_address, memory, cpu, ".init")?;

        // Step 7: entry point.
        cpu.regs.set_rip(base_address + elf.header.e_entry);
        Ok(())
    }

    /// `unload`: symmetric to `load`'s constructors, running `.fini_array`
    /// then `.fini`. No deallocation (§4.E).
    pub fn unload(elf: &Elf, base_address: u64, memory: &mut Memory, cpu: &mut Cpu) -> EmuResult<()> {
        Self::run_function_array(elf, base_address, memory, cpu, ".fini_array")?;
        Self::run_symbols_in_section(elf, base_address, memory, cpu, ".fini")?;
        Ok(())
    }

    fn find_section<'a>(elf: &'a Elf, name: &str) -> Option<&'a goblin::elf::SectionHeader> {
        elf.section_headers
            .iter()
            .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(name))
    }

    fn run_function_array(
        elf: &Elf,
        base_address: u64,
        memory: &mut Memory,
        cpu: &mut Cpu,
        section_name: &str,
    ) -> EmuResult<()> {
        let Some(sh) = Self::find_section(elf, section_name) else {
            return Ok(());
        };
        let count = (sh.sh_size / 8) as usize;
        for i in 0..count {
            let slot_addr = base_address + sh.sh_addr + (i as u64) * 8;
            let ptr = memory.read_le_u64(slot_addr)?;
            cpu.call_subroutine(memory, base_address + ptr)?;
        }
        Ok(())
    }

    /// `.init`/`.fini` sweep: every `STT_FUNC` symbol whose `st_value` falls
    /// inside the section's virtual-address range (the resolved reading of
    /// §9's open question; see `DESIGN.md`).
    fn run_symbols_in_section(
        elf: &Elf,
        base_address: u64,
        memory: &mut Memory,
        cpu: &mut Cpu,
        section_name: &str,
    ) -> EmuResult<()> {
        let Some(sh) = Self::find_section(elf, section_name) else {
            return Ok(());
        };
        let lo = sh.sh_addr;
        let hi = lo + sh.sh_size;
        for sym in elf.syms.iter() {
            if sym.st_type() != STT_FUNC {
                continue;
            }
            if sym.st_value >= lo && sym.st_value < hi {
                cpu.call_subroutine(memory, base_address + sym.st_value)?;
            }
        }
        Ok(())
    }
}
