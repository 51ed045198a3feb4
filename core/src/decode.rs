//! Decoder: the external collaborator contract from §6, given a concrete
//! body. Implements exactly the closed opcode/operand surface §3 and §4.D
//! name — not a general-purpose x86-64 disassembler — reading
//! REX/ModRM/SIB/displacement/immediate bytes off any `ByteSource`.
//!
//! One simplification, recorded in `DESIGN.md`: the spec's `Indirect`
//! operand (§3) has no RIP variant, so `mod=00,rm=101` (and the matching SIB
//! "no base" encoding) is decoded as a flat `disp32` rather than as
//! RIP-relative addressing.

use crate::error::{EmuError, EmuResult};
use crate::fetcher::ByteSource;
use crate::instruction::{Condition, Indirect, Instruction, Operand, Opcode, Size};
use crate::registers::{Gpr, GprView, Width};

#[derive(Debug, Clone, Copy, Default)]
struct Rex {
    w: bool,
    r: bool,
    x: bool,
    b: bool,
}

impl Rex {
    fn from_byte(byte: u8) -> Rex {
        Rex {
            w: byte & 0x8 != 0,
            r: byte & 0x4 != 0,
            x: byte & 0x2 != 0,
            b: byte & 0x1 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Prefixes {
    rep: bool,
    opsize_16: bool,
    addrsize_32: bool,
    rex: Option<Rex>,
}

enum Rm {
    Reg(GprView),
    Mem(Indirect),
}

fn gpr_from_encoding(n: u8) -> Gpr {
    match n & 0xF {
        0 => Gpr::Rax,
        1 => Gpr::Rcx,
        2 => Gpr::Rdx,
        3 => Gpr::Rbx,
        4 => Gpr::Rsp,
        5 => Gpr::Rbp,
        6 => Gpr::Rsi,
        7 => Gpr::Rdi,
        8 => Gpr::R8,
        9 => Gpr::R9,
        10 => Gpr::R10,
        11 => Gpr::R11,
        12 => Gpr::R12,
        13 => Gpr::R13,
        14 => Gpr::R14,
        _ => Gpr::R15,
    }
}

/// Maps a register-number encoding to its named view, handling the
/// AH/CH/DH/BH vs. SPL/BPL/SIL/DIL split a REX prefix's mere presence
/// decides (§3).
fn reg_view(n: u8, size: Size, rex_present: bool) -> GprView {
    if size == Size::Byte && !rex_present && (4..8).contains(&n) {
        return GprView::new(gpr_from_encoding(n - 4), Width::ByteHigh);
    }
    GprView::new(gpr_from_encoding(n), size.to_width())
}

fn addr_size(prefixes: Prefixes) -> Size {
    if prefixes.addrsize_32 {
        Size::Dword
    } else {
        Size::Qword
    }
}

/// Default operand size: 32 unless REX.W (64) or a 0x66 prefix (16).
fn operand_size(prefixes: Prefixes) -> Size {
    if prefixes.rex.map(|r| r.w).unwrap_or(false) {
        Size::Qword
    } else if prefixes.opsize_16 {
        Size::Word
    } else {
        Size::Dword
    }
}

fn read_u8<R: ByteSource>(src: &mut R) -> EmuResult<u8> {
    src.next_byte()
}

fn read_i8<R: ByteSource>(src: &mut R) -> EmuResult<i64> {
    Ok(src.next_byte()? as i8 as i64)
}

fn read_u16<R: ByteSource>(src: &mut R) -> EmuResult<u16> {
    let lo = src.next_byte()? as u16;
    let hi = src.next_byte()? as u16;
    Ok(lo | (hi << 8))
}

fn read_i32<R: ByteSource>(src: &mut R) -> EmuResult<i64> {
    let mut v: u32 = 0;
    for i in 0..4 {
        v |= (src.next_byte()? as u32) << (8 * i);
    }
    Ok(v as i32 as i64)
}

fn read_u32<R: ByteSource>(src: &mut R) -> EmuResult<u32> {
    let mut v: u32 = 0;
    for i in 0..4 {
        v |= (src.next_byte()? as u32) << (8 * i);
    }
    Ok(v)
}

fn read_u64<R: ByteSource>(src: &mut R) -> EmuResult<u64> {
    let mut v: u64 = 0;
    for i in 0..8 {
        v |= (src.next_byte()? as u64) << (8 * i);
    }
    Ok(v)
}

/// Reads a ModRM byte (and SIB/displacement if it encodes memory),
/// returning the `reg` field (REX.R-extended) and the `rm` operand.
fn decode_modrm<R: ByteSource>(
    src: &mut R,
    prefixes: Prefixes,
    op_size: Size,
    ptr_size: Size,
) -> EmuResult<(u8, Rm)> {
    let modrm = read_u8(src)?;
    let md = modrm >> 6;
    let reg_lo = (modrm >> 3) & 0x7;
    let rm_lo = modrm & 0x7;
    let rex = prefixes.rex;
    let rex_r = rex.map(|r| r.r).unwrap_or(false);
    let rex_x = rex.map(|r| r.x).unwrap_or(false);
    let rex_b = rex.map(|r| r.b).unwrap_or(false);
    let reg_num = reg_lo | if rex_r { 8 } else { 0 };

    if md == 0b11 {
        let rm_num = rm_lo | if rex_b { 8 } else { 0 };
        let view = reg_view(rm_num, op_size, rex.is_some());
        return Ok((reg_num, Rm::Reg(view)));
    }

    let mut base = None;
    let mut index = None;
    let mut scale: u8 = 1;
    let mut disp: i64 = 0;

    if rm_lo == 0b100 {
        let sib = read_u8(src)?;
        let ss = sib >> 6;
        let idx_lo = (sib >> 3) & 0x7;
        let base_lo = sib & 0x7;
        scale = 1u8 << ss;
        if idx_lo != 0b100 || rex_x {
            index = Some(gpr_from_encoding(idx_lo | if rex_x { 8 } else { 0 }));
        }
        if base_lo == 0b101 && md == 0b00 {
            disp = read_i32(src)?;
        } else {
            base = Some(gpr_from_encoding(base_lo | if rex_b { 8 } else { 0 }));
            if md == 0b01 {
                disp = read_i8(src)?;
            } else if md == 0b10 {
                disp = read_i32(src)?;
            }
        }
    } else if md == 0b00 && rm_lo == 0b101 {
        disp = read_i32(src)?;
    } else {
        base = Some(gpr_from_encoding(rm_lo | if rex_b { 8 } else { 0 }));
        if md == 0b01 {
            disp = read_i8(src)?;
        } else if md == 0b10 {
            disp = read_i32(src)?;
        }
    }

    let indirect = Indirect {
        base,
        index,
        scale,
        displacement: disp,
        pointer_size: ptr_size,
        address_width: addr_size(prefixes),
    };
    Ok((reg_num, Rm::Mem(indirect)))
}

fn rm_operand(rm: Rm) -> Operand {
    match rm {
        Rm::Reg(view) => Operand::Reg(view),
        Rm::Mem(ind) => Operand::Mem(ind),
    }
}

fn inst(opcode: Opcode, dst: Operand, src: Operand) -> Instruction {
    Instruction::new(opcode, false, [Some(dst), Some(src)])
}

fn inst1(opcode: Opcode, dst: Operand) -> Instruction {
    Instruction::new(opcode, false, [Some(dst), None])
}

fn inst0(opcode: Opcode) -> Instruction {
    Instruction::new(opcode, false, [None, None])
}

fn unsupported(opcode_desc: &str) -> EmuError {
    EmuError::UnsupportedInstruction {
        opcode: opcode_desc.to_string(),
        operands: String::new(),
    }
}

fn condition_from_cc(cc: u8) -> EmuResult<Condition> {
    Ok(match cc & 0xF {
        0x0 => Condition::O,
        0x1 => Condition::No,
        0x2 => Condition::B,
        0x3 => Condition::Ae,
        0x4 => Condition::E,
        0x5 => Condition::Ne,
        0x6 => Condition::Be,
        0x7 => Condition::A,
        0x8 => Condition::S,
        0x9 => Condition::Ns,
        0xA => Condition::P,
        0xB => Condition::Np,
        0xC => Condition::L,
        0xD => Condition::Ge,
        0xE => Condition::Le,
        0xF => Condition::G,
        _ => unreachable!(),
    })
}

/// A group-1 arithmetic/logic opcode family (`ADD`/`SUB`/`AND`/`XOR`/`CMP`,
/// the only members of that family this closed opcode set names).
fn group1_op(reg_field: u8) -> EmuResult<Opcode> {
    match reg_field & 0x7 {
        0 => Ok(Opcode::Add),
        4 => Ok(Opcode::And),
        5 => Ok(Opcode::Sub),
        6 => Ok(Opcode::Xor),
        7 => Ok(Opcode::Cmp),
        _ => Err(unsupported("group1 opcode outside {ADD,AND,SUB,XOR,CMP}")),
    }
}

fn shift_op(reg_field: u8) -> EmuResult<Opcode> {
    match reg_field & 0x7 {
        4 => Ok(Opcode::Shl),
        5 => Ok(Opcode::Shr),
        7 => Ok(Opcode::Sar),
        _ => Err(unsupported("shift group opcode outside {SHL,SHR,SAR}")),
    }
}

/// Decodes one instruction from `src`, advancing its position past every
/// byte consumed (§4.C's ordering guarantee).
pub fn decode_one<R: ByteSource>(src: &mut R) -> EmuResult<Instruction> {
    let mut prefixes = Prefixes::default();

    // Prefix loop: legacy prefixes in any order, then at most one REX byte
    // immediately before the opcode.
    let mut byte = read_u8(src)?;
    loop {
        match byte {
            0xF3 => {
                prefixes.rep = true;
                byte = read_u8(src)?;
            }
            0x66 => {
                prefixes.opsize_16 = true;
                byte = read_u8(src)?;
            }
            0x67 => {
                prefixes.addrsize_32 = true;
                byte = read_u8(src)?;
            }
            0x2E | 0x36 | 0x3E | 0x26 | 0x64 | 0x65 | 0xF0 | 0xF2 => {
                // segment override / lock / repnz: consumed, not modeled
                byte = read_u8(src)?;
            }
            0x40..=0x4F => {
                prefixes.rex = Some(Rex::from_byte(byte));
                byte = read_u8(src)?;
                break;
            }
            _ => break,
        }
    }

    let op_size = operand_size(prefixes);
    let rex_present = prefixes.rex.is_some();

    if byte == 0x0F {
        return decode_two_byte(src, prefixes, op_size, rex_present);
    }

    match byte {
        // Group 1: ADD/SUB/AND/XOR/CMP, r/m8,r8 and r/m,r forms (opcode+0/1),
        // reg,r/m8 and reg,r/m forms (opcode+2/3), and AL/eAX,imm (opcode+4/5).
        0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38 => {
            let base = byte & 0x38;
            let op = group1_op(base >> 3)?;
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let dst = rm_operand(rm);
            let src_op = Operand::Reg(reg_view(reg_num, Size::Byte, rex_present));
            Ok(inst(op, dst, src_op))
        }
        0x01 | 0x09 | 0x11 | 0x19 | 0x21 | 0x29 | 0x31 | 0x39 => {
            let base = byte & 0x38;
            let op = group1_op(base >> 3)?;
            let (reg_num, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let dst = rm_operand(rm);
            let src_op = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(op, dst, src_op))
        }
        0x02 | 0x0A | 0x12 | 0x1A | 0x22 | 0x2A | 0x32 | 0x3A => {
            let base = byte & 0x38;
            let op = group1_op(base >> 3)?;
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let dst = Operand::Reg(reg_view(reg_num, Size::Byte, rex_present));
            Ok(inst(op, dst, rm_operand(rm)))
        }
        0x03 | 0x0B | 0x13 | 0x1B | 0x23 | 0x2B | 0x33 | 0x3B => {
            let base = byte & 0x38;
            let op = group1_op(base >> 3)?;
            let (reg_num, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let dst = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(op, dst, rm_operand(rm)))
        }

        // MOV r/m8,r8 ; r/m,r ; r8,r/m8 ; r,r/m
        0x88 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let src_op = Operand::Reg(reg_view(reg_num, Size::Byte, rex_present));
            Ok(inst(Opcode::Mov, rm_operand(rm), src_op))
        }
        0x89 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let src_op = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(Opcode::Mov, rm_operand(rm), src_op))
        }
        0x8A => {
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let dst = Operand::Reg(reg_view(reg_num, Size::Byte, rex_present));
            Ok(inst(Opcode::Mov, dst, rm_operand(rm)))
        }
        0x8B => {
            let (reg_num, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let dst = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(Opcode::Mov, dst, rm_operand(rm)))
        }

        // LEA r, [mem]
        0x8D => {
            let (reg_num, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let dst = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            match rm {
                Rm::Mem(ind) => Ok(inst(Opcode::Lea, dst, Operand::Mem(ind))),
                Rm::Reg(_) => Err(EmuError::InvalidInstruction(
                    "LEA requires a memory operand".to_string(),
                )),
            }
        }

        // MOVSXD r64, r/m32
        0x63 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Dword, Size::Dword)?;
            let dst = Operand::Reg(reg_view(reg_num, Size::Qword, rex_present));
            Ok(inst(Opcode::Movsxd, dst, rm_operand(rm)))
        }

        // MOV r8, imm8 / MOV r32, imm32 / MOVABS r64, imm64
        0xB0..=0xB7 => {
            let n = (byte - 0xB0) | if prefixes.rex.map(|r| r.b).unwrap_or(false) { 8 } else { 0 };
            let dst = Operand::Reg(reg_view(n, Size::Byte, rex_present));
            let imm = read_i8(src)?;
            Ok(inst(Opcode::Mov, dst, Operand::Imm(imm)))
        }
        0xB8..=0xBF => {
            let n = (byte - 0xB8) | if prefixes.rex.map(|r| r.b).unwrap_or(false) { 8 } else { 0 };
            if prefixes.rex.map(|r| r.w).unwrap_or(false) {
                let dst = Operand::Reg(reg_view(n, Size::Qword, rex_present));
                let imm = read_u64(src)? as i64;
                Ok(inst(Opcode::Movabs, dst, Operand::Imm(imm)))
            } else {
                let dst = Operand::Reg(reg_view(n, Size::Dword, rex_present));
                let imm = read_u32(src)? as i64;
                Ok(inst(Opcode::Mov, dst, Operand::Imm(imm)))
            }
        }

        // MOV r/m8, imm8
        0xC6 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            if reg_field & 0x7 != 0 {
                return Err(unsupported("group11 opcode C6 /!=0"));
            }
            let imm = read_i8(src)?;
            Ok(inst(Opcode::Mov, rm_operand(rm), Operand::Imm(imm)))
        }
        // MOV r/m32/64, imm32 (sign-extended when the destination is 64-bit)
        0xC7 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            if reg_field & 0x7 != 0 {
                return Err(unsupported("group11 opcode C7 /!=0"));
            }
            let imm = read_i32(src)?;
            Ok(inst(Opcode::Mov, rm_operand(rm), Operand::Imm(imm)))
        }

        // Group 1 with immediate: 80 /n r/m8,imm8 ; 81 /n r/m,imm32 ; 83 /n r/m,imm8(sign-extended)
        0x80 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let op = group1_op(reg_field)?;
            let imm = read_i8(src)?;
            Ok(inst(op, rm_operand(rm), Operand::Imm(imm)))
        }
        0x81 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let op = group1_op(reg_field)?;
            let imm = read_i32(src)?;
            Ok(inst(op, rm_operand(rm), Operand::Imm(imm)))
        }
        0x83 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let op = group1_op(reg_field)?;
            let imm = read_i8(src)?;
            Ok(inst(op, rm_operand(rm), Operand::Imm(imm)))
        }

        // TEST r/m8,r8 ; r/m,r
        0x84 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let src_op = Operand::Reg(reg_view(reg_num, Size::Byte, rex_present));
            Ok(inst(Opcode::Test, rm_operand(rm), src_op))
        }
        0x85 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let src_op = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(Opcode::Test, rm_operand(rm), src_op))
        }

        // Group 3: TEST r/m,imm (reg field 0)
        0xF6 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            if reg_field & 0x7 != 0 {
                return Err(unsupported("group3 opcode F6 /!=0"));
            }
            let imm = read_i8(src)?;
            Ok(inst(Opcode::Test, rm_operand(rm), Operand::Imm(imm)))
        }
        0xF7 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            if reg_field & 0x7 != 0 {
                return Err(unsupported("group3 opcode F7 /!=0"));
            }
            let imm = read_i32(src)?;
            Ok(inst(Opcode::Test, rm_operand(rm), Operand::Imm(imm)))
        }

        // Shift group: C0/C1 imm8 count, D0/D1 count=1, D2/D3 count=CL
        0xC0 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let op = shift_op(reg_field)?;
            let imm = read_i8(src)?;
            Ok(inst(op, rm_operand(rm), Operand::Imm(imm)))
        }
        0xC1 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let op = shift_op(reg_field)?;
            let imm = read_i8(src)?;
            Ok(inst(op, rm_operand(rm), Operand::Imm(imm)))
        }
        0xD0 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let op = shift_op(reg_field)?;
            Ok(inst(op, rm_operand(rm), Operand::Imm(1)))
        }
        0xD1 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let op = shift_op(reg_field)?;
            Ok(inst(op, rm_operand(rm), Operand::Imm(1)))
        }
        0xD2 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let op = shift_op(reg_field)?;
            Ok(inst(op, rm_operand(rm), Operand::Reg(GprView::new(Gpr::Rcx, Width::Byte))))
        }
        0xD3 => {
            let (reg_field, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let op = shift_op(reg_field)?;
            Ok(inst(op, rm_operand(rm), Operand::Reg(GprView::new(Gpr::Rcx, Width::Byte))))
        }

        // STOS: AA = STOSB, AB = STOSW/STOSD/STOSQ depending on operand size
        0xAA => Ok(Instruction::new(
            Opcode::Stos,
            prefixes.rep,
            [Some(Operand::Imm(Size::Byte as i64)), None],
        )),
        0xAB => Ok(Instruction::new(
            Opcode::Stos,
            prefixes.rep,
            [Some(Operand::Imm(op_size as i64)), None],
        )),

        // PUSH r64 (opcode+reg) / imm32 / imm8
        0x50..=0x57 => {
            let n = (byte - 0x50) | if prefixes.rex.map(|r| r.b).unwrap_or(false) { 8 } else { 0 };
            Ok(inst1(Opcode::Push, Operand::Reg(reg_view(n, Size::Qword, rex_present))))
        }
        0x68 => {
            let imm = read_i32(src)?;
            Ok(inst1(Opcode::Push, Operand::Imm(imm)))
        }
        0x6A => {
            let imm = read_i8(src)?;
            Ok(inst1(Opcode::Push, Operand::Imm(imm)))
        }

        // POP r64
        0x58..=0x5F => {
            let n = (byte - 0x58) | if prefixes.rex.map(|r| r.b).unwrap_or(false) { 8 } else { 0 };
            Ok(inst1(Opcode::Pop, Operand::Reg(reg_view(n, Size::Qword, rex_present))))
        }

        // CALL rel32
        0xE8 => {
            let rel = read_i32(src)?;
            Ok(inst1(Opcode::Call, Operand::Imm(rel)))
        }
        // RET
        0xC3 => Ok(inst0(Opcode::Ret)),
        // LEAVE
        0xC9 => Ok(inst0(Opcode::Leave)),
        // NOP
        0x90 => Ok(inst0(Opcode::Nop)),
        // HLT
        0xF4 => Ok(inst0(Opcode::Hlt)),

        // JMP rel8 / rel32
        0xEB => {
            let rel = read_i8(src)?;
            Ok(inst1(Opcode::Jmp, Operand::Imm(rel)))
        }
        0xE9 => {
            let rel = read_i32(src)?;
            Ok(inst1(Opcode::Jmp, Operand::Imm(rel)))
        }

        // Jcc rel8
        0x70..=0x7F => {
            let cc = condition_from_cc(byte - 0x70)?;
            let rel = read_i8(src)?;
            Ok(inst1(Opcode::Jcc(cc), Operand::Imm(rel)))
        }

        // Group 5: FF /2 CALL r/m64 (indirect absolute), /6 PUSH r/m64
        0xFF => {
            let (reg_field, rm) = decode_modrm(src, prefixes, Size::Qword, Size::Qword)?;
            match reg_field & 0x7 {
                2 => Ok(inst1(Opcode::Call, rm_operand(rm))),
                6 => Ok(inst1(Opcode::Push, rm_operand(rm))),
                _ => Err(unsupported("group5 opcode FF /!={2,6}")),
            }
        }

        other => Err(EmuError::UnsupportedInstruction {
            opcode: format!("{:#04x}", other),
            operands: String::new(),
        }),
    }
}

fn decode_two_byte<R: ByteSource>(
    src: &mut R,
    prefixes: Prefixes,
    op_size: Size,
    rex_present: bool,
) -> EmuResult<Instruction> {
    let byte2 = read_u8(src)?;
    match byte2 {
        // Jcc rel32
        0x80..=0x8F => {
            let cc = condition_from_cc(byte2 - 0x80)?;
            let rel = read_i32(src)?;
            Ok(inst1(Opcode::Jcc(cc), Operand::Imm(rel)))
        }
        // SETcc r/m8
        0x90..=0x9F => {
            let cc = condition_from_cc(byte2 - 0x90)?;
            let (_reg_field, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            Ok(inst1(Opcode::Setcc(cc), rm_operand(rm)))
        }
        // MOVZX r32/64, r/m8
        0xB6 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Byte, Size::Byte)?;
            let dst = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(Opcode::Movzx, dst, rm_operand(rm)))
        }
        // MOVZX r32/64, r/m16
        0xB7 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, Size::Word, Size::Word)?;
            let dst = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(Opcode::Movzx, dst, rm_operand(rm)))
        }
        // CMOVNE r, r/m
        0x45 => {
            let (reg_num, rm) = decode_modrm(src, prefixes, op_size, op_size)?;
            let dst = Operand::Reg(reg_view(reg_num, op_size, rex_present));
            Ok(inst(Opcode::Cmovne, dst, rm_operand(rm)))
        }
        // SYSCALL
        0x05 => Ok(inst0(Opcode::Syscall)),
        // UD2
        0x0B => Ok(inst0(Opcode::Ud2)),
        // CPUID
        0xA2 => Ok(inst0(Opcode::Cpuid)),
        // 0F1E /0: multi-byte NOP, or ENDBR64 when prefixed with F3 and modrm==0xFA
        0x1E => {
            let modrm = read_u8(src)?;
            if prefixes.rep && modrm == 0xFA {
                Ok(inst0(Opcode::Endbr64))
            } else {
                // Consume the rest of a generic multi-byte NOP's addressing
                // form like any other ModRM memory operand, then ignore it.
                decode_nop_modrm_tail(src, modrm, prefixes)?;
                Ok(inst0(Opcode::Nop))
            }
        }
        other => Err(EmuError::UnsupportedInstruction {
            opcode: format!("0f {:#04x}", other),
            operands: String::new(),
        }),
    }
}

/// `0F 1E` outside the ENDBR64 form decodes like any other ModRM
/// instruction purely to stay byte-aligned; its addressing mode is
/// otherwise irrelevant, since the instruction has no effect either way.
fn decode_nop_modrm_tail<R: ByteSource>(src: &mut R, modrm: u8, prefixes: Prefixes) -> EmuResult<()> {
    let md = modrm >> 6;
    let rm_lo = modrm & 0x7;
    if md == 0b11 {
        return Ok(());
    }
    if rm_lo == 0b100 {
        let sib = read_u8(src)?;
        let base_lo = sib & 0x7;
        if base_lo == 0b101 && md == 0b00 {
            read_i32(src)?;
            return Ok(());
        }
    } else if md == 0b00 && rm_lo == 0b101 {
        read_i32(src)?;
        return Ok(());
    }
    match md {
        0b01 => {
            read_i8(src)?;
        }
        0b10 => {
            read_i32(src)?;
        }
        _ => {}
    }
    let _ = prefixes;
    Ok(())
}
