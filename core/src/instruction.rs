//! `Instruction`/`Operand` data types (§3). The spec treats decoding as an
//! external, out-of-scope concern and these types as its pure output; they
//! live here because no existing crate defines exactly this closed shape.

use crate::registers::{Gpr, GprView, Segment};

/// The closed opcode set THE CORE's interpreter must dispatch (§3, §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Shr,
    Sar,
    Shl,
    Xor,
    And,
    Cmp,
    Test,
    Jmp,
    Jcc(Condition),
    Mov,
    Movabs,
    Movsxd,
    Movzx,
    Stos,
    Push,
    Pop,
    Lea,
    Call,
    Ret,
    Leave,
    Cmovne,
    Syscall,
    Nop,
    Hlt,
    Ud2,
    Endbr64,
    Cpuid,
    Setcc(Condition),
}

/// The condition-code predicates shared by `Jcc`, `SETcc`: the table in §4.D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    E,
    Ne,
    A,
    Ae,
    B,
    Be,
    G,
    Ge,
    L,
    Le,
    S,
    Ns,
    O,
    No,
    P,
    Np,
}

impl Condition {
    /// Evaluates the predicate against the flag bits named in the table.
    pub fn is_taken(self, cf: bool, zf: bool, sf: bool, of: bool, pf: bool) -> bool {
        match self {
            Condition::E => zf,
            Condition::Ne => !zf,
            Condition::A => !cf && !zf,
            Condition::Be => cf || zf,
            Condition::Ae => !cf,
            Condition::B => cf,
            Condition::G => !zf && (sf == of),
            Condition::Ge => sf == of,
            Condition::L => sf != of,
            Condition::Le => zf || (sf != of),
            Condition::S => sf,
            Condition::Ns => !sf,
            Condition::O => of,
            Condition::No => !of,
            Condition::P => pf,
            Condition::Np => !pf,
        }
    }
}

/// Pointer size carried by an indirect operand; also used to pick the width
/// of an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Byte,
    Word,
    Dword,
    Qword,
}

impl Size {
    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Dword => 4,
            Size::Qword => 8,
        }
    }

    pub fn to_width(self) -> crate::registers::Width {
        match self {
            Size::Byte => crate::registers::Width::Byte,
            Size::Word => crate::registers::Width::Word,
            Size::Dword => crate::registers::Width::Dword,
            Size::Qword => crate::registers::Width::Qword,
        }
    }

    /// Inverse of `self as i64`, used to smuggle a pointer size through an
    /// `Operand::Imm` for `STOS` (whose decoded form has no other slot for
    /// it).
    pub fn from_encoded(v: i64) -> Size {
        match v {
            0 => Size::Byte,
            1 => Size::Word,
            2 => Size::Dword,
            _ => Size::Qword,
        }
    }
}

/// `base? + index? * scale? + displacement?`, wrapping in 64 bits (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indirect {
    pub base: Option<Gpr>,
    pub index: Option<Gpr>,
    pub scale: u8,
    pub displacement: i64,
    pub pointer_size: Size,
    /// Whether `base`/`index` are read as the 32-bit or 64-bit view of
    /// their slot (an address-size override prefix selects 32-bit).
    pub address_width: Size,
}

impl Indirect {
    pub fn effective_address(&self, regs: &crate::registers::RegisterFile) -> u64 {
        let read = |reg: Gpr| -> u64 {
            let view = GprView::new(reg, self.address_width.to_width());
            regs.get(view)
        };
        let base = self.base.map(read).unwrap_or(0);
        let index = self.index.map(read).unwrap_or(0);
        let scale = self.scale as u64;
        base.wrapping_add(index.wrapping_mul(scale)).wrapping_add(self.displacement as u64)
    }
}

/// One operand: immediate, register, segment register, or indirect memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Imm(i64),
    Reg(GprView),
    SReg(Segment),
    Mem(Indirect),
}

impl Operand {
    pub fn size(self) -> Size {
        match self {
            Operand::Imm(_) => Size::Qword,
            Operand::Reg(view) => match view.width {
                crate::registers::Width::Byte | crate::registers::Width::ByteHigh => Size::Byte,
                crate::registers::Width::Word => Size::Word,
                crate::registers::Width::Dword => Size::Dword,
                crate::registers::Width::Qword => Size::Qword,
            },
            Operand::SReg(_) => Size::Word,
            Operand::Mem(ind) => ind.pointer_size,
        }
    }
}

/// An opaque, fully decoded instruction record: an opcode, an optional
/// `REP` prefix, and up to two operands (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub rep: bool,
    pub operands: [Option<Operand>; 2],
}

impl Instruction {
    pub fn new(opcode: Opcode, rep: bool, operands: [Option<Operand>; 2]) -> Self {
        Instruction { opcode, rep, operands }
    }

    pub fn dst(&self) -> Option<Operand> {
        self.operands[0]
    }

    pub fn src(&self) -> Option<Operand> {
        self.operands[1]
    }
}
