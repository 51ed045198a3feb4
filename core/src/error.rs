//! Closed error surface for the emulator core (§7).
//!
//! Every fallible operation in `amd64_emu_core` returns one of these kinds.
//! Nothing here is retried and nothing is swallowed; `execute_one` aborts on
//! the first error and it propagates unchanged out of `execute`.

use thiserror::Error;

/// The kind of memory access that triggered a `PermissionDenied` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
            AccessKind::Execute => "execute",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum EmuError {
    #[error("invalid ELF: {0}")]
    InvalidElf(String),

    #[error("unsupported instruction: {opcode} {operands}")]
    UnsupportedInstruction { opcode: String, operands: String },

    #[error("invalid instruction: {0}")]
    InvalidInstruction(String),

    #[error("permission denied: {kind} at {address:#018x}")]
    PermissionDenied { address: u64, kind: AccessKind },

    #[error("uninitialized read at {0:#018x}")]
    UninitializedRead(u64),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("unsupported syscall number: {0}")]
    UnsupportedSyscall(u64),

    #[error("unsupported cpuid leaf: {0:#x}")]
    UnsupportedCpuidLeaf(u64),

    #[error("section {0} lies outside any loaded segment")]
    SectionOutsideAnySegment(String),

    #[error("emulation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ELF parse error: {0}")]
    ElfParse(#[from] goblin::error::Error),
}

pub type EmuResult<T> = Result<T, EmuError>;
