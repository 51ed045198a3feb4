//! Auxiliary-vector builder (§2.H, §4.E step 4, §6): the closed set of
//! `AT_*` entries written onto the initial stack, each a little-endian
//! `(type_code, value)` pair terminated by `(AT_NULL, 0)`.

pub const AT_NULL: u64 = 0;
pub const AT_PHDR: u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;
pub const AT_UID: u64 = 11;
pub const AT_EUID: u64 = 12;
pub const AT_GID: u64 = 13;
pub const AT_EGID: u64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxEntry {
    pub key: u64,
    pub value: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct AuxvInputs {
    pub phdr_address: u64,
    pub phent_size: u64,
    pub phnum: u64,
    pub uid: u64,
    pub euid: u64,
    pub gid: u64,
    pub egid: u64,
}

/// Builds the closed-set auxv entry list; other `AT_*` values are never
/// produced and must be ignored by any reader, per §4.E.
pub fn build(inputs: AuxvInputs) -> Vec<AuxEntry> {
    vec![
        AuxEntry { key: AT_PHDR, value: inputs.phdr_address },
        AuxEntry { key: AT_PHENT, value: inputs.phent_size },
        AuxEntry { key: AT_PHNUM, value: inputs.phnum },
        AuxEntry { key: AT_UID, value: inputs.uid },
        AuxEntry { key: AT_EUID, value: inputs.euid },
        AuxEntry { key: AT_GID, value: inputs.gid },
        AuxEntry { key: AT_EGID, value: inputs.egid },
        AuxEntry { key: AT_NULL, value: 0 },
    ]
}
