//! Initial stack frame layout (§4.E step 4, §6), isolated as a pure
//! function from inputs to a byte buffer plus base address per §9's design
//! note — keeps permission-setting, zero-fill, and frame construction from
//! tangling together the way the design note warns against.

use super::auxv::AuxEntry;

pub struct StackFrame {
    pub base_address: u64,
    pub bytes: Vec<u8>,
}

/// Lays out `argc, argv[], NULL, envp[], NULL, auxv pairs, AT_NULL, strings`
/// directly below `stack_top`, returning the address the frame starts at
/// (the value `RSP` must be set to) and the bytes to write there.
pub fn build_stack_frame(stack_top: u64, argv: &[String], envp: &[String], auxv: &[AuxEntry]) -> StackFrame {
    let pointer_slots = 1 + (argv.len() + 1) + (envp.len() + 1) + auxv.len() * 2;
    let pointer_table_bytes = (pointer_slots as u64) * 8;

    let mut string_blob = Vec::new();
    let mut string_offsets = Vec::with_capacity(argv.len() + envp.len());
    for s in argv.iter().chain(envp.iter()) {
        string_offsets.push(string_blob.len() as u64);
        string_blob.extend_from_slice(s.as_bytes());
        string_blob.push(0);
    }
    while string_blob.len() % 8 != 0 {
        string_blob.push(0);
    }

    let total_size = pointer_table_bytes + string_blob.len() as u64;
    let base_address = stack_top - total_size;
    let string_blob_base = base_address + pointer_table_bytes;

    let mut bytes = Vec::with_capacity(total_size as usize);
    bytes.extend_from_slice(&(argv.len() as u64).to_le_bytes());
    for i in 0..argv.len() {
        let ptr = string_blob_base + string_offsets[i];
        bytes.extend_from_slice(&ptr.to_le_bytes());
    }
    bytes.extend_from_slice(&0u64.to_le_bytes());
    for i in 0..envp.len() {
        let ptr = string_blob_base + string_offsets[argv.len() + i];
        bytes.extend_from_slice(&ptr.to_le_bytes());
    }
    bytes.extend_from_slice(&0u64.to_le_bytes());
    for entry in auxv {
        bytes.extend_from_slice(&entry.key.to_le_bytes());
        bytes.extend_from_slice(&entry.value.to_le_bytes());
    }
    bytes.extend_from_slice(&string_blob);

    StackFrame { base_address, bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::auxv::{AuxEntry, AT_NULL, AT_PHDR};

    #[test]
    fn layout_matches_the_documented_offsets() {
        let argv = vec!["prog".to_string()];
        let envp = vec!["HOME=/root".to_string()];
        let auxv = vec![
            AuxEntry { key: AT_PHDR, value: 0x400040 },
            AuxEntry { key: AT_NULL, value: 0 },
        ];
        let frame = build_stack_frame(0x8000, &argv, &envp, &auxv);

        let argc = u64::from_le_bytes(frame.bytes[0..8].try_into().unwrap());
        assert_eq!(argc, 1);

        let argv0_ptr = u64::from_le_bytes(frame.bytes[8..16].try_into().unwrap());
        let argv_null = u64::from_le_bytes(frame.bytes[16..24].try_into().unwrap());
        assert_eq!(argv_null, 0);

        let envp0_ptr = u64::from_le_bytes(frame.bytes[24..32].try_into().unwrap());
        let envp_null = u64::from_le_bytes(frame.bytes[32..40].try_into().unwrap());
        assert_eq!(envp_null, 0);

        let aux0_type = u64::from_le_bytes(frame.bytes[40..48].try_into().unwrap());
        let aux0_val = u64::from_le_bytes(frame.bytes[48..56].try_into().unwrap());
        assert_eq!(aux0_type, AT_PHDR);
        assert_eq!(aux0_val, 0x400040);
        let aux1_type = u64::from_le_bytes(frame.bytes[56..64].try_into().unwrap());
        assert_eq!(aux1_type, AT_NULL);

        let argv0_offset = (argv0_ptr - frame.base_address) as usize;
        assert_eq!(&frame.bytes[argv0_offset..argv0_offset + 5], b"prog\0");

        let envp0_offset = (envp0_ptr - frame.base_address) as usize;
        assert_eq!(&frame.bytes[envp0_offset..envp0_offset + 11], b"HOME=/root\0");

        assert_eq!(frame.bytes.len() % 8, 0);
        assert_eq!(frame.base_address + frame.bytes.len() as u64, 0x8000);
    }
}
