//! `Config`/`ExecutionContext` (§4.F): the emulator's tunable knobs and the
//! CPU+Memory pair they configure, bundled the way a caller actually wants to
//! hold and pass them around.

use crate::cpu::{Cpu, CpuidProfile};
use crate::memory::{FillPolicy, Memory};

/// Every knob named in §4.F, with the three named presets.
#[derive(Debug, Clone)]
pub struct Config {
    pub memory_initializer: FillPolicy,
    pub break_on_wrong_permissions: bool,
    pub break_on_uninitialized_read: bool,
    pub check_instructions: bool,
    pub base_address: u64,
    pub base_stack_address: u64,
    pub stack_size: u64,
    pub cpuid_profile: CpuidProfile,
}

impl Config {
    /// Every check on, `Random` fill. What callers should reach for unless
    /// they have a specific reason not to (`default()` is this preset).
    pub fn safe() -> Self {
        Config {
            memory_initializer: FillPolicy::Random,
            break_on_wrong_permissions: true,
            break_on_uninitialized_read: true,
            check_instructions: true,
            base_address: 0x0040_0000,
            base_stack_address: 0x7FFF_FFFF_F000,
            stack_size: 8 * 1024 * 1024,
            cpuid_profile: CpuidProfile::default(),
        }
    }

    /// Every check off. Same fill policy as `safe()` — only the checks are
    /// relaxed, trading early failure for raw speed.
    pub fn fast() -> Self {
        Config {
            break_on_wrong_permissions: false,
            break_on_uninitialized_read: false,
            check_instructions: false,
            ..Config::safe()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::safe()
    }
}

/// A `Cpu` and its `Memory`, built from one `Config` so the two never drift
/// out of sync on the knobs that affect both (stack bounds, instruction
/// checking).
pub struct ExecutionContext {
    pub cpu: Cpu,
    pub memory: Memory,
}

impl ExecutionContext {
    pub fn new(config: &Config) -> Self {
        let cpu = Cpu::new(config.cpuid_profile.clone(), config.check_instructions);
        let memory = Memory::new(
            config.memory_initializer,
            config.break_on_wrong_permissions,
            config.break_on_uninitialized_read,
        );
        ExecutionContext { cpu, memory }
    }
}
