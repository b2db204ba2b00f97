//! Configuration system for the RISC-V simulator.
//!
//! This module defines the configuration structures used to parameterize the
//! simulator: boot parameters, the physical memory map, TLB sizing, the
//! misaligned-access policy, and the name of the "terminating event" a
//! validation workload signals through CSR `0x8D1` (§4.9).
//!
//! Configuration is supplied as JSON (`serde_json`) by an embedding host, or
//! via `Config::default()` for standalone use.

use serde::Deserialize;

/// Default configuration constants for the simulator.
mod defaults {
    /// Base address of main system RAM.
    pub const RAM_BASE: u64 = 0x8000_0000;

    /// Total size of main system RAM (128 MiB).
    pub const RAM_SIZE: usize = 128 * 1024 * 1024;

    /// Offset from RAM base where kernel images are loaded (2 MiB).
    pub const KERNEL_OFFSET: u64 = 0x0020_0000;

    /// Base address of the CLINT (Core Local Interruptor) MMIO region.
    pub const CLINT_BASE: u64 = 0x0200_0000;

    /// Base address of the PLIC MMIO region.
    pub const PLIC_BASE: u64 = 0x4010_0000;

    /// Base address of the HTIF tohost/fromhost mailbox.
    pub const HTIF_BASE: u64 = 0x4000_8000;

    /// CLINT timer divider (mtime increments every N cycles).
    pub const CLINT_DIVIDER: u64 = 10;

    /// Entry count for each of the three (read/write/code) TLB arrays.
    pub const TLB_SIZE: usize = crate::common::constants::TLB_ENTRIES;

    /// Default name of the CSR-0x8D1 event that ends a run.
    pub const TERMINATING_EVENT: &str = "exit";
}

/// Root configuration structure containing all simulator settings.
///
/// # Examples
///
/// ```
/// use riscv_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.general.trace_instructions, false);
/// assert!(config.general.misaligned_access_enabled);
/// ```
///
/// ```
/// use riscv_core::config::Config;
///
/// let json = r#"{
///     "general": { "trace_instructions": true, "terminating_event": "linux-boot" },
///     "system": { "ram_base": 2147483648, "ram_size": 134217728 },
///     "memory": { "tlb_size": 256 }
/// }"#;
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.general.terminating_event, "linux-boot");
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// General simulation settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Physical memory map and device base addresses.
    #[serde(default)]
    pub system: SystemConfig,
    /// Main memory and TLB sizing.
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            system: SystemConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// General simulation settings and options.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Enable per-instruction tracing (independent of the `always-trace` feature gate).
    #[serde(default)]
    pub trace_instructions: bool,

    /// Initial PC value (defaults to RAM base).
    #[serde(default = "GeneralConfig::default_start_pc")]
    pub start_pc: u64,

    /// Whether misaligned loads/stores are split and serviced rather than
    /// trapped (§4.5). Modeled as a config flag rather than a compile-time
    /// constant so one binary can serve both policies.
    #[serde(default = "GeneralConfig::default_misaligned_access_enabled")]
    pub misaligned_access_enabled: bool,

    /// Name of the validation event (written to CSR `0x8D1`, §4.9) that ends the run.
    #[serde(default = "GeneralConfig::default_terminating_event")]
    pub terminating_event: String,
}

impl GeneralConfig {
    fn default_start_pc() -> u64 {
        defaults::RAM_BASE
    }

    fn default_misaligned_access_enabled() -> bool {
        true
    }

    fn default_terminating_event() -> String {
        defaults::TERMINATING_EVENT.to_string()
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            trace_instructions: false,
            start_pc: defaults::RAM_BASE,
            misaligned_access_enabled: Self::default_misaligned_access_enabled(),
            terminating_event: Self::default_terminating_event(),
        }
    }
}

/// Physical memory map configuration: RAM base/size and device base addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Main RAM base address.
    #[serde(default = "SystemConfig::default_ram_base")]
    pub ram_base: u64,

    /// CLINT MMIO base address.
    #[serde(default = "SystemConfig::default_clint_base")]
    pub clint_base: u64,

    /// PLIC MMIO base address.
    #[serde(default = "SystemConfig::default_plic_base")]
    pub plic_base: u64,

    /// HTIF tohost/fromhost MMIO base address.
    #[serde(default = "SystemConfig::default_htif_base")]
    pub htif_base: u64,

    /// Kernel load offset from RAM base.
    #[serde(default = "SystemConfig::default_kernel_offset")]
    pub kernel_offset: u64,

    /// CLINT timer divider (mtime increments every N cycles).
    #[serde(default = "SystemConfig::default_clint_divider")]
    pub clint_divider: u64,
}

impl SystemConfig {
    fn default_ram_base() -> u64 {
        defaults::RAM_BASE
    }

    fn default_clint_base() -> u64 {
        defaults::CLINT_BASE
    }

    fn default_plic_base() -> u64 {
        defaults::PLIC_BASE
    }

    fn default_htif_base() -> u64 {
        defaults::HTIF_BASE
    }

    fn default_kernel_offset() -> u64 {
        defaults::KERNEL_OFFSET
    }

    fn default_clint_divider() -> u64 {
        defaults::CLINT_DIVIDER
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            ram_base: defaults::RAM_BASE,
            clint_base: defaults::CLINT_BASE,
            plic_base: defaults::PLIC_BASE,
            htif_base: defaults::HTIF_BASE,
            kernel_offset: defaults::KERNEL_OFFSET,
            clint_divider: defaults::CLINT_DIVIDER,
        }
    }
}

/// Main memory and TLB sizing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// RAM size in bytes.
    #[serde(default = "MemoryConfig::default_ram_size")]
    pub ram_size: usize,

    /// Entry count for each of the three (read/write/code) TLB arrays.
    #[serde(default = "MemoryConfig::default_tlb_size")]
    pub tlb_size: usize,
}

impl MemoryConfig {
    fn default_ram_size() -> usize {
        defaults::RAM_SIZE
    }

    fn default_tlb_size() -> usize {
        defaults::TLB_SIZE
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ram_size: defaults::RAM_SIZE,
            tlb_size: defaults::TLB_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_doc_example() {
        let config = Config::default();
        assert_eq!(config.system.ram_base, 0x8000_0000);
        assert_eq!(config.memory.tlb_size, 256);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"general":{"trace_instructions":true}}"#)
            .expect("deserialize");
        assert!(config.general.trace_instructions);
        assert_eq!(config.system.ram_base, defaults::RAM_BASE);
    }
}
