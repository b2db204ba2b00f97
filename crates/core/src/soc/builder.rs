//! System-on-Chip construction and top-level `System` type.
//!
//! This module builds the complete SoC from configuration. It performs:
//! 1. **Bus setup:** Creates the interconnect.
//! 2. **Device registration:** Instantiates RAM, CLINT, PLIC, and HTIF.
//! 3. **Binary loading:** Loads a kernel/firmware image via `load_binary_at`.

use crate::config::Config;
use crate::soc::devices::{Clint, Htif, Plic};
use crate::soc::interconnect::Bus;
use crate::soc::memory::Memory;
use crate::soc::memory::buffer::DramBuffer;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Top-level system instance containing the bus and the exit-request flag.
///
/// Holds the interconnect (`Bus`) and an atomic exit code that [`Htif`] stores
/// into once the guest requests a power-off through `tohost`.
pub struct System {
    /// System interconnect; routes accesses to RAM and MMIO devices.
    pub bus: Bus,
    /// Atomic exit code: when not `u64::MAX`, simulation should stop and use this as exit code.
    pub exit_request: Arc<AtomicU64>,
}

impl System {
    /// Builds a new system from configuration.
    ///
    /// Creates the bus, RAM, CLINT, PLIC, and HTIF. RAM and device base
    /// addresses are all taken from `config.system`/`config.memory`.
    ///
    /// # Arguments
    ///
    /// * `config` - Simulator configuration (general, system, memory).
    ///
    /// # Returns
    ///
    /// A fully constructed `System` ready for simulation.
    pub fn new(config: &Config) -> Self {
        let mut bus = Bus::new();
        let exit_request = Arc::new(AtomicU64::new(u64::MAX));

        let ram_base = config.system.ram_base;
        let ram_size = config.memory.ram_size;
        let ram_buffer = Arc::new(DramBuffer::new(ram_size));
        let mem = Memory::new(ram_buffer, ram_base);

        let clint = Clint::new(config.system.clint_base, config.system.clint_divider);
        let plic = Plic::new(config.system.plic_base);
        let htif = Htif::new(config.system.htif_base, exit_request.clone());

        bus.add_device(Box::new(mem));
        bus.add_device(Box::new(clint));
        bus.add_device(Box::new(plic));
        bus.add_device(Box::new(htif));

        Self { bus, exit_request }
    }

    /// Loads a binary into memory at the given physical address.
    ///
    /// # Arguments
    ///
    /// * `data` - Raw bytes to write.
    /// * `addr` - Physical base address for the write.
    pub fn load_binary_at(&mut self, data: &[u8], addr: u64) {
        self.bus.load_binary_at(data, addr);
    }

    /// Advances all devices by one tick; returns (timer_irq, meip, seip).
    ///
    /// # Returns
    ///
    /// A tuple of (machine timer IRQ active, machine external IRQ pending, supervisor external IRQ pending).
    pub fn tick(&mut self) -> (bool, bool, bool) {
        self.bus.tick()
    }

    /// Returns the requested exit code if a device has requested shutdown.
    ///
    /// # Returns
    ///
    /// `Some(exit_code)` if exit was requested, otherwise `None`.
    pub fn check_exit(&self) -> Option<u64> {
        let val = self.exit_request.load(std::sync::atomic::Ordering::Relaxed);
        if val != u64::MAX { Some(val) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_system_has_no_pending_exit() {
        let system = System::new(&Config::default());
        assert_eq!(system.check_exit(), None);
    }

    #[test]
    fn devices_are_reachable_at_their_configured_bases() {
        let config = Config::default();
        let mut system = System::new(&config);
        assert!(system.bus.is_valid_address(config.system.ram_base));
        assert!(system.bus.is_valid_address(config.system.clint_base));
        assert!(system.bus.is_valid_address(config.system.plic_base));
        assert!(system.bus.is_valid_address(config.system.htif_base));
    }
}
