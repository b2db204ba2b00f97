//! System interconnect (bus) for memory and MMIO access.
//!
//! This module implements the physical memory map: an ordered collection of
//! non-overlapping address ranges, each either RAM or an opaque MMIO device.
//! Accesses wider than a device's declared [`Device::width_mask`] are split
//! into two narrower transactions when 32-bit support exists, or silently
//! dropped/zeroed otherwise — this mirrors the legacy firmware's tolerance
//! for partial MMIO decoders.

use super::devices::Device;
use super::traits::width;

/// System bus connecting CPU and devices; routes accesses by physical address.
pub struct Bus {
    /// Registered MMIO and memory devices (boxed for dynamic dispatch; `Send + Sync` for thread safety).
    devices: Vec<Box<dyn Device + Send + Sync>>,
    last_device_idx: usize,
    ram_idx: Option<usize>,
}

impl Bus {
    /// Creates a new, empty bus.
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            last_device_idx: 0,
            ram_idx: None,
        }
    }

    /// Registers a device on the bus; devices are sorted by base address for lookup.
    pub fn add_device(&mut self, dev: Box<dyn Device + Send + Sync>) {
        self.devices.push(dev);
        self.devices.sort_by_key(|d| d.address_range().0);
        self.ram_idx = self.devices.iter().position(|d| d.name() == "DRAM");
        self.last_device_idx = 0;
    }

    /// Writes a binary blob into memory at the given physical address.
    pub fn load_binary_at(&mut self, data: &[u8], addr: u64) {
        if let Some((dev, offset)) = self.find_device(addr) {
            let (_, size) = dev.address_range();
            if offset + (data.len() as u64) <= size {
                dev.write_bytes(offset, data);
                return;
            }
        }
        for (i, byte) in data.iter().enumerate() {
            self.write_u8(addr + i as u64, *byte);
        }
    }

    /// Returns whether the given physical address is backed by any registered range.
    pub fn is_valid_address(&self, paddr: u64) -> bool {
        self.devices
            .iter()
            .any(|d| {
                let (start, size) = d.address_range();
                paddr >= start && paddr < start + size
            })
    }

    /// Advances all devices by one tick and updates the PLIC; returns IRQ flags.
    ///
    /// Returns `(timer_irq, meip, seip)` for the machine timer, machine
    /// external, and supervisor external interrupt lines.
    pub fn tick(&mut self) -> (bool, bool, bool) {
        let mut timer_irq = false;
        let mut active_irqs = 0u64;

        for dev in &mut self.devices {
            if dev.tick() {
                if let Some(id) = dev.get_irq_id() {
                    if id < 64 {
                        active_irqs |= 1 << id;
                    }
                }
                if dev.name() == "CLINT" {
                    timer_irq = true;
                }
            }
        }

        let (meip, seip) = if let Some(plic) = self.find_plic() {
            plic.update_irqs(active_irqs);
            plic.check_interrupts()
        } else {
            (false, false)
        };

        (timer_irq, meip, seip)
    }

    /// Returns a raw pointer and (base, end) for the RAM region if present.
    pub fn get_ram_info(&mut self) -> Option<(*mut u8, u64, u64)> {
        if let Some(idx) = self.ram_idx {
            if let Some(mem) = self.devices[idx].as_memory_mut() {
                let (base, size) = mem.address_range();
                return Some((mem.as_mut_ptr(), base, base + size));
            }
        }
        None
    }

    fn find_plic(&mut self) -> Option<&mut crate::soc::devices::Plic> {
        self.devices.iter_mut().find_map(|d| d.as_plic_mut())
    }

    fn find_device(&mut self, paddr: u64) -> Option<(&mut Box<dyn Device + Send + Sync>, u64)> {
        if self.last_device_idx < self.devices.len() {
            let (start, size) = self.devices[self.last_device_idx].address_range();
            if paddr >= start && paddr < start + size {
                return Some((&mut self.devices[self.last_device_idx], paddr - start));
            }
        }

        if let Some(idx) = self.ram_idx {
            let (start, size) = self.devices[idx].address_range();
            if paddr >= start && paddr < start + size {
                self.last_device_idx = idx;
                return Some((&mut self.devices[idx], paddr - start));
            }
        }

        for (i, dev) in self.devices.iter_mut().enumerate() {
            let (start, size) = dev.address_range();
            if paddr >= start && paddr < start + size {
                self.last_device_idx = i;
                return Some((dev, paddr - start));
            }
        }
        None
    }

    /// Reads one byte at the given physical address; returns 0 if no device claims the address.
    pub fn read_u8(&mut self, paddr: u64) -> u8 {
        match self.find_device(paddr) {
            Some((dev, offset)) if dev.width_mask() & width::BYTE != 0 => dev.read_u8(offset),
            _ => 0,
        }
    }

    /// Reads two bytes (little-endian) at the given physical address; returns 0 if unclaimed.
    pub fn read_u16(&mut self, paddr: u64) -> u16 {
        match self.find_device(paddr) {
            Some((dev, offset)) if dev.width_mask() & width::HALF != 0 => dev.read_u16(offset),
            _ => 0,
        }
    }

    /// Reads four bytes (little-endian) at the given physical address; returns 0 if unclaimed.
    pub fn read_u32(&mut self, paddr: u64) -> u32 {
        match self.find_device(paddr) {
            Some((dev, offset)) if dev.width_mask() & width::WORD != 0 => dev.read_u32(offset),
            _ => 0,
        }
    }

    /// Reads eight bytes (little-endian) at the given physical address.
    ///
    /// If the owning device supports 64-bit access directly, reads it in one
    /// transaction; if it only supports 32-bit, splits into two word reads
    /// (low half first); otherwise the access silently returns 0.
    pub fn read_u64(&mut self, paddr: u64) -> u64 {
        let mask = match self.find_device(paddr) {
            Some((dev, _)) => dev.width_mask(),
            None => return 0,
        };
        if mask & width::DWORD != 0 {
            self.find_device(paddr)
                .map(|(dev, offset)| dev.read_u64(offset))
                .unwrap_or(0)
        } else if mask & width::WORD != 0 {
            let lo = self.read_u32(paddr) as u64;
            let hi = self.read_u32(paddr + 4) as u64;
            lo | (hi << 32)
        } else {
            0
        }
    }

    /// Writes one byte at the given physical address; no-op if unclaimed or unsupported.
    pub fn write_u8(&mut self, paddr: u64, val: u8) {
        if let Some((dev, offset)) = self.find_device(paddr) {
            if dev.width_mask() & width::BYTE != 0 {
                dev.write_u8(offset, val);
            }
        }
    }

    /// Writes two bytes (little-endian) at the given physical address.
    pub fn write_u16(&mut self, paddr: u64, val: u16) {
        if let Some((dev, offset)) = self.find_device(paddr) {
            if dev.width_mask() & width::HALF != 0 {
                dev.write_u16(offset, val);
            }
        }
    }

    /// Writes four bytes (little-endian) at the given physical address.
    pub fn write_u32(&mut self, paddr: u64, val: u32) {
        if let Some((dev, offset)) = self.find_device(paddr) {
            if dev.width_mask() & width::WORD != 0 {
                dev.write_u32(offset, val);
            }
        }
    }

    /// Writes eight bytes (little-endian) at the given physical address.
    ///
    /// Split into two 32-bit writes (low half first) if the device lacks
    /// native 64-bit support; dropped entirely if it lacks 32-bit support too.
    pub fn write_u64(&mut self, paddr: u64, val: u64) {
        let mask = match self.find_device(paddr) {
            Some((dev, _)) => dev.width_mask(),
            None => return,
        };
        if mask & width::DWORD != 0 {
            if let Some((dev, offset)) = self.find_device(paddr) {
                dev.write_u64(offset, val);
            }
        } else if mask & width::WORD != 0 {
            self.write_u32(paddr, val as u32);
            self.write_u32(paddr + 4, (val >> 32) as u32);
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
