//! Device trait for memory-mapped I/O.
//!
//! This module defines the `Device` trait implemented by all bus-attached components. It provides:
//! 1. **Identification:** `name` and `address_range` for bus routing.
//! 2. **Access:** Byte, half, word, and doubleword read/write at device-relative offsets.
//! 3. **Capability:** `width_mask` advertises which access widths a device natively supports.
//! 4. **Lifecycle:** Optional `tick` and IRQ reporting for timer and interrupt devices.
//! 5. **Downcasting:** Optional cast to `Plic` or `Memory` for device-specific access.

use crate::soc::devices::Plic;
use crate::soc::memory::Memory;

/// Bit set in [`Device::width_mask`] for each access width the device natively handles.
pub mod width {
    /// 8-bit access supported.
    pub const BYTE: u8 = 1 << 0;
    /// 16-bit access supported.
    pub const HALF: u8 = 1 << 1;
    /// 32-bit access supported.
    pub const WORD: u8 = 1 << 2;
    /// 64-bit access supported.
    pub const DWORD: u8 = 1 << 3;
    /// All widths supported (the common case for RAM and most MMIO).
    pub const ALL: u8 = BYTE | HALF | WORD | DWORD;
}

/// Trait for memory-mapped I/O devices attached to the system bus.
///
/// Devices provide a name, address range, and read/write methods. Optional methods support
/// ticking (e.g., timers), IRQ reporting, and type-specific access (Plic, Memory).
pub trait Device: Send + Sync {
    /// Returns a short name for this device (e.g., `"CLINT"`, `"DRAM"`).
    fn name(&self) -> &str;
    /// Returns (base_address, size_in_bytes) for this device's MMIO or memory region.
    fn address_range(&self) -> (u64, u64);
    /// Reads one byte at the given device-relative offset.
    fn read_u8(&mut self, offset: u64) -> u8;
    /// Reads two bytes (little-endian) at the given offset.
    fn read_u16(&mut self, offset: u64) -> u16;
    /// Reads four bytes (little-endian) at the given offset.
    fn read_u32(&mut self, offset: u64) -> u32;
    /// Reads eight bytes (little-endian) at the given offset.
    fn read_u64(&mut self, offset: u64) -> u64;
    /// Writes one byte at the given offset.
    fn write_u8(&mut self, offset: u64, val: u8);
    /// Writes two bytes (little-endian) at the given offset.
    fn write_u16(&mut self, offset: u64, val: u16);
    /// Writes four bytes (little-endian) at the given offset.
    fn write_u32(&mut self, offset: u64, val: u32);
    /// Writes eight bytes (little-endian) at the given offset.
    fn write_u64(&mut self, offset: u64, val: u64);

    /// Writes a contiguous byte slice at the given offset (default: byte-by-byte).
    fn write_bytes(&mut self, offset: u64, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.write_u8(offset + i as u64, *byte);
        }
    }

    /// Access widths this device natively supports. Defaults to all widths;
    /// narrower devices override this so the bus can split or drop accesses
    /// per the legacy-compatible policy in [`crate::soc::interconnect::Bus`].
    fn width_mask(&self) -> u8 {
        width::ALL
    }

    /// Advances device state by one cycle; returns `true` if an IRQ was raised (e.g., timer).
    fn tick(&mut self) -> bool {
        false
    }
    /// Returns the IRQ ID for this device if it can raise interrupts (e.g., PLIC line).
    fn get_irq_id(&self) -> Option<u32> {
        None
    }

    /// Returns a mutable reference as `Plic` if this device is the PLIC; otherwise `None`.
    fn as_plic_mut(&mut self) -> Option<&mut Plic> {
        None
    }
    /// Returns a mutable reference as `Memory` if this device is RAM; otherwise `None`.
    fn as_memory_mut(&mut self) -> Option<&mut Memory> {
        None
    }
}
