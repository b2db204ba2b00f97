//! Memory Access Logic.
//!
//! This module is the interface between the interpreter and the memory
//! subsystem. It performs the following:
//! 1. **Address Translation:** Computes effective privilege and consults the MMU.
//! 2. **Load/Store:** Services aligned accesses directly and splits misaligned
//!    ones into byte transactions when the configured policy allows it.

use super::Cpu;
use crate::common::{AccessType, PhysAddr, Trap, VirtAddr};
use crate::core::arch::csr;
use crate::core::arch::mode::PrivilegeMode;
use crate::core::units::lsu::unaligned::{is_aligned, split_load, split_store};

impl Cpu {
    /// Translates a virtual address to a physical address for the given access type.
    ///
    /// Fetches always use the current privilege mode. Loads and stores use
    /// `mstatus.MPP` instead when `mstatus.MPRV` is set, per §4.2: this lets
    /// a trap handler running in M-mode service a user-mode page fault using
    /// the faulting mode's mappings.
    pub fn translate(&mut self, vaddr: u64, access: AccessType) -> Result<PhysAddr, Trap> {
        self.translate_with_addend(vaddr, access).map(|(paddr, _)| paddr)
    }

    /// Like [`Cpu::translate`], but also surfaces the RAM host-pointer
    /// fast-path addend when the resolved page is RAM-backed and outside
    /// the HTIF MMIO window, so callers can bypass the bus entirely.
    pub(crate) fn translate_with_addend(
        &mut self,
        vaddr: u64,
        access: AccessType,
    ) -> Result<(PhysAddr, Option<u64>), Trap> {
        let effective_priv = if access != AccessType::Fetch
            && (self.csrs.mstatus & csr::MSTATUS_MPRV) != 0
        {
            let mpp = (self.csrs.mstatus >> csr::MSTATUS_MPP_SHIFT) & csr::MSTATUS_MPP_MASK;
            PrivilegeMode::from_u8(mpp as u8)
        } else {
            self.privilege
        };

        let result = self.mmu.translate(
            VirtAddr::new(vaddr),
            access,
            effective_priv,
            &self.csrs,
            &mut self.bus.bus,
            self.ram_info(),
        );
        match result.trap {
            Some(trap) => Err(trap),
            None => {
                let in_htif = self
                    .htif_range
                    .is_some_and(|(lo, hi)| result.paddr.val() >= lo && result.paddr.val() < hi);
                let addend = if in_htif { None } else { result.host_addend };
                Ok((result.paddr, addend))
            }
        }
    }

    /// Reads `size` bytes (1, 2, 4, or 8) starting at `vaddr`.
    fn load(&mut self, vaddr: u64, size: u64) -> Result<u64, Trap> {
        if !is_aligned(vaddr, size) {
            if !self.misaligned_access_enabled {
                return Err(Trap::LoadAddressMisaligned(vaddr));
            }
            // Walk every byte before reading any of them, so a fault partway
            // through never leaves a partially-read value observable.
            let mut paddrs = [0u64; 8];
            for (i, slot) in paddrs.iter_mut().enumerate().take(size as usize) {
                *slot = self.translate(vaddr + i as u64, AccessType::Read)?.val();
            }
            return Ok(split_load(vaddr, size, |a| {
                self.bus.bus.read_u8(paddrs[(a - vaddr) as usize])
            }));
        }

        let (paddr, host_addend) = self.translate_with_addend(vaddr, AccessType::Read)?;
        if let Some(addend) = host_addend {
            // SAFETY: `addend` only comes from a RAM-backed translation, so
            // `host_ptr` points `size` readable bytes inside `self.ram_ptr`'s
            // allocation (checked against `ram_start`/`ram_end` by the MMU).
            // `read_unaligned` tolerates any host alignment.
            return Ok(unsafe {
                let host_ptr = paddr.val().wrapping_add(addend) as *const u8;
                match size {
                    1 => u64::from(host_ptr.read()),
                    2 => u64::from(host_ptr.cast::<u16>().read_unaligned()),
                    4 => u64::from(host_ptr.cast::<u32>().read_unaligned()),
                    8 => host_ptr.cast::<u64>().read_unaligned(),
                    _ => unreachable!("load size must be 1, 2, 4, or 8"),
                }
            });
        }
        Ok(match size {
            1 => u64::from(self.bus.bus.read_u8(paddr.val())),
            2 => u64::from(self.bus.bus.read_u16(paddr.val())),
            4 => u64::from(self.bus.bus.read_u32(paddr.val())),
            8 => self.bus.bus.read_u64(paddr.val()),
            _ => unreachable!("load size must be 1, 2, 4, or 8"),
        })
    }

    /// Writes the low `size` bytes of `val` (1, 2, 4, or 8) starting at `vaddr`.
    fn store(&mut self, vaddr: u64, val: u64, size: u64) -> Result<(), Trap> {
        if !is_aligned(vaddr, size) {
            if !self.misaligned_access_enabled {
                return Err(Trap::StoreAddressMisaligned(vaddr));
            }
            let mut paddrs = [0u64; 8];
            for (i, slot) in paddrs.iter_mut().enumerate().take(size as usize) {
                *slot = self.translate(vaddr + i as u64, AccessType::Write)?.val();
            }
            split_store(vaddr, size, val, |a, byte| {
                self.bus.bus.write_u8(paddrs[(a - vaddr) as usize], byte);
            });
            return Ok(());
        }

        let (paddr, host_addend) = self.translate_with_addend(vaddr, AccessType::Write)?;
        if let Some(addend) = host_addend {
            // SAFETY: see the matching comment in `load`.
            unsafe {
                let host_ptr = paddr.val().wrapping_add(addend) as *mut u8;
                match size {
                    1 => host_ptr.write(val as u8),
                    2 => host_ptr.cast::<u16>().write_unaligned(val as u16),
                    4 => host_ptr.cast::<u32>().write_unaligned(val as u32),
                    8 => host_ptr.cast::<u64>().write_unaligned(val),
                    _ => unreachable!("store size must be 1, 2, 4, or 8"),
                }
            }
            return Ok(());
        }
        match size {
            1 => self.bus.bus.write_u8(paddr.val(), val as u8),
            2 => self.bus.bus.write_u16(paddr.val(), val as u16),
            4 => self.bus.bus.write_u32(paddr.val(), val as u32),
            8 => self.bus.bus.write_u64(paddr.val(), val),
            _ => unreachable!("store size must be 1, 2, 4, or 8"),
        }
        Ok(())
    }

    /// Reads a byte, sign-extended to 64 bits.
    pub fn read_i8(&mut self, vaddr: u64) -> Result<u64, Trap> {
        self.load(vaddr, 1).map(|v| (v as i8) as i64 as u64)
    }
    /// Reads a byte, zero-extended to 64 bits.
    pub fn read_u8(&mut self, vaddr: u64) -> Result<u64, Trap> {
        self.load(vaddr, 1)
    }
    /// Reads a halfword, sign-extended to 64 bits.
    pub fn read_i16(&mut self, vaddr: u64) -> Result<u64, Trap> {
        self.load(vaddr, 2).map(|v| (v as i16) as i64 as u64)
    }
    /// Reads a halfword, zero-extended to 64 bits.
    pub fn read_u16(&mut self, vaddr: u64) -> Result<u64, Trap> {
        self.load(vaddr, 2)
    }
    /// Reads a word, sign-extended to 64 bits.
    pub fn read_i32(&mut self, vaddr: u64) -> Result<u64, Trap> {
        self.load(vaddr, 4).map(|v| (v as i32) as i64 as u64)
    }
    /// Reads a word, zero-extended to 64 bits.
    pub fn read_u32(&mut self, vaddr: u64) -> Result<u64, Trap> {
        self.load(vaddr, 4)
    }
    /// Reads a doubleword.
    pub fn read_u64(&mut self, vaddr: u64) -> Result<u64, Trap> {
        self.load(vaddr, 8)
    }

    /// Writes a byte.
    pub fn write_u8(&mut self, vaddr: u64, val: u64) -> Result<(), Trap> {
        self.store(vaddr, val, 1)
    }
    /// Writes a halfword.
    pub fn write_u16(&mut self, vaddr: u64, val: u64) -> Result<(), Trap> {
        self.store(vaddr, val, 2)
    }
    /// Writes a word.
    pub fn write_u32(&mut self, vaddr: u64, val: u64) -> Result<(), Trap> {
        self.store(vaddr, val, 4)
    }
    /// Writes a doubleword.
    pub fn write_u64(&mut self, vaddr: u64, val: u64) -> Result<(), Trap> {
        self.store(vaddr, val, 8)
    }

    /// Invalidates TLB entries that might be stale after a host-side write to
    /// RAM (e.g. a kernel/bootloader image load bypassing the CPU).
    ///
    /// Each TLB is indexed by virtual page, not physical range, so a write to
    /// a given physical/host range cannot be mapped back to just the virtual
    /// pages that might cache it (several VPNs can alias the same PPN under
    /// different page tables); a full flush is the conservative,
    /// always-correct response.
    pub fn flush_tlb_write_range(&mut self, _host_ptr: *const u8, _size: usize) {
        self.mmu.flush_all();
    }
}
