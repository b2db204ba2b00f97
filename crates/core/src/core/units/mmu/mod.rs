//! Memory Management Unit (MMU).
//!
//! This module implements the Memory Management Unit, responsible for
//! virtual-to-physical address translation. It supports the RISC-V Sv39 and
//! Sv48 paging schemes, each backed by three direct-mapped TLBs (one per
//! access type) and a software page table walker.

/// Page table walker implementation for Sv39/Sv48 virtual memory.
pub mod ptw;

/// Translation Lookaside Buffer (TLB) for caching virtual-to-physical address translations.
pub mod tlb;

use crate::common::constants::{MMODE_PA_LIMIT_SHIFT, SV39_LEVELS, SV48_LEVELS};
use crate::common::{AccessType, PhysAddr, TranslationResult, Trap, VirtAddr};
use crate::core::arch::csr::Csrs;
use crate::core::arch::mode::PrivilegeMode;
use crate::soc::interconnect::Bus;

use self::tlb::Tlb;

/// Host-pointer fast-path info for the CPU's single RAM region.
///
/// Threaded through [`Mmu::translate`]/[`ptw::page_table_walk`] as a plain
/// parameter rather than a field on `Mmu`, since `Cpu` already owns this
/// state (`Cpu::ram_ptr`/`ram_start`/`ram_end`) and there is exactly one
/// consumer.
#[derive(Clone, Copy)]
pub struct RamInfo {
    /// Host pointer corresponding to guest physical address `start`.
    pub ptr: *mut u8,
    /// Guest physical address where RAM starts.
    pub start: u64,
    /// Guest physical address where RAM ends (exclusive).
    pub end: u64,
}

impl RamInfo {
    /// `host_ptr - paddr`, wrapping, if `paddr` falls within this region.
    pub(crate) fn addend_for(&self, paddr: u64) -> Option<u64> {
        if paddr >= self.start && paddr < self.end {
            Some((self.ptr as u64).wrapping_sub(self.start))
        } else {
            None
        }
    }
}

/// Memory Management Unit (MMU) for virtual-to-physical address translation.
///
/// Keeps three direct-mapped TLBs — one each for loads, stores, and
/// instruction fetches — per [`tlb`]'s rationale, plus the software page
/// table walker invoked on a miss.
pub struct Mmu {
    /// TLB for load address translation.
    pub read_tlb: Tlb,
    /// TLB for store address translation.
    pub write_tlb: Tlb,
    /// TLB for instruction fetch address translation.
    pub code_tlb: Tlb,
}

impl Mmu {
    /// Creates a new MMU with the specified per-array TLB size.
    ///
    /// # Arguments
    ///
    /// * `tlb_size` - Number of entries in each of the three TLB arrays.
    pub fn new(tlb_size: usize) -> Self {
        Self {
            read_tlb: Tlb::new(tlb_size),
            write_tlb: Tlb::new(tlb_size),
            code_tlb: Tlb::new(tlb_size),
        }
    }

    /// Flushes all three TLB arrays (SFENCE.VMA with no operands, or a SATP write).
    pub fn flush_all(&mut self) {
        self.read_tlb.flush();
        self.write_tlb.flush();
        self.code_tlb.flush();
    }

    /// Translates a virtual address to a physical address.
    ///
    /// In Machine mode with no active translation, addresses above
    /// [`MMODE_PA_LIMIT_SHIFT`] bits are rejected as an access fault (this
    /// implementation models a 56-bit physical address space). In S/U mode
    /// with `satp.mode` set to Sv39 or Sv48, the corresponding TLB is
    /// consulted and a page table walk performed on a miss.
    ///
    /// `ram` carries the host-pointer fast-path info for the CPU's RAM
    /// region, if any; the returned [`TranslationResult::host_addend`] is
    /// `Some` whenever the resolved page lands inside it.
    ///
    /// # Arguments
    ///
    /// * `vaddr` - Virtual address to translate
    /// * `access` - Type of access (Fetch, Read, Write)
    /// * `privilege` - Current privilege mode
    /// * `csrs` - Control and status registers (for SATP, SSTATUS)
    /// * `bus` - System bus for page table walks
    /// * `ram` - Host-pointer fast-path info, or `None` if unavailable
    #[allow(clippy::too_many_arguments)]
    pub fn translate(
        &mut self,
        vaddr: VirtAddr,
        access: AccessType,
        privilege: PrivilegeMode,
        csrs: &Csrs,
        bus: &mut Bus,
        ram: Option<RamInfo>,
    ) -> TranslationResult {
        let satp = csrs.satp;
        use crate::core::arch::csr::{
            SATP_MODE_BARE, SATP_MODE_MASK, SATP_MODE_SHIFT, SATP_MODE_SV39, SATP_MODE_SV48,
        };
        let mode = (satp >> SATP_MODE_SHIFT) & SATP_MODE_MASK;

        if privilege == PrivilegeMode::Machine || mode == SATP_MODE_BARE {
            let paddr = vaddr.val();
            if paddr >> MMODE_PA_LIMIT_SHIFT != 0 {
                return TranslationResult::fault(access_fault(paddr, access), 0);
            }
            return match ram.and_then(|r| r.addend_for(paddr)) {
                Some(addend) => TranslationResult::success_ram(PhysAddr::new(paddr), addend, 0),
                None => TranslationResult::success(PhysAddr::new(paddr), 0),
            };
        }

        let levels = match mode {
            SATP_MODE_SV39 => SV39_LEVELS,
            SATP_MODE_SV48 => SV48_LEVELS,
            _ => return TranslationResult::fault(page_fault(vaddr.val(), access), 0),
        };

        let va = vaddr.val();
        let sign_bit_pos = 12 + levels as u64 * 9 - 1;
        let sign_bit = (va >> sign_bit_pos) & 1;
        let top_bits = va >> (sign_bit_pos + 1);
        let expected_top = if sign_bit == 1 {
            (1u64 << (63 - sign_bit_pos)) - 1
        } else {
            0
        };
        if top_bits != expected_top {
            return TranslationResult::fault(page_fault(va, access), 0);
        }

        use crate::common::constants::{PAGE_SHIFT, VPN_MASK};
        let vpn = (vaddr.val() >> PAGE_SHIFT) & VPN_MASK;

        let tlb_entry = match access {
            AccessType::Fetch => self.code_tlb.lookup(vpn),
            AccessType::Read => self.read_tlb.lookup(vpn),
            AccessType::Write => self.write_tlb.lookup(vpn),
        };

        if let Some(hit) = tlb_entry {
            if access == AccessType::Write && !hit.w {
                return TranslationResult::fault(Trap::StorePageFault(vaddr.val()), 0);
            }
            if access == AccessType::Fetch && !hit.x {
                return TranslationResult::fault(Trap::InstructionPageFault(vaddr.val()), 0);
            }
            if access == AccessType::Read {
                const SSTATUS_MXR_SHIFT: u64 = 19;
                let mxr = (csrs.sstatus >> SSTATUS_MXR_SHIFT) & 1 != 0;
                let readable = hit.r || (hit.x && mxr);
                if !readable {
                    return TranslationResult::fault(Trap::LoadPageFault(vaddr.val()), 0);
                }
            }

            if privilege == PrivilegeMode::User && !hit.u {
                return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
            }
            if privilege == PrivilegeMode::Supervisor && hit.u {
                const SSTATUS_SUM_SHIFT: u64 = 18;
                let sum = (csrs.sstatus >> SSTATUS_SUM_SHIFT) & 1 != 0;
                if !sum {
                    return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
                }
                if access == AccessType::Fetch {
                    return TranslationResult::fault(Trap::InstructionPageFault(vaddr.val()), 0);
                }
            }

            let paddr = (hit.ppn << PAGE_SHIFT) | vaddr.page_offset();
            return match hit.host_addend {
                Some(addend) => TranslationResult::success_ram(PhysAddr::new(paddr), addend, 0),
                None => TranslationResult::success(PhysAddr::new(paddr), 0),
            };
        }

        ptw::page_table_walk(self, vaddr, access, privilege, csrs, bus, levels, ram)
    }
}

/// Creates an appropriate page fault trap for the access type.
fn page_fault(addr: u64, access: AccessType) -> Trap {
    match access {
        AccessType::Fetch => Trap::InstructionPageFault(addr),
        AccessType::Read => Trap::LoadPageFault(addr),
        AccessType::Write => Trap::StorePageFault(addr),
    }
}

/// Creates an appropriate access-fault trap for the access type.
fn access_fault(addr: u64, access: AccessType) -> Trap {
    match access {
        AccessType::Fetch => Trap::InstructionAccessFault(addr),
        AccessType::Read => Trap::LoadAccessFault(addr),
        AccessType::Write => Trap::StoreAccessFault(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmode_bare_address_above_pa_limit_faults() {
        let mut mmu = Mmu::new(16);
        let csrs = Csrs::default();
        let mut bus = Bus::new();
        let huge = 1u64 << MMODE_PA_LIMIT_SHIFT;
        let result = mmu.translate(
            VirtAddr::new(huge),
            AccessType::Read,
            PrivilegeMode::Machine,
            &csrs,
            &mut bus,
            None,
        );
        assert!(result.trap.is_some());
    }

    #[test]
    fn mmode_bare_address_within_pa_limit_passes_through() {
        let mut mmu = Mmu::new(16);
        let csrs = Csrs::default();
        let mut bus = Bus::new();
        let result = mmu.translate(
            VirtAddr::new(0x8000_0000),
            AccessType::Fetch,
            PrivilegeMode::Machine,
            &csrs,
            &mut bus,
            None,
        );
        assert!(result.trap.is_none());
        assert_eq!(result.paddr.val(), 0x8000_0000);
    }

    #[test]
    fn mmode_bare_address_within_ram_region_carries_host_addend() {
        let mut mmu = Mmu::new(16);
        let csrs = Csrs::default();
        let mut bus = Bus::new();
        let mut backing = [0u8; 4096];
        let ram = RamInfo {
            ptr: backing.as_mut_ptr(),
            start: 0x8000_0000,
            end: 0x8000_0000 + backing.len() as u64,
        };
        let result = mmu.translate(
            VirtAddr::new(0x8000_0010),
            AccessType::Read,
            PrivilegeMode::Machine,
            &csrs,
            &mut bus,
            Some(ram),
        );
        assert!(result.trap.is_none());
        let addend = result.host_addend.expect("expected RAM fast path");
        let host = 0x8000_0010u64.wrapping_add(addend);
        assert_eq!(host, backing.as_ptr() as u64 + 0x10);
    }

    #[test]
    fn mmode_bare_address_outside_ram_region_has_no_addend() {
        let mut mmu = Mmu::new(16);
        let csrs = Csrs::default();
        let mut bus = Bus::new();
        let mut backing = [0u8; 4096];
        let ram = RamInfo {
            ptr: backing.as_mut_ptr(),
            start: 0x8000_0000,
            end: 0x8000_0000 + backing.len() as u64,
        };
        let result = mmu.translate(
            VirtAddr::new(0x1000_0000),
            AccessType::Read,
            PrivilegeMode::Machine,
            &csrs,
            &mut bus,
            Some(ram),
        );
        assert!(result.trap.is_none());
        assert_eq!(result.host_addend, None);
    }
}
