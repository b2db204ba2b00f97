//! Hardware Page Table Walker (PTW) for RISC-V Sv39/Sv48.
//!
//! Traverses the three- or four-level page table structure to translate
//! virtual addresses to physical addresses. Accessed/Dirty bits are treated
//! as software-managed (RISC-V privileged spec `Svade`-style): the walker
//! never writes a PTE back to memory. A leaf whose A bit is clear, or whose
//! D bit is clear on a write, faults instead of being silently fixed up.

use crate::common::{
    AccessType, PAGE_SHIFT, PhysAddr, TranslationResult, Trap, VPN_MASK, VirtAddr,
};
use crate::common::constants::{SV39_LEVELS, SV48_LEVELS};
use crate::core::arch::csr::{Csrs, SATP_PPN_MASK};
use crate::core::arch::mode::PrivilegeMode;
use crate::core::units::mmu::{Mmu, RamInfo};
use crate::soc::interconnect::Bus;

const PTE_VALID_BIT: u64 = 1;
const PTE_READ_BIT: u64 = 1 << 1;
const PTE_WRITE_BIT: u64 = 1 << 2;
const PTE_EXEC_BIT: u64 = 1 << 3;
const PTE_USER_BIT: u64 = 1 << 4;
const PTE_ACCESSED_BIT: u64 = 1 << 6;
const PTE_DIRTY_BIT: u64 = 1 << 7;
const PTE_PPN_SHIFT: u64 = 10;

/// A strongly-typed wrapper around a raw 64-bit Sv39/Sv48 Page Table Entry.
#[derive(Clone, Copy, Debug)]
struct PageTableEntry(u64);

impl PageTableEntry {
    fn new(val: u64) -> Self {
        Self(val)
    }

    fn is_valid(&self) -> bool {
        self.0 & PTE_VALID_BIT != 0
    }

    fn can_read(&self) -> bool {
        self.0 & PTE_READ_BIT != 0
    }

    fn can_write(&self) -> bool {
        self.0 & PTE_WRITE_BIT != 0
    }

    fn can_exec(&self) -> bool {
        self.0 & PTE_EXEC_BIT != 0
    }

    fn is_user(&self) -> bool {
        self.0 & PTE_USER_BIT != 0
    }

    fn is_accessed(&self) -> bool {
        self.0 & PTE_ACCESSED_BIT != 0
    }

    fn is_dirty(&self) -> bool {
        self.0 & PTE_DIRTY_BIT != 0
    }

    fn ppn(&self) -> u64 {
        (self.0 >> PTE_PPN_SHIFT) & SATP_PPN_MASK
    }

    /// In Sv39/Sv48, an entry is a pointer to the next level if Valid but R=W=X=0.
    fn is_pointer(&self) -> bool {
        !self.can_read() && !self.can_write() && !self.can_exec()
    }

    /// The 3-bit `XWR` permission field, `R | (W << 1) | (X << 2)`. `2`
    /// (W-only) and `6` (W+X, no R) are reserved encodings the privileged
    /// spec forbids on a leaf.
    fn xwr(&self) -> u64 {
        u64::from(self.can_read()) | (u64::from(self.can_write()) << 1) | (u64::from(self.can_exec()) << 2)
    }

    /// Whether this leaf's `XWR` field is a reserved encoding (§4.2 leaf
    /// check 1).
    fn is_reserved_leaf(&self) -> bool {
        matches!(self.xwr(), 2 | 6)
    }
}

/// Performs a hardware page table walk for Sv39 or Sv48, per `satp.mode`.
///
/// `levels` is 3 for Sv39 and 4 for Sv48; both use 9 bits of VPN per level
/// and an 8-byte PTE, differing only in root-table reach.
#[allow(clippy::too_many_arguments)]
pub fn page_table_walk(
    mmu: &mut Mmu,
    vaddr: VirtAddr,
    access: AccessType,
    privilege: PrivilegeMode,
    csrs: &Csrs,
    bus: &mut Bus,
    levels: usize,
    ram: Option<RamInfo>,
) -> TranslationResult {
    const VPN_BITS_PER_LEVEL: u64 = 9;
    const VPN_ENTRY_MASK: u64 = 0x1FF;
    const PTE_SIZE: u64 = 8;

    debug_assert!(levels == SV39_LEVELS || levels == SV48_LEVELS);

    let satp = csrs.satp;
    let mut ppn = satp & SATP_PPN_MASK;

    for level in (0..levels).rev() {
        let vpn_shift = PAGE_SHIFT + level as u64 * VPN_BITS_PER_LEVEL;
        let vpn_i = (vaddr.val() >> vpn_shift) & VPN_ENTRY_MASK;
        let pte_addr = (ppn << PAGE_SHIFT) + (vpn_i * PTE_SIZE);

        let raw_pte = bus.read_u64(pte_addr);
        let pte = PageTableEntry::new(raw_pte);

        if !pte.is_valid() {
            return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
        }

        if pte.is_pointer() {
            if level == 0 {
                return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
            }
            ppn = pte.ppn();
            continue;
        }

        if level > 0 {
            let ppn_mask = (1 << (level as u64 * VPN_BITS_PER_LEVEL)) - 1;
            if (pte.ppn() & ppn_mask) != 0 {
                return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
            }
        }

        if check_permissions(&pte, access, privilege, csrs).is_err() {
            return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
        }

        // Accessed/Dirty bits are software-managed: a stale A or D bit faults
        // rather than being fixed up by the walker (no PTE write-back).
        if !pte.is_accessed() {
            return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
        }
        if access == AccessType::Write && !pte.is_dirty() {
            return TranslationResult::fault(page_fault(vaddr.val(), access), 0);
        }

        let offset_mask = (1u64 << vpn_shift) - 1;
        let final_paddr = (pte.ppn() << PAGE_SHIFT) | (vaddr.val() & offset_mask);

        let specific_4kb_ppn = final_paddr >> PAGE_SHIFT;
        let vpn = (vaddr.val() >> PAGE_SHIFT) & VPN_MASK;
        let host_addend = ram.and_then(|r| r.addend_for(final_paddr));

        match access {
            AccessType::Fetch => mmu.code_tlb.insert(vpn, specific_4kb_ppn, pte.0, host_addend),
            AccessType::Read => mmu.read_tlb.insert(vpn, specific_4kb_ppn, pte.0, host_addend),
            AccessType::Write => mmu.write_tlb.insert(vpn, specific_4kb_ppn, pte.0, host_addend),
        }

        return match host_addend {
            Some(addend) => TranslationResult::success_ram(PhysAddr::new(final_paddr), addend, 0),
            None => TranslationResult::success(PhysAddr::new(final_paddr), 0),
        };
    }

    TranslationResult::fault(page_fault(vaddr.val(), access), 0)
}

fn check_permissions(
    pte: &PageTableEntry,
    access: AccessType,
    privilege: PrivilegeMode,
    csrs: &Csrs,
) -> Result<(), ()> {
    if pte.is_reserved_leaf() {
        return Err(());
    }
    if access == AccessType::Write && !pte.can_write() {
        return Err(());
    }
    if access == AccessType::Fetch && !pte.can_exec() {
        return Err(());
    }

    const SSTATUS_MXR_SHIFT: u64 = 19;
    let mxr = (csrs.sstatus >> SSTATUS_MXR_SHIFT) & 1 != 0;

    if access == AccessType::Read && !(pte.can_read() || (pte.can_exec() && mxr)) {
        return Err(());
    }

    if privilege == PrivilegeMode::User && !pte.is_user() {
        return Err(());
    }

    if privilege == PrivilegeMode::Supervisor && pte.is_user() {
        const SSTATUS_SUM_SHIFT: u64 = 18;
        let sum = (csrs.sstatus >> SSTATUS_SUM_SHIFT) & 1 != 0;
        if !sum {
            return Err(());
        }
        if access == AccessType::Fetch {
            return Err(());
        }
    }

    Ok(())
}

fn page_fault(addr: u64, access: AccessType) -> Trap {
    match access {
        AccessType::Fetch => Trap::InstructionPageFault(addr),
        AccessType::Read => Trap::LoadPageFault(addr),
        AccessType::Write => Trap::StorePageFault(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_pte(xwr: u64) -> PageTableEntry {
        // Valid + Accessed, with the given XWR bits.
        PageTableEntry::new(PTE_VALID_BIT | PTE_ACCESSED_BIT | (xwr << 1))
    }

    #[test]
    fn xwr_reserved_encodings_are_rejected() {
        assert!(leaf_pte(0b010).is_reserved_leaf()); // W-only
        assert!(leaf_pte(0b110).is_reserved_leaf()); // W+X, no R
    }

    #[test]
    fn xwr_non_reserved_encodings_are_accepted() {
        assert!(!leaf_pte(0b001).is_reserved_leaf()); // R-only
        assert!(!leaf_pte(0b011).is_reserved_leaf()); // R+W
        assert!(!leaf_pte(0b101).is_reserved_leaf()); // R+X
        assert!(!leaf_pte(0b111).is_reserved_leaf()); // R+W+X
    }

    #[test]
    fn check_permissions_faults_on_reserved_leaf_even_for_matching_access() {
        let pte = leaf_pte(0b010); // W-only: a write access would otherwise pass.
        let csrs = Csrs::default();
        assert!(check_permissions(&pte, AccessType::Write, PrivilegeMode::Supervisor, &csrs).is_err());
    }

    #[test]
    fn check_permissions_allows_valid_read_leaf() {
        let pte = leaf_pte(0b001); // R-only.
        let csrs = Csrs::default();
        assert!(check_permissions(&pte, AccessType::Read, PrivilegeMode::Supervisor, &csrs).is_ok());
    }

    #[test]
    fn check_permissions_rejects_write_without_write_bit() {
        let pte = leaf_pte(0b001); // R-only.
        let csrs = Csrs::default();
        assert!(check_permissions(&pte, AccessType::Write, PrivilegeMode::Supervisor, &csrs).is_err());
    }
}
