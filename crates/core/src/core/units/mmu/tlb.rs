//! Translation Lookaside Buffer (TLB).
//!
//! A direct-mapped cache for page table entries, indexed by the low bits of
//! the Virtual Page Number (VPN). Each entry is tagged by the full VPN (an
//! all-ones tag marks an empty slot) and stores the permission bits plus,
//! when the page is backed by the simulator's single RAM region, a
//! host-pointer addend: `addend = host_ptr - guest_vaddr`, added to any
//! vaddr on the tagged page to get a directly dereferenceable host pointer.
//! The MMU keeps three separate instances — one each for reads, writes, and
//! instruction fetches — so a permission change on one access type (e.g.
//! `mprotect`'s W^X toggle) cannot be masked by a stale entry cached under a
//! different access type.

/// Tag value marking an empty/invalid TLB slot (no valid VPN uses all bits set).
const TAG_INVALID: u64 = u64::MAX;

/// A single entry in the TLB.
#[derive(Clone, Copy)]
struct TlbEntry {
    /// Virtual Page Number (tag); `TAG_INVALID` means the slot is empty.
    tag: u64,
    /// Physical Page Number (Data).
    ppn: u64,
    /// `host_ptr - guest_vaddr` for this page, valid only when `is_ram`.
    addend: u64,
    /// Whether this page resolves into the CPU's single RAM region.
    is_ram: bool,
    /// Read permission.
    r: bool,
    /// Write permission.
    w: bool,
    /// Execute permission.
    x: bool,
    /// User mode accessible.
    u: bool,
}

impl Default for TlbEntry {
    fn default() -> Self {
        Self {
            tag: TAG_INVALID,
            ppn: 0,
            addend: 0,
            is_ram: false,
            r: false,
            w: false,
            x: false,
            u: false,
        }
    }
}

/// Result of a TLB hit: the resolved PPN, the RAM fast-path addend (if any),
/// and the cached permission bits.
pub struct TlbHit {
    /// Physical Page Number.
    pub ppn: u64,
    /// `host_ptr - guest_vaddr` for this page, if RAM-backed.
    pub host_addend: Option<u64>,
    /// Read permission.
    pub r: bool,
    /// Write permission.
    pub w: bool,
    /// Execute permission.
    pub x: bool,
    /// User mode accessible.
    pub u: bool,
}

/// Translation Lookaside Buffer structure.
pub struct Tlb {
    /// Vector of TLB entries.
    entries: Vec<TlbEntry>,
    /// Mask used for indexing (size - 1).
    mask: usize,
}

impl Tlb {
    /// Creates a new TLB with the specified size.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of entries (will be rounded up to next power of 2).
    pub fn new(size: usize) -> Self {
        let safe_size = if size.is_power_of_two() {
            size
        } else {
            size.next_power_of_two()
        };

        Self {
            entries: vec![TlbEntry::default(); safe_size],
            mask: safe_size - 1,
        }
    }

    /// Looks up a VPN in the TLB.
    ///
    /// # Arguments
    ///
    /// * `vpn` - The Virtual Page Number to look up.
    ///
    /// # Panics
    ///
    /// This function will not panic. The unsafe array access is guaranteed safe because:
    /// - `idx = vpn & self.mask` where `mask = size - 1` (size is power of 2)
    /// - This ensures `idx` is always `< size` and within bounds of `entries`
    #[inline(always)]
    pub fn lookup(&self, vpn: u64) -> Option<TlbHit> {
        let idx = (vpn as usize) & self.mask;

        // SAFETY: idx is guaranteed to be < entries.len() by the mask operation above.
        // The mask is constructed as (size - 1) where size is the length of entries,
        // ensuring idx is always a valid index.
        let entry = unsafe { self.entries.get_unchecked(idx) };

        if entry.tag == vpn {
            return Some(TlbHit {
                ppn: entry.ppn,
                host_addend: entry.is_ram.then_some(entry.addend),
                r: entry.r,
                w: entry.w,
                x: entry.x,
                u: entry.u,
            });
        }
        None
    }

    /// Inserts a new mapping into the TLB.
    ///
    /// # Arguments
    ///
    /// * `vpn` - Virtual Page Number.
    /// * `ppn` - Physical Page Number.
    /// * `pte` - Raw Page Table Entry (used to extract permissions).
    /// * `host_addend` - `Some(host_ptr - guest_vaddr)` if this page resolves
    ///   into the CPU's RAM region, `None` for MMIO-backed pages.
    pub fn insert(&mut self, vpn: u64, ppn: u64, pte: u64, host_addend: Option<u64>) {
        let r = (pte >> 1) & 1 != 0;
        let w = (pte >> 2) & 1 != 0;
        let x = (pte >> 3) & 1 != 0;
        let u = (pte >> 4) & 1 != 0;

        let idx = (vpn as usize) & self.mask;

        self.entries[idx] = TlbEntry {
            tag: vpn,
            ppn,
            addend: host_addend.unwrap_or(0),
            is_ram: host_addend.is_some(),
            r,
            w,
            x,
            u,
        };
    }

    /// Flushes all entries from the TLB.
    ///
    /// Called on `SFENCE.VMA` instructions or SATP writes.
    pub fn flush(&mut self) {
        for e in &mut self.entries {
            e.tag = TAG_INVALID;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty_tlb() {
        let tlb = Tlb::new(16);
        assert!(tlb.lookup(0).is_none());
        assert!(tlb.lookup(0x1234).is_none());
    }

    #[test]
    fn insert_then_lookup_hits_with_ram_addend() {
        let mut tlb = Tlb::new(16);
        let pte = 0b1111 << 1; // R=W=X=1, U=0
        tlb.insert(5, 0x80, pte, Some(0x1000));
        let hit = tlb.lookup(5).expect("expected hit");
        assert_eq!(hit.ppn, 0x80);
        assert_eq!(hit.host_addend, Some(0x1000));
        assert!(hit.r && hit.w && hit.x);
        assert!(!hit.u);
    }

    #[test]
    fn insert_without_ram_addend_is_mmio_only() {
        let mut tlb = Tlb::new(16);
        tlb.insert(5, 0x80, 0b0011 << 1, None);
        let hit = tlb.lookup(5).expect("expected hit");
        assert_eq!(hit.host_addend, None);
    }

    #[test]
    fn lookup_misses_on_tag_mismatch_within_same_slot() {
        let mut tlb = Tlb::new(16);
        tlb.insert(5, 0x80, 0, None);
        // Same index (5 & 15 == 21 & 15), different tag: must miss, not
        // alias the entry inserted for vpn 5.
        assert!(tlb.lookup(21).is_none());
    }

    #[test]
    fn flush_invalidates_every_entry() {
        let mut tlb = Tlb::new(16);
        tlb.insert(3, 0x10, 0, Some(0x2000));
        assert!(tlb.lookup(3).is_some());
        tlb.flush();
        assert!(tlb.lookup(3).is_none());
    }

    proptest::proptest! {
        #[test]
        fn lookup_after_insert_always_returns_the_inserted_addend(
            vpn in 0u64..1_000_000,
            ppn: u64,
            addend: u64,
        ) {
            let mut tlb = Tlb::new(64);
            tlb.insert(vpn, ppn, 0b1111 << 1, Some(addend));
            let hit = tlb.lookup(vpn).expect("just-inserted vpn must hit");
            assert_eq!(hit.ppn, ppn);
            assert_eq!(hit.host_addend, Some(addend));
        }

        #[test]
        fn lookup_never_panics_on_arbitrary_vpn(vpn: u64) {
            let tlb = Tlb::new(16);
            let _ = tlb.lookup(vpn);
        }
    }
}
