//! CPU Core Definition and Initialization.
//!
//! This module defines the central `Cpu` structure, which holds all architectural
//! processor state for the single-step interpreter. This struct owns:
//! 1. **State Management:** Registers, program counter, and privilege modes.
//! 2. **Memory Hierarchy:** MMU and TLBs.
//! 3. **System Integration:** System bus, devices, and RAM.

/// Control and Status Register access and management.
pub mod csr;

/// Instruction fetch/decode/execute orchestration.
pub mod execution;
pub use execution::{RISCVCTFInfo, RISCVCTFKind};

/// Memory access handling and load/store operations.
pub mod memory;

/// Trap and exception handling logic.
pub mod trap;

use crate::common::RegisterFile;
use crate::config::Config;
use crate::core::arch::csr::Csrs;
use crate::core::arch::mode::PrivilegeMode;
use crate::core::units::mmu::{Mmu, RamInfo};
use crate::soc::System;
use crate::stats::SimStats;

/// CPU architectural state: registers, MMU, bus, and statistics.
pub struct Cpu {
    /// General Purpose and Floating Point Registers.
    pub regs: RegisterFile,
    /// Program Counter.
    pub pc: u64,
    /// Control and Status Registers.
    pub csrs: Csrs,
    /// Current Privilege Mode (M, S, U).
    pub privilege: PrivilegeMode,
    /// Load Reservation address (for LR/SC). `None` means no outstanding reservation.
    pub load_reservation: Option<u64>,

    /// System Bus and Devices.
    pub bus: System,
    /// Memory Management Unit.
    pub mmu: Mmu,
    /// Base address for main RAM.
    pub mmio_base: u64,

    /// Whether misaligned loads/stores are split and serviced rather than trapped.
    pub misaligned_access_enabled: bool,

    /// Enable instruction tracing.
    pub trace: bool,
    /// Exit code if simulation finished.
    pub exit_code: Option<u64>,
    /// Performance statistics.
    pub stats: SimStats,
    /// CLINT time divider.
    pub clint_divider: u64,
    /// Last PC (for hang detection).
    pub last_pc: u64,
    /// Hang detection counter.
    pub same_pc_count: u64,
    /// WFI state.
    pub wfi_waiting: bool,
    /// PC when WFI was entered.
    pub wfi_pc: u64,
    /// Raw pointer to the start of simulated RAM.
    ///
    /// # Safety Invariants
    ///
    /// This pointer must maintain the following invariants at all times:
    /// - Points to a valid, allocated memory region of size `(ram_end - ram_start)` bytes
    /// - The memory region remains valid for the entire lifetime of the `Cpu` instance
    /// - All accesses must verify: `ram_start <= address < ram_end` before dereferencing
    /// - The pointer is valid for both reads and writes (memory is mutable)
    /// - Memory is properly aligned for the underlying allocation (even if individual
    ///   accesses use `read_unaligned`/`write_unaligned`)
    /// - No other code may free or reallocate this memory while the CPU exists
    /// - The pointer remains valid across CPU state changes and pipeline operations
    pub ram_ptr: *mut u8,
    /// Physical address where RAM starts.
    pub ram_start: u64,
    /// Physical address where RAM ends (exclusive).
    pub ram_end: u64,

    /// HTIF tohost address range (start, end). Stores in this range bypass the
    /// RAM fast-path and go through the bus so the HTIF device can intercept them.
    pub htif_range: Option<(u64, u64)>,

    /// Ring buffer of (pc, inst) for last N retired instructions (for invalid-PC debug trace).
    pub pc_trace: Vec<(u64, u32)>,
    /// Last invalid PC we printed debug for (avoid duplicate dumps).
    pub last_invalid_pc_debug: Option<u64>,

    /// Set when a PC redirect occurs (branch, trap, FENCE.I, `xRET`, etc.) so
    /// callers can distinguish a taken control-flow change from straight-line
    /// execution without comparing against the pre-step PC.
    pub redirect_pending: bool,

    /// Control-flow info for the branch/jump committed by the most recent
    /// `tick`, for an external cosimulation checker to verify direction and
    /// target. Reset to `None` at the start of every `tick`; only branch,
    /// `JAL`, and `JALR` commits set it.
    pub ctf_info: Option<RISCVCTFInfo>,

    /// Name of the validation event (CSR `0x8D1`) that should end the run.
    pub terminating_event: String,
    /// Set once the terminating event has fired; the host should stop stepping.
    pub terminate_simulation: bool,
}

/// Maximum number of (pc, inst) entries kept for invalid-PC debug trace.
pub const PC_TRACE_MAX: usize = 32;

unsafe impl Send for Cpu {}
unsafe impl Sync for Cpu {}

impl std::fmt::Debug for Cpu {
    /// Prints only the fields useful for a crash dump or log line; the
    /// register file, CSRs, and bus are each large enough to warrant their
    /// own `Display`/dump helpers (`RegisterFile::dump`, `Cpu::dump_state`)
    /// rather than being spelled out in every `{:?}`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("privilege", &self.privilege)
            .field("instructions_retired", &self.stats.instructions_retired)
            .finish_non_exhaustive()
    }
}

impl Cpu {
    /// Sets a load reservation at the exact physical address of the `LR`.
    ///
    /// Reservation granularity is the exact address, not a rounded cache
    /// line: this implementation has no cache model to invalidate against,
    /// so a coarser granule would only produce spurious `SC` successes.
    #[inline]
    pub(crate) fn set_reservation(&mut self, addr: u64) {
        self.load_reservation = Some(addr);
    }

    /// Checks whether a reservation exists at exactly the given address.
    #[inline]
    pub(crate) fn check_reservation(&self, addr: u64) -> bool {
        self.load_reservation == Some(addr)
    }

    /// Clears the load reservation.
    #[inline]
    pub(crate) fn clear_reservation(&mut self) {
        self.load_reservation = None;
    }

    /// Builds the RAM fast-path descriptor for [`Mmu::translate`], or `None`
    /// if this system has no RAM device.
    #[inline]
    pub(crate) fn ram_info(&self) -> Option<RamInfo> {
        if self.ram_end <= self.ram_start {
            return None;
        }
        Some(RamInfo {
            ptr: self.ram_ptr,
            start: self.ram_start,
            end: self.ram_end,
        })
    }

    /// Creates a new CPU instance with the specified system and configuration.
    ///
    /// # Arguments
    ///
    /// * `system` - The SOC system containing the bus and devices.
    /// * `config` - The simulator configuration parameters.
    ///
    /// # Returns
    ///
    /// A new `Cpu` instance initialized according to the provided configuration.
    pub fn new(mut system: System, config: &Config) -> Self {
        use crate::core::arch::csr::{
            MISA_EXT_A, MISA_EXT_C, MISA_EXT_D, MISA_EXT_F, MISA_EXT_I, MISA_EXT_M, MISA_EXT_S,
            MISA_EXT_U, MISA_XLEN_64, MSTATUS_DEFAULT_RV64,
        };

        let mut misa = MISA_XLEN_64;
        misa |= MISA_EXT_A;
        misa |= MISA_EXT_C;
        misa |= MISA_EXT_D;
        misa |= MISA_EXT_F;
        misa |= MISA_EXT_I;
        misa |= MISA_EXT_M;
        misa |= MISA_EXT_S;
        misa |= MISA_EXT_U;

        let csrs = Csrs {
            mstatus: MSTATUS_DEFAULT_RV64,
            misa,
            ..Default::default()
        };

        let (ram_ptr, ram_start, ram_end) =
            system
                .bus
                .get_ram_info()
                .unwrap_or((std::ptr::null_mut(), 0, 0));

        // Full-system boot always starts in Machine mode; firmware/OS
        // transitions to lower privilege levels via its own trap handlers.
        let privilege = PrivilegeMode::Machine;

        Self {
            regs: RegisterFile::new(),
            pc: config.general.start_pc,
            trace: config.general.trace_instructions,
            bus: system,
            exit_code: None,
            csrs,
            privilege,
            mmio_base: config.system.ram_base,
            misaligned_access_enabled: config.general.misaligned_access_enabled,
            stats: SimStats::default(),
            mmu: Mmu::new(config.memory.tlb_size),
            load_reservation: None,
            clint_divider: config.system.clint_divider,
            last_pc: 0,
            same_pc_count: 0,
            wfi_waiting: false,
            wfi_pc: 0,
            ram_ptr,
            ram_start,
            ram_end,
            htif_range: Some((config.system.htif_base, config.system.htif_base + 0x10)),
            pc_trace: Vec::with_capacity(PC_TRACE_MAX),
            last_invalid_pc_debug: None,
            redirect_pending: false,
            ctf_info: None,
            terminating_event: config.general.terminating_event.clone(),
            terminate_simulation: false,
        }
    }

    /// Retrieves the exit code if the simulation has finished.
    ///
    /// # Returns
    ///
    /// `Some(u64)` containing the exit code if finished, otherwise `None`.
    pub fn take_exit(&mut self) -> Option<u64> {
        self.exit_code.take()
    }

    /// Dumps the current CPU state (PC and registers) to stdout.
    pub fn dump_state(&self) {
        println!("PC = {:#018x}", self.pc);
        self.regs.dump();
    }
}
