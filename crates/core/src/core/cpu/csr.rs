//! CSR Access Logic.
//!
//! This module implements the Control and Status Register (CSR) access mechanisms for the CPU.
//! It performs the following:
//! 1. **Read Operations:** Retrieves CSR values while handling architectural side effects.
//! 2. **Write Operations:** Updates CSR state and triggers necessary system updates (e.g., TLB flushes).
//! 3. **Side Effect Management:** Privilege/counter gating, validation-CSR protocol, debug triggers.

use super::Cpu;
use crate::core::arch::csr;
use crate::core::arch::mode::PrivilegeMode;

impl Cpu {
    /// Checks whether the current privilege mode may access CSR `addr` for
    /// the given access kind, per the privilege field in `csr[9:8]` and the
    /// read/write field in `csr[11:10]` (a write to a read-only CSR, i.e.
    /// both top bits set, is always illegal).
    ///
    /// Counter CSRs (`cycle`/`time`/`instret` and their `h` variants) are
    /// additionally gated by `mcounteren`/`scounteren` when running below
    /// machine mode.
    pub fn csr_accessible(&self, addr: u32, is_write: bool) -> bool {
        if is_write && (addr >> 10) & 0x3 == 0x3 {
            return false;
        }
        let required = ((addr >> 8) & 0x3) as u8;
        if self.privilege.to_u8() < required {
            return false;
        }
        if addr == csr::SATP
            && self.privilege == PrivilegeMode::Supervisor
            && (self.csrs.mstatus & csr::MSTATUS_TVM) != 0
        {
            return false;
        }
        self.counter_enabled(addr)
    }

    /// Whether `SFENCE.VMA` is permitted in the current privilege mode:
    /// traps in S-mode when `mstatus.TVM` is set (§4.2).
    pub fn sfence_vma_allowed(&self) -> bool {
        !(self.privilege == PrivilegeMode::Supervisor && (self.csrs.mstatus & csr::MSTATUS_TVM) != 0)
    }

    /// Checks `mcounteren`/`scounteren` gating for the `cycle`/`time`/`instret`
    /// counter CSRs. Non-counter CSRs always return `true` here.
    fn counter_enabled(&self, addr: u32) -> bool {
        let bit = match addr {
            csr::CYCLE => 0,
            csr::TIME => 1,
            csr::INSTRET => 2,
            _ => return true,
        };
        if self.privilege == PrivilegeMode::Machine {
            return true;
        }
        if (self.csrs.mcounteren >> bit) & 1 == 0 {
            return false;
        }
        if self.privilege == PrivilegeMode::User && (self.csrs.scounteren >> bit) & 1 == 0 {
            return false;
        }
        true
    }

    /// Reads a value from a Control and Status Register (CSR).
    ///
    /// Unknown CSRs read as 0 (the caller is responsible for converting an
    /// unknown/inaccessible CSR into an illegal-instruction trap before
    /// committing the read; `time`/`timeh` are the exception and are never
    /// faulted even when absent from a minimal config).
    ///
    /// # Arguments
    ///
    /// * `addr` - The 12-bit address of the CSR to read.
    pub fn csr_read(&self, addr: u32) -> u64 {
        match addr {
            csr::FFLAGS => self.csrs.fflags & 0x1F,
            csr::FRM => self.csrs.frm & 0x7,
            csr::FCSR => ((self.csrs.frm & 0x7) << 5) | (self.csrs.fflags & 0x1F),
            csr::MVENDORID => 0,
            csr::MARCHID => 0,
            csr::MIMPID => 0,
            csr::MHARTID => 0,
            csr::MSTATUS => self.csrs.mstatus,
            csr::MEDELEG => self.csrs.medeleg,
            csr::MIDELEG => self.csrs.mideleg,
            csr::MIE => self.csrs.mie,
            csr::MTVEC => self.csrs.mtvec,
            csr::MISA => self.csrs.misa,
            csr::MSCRATCH => self.csrs.mscratch,
            csr::MEPC => self.csrs.mepc,
            csr::MCAUSE => self.csrs.mcause,
            csr::MTVAL => self.csrs.mtval,
            csr::MIP => self.csrs.mip,
            csr::MCOUNTEREN => self.csrs.mcounteren,
            csr::SSTATUS => self.csrs.sstatus,
            csr::SIE => self.csrs.mie & self.csrs.mideleg,
            csr::STVEC => self.csrs.stvec,
            csr::SCOUNTEREN => self.csrs.scounteren,
            csr::SSCRATCH => self.csrs.sscratch,
            csr::SEPC => self.csrs.sepc,
            csr::SCAUSE => self.csrs.scause,
            csr::STVAL => self.csrs.stval,
            csr::SIP => self.csrs.mip & self.csrs.mideleg,
            csr::STIMECMP => self.csrs.stimecmp,
            csr::SATP => self.csrs.satp,
            csr::CYCLE | csr::MCYCLE => self.stats.cycles,
            csr::TIME => self.stats.cycles / self.clint_divider,
            csr::INSTRET | csr::MINSTRET => self.stats.instructions_retired,
            csr::TSELECT => self.csrs.tselect,
            csr::TDATA1 => self.csrs.tdata1,
            csr::TDATA2 => self.csrs.tdata2,
            csr::TDATA3 => self.csrs.tdata3,
            csr::DCSR => self.csrs.dcsr,
            csr::DPC => self.csrs.dpc,
            csr::DSCRATCH0 => self.csrs.dscratch0,
            // PMP is out of scope: reads return 0 (no regions configured).
            0x3A0..=0x3AF | 0x3B0..=0x3BF => 0,
            _ => 0,
        }
    }

    /// Writes a value to a Control and Status Register (CSR).
    ///
    /// # Arguments
    ///
    /// * `addr` - The 12-bit address of the CSR to write.
    /// * `val` - The 64-bit value to write to the register.
    pub fn csr_write(&mut self, addr: u32, val: u64) {
        match addr {
            csr::FFLAGS => {
                self.csrs.fflags = val & 0x1F;
                self.mark_fs_dirty();
            }
            csr::FRM => {
                self.csrs.frm = val & 0x7;
                self.mark_fs_dirty();
            }
            csr::FCSR => {
                self.csrs.fflags = val & 0x1F;
                self.csrs.frm = (val >> 5) & 0x7;
                self.mark_fs_dirty();
            }
            csr::CSR_FLUSH_ALL => self.mmu.flush_all(),
            csr::MSTATUS => {
                // WARL: preserve UXL and SXL (bits 35:32) — always 2 (64-bit) on RV64.
                let uxl_sxl_mask: u64 = 0xF << 32;
                let preserved = self.csrs.mstatus & uxl_sxl_mask;
                self.csrs.mstatus = (val & !uxl_sxl_mask) | preserved;

                let mask = csr::MSTATUS_SIE
                    | csr::MSTATUS_SPIE
                    | csr::MSTATUS_SPP
                    | csr::MSTATUS_FS
                    | csr::MSTATUS_SUM
                    | csr::MSTATUS_MXR
                    | csr::MSTATUS_UXL;
                self.csrs.sstatus = self.csrs.mstatus & mask;
            }
            csr::MEDELEG => self.csrs.medeleg = val & csr::MEDELEG_MASK,
            csr::MIDELEG => self.csrs.mideleg = val,
            csr::MIE => self.csrs.mie = val,
            csr::MTVEC => self.csrs.mtvec = val,
            csr::MISA => {
                // WARL: extensions are hardwired, writes are silently ignored.
            }
            csr::MSCRATCH => self.csrs.mscratch = val,
            csr::MEPC => self.csrs.mepc = val & !1,
            csr::MCAUSE => self.csrs.mcause = val,
            csr::MTVAL => self.csrs.mtval = val,
            csr::MIP => {
                let mask = csr::MIP_SSIP | csr::MIP_STIP | csr::MIP_SEIP;
                self.csrs.mip = (self.csrs.mip & !mask) | (val & mask);
            }
            csr::MCOUNTEREN => self.csrs.mcounteren = val,
            csr::SSTATUS => {
                // UXL is read-only in sstatus (always reflects mstatus UXL).
                let writable_mask = csr::MSTATUS_SIE
                    | csr::MSTATUS_SPIE
                    | csr::MSTATUS_SPP
                    | csr::MSTATUS_FS
                    | csr::MSTATUS_SUM
                    | csr::MSTATUS_MXR;
                let read_mask = writable_mask | csr::MSTATUS_UXL;

                self.csrs.mstatus = (self.csrs.mstatus & !writable_mask) | (val & writable_mask);
                self.csrs.sstatus = self.csrs.mstatus & read_mask;
            }
            csr::SIE => {
                let mask = self.csrs.mideleg;
                self.csrs.mie = (self.csrs.mie & !mask) | (val & mask);
            }
            csr::STVEC => self.csrs.stvec = val,
            csr::SCOUNTEREN => self.csrs.scounteren = val,
            csr::SSCRATCH => self.csrs.sscratch = val,
            csr::SEPC => self.csrs.sepc = val & !1,
            csr::SCAUSE => self.csrs.scause = val,
            csr::STVAL => self.csrs.stval = val,
            csr::SIP => {
                let mask = self.csrs.mideleg & csr::MIP_SSIP;
                self.csrs.mip = (self.csrs.mip & !mask) | (val & mask);
            }
            csr::MCYCLE => self.stats.cycles = val,
            csr::MINSTRET => self.stats.instructions_retired = val,
            csr::STIMECMP => {
                self.csrs.stimecmp = val;
                self.csrs.mip &= !csr::MIP_STIP;
            }
            csr::SATP => {
                let mode = (val >> csr::SATP_MODE_SHIFT) & csr::SATP_MODE_MASK;
                let mode_recognized = mode == csr::SATP_MODE_BARE
                    || mode == csr::SATP_MODE_SV39
                    || mode == csr::SATP_MODE_SV48;

                self.csrs.satp = if mode_recognized {
                    val
                } else {
                    val & !(csr::SATP_MODE_MASK << csr::SATP_MODE_SHIFT)
                };
                self.clear_reservation();
                self.mmu.flush_all();
            }
            // Single supported trigger: type `mcontrol` (2), stored as-is.
            // The vendor-extension fallthrough into the mhpmevent range that
            // some hardware exhibits at this address is not replicated here.
            csr::TSELECT => self.csrs.tselect = val,
            csr::TDATA1 => {
                self.csrs.tdata1 = (val & !(0xFu64 << csr::TDATA1_TYPE_SHIFT))
                    | (csr::TDATA1_TYPE_MCONTROL << csr::TDATA1_TYPE_SHIFT);
            }
            csr::TDATA2 => self.csrs.tdata2 = val,
            csr::TDATA3 => self.csrs.tdata3 = val,
            csr::DCSR => {
                // Only stopcount (bit 10), stoptime (bit 9), and prv (bits 1:0) are writable.
                let mask = (1u64 << 10) | (1u64 << 9) | 0x3;
                self.csrs.dcsr = (self.csrs.dcsr & !mask) | (val & mask);
            }
            csr::DPC => self.csrs.dpc = val,
            csr::DSCRATCH0 => self.csrs.dscratch0 = val,
            csr::CSR_VAL0 => self.handle_val0_write(val),
            csr::CSR_VAL1 => self.handle_val1_write(val),
            // PMP is out of scope: writes are silently discarded.
            0x3A0..=0x3AF | 0x3B0..=0x3BF => {}
            _ => {}
        }
    }

    /// Writing any floating-point CSR marks `mstatus.FS` dirty, per the
    /// privileged spec: the FPU state is considered "touched" the moment
    /// software writes to its control registers, not only on an FP op.
    ///
    /// Also used by the interpreter whenever an FP instruction commits a
    /// register write or accrues exception flags.
    pub(crate) fn mark_fs_dirty(&mut self) {
        self.csrs.mstatus |= csr::MSTATUS_FS_DIRTY;
        self.csrs.sstatus |= csr::MSTATUS_FS_DIRTY;
    }

    /// Decodes a write to the validation CSR `0x8D0`: a begin/pass/fail marker
    /// encoded in bits `[31:12]`.
    fn handle_val0_write(&mut self, val: u64) {
        match val >> 12 {
            csr::VAL0_BEGIN => tracing::debug!("validation run started"),
            csr::VAL0_PASS => {
                tracing::info!("validation run passed");
                self.terminate_simulation = true;
            }
            csr::VAL0_FAIL => {
                tracing::warn!("validation run failed");
                self.terminate_simulation = true;
            }
            other => tracing::debug!(marker = other, "unrecognized csr_val0 marker"),
        }
    }

    /// Decodes a write to the validation CSR `0x8D1` (§4.9 of the boot/validation protocol).
    ///
    /// An 8-bit value is emitted directly as a console byte. Anything wider
    /// is a tagged command: the high byte selects Linux/benchmark/exit-code
    /// semantics, and the low 56 bits carry the payload. A payload matching
    /// the configured terminating event stops the simulation.
    fn handle_val1_write(&mut self, val: u64) {
        if val < 0x100 {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&[val as u8]);
            let _ = stdout.flush();
            return;
        }

        let tag = val >> 56;
        let payload = val & 0x00FF_FFFF_FFFF_FFFF;

        let fires = match tag {
            csr::VAL1_TAG_LINUX => {
                self.terminating_event == "linux-boot" && payload == csr::VAL1_LINUX_BOOT_DONE
                    || self.terminating_event == "linux-terminate"
                        && payload == csr::VAL1_LINUX_TERMINATE
            }
            csr::VAL1_TAG_BENCH => {
                self.terminating_event == "bench-start" && payload == csr::VAL1_BENCH_START
                    || self.terminating_event == "bench-end" && payload == csr::VAL1_BENCH_END
            }
            csr::VAL1_TAG_EXIT_CODE => self.terminating_event == "exit",
            _ => false,
        };

        if fires {
            tracing::info!(
                retired = self.stats.instructions_retired,
                event = %self.terminating_event,
                "terminating event observed"
            );
            self.terminate_simulation = true;
            if tag == csr::VAL1_TAG_EXIT_CODE {
                self.exit_code = Some(payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::soc::System;

    fn new_cpu() -> Cpu {
        let config = Config::default();
        let system = System::new(&config);
        Cpu::new(system, &config)
    }

    #[test]
    fn val0_pass_marker_terminates_simulation() {
        let mut cpu = new_cpu();
        assert!(!cpu.terminate_simulation);
        cpu.csr_write(csr::CSR_VAL0, csr::VAL0_PASS << 12);
        assert!(cpu.terminate_simulation);
    }

    #[test]
    fn val0_fail_marker_terminates_simulation() {
        let mut cpu = new_cpu();
        cpu.csr_write(csr::CSR_VAL0, csr::VAL0_FAIL << 12);
        assert!(cpu.terminate_simulation);
    }

    #[test]
    fn val0_begin_marker_does_not_terminate_simulation() {
        let mut cpu = new_cpu();
        cpu.csr_write(csr::CSR_VAL0, csr::VAL0_BEGIN << 12);
        assert!(!cpu.terminate_simulation);
    }

    #[test]
    fn flush_all_csr_write_flushes_every_tlb() {
        let mut cpu = new_cpu();
        // Seed a TLB entry, then confirm the flush-all write invalidates it.
        cpu.mmu.read_tlb.insert(1, 2, 0b10, None);
        assert!(cpu.mmu.read_tlb.lookup(1).is_some());
        cpu.csr_write(csr::CSR_FLUSH_ALL, 0);
        assert!(cpu.mmu.read_tlb.lookup(1).is_none());
    }

    #[test]
    fn val1_single_byte_writes_console_without_terminating() {
        let mut cpu = new_cpu();
        cpu.csr_write(csr::CSR_VAL1, b'A' as u64);
        assert!(!cpu.terminate_simulation);
    }

    #[test]
    fn val1_exit_code_tag_terminates_when_configured() {
        let mut cpu = new_cpu();
        cpu.terminating_event = "exit".to_string();
        let payload = 7u64;
        cpu.csr_write(csr::CSR_VAL1, (csr::VAL1_TAG_EXIT_CODE << 56) | payload);
        assert!(cpu.terminate_simulation);
        assert_eq!(cpu.exit_code, Some(payload));
    }

    proptest::proptest! {
        #[test]
        fn satp_write_never_leaves_an_unrecognized_mode_field(val: u64) {
            let mut cpu = new_cpu();
            cpu.csr_write(csr::SATP, val);
            let mode = (cpu.csrs.satp >> csr::SATP_MODE_SHIFT) & csr::SATP_MODE_MASK;
            assert!(
                mode == csr::SATP_MODE_BARE
                    || mode == csr::SATP_MODE_SV39
                    || mode == csr::SATP_MODE_SV48
            );
        }
    }
}
