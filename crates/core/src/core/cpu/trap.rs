//! Trap Handling Logic.
//!
//! This module implements the trap and exception handling logic for the CPU. It performs
//! the following:
//! 1. **Trap Dispatch:** Identifies the trap cause and determines the appropriate handler mode.
//! 2. **Delegation:** Handles the delegation of traps from Machine mode to Supervisor mode.
//! 3. **Context Saving:** Updates CSRs (`mepc`, `mcause`, `mtval`, etc.) and modifies privilege state.
//! 4. **Return Handling:** Implements `MRET`, `SRET`, and `DRET` for returning from trap handlers.

use super::Cpu;
use crate::common::Trap;
use crate::common::constants::CAUSE_INTERRUPT_BIT;
use crate::core::arch::csr;
use crate::core::arch::mode::PrivilegeMode;
use crate::isa::privileged::cause::{exception, interrupt};

impl Cpu {
    /// Handles a trap (exception or interrupt).
    ///
    /// Delegates to supervisor mode when `priv <= S` and the matching bit in
    /// `medeleg`/`mideleg` is set; otherwise the trap is taken to machine
    /// mode. See the RISC-V privileged specification §3.1.8.
    ///
    /// # Arguments
    ///
    /// * `cause` - The type of trap that occurred.
    /// * `epc` - The Exception Program Counter (PC where the trap occurred).
    pub fn trap(&mut self, cause: Trap, epc: u64) {
        self.load_reservation = None;
        tracing::debug!(?cause, epc, priv = %self.privilege, "trap delivery");

        let (is_interrupt, code) = match cause {
            Trap::InstructionAddressMisaligned(_) => {
                (false, exception::INSTRUCTION_ADDRESS_MISALIGNED)
            }
            Trap::InstructionAccessFault(_) => (false, exception::INSTRUCTION_ACCESS_FAULT),
            Trap::IllegalInstruction(_) => (false, exception::ILLEGAL_INSTRUCTION),
            Trap::Breakpoint(_) => (false, exception::BREAKPOINT),
            Trap::LoadAddressMisaligned(_) => (false, exception::LOAD_ADDRESS_MISALIGNED),
            Trap::LoadAccessFault(_) => (false, exception::LOAD_ACCESS_FAULT),
            Trap::StoreAddressMisaligned(_) => (false, exception::STORE_ADDRESS_MISALIGNED),
            Trap::StoreAccessFault(_) => (false, exception::STORE_ACCESS_FAULT),
            Trap::EnvironmentCallFromUMode => (false, exception::ENVIRONMENT_CALL_FROM_U_MODE),
            Trap::EnvironmentCallFromSMode => (false, exception::ENVIRONMENT_CALL_FROM_S_MODE),
            Trap::EnvironmentCallFromMMode => (false, exception::ENVIRONMENT_CALL_FROM_M_MODE),
            Trap::InstructionPageFault(_) => (false, exception::INSTRUCTION_PAGE_FAULT),
            Trap::LoadPageFault(_) => (false, exception::LOAD_PAGE_FAULT),
            Trap::StorePageFault(_) => (false, exception::STORE_PAGE_FAULT),
            Trap::UserSoftwareInterrupt => (true, interrupt::USER_SOFTWARE & !CAUSE_INTERRUPT_BIT),
            Trap::SupervisorSoftwareInterrupt => {
                (true, interrupt::SUPERVISOR_SOFTWARE & !CAUSE_INTERRUPT_BIT)
            }
            Trap::MachineSoftwareInterrupt => {
                (true, interrupt::MACHINE_SOFTWARE & !CAUSE_INTERRUPT_BIT)
            }
            Trap::SupervisorTimerInterrupt => {
                (true, interrupt::SUPERVISOR_TIMER & !CAUSE_INTERRUPT_BIT)
            }
            Trap::MachineTimerInterrupt => (true, interrupt::MACHINE_TIMER & !CAUSE_INTERRUPT_BIT),
            Trap::UserExternalInterrupt => (true, interrupt::USER_EXTERNAL & !CAUSE_INTERRUPT_BIT),
            Trap::SupervisorExternalInterrupt => {
                (true, interrupt::SUPERVISOR_EXTERNAL & !CAUSE_INTERRUPT_BIT)
            }
            Trap::MachineExternalInterrupt => {
                (true, interrupt::MACHINE_EXTERNAL & !CAUSE_INTERRUPT_BIT)
            }
            Trap::DoubleFault(_) => (false, exception::HARDWARE_ERROR),
        };

        let deleg_mask = if is_interrupt {
            self.csrs.mideleg
        } else {
            self.csrs.medeleg
        };
        let delegate_to_s =
            (self.privilege <= PrivilegeMode::Supervisor) && ((deleg_mask >> code) & 1) != 0;

        let tval = match cause {
            Trap::InstructionAddressMisaligned(a)
            | Trap::InstructionAccessFault(a)
            | Trap::LoadAddressMisaligned(a)
            | Trap::LoadAccessFault(a)
            | Trap::StoreAddressMisaligned(a)
            | Trap::StoreAccessFault(a)
            | Trap::InstructionPageFault(a)
            | Trap::LoadPageFault(a)
            | Trap::StorePageFault(a) => a,
            Trap::IllegalInstruction(i) => u64::from(i),
            _ => 0,
        };

        if delegate_to_s {
            self.csrs.scause = if is_interrupt {
                CAUSE_INTERRUPT_BIT | code
            } else {
                code
            };
            self.csrs.sepc = epc;
            self.csrs.stval = tval;

            let mut sstatus = self.csrs.sstatus;
            sstatus = (sstatus & !csr::MSTATUS_SPIE)
                | (((sstatus & csr::MSTATUS_SIE != 0) as u64) << 5);
            sstatus = (sstatus & !csr::MSTATUS_SPP)
                | (((self.privilege == PrivilegeMode::Supervisor) as u64) << 8);
            sstatus &= !csr::MSTATUS_SIE;
            self.csrs.sstatus = sstatus;

            let sstatus_mask = csr::MSTATUS_SIE | csr::MSTATUS_SPIE | csr::MSTATUS_SPP;
            self.csrs.mstatus = (self.csrs.mstatus & !sstatus_mask) | (sstatus & sstatus_mask);

            self.privilege = PrivilegeMode::Supervisor;
            let stvec_base = self.csrs.stvec & !3;
            self.pc = stvec_base
                + (if (self.csrs.stvec & 1) != 0 && is_interrupt {
                    4 * code
                } else {
                    0
                });
        } else {
            self.csrs.mcause = if is_interrupt {
                CAUSE_INTERRUPT_BIT | code
            } else {
                code
            };
            self.csrs.mepc = epc;
            self.csrs.mtval = tval;

            let mut mstatus = self.csrs.mstatus;
            mstatus = (mstatus & !csr::MSTATUS_MPIE)
                | (((mstatus & csr::MSTATUS_MIE != 0) as u64) << 7);
            mstatus = (mstatus & !csr::MSTATUS_MPP)
                | ((self.privilege.to_u8() as u64) << csr::MSTATUS_MPP_SHIFT);
            mstatus &= !csr::MSTATUS_MIE;
            self.csrs.mstatus = mstatus;

            self.privilege = PrivilegeMode::Machine;
            let mtvec_base = self.csrs.mtvec & !3;
            self.pc = mtvec_base
                + (if (self.csrs.mtvec & 1) != 0 && is_interrupt {
                    4 * code
                } else {
                    0
                });
        }

        self.stats.traps_taken += 1;
    }

    /// Executes the `MRET` instruction (Return from Machine Mode).
    pub(crate) fn do_mret(&mut self) {
        self.pc = self.csrs.mepc & !1;
        let mstatus = self.csrs.mstatus;
        let mpp = (mstatus >> csr::MSTATUS_MPP_SHIFT) & csr::MSTATUS_MPP_MASK;
        let mpie = (mstatus & csr::MSTATUS_MPIE) != 0;

        self.privilege = PrivilegeMode::from_u8(mpp as u8);
        let mut new_mstatus = (mstatus & !csr::MSTATUS_MIE) | ((mpie as u64) << 3);
        new_mstatus |= csr::MSTATUS_MPIE;
        new_mstatus &= !csr::MSTATUS_MPP;

        self.csrs.mstatus = new_mstatus;
    }

    /// Executes the `SRET` instruction (Return from Supervisor Mode).
    pub(crate) fn do_sret(&mut self) {
        self.pc = self.csrs.sepc & !1;
        let sstatus = self.csrs.sstatus;
        let spp = (sstatus & csr::MSTATUS_SPP) != 0;
        let spie = (sstatus & csr::MSTATUS_SPIE) != 0;

        self.privilege = if spp {
            PrivilegeMode::Supervisor
        } else {
            PrivilegeMode::User
        };
        let mut new_sstatus = (sstatus & !csr::MSTATUS_SIE) | ((spie as u64) << 1);
        new_sstatus |= csr::MSTATUS_SPIE;
        new_sstatus &= !csr::MSTATUS_SPP;

        self.csrs.sstatus = new_sstatus;
        let mask = csr::MSTATUS_SIE | csr::MSTATUS_SPIE | csr::MSTATUS_SPP;
        self.csrs.mstatus = (self.csrs.mstatus & !mask) | (new_sstatus & mask);
    }

    /// Executes the `DRET` instruction (Return from Debug Mode).
    ///
    /// Structurally mirrors `mret`/`sret` but reads no xPP/xPIE pair — debug
    /// mode has no nested interrupt-enable stack in scope here. Privilege is
    /// restored from `dcsr.prv` and execution resumes at `dpc`.
    pub(crate) fn do_dret(&mut self) {
        let prv = self.csrs.dcsr & 0x3;
        self.privilege = PrivilegeMode::from_u8(prv as u8);
        self.pc = self.csrs.dpc;
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
    fn undelegated_exception_traps_to_machine_mode() {
        let mut cpu = new_cpu();
        cpu.privilege = PrivilegeMode::User;
        cpu.csrs.mtvec = 0x8000_1000;
        cpu.trap(Trap::IllegalInstruction(0xdead), 0x1234);
        assert_eq!(cpu.privilege, PrivilegeMode::Machine);
        assert_eq!(cpu.pc, 0x8000_1000);
        assert_eq!(cpu.csrs.mcause, exception::ILLEGAL_INSTRUCTION);
        assert_eq!(cpu.csrs.mepc, 0x1234);
        assert_eq!(cpu.csrs.mtval, 0xdead);
    }

    #[test]
    fn delegated_exception_traps_to_supervisor_mode() {
        let mut cpu = new_cpu();
        cpu.privilege = PrivilegeMode::User;
        cpu.csrs.medeleg = 1 << exception::ILLEGAL_INSTRUCTION;
        cpu.csrs.stvec = 0x8000_2000;
        cpu.trap(Trap::IllegalInstruction(0), 0x1234);
        assert_eq!(cpu.privilege, PrivilegeMode::Supervisor);
        assert_eq!(cpu.pc, 0x8000_2000);
        assert_eq!(cpu.csrs.scause, exception::ILLEGAL_INSTRUCTION);
    }

    #[test]
    fn vectored_interrupt_offsets_pc_by_4x_cause() {
        let mut cpu = new_cpu();
        cpu.privilege = PrivilegeMode::Machine;
        cpu.csrs.mtvec = 0x8000_0000 | 1; // vectored mode
        cpu.trap(Trap::MachineTimerInterrupt, 0);
        let expected_code = interrupt::MACHINE_TIMER & !CAUSE_INTERRUPT_BIT;
        assert_eq!(cpu.pc, 0x8000_0000 + 4 * expected_code);
    }

    #[test]
    fn mret_restores_privilege_and_reenables_interrupts() {
        let mut cpu = new_cpu();
        cpu.csrs.mepc = 0x9000;
        cpu.csrs.mstatus = csr::MSTATUS_MPIE | (3 << csr::MSTATUS_MPP_SHIFT);
        cpu.do_mret();
        assert_eq!(cpu.pc, 0x9000);
        assert_eq!(cpu.privilege, PrivilegeMode::Machine);
        assert_ne!(cpu.csrs.mstatus & csr::MSTATUS_MIE, 0);
    }

    #[test]
    fn sret_restores_privilege_from_spp() {
        let mut cpu = new_cpu();
        cpu.csrs.sepc = 0x9500;
        cpu.csrs.sstatus = csr::MSTATUS_SPP | csr::MSTATUS_SPIE;
        cpu.do_sret();
        assert_eq!(cpu.pc, 0x9500);
        assert_eq!(cpu.privilege, PrivilegeMode::Supervisor);
    }
}
