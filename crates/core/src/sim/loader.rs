//! Binary Loader and System Initialization.
//!
//! This module provides utilities for loading binaries and setting up the
//! initial CPU state. It performs:
//! 1. **Binary loading:** reads a raw or ELF boot image from disk into a byte buffer.
//! 2. **Reset-vector trampoline:** installs the `auipc/addi/csrr/ld/jr` trampoline
//!    (§6) a real board's boot ROM would contain, handing control to firmware or a
//!    bare-metal image with `a0`/`a1` set to hart ID / DTB address.
//! 3. **Bare-metal fallback:** when no firmware image is supplied, jumps straight
//!    to the kernel/program entry point in Machine mode.
//!
//! Locating and fetching the firmware/kernel/DTB bytes themselves (disk images,
//! VirtIO, FDT generation) is the embedding host's job; this module only places
//! bytes the host already read into RAM and arranges for the hart to find them.
//!
//! §6 places the trampoline at the fixed physical address `0x1000`, below main
//! RAM, on the assumption of a dedicated low-memory ROM region. This physical
//! memory map has no such region — RAM is the one contiguous range the fast
//! `ram_ptr` path (`Cpu::new`) assumes — so the trampoline is installed at the
//! start of RAM instead; the FDT blob it points `a1` at follows immediately
//! after it, exactly as §6 describes relative to the trampoline itself.

use crate::config::Config;
use crate::core::Cpu;
use crate::core::arch::csr;
use crate::core::arch::mode::PrivilegeMode;
use crate::isa::abi;
use crate::isa::privileged::opcodes as sys_ops;
use crate::isa::rv64i::opcodes as i_op;
use crate::sim::SimError;
use crate::sim::encode;
use object::read::elf::ElfFile64;
use object::{Object, ObjectSegment};
use std::fs;

/// Size in bytes of the reset-vector trampoline, including its trailing
/// 8-byte entry-point data word. The FDT (or any data a loader places for
/// `a1` to reference) must start at `trampoline_base + TRAMPOLINE_SIZE`.
pub const TRAMPOLINE_SIZE: u64 = 32;

/// Reads a binary file from disk into a byte vector.
///
/// # Errors
///
/// Returns [`SimError::SnapshotIo`] if the file cannot be read. The variant
/// is shared with the snapshot subsystem since both are host I/O failures
/// the caller is expected to translate into the runner's exit codes (§6/§7).
pub fn load_binary(path: &str) -> Result<Vec<u8>, SimError> {
    fs::read(path).map_err(|source| SimError::SnapshotIo {
        path: path.to_string(),
        source,
    })
}

/// Loads an ELF image's loadable segments into RAM at their link-time
/// physical addresses and returns the entry point.
///
/// Non-ELF (raw binary) images are the caller's responsibility to place via
/// [`crate::soc::System::load_binary_at`] directly; this helper only covers
/// the ELF path, since a raw blob carries no address or entry metadata.
///
/// # Errors
///
/// Returns [`SimError::ImageParse`] if `data` is not a well-formed 64-bit ELF.
pub fn load_elf(cpu: &mut Cpu, data: &[u8]) -> Result<u64, SimError> {
    let elf = ElfFile64::<object::Endianness>::parse(data)?;
    for segment in elf.segments() {
        if let Ok(bytes) = segment.data() {
            if !bytes.is_empty() {
                cpu.bus.load_binary_at(bytes, segment.address());
            }
        }
    }
    Ok(elf.entry())
}

/// Installs the reset-vector trampoline at `base` (§6):
/// `auipc t0,0; addi a1,t0,32; csrr a0,mhartid; ld t0,24(t0); jr t0; <pad>; <entry, 8 bytes>`,
/// `TRAMPOLINE_SIZE` bytes total.
///
/// `a1` ends up pointing `TRAMPOLINE_SIZE` bytes past `base`, where a DTB blob
/// should be placed by the caller; `a0` carries `mhartid` (always 0, single
/// hart); the final indirect jump lands on `entry`.
fn install_reset_vector(cpu: &mut Cpu, base: u64, entry: u64) {
    const T0: u32 = 5;
    const A0: u32 = abi::REG_A0 as u32;
    const A1: u32 = abi::REG_A1 as u32;

    let words = [
        encode::auipc(T0, 0),
        encode::addi(A1, T0, TRAMPOLINE_SIZE as i32),
        encode::csrrs(A0, csr::MHARTID, 0),
        encode::ld(T0, T0, 24),
        encode::jalr(0, T0),
        0,
    ];
    let mut bytes = Vec::with_capacity(TRAMPOLINE_SIZE as usize);
    for w in words {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes.extend_from_slice(&entry.to_le_bytes());
    debug_assert_eq!(bytes.len() as u64, TRAMPOLINE_SIZE);
    cpu.bus.load_binary_at(&bytes, base);
}

/// Sets up boot state for a firmware-mediated or bare-metal boot.
///
/// The reset-vector trampoline always occupies the first [`TRAMPOLINE_SIZE`]
/// bytes of RAM; `pc` starts there on every boot path. If `dtb` is supplied
/// it is placed immediately after the trampoline, where the trampoline's
/// `a1` points. If `firmware` is supplied, it is loaded just past the DTB
/// and the trampoline jumps to it with `a0 = hartid`, `a1 = dtb_addr`, after
/// which firmware is responsible for finding and jumping to `kernel` itself.
/// With no firmware, the trampoline jumps directly to the kernel/program
/// entry point loaded at `ram_base + kernel_offset`, and the hart starts in
/// Machine mode at that address via an `mret` performed by a one-instruction
/// bounce placed right after the DTB.
///
/// # Arguments
///
/// * `cpu` - CPU whose RAM and initial register/PC/privilege state this populates.
/// * `config` - System configuration (RAM base, kernel offset).
/// * `firmware` - Optional firmware image bytes (e.g. an SBI implementation).
/// * `kernel` - Optional kernel/program image bytes, placed at `ram_base + kernel_offset`.
/// * `dtb` - Optional device-tree blob bytes.
pub fn setup_boot(
    cpu: &mut Cpu,
    config: &Config,
    firmware: Option<&[u8]>,
    kernel: Option<&[u8]>,
    dtb: Option<&[u8]>,
) {
    let ram_base = config.system.ram_base;
    let kernel_addr = ram_base + config.system.kernel_offset;
    let dtb_addr = ram_base + TRAMPOLINE_SIZE;

    if let Some(dtb_data) = dtb {
        cpu.bus.load_binary_at(dtb_data, dtb_addr);
    }
    if let Some(kernel_data) = kernel {
        cpu.bus.load_binary_at(kernel_data, kernel_addr);
    }

    cpu.privilege = PrivilegeMode::Machine;
    cpu.regs.write(abi::REG_A0, 0);
    cpu.regs.write(abi::REG_A1, dtb_addr);

    let entry = if let Some(fw_data) = firmware {
        let fw_addr = dtb_addr + 0x10_0000;
        cpu.bus.load_binary_at(fw_data, fw_addr);
        fw_addr
    } else {
        let mret_addr = dtb_addr + 0x1000;
        cpu.bus
            .load_binary_at(&sys_ops::MRET.to_le_bytes(), mret_addr);
        cpu.csr_write(csr::MEPC, kernel_addr);
        mret_addr
    };
    install_reset_vector(cpu, ram_base, entry);
    cpu.pc = ram_base;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soc::System;

    fn new_cpu() -> Cpu {
        let config = Config::default();
        let system = System::new(&config);
        Cpu::new(system, &config)
    }

    #[test]
    fn bare_metal_boot_starts_at_ram_base_in_machine_mode() {
        let mut cpu = new_cpu();
        let config = Config::default();
        let kernel = vec![0u8; 16];
        setup_boot(&mut cpu, &config, None, Some(&kernel), None);
        assert_eq!(cpu.pc, config.system.ram_base);
        assert_eq!(cpu.privilege, PrivilegeMode::Machine);
    }

    #[test]
    fn reset_vector_first_word_is_auipc() {
        let mut cpu = new_cpu();
        let ram_base = Config::default().system.ram_base;
        install_reset_vector(&mut cpu, ram_base, 0x8000_1000);
        let w0 = cpu.read_u32(ram_base).expect("read trampoline") as u32;
        assert_eq!(w0 & 0x7f, i_op::OP_AUIPC);
    }
}
