//! Snapshot/restore and boot-ROM synthesis (§4.10).
//!
//! A snapshot has three parts written alongside a shared `name_prefix`:
//! a `.mainram` dump of RAM past the boot-ROM carve-out, a `.re_regs` text
//! sidecar listing every architectural register and CSR in `key:hex` form
//! for human inspection, and a `.bootram` image — not a raw memory dump,
//! but a *synthesized* boot ROM that, when executed from a cold reset,
//! replays every piece of captured state back into the hart and ends in
//! a `dret` that lands on the saved `pc` at the saved privilege level.
//!
//! §6 assumes a separate low-memory ROM region to hold this image. This
//! memory map has none — RAM is the only region the fast `ram_ptr` path
//! assumes exists (see `loader`'s module doc for the same constraint) —
//! so the synthesized ROM instead occupies a fixed [`BOOT_ROM_SIZE`]-byte
//! carve-out at the start of RAM, the same way the reset-vector trampoline
//! does for a fresh boot. `.mainram` covers everything past the carve-out.
//!
//! Taking a snapshot while `pc` is inside that carve-out would mean
//! overwriting the ROM the hart is actively executing out of, so it is
//! rejected with [`SimError::SnapshotInsideRom`].

use crate::config::Config;
use crate::core::Cpu;
use crate::core::arch::csr;
use crate::core::arch::mode::PrivilegeMode;
use crate::sim::SimError;
use crate::sim::encode;
use std::fs;

/// Total size of the synthesized boot ROM carve-out at the start of RAM.
const BOOT_ROM_SIZE: u64 = 4096;
/// Offset of the data pool within the ROM; code is emitted below this,
/// literal restore values above it. Fixed rather than computed from the
/// actual code length so the pool's PC-relative distance from any given
/// instruction is known before that instruction is emitted.
const BOOT_ROM_CODE_HALF: u64 = BOOT_ROM_SIZE / 2;

const MAINRAM_EXT: &str = ".mainram";
const BOOTRAM_EXT: &str = ".bootram";
const REGS_EXT: &str = ".re_regs";

/// Scratch GPRs the boot ROM clobbers while restoring everything else;
/// both are restored to their true final values in the GPR-restore pass,
/// which always runs last.
const T0: u32 = 5;
const T1: u32 = 6;

/// Every named CSR, dumped to `.re_regs` for inspection. Includes
/// read-only identification registers and derived views (`sstatus`,
/// `sie`, `sip`) that the ROM never replays directly because restoring
/// their backing registers (`mstatus`, `mie`/`mideleg`, `mip`) already
/// reconstructs them.
const ALL_CSRS: &[(&str, u32)] = &[
    ("mvendorid", csr::MVENDORID),
    ("marchid", csr::MARCHID),
    ("mimpid", csr::MIMPID),
    ("mhartid", csr::MHARTID),
    ("fflags", csr::FFLAGS),
    ("frm", csr::FRM),
    ("fcsr", csr::FCSR),
    ("mstatus", csr::MSTATUS),
    ("misa", csr::MISA),
    ("medeleg", csr::MEDELEG),
    ("mideleg", csr::MIDELEG),
    ("mie", csr::MIE),
    ("mtvec", csr::MTVEC),
    ("mcounteren", csr::MCOUNTEREN),
    ("mscratch", csr::MSCRATCH),
    ("mepc", csr::MEPC),
    ("mcause", csr::MCAUSE),
    ("mtval", csr::MTVAL),
    ("mip", csr::MIP),
    ("sstatus", csr::SSTATUS),
    ("sie", csr::SIE),
    ("stvec", csr::STVEC),
    ("scounteren", csr::SCOUNTEREN),
    ("sscratch", csr::SSCRATCH),
    ("sepc", csr::SEPC),
    ("scause", csr::SCAUSE),
    ("stval", csr::STVAL),
    ("sip", csr::SIP),
    ("stimecmp", csr::STIMECMP),
    ("satp", csr::SATP),
    ("cycle", csr::CYCLE),
    ("time", csr::TIME),
    ("instret", csr::INSTRET),
    ("mcycle", csr::MCYCLE),
    ("minstret", csr::MINSTRET),
    ("tselect", csr::TSELECT),
    ("tdata1", csr::TDATA1),
    ("tdata2", csr::TDATA2),
    ("tdata3", csr::TDATA3),
    ("dcsr", csr::DCSR),
    ("dpc", csr::DPC),
    ("dscratch0", csr::DSCRATCH0),
];

/// CSRs the boot ROM restores via a literal `csrrw`. Excludes read-only
/// identification registers, `misa` (WARL, writes are ignored), derived
/// views, the write-triggered validation CSRs (`0x8d0`/`0x8d1`, replaying
/// one would re-fire the begin/pass/fail/exit protocol), and `dcsr`/`dpc`,
/// which [`emit_priv_pc_restore`] handles together with the final `dret`.
const RESTORABLE_CSRS: &[u32] = &[
    csr::FCSR,
    csr::MSTATUS,
    csr::MEDELEG,
    csr::MIDELEG,
    csr::MIE,
    csr::MTVEC,
    csr::MCOUNTEREN,
    csr::MSCRATCH,
    csr::MEPC,
    csr::MCAUSE,
    csr::MTVAL,
    csr::MIP,
    csr::STVEC,
    csr::SCOUNTEREN,
    csr::SSCRATCH,
    csr::SEPC,
    csr::SCAUSE,
    csr::STVAL,
    csr::STIMECMP,
    csr::SATP,
    csr::MCYCLE,
    csr::MINSTRET,
    csr::TSELECT,
    csr::TDATA1,
    csr::TDATA2,
    csr::TDATA3,
    csr::DSCRATCH0,
];

/// Serializes `cpu`'s RAM and architectural state to `<name_prefix>.mainram`,
/// `<name_prefix>.bootram`, and `<name_prefix>.re_regs`.
///
/// # Errors
///
/// Returns [`SimError::SnapshotInsideRom`] if `pc` is currently inside the
/// boot-ROM carve-out, [`SimError::RomOverflow`] if the synthesized replay
/// sequence doesn't fit in [`BOOT_ROM_SIZE`], or [`SimError::SnapshotIo`] if
/// any of the three files can't be written.
pub fn snapshot(cpu: &mut Cpu, config: &Config, name_prefix: &str) -> Result<(), SimError> {
    let rom_end = cpu.ram_start + BOOT_ROM_SIZE;
    if cpu.pc >= cpu.ram_start && cpu.pc < rom_end {
        return Err(SimError::SnapshotInsideRom { pc: cpu.pc });
    }

    write_re_regs(cpu, &format!("{name_prefix}{REGS_EXT}"))?;

    let main_ram = read_ram(cpu, rom_end, cpu.ram_end);
    write_file(&format!("{name_prefix}{MAINRAM_EXT}"), &main_ram)?;

    let rom = synthesize_boot_rom(cpu, config)?;
    write_file(&format!("{name_prefix}{BOOTRAM_EXT}"), &rom)
}

/// Restores `cpu`'s RAM from `<name_prefix>.mainram`/`.bootram` and points
/// execution at the synthesized ROM's reset vector.
///
/// The hart always resumes replay in Machine mode — the same way a fresh
/// [`crate::sim::loader::setup_boot`] does — since the ROM's CSR restores
/// need Machine privilege regardless of which mode was captured; the final
/// `dret` the ROM ends with drops to the saved privilege and `pc`.
///
/// # Errors
///
/// Returns [`SimError::SnapshotIo`] if either file can't be read, or
/// [`SimError::RestoreFormat`] if either is the wrong length for this
/// CPU's configured RAM size.
pub fn restore(cpu: &mut Cpu, name_prefix: &str) -> Result<(), SimError> {
    let bootram_path = format!("{name_prefix}{BOOTRAM_EXT}");
    let mainram_path = format!("{name_prefix}{MAINRAM_EXT}");
    let rom = read_file(&bootram_path)?;
    let main_ram = read_file(&mainram_path)?;

    if rom.len() as u64 != BOOT_ROM_SIZE {
        return Err(SimError::RestoreFormat {
            path: bootram_path,
            reason: format!("expected {BOOT_ROM_SIZE} bytes, found {}", rom.len()),
        });
    }
    let rom_end = cpu.ram_start + BOOT_ROM_SIZE;
    let expected_main_len = (cpu.ram_end - rom_end) as usize;
    if main_ram.len() != expected_main_len {
        return Err(SimError::RestoreFormat {
            path: mainram_path,
            reason: format!("expected {expected_main_len} bytes, found {}", main_ram.len()),
        });
    }

    write_ram(cpu, cpu.ram_start, &rom);
    write_ram(cpu, rom_end, &main_ram);
    cpu.pc = cpu.ram_start;
    cpu.privilege = PrivilegeMode::Machine;
    Ok(())
}

/// Writes the `key:hex` text sidecar (§6). Informational only — `restore`
/// never reads this file back; every bit of state it describes is also
/// baked into the synthesized ROM.
fn write_re_regs(cpu: &Cpu, path: &str) -> Result<(), SimError> {
    let mut out = String::new();
    out.push_str(&format!("pc:{:x}\n", cpu.pc));
    out.push_str(&format!("priv:{}\n", priv_letter(cpu.privilege)));
    for i in 1..32u32 {
        out.push_str(&format!("x{i}:{:x}\n", cpu.regs.read(i as usize)));
    }
    for i in 0..32u32 {
        out.push_str(&format!("f{i}:{:x}\n", cpu.regs.read_f(i as usize)));
    }
    for (name, addr) in ALL_CSRS {
        out.push_str(&format!("{name}:{:x}\n", cpu.csr_read(*addr)));
    }
    fs::write(path, out).map_err(|source| SimError::SnapshotIo {
        path: path.to_string(),
        source,
    })
}

fn priv_letter(mode: PrivilegeMode) -> char {
    match mode {
        PrivilegeMode::User => 'U',
        PrivilegeMode::Supervisor => 'S',
        PrivilegeMode::Machine => 'M',
    }
}

/// Builds the replay sequence: every [`RESTORABLE_CSRS`] entry via
/// `csrrw`, then every FP register via `fld`, then CLINT's `mtimecmp`/
/// `mtime` via `sd`, then every GPR (including `t0`/`t1`, restored last so
/// their scratch use above is overwritten), then `dcsr`/`dpc` and a final
/// `dret`.
///
/// Code and data pool are emitted in a single forward pass: the pool
/// always starts at the fixed [`BOOT_ROM_CODE_HALF`] offset, so an
/// instruction's PC-relative distance to its operand is known without a
/// second pass over the code.
fn synthesize_boot_rom(cpu: &mut Cpu, config: &Config) -> Result<Vec<u8>, SimError> {
    let mut code = Vec::new();
    let mut data = Vec::new();

    for addr in RESTORABLE_CSRS {
        let value = cpu.csr_read(*addr);
        emit_pool_load(&mut code, &mut data, T1, false, value)?;
        push_code(&mut code, encode::csrrw(0, *addr, T1))?;
    }

    for i in 0..32u32 {
        let value = cpu.regs.read_f(i as usize);
        emit_pool_load(&mut code, &mut data, i, true, value)?;
    }

    let clint_base = config.system.clint_base;
    let mtimecmp = cpu.bus.bus.read_u64(clint_base + 0x4000);
    let mtime = cpu.bus.bus.read_u64(clint_base + 0xBFF8);
    emit_mmio_restore(&mut code, &mut data, clint_base + 0x4000, mtimecmp)?;
    emit_mmio_restore(&mut code, &mut data, clint_base + 0xBFF8, mtime)?;

    for i in 1..32u32 {
        let value = cpu.regs.read(i as usize);
        emit_pool_load(&mut code, &mut data, i, false, value)?;
    }

    emit_priv_pc_restore(&mut code, &mut data, cpu.privilege, cpu.pc, cpu.csrs.dcsr)?;
    push_code(&mut code, encode::DRET)?;

    let mut rom = vec![0u8; BOOT_ROM_SIZE as usize];
    rom[..code.len()].copy_from_slice(&code);
    let data_start = BOOT_ROM_CODE_HALF as usize;
    rom[data_start..data_start + data.len()].copy_from_slice(&data);
    Ok(rom)
}

/// Appends a pool-relative `auipc`+`addi`+`ld`/`fld` that loads `value`
/// (placed fresh in the data pool) into GPR or FPR `rd`.
fn emit_pool_load(
    code: &mut Vec<u8>,
    data: &mut Vec<u8>,
    rd: u32,
    is_fp: bool,
    value: u64,
) -> Result<(), SimError> {
    if data.len() + 8 > BOOT_ROM_CODE_HALF as usize {
        return Err(SimError::RomOverflow {
            region: "data",
            used: data.len() + 8,
            capacity: BOOT_ROM_CODE_HALF as usize,
        });
    }
    let data_off = BOOT_ROM_CODE_HALF + data.len() as u64;
    data.extend_from_slice(&value.to_le_bytes());

    let code_off = code.len() as u64;
    let (hi, lo) = split_imm32(data_off as i64 - code_off as i64);
    push_code(code, encode::auipc(T0, hi))?;
    push_code(code, encode::addi(T0, T0, lo))?;
    push_code(
        code,
        if is_fp {
            encode::fld(rd, T0, 0)
        } else {
            encode::ld(rd, T0, 0)
        },
    )
}

/// Appends a `lui`+`addi` absolute-address load into `t0`, a pool-relative
/// load of `value` into `t1`, and an `sd` that stores it to `addr`.
fn emit_mmio_restore(
    code: &mut Vec<u8>,
    data: &mut Vec<u8>,
    addr: u64,
    value: u64,
) -> Result<(), SimError> {
    let (hi, lo) = split_imm32(addr as i64);
    push_code(code, encode::lui(T0, hi))?;
    push_code(code, encode::addi(T0, T0, lo))?;
    emit_pool_load(code, data, T1, false, value)?;
    push_code(code, encode::sd(T0, T1, 0))
}

/// Writes `dcsr` (with `prv` set to `saved_priv`, every other bit carried
/// over from the live value so `stopcount`/`stoptime` survive the round
/// trip) and `dpc` (set to `saved_pc`). The final `dret` the caller emits
/// applies both: `do_dret` sets `self.privilege` from `dcsr[1:0]` and
/// `self.pc` from `dpc` (`core::cpu::trap`).
fn emit_priv_pc_restore(
    code: &mut Vec<u8>,
    data: &mut Vec<u8>,
    saved_priv: PrivilegeMode,
    saved_pc: u64,
    live_dcsr: u64,
) -> Result<(), SimError> {
    let dcsr_value = (live_dcsr & !0x3) | u64::from(saved_priv.to_u8() & 0x3);
    emit_pool_load(code, data, T1, false, dcsr_value)?;
    push_code(code, encode::csrrw(0, csr::DCSR, T1))?;
    emit_pool_load(code, data, T1, false, saved_pc)?;
    push_code(code, encode::csrrw(0, csr::DPC, T1))
}

fn push_code(code: &mut Vec<u8>, word: u32) -> Result<(), SimError> {
    if code.len() + 4 > BOOT_ROM_CODE_HALF as usize {
        return Err(SimError::RomOverflow {
            region: "code",
            used: code.len() + 4,
            capacity: BOOT_ROM_CODE_HALF as usize,
        });
    }
    code.extend_from_slice(&word.to_le_bytes());
    Ok(())
}

/// Splits a 32-bit-range value into the `(hi20, lo12)` pair an
/// `auipc`/`lui` + `addi` pair reconstructs: `(hi20 << 12) + lo12 == value`
/// with `lo12` sign-extended, the standard RISC-V "la" relocation split.
fn split_imm32(value: i64) -> (i32, i32) {
    let value = value as i32;
    let hi = (value + 0x800) >> 12;
    let lo = value - (hi << 12);
    (hi, lo)
}

/// # Safety invariant relied on
///
/// Reads directly out of [`Cpu::ram_ptr`] rather than through the bus, on
/// the same grounds as the hot-path load/store helpers in `core::cpu::memory`:
/// `[start, start + (end - start))` must fall within `[ram_start, ram_end)`.
fn read_ram(cpu: &Cpu, start: u64, end: u64) -> Vec<u8> {
    let len = (end - start) as usize;
    let offset = (start - cpu.ram_start) as usize;
    // SAFETY: caller-supplied range is within [ram_start, ram_end), the
    // invariant documented on `Cpu::ram_ptr`.
    unsafe { std::slice::from_raw_parts(cpu.ram_ptr.add(offset), len) }.to_vec()
}

/// Writes `bytes` starting at physical address `start`. Same invariant as
/// [`read_ram`].
fn write_ram(cpu: &mut Cpu, start: u64, bytes: &[u8]) {
    let offset = (start - cpu.ram_start) as usize;
    // SAFETY: caller-supplied range is within [ram_start, ram_end), the
    // invariant documented on `Cpu::ram_ptr`.
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), cpu.ram_ptr.add(offset), bytes.len()) };
}

fn write_file(path: &str, bytes: &[u8]) -> Result<(), SimError> {
    fs::write(path, bytes).map_err(|source| SimError::SnapshotIo {
        path: path.to_string(),
        source,
    })
}

fn read_file(path: &str) -> Result<Vec<u8>, SimError> {
    fs::read(path).map_err(|source| SimError::SnapshotIo {
        path: path.to_string(),
        source,
    })
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
    fn boot_rom_fits_the_documented_layout() {
        let mut cpu = new_cpu();
        let config = Config::default();
        let rom = synthesize_boot_rom(&mut cpu, &config).expect("rom synthesis");
        assert_eq!(rom.len() as u64, BOOT_ROM_SIZE);
    }

    #[test]
    fn snapshot_refuses_while_pc_is_inside_the_rom_carve_out() {
        let mut cpu = new_cpu();
        let config = Config::default();
        cpu.pc = cpu.ram_start;
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = dir.path().join("dump");
        let err = snapshot(&mut cpu, &config, prefix.to_str().expect("utf8 path"))
            .expect_err("snapshot inside rom must fail");
        assert!(matches!(err, SimError::SnapshotInsideRom { .. }));
    }

    #[test]
    fn restore_replays_csrs_and_privilege_through_the_synthesized_rom() {
        let mut cpu = new_cpu();
        let config = Config::default();
        cpu.pc = cpu.ram_start + 0x2000;
        cpu.csr_write(csr::MSCRATCH, 0xABCD_1234);
        cpu.privilege = PrivilegeMode::Supervisor;
        let saved_pc = cpu.pc;

        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = dir.path().join("dump");
        let prefix = prefix.to_str().expect("utf8 path");
        snapshot(&mut cpu, &config, prefix).expect("snapshot");

        let mut fresh = new_cpu();
        restore(&mut fresh, prefix).expect("restore");
        assert_eq!(fresh.pc, fresh.ram_start);
        assert_eq!(fresh.privilege, PrivilegeMode::Machine);

        for _ in 0..300 {
            fresh.tick().expect("rom step");
            if fresh.pc == saved_pc {
                break;
            }
        }
        assert_eq!(fresh.pc, saved_pc);
        assert_eq!(fresh.privilege, PrivilegeMode::Supervisor);
        assert_eq!(fresh.csr_read(csr::MSCRATCH), 0xABCD_1234);
    }

    #[test]
    fn restore_rejects_a_mainram_file_of_the_wrong_size() {
        let mut cpu = new_cpu();
        let config = Config::default();
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = dir.path().join("dump");
        let prefix = prefix.to_str().expect("utf8 path");
        snapshot(&mut cpu, &config, prefix).expect("snapshot");

        fs::write(format!("{prefix}{MAINRAM_EXT}"), b"too short").expect("truncate mainram");

        let mut fresh = new_cpu();
        let err = restore(&mut fresh, prefix).expect_err("size mismatch must be rejected");
        assert!(matches!(err, SimError::RestoreFormat { .. }));
    }
}
