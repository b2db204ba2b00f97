//! Simulation utilities: the top-level driver, program loading, and
//! snapshot/restore of CPU and RAM state.
//!
//! Provides the pieces a host binary wires together: [`simulator::Simulator`]
//! owns the CPU and exposes a single-step `tick`, [`loader`] places a boot
//! image and device tree in RAM and sets up the reset vector, and
//! [`snapshot`] serializes a running machine to disk and synthesizes a boot
//! ROM that replays it on restore.

/// Shared RV64I/Zicsr/D instruction encoders used by `loader` and `snapshot`.
pub(crate) mod encode;
/// Program loading: raw binaries, the reset-vector trampoline, and bare-metal boot setup.
pub mod loader;
/// Top-level simulator owning the CPU.
pub mod simulator;
/// Snapshot/restore and boot-ROM synthesis (§4.10).
pub mod snapshot;

/// Error kinds surfaced by the simulation driver (as opposed to architectural
/// traps, which are never `Result::Err` — see `common::Trap`).
#[derive(thiserror::Error, Debug)]
pub enum SimError {
    /// Failed to read or write a snapshot's RAM or register sidecar file.
    #[error("snapshot I/O error on {path}: {source}")]
    SnapshotIo {
        /// Path of the file that failed.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file read back during restore was malformed, e.g. a
    /// `.re_regs` sidecar that failed to parse or a `.mainram`/`.bootram`
    /// dump of the wrong length for the CPU's configured RAM size.
    #[error("malformed snapshot file {path}: {reason}")]
    RestoreFormat {
        /// Path of the offending file.
        path: String,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// A snapshot was requested while the PC was inside the synthesized boot ROM.
    #[error("cannot snapshot while executing inside the boot ROM (pc={pc:#x})")]
    SnapshotInsideRom {
        /// The offending program counter.
        pc: u64,
    },

    /// The boot ROM's code or data region was exhausted while synthesizing a snapshot.
    #[error("boot ROM synthesis overflow: {region} region exhausted ({used}/{capacity} bytes)")]
    RomOverflow {
        /// Which half overflowed ("code" or "data").
        region: &'static str,
        /// Bytes already emitted into that half.
        used: usize,
        /// Total capacity of that half.
        capacity: usize,
    },

    /// Failed to parse an ELF image handed to the loader.
    #[error("failed to parse boot image: {0}")]
    ImageParse(#[from] object::read::Error),
}

/// Runner-facing exit codes for [`SimError`] variants, matching the legacy
/// `dromajo`-derived convention the embedding host translates errors into.
impl SimError {
    /// Maps this error to the runner's exit-code convention (§6). Only a
    /// host binary built on this crate should act on this value; the
    /// library itself never calls `process::exit`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            SimError::SnapshotIo { .. } | SimError::RestoreFormat { .. } => -3,
            SimError::SnapshotInsideRom { .. } => -4,
            SimError::RomOverflow { .. } => -6,
            SimError::ImageParse(_) => -2,
        }
    }
}
