//! Core processor implementation.
//!
//! This module contains the main CPU implementation: architectural state,
//! the single-step interpreter, and the execution units it dispatches to.

/// Architecture-specific components (CSRs, register files, privilege modes, traps).
pub mod arch;

/// CPU core implementation and execution orchestration.
pub mod cpu;

/// Execution units (ALU, FPU, LSU, MMU).
pub mod units;

pub use self::cpu::Cpu;
