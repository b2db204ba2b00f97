//! Memory-Mapped IO Devices.
//!
//! This module contains the baseline devices wired onto the physical memory
//! map: the timer/software-interrupt block (CLINT), the external interrupt
//! aggregator (PLIC), and the console/shutdown mailbox (HTIF). VirtIO,
//! framebuffer, and disk-image handling live outside this crate; a host
//! driver registers them on the bus through the same `Device` trait.

/// Core Local Interruptor (timer and software interrupt controller).
pub mod clint;

/// Host-Target Interface: legacy tohost/fromhost console and shutdown gate.
pub mod htif;

/// Platform-Level Interrupt Controller (PLIC).
pub mod plic;

pub use clint::Clint;
pub use htif::Htif;
pub use plic::Plic;

pub use crate::soc::traits::Device;
