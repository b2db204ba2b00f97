//! Host-Target Interface (HTIF) device.
//!
//! Implements the legacy fesvr `tohost`/`fromhost` mailbox protocol: two
//! 64-bit registers, each written/read as a pair of 32-bit words. A write to
//! `tohost` is decoded as `(device:8, cmd:8, payload:48)` in the top two
//! bytes and low 48 bits respectively; `device=1,cmd=1` is a console byte
//! (the payload's low byte), `device=1,cmd=0` is a keyboard-interrupt
//! request, and the literal value `1` is a power-off request.

use crate::soc::devices::Device;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const TOHOST_OFFSET: u64 = 0x0;
const FROMHOST_OFFSET: u64 = 0x8;

const HTIF_DEVICE_CONSOLE: u64 = 1;
const HTIF_CMD_CONSOLE_WRITE: u64 = 1;
const HTIF_CMD_CONSOLE_READ: u64 = 0;

/// HTIF device: intercepts writes to `tohost` and answers through `fromhost`.
pub struct Htif {
    base_addr: u64,
    tohost: u64,
    fromhost: u64,
    /// Shared with the host driver; `Some(code)` once a power-off has been requested.
    exit_signal: Arc<AtomicU64>,
}

impl Htif {
    /// Creates a new HTIF device at `base_addr` sharing `exit_signal` with the driver.
    pub fn new(base_addr: u64, exit_signal: Arc<AtomicU64>) -> Self {
        Self {
            base_addr,
            tohost: 0,
            fromhost: 0,
            exit_signal,
        }
    }

    fn process_tohost(&mut self) {
        let val = self.tohost;
        if val == 0 {
            return;
        }
        if val == 1 {
            self.exit_signal.store(0, Ordering::Relaxed);
            return;
        }

        let device = val >> 56;
        let cmd = (val >> 48) & 0xFF;
        let payload = val & 0x0000_FFFF_FFFF_FFFF;

        if device == HTIF_DEVICE_CONSOLE && cmd == HTIF_CMD_CONSOLE_WRITE {
            let byte = (payload & 0xFF) as u8;
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&[byte]);
            let _ = stdout.flush();
            self.fromhost = (HTIF_DEVICE_CONSOLE << 56) | (HTIF_CMD_CONSOLE_WRITE << 48);
            self.tohost = 0;
        } else if device == HTIF_DEVICE_CONSOLE && cmd == HTIF_CMD_CONSOLE_READ {
            self.tohost = 0;
        } else {
            tracing::warn!(tohost = val, "unhandled HTIF tohost command");
            self.tohost = 0;
        }
    }
}

impl Device for Htif {
    fn name(&self) -> &str {
        "HTIF"
    }

    fn address_range(&self) -> (u64, u64) {
        (self.base_addr, 0x10)
    }

    fn read_u8(&mut self, offset: u64) -> u8 {
        (self.read_u32(offset & !3) >> ((offset & 3) * 8)) as u8
    }

    fn read_u16(&mut self, offset: u64) -> u16 {
        (self.read_u32(offset & !3) >> ((offset & 3) * 8)) as u16
    }

    fn read_u32(&mut self, offset: u64) -> u32 {
        match offset {
            o if o == FROMHOST_OFFSET => self.fromhost as u32,
            o if o == FROMHOST_OFFSET + 4 => (self.fromhost >> 32) as u32,
            o if o == TOHOST_OFFSET => self.tohost as u32,
            o if o == TOHOST_OFFSET + 4 => (self.tohost >> 32) as u32,
            _ => 0,
        }
    }

    fn read_u64(&mut self, offset: u64) -> u64 {
        match offset {
            o if o == TOHOST_OFFSET => self.tohost,
            o if o == FROMHOST_OFFSET => self.fromhost,
            _ => 0,
        }
    }

    fn write_u8(&mut self, _offset: u64, _val: u8) {}
    fn write_u16(&mut self, _offset: u64, _val: u16) {}

    fn write_u32(&mut self, offset: u64, val: u32) {
        match offset {
            o if o == TOHOST_OFFSET => {
                self.tohost = (self.tohost & 0xFFFF_FFFF_0000_0000) | u64::from(val);
                self.process_tohost();
            }
            o if o == TOHOST_OFFSET + 4 => {
                self.tohost = (self.tohost & 0x0000_0000_FFFF_FFFF) | (u64::from(val) << 32);
                self.process_tohost();
            }
            o if o == FROMHOST_OFFSET => {
                self.fromhost = (self.fromhost & 0xFFFF_FFFF_0000_0000) | u64::from(val);
            }
            o if o == FROMHOST_OFFSET + 4 => {
                self.fromhost = (self.fromhost & 0x0000_0000_FFFF_FFFF) | (u64::from(val) << 32);
            }
            _ => {}
        }
    }

    fn write_u64(&mut self, offset: u64, val: u64) {
        match offset {
            o if o == TOHOST_OFFSET => {
                self.tohost = val;
                self.process_tohost();
            }
            o if o == FROMHOST_OFFSET => self.fromhost = val,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_write_acks_and_emits() {
        let exit = Arc::new(AtomicU64::new(u64::MAX));
        let mut htif = Htif::new(0x4000_8000, exit);
        htif.write_u64(TOHOST_OFFSET, 0x0101_0000_0000_0041);
        assert_eq!(htif.tohost, 0);
        assert_eq!(htif.fromhost, 0x0101_0000_0000_0000);
    }

    #[test]
    fn literal_one_requests_power_off() {
        let exit = Arc::new(AtomicU64::new(u64::MAX));
        let mut htif = Htif::new(0x4000_8000, exit.clone());
        htif.write_u64(TOHOST_OFFSET, 1);
        assert_eq!(exit.load(Ordering::Relaxed), 0);
    }
}
