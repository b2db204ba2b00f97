//! Simulator: the top-level driver owning CPU state.
//!
//! A single-step interpreter has no pipeline to co-own, so unlike the
//! staged design this crate started from, `Simulator` is a thin wrapper
//! around [`Cpu`] rather than a CPU/pipeline pair — it exists so an
//! embedding host has one stable type to hold across snapshot/restore and
//! doesn't need to reach into `Cpu::tick` directly.

use crate::config::Config;
use crate::core::Cpu;
use crate::soc::System;

/// Top-level simulator: owns the CPU and drives it one instruction at a time.
#[derive(Debug)]
pub struct Simulator {
    /// CPU architectural state (registers, CSRs, MMU, bus, stats).
    pub cpu: Cpu,
}

impl Simulator {
    /// Creates a new simulator with the given system and configuration.
    pub fn new(system: System, config: &Config) -> Self {
        Self {
            cpu: Cpu::new(system, config),
        }
    }

    /// Advances the simulator by one retired instruction (or one taken
    /// trap, or one device tick while parked in `wfi`); see [`Cpu::tick`].
    pub fn tick(&mut self) -> Result<(), String> {
        self.cpu.tick()
    }

    /// Runs up to `budget` ticks, stopping early if the simulation exits.
    ///
    /// Returns the number of ticks actually executed.
    pub fn step(&mut self, budget: u64) -> Result<u64, String> {
        for i in 0..budget {
            self.cpu.tick()?;
            if self.cpu.exit_code.is_some() || self.cpu.terminate_simulation {
                return Ok(i + 1);
            }
        }
        Ok(budget)
    }

    /// Retrieves the exit code if the simulation has finished.
    pub fn take_exit(&mut self) -> Option<u64> {
        self.cpu.take_exit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_stops_early_on_exit_request() {
        let config = Config::default();
        let system = System::new(&config);
        let mut sim = Simulator::new(system, &config);
        sim.cpu.exit_code = Some(0);
        let ticks = sim.step(100).expect("step");
        assert_eq!(ticks, 1);
    }

    #[test]
    fn step_runs_full_budget_absent_termination() {
        let config = Config::default();
        let system = System::new(&config);
        let mut sim = Simulator::new(system, &config);
        // NOP-equivalent: addi x0, x0, 0 at the boot PC, repeated across RAM.
        let base = sim.cpu.pc;
        for i in 0..4u64 {
            sim.cpu
                .write_u32(base + i * 4, 0x0000_0013)
                .expect("store nop");
        }
        let ticks = sim.step(4).expect("step");
        assert_eq!(ticks, 4);
    }
}
