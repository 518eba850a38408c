// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Workload generator: synthesizes processes and spreads them round-robin
//! across the CPUs.

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimConfig;
use crate::proc::{Process, SchedClass, PRIO_NORM_MAX, PRIO_NORM_MIN};
use crate::rq::RunQueueSet;
use crate::sim::ShutdownHandle;

/// Shortest synthetic execution time, in units.
const EXEC_MIN: u64 = 100;
/// Longest synthetic execution time, in units.
const EXEC_MAX: u64 = 500;

pub struct ProcessGenerator {
    cpus: Vec<Arc<RunQueueSet>>,
    cfg: Arc<SimConfig>,
    stopper: ShutdownHandle,
    rng: StdRng,
}

impl ProcessGenerator {
    pub fn new(
        cpus: Vec<Arc<RunQueueSet>>,
        cfg: Arc<SimConfig>,
        stopper: ShutdownHandle,
        seed: u64,
    ) -> Self {
        Self {
            cpus,
            cfg,
            stopper,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Produces the configured number of processes, assigning ids
    /// monotonically and CPUs round-robin from CPU 0, then seals every
    /// run-queue set. Returns how many processes were actually submitted.
    pub fn run(mut self) -> Result<u64> {
        info!(
            "generator: started, producing {} processes across {} cpus",
            self.cfg.procs,
            self.cpus.len()
        );
        let mut produced = 0;
        let mut target = 0;
        for id in 0..self.cfg.procs {
            if self.stopper.is_stopped() {
                warn!("generator: interrupted after {produced} processes");
                break;
            }
            let proc = self.synthesize(id);
            info!(
                "generator: created process: pid {}, class {}, priority {}, quantum {}, expected execution time {} units",
                proc.id, proc.class, proc.static_prio, proc.quantum, proc.time_execute
            );
            if !self.cpus[target].submit(proc, self.stopper.flag())? {
                warn!("generator: interrupted waiting for space on cpu{target}");
                break;
            }
            produced += 1;
            target = (target + 1) % self.cpus.len();

            let pause = self.cfg.sleep_for(self.cfg.arrival_delay);
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        // The one-shot completion event: every worker observes it under its
        // queue lock, after draining whatever is still enqueued.
        for rqs in &self.cpus {
            rqs.seal();
        }
        info!("generator: done, {produced} processes submitted");
        Ok(produced)
    }

    /// Draws class, priority and execution time for one process.
    fn synthesize(&mut self, id: u64) -> Process {
        let class = match self.rng.gen_range(0..self.cfg.ratio) {
            0 => SchedClass::Fifo,
            1 => SchedClass::RoundRobin,
            _ => SchedClass::Normal,
        };
        let static_prio = match class {
            SchedClass::Fifo | SchedClass::RoundRobin => self.rng.gen_range(0..PRIO_NORM_MIN),
            SchedClass::Normal => self.rng.gen_range(PRIO_NORM_MIN..=PRIO_NORM_MAX),
        };
        let time_execute = self.rng.gen_range(EXEC_MIN..=EXEC_MAX);
        Process::new(id, class, static_prio, time_execute)
    }
}
