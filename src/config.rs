// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::time::Duration;

use clap::Parser;

const DEFAULT_CPUS: usize = 4;
const DEFAULT_PROCS: u64 = 20;
const DEFAULT_QUEUE_SIZE: usize = 20;
const DEFAULT_RATIO: u32 = 5;
const DEFAULT_TIME_SCALE: u64 = 1000;
const DEFAULT_ARRIVAL_DELAY: u64 = 100;

/// Simulated multiprocessor scheduler: generates a synthetic workload and
/// dispatches it across per-CPU run queues.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct SimConfig {
    /// Number of simulated CPUs (one worker thread each).
    #[arg(long, default_value_t = DEFAULT_CPUS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub cpus: usize,

    /// Total number of processes to generate.
    #[arg(long, default_value_t = DEFAULT_PROCS)]
    pub procs: u64,

    /// Capacity of each of the three run queues on every CPU.
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub queue_size: usize,

    /// Class ratio denominator: a 1-in-N chance each for FIFO and RR,
    /// the rest NORMAL.
    #[arg(long, default_value_t = DEFAULT_RATIO, value_parser = clap::value_parser!(u32).range(2..))]
    pub ratio: u32,

    /// RNG seed. Omit for a different workload every run.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Real microseconds slept per simulated time unit (0 = don't sleep).
    #[arg(long, default_value_t = DEFAULT_TIME_SCALE)]
    pub time_scale: u64,

    /// Pause between generated processes, in simulated time units.
    #[arg(long, default_value_t = DEFAULT_ARRIVAL_DELAY)]
    pub arrival_delay: u64,
}

impl SimConfig {
    /// Wall-clock duration of `units` of simulated time.
    pub fn sleep_for(&self, units: u64) -> Duration {
        Duration::from_micros(units * self.time_scale)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cpus: DEFAULT_CPUS,
            procs: DEFAULT_PROCS,
            queue_size: DEFAULT_QUEUE_SIZE,
            ratio: DEFAULT_RATIO,
            seed: None,
            time_scale: DEFAULT_TIME_SCALE,
            arrival_delay: DEFAULT_ARRIVAL_DELAY,
        }
    }
}
