// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! User-space simulation of a multiprocessor process scheduler.
//!
//! A generator thread synthesizes a workload of FIFO, round-robin and
//! NORMAL processes; one worker thread per simulated CPU drains its own
//! set of run queues, reproducing Linux-style class selection, time-slice
//! accounting and sleep-driven dynamic priorities. A load-balancer task
//! exists as an extension point and deliberately migrates nothing.

mod balance;
mod config;
mod gen;
mod proc;
mod rq;
mod sim;
mod worker;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::SimConfig;
use crate::proc::SchedClass;
use crate::sim::Simulation;

fn main() -> Result<()> {
    let cfg = SimConfig::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let sim = Simulation::new(cfg);
    let stopper = sim.stopper();
    ctrlc::set_handler(move || stopper.stop()).context("failed to install SIGINT handler")?;

    let report = sim.run()?;

    let (mut fifo, mut rr, mut normal) = (0usize, 0usize, 0usize);
    let mut turnaround_ms = 0.0;
    for done in report.workers.iter().flat_map(|w| w.finished.iter()) {
        match done.class {
            SchedClass::Fifo => fifo += 1,
            SchedClass::RoundRobin => rr += 1,
            SchedClass::Normal => normal += 1,
        }
        turnaround_ms += done.turnaround_ms;
    }
    let finished = report.finished_total();
    println!(
        "simulation complete: {finished}/{} processes finished ({fifo} FIFO, {rr} RR, {normal} NORMAL) in {:.2?}",
        report.produced, report.elapsed
    );
    if finished > 0 {
        println!("average turnaround: {:.3} ms", turnaround_ms / finished as f64);
    }
    if let Some(slowest) = report
        .workers
        .iter()
        .flat_map(|w| w.finished.iter())
        .max_by(|a, b| a.turnaround_ms.total_cmp(&b.turnaround_ms))
    {
        println!(
            "slowest: pid {} ({}, {:.3} ms turnaround)",
            slowest.id, slowest.class, slowest.turnaround_ms
        );
    }
    if !report.stranded.is_empty() {
        println!(
            "{} processes left unfinished after shutdown: pids {:?}",
            report.stranded.len(),
            report.stranded
        );
    }
    Ok(())
}
