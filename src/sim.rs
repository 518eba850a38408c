// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Simulation lifecycle: spawns the generator, one worker per CPU and the
//! balancer, then joins everything and aggregates the run report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::balance::LoadBalancer;
use crate::config::SimConfig;
use crate::gen::ProcessGenerator;
use crate::rq::{RunQueueSet, NUM_QUEUES};
use crate::worker::{CpuWorker, WorkerSummary};

/// Cloneable handle that aborts the whole simulation: sets the shutdown
/// flag and wakes every thread blocked on a run-queue condition variable.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    cpus: Vec<Arc<RunQueueSet>>,
}

impl ShutdownHandle {
    pub(crate) fn new(cpus: Vec<Arc<RunQueueSet>>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            cpus,
        }
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
        for rqs in &self.cpus {
            rqs.interrupt();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.flag
    }
}

/// Outcome of a full run.
#[derive(Debug)]
pub struct SimReport {
    /// Processes the generator actually submitted.
    pub produced: u64,
    pub workers: Vec<WorkerSummary>,
    /// Ids of processes reclaimed from the queues after an interrupted
    /// run; empty on a clean run.
    pub stranded: Vec<u64>,
    pub elapsed: Duration,
}

impl SimReport {
    pub fn finished_total(&self) -> usize {
        self.workers.iter().map(|w| w.finished.len()).sum()
    }
}

pub struct Simulation {
    cfg: Arc<SimConfig>,
    cpus: Vec<Arc<RunQueueSet>>,
    stopper: ShutdownHandle,
}

impl Simulation {
    pub fn new(cfg: SimConfig) -> Self {
        let cpus: Vec<_> = (0..cfg.cpus)
            .map(|i| Arc::new(RunQueueSet::new(i, cfg.queue_size)))
            .collect();
        let stopper = ShutdownHandle::new(cpus.clone());
        Self {
            cfg: Arc::new(cfg),
            cpus,
            stopper,
        }
    }

    /// Handle for external shutdown requests (SIGINT).
    pub fn stopper(&self) -> ShutdownHandle {
        self.stopper.clone()
    }

    /// Runs the simulation to completion: `cpus + 2` threads, all joined
    /// unconditionally. A thread that cannot be spawned, a worker error or
    /// a panic aborts the run with a reported error.
    pub fn run(self) -> Result<SimReport> {
        let seed = self.cfg.seed.unwrap_or_else(rand::random);
        info!(
            "simulation: {} cpus, {} processes, queue capacity {}, seed {}",
            self.cfg.cpus, self.cfg.procs, self.cfg.queue_size, seed
        );
        let start = Instant::now();

        let (produced, summaries) = thread::scope(|s| -> Result<(u64, Vec<WorkerSummary>)> {
            let generator = ProcessGenerator::new(
                self.cpus.clone(),
                self.cfg.clone(),
                self.stopper.clone(),
                seed,
            );
            let gen_handle = thread::Builder::new()
                .name("gen".into())
                .spawn_scoped(s, move || generator.run())
                .context("failed to spawn generator thread")?;

            let mut worker_handles = Vec::with_capacity(self.cfg.cpus);
            for (cpu, rqs) in self.cpus.iter().enumerate() {
                let worker = CpuWorker::new(
                    cpu,
                    rqs.clone(),
                    self.cfg.clone(),
                    self.stopper.clone(),
                    seed.wrapping_add(1 + cpu as u64),
                );
                let handle = thread::Builder::new()
                    .name(format!("cpu-{cpu}"))
                    .spawn_scoped(s, move || worker.run())
                    .with_context(|| format!("failed to spawn worker thread for cpu{cpu}"))?;
                worker_handles.push(handle);
            }

            let balancer = LoadBalancer::new(self.cpus.clone());
            let bal_handle = thread::Builder::new()
                .name("balance".into())
                .spawn_scoped(s, move || balancer.run())
                .context("failed to spawn balancer thread")?;

            // Join everything before looking at any result, so a failure in
            // one thread cannot leave another dangling.
            let gen_result = join(gen_handle, "generator");
            let worker_results: Vec<_> = worker_handles
                .into_iter()
                .enumerate()
                .map(|(cpu, h)| join(h, &format!("cpu{cpu} worker")))
                .collect();
            join(bal_handle, "balancer")?;

            let produced = gen_result??;
            let mut summaries = Vec::with_capacity(worker_results.len());
            for result in worker_results {
                summaries.push(result??);
            }
            Ok((produced, summaries))
        })?;

        for summary in &summaries {
            info!(
                "simulation: cpu{} completed {} processes in {} steps",
                summary.cpu,
                summary.finished.len(),
                summary.steps
            );
        }

        // Reclaim whatever an interrupted run left behind, so unfinished
        // work is reported by id instead of silently dropped.
        let mut stranded = Vec::new();
        for rqs in &self.cpus {
            for queue in 0..NUM_QUEUES {
                while let Some(proc) = rqs.steal(queue) {
                    stranded.push(proc.id);
                }
            }
        }
        stranded.sort_unstable();

        Ok(SimReport {
            produced,
            workers: summaries,
            stranded,
            elapsed: start.elapsed(),
        })
    }
}

/// Maps a thread panic into a reportable error.
fn join<T>(handle: thread::ScopedJoinHandle<'_, T>, name: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{name} thread panicked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_cfg(cpus: usize, procs: u64, seed: u64) -> SimConfig {
        SimConfig {
            cpus,
            procs,
            seed: Some(seed),
            time_scale: 0,
            arrival_delay: 0,
            ..SimConfig::default()
        }
    }

    #[test]
    fn two_cpus_six_processes_all_finish_exactly_once() {
        let report = Simulation::new(quick_cfg(2, 6, 42)).run().unwrap();

        assert_eq!(report.produced, 6);
        let mut ids: Vec<u64> = report
            .workers
            .iter()
            .flat_map(|w| w.finished.iter().map(|c| c.id))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);

        // Nothing is left enqueued on a clean run.
        assert!(report.stranded.is_empty());
    }

    #[test]
    fn single_cpu_run_drains_cleanly() {
        let report = Simulation::new(quick_cfg(1, 12, 7)).run().unwrap();
        assert_eq!(report.produced, 12);
        assert_eq!(report.finished_total(), 12);
        assert!(report.stranded.is_empty());
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let a = Simulation::new(quick_cfg(2, 8, 123)).run().unwrap();
        let b = Simulation::new(quick_cfg(2, 8, 123)).run().unwrap();
        assert_eq!(a.produced, b.produced);
        assert_eq!(a.finished_total(), b.finished_total());
    }

    #[test]
    fn stop_before_run_produces_nothing() {
        let sim = Simulation::new(quick_cfg(2, 50, 1));
        sim.stopper().stop();
        let report = sim.run().unwrap();
        assert_eq!(report.produced, 0);
        assert_eq!(report.finished_total(), 0);
    }
}
