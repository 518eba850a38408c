// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! CPU worker: drains one run-queue set and emulates process execution.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Result;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimConfig;
use crate::proc::{self, Process, SchedClass};
use crate::rq::{self, RunQueueSet, RQ_REALTIME};
use crate::sim::ShutdownHandle;

/// Record of one finished process.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: u64,
    pub class: SchedClass,
    pub turnaround_ms: f64,
}

/// Per-worker result handed back to the supervisor at exit.
#[derive(Debug, Default)]
pub struct WorkerSummary {
    pub cpu: usize,
    pub finished: Vec<Completion>,
    pub steps: u64,
}

/// One simulated CPU: owns a run-queue set and repeatedly selects,
/// executes and requeues processes until the workload is drained.
pub struct CpuWorker {
    cpu: usize,
    rqs: Arc<RunQueueSet>,
    cfg: Arc<SimConfig>,
    stopper: ShutdownHandle,
    rng: StdRng,
    summary: WorkerSummary,
}

impl CpuWorker {
    pub fn new(
        cpu: usize,
        rqs: Arc<RunQueueSet>,
        cfg: Arc<SimConfig>,
        stopper: ShutdownHandle,
        seed: u64,
    ) -> Self {
        Self {
            cpu,
            rqs,
            cfg,
            stopper,
            rng: StdRng::seed_from_u64(seed),
            summary: WorkerSummary {
                cpu,
                ..WorkerSummary::default()
            },
        }
    }

    /// Runs until the generator seals the queues and no work remains, or
    /// shutdown is requested. A requeue failure aborts the whole
    /// simulation.
    pub fn run(mut self) -> Result<WorkerSummary> {
        info!("cpu{}: worker started", self.cpu);
        while let Some((queue, proc)) = self.rqs.take_next(self.stopper.flag()) {
            self.summary.steps += 1;
            let step = match proc.class {
                SchedClass::Fifo => {
                    self.run_fifo(queue, proc);
                    Ok(())
                }
                SchedClass::RoundRobin => self.run_rr(queue, proc),
                SchedClass::Normal => self.run_normal(queue, proc),
            };
            if let Err(err) = step {
                self.stopper.stop();
                return Err(err);
            }
        }
        if self.stopper.is_stopped() {
            info!("cpu{}: shutdown requested, exiting", self.cpu);
        } else {
            info!("cpu{}: no runnable processes left, exiting", self.cpu);
        }
        debug!(
            "cpu{}: {} execution steps, {} completions",
            self.cpu,
            self.summary.steps,
            self.summary.finished.len()
        );
        Ok(self.summary)
    }

    fn sleep_units(&self, units: u64) {
        let d = self.cfg.sleep_for(units);
        if !d.is_zero() {
            thread::sleep(d);
        }
    }

    fn finish(&mut self, queue: usize, proc: &Process, ran: u64) {
        let turnaround_ms = proc.arrival.elapsed().as_secs_f64() * 1e3;
        info!(
            "cpu{}: finished {} process: pid {}, priority {}, from rq{} for {} units, turnaround {:.3} ms",
            self.cpu,
            proc.class,
            proc.id,
            proc.effective_prio(),
            queue,
            ran,
            turnaround_ms
        );
        self.summary.finished.push(Completion {
            id: proc.id,
            class: proc.class,
            turnaround_ms,
        });
    }

    /// FIFO runs to completion in a single step and is never requeued.
    fn run_fifo(&mut self, queue: usize, mut proc: Process) {
        let ran = proc.time_execute;
        self.sleep_units(ran);
        proc.time_remain = 0;
        self.finish(queue, &proc, ran);
    }

    /// Round-robin runs one quantum per selection and goes back on the
    /// real-time queue until its remaining time is gone.
    fn run_rr(&mut self, queue: usize, mut proc: Process) -> Result<()> {
        if proc.time_remain <= proc.quantum {
            let ran = proc.time_remain;
            self.sleep_units(ran);
            proc.time_remain = 0;
            self.finish(queue, &proc, ran);
            return Ok(());
        }

        self.sleep_units(proc.quantum);
        proc.time_remain -= proc.quantum;
        info!(
            "cpu{}: executed RR process: pid {}, priority {}, quantum {} from rq{}, {} units remaining",
            self.cpu, proc.id, proc.static_prio, proc.quantum, queue, proc.time_remain
        );
        self.rqs.requeue(RQ_REALTIME, proc)
    }

    /// NORMAL consumes either a full quantum or a short early-block slice,
    /// then has its dynamic priority recomputed from the sleep average.
    fn run_normal(&mut self, queue: usize, mut proc: Process) -> Result<()> {
        if proc.time_remain <= proc.quantum {
            let ran = proc.time_remain;
            self.sleep_units(ran);
            proc.time_remain = 0;
            self.finish(queue, &proc, ran);
            return Ok(());
        }

        let old_prio = proc.dynamic_prio;

        // The sleep average accrues for the time spent waiting in queue.
        let slept = ticks_since(proc.sleep_start);
        proc.sleep_avg = (proc.sleep_avg + slept).min(proc::MAX_SLEEP_AVG);

        // Fair coin: either the process uses its whole slice, or it blocks
        // early on a simulated event. A blocked process waits out five
        // quanta of wall time but consumes only the base cost of run time.
        let run_start = Instant::now();
        let ran = if self.rng.gen::<bool>() {
            self.sleep_units(proc.quantum);
            proc.quantum
        } else {
            self.sleep_units(proc::BLOCK_BASE + 5 * proc.quantum);
            proc::BLOCK_BASE.min(proc.time_remain)
        };
        proc.time_remain -= ran;

        // Back to waiting; running time does not count as sleep.
        proc.sleep_start = Instant::now();
        let run_ticks = ticks_since(run_start);
        proc.sleep_avg = (proc.sleep_avg - run_ticks).max(0.0);

        if proc.is_complete() {
            // The early-block base cost can swallow a small remainder.
            self.finish(queue, &proc, ran);
            return Ok(());
        }

        let bonus = proc::bonus_for(proc.sleep_avg);
        proc.dynamic_prio = proc::adjusted_prio(proc.dynamic_prio, bonus);
        let dest = rq::requeue_target(proc.dynamic_prio);
        info!(
            "cpu{}: executed NORMAL process: pid {}, priority {} -> {}, quantum {} from rq{} for {} units, {} units remaining",
            self.cpu, proc.id, old_prio, proc.dynamic_prio, proc.quantum, queue, ran, proc.time_remain
        );
        self.rqs.requeue(dest, proc)
    }
}

/// Elapsed sleep-accounting ticks since `start`.
fn ticks_since(start: Instant) -> f64 {
    start.elapsed().as_micros() as f64 / proc::TICK_DIVISOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::{PRIO_NORM_MAX, PRIO_NORM_MIN};
    use crate::rq::{RQ_ACTIVE, RQ_EXPIRED};

    fn harness(queue_size: usize) -> (CpuWorker, Arc<RunQueueSet>) {
        let cfg = Arc::new(SimConfig {
            time_scale: 0,
            queue_size,
            ..SimConfig::default()
        });
        let rqs = Arc::new(RunQueueSet::new(0, queue_size));
        let stopper = ShutdownHandle::new(vec![rqs.clone()]);
        let worker = CpuWorker::new(0, rqs.clone(), cfg, stopper, 1);
        (worker, rqs)
    }

    /// Drives the worker until the (sealed) set drains, returning its
    /// summary.
    fn drain(worker: CpuWorker, rqs: &RunQueueSet) -> WorkerSummary {
        rqs.seal();
        worker.run().unwrap()
    }

    #[test]
    fn fifo_finishes_in_exactly_one_step() {
        let (worker, rqs) = harness(8);
        rqs.requeue(RQ_REALTIME, Process::new(0, SchedClass::Fifo, 30, 5000))
            .unwrap();

        let summary = drain(worker, &rqs);
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.finished.len(), 1);
        assert_eq!(summary.finished[0].id, 0);
        assert_eq!(rqs.loads(), [0, 0, 0]);
    }

    #[test]
    fn rr_consumes_one_quantum_then_requeues_to_rq0() {
        let (mut worker, rqs) = harness(8);
        // Priority 50 grants an 1800-unit slice; 2000 units of work need
        // two selections.
        let proc = Process::new(1, SchedClass::RoundRobin, 50, 2000);
        worker.run_rr(RQ_REALTIME, proc).unwrap();

        assert_eq!(rqs.loads(), [1, 0, 0]);
        let back = rqs.steal(RQ_REALTIME).unwrap();
        assert_eq!(back.time_remain, 200);
        assert_eq!(back.static_prio, 50);
    }

    #[test]
    fn rr_conserves_work_and_finishes_once() {
        let (worker, rqs) = harness(8);
        rqs.requeue(RQ_REALTIME, Process::new(2, SchedClass::RoundRobin, 119, 2000))
            .unwrap();

        // quantum(119) = 420: four full slices plus a 320-unit tail.
        let summary = drain(worker, &rqs);
        assert_eq!(summary.steps, 5);
        assert_eq!(summary.finished.len(), 1);
        assert_eq!(summary.finished[0].id, 2);
        assert_eq!(rqs.loads(), [0, 0, 0]);
    }

    #[test]
    fn normal_within_quantum_finishes_without_requeue() {
        let (worker, rqs) = harness(8);
        // quantum(100) = 800 covers the full 500 units in one step.
        rqs.requeue(RQ_ACTIVE, Process::new(3, SchedClass::Normal, 100, 500))
            .unwrap();

        let summary = drain(worker, &rqs);
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.finished.len(), 1);
    }

    #[test]
    fn normal_weak_priority_requeues_to_expired() {
        let (mut worker, rqs) = harness(8);
        // With no sleep history the bonus is 0, so 139 stays at 139 and
        // lands in the expired queue.
        let proc = Process::new(4, SchedClass::Normal, 139, 500);
        worker.run_normal(RQ_ACTIVE, proc).unwrap();

        let loads = rqs.loads();
        assert_eq!(loads[RQ_EXPIRED], 1);
        let back = rqs.steal(RQ_EXPIRED).unwrap();
        assert_eq!(back.dynamic_prio, PRIO_NORM_MAX);
        assert!(back.time_remain < 500);
    }

    #[test]
    fn normal_priority_stays_in_band_until_completion() {
        let (mut worker, rqs) = harness(8);
        rqs.requeue(RQ_ACTIVE, Process::new(5, SchedClass::Normal, 120, 500))
            .unwrap();
        rqs.seal();

        // Drive by hand so every intermediate state is visible.
        let flag = worker.stopper.clone();
        let mut finished = 0;
        while let Some((queue, proc)) = rqs.take_next(flag.flag()) {
            assert!(proc.dynamic_prio >= PRIO_NORM_MIN);
            assert!(proc.dynamic_prio <= PRIO_NORM_MAX);
            assert!(proc.time_remain > 0);
            assert!(proc.time_remain <= proc.time_execute);
            let before = worker.summary.finished.len();
            worker.run_normal(queue, proc).unwrap();
            finished += worker.summary.finished.len() - before;
        }
        assert_eq!(finished, 1);
        assert_eq!(rqs.loads(), [0, 0, 0]);
    }
}
