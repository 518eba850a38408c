// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-CPU run queues and their locking discipline.
//!
//! Each CPU owns a [`RunQueueSet`]: three bounded priority queues behind a
//! single mutex. Queue 0 holds the real-time classes, queue 1 the NORMAL
//! active band and queue 2 the NORMAL expired band. Selection always scans
//! queue 0 first, then 1, then 2, and within a queue removes the entry with
//! the numerically smallest priority; equal priorities leave in insertion
//! order. Workers block on the condition variable instead of polling, and
//! the generator announces the end of the workload by sealing the set.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use anyhow::{bail, Result};
use parking_lot::{Condvar, Mutex};

use crate::proc::Process;

pub const NUM_QUEUES: usize = 3;
/// Queue 0: FIFO and round-robin processes.
pub const RQ_REALTIME: usize = 0;
/// Queue 1: NORMAL processes in the active band.
pub const RQ_ACTIVE: usize = 1;
/// Queue 2: NORMAL processes past the expiry threshold.
pub const RQ_EXPIRED: usize = 2;

/// Dynamic priority above which a NORMAL process is requeued as expired.
const EXPIRE_PRIO: u8 = 130;

/// Queue a NORMAL process returns to after an unfinished execution step.
pub fn requeue_target(dynamic_prio: u8) -> usize {
    if dynamic_prio <= EXPIRE_PRIO {
        RQ_ACTIVE
    } else {
        RQ_EXPIRED
    }
}

/// Heap entry keyed so the numerically smallest (priority, sequence) pair
/// rises to the top of the max-heap.
struct Entry {
    prio: u8,
    seq: u64,
    proc: Process,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.prio == other.prio && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        (other.prio, other.seq).cmp(&(self.prio, self.seq))
    }
}

/// Bounded priority queue: the smallest priority value wins, equal
/// priorities come out in insertion order.
pub struct PrioQueue {
    heap: BinaryHeap<Entry>,
    capacity: usize,
    next_seq: u64,
}

impl PrioQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Hands the process back when the queue is at capacity.
    pub fn try_push(&mut self, proc: Process) -> Result<(), Process> {
        if self.heap.len() >= self.capacity {
            return Err(proc);
        }
        let prio = proc.effective_prio();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { prio, seq, proc });
        Ok(())
    }

    /// Removes and returns the highest-priority (numerically smallest)
    /// entry.
    pub fn pop_min(&mut self) -> Option<Process> {
        self.heap.pop().map(|e| e.proc)
    }
}

struct Queues {
    rq: [PrioQueue; NUM_QUEUES],
    /// One-shot completion event: set once the generator has submitted its
    /// last process. Written and read under the queue lock, so a worker can
    /// neither miss the event nor exit while work is still visible.
    sealed: bool,
}

/// Per-CPU set of three run queues sharing one lock.
pub struct RunQueueSet {
    cpu: usize,
    queues: Mutex<Queues>,
    changed: Condvar,
}

impl RunQueueSet {
    pub fn new(cpu: usize, capacity: usize) -> Self {
        Self {
            cpu,
            queues: Mutex::new(Queues {
                rq: std::array::from_fn(|_| PrioQueue::new(capacity)),
                sealed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Generator-side enqueue: real-time classes go to queue 0, NORMAL to
    /// queue 1. Blocks while the destination queue is full, so a slow CPU
    /// back-pressures the generator instead of losing processes. Returns
    /// `Ok(false)` when shutdown was requested before space freed up.
    pub fn submit(&self, proc: Process, shutdown: &AtomicBool) -> Result<bool> {
        let queue = if proc.class.is_realtime() {
            RQ_REALTIME
        } else {
            RQ_ACTIVE
        };
        let mut proc = proc;
        let mut q = self.queues.lock();
        loop {
            if q.sealed {
                bail!("cpu{}: submit of pid {} after seal", self.cpu, proc.id);
            }
            match q.rq[queue].try_push(proc) {
                Ok(()) => {
                    self.changed.notify_all();
                    return Ok(true);
                }
                Err(back) => {
                    if shutdown.load(AtomicOrdering::Relaxed) {
                        return Ok(false);
                    }
                    proc = back;
                    self.changed.wait(&mut q);
                }
            }
        }
    }

    /// Worker-side enqueue after an unfinished execution step. Never
    /// blocks: a worker waiting on its own full queue could not be woken.
    /// A full destination queue is reported, not silently wrapped.
    pub fn requeue(&self, queue: usize, proc: Process) -> Result<()> {
        let mut q = self.queues.lock();
        match q.rq[queue].try_push(proc) {
            Ok(()) => {
                self.changed.notify_all();
                Ok(())
            }
            Err(p) => bail!(
                "cpu{}: run queue {} full, cannot requeue pid {}",
                self.cpu,
                queue,
                p.id
            ),
        }
    }

    /// Selects and removes the highest-priority runnable process, scanning
    /// queue 0, then 1, then 2. Blocks while every queue is empty; returns
    /// `None` on shutdown, or once the set is sealed and drained.
    pub fn take_next(&self, shutdown: &AtomicBool) -> Option<(usize, Process)> {
        let mut q = self.queues.lock();
        loop {
            if shutdown.load(AtomicOrdering::Relaxed) {
                return None;
            }
            match (0..NUM_QUEUES).find(|&queue| !q.rq[queue].is_empty()) {
                Some(queue) => {
                    let proc = q.rq[queue].pop_min()?;
                    // Space freed; a blocked generator may continue.
                    self.changed.notify_all();
                    return Some((queue, proc));
                }
                None if q.sealed => return None,
                None => self.changed.wait(&mut q),
            }
        }
    }

    /// Marks the workload complete. No further submissions arrive after
    /// this; drained workers are woken so they can exit.
    pub fn seal(&self) {
        let mut q = self.queues.lock();
        q.sealed = true;
        self.changed.notify_all();
    }

    /// Wakes every blocked worker or generator, e.g. after SIGINT.
    pub fn interrupt(&self) {
        let _q = self.queues.lock();
        self.changed.notify_all();
    }

    /// Current length of each queue. Balancer interface.
    pub fn loads(&self) -> [usize; NUM_QUEUES] {
        let q = self.queues.lock();
        std::array::from_fn(|i| q.rq[i].len())
    }

    /// Removes the best entry of one queue without blocking. Balancer
    /// interface: the out-migration half of a rebalance.
    pub fn steal(&self, queue: usize) -> Option<Process> {
        let mut q = self.queues.lock();
        let proc = q.rq[queue].pop_min();
        if proc.is_some() {
            self.changed.notify_all();
        }
        proc
    }
}
