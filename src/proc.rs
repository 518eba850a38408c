// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Process entity and the priority arithmetic the scheduler runs on.
//!
//! All durations are in abstract simulated time units (one unit is a
//! millisecond-equivalent of the modeled system); the conversion to real
//! sleep time is owned by [`crate::config::SimConfig`].

use std::fmt;
use std::time::Instant;

/// First NORMAL priority value; everything below is real-time.
pub const PRIO_NORM_MIN: u8 = 100;
/// Last (numerically largest, weakest) NORMAL priority value.
pub const PRIO_NORM_MAX: u8 = 139;
/// Ceiling for the sleep average, in ticks.
pub const MAX_SLEEP_AVG: f64 = 1000.0;
/// Real microseconds per sleep-accounting tick.
pub const TICK_DIVISOR: f64 = 100.0;
/// Run time consumed when a NORMAL process blocks early, in units.
pub const BLOCK_BASE: u64 = 10;

/// Scheduling class, fixed for the lifetime of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    /// Real-time, runs to completion once selected.
    Fifo,
    /// Real-time, preempted at every quantum boundary.
    RoundRobin,
    /// Time-shared, with a sleep-driven dynamic priority.
    Normal,
}

impl SchedClass {
    pub fn is_realtime(self) -> bool {
        !matches!(self, SchedClass::Normal)
    }
}

impl fmt::Display for SchedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedClass::Fifo => "FIFO",
            SchedClass::RoundRobin => "RR",
            SchedClass::Normal => "NORMAL",
        })
    }
}

/// A simulated unit of work.
#[derive(Debug, Clone)]
pub struct Process {
    pub id: u64,
    pub class: SchedClass,
    /// Assigned at creation: 0..=99 for real-time classes, 100..=139 for
    /// NORMAL. Never mutated.
    pub static_prio: u8,
    /// Recomputed after every NORMAL execution step; stays within the
    /// NORMAL band. Real-time classes ignore it.
    pub dynamic_prio: u8,
    /// Time slice granted per selection, in units.
    pub quantum: u64,
    /// Total execution time needed, in units.
    pub time_execute: u64,
    /// Remaining execution time; the process is complete at 0.
    pub time_remain: u64,
    /// Recent sleep estimate in ticks, 0..=MAX_SLEEP_AVG.
    pub sleep_avg: f64,
    pub arrival: Instant,
    pub sleep_start: Instant,
}

impl Process {
    pub fn new(id: u64, class: SchedClass, static_prio: u8, time_execute: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            class,
            static_prio,
            dynamic_prio: static_prio,
            quantum: quantum_for(static_prio),
            time_execute,
            time_remain: time_execute,
            sleep_avg: 0.0,
            arrival: now,
            sleep_start: now,
        }
    }

    /// Priority the run queues order by: static for real-time classes,
    /// dynamic for NORMAL.
    pub fn effective_prio(&self) -> u8 {
        if self.class.is_realtime() {
            self.static_prio
        } else {
            self.dynamic_prio
        }
    }

    pub fn is_complete(&self) -> bool {
        self.time_remain == 0
    }
}

/// Time slice for a priority, in units: stronger (numerically smaller)
/// priorities get longer slices, with a steeper drop past 120.
pub fn quantum_for(prio: u8) -> u64 {
    let p = u64::from(prio);
    if prio < 120 {
        (140 - p) * 20
    } else {
        (140 - p) * 5
    }
}

/// Interactivity bonus in 0..=10 derived from the sleep average.
pub fn bonus_for(sleep_avg: f64) -> u8 {
    (10.0 * sleep_avg.clamp(0.0, MAX_SLEEP_AVG) / MAX_SLEEP_AVG) as u8
}

/// Dynamic priority after one execution step, kept inside the NORMAL band.
pub fn adjusted_prio(current: u8, bonus: u8) -> u8 {
    let next = i16::from(current) - i16::from(bonus) + 5;
    next.clamp(i16::from(PRIO_NORM_MIN), i16::from(PRIO_NORM_MAX)) as u8
}
