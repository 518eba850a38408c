// Copyright (c) Andrea Righi <andrea.righi@linux.dev>

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Load balancer extension point.
//!
//! The stock balancer task announces itself and terminates without
//! migrating anything. [`BalancePolicy`] is the seam where a migration
//! strategy would plug in, built on [`RunQueueSet::loads`],
//! [`RunQueueSet::steal`] and [`RunQueueSet::requeue`].

use std::sync::Arc;

use log::{debug, info};

use crate::rq::RunQueueSet;

/// Strategy applied by the balancer task to even out per-CPU load.
pub trait BalancePolicy: Send {
    fn rebalance(&mut self, cpus: &[Arc<RunQueueSet>]);
}

/// Default policy: observes queue lengths and migrates nothing.
pub struct NoopBalance;

impl BalancePolicy for NoopBalance {
    fn rebalance(&mut self, cpus: &[Arc<RunQueueSet>]) {
        for rqs in cpus {
            debug!("balancer: cpu{} queue lengths {:?}", rqs.cpu(), rqs.loads());
        }
    }
}

/// Task that inspects run-queue lengths across all CPUs and applies a
/// [`BalancePolicy`], the inert [`NoopBalance`] unless one is supplied.
pub struct LoadBalancer {
    cpus: Vec<Arc<RunQueueSet>>,
    policy: Box<dyn BalancePolicy>,
}

impl LoadBalancer {
    pub fn new(cpus: Vec<Arc<RunQueueSet>>) -> Self {
        Self::with_policy(cpus, Box::new(NoopBalance))
    }

    pub fn with_policy(cpus: Vec<Arc<RunQueueSet>>, policy: Box<dyn BalancePolicy>) -> Self {
        Self { cpus, policy }
    }

    pub fn run(mut self) {
        info!("balancer: started");
        self.policy.rebalance(&self.cpus);
        info!("balancer: exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::{Process, SchedClass};
    use crate::rq::RQ_REALTIME;

    #[test]
    fn noop_policy_leaves_queues_untouched() {
        let sets: Vec<_> = (0..2).map(|i| Arc::new(RunQueueSet::new(i, 8))).collect();
        sets[0]
            .requeue(RQ_REALTIME, Process::new(0, SchedClass::Fifo, 10, 100))
            .unwrap();

        LoadBalancer::new(sets.clone()).run();
        assert_eq!(sets[0].loads(), [1, 0, 0]);
        assert_eq!(sets[1].loads(), [0, 0, 0]);
    }

    #[test]
    fn custom_policy_can_migrate_through_the_interface() {
        struct PullOne;
        impl BalancePolicy for PullOne {
            fn rebalance(&mut self, cpus: &[Arc<RunQueueSet>]) {
                if let Some(proc) = cpus[0].steal(RQ_REALTIME) {
                    cpus[1].requeue(RQ_REALTIME, proc).unwrap();
                }
            }
        }

        let sets: Vec<_> = (0..2).map(|i| Arc::new(RunQueueSet::new(i, 8))).collect();
        sets[0]
            .requeue(RQ_REALTIME, Process::new(0, SchedClass::Fifo, 10, 100))
            .unwrap();

        LoadBalancer::with_policy(sets.clone(), Box::new(PullOne)).run();
        assert_eq!(sets[0].loads(), [0, 0, 0]);
        assert_eq!(sets[1].loads(), [1, 0, 0]);
    }
}
