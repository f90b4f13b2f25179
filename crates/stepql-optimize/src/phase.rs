//! Deferred work bucketed by execution phase.
//!
//! Tasks are scheduled as boxed futures and only run when their phase is
//! drained. All tasks of a phase run concurrently and are awaited together;
//! their outcomes come back in scheduling order. Phases drain once each, in
//! `ExecutionPhase` order.

use futures::future::{join_all, BoxFuture};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionPhase {
    /// Optimizations rewrite the instantiated source pipeline.
    Optimize,
    /// Sinks, bridge and observer are wired before anything starts.
    BeforeStart,
}

impl ExecutionPhase {
    pub const ALL: [ExecutionPhase; 2] = [ExecutionPhase::Optimize, ExecutionPhase::BeforeStart];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("phase {phase:?} cannot be {action}: next phase to drain is {next}")]
pub struct PhaseOrderError {
    pub phase: ExecutionPhase,
    pub action: &'static str,
    pub next: String,
}

/// Result of one scheduled task.
#[derive(Debug)]
pub struct PhaseOutcome<E> {
    pub label: String,
    pub result: Result<bool, E>,
}

type Task<E> = (String, BoxFuture<'static, Result<bool, E>>);

pub struct PhaseHooks<E> {
    buckets: Vec<Vec<Task<E>>>,
    /// Index of the next phase allowed to drain.
    next: usize,
}

impl<E: Send + 'static> Default for PhaseHooks<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + 'static> PhaseHooks<E> {
    pub fn new() -> Self {
        Self {
            buckets: ExecutionPhase::ALL.iter().map(|_| Vec::new()).collect(),
            next: 0,
        }
    }

    fn next_name(&self) -> String {
        ExecutionPhase::ALL
            .get(self.next)
            .map(|p| format!("{:?}", p))
            .unwrap_or_else(|| "none".into())
    }

    /// Defer `task` until `phase` drains. Scheduling into a drained phase is refused.
    pub fn schedule(
        &mut self,
        phase: ExecutionPhase,
        label: impl Into<String>,
        task: BoxFuture<'static, Result<bool, E>>,
    ) -> Result<(), PhaseOrderError> {
        if phase.index() < self.next {
            return Err(PhaseOrderError {
                phase,
                action: "scheduled",
                next: self.next_name(),
            });
        }
        self.buckets[phase.index()].push((label.into(), task));
        Ok(())
    }

    pub fn pending(&self, phase: ExecutionPhase) -> usize {
        self.buckets[phase.index()].len()
    }

    /// Run every task of `phase` and wait for all of them.
    pub fn drain(&mut self, phase: ExecutionPhase) -> Result<Vec<PhaseOutcome<E>>, PhaseOrderError> {
        if phase.index() != self.next {
            return Err(PhaseOrderError {
                phase,
                action: "drained",
                next: self.next_name(),
            });
        }
        self.next += 1;
        let tasks = std::mem::take(&mut self.buckets[phase.index()]);
        let (labels, futures): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        tracing::debug!(?phase, tasks = labels.len(), "draining phase");
        let results = futures::executor::block_on(join_all(futures));
        Ok(labels
            .into_iter()
            .zip(results)
            .map(|(label, result)| PhaseOutcome { label, result })
            .collect())
    }

    pub fn is_drained(&self, phase: ExecutionPhase) -> bool {
        phase.index() < self.next
    }
}
