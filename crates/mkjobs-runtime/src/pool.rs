//! Worker pool
//!
//! Grows lazily up to the job-slot cap. Assignment, driven only by the
//! submitting thread:
//!
//! 1. Claim an idle worker, scanning from a rotating hint.
//! 2. Otherwise create a worker if below the cap.
//! 3. Otherwise queue behind a worker with nothing queued, or the one used
//!    last.
//!
//! Workers are never destroyed while the pool lives.

use crate::completion::CompletionChannel;
use crate::config::PoolConfig;
use crate::job::JobDescriptor;
use crate::launcher::LaunchSettings;
use crate::worker::{PoolShared, Worker};
use mkjobs_core::{kdebug, kerror, kinfo, kwarn, PlacementCursor, Topology};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) struct WorkerPool<O> {
    workers: Vec<Arc<Worker<O>>>,
    cap: usize,
    hint: usize,
    last_used: usize,
    cursor: PlacementCursor,
    shared: Arc<PoolShared>,
    completion: Arc<CompletionChannel<O>>,
    stack_size: usize,
}

impl<O: Send + 'static> WorkerPool<O> {
    pub(crate) fn new(config: &PoolConfig, topology: Topology, completion: Arc<CompletionChannel<O>>) -> Self {
        let cursor = PlacementCursor::new(&topology, config.nesting_depth);
        let shared = Arc::new(PoolShared {
            shutdown: Default::default(),
            settings: LaunchSettings {
                exe_suffix: config.exe_suffix.clone(),
                child_nice: config.child_nice,
            },
            topology,
            pin_workers: config.pin_workers,
        });
        Self {
            workers: Vec::new(),
            cap: config.worker_cap(),
            hint: 0,
            last_used: 0,
            cursor,
            shared,
            completion,
            stack_size: config.worker_stack_size,
        }
    }

    pub(crate) fn assign(&mut self, job: Box<JobDescriptor<O>>) {
        if let Some(index) = self.claim_idle() {
            self.dispatch(index, job, true);
            return;
        }

        if self.workers.len() < self.cap {
            match self.grow() {
                Ok(index) => {
                    self.dispatch(index, job, false);
                    return;
                }
                Err(e) if self.workers.is_empty() => {
                    kerror!("{}; no worker can run jobs", e);
                    std::process::abort();
                }
                Err(e) => {
                    kwarn!("{}; queueing on an existing worker", e);
                    // Stop retrying every submission
                    self.cap = self.workers.len();
                }
            }
        }

        let index = self.least_loaded();
        self.dispatch(index, job, false);
    }

    fn claim_idle(&mut self) -> Option<usize> {
        let n = self.workers.len();
        for i in 0..n {
            let index = (self.hint + i) % n;
            if self.workers[index].try_claim() {
                self.hint = (index + 1) % n;
                return Some(index);
            }
        }
        None
    }

    fn least_loaded(&self) -> usize {
        let n = self.workers.len();
        (0..n)
            .map(|i| (self.hint + i) % n)
            .find(|&index| self.workers[index].queued() == 0)
            .unwrap_or(self.last_used)
    }

    fn grow(&mut self) -> Result<usize, mkjobs_core::EngineError> {
        let id = self.workers.len();
        let placement = self.cursor.next(&self.shared.topology);
        let worker = Worker::spawn(
            id,
            placement,
            Arc::clone(&self.completion),
            Arc::clone(&self.shared),
            self.stack_size,
        )?;
        self.workers.push(worker);
        kinfo!(
            "created worker {} of {} in group {} (ideal cpu {})",
            id + 1,
            self.cap,
            placement.group,
            placement.ideal_cpu
        );
        Ok(id)
    }

    fn dispatch(&mut self, index: usize, job: Box<JobDescriptor<O>>, claimed: bool) {
        self.last_used = index;
        self.workers[index].enqueue(job, claimed);
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn cap(&self) -> usize {
        self.cap
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_idle()).count()
    }

    /// Ask every worker to exit once its stack is empty
    pub(crate) fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        kdebug!("shutting down {} worker(s)", self.workers.len());
        for worker in &self.workers {
            worker.wake();
        }
    }
}
