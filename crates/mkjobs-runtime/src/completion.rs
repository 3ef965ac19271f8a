//! Completion channel
//!
//! Many workers push finished descriptors; the engine is the single
//! consumer. Ordering on `complete`: push, then decrement `pending`, then
//! signal if the stack was empty. A consumer that reads `pending == 0`
//! therefore sees every finished job on the stack.
//!
//! The signal is cleared only when the consumer finds the stack empty, so
//! the waitable stays readable for as long as completions are queued.

use crate::job::{JobDescriptor, JobStack};
use crate::notify::{wait_readable, CompletionSignal};
use mkjobs_core::EngineError;
use nix::errno::Errno;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct CompletionChannel<O> {
    done: JobStack<O>,
    pending: AtomicUsize,
    signal: CompletionSignal,
}

impl<O> CompletionChannel<O> {
    pub(crate) fn new() -> Result<Self, EngineError> {
        Ok(Self {
            done: JobStack::new(),
            pending: AtomicUsize::new(0),
            signal: CompletionSignal::create()?,
        })
    }

    /// A job was submitted
    pub(crate) fn register(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// A worker finished `job`
    pub(crate) fn complete(&self, job: Box<JobDescriptor<O>>) {
        let was_empty = self.done.push(job);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if was_empty {
            self.signal.signal();
        }
    }

    /// # Safety
    ///
    /// Only one thread may consume at a time.
    pub(crate) unsafe fn pop(&self) -> Option<Box<JobDescriptor<O>>> {
        if let Some(job) = self.done.pop() {
            return Some(job);
        }
        // Empty: clear the signal, then catch a push that raced with the clear
        self.signal.drain();
        let job = self.done.pop()?;
        // Later pushes saw a non-empty stack and did not signal
        if !self.done.is_empty() {
            self.signal.signal();
        }
        Some(job)
    }

    /// Submitted jobs not yet pushed as complete
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Sleep until the stack is non-empty
    pub(crate) fn wait(&self) -> Result<(), Errno> {
        wait_readable(self.signal.fd())
    }

    pub(crate) fn waitable(&self) -> RawFd {
        self.signal.fd()
    }
}
