//! Worker threads
//!
//! A worker owns a private job stack and a wake signal. The pool is the
//! only producer for that stack; the worker drains it whole, runs each
//! job to completion on its own thread (launch, wait, reap) and pushes the
//! descriptor to the completion channel.
//!
//! Idle protocol: with nothing to do the worker sets `idle`, re-checks its
//! stack, then sleeps. The pool pushes first and then clears `idle`; if it
//! was set, the pool notifies. Both sides use SeqCst so one of them always
//! sees the other.

use crate::affinity::{pin_current_thread, CpuMask};
use crate::completion::CompletionChannel;
use crate::handle::{exit_result, ProcessHandle};
use crate::job::{ExternalEventJob, JobControl, JobDescriptor, JobKind, JobStack, SpawnJob};
use crate::launcher::{self, LaunchSettings};
use crate::notify::wait_readable;
use crate::parking::{PlatformWakeSignal, WakeSignal};
use mkjobs_core::{kdebug, kerror, ktrace, kwarn, EngineError, EnvBlock, ExitResult, Placement, Topology};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// State shared by the pool and every worker
pub(crate) struct PoolShared {
    pub(crate) shutdown: AtomicBool,
    pub(crate) settings: LaunchSettings,
    pub(crate) topology: Topology,
    pub(crate) pin_workers: bool,
}

pub(crate) struct Worker<O> {
    id: usize,
    placement: Placement,
    pending: JobStack<O>,
    queued: AtomicUsize,
    idle: AtomicBool,
    wake: PlatformWakeSignal,
    /// Children run anywhere in the worker's group
    group_mask: CpuMask,
    completion: Arc<CompletionChannel<O>>,
    shared: Arc<PoolShared>,
}

impl<O: Send + 'static> Worker<O> {
    /// Create the worker and start its thread
    pub(crate) fn spawn(
        id: usize,
        placement: Placement,
        completion: Arc<CompletionChannel<O>>,
        shared: Arc<PoolShared>,
        stack_size: usize,
    ) -> Result<Arc<Self>, EngineError> {
        let group_mask = CpuMask::from_cpus(shared.topology.group(placement.group).cpus());
        let worker = Arc::new(Self {
            id,
            placement,
            pending: JobStack::new(),
            queued: AtomicUsize::new(0),
            idle: AtomicBool::new(false),
            wake: PlatformWakeSignal::new(),
            group_mask,
            completion,
            shared,
        });

        let runner = Arc::clone(&worker);
        thread::Builder::new()
            .name(format!("mkjobs-worker-{}", id))
            .stack_size(stack_size)
            .spawn(move || runner.run())
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;
        Ok(worker)
    }

    /// Hand `job` to this worker
    ///
    /// `claimed` means the caller already cleared `idle` by CAS and owes
    /// the worker a wake.
    pub(crate) fn enqueue(&self, job: Box<JobDescriptor<O>>, claimed: bool) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.pending.push(job);
        if self.idle.swap(false, Ordering::SeqCst) || claimed {
            self.wake.notify();
        }
    }

    /// Take an idle worker for a new job
    pub(crate) fn try_claim(&self) -> bool {
        self.idle
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    /// Jobs handed over but not yet started
    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub(crate) fn wake(&self) {
        self.wake.notify();
    }

    fn run(&self) {
        if self.shared.pin_workers {
            let mask = CpuMask::from_cpus(&[self.placement.ideal_cpu]);
            if let Err(e) = pin_current_thread(&mask) {
                kdebug!("cannot pin to cpu {}: {}", self.placement.ideal_cpu, e);
            }
        } else if let Err(e) = pin_current_thread(&self.group_mask) {
            kdebug!("cannot bind to group {}: {}", self.placement.group, e);
        }
        kdebug!(
            "worker {} started (group {}, ideal cpu {})",
            self.id,
            self.placement.group,
            self.placement.ideal_cpu
        );

        loop {
            let batch = self.pending.take_all();
            if batch.is_empty() {
                self.idle.store(true, Ordering::SeqCst);
                // A push may have landed before the store above
                if !self.pending.is_empty() {
                    self.idle.store(false, Ordering::SeqCst);
                    continue;
                }
                if self.shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                self.wake.wait(None);
                self.idle.store(false, Ordering::SeqCst);
                continue;
            }

            for mut job in batch {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                ktrace!("worker {} running {} job {}", self.id, job.kind.name(), job.id());
                let control = Arc::clone(&job.control);
                let result = self.execute(&mut job.kind, &control);
                job.set_result(result);
                self.completion.complete(job);
            }
        }
        kdebug!("worker {} exiting", self.id);
    }

    fn execute(&self, kind: &mut JobKind, control: &JobControl) -> ExitResult {
        match kind {
            JobKind::SpawnProcess(spawn) => self.run_spawn(spawn, control),
            JobKind::AwaitExternalEvent(event) => wait_external(event),
            JobKind::AwaitNativeHandle(handle) => wait_process(handle, control),
        }
    }

    fn run_spawn(&self, spawn: &SpawnJob, control: &JobControl) -> ExitResult {
        if let Some(signal) = control.requested_signal() {
            kdebug!("cancelled before launch: {}", spawn.args.first().map_or("", String::as_str));
            control.mark_exited();
            return ExitResult::cancelled(signal);
        }

        let env = spawn.env.as_deref().map(EnvBlock::from_entries);
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let settings = &self.shared.settings;

        let plan = match launcher::plan_launch(&spawn.args, env.as_ref(), &spawn.shell, &cwd, settings) {
            Ok(plan) => plan,
            Err(e) => {
                launcher::report_launch_error(&e);
                control.mark_exited();
                return ExitResult::launch_failed();
            }
        };
        if plan.via_shell {
            kdebug!("running through shell: {}", plan.command_line);
        }

        match launcher::launch(&plan, env.as_ref(), Some(&self.group_mask), settings) {
            Ok(mut handle) => {
                control.mark_running(handle.pid());
                wait_process(&mut handle, control)
            }
            Err(e) => {
                launcher::report_launch_error(&e);
                control.mark_exited();
                ExitResult::launch_failed()
            }
        }
    }
}

/// Wait for exit, close the cancel window, then reap
fn wait_process(handle: &mut ProcessHandle, control: &JobControl) -> ExitResult {
    let waited = handle.wait_exit();
    control.mark_exited();
    if let Err(e) = waited {
        kerror!("wait for pid {} failed: {}", handle.pid(), e);
        return ExitResult::wait_failed();
    }
    match handle.reap() {
        Ok(status) => exit_result(status),
        Err(e) => {
            kerror!("reap of pid {} failed: {}", handle.pid(), e);
            ExitResult::wait_failed()
        }
    }
}

fn wait_external(event: &ExternalEventJob) -> ExitResult {
    if let Err(e) = wait_readable(event.wait_handle) {
        kerror!("wait on external handle {} failed: {}", event.wait_handle, e);
        return ExitResult::wait_failed();
    }
    match event.ctx.try_take_result() {
        Some((code, Some(signal))) => ExitResult { exit_code: code, signal: Some(signal), core_dumped: false },
        Some((code, None)) => ExitResult::exited(code),
        None => {
            kwarn!("external handle {} fired without a result", event.wait_handle);
            ExitResult::wait_failed()
        }
    }
}
