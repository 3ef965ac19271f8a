//! Job descriptors and cancellation control
//!
//! A descriptor is boxed once at submission and moves by pointer: engine
//! to worker stack, worker to completion stack, completion stack back to
//! the engine. Its address is the job id.
//!
//! The cancel protocol runs on `JobControl::state`:
//!
//! ```text
//!   PENDING --launch--> RUNNING --exit observed--> EXITED
//!                        |   ^
//!              cancel CAS|   |restore
//!                        v   |
//!                     SIGNALLING
//! ```
//!
//! The signal is sent only while SIGNALLING is held, and the worker only
//! reaps after moving RUNNING to EXITED, so a signal can never hit a
//! recycled pid.

use crate::handle::{send_signal, ExternalJob, ProcessHandle};
use mkjobs_core::{kdebug, AtomicStack, ExitResult, JobId, StackLink, StackNode};
use nix::unistd::Pid;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

const STATE_PENDING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SIGNALLING: u8 = 2;
const STATE_EXITED: u8 = 3;

const NO_SIGNAL: i32 = 0;

/// What the caller asks to run
pub enum JobRequest {
    /// Launch a process
    Spawn {
        args: Vec<String>,
        env: Option<Arc<[String]>>,
        shell: String,
    },
    /// Wait on an event owned by `ctx`
    ExternalEvent {
        wait_handle: RawFd,
        ctx: Arc<dyn ExternalJob>,
    },
    /// Wait on a child process started elsewhere
    NativeHandle(ProcessHandle),
    /// Run a command inside the build tool itself; has no executor here
    Builtin { name: String },
}

/// Cancellation state shared between the engine and the executing worker
pub(crate) struct JobControl {
    state: AtomicU8,
    pid: AtomicI32,
    signal: AtomicI32,
    external: Option<Arc<dyn ExternalJob>>,
}

impl JobControl {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_PENDING),
            pid: AtomicI32::new(0),
            signal: AtomicI32::new(NO_SIGNAL),
            external: None,
        }
    }

    pub(crate) fn external(ctx: Arc<dyn ExternalJob>) -> Self {
        Self { external: Some(ctx), ..Self::new() }
    }

    /// Already running when submitted
    pub(crate) fn running(pid: Pid) -> Self {
        let control = Self::new();
        control.pid.store(pid.as_raw(), Ordering::SeqCst);
        control.state.store(STATE_RUNNING, Ordering::SeqCst);
        control
    }

    pub(crate) fn requested_signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            NO_SIGNAL => None,
            sig => Some(sig),
        }
    }

    /// Record `signal` and deliver it if the process is running
    ///
    /// A job not yet launched sees the request before launching; one
    /// already exited ignores it.
    pub(crate) fn request_cancel(&self, signal: i32) {
        self.signal.store(signal, Ordering::SeqCst);
        if let Some(ctx) = &self.external {
            ctx.request_kill(signal);
            return;
        }
        self.deliver(signal);
    }

    fn deliver(&self, signal: i32) {
        if self
            .state
            .compare_exchange(STATE_RUNNING, STATE_SIGNALLING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let pid = Pid::from_raw(self.pid.load(Ordering::SeqCst));
            if let Err(e) = send_signal(pid, signal) {
                kdebug!("signal {} to pid {} failed: {}", signal, pid, e);
            }
            self.state.store(STATE_RUNNING, Ordering::SeqCst);
        }
    }

    /// The process is started; honour a cancel that raced with the launch
    pub(crate) fn mark_running(&self, pid: Pid) {
        self.pid.store(pid.as_raw(), Ordering::SeqCst);
        self.state.store(STATE_RUNNING, Ordering::SeqCst);
        if let Some(signal) = self.requested_signal() {
            self.deliver(signal);
        }
    }

    /// The process has exited but is not reaped; waits out an in-flight signal
    pub(crate) fn mark_exited(&self) {
        loop {
            let state = self.state.load(Ordering::SeqCst);
            if state == STATE_SIGNALLING {
                std::hint::spin_loop();
                continue;
            }
            if self
                .state
                .compare_exchange(state, STATE_EXITED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_exited(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_EXITED
    }
}

pub(crate) struct SpawnJob {
    pub(crate) args: Vec<String>,
    pub(crate) env: Option<Arc<[String]>>,
    pub(crate) shell: String,
}

pub(crate) struct ExternalEventJob {
    pub(crate) wait_handle: RawFd,
    pub(crate) ctx: Arc<dyn ExternalJob>,
}

pub(crate) enum JobKind {
    SpawnProcess(SpawnJob),
    AwaitExternalEvent(ExternalEventJob),
    AwaitNativeHandle(ProcessHandle),
}

impl JobKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            JobKind::SpawnProcess(_) => "spawn",
            JobKind::AwaitExternalEvent(_) => "external-event",
            JobKind::AwaitNativeHandle(_) => "native-handle",
        }
    }
}

pub(crate) struct JobDescriptor<O> {
    link: StackLink<JobDescriptor<O>>,
    pub(crate) kind: JobKind,
    pub(crate) control: Arc<JobControl>,
    owner: O,
    result: Option<ExitResult>,
}

// Safety: `link` is only touched by `AtomicStack`
unsafe impl<O> StackNode for JobDescriptor<O> {
    fn link(&self) -> &StackLink<Self> {
        &self.link
    }
}

pub(crate) type JobStack<O> = AtomicStack<JobDescriptor<O>>;

impl<O> JobDescriptor<O> {
    pub(crate) fn new(kind: JobKind, control: Arc<JobControl>, owner: O) -> Box<Self> {
        Box::new(Self {
            link: StackLink::new(),
            kind,
            control,
            owner,
            result: None,
        })
    }

    pub(crate) fn id(&self) -> JobId {
        JobId::from_addr(self as *const Self)
    }

    /// Written exactly once, by the executing worker
    pub(crate) fn set_result(&mut self, result: ExitResult) {
        debug_assert!(self.result.is_none(), "job result written twice");
        self.result = Some(result);
    }

    /// Consume a completed descriptor
    pub(crate) fn into_completion(self: Box<Self>) -> (JobId, ExitResult, O) {
        let id = self.id();
        let result = self.result.unwrap_or_else(ExitResult::wait_failed);
        (id, result, self.owner)
    }
}
