//! Job engine: the submission side
//!
//! One thread owns the engine and is the only one that submits, cancels
//! and collects results; `&mut self` enforces that. Workers run the jobs.
//!
//! ```ignore
//! let mut engine: JobEngine<u32> = JobEngine::new(PoolConfig::from_env())?;
//! let id = engine.submit_process(&args, None, "/bin/sh", 1);
//! while let Some((id, result, owner)) = engine.try_wait(true) {
//!     println!("{} finished: {}", owner, result);
//! }
//! ```

use crate::affinity::detect_topology;
use crate::completion::CompletionChannel;
use crate::config::PoolConfig;
use crate::handle::{ExternalJob, ProcessHandle};
use crate::job::{ExternalEventJob, JobControl, JobDescriptor, JobKind, JobRequest, SpawnJob};
use crate::pool::WorkerPool;
use mkjobs_core::{kdebug, kerror, kinfo, EngineError, ExitResult, JobError, JobId, Topology};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Snapshot of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers created so far
    pub workers: usize,
    /// Most workers the pool will create
    pub cap: usize,
    /// Workers currently sleeping
    pub idle: usize,
}

pub struct JobEngine<O: Send + 'static> {
    pool: WorkerPool<O>,
    completion: Arc<CompletionChannel<O>>,
    /// Jobs submitted and not yet returned by `try_wait`
    live: HashMap<JobId, Arc<JobControl>>,
    config: PoolConfig,
}

impl<O: Send + 'static> JobEngine<O> {
    /// Engine over the detected processor topology
    pub fn new(config: PoolConfig) -> Result<Self, EngineError> {
        Self::with_topology(config, detect_topology())
    }

    pub fn with_topology(config: PoolConfig, topology: Topology) -> Result<Self, EngineError> {
        mkjobs_core::kprint::init();
        config.validate()?;
        config.log();

        let completion = Arc::new(CompletionChannel::new()?);
        kinfo!(
            "job engine: cap {} over {} group(s)",
            config.worker_cap(),
            topology.group_count()
        );
        let pool = WorkerPool::new(&config, topology, Arc::clone(&completion));
        Ok(Self {
            pool,
            completion,
            live: HashMap::new(),
            config,
        })
    }

    /// Submit any request
    ///
    /// Fails only for kinds this engine cannot execute.
    pub fn submit(&mut self, request: JobRequest, owner: O) -> Result<JobId, JobError> {
        let id = match request {
            JobRequest::Spawn { args, env, shell } => self.enqueue(
                JobKind::SpawnProcess(SpawnJob { args, env, shell }),
                JobControl::new(),
                owner,
            ),
            JobRequest::ExternalEvent { wait_handle, ctx } => {
                let control = JobControl::external(Arc::clone(&ctx));
                self.enqueue(
                    JobKind::AwaitExternalEvent(ExternalEventJob { wait_handle, ctx }),
                    control,
                    owner,
                )
            }
            JobRequest::NativeHandle(handle) => {
                let control = JobControl::running(handle.pid());
                self.enqueue(JobKind::AwaitNativeHandle(handle), control, owner)
            }
            JobRequest::Builtin { name } => {
                kdebug!("rejecting builtin job {}", name);
                return Err(JobError::UnsupportedKind("builtin"));
            }
        };
        Ok(id)
    }

    /// Launch `args` with `env` as the whole environment (or this
    /// process's environment when `None`)
    ///
    /// Arguments and environment are copied; the caller may reuse its
    /// buffers immediately.
    pub fn submit_process(&mut self, args: &[String], env: Option<&[String]>, shell: &str, owner: O) -> JobId {
        let env = env.map(Arc::from);
        self.spawn(args, env, shell, owner)
    }

    /// Like `submit_process`, sharing one environment between many jobs
    pub fn submit_process_shared(&mut self, args: &[String], env: Arc<[String]>, shell: &str, owner: O) -> JobId {
        self.spawn(args, Some(env), shell, owner)
    }

    /// Wait on a child this process already started
    pub fn submit_native_handle(&mut self, handle: ProcessHandle, owner: O) -> JobId {
        let control = JobControl::running(handle.pid());
        self.enqueue(JobKind::AwaitNativeHandle(handle), control, owner)
    }

    /// Wait for `wait_handle` to become readable, then take the result from `ctx`
    pub fn submit_external_event(&mut self, wait_handle: RawFd, ctx: Arc<dyn ExternalJob>, owner: O) -> JobId {
        let control = JobControl::external(Arc::clone(&ctx));
        self.enqueue(
            JobKind::AwaitExternalEvent(ExternalEventJob { wait_handle, ctx }),
            control,
            owner,
        )
    }

    /// `submit_external_event` on the context's own wait handle
    pub fn submit_external(&mut self, ctx: Arc<dyn ExternalJob>, owner: O) -> JobId {
        let wait_handle = ctx.wait_handle();
        self.submit_external_event(wait_handle, ctx, owner)
    }

    fn spawn(&mut self, args: &[String], env: Option<Arc<[String]>>, shell: &str, owner: O) -> JobId {
        let kind = JobKind::SpawnProcess(SpawnJob {
            args: args.to_vec(),
            env,
            shell: shell.to_string(),
        });
        self.enqueue(kind, JobControl::new(), owner)
    }

    fn enqueue(&mut self, kind: JobKind, control: JobControl, owner: O) -> JobId {
        let control = Arc::new(control);
        let job = JobDescriptor::new(kind, Arc::clone(&control), owner);
        let id = job.id();
        self.live.insert(id, control);
        self.completion.register();
        self.pool.assign(job);
        id
    }

    /// Ask a job to stop with `signal`
    ///
    /// Not started yet: it completes as cancelled without launching.
    /// Running: the process is signalled. Finished or unknown: no effect.
    pub fn cancel(&mut self, job: JobId, signal: i32) {
        match self.live.get(&job) {
            Some(control) => {
                kdebug!("cancel {} with signal {}", job, signal);
                control.request_cancel(signal);
            }
            None => kdebug!("cancel of unknown job {}", job),
        }
    }

    /// Next finished job, most recently finished first
    ///
    /// Non-blocking returns `None` if nothing has finished. Blocking sleeps
    /// until something finishes and returns `None` only once no job is
    /// outstanding.
    pub fn try_wait(&mut self, blocking: bool) -> Option<(JobId, ExitResult, O)> {
        loop {
            if let Some(completion) = self.pop_completed() {
                return Some(completion);
            }
            if !blocking {
                return None;
            }
            if self.completion.pending() == 0 {
                // Pushes happen before the decrement, so anything that
                // finished is on the stack now
                return self.pop_completed();
            }
            if let Err(e) = self.completion.wait() {
                kerror!("waiting for completions failed: {}", e);
                return None;
            }
        }
    }

    fn pop_completed(&mut self) -> Option<(JobId, ExitResult, O)> {
        // Safety: `&mut self` makes this the only consumer
        let job = unsafe { self.completion.pop() }?;
        let (id, result, owner) = job.into_completion();
        self.live.remove(&id);
        kdebug!("job {} finished: {}", id, result);
        Some((id, result, owner))
    }

    /// Descriptor that is readable while finished jobs are queued
    ///
    /// Readiness is cleared by the `try_wait` call that finds nothing, so a
    /// caller polling this descriptor should call `try_wait(false)` until it
    /// returns `None`.
    pub fn completion_waitable(&self) -> RawFd {
        self.completion.waitable()
    }

    /// Submitted jobs that have not completed
    pub fn pending(&self) -> usize {
        self.completion.pending()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.pool.worker_count(),
            cap: self.pool.cap(),
            idle: self.pool.idle_count(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Stop idle workers; busy ones exit after their current jobs
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}

impl<O: Send + 'static> Drop for JobEngine<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::NativeWaitable;
    use std::os::unix::fs::PermissionsExt;
    use std::process::Command;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn engine(slots: usize) -> JobEngine<usize> {
        JobEngine::with_topology(PoolConfig::new().job_slots(slots), Topology::single(2)).unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(10), "condition not reached");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_every_job_completes_once() {
        let mut engine = engine(4);
        let mut expected = HashMap::new();
        for i in 0..40 {
            let id = engine.submit_process(&sh(&format!("exit {}", i % 7)), None, "/bin/sh", i);
            expected.insert(id, i);
        }

        let mut seen = Vec::new();
        while let Some((id, result, owner)) = engine.try_wait(true) {
            assert_eq!(expected.remove(&id), Some(owner));
            assert_eq!(result, ExitResult::exited((owner % 7) as i32));
            seen.push(owner);
        }
        assert_eq!(seen.len(), 40);
        assert!(expected.is_empty());
        assert_eq!(engine.pending(), 0);
        assert!(engine.stats().workers <= 4);
    }

    #[test]
    fn test_nonblocking_when_idle() {
        let mut engine = engine(2);
        assert!(engine.try_wait(false).is_none());
        assert!(engine.try_wait(true).is_none());
    }

    #[test]
    fn test_most_recent_completion_first() {
        let mut engine = engine(1);
        for i in 0..3 {
            engine.submit_process(&sh("exit 0"), None, "/bin/sh", i);
            wait_until(|| engine.pending() == 0);
        }
        let order: Vec<usize> = std::iter::from_fn(|| engine.try_wait(false).map(|(_, _, o)| o)).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_arguments_are_copied() {
        let mut engine = engine(1);
        let mut args = sh("exit $MKJOBS_COPY_TEST");
        let mut env = vec!["MKJOBS_COPY_TEST=3".to_string()];
        engine.submit_process(&args, Some(&env), "/bin/sh", 0);
        args[2] = "exit 9".to_string();
        args.clear();
        env[0] = "MKJOBS_COPY_TEST=9".to_string();
        drop(env);
        let (_, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(result.exit_code, 3);
    }

    #[test]
    fn test_worker_cap_respected() {
        let mut engine = engine(2);
        for i in 0..6 {
            engine.submit_process(&sh("sleep 0.1"), None, "/bin/sh", i);
        }
        assert!(engine.stats().workers <= 2);
        let mut count = 0;
        while engine.try_wait(true).is_some() {
            count += 1;
        }
        assert_eq!(count, 6);
        assert_eq!(engine.stats().cap, 2);
    }

    #[test]
    fn test_idle_worker_reused() {
        let mut engine = engine(4);
        engine.submit_process(&sh("exit 0"), None, "/bin/sh", 0);
        engine.try_wait(true).unwrap();
        wait_until(|| engine.stats().idle == 1);

        engine.submit_process(&sh("exit 0"), None, "/bin/sh", 1);
        engine.try_wait(true).unwrap();
        assert_eq!(engine.stats().workers, 1);
    }

    #[test]
    fn test_pending_counts() {
        let mut engine = engine(4);
        for i in 0..3 {
            engine.submit_process(&sh("sleep 0.3"), None, "/bin/sh", i);
        }
        assert_eq!(engine.pending(), 3);
        engine.try_wait(true).unwrap();
        assert!(engine.pending() <= 2);
        while engine.try_wait(true).is_some() {}
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_cancel_running_job() {
        let mut engine = engine(2);
        let id = engine.submit_process(&sh("sleep 30"), None, "/bin/sh", 0);
        std::thread::sleep(Duration::from_millis(100));
        engine.cancel(id, libc::SIGTERM);
        let (done, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(done, id);
        assert_eq!(result.signal, Some(libc::SIGTERM));
        assert_eq!(result.exit_code, 128 + libc::SIGTERM);
    }

    #[test]
    fn test_cancel_queued_job() {
        let mut engine = engine(1);
        engine.submit_process(&sh("sleep 0.3"), None, "/bin/sh", 0);
        let queued = engine.submit_process(&sh("sleep 5"), None, "/bin/sh", 1);
        engine.cancel(queued, libc::SIGKILL);

        let mut results = HashMap::new();
        while let Some((_, result, owner)) = engine.try_wait(true) {
            results.insert(owner, result);
        }
        assert_eq!(results[&0], ExitResult::exited(0));
        assert_eq!(results[&1].signal, Some(libc::SIGKILL));
        assert_eq!(results[&1].exit_code, 128 + libc::SIGKILL);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let mut engine = engine(1);
        let id = engine.submit_process(&sh("exit 0"), None, "/bin/sh", 0);
        let (_, result, _) = engine.try_wait(true).unwrap();
        engine.cancel(id, libc::SIGKILL);
        assert!(result.is_success());
    }

    #[test]
    fn test_environment_replaces_process_env() {
        let mut engine = engine(2);
        let env = vec!["MKJOBS_ENGINE_TEST=4".to_string(), "PATH=/bin:/usr/bin".to_string()];
        engine.submit_process(&sh("exit $MKJOBS_ENGINE_TEST"), Some(&env), "/bin/sh", 0);

        let shared: Arc<[String]> = Arc::from(vec!["MKJOBS_ENGINE_TEST=6".to_string()]);
        engine.submit_process_shared(&sh("exit $MKJOBS_ENGINE_TEST"), Arc::clone(&shared), "/bin/sh", 1);
        engine.submit_process_shared(&sh("test -z \"$HOME\""), shared, "/bin/sh", 2);

        let mut results = HashMap::new();
        while let Some((_, result, owner)) = engine.try_wait(true) {
            results.insert(owner, result.exit_code);
        }
        assert_eq!(results[&0], 4);
        assert_eq!(results[&1], 6);
        assert_eq!(results[&2], 0);
    }

    #[test]
    fn test_missing_command_exits_127() {
        let mut engine = engine(1);
        let env = vec!["PATH=/nonexistent".to_string()];
        engine.submit_process(&["no-such-command-mkjobs".to_string()], Some(&env), "/bin/sh", 0);
        let (_, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(result.exit_code, 127);
    }

    #[test]
    fn test_missing_shell_exits_127() {
        let mut engine = engine(1);
        let env = vec!["PATH=/nonexistent".to_string()];
        engine.submit_process(&["no-such-command-mkjobs".to_string()], Some(&env), "/nonexistent/sh", 0);
        let (_, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(result, ExitResult::launch_failed());
    }

    #[test]
    fn test_script_without_header_runs_in_shell() {
        let dir = std::env::temp_dir().join(format!("mkjobs-engine-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("plain-script");
        std::fs::write(&script, "exit 7\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut engine = engine(1);
        engine.submit_process(&[script.to_string_lossy().into_owned()], None, "/bin/sh", 0);
        let (_, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(result.exit_code, 7);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_interpreter_options_honoured() {
        let dir = std::env::temp_dir().join(format!("mkjobs-engine-shebang-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("strict-script");
        std::fs::write(&script, "#!/bin/sh -e\nfalse\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut engine = engine(1);
        engine.submit_process(&[script.to_string_lossy().into_owned()], None, "/bin/sh", 0);
        let (_, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(result.exit_code, 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_search_skips_unexecutable_shadow() {
        let dir = std::env::temp_dir().join(format!("mkjobs-engine-shadow-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("true"), "exit 3\n").unwrap();
        std::fs::set_permissions(dir.join("true"), std::fs::Permissions::from_mode(0o644)).unwrap();

        let env = vec![format!("PATH={}:/bin:/usr/bin", dir.display())];
        let mut engine = engine(1);
        engine.submit_process(&["true".to_string()], Some(&env), "/bin/sh", 0);
        let (_, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(result.exit_code, 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_builtin_rejected() {
        let mut engine = engine(1);
        let err = engine
            .submit(JobRequest::Builtin { name: "echo".into() }, 0)
            .unwrap_err();
        assert_eq!(err, JobError::UnsupportedKind("builtin"));
        assert_eq!(engine.pending(), 0);
        assert_eq!(engine.stats().workers, 0);
    }

    #[test]
    fn test_submit_request_spawn() {
        let mut engine = engine(1);
        let request = JobRequest::Spawn { args: sh("exit 2"), env: None, shell: "/bin/sh".into() };
        let id = engine.submit(request, 5).unwrap();
        assert_eq!(engine.try_wait(true), Some((id, ExitResult::exited(2), 5)));
    }

    #[test]
    fn test_native_handle() {
        let mut engine = engine(1);
        let child = Command::new("/bin/sh").args(["-c", "exit 5"]).spawn().unwrap();
        let id = engine.submit_native_handle(ProcessHandle::from_child(child), 0);
        let (done, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(done, id);
        assert_eq!(result, ExitResult::exited(5));
    }

    struct PipeEvent {
        read_fd: RawFd,
        write_fd: RawFd,
        result: Mutex<Option<(i32, Option<i32>)>>,
        killed: Mutex<Option<i32>>,
    }

    impl PipeEvent {
        fn new() -> Arc<Self> {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            Arc::new(Self {
                read_fd: fds[0],
                write_fd: fds[1],
                result: Mutex::new(None),
                killed: Mutex::new(None),
            })
        }

        fn fire(&self, result: (i32, Option<i32>)) {
            *self.result.lock().unwrap() = Some(result);
            let byte = 1u8;
            unsafe { libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1) };
        }
    }

    impl Drop for PipeEvent {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.read_fd);
                libc::close(self.write_fd);
            }
        }
    }

    impl NativeWaitable for PipeEvent {
        fn wait_handle(&self) -> RawFd {
            self.read_fd
        }
    }

    impl ExternalJob for PipeEvent {
        fn try_take_result(&self) -> Option<(i32, Option<i32>)> {
            self.result.lock().unwrap().take()
        }

        fn request_kill(&self, signal: i32) {
            *self.killed.lock().unwrap() = Some(signal);
            self.fire((128 + signal, Some(signal)));
        }
    }

    #[test]
    fn test_external_event() {
        let mut engine = engine(2);
        let event = PipeEvent::new();
        let id = engine.submit_external(event.clone(), 0);
        assert!(engine.try_wait(false).is_none());
        event.fire((3, None));
        assert_eq!(engine.try_wait(true), Some((id, ExitResult::exited(3), 0)));
    }

    #[test]
    fn test_external_event_cancel_delegates() {
        let mut engine = engine(2);
        let event = PipeEvent::new();
        let id = engine.submit_external_event(event.read_fd, event.clone(), 0);
        engine.cancel(id, libc::SIGINT);
        let (_, result, _) = engine.try_wait(true).unwrap();
        assert_eq!(*event.killed.lock().unwrap(), Some(libc::SIGINT));
        assert_eq!(result.signal, Some(libc::SIGINT));
    }

    #[test]
    fn test_completion_waitable_readable() {
        let mut engine = engine(1);
        engine.submit_process(&sh("exit 0"), None, "/bin/sh", 0);
        crate::notify::wait_readable(engine.completion_waitable()).unwrap();
        assert!(engine.try_wait(false).is_some());
    }

    fn readable_now(fd: RawFd) -> bool {
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        unsafe { libc::poll(&mut pfd, 1, 0) == 1 }
    }

    #[test]
    fn test_waitable_tracks_queued_completions() {
        let mut engine = engine(1);
        let fd = engine.completion_waitable();
        for i in 0..2 {
            engine.submit_process(&sh("exit 0"), None, "/bin/sh", i);
        }
        wait_until(|| engine.pending() == 0);
        assert!(readable_now(fd));

        // One job still queued: the descriptor stays readable
        assert!(engine.try_wait(false).is_some());
        assert!(readable_now(fd));

        assert!(engine.try_wait(false).is_some());
        assert!(engine.try_wait(false).is_none());
        assert!(!readable_now(fd));

        engine.submit_process(&sh("exit 0"), None, "/bin/sh", 2);
        crate::notify::wait_readable(fd).unwrap();
        assert!(engine.try_wait(false).is_some());
        assert!(engine.try_wait(false).is_none());
        assert!(!readable_now(fd));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = JobEngine::<usize>::with_topology(PoolConfig::new().max_workers(0), Topology::single(1));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
