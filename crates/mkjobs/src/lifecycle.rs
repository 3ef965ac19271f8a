//! Process-wide engine
//!
//! One engine per process, created by `init` and reached through the free
//! functions here. The build engine's owner pointers travel as opaque
//! `OwnerRef` tokens.

use mkjobs_core::{kerror, kinfo, EngineError, ExitResult, JobId, Result};
use mkjobs_runtime::notify::wait_readable;
use mkjobs_runtime::{ExternalJob, JobEngine, PoolConfig, ProcessHandle};
use std::ops::{Deref, DerefMut};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Caller token returned with each completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerRef(pub u64);

static ENGINE: Mutex<Option<JobEngine<OwnerRef>>> = Mutex::new(None);

fn lock() -> MutexGuard<'static, Option<JobEngine<OwnerRef>>> {
    ENGINE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create the process-wide engine with `job_slots` parallel jobs
///
/// Everything else comes from the environment (`PoolConfig::from_env`).
pub fn init(job_slots: u32) -> Result<()> {
    init_with(PoolConfig::from_env().job_slots(job_slots as usize))
}

pub fn init_with(config: PoolConfig) -> Result<()> {
    let mut slot = lock();
    if slot.is_some() {
        return Err(EngineError::AlreadyInitialized);
    }
    *slot = Some(JobEngine::new(config)?);
    kinfo!("lifecycle initialized");
    Ok(())
}

/// Exclusive access to the initialized engine
pub struct EngineGuard {
    guard: MutexGuard<'static, Option<JobEngine<OwnerRef>>>,
}

impl Deref for EngineGuard {
    type Target = JobEngine<OwnerRef>;

    fn deref(&self) -> &Self::Target {
        match self.guard.as_ref() {
            Some(engine) => engine,
            None => unreachable!("guard built only over an initialized engine"),
        }
    }
}

impl DerefMut for EngineGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.guard.as_mut() {
            Some(engine) => engine,
            None => unreachable!("guard built only over an initialized engine"),
        }
    }
}

/// The global engine
pub fn global() -> Result<EngineGuard> {
    let guard = lock();
    if guard.is_none() {
        return Err(EngineError::NotInitialized);
    }
    Ok(EngineGuard { guard })
}

pub fn submit_process(args: &[String], env: Option<&[String]>, shell: &str, owner: OwnerRef) -> Result<JobId> {
    Ok(global()?.submit_process(args, env, shell, owner))
}

pub fn submit_native_handle(handle: ProcessHandle, owner: OwnerRef) -> Result<JobId> {
    Ok(global()?.submit_native_handle(handle, owner))
}

pub fn submit_external_event(wait_handle: RawFd, ctx: Arc<dyn ExternalJob>, owner: OwnerRef) -> Result<JobId> {
    Ok(global()?.submit_external_event(wait_handle, ctx, owner))
}

pub fn cancel(job: JobId, signal: i32) -> Result<()> {
    global()?.cancel(job, signal);
    Ok(())
}

/// See `JobEngine::try_wait`
///
/// The global lock is released while sleeping, so other threads can
/// submit or cancel during a blocking wait.
pub fn try_wait(blocking: bool) -> Result<Option<(JobId, ExitResult, OwnerRef)>> {
    loop {
        let fd = {
            let mut engine = global()?;
            if let Some(done) = engine.try_wait(false) {
                return Ok(Some(done));
            }
            if !blocking || engine.pending() == 0 {
                // Nothing in flight: returns at once
                return Ok(engine.try_wait(blocking));
            }
            engine.completion_waitable()
        };
        if let Err(err) = wait_readable(fd) {
            // Shut down while we slept
            drop(global()?);
            kerror!("completion wait failed: {}", err);
            return Ok(None);
        }
    }
}

pub fn completion_waitable() -> Result<RawFd> {
    Ok(global()?.completion_waitable())
}

/// Drop the engine; idle workers exit, busy ones after their current job
pub fn shutdown() -> Result<()> {
    let engine = lock().take().ok_or(EngineError::NotInitialized)?;
    drop(engine);
    kinfo!("lifecycle shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The engine is process-wide, so the whole lifecycle is one test
    #[test]
    fn test_lifecycle() {
        assert_eq!(try_wait(false).unwrap_err(), EngineError::NotInitialized);
        assert_eq!(shutdown().unwrap_err(), EngineError::NotInitialized);

        init(2).unwrap();
        assert_eq!(init(2).unwrap_err(), EngineError::AlreadyInitialized);
        assert_eq!(global().unwrap().stats().cap, 2);
        assert!(completion_waitable().unwrap() >= 0);

        let args: Vec<String> = ["/bin/sh", "-c", "exit 4"].iter().map(|s| s.to_string()).collect();
        let id = submit_process(&args, None, "/bin/sh", OwnerRef(11)).unwrap();
        let long: Vec<String> = ["/bin/sh", "-c", "sleep 30"].iter().map(|s| s.to_string()).collect();
        let killed = submit_process(&long, None, "/bin/sh", OwnerRef(12)).unwrap();
        cancel(killed, libc::SIGKILL).unwrap();

        let mut seen = Vec::new();
        while let Some((job, result, owner)) = try_wait(true).unwrap() {
            if job == id {
                assert_eq!(result, ExitResult::exited(4));
            } else {
                assert_eq!(result.signal, Some(libc::SIGKILL));
            }
            seen.push(owner);
        }
        seen.sort_by_key(|o| o.0);
        assert_eq!(seen, vec![OwnerRef(11), OwnerRef(12)]);

        // A blocked waiter does not keep other callers out
        let stuck = submit_process(&long, None, "/bin/sh", OwnerRef(13)).unwrap();
        let waiter = std::thread::spawn(|| try_wait(true).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(completion_waitable().unwrap() >= 0);
        cancel(stuck, libc::SIGKILL).unwrap();
        let (job, result, owner) = waiter.join().unwrap().unwrap();
        assert_eq!((job, owner), (stuck, OwnerRef(13)));
        assert_eq!(result.signal, Some(libc::SIGKILL));
        assert!(try_wait(false).unwrap().is_none());

        shutdown().unwrap();
        assert!(global().is_err());
        init(1).unwrap();
        shutdown().unwrap();
    }
}
