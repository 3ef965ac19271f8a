//! Native process handles and external jobs
//!
//! A `ProcessHandle` owns a child pid until it is reaped. Waiting is split
//! in two so cancellation can never signal a recycled pid:
//!
//! 1. `wait_exit` blocks until the child is a zombie without reaping it
//!    (`waitid` with `WNOWAIT`); the pid stays reserved.
//! 2. The owner marks the job exited, then `reap` collects the status.

use mkjobs_core::{kwarn, ExitResult};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::os::unix::io::RawFd;

/// Handle to a child process of this process
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    reaped: bool,
}

impl ProcessHandle {
    /// Take over a spawned child
    ///
    /// The `Child` is consumed; dropping it neither waits nor kills.
    pub fn from_child(child: std::process::Child) -> Self {
        Self::from_pid(Pid::from_raw(child.id() as i32))
    }

    /// Wrap the pid of a child this process spawned and has not reaped
    pub fn from_pid(pid: Pid) -> Self {
        Self { pid, reaped: false }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child has exited, leaving it unreaped
    pub fn wait_exit(&self) -> Result<(), Errno> {
        loop {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    self.pid.as_raw() as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = Errno::last();
            if err != Errno::EINTR {
                return Err(err);
            }
        }
    }

    /// Collect the exit status, releasing the pid
    pub fn reap(&mut self) -> Result<WaitStatus, Errno> {
        if self.reaped {
            return Err(Errno::ECHILD);
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.reaped = true;
                    return Ok(status);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    self.reaped = true;
                    return Err(e);
                }
            }
        }
    }

    /// Send `signal` to the child
    pub fn signal(&self, signal: i32) -> Result<(), Errno> {
        if self.reaped {
            return Err(Errno::ESRCH);
        }
        send_signal(self.pid, signal)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.reaped {
            if let Ok(WaitStatus::StillAlive) = waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                kwarn!("dropping handle of running pid {}; it is left unreaped", self.pid);
            }
        }
    }
}

/// Signal 0 only probes that the pid exists
pub(crate) fn send_signal(pid: Pid, signal: i32) -> Result<(), Errno> {
    if signal == 0 {
        return kill(pid, None);
    }
    kill(pid, Signal::try_from(signal)?)
}

/// Map a wait status to the job's result
pub fn exit_result(status: WaitStatus) -> ExitResult {
    match status {
        WaitStatus::Exited(_, code) => ExitResult::exited(code),
        WaitStatus::Signaled(_, sig, core_dumped) => ExitResult::signaled(sig as i32, core_dumped),
        _ => ExitResult::wait_failed(),
    }
}

/// Something with a raw descriptor that becomes readable when it is done
pub trait NativeWaitable {
    fn wait_handle(&self) -> RawFd;
}

/// A job whose completion is driven by something other than a child
/// process of ours
///
/// The worker waits for `wait_handle` to become readable, then asks for
/// the result. Cancellation is delegated to `request_kill`.
pub trait ExternalJob: NativeWaitable + Send + Sync {
    /// `(exit_code, signal)` once the event has fired
    fn try_take_result(&self) -> Option<(i32, Option<i32>)>;

    /// Ask the job to terminate with `signal`
    fn request_kill(&self, signal: i32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_wait_then_reap_exit_code() {
        let child = Command::new("/bin/sh").args(["-c", "exit 3"]).spawn().unwrap();
        let mut handle = ProcessHandle::from_child(child);
        handle.wait_exit().unwrap();
        // Still a zombie: the pid can be signalled without error
        assert!(send_signal(handle.pid(), 0).is_ok());
        let status = handle.reap().unwrap();
        assert_eq!(exit_result(status), ExitResult::exited(3));
        assert_eq!(handle.reap(), Err(Errno::ECHILD));
    }

    #[test]
    fn test_drop_leaves_running_child() {
        let child = Command::new("/bin/sh").args(["-c", "sleep 30"]).spawn().unwrap();
        let handle = ProcessHandle::from_child(child);
        let pid = handle.pid();
        drop(handle);
        assert!(send_signal(pid, libc::SIGKILL).is_ok());
        let status = waitpid(pid, None).unwrap();
        assert_eq!(status, WaitStatus::Signaled(pid, Signal::SIGKILL, false));
    }

    #[test]
    fn test_drop_reaps_finished_child() {
        let child = Command::new("/bin/sh").args(["-c", "exit 0"]).spawn().unwrap();
        let mut handle = ProcessHandle::from_child(child);
        handle.wait_exit().unwrap();
        let pid = handle.pid();
        drop(handle);
        assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
    }

    #[test]
    fn test_signal_death() {
        let child = Command::new("/bin/sh").args(["-c", "sleep 30"]).spawn().unwrap();
        let mut handle = ProcessHandle::from_child(child);
        handle.signal(libc::SIGTERM).unwrap();
        handle.wait_exit().unwrap();
        let result = exit_result(handle.reap().unwrap());
        assert_eq!(result.signal, Some(libc::SIGTERM));
        assert_eq!(result.exit_code, 128 + libc::SIGTERM);
    }

    #[test]
    fn test_invalid_signal() {
        let child = Command::new("/bin/sh").args(["-c", "exit 0"]).spawn().unwrap();
        let mut handle = ProcessHandle::from_child(child);
        assert_eq!(handle.signal(9999), Err(Errno::EINVAL));
        handle.wait_exit().unwrap();
        handle.reap().unwrap();
    }
}
