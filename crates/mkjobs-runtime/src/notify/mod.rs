//! Completion waitable
//!
//! A kernel object the consumer can sleep on (or hand to its own event
//! loop) until at least one job has completed. Workers signal it when the
//! completion stack goes from empty to non-empty; the consumer drains it
//! before sleeping again, so signals coalesce.

use nix::errno::Errno;
use std::os::unix::io::RawFd;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod eventfd;
        pub use eventfd::EventFdSignal as CompletionSignal;
    } else {
        mod pipe;
        pub use pipe::PipeSignal as CompletionSignal;
    }
}

/// Block until `fd` is readable (or hung up)
pub fn wait_readable(fd: RawFd) -> Result<(), Errno> {
    let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc > 0 {
            if pfd.revents & libc::POLLNVAL != 0 {
                return Err(Errno::EBADF);
            }
            return Ok(());
        }
        if rc < 0 {
            let err = Errno::last();
            if err != Errno::EINTR {
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_then_wait() {
        let signal = CompletionSignal::create().unwrap();
        signal.signal();
        signal.signal();
        signal.wait().unwrap();
        // Coalesced: nothing left after the drain
        assert!(!signal.drain());
    }

    #[test]
    fn test_wait_wakes_on_signal() {
        let signal = Arc::new(CompletionSignal::create().unwrap());
        let waiter = Arc::clone(&signal);
        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(30));
        signal.signal();
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_fd_is_pollable() {
        let signal = CompletionSignal::create().unwrap();
        assert!(signal.fd() >= 0);
        signal.signal();
        wait_readable(signal.fd()).unwrap();
        assert!(signal.drain());
    }
}
