//! eventfd completion signal
//!
//! Counter semantics: any number of writes before the consumer reads
//! yield a single readable event.

use super::wait_readable;
use mkjobs_core::{kerror, EngineError};
use nix::errno::Errno;
use std::os::unix::io::RawFd;

pub struct EventFdSignal {
    fd: RawFd,
}

impl EventFdSignal {
    pub fn create() -> Result<Self, EngineError> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(EngineError::Notify(Errno::last() as i32));
        }
        Ok(Self { fd })
    }

    /// Raw descriptor, readable while a completion is pending
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn signal(&self) {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = Errno::last();
            // Counter saturated: a wakeup is already pending
            if err != Errno::EAGAIN {
                kerror!("completion signal write failed: {}", err);
            }
        }
    }

    /// Reset the counter; returns whether it was set
    pub fn drain(&self) -> bool {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        ret == std::mem::size_of::<u64>() as isize && val > 0
    }

    /// Sleep until signalled, consuming the signal
    pub fn wait(&self) -> Result<(), Errno> {
        wait_readable(self.fd)?;
        self.drain();
        Ok(())
    }
}

impl Drop for EventFdSignal {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}
