//! Self-pipe completion signal for platforms without eventfd

use super::wait_readable;
use mkjobs_core::{kerror, EngineError};
use nix::errno::Errno;
use std::os::unix::io::RawFd;

pub struct PipeSignal {
    read_fd: RawFd,
    write_fd: RawFd,
}

fn set_flags(fd: RawFd) -> Result<(), Errno> {
    unsafe {
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
            return Err(Errno::last());
        }
        let fd_fl = libc::fcntl(fd, libc::F_GETFD);
        if fd_fl < 0 || libc::fcntl(fd, libc::F_SETFD, fd_fl | libc::FD_CLOEXEC) < 0 {
            return Err(Errno::last());
        }
    }
    Ok(())
}

impl PipeSignal {
    pub fn create() -> Result<Self, EngineError> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(EngineError::Notify(Errno::last() as i32));
        }
        let signal = Self { read_fd: fds[0], write_fd: fds[1] };
        for fd in fds {
            set_flags(fd).map_err(|e| EngineError::Notify(e as i32))?;
        }
        Ok(signal)
    }

    pub fn fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn signal(&self) {
        let byte = 1u8;
        let ret = unsafe { libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1) };
        if ret < 0 {
            let err = Errno::last();
            // Pipe full: plenty of wakeups already pending
            if err != Errno::EAGAIN {
                kerror!("completion signal write failed: {}", err);
            }
        }
    }

    pub fn drain(&self) -> bool {
        let mut buf = [0u8; 64];
        let mut any = false;
        loop {
            let ret = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if ret <= 0 {
                return any;
            }
            any = true;
        }
    }

    pub fn wait(&self) -> Result<(), Errno> {
        wait_readable(self.read_fd)?;
        self.drain();
        Ok(())
    }
}

impl Drop for PipeSignal {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}
