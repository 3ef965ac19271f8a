//! Linux futex wake signal
//!
//! Futex word semantics:
//! - 0 = no token
//! - 1 = token pending
//!
//! `wait` swaps the word to 0; if it was 1 the token is consumed without
//! a syscall. Otherwise it sleeps in FUTEX_WAIT on value 0, so a notify
//! racing with the swap makes the kernel return immediately.

use super::WakeSignal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

pub struct FutexSignal {
    word: AtomicU32,
}

impl FutexSignal {
    pub fn new() -> Self {
        Self { word: AtomicU32::new(0) }
    }

    fn futex_wait(&self, timeout: Option<Duration>) {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Woken, timed out, interrupted or word already 1: the caller
        // re-checks the word in every case.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal for FutexSignal {
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.word.swap(0, Ordering::Acquire) == 1 {
                return true;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    Some(d - now)
                }
                None => None,
            };
            self.futex_wait(remaining);
        }
    }

    fn notify(&self) {
        if self.word.swap(1, Ordering::Release) == 0 {
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    self.word.as_ptr(),
                    libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                    1i32,
                    std::ptr::null::<libc::timespec>(),
                    std::ptr::null::<u32>(),
                    0u32,
                );
            }
        }
    }
}
