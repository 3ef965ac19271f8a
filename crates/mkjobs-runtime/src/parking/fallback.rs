//! Condvar wake signal for platforms without futex

use super::WakeSignal;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct CondvarSignal {
    token: Mutex<bool>,
    cond: Condvar,
}

impl CondvarSignal {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

impl Default for CondvarSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal for CondvarSignal {
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *token {
                *token = false;
                return true;
            }
            token = match deadline {
                None => self.cond.wait(token).unwrap_or_else(PoisonError::into_inner),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    self.cond
                        .wait_timeout(token, d - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn notify(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = true;
        drop(token);
        self.cond.notify_one();
    }
}
