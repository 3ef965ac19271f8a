//! Job identifier type

use core::fmt;
use core::num::NonZeroUsize;

/// Identity of a submitted job
///
/// The value is the address of the job's descriptor, which stays pinned on
/// the heap from submission until the job is handed back by `try_wait`.
/// An id is therefore never shared by two live jobs, but may be reused
/// once the job it named has been retrieved.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct JobId(NonZeroUsize);

impl JobId {
    /// Build an id from a descriptor address
    #[inline]
    pub fn from_addr<T>(ptr: *const T) -> Self {
        // Box addresses are never null
        JobId(NonZeroUsize::new(ptr as usize).unwrap_or(NonZeroUsize::MIN))
    }

    /// Build an id from a raw value (0 is not a valid id)
    #[inline]
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(v) => Some(JobId(v)),
            None => None,
        }
    }

    /// Get the raw value
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({:#x})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
