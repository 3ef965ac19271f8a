//! Intrusive lock-free LIFO stack
//!
//! The hand-off structure for jobs: each worker owns one (producer = the
//! pool, consumer = the worker) and the completion channel owns one
//! (producers = all workers, consumer = the submitting thread).
//!
//! Nodes are boxed values that embed their own [`StackLink`], so pushing
//! never allocates and a node keeps its address while it moves from stack
//! to stack.
//!
//! # Operations
//!
//! - `push` - CAS loop, any number of concurrent producers
//! - `take_all` - swap the head with null, detaching the whole chain
//! - `pop` - CAS pop of one node, sound only with a single consumer
//!
//! `take_all` is ABA-free because it never reads `next` of a shared node.
//! `pop` reads `next` of the current head, which is only safe when no other
//! thread can free that head concurrently, hence the single-consumer rule.

use core::marker::PhantomData;
use core::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Link field embedded in every stack node
pub struct StackLink<T> {
    next: AtomicPtr<T>,
}

impl<T> StackLink<T> {
    pub const fn new() -> Self {
        Self { next: AtomicPtr::new(ptr::null_mut()) }
    }
}

impl<T> Default for StackLink<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Types that can live in an [`AtomicStack`]
///
/// # Safety
///
/// `link` must always return the same `StackLink` embedded in `self`, and
/// that link must not be used by anything other than the stack.
pub unsafe trait StackNode: Sized {
    fn link(&self) -> &StackLink<Self>;
}

/// Lock-free intrusive LIFO of boxed nodes
pub struct AtomicStack<T: StackNode> {
    head: AtomicPtr<T>,
    _owns: PhantomData<Box<T>>,
}

// Safety: nodes are only reachable through the stack and move between
// threads as whole boxes.
unsafe impl<T: StackNode + Send> Send for AtomicStack<T> {}
unsafe impl<T: StackNode + Send> Sync for AtomicStack<T> {}

impl<T: StackNode> AtomicStack<T> {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// Push a node. Returns `true` if the stack was empty before the push.
    ///
    /// SeqCst so that a producer's push followed by a load of the consumer's
    /// idle flag cannot be reordered against the consumer's store of that
    /// flag followed by `is_empty`.
    pub fn push(&self, node: Box<T>) -> bool {
        let node = Box::into_raw(node);
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // Safety: we own `node` until the CAS publishes it
            unsafe { (*node).link().next.store(head, Ordering::Relaxed) };
            match self.head.compare_exchange_weak(
                head,
                node,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return head.is_null(),
                Err(actual) => head = actual,
            }
        }
    }

    /// Detach every node currently on the stack, most recent first
    pub fn take_all(&self) -> Drain<T> {
        let head = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
        Drain { cur: head, _owns: PhantomData }
    }

    /// Pop the most recently pushed node
    ///
    /// # Safety
    ///
    /// At most one thread may call `pop` or `take_all` on this stack at a
    /// time. Concurrent `push` is fine.
    pub unsafe fn pop(&self) -> Option<Box<T>> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head.is_null() {
                return None;
            }
            // Only this consumer frees nodes, so `head` is still live
            let next = (*head).link().next.load(Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                next,
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    (*head).link().next.store(ptr::null_mut(), Ordering::Relaxed);
                    return Some(Box::from_raw(head));
                }
                Err(actual) => head = actual,
            }
        }
    }

    /// Snapshot emptiness check (may be stale by the time it returns)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::SeqCst).is_null()
    }
}

impl<T: StackNode> Default for AtomicStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StackNode> Drop for AtomicStack<T> {
    fn drop(&mut self) {
        drop(self.take_all());
    }
}

/// Detached chain returned by [`AtomicStack::take_all`]
///
/// Owned by the caller; nodes not consumed are freed on drop.
pub struct Drain<T: StackNode> {
    cur: *mut T,
    _owns: PhantomData<Box<T>>,
}

// Safety: the chain is exclusively owned
unsafe impl<T: StackNode + Send> Send for Drain<T> {}

impl<T: StackNode> Drain<T> {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cur.is_null()
    }
}

impl<T: StackNode> Iterator for Drain<T> {
    type Item = Box<T>;

    fn next(&mut self) -> Option<Box<T>> {
        if self.cur.is_null() {
            return None;
        }
        // Safety: the chain was detached from the stack; we own every node
        unsafe {
            let node = self.cur;
            self.cur = (*node).link().next.swap(ptr::null_mut(), Ordering::Relaxed);
            Some(Box::from_raw(node))
        }
    }
}

impl<T: StackNode> Drop for Drain<T> {
    fn drop(&mut self) {
        for node in self.by_ref() {
            drop(node);
        }
    }
}
