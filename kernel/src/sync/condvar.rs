//! Wait-set condition variable.
//!
//! A waiter enqueues its context while still holding the protecting lock,
//! releases the lock, sleeps, and re-acquires the lock on wakeup. Because
//! the signaler also holds the lock, a signal can never slip in between
//! the waiter's predicate check and its enqueue. Wakeups may be spurious;
//! every caller re-checks its predicate in a loop.

use alloc::collections::VecDeque;
use core::time::Duration;
use spin::{Mutex, MutexGuard};

use crate::scheduler::{ContextRef, Scheduler};

/// Condition variable over a `spin::Mutex`.
pub struct CondVar {
    waitset: Mutex<VecDeque<ContextRef>>,
}

impl CondVar {
    pub const fn new() -> Self {
        CondVar {
            waitset: Mutex::new(VecDeque::new()),
        }
    }

    /// Release `guard`, sleep until signaled, re-acquire `lock`.
    pub fn wait<'a, T>(
        &self,
        sched: &dyn Scheduler,
        me: &ContextRef,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
    ) -> MutexGuard<'a, T> {
        self.waitset.lock().push_back(me.clone());
        drop(guard);
        sched.sleep(me);
        let guard = lock.lock();
        self.forget(me);
        guard
    }

    /// Like [`wait`](CondVar::wait) but gives up after `timeout`.
    pub fn wait_timeout<'a, T>(
        &self,
        sched: &dyn Scheduler,
        me: &ContextRef,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> MutexGuard<'a, T> {
        self.waitset.lock().push_back(me.clone());
        drop(guard);
        sched.sleep_timeout(me, timeout);
        let guard = lock.lock();
        self.forget(me);
        guard
    }

    /// Wake the longest waiting context.
    pub fn signal(&self, sched: &dyn Scheduler) -> bool {
        let next = self.waitset.lock().pop_front();
        match next {
            Some(ctx) => {
                sched.wakeup(&ctx);
                true
            }
            None => false,
        }
    }

    /// Wake every waiting context. Returns how many were woken.
    pub fn broadcast(&self, sched: &dyn Scheduler) -> usize {
        let waiters: VecDeque<ContextRef> = core::mem::take(&mut *self.waitset.lock());
        for ctx in waiters.iter() {
            sched.wakeup(ctx);
        }
        waiters.len()
    }

    /// Number of contexts currently enqueued.
    pub fn waiters(&self) -> usize {
        self.waitset.lock().len()
    }

    // A context woken by something other than this condition (an
    // interrupt, a timeout) must not linger in the wait set.
    fn forget(&self, me: &ContextRef) {
        self.waitset.lock().retain(|ctx| !ctx.same(me));
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
