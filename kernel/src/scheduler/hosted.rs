//! Hosted execution-context provider.
//!
//! Runs every [`Context`] on its own OS thread and uses
//! `park`/`unpark` for sleep and wakeup. An `unpark` delivered before the
//! matching `park` is remembered by the thread, so wakeups are never lost.

use alloc::format;
use alloc::sync::Arc;
use core::time::Duration;
use hashbrown::HashMap;
use spin::Mutex;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, Thread};
use std::time::Instant;

use super::{ContextEntry, ContextId, ContextRef, ContextState, Scheduler};
use crate::error::{KResult, KernelError};

std::thread_local! {
    static CURRENT: RefCell<Option<ContextRef>> = RefCell::new(None);
}

/// Thread-per-context provider.
pub struct HostScheduler {
    threads: Mutex<HashMap<ContextId, Thread>>,
    epoch: Instant,
}

impl HostScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(HostScheduler {
            threads: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        })
    }
}

impl Scheduler for HostScheduler {
    fn spawn(&self, context: ContextRef, entry: ContextEntry) -> KResult<()> {
        let id = context.id();
        let ctx = context.clone();
        let handle = thread::Builder::new()
            .name(format!("kctx-{}", id.0))
            .spawn(move || {
                CURRENT.with(|c| *c.borrow_mut() = Some(ctx.clone()));
                while ctx.state() == ContextState::Init {
                    thread::park();
                }
                if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
                    log::error!("[KPIO Host] context {} panicked, halting", id.0);
                    std::process::abort();
                }
                ctx.transition(ContextState::Exited);
            })
            .map_err(|_| {
                log::warn!("[KPIO Host] cannot start context {}", id.0);
                KernelError::ResourceExhausted
            })?;

        self.threads.lock().insert(id, handle.thread().clone());
        Ok(())
    }

    fn adopt(&self, context: ContextRef) {
        context.transition(ContextState::Ready);
        self.threads.lock().insert(context.id(), thread::current());
        CURRENT.with(|c| *c.borrow_mut() = Some(context));
    }

    fn wakeup(&self, context: &ContextRef) -> bool {
        if context.transition(ContextState::Ready) == ContextState::Exited {
            return false;
        }
        if let Some(thread) = self.threads.lock().get(&context.id()) {
            thread.unpark();
        }
        true
    }

    fn sleep(&self, context: &ContextRef) {
        context.transition(ContextState::Sleeping);
        thread::park();
        context.transition(ContextState::Ready);
    }

    fn sleep_timeout(&self, context: &ContextRef, timeout: Duration) {
        context.transition(ContextState::Sleeping);
        thread::park_timeout(timeout);
        context.transition(ContextState::Ready);
    }

    fn exit_current(&self, context: &ContextRef) -> ! {
        context.transition(ContextState::Exited);
        self.threads.lock().remove(&context.id());
        log::debug!("[KPIO Host] context {} exited", context.id().0);
        loop {
            thread::park();
        }
    }

    fn current(&self) -> Option<ContextRef> {
        CURRENT.with(|c| c.borrow().clone())
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}
