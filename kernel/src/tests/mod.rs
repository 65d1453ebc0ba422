//! Kernel Scenario Tests
//!
//! End-to-end tests that boot a kernel on the hosted provider and drive
//! it through the syscall surface. Tasks report failures through their
//! exit value; every scenario expects init to exit with 0.

/// Return `$code` from the enclosing task unless `$cond` holds.
macro_rules! ensure {
    ($cond:expr, $code:expr) => {
        if !$cond {
            return $code;
        }
    };
}
pub(crate) use ensure;

mod thread_tests;

use std::thread;
use std::time::{Duration, Instant};

use crate::config::KernelConfig;
use crate::kernel::Kernel;
use crate::process::Task;
use crate::scheduler::HostScheduler;

/// Boot a kernel running `init` and return init's exit value.
pub(crate) fn run(config: KernelConfig, init: Task, args: &[u8]) -> i32 {
    let kernel = Kernel::boot(config, HostScheduler::new(), init, args);
    kernel.wait_for_shutdown().expect("idle context")
}

/// Like [`run`], also handing back the kernel for post-mortem checks.
pub(crate) fn run_kernel(config: KernelConfig, init: Task, args: &[u8]) -> (Kernel, i32) {
    let kernel = Kernel::boot(config, HostScheduler::new(), init, args);
    let status = kernel.wait_for_shutdown().expect("idle context");
    (kernel, status)
}

pub(crate) fn encode(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

pub(crate) fn decode(args: &[u8]) -> i32 {
    args.get(..4)
        .and_then(|b| b.try_into().ok())
        .map_or(-1, i32::from_le_bytes)
}

/// Keep the calling thread's slot alive until someone joins it; an
/// exited thread nobody joined is reclaimed at once.
pub(crate) fn hold_until_joined(k: &Kernel) {
    if let Ok(me) = k.thread_self() {
        wait_until(|| k.thread_info(me).is_some_and(|t| t.refcount >= 2));
    }
}

/// Poll `cond` for up to five seconds.
pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}
