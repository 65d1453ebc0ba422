//! Property 2: Every child is reaped exactly once.
//!
//! For any set of child exit values, waiting for any child returns each
//! child exactly once with its own exit value, then reports that no
//! children are left.

use kcore::scheduler::HostScheduler;
use kcore::syscall::*;
use kcore::{Kernel, KernelConfig};
use proptest::prelude::*;

fn return_arg(_k: &Kernel, args: &[u8]) -> i32 {
    i32::from_le_bytes([args[0], args[1], args[2], args[3]])
}

fn spawn_and_reap_init(k: &Kernel, args: &[u8]) -> i32 {
    let values: Vec<i32> = args
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut pids = Vec::new();
    for v in values.iter() {
        let pid = sys_exec(k, return_arg, &v.to_le_bytes());
        if pid == NOPROC {
            return -1;
        }
        pids.push((pid, *v));
    }

    let mut reaped = Vec::new();
    for _ in 0..pids.len() {
        let mut status = 0;
        let pid = sys_wait_child(k, NOPROC, Some(&mut status));
        if pid == NOPROC {
            return -2;
        }
        reaped.push((pid, status));
    }
    if sys_wait_child(k, NOPROC, None) != NOPROC {
        return -3;
    }

    pids.sort();
    reaped.sort();
    if pids == reaped {
        0
    } else {
        -4
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Reaped (pid, status) pairs match the children started.
    #[test]
    fn children_reaped_exactly_once(values in proptest::collection::vec(0i32..1000, 0..12)) {
        let args: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let kernel = Kernel::boot(KernelConfig::default(), HostScheduler::new(), spawn_and_reap_init, &args);
        prop_assert_eq!(kernel.wait_for_shutdown(), Ok(0));
        prop_assert_eq!(kernel.process_count(), 2);
    }
}
