//! Property 3: Stream reservation is all-or-nothing.
//!
//! With `max_fileid` open-stream slots, exactly `max_fileid / 2` pipes can
//! be created; every failed attempt leaves the stream table untouched.

use kcore::scheduler::HostScheduler;
use kcore::syscall::*;
use kcore::{Kernel, KernelConfig};
use proptest::prelude::*;

fn create_pipes_init(k: &Kernel, args: &[u8]) -> i32 {
    let attempts = args[0] as usize;
    let slots = args[1] as usize;

    let mut created = 0;
    for _ in 0..attempts {
        let before = k.open_file_count();
        let mut p = PipeT::default();
        if sys_pipe(k, &mut p) == 0 {
            created += 1;
        } else if k.open_file_count() != before || p != PipeT::default() {
            return 1;
        }
    }
    if created != attempts.min(slots / 2) {
        return 2;
    }
    if k.open_file_count() != 2 * created {
        return 3;
    }
    0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Pipes fill the open-stream table two slots at a time.
    #[test]
    fn pipes_never_partially_allocate(attempts in 0u8..12, slots in 1u8..12) {
        let config = KernelConfig::default().with_max_fileid(slots as usize);
        let kernel = Kernel::boot(config, HostScheduler::new(), create_pipes_init, &[attempts, slots]);
        prop_assert_eq!(kernel.wait_for_shutdown(), Ok(0));
        prop_assert_eq!(kernel.open_file_count(), 0);
    }
}
