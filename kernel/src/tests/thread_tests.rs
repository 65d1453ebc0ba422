//! Thread Management Unit Tests
//!
//! Tests for create, join, detach, exit and interrupts.

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::config::KernelConfig;
    use crate::kernel::Kernel;
    use crate::process::{ThreadId, ThreadState};
    use crate::syscall::*;
    use crate::tests::{decode, encode, hold_until_joined, run, wait_until};

    // ========================================
    // Join
    // ========================================

    fn exit_42_once_joined(k: &Kernel, _args: &[u8]) -> i32 {
        let me = ThreadId(sys_thread_self(k) as usize);
        // Own share plus two joiners.
        wait_until(|| k.thread_info(me).is_some_and(|t| t.refcount == 3));
        sys_thread_exit(k, 42)
    }

    fn join_target(k: &Kernel, args: &[u8]) -> i32 {
        let mut value = -1;
        ensure!(sys_thread_join(k, decode(args), Some(&mut value)) == 0, 100);
        hold_until_joined(k);
        value
    }

    fn two_joiners_init(k: &Kernel, _args: &[u8]) -> i32 {
        let target = sys_create_thread(k, exit_42_once_joined, b"");
        ensure!(target != NOTHREAD, 1);
        let a = sys_create_thread(k, join_target, &encode(target));
        let b = sys_create_thread(k, join_target, &encode(target));
        ensure!(a != NOTHREAD && b != NOTHREAD, 2);

        let (mut va, mut vb) = (0, 0);
        ensure!(sys_thread_join(k, a, Some(&mut va)) == 0, 3);
        ensure!(sys_thread_join(k, b, Some(&mut vb)) == 0, 4);
        ensure!(va == 42 && vb == 42, 5);

        // Both joiners have read the value, so the slot is free again.
        ensure!(k.thread_info(ThreadId(target as usize)).is_none(), 6);
        0
    }

    #[test]
    fn test_two_joiners_see_same_exit_value() {
        assert_eq!(run(KernelConfig::default(), two_joiners_init, b""), 0);
    }

    fn join_errors_init(k: &Kernel, _args: &[u8]) -> i32 {
        let me = sys_thread_self(k);
        ensure!(me != NOTHREAD, 1);
        ensure!(sys_thread_join(k, me, None) == -1, 2);
        ensure!(sys_thread_join(k, -1, None) == -1, 3);
        ensure!(sys_thread_join(k, 100_000, None) == -1, 4);
        0
    }

    #[test]
    fn test_join_self_and_invalid_fails() {
        assert_eq!(run(KernelConfig::default(), join_errors_init, b""), 0);
    }

    fn quick(_k: &Kernel, _args: &[u8]) -> i32 {
        3
    }

    fn join_after_exit_init(k: &Kernel, _args: &[u8]) -> i32 {
        let tid = sys_create_thread(k, quick, b"");
        ensure!(tid != NOTHREAD, 1);
        ensure!(wait_until(|| k.thread_info(ThreadId(tid as usize)).is_none()), 2);
        ensure!(sys_thread_join(k, tid, None) == -1, 3);
        0
    }

    #[test]
    fn test_unjoined_thread_slot_is_reclaimed_on_exit() {
        assert_eq!(run(KernelConfig::default(), join_after_exit_init, b""), 0);
    }

    static FOREIGN_RELEASE: AtomicBool = AtomicBool::new(false);

    fn park_until_foreign_release(k: &Kernel, _args: &[u8]) -> i32 {
        wait_until(|| FOREIGN_RELEASE.load(Ordering::SeqCst));
        hold_until_joined(k);
        0
    }

    fn join_foreign(k: &Kernel, args: &[u8]) -> i32 {
        if sys_thread_join(k, decode(args), None) == -1 {
            0
        } else {
            1
        }
    }

    fn foreign_join_init(k: &Kernel, _args: &[u8]) -> i32 {
        let tid = sys_create_thread(k, park_until_foreign_release, b"");
        let pid = sys_exec(k, join_foreign, &encode(tid));
        let mut status = -1;
        ensure!(sys_wait_child(k, pid, Some(&mut status)) == pid, 1);
        ensure!(status == 0, 2);

        FOREIGN_RELEASE.store(true, Ordering::SeqCst);
        ensure!(sys_thread_join(k, tid, None) == 0, 3);
        0
    }

    #[test]
    fn test_join_thread_of_other_process_fails() {
        assert_eq!(run(KernelConfig::default(), foreign_join_init, b""), 0);
    }

    // ========================================
    // Detach
    // ========================================

    static DETACH_RELEASE: AtomicBool = AtomicBool::new(false);

    fn park_until_detach_release(_k: &Kernel, _args: &[u8]) -> i32 {
        wait_until(|| DETACH_RELEASE.load(Ordering::SeqCst));
        0
    }

    fn detach_init(k: &Kernel, _args: &[u8]) -> i32 {
        let tid = sys_create_thread(k, park_until_detach_release, b"");
        ensure!(sys_thread_detach(k, tid) == 0, 1);
        ensure!(sys_thread_detach(k, tid) == 0, 2);
        ensure!(sys_thread_join(k, tid, None) == -1, 3);
        let info = k.thread_info(ThreadId(tid as usize));
        ensure!(info.is_some_and(|t| t.detached && t.state == ThreadState::Active), 4);

        ensure!(sys_thread_detach(k, -3) == -1, 5);
        ensure!(sys_thread_detach(k, 100_000) == -1, 6);

        DETACH_RELEASE.store(true, Ordering::SeqCst);
        ensure!(wait_until(|| k.thread_info(ThreadId(tid as usize)).is_none()), 7);
        0
    }

    #[test]
    fn test_detached_thread_cannot_be_joined() {
        assert_eq!(run(KernelConfig::default(), detach_init, b""), 0);
    }

    static RELEASED_JOINER_GO: AtomicBool = AtomicBool::new(false);

    fn park_until_joiner_released(_k: &Kernel, _args: &[u8]) -> i32 {
        wait_until(|| RELEASED_JOINER_GO.load(Ordering::SeqCst));
        0
    }

    fn join_expecting_release(k: &Kernel, args: &[u8]) -> i32 {
        let mut value = -7;
        ensure!(sys_thread_join(k, decode(args), Some(&mut value)) == 0, 1);
        // Released by detach: no exit value was written.
        ensure!(value == -7, 2);
        hold_until_joined(k);
        0
    }

    fn detach_releases_joiner_init(k: &Kernel, _args: &[u8]) -> i32 {
        let target = sys_create_thread(k, park_until_joiner_released, b"");
        let joiner = sys_create_thread(k, join_expecting_release, &encode(target));
        let target_id = ThreadId(target as usize);
        ensure!(wait_until(|| k.thread_info(target_id).is_some_and(|t| t.refcount == 2)), 1);

        ensure!(sys_thread_detach(k, target) == 0, 2);
        let mut status = -1;
        ensure!(sys_thread_join(k, joiner, Some(&mut status)) == 0, 3);
        ensure!(status == 0, 4);
        ensure!(k.thread_info(target_id).is_some_and(|t| t.refcount == 1), 5);

        RELEASED_JOINER_GO.store(true, Ordering::SeqCst);
        0
    }

    #[test]
    fn test_detach_releases_blocked_joiner() {
        assert_eq!(run(KernelConfig::default(), detach_releases_joiner_init, b""), 0);
    }

    // ========================================
    // Exit
    // ========================================

    fn main_thread_exit(k: &Kernel, _args: &[u8]) -> i32 {
        sys_thread_exit(k, 11)
    }

    fn main_exit_init(k: &Kernel, _args: &[u8]) -> i32 {
        let pid = sys_exec(k, main_thread_exit, b"");
        let mut status = 0;
        ensure!(sys_wait_child(k, pid, Some(&mut status)) == pid, 1);
        ensure!(status == 11, 2);
        0
    }

    #[test]
    fn test_main_thread_exit_ends_process() {
        assert_eq!(run(KernelConfig::default(), main_exit_init, b""), 0);
    }

    static REPEAT_STAGE: AtomicU32 = AtomicU32::new(0);

    fn exit_twice(k: &Kernel, _args: &[u8]) -> i32 {
        k.thread_exit(5);
        // Nobody joined, so the slot is already gone.
        if k.thread_self().is_ok() {
            return 1;
        }
        wait_until(|| REPEAT_STAGE.load(Ordering::SeqCst) == 1);
        k.thread_exit(6);
        REPEAT_STAGE.store(2, Ordering::SeqCst);
        0
    }

    fn hold_for_join(k: &Kernel, _args: &[u8]) -> i32 {
        hold_until_joined(k);
        8
    }

    fn repeated_exit_init(k: &Kernel, _args: &[u8]) -> i32 {
        let a = sys_create_thread(k, exit_twice, b"");
        ensure!(a != NOTHREAD, 1);
        ensure!(wait_until(|| k.thread_info(ThreadId(a as usize)).is_none()), 2);

        // The freed slot is handed out again first.
        let b = sys_create_thread(k, hold_for_join, b"");
        ensure!(b == a, 3);
        REPEAT_STAGE.store(1, Ordering::SeqCst);
        ensure!(wait_until(|| REPEAT_STAGE.load(Ordering::SeqCst) == 2), 4);

        let info = k.thread_info(ThreadId(b as usize));
        ensure!(info.is_some_and(|t| t.state == ThreadState::Active && t.refcount == 1), 5);
        let mut value = 0;
        ensure!(sys_thread_join(k, b, Some(&mut value)) == 0, 6);
        ensure!(value == 8, 7);
        0
    }

    #[test]
    fn test_second_exit_does_not_touch_reused_slot() {
        assert_eq!(run(KernelConfig::default(), repeated_exit_init, b""), 0);
    }

    // ========================================
    // Interrupts
    // ========================================

    fn wait_for_interrupt(k: &Kernel, _args: &[u8]) -> i32 {
        ensure!(wait_until(|| sys_thread_is_interrupted(k) == 1), 1);
        sys_thread_clear_interrupt(k);
        ensure!(sys_thread_is_interrupted(k) == 0, 2);
        hold_until_joined(k);
        9
    }

    fn interrupt_init(k: &Kernel, _args: &[u8]) -> i32 {
        ensure!(sys_thread_is_interrupted(k) == 0, 1);
        let tid = sys_create_thread(k, wait_for_interrupt, b"");
        ensure!(sys_thread_interrupt(k, tid) == 0, 2);
        let mut value = 0;
        ensure!(sys_thread_join(k, tid, Some(&mut value)) == 0, 3);
        ensure!(value == 9, 4);
        ensure!(sys_thread_interrupt(k, tid) == -1, 5);
        ensure!(sys_thread_interrupt(k, -1) == -1, 6);
        0
    }

    #[test]
    fn test_interrupt_flag_is_advisory_and_sticky() {
        assert_eq!(run(KernelConfig::default(), interrupt_init, b""), 0);
    }

    // ========================================
    // Exhaustion
    // ========================================

    static EXHAUST_RELEASE: AtomicBool = AtomicBool::new(false);

    fn park_until_exhaust_release(k: &Kernel, _args: &[u8]) -> i32 {
        wait_until(|| EXHAUST_RELEASE.load(Ordering::SeqCst));
        hold_until_joined(k);
        0
    }

    fn thread_exhaustion_init(k: &Kernel, _args: &[u8]) -> i32 {
        // Init's main thread holds the first slot.
        let a = sys_create_thread(k, park_until_exhaust_release, b"");
        let b = sys_create_thread(k, park_until_exhaust_release, b"");
        ensure!(a != NOTHREAD && b != NOTHREAD, 1);
        ensure!(sys_create_thread(k, park_until_exhaust_release, b"") == NOTHREAD, 2);
        ensure!(sys_exec(k, park_until_exhaust_release, b"") == NOPROC, 3);

        EXHAUST_RELEASE.store(true, Ordering::SeqCst);
        ensure!(sys_thread_join(k, a, None) == 0, 4);
        ensure!(sys_thread_join(k, b, None) == 0, 5);
        ensure!(k.thread_slots_in_use() == 1, 6);
        0
    }

    #[test]
    fn test_thread_table_exhaustion() {
        let config = KernelConfig::default().with_max_threads(3);
        assert_eq!(run(config, thread_exhaustion_init, b""), 0);
    }
}
