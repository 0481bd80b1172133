use core::pin::pin;
use std::panic::AssertUnwindSafe;

use futures::future::FusedFuture;
use futures::FutureExt;
use ratesink::exec::yield_cpu;
use ratesink::lock::Exclusive;
use ratesink::mutex::Mutex;

use crate::{poll_and_assert_not_ready, poll_and_assert_ready};

pub async fn test_uncontended() {
    let mutex = Mutex::new();
    assert!(!mutex.is_locked());
    mutex.lock().await;
    assert!(mutex.is_locked());
    assert!(!mutex.try_lock());
    unsafe { mutex.unlock() };
    assert!(!mutex.is_locked());
    assert!(mutex.try_lock());
    unsafe { mutex.unlock() };
}

pub async fn test_exclusive_join() {
    let shared = Exclusive::new(Mutex::new(), 42_usize);
    futures::join!(
        async {
            // Yield a bit first to ensure that the two tasks interleave.
            yield_cpu().await;
            shared.perform(|v| *v += 1).await;
        },
        async {
            shared.perform(|v| *v += 2).await;
            yield_cpu().await;
        },
    );

    assert_eq!(shared.perform(|v| *v).await, 42 + 2 + 1);
    assert!(!shared.lock().is_locked());
}

pub async fn test_lock_cancel_before_poll() {
    let mutex = Mutex::new();
    drop(mutex.lock());
    assert!(!mutex.is_locked());
    assert_eq!(mutex.waiting(), 0);
}

pub async fn test_lock_cancel_while_blocked() {
    let mutex = Mutex::new();
    assert!(mutex.try_lock());

    {
        let mut fut = pin!(mutex.lock());
        poll_and_assert_not_ready!(fut);
        assert_eq!(mutex.waiting(), 1);
    }
    // Detached from the wait list on the way out.
    assert_eq!(mutex.waiting(), 0);

    unsafe { mutex.unlock() };
    assert!(!mutex.is_locked(), "unlock with nobody waiting should free it");
}

pub async fn test_fairness() {
    let mutex = Mutex::new();
    assert!(mutex.try_lock());

    let mut first = pin!(mutex.lock());
    let mut second = pin!(mutex.lock());
    poll_and_assert_not_ready!(first);
    poll_and_assert_not_ready!(second);

    unsafe { mutex.unlock() };
    // Handed to `first`, so still locked as far as anyone else can tell.
    assert!(mutex.is_locked());
    assert!(!mutex.try_lock(), "interloper stole a handed-off mutex");

    // A latecomer queues behind the others.
    let mut third = pin!(mutex.lock());
    poll_and_assert_not_ready!(third);

    // The _second_ waiter should still not complete, even if polled first.
    poll_and_assert_not_ready!(second);
    poll_and_assert_not_ready!(third);
    poll_and_assert_ready!(first);

    unsafe { mutex.unlock() };
    poll_and_assert_not_ready!(third);
    poll_and_assert_ready!(second);

    unsafe { mutex.unlock() };
    poll_and_assert_ready!(third);

    unsafe { mutex.unlock() };
    assert!(!mutex.is_locked());
}

/// A waiter that is handed the mutex and then cancelled must pass it on.
pub async fn test_rewake_on_cancel() {
    let mutex = Mutex::new();
    assert!(mutex.try_lock());

    let mut second = pin!(mutex.lock());
    {
        let mut first = pin!(mutex.lock());
        poll_and_assert_not_ready!(first);
        poll_and_assert_not_ready!(second);

        unsafe { mutex.unlock() };
        // `first` now owns the mutex but is dropped without noticing.
    }

    assert!(mutex.is_locked());
    poll_and_assert_ready!(second);
    unsafe { mutex.unlock() };
    assert!(!mutex.is_locked());
}

pub async fn test_try_perform_while_held() {
    let shared = Exclusive::new(Mutex::new(), 0_u8);
    assert!(shared.lock().try_lock());
    assert_eq!(shared.try_perform(|v| *v += 1), None);
    unsafe { shared.lock().unlock() };
    assert_eq!(shared.try_perform(|v| { *v += 1; *v }), Some(1));
}

pub async fn test_release_on_panic() {
    let shared = Exclusive::new(Mutex::new(), 0_u32);
    let result = AssertUnwindSafe(shared.perform(|_| panic!("boom")))
        .catch_unwind()
        .await;
    assert!(result.is_err());
    assert!(!shared.lock().is_locked(), "panic leaked the mutex");
}

/// `LockFuture` is fused, so it can go straight into `select!`.
pub async fn test_lock_in_select() {
    let mutex = Mutex::new();
    let mut fut = mutex.lock();
    assert!(!fut.is_terminated());
    futures::select_biased! {
        () = fut => (),
    }
    assert!(fut.is_terminated());
    assert!(mutex.is_locked());
    unsafe { mutex.unlock() };
}
