//! Condition variables on the real kernel
use coop_kernel::{selftest, KThread, SchedulerKind};
use spin::Mutex as SpinMutex;
use std::{collections::VecDeque, sync::Arc};

use crate::run;

pub fn self_test(scheduler: SchedulerKind) {
    let (report, _) = run(scheduler, |tk| selftest::condition_test(tk));
    log::info!("{report}");
    assert!(report.is_ok(), "{report:?}");
    assert_eq!(report.sleep_order, [0, 1, 2]);
}

/// Thread A sleeps holding the lock; thread B acquires it, wakes A and
/// releases it. A resumes holding the lock, and B no longer does.
pub fn lock_handover(scheduler: SchedulerKind) {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        ASleeps,
        BWakes { b_holds: bool },
        BReleased { b_holds: bool },
        AResumes { a_holds: bool, waiters: usize },
    }

    let (steps, _) = run(scheduler, |tk| {
        let kernel = tk.kernel().clone();
        let lock = tk.new_lock();
        let cond = Arc::new(tk.new_condition(&lock));
        let steps = Arc::new(SpinMutex::new(Vec::new()));

        let a = {
            let (lock, cond, steps) = (lock.clone(), cond.clone(), steps.clone());
            KThread::define().name("A").fork(&kernel, move || {
                lock.acquire();
                steps.lock().push(Step::ASleeps);
                cond.sleep();
                steps.lock().push(Step::AResumes {
                    a_holds: lock.is_held_by_current_thread(),
                    waiters: cond.waiter_count(),
                });
                lock.release();
            })
        };

        let b = {
            let (b_kernel, lock, cond, steps) =
                (kernel.clone(), lock.clone(), cond.clone(), steps.clone());
            KThread::define().name("B").fork(&kernel, move || {
                // Make sure A is asleep
                while cond.waiter_count() == 0 {
                    b_kernel.yield_current();
                }
                lock.acquire();
                steps.lock().push(Step::BWakes {
                    b_holds: lock.is_held_by_current_thread(),
                });
                cond.wake();
                lock.release();
                steps.lock().push(Step::BReleased {
                    b_holds: lock.is_held_by_current_thread(),
                });
            })
        };

        a.join();
        b.join();
        assert!(!lock.is_held_by_current_thread());

        let steps = steps.lock().clone();
        steps
    });

    let pos = |step: Step| match steps.iter().position(|&s| s == step) {
        Some(i) => i,
        None => panic!("{step:?} is missing from {steps:?}"),
    };
    let a_sleeps = pos(Step::ASleeps);
    let b_wakes = pos(Step::BWakes { b_holds: true });
    let b_released = pos(Step::BReleased { b_holds: false });
    let a_resumes = pos(Step::AResumes {
        a_holds: true,
        waiters: 0,
    });
    assert_eq!(steps.len(), 4);
    assert!(a_sleeps < b_wakes, "{steps:?}");
    assert!(b_wakes < b_released, "{steps:?}");
    assert!(b_wakes < a_resumes, "{steps:?}");
}

pub fn wake_without_waiters(scheduler: SchedulerKind) {
    run(scheduler, |tk| {
        let lock = tk.new_lock();
        let cond = tk.new_condition(&lock);
        let ready_before = tk.kernel().ready_count();

        lock.acquire();
        cond.wake();
        cond.wake_all();
        assert!(lock.is_held_by_current_thread());
        lock.release();

        assert_eq!(tk.kernel().ready_count(), ready_before);
        assert_eq!(cond.waiter_count(), 0);
    });
}

/// Producers and a consumer share a bounded buffer guarded by one lock and
/// two condition variables.
pub fn bounded_buffer(scheduler: SchedulerKind) {
    const CAPACITY: usize = 2;
    const ITEMS_PER_PRODUCER: usize = 10;
    const PRODUCERS: usize = 2;

    let (consumed, _) = run(scheduler, |tk| {
        let lock = tk.new_lock();
        let not_full = Arc::new(tk.new_condition(&lock));
        let not_empty = Arc::new(tk.new_condition(&lock));
        // Only touched with `lock` held
        let buffer = Arc::new(SpinMutex::new(VecDeque::new()));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let (lock, not_full, not_empty, buffer) = (
                    lock.clone(),
                    not_full.clone(),
                    not_empty.clone(),
                    buffer.clone(),
                );
                KThread::define()
                    .name(format!("producer {p}"))
                    .fork(tk.kernel(), move || {
                        for i in 0..ITEMS_PER_PRODUCER {
                            lock.acquire();
                            while buffer.lock().len() == CAPACITY {
                                not_full.sleep();
                            }
                            buffer.lock().push_back((p, i));
                            not_empty.wake();
                            lock.release();
                        }
                    })
            })
            .collect();

        let mut consumed = Vec::new();
        for _ in 0..PRODUCERS * ITEMS_PER_PRODUCER {
            lock.acquire();
            let item = loop {
                let item = buffer.lock().pop_front();
                match item {
                    Some(item) => break item,
                    None => not_empty.sleep(),
                }
            };
            assert!(buffer.lock().len() < CAPACITY);
            not_full.wake();
            lock.release();
            consumed.push(item);
        }

        for producer in producers {
            producer.join();
        }

        consumed
    });

    assert_eq!(consumed.len(), PRODUCERS * ITEMS_PER_PRODUCER);
    for p in 0..PRODUCERS {
        let items: Vec<_> = consumed
            .iter()
            .filter(|&&(producer, _)| producer == p)
            .map(|&(_, i)| i)
            .collect();
        assert_eq!(items, (0..ITEMS_PER_PRODUCER).collect::<Vec<_>>());
    }
}

pub fn sleep_without_lock(scheduler: SchedulerKind) {
    run(scheduler, |tk| {
        let lock = tk.new_lock();
        let cond = tk.new_condition(&lock);
        cond.sleep();
    });
}

pub fn release_by_non_holder(scheduler: SchedulerKind) {
    run(scheduler, |tk| {
        let lock = tk.new_lock();
        lock.acquire();

        let thief = {
            let lock = lock.clone();
            KThread::define().fork(tk.kernel(), move || lock.release())
        };
        thief.join();
    });
}
