//! Kernel self-tests
//!
//! Each test runs on the calling kernel thread and returns a report that
//! describes what happened.
use spin::Mutex as SpinMutex;
use std::{fmt, sync::Arc};

use crate::{KThread, ThreadedKernel};

/// The number of iterations each thread of [`ping_test`] performs.
pub const PING_ITERATIONS: usize = 5;

/// The durations [`alarm_test`] is usually run with.
pub const ALARM_DURATIONS: [i64; 3] = [1_000, 10_000, 100_000];

/// The duration waited by the forked thread of [`alarm_fork_test`].
pub const ALARM_FORK_DURATION: i64 = 500;

/// The number of turns each thread takes in the ping-pong part of
/// [`condition_test`].
pub const PING_PONG_ROUNDS: usize = 4;

const CONDITION_WAITERS: usize = 3;

/// One iteration of a [`ping_test`] thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingEvent {
    pub thread: usize,
    pub iteration: usize,
}

impl fmt::Display for PingEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "*** thread {} looped {} times",
            self.thread, self.iteration
        )
    }
}

/// Fork a thread and make both threads loop [`PING_ITERATIONS`] times,
/// yielding after every iteration.
pub fn ping_test(tk: &Arc<ThreadedKernel>) -> Vec<PingEvent> {
    let kernel = tk.kernel();
    let events = Arc::new(SpinMutex::new(Vec::new()));

    let ping = |thread: usize| {
        let kernel = kernel.clone();
        let events = Arc::clone(&events);
        move || {
            for iteration in 0..PING_ITERATIONS {
                events.lock().push(PingEvent { thread, iteration });
                kernel.yield_current();
            }
        }
    };

    let forked = KThread::define().name("forked thread").fork(kernel, ping(1));
    ping(0)();
    forked.join();

    let events = events.lock();
    events.clone()
}

/// The outcome of a timed sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmReport {
    /// The argument passed to [`Alarm::wait_until`](crate::Alarm::wait_until).
    pub requested: i64,
    /// The number of ticks that actually passed.
    pub waited: u64,
}

impl AlarmReport {
    /// Get whether the thread slept at least as long as requested.
    pub fn is_ok(&self) -> bool {
        self.requested <= 0 || self.waited >= self.requested.unsigned_abs()
    }
}

impl fmt::Display for AlarmReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "alarm: waited for {} ticks (requested {})",
            self.waited, self.requested
        )
    }
}

fn timed_wait(tk: &ThreadedKernel, requested: i64) -> AlarmReport {
    let timer = tk.kernel().machine().timer();
    let start = timer.time();
    tk.alarm().wait_until(requested);
    AlarmReport {
        requested,
        waited: timer.time() - start,
    }
}

/// Make the current thread sleep for each of `durations` in turn.
pub fn alarm_test(tk: &Arc<ThreadedKernel>, durations: &[i64]) -> Vec<AlarmReport> {
    durations.iter().map(|&d| timed_wait(tk, d)).collect()
}

/// Sleep on a forked thread while the current thread joins it.
pub fn alarm_fork_test(tk: &Arc<ThreadedKernel>) -> AlarmReport {
    let report = Arc::new(SpinMutex::new(None));

    let thread = {
        let sleeper_tk = Arc::clone(tk);
        let report = Arc::clone(&report);
        KThread::define()
            .name("alarm sleeper")
            .fork(tk.kernel(), move || {
                *report.lock() = Some(timed_wait(&sleeper_tk, ALARM_FORK_DURATION));
            })
    };
    thread.join();

    let report = report.lock().take();
    match report {
        Some(report) => report,
        None => panic!("the sleeper finished without a report"),
    }
}

/// The outcome of [`condition_test`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConditionReport {
    /// The order in which the waiters went to sleep.
    pub sleep_order: Vec<usize>,
    /// The order in which the waiters woke up by `wake`.
    pub wake_order: Vec<usize>,
    /// The order in which the waiters woke up by `wake_all`.
    pub wake_all_order: Vec<usize>,
    /// The threads taking turns in the ping-pong, in order.
    pub ping_pong: Vec<usize>,
}

impl ConditionReport {
    /// Get whether the waiters woke up in the order they went to sleep and the
    /// ping-pong alternated.
    pub fn is_ok(&self) -> bool {
        self.wake_order == self.sleep_order
            && self.wake_all_order == self.sleep_order
            && self.ping_pong.len() == 2 * PING_PONG_ROUNDS
            && self.ping_pong.iter().enumerate().all(|(i, &t)| t == i % 2)
    }
}

impl fmt::Display for ConditionReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "condition: sleep order {:?}", self.sleep_order)?;
        writeln!(f, "condition: wake order {:?}", self.wake_order)?;
        writeln!(f, "condition: wake_all order {:?}", self.wake_all_order)?;
        write!(f, "condition: ping-pong {:?}", self.ping_pong)
    }
}

#[derive(Default)]
struct Shared {
    slept: Vec<usize>,
    woken: Vec<usize>,
    turn: usize,
}

/// Exercise [`Condition2`](crate::Condition2): wake waiters one by one, wake
/// them all at once, and alternate two threads.
pub fn condition_test(tk: &Arc<ThreadedKernel>) -> ConditionReport {
    let kernel = tk.kernel();
    let lock = tk.new_lock();
    let cond = Arc::new(tk.new_condition(&lock));

    // Only touched with `lock` held
    let shared = Arc::new(SpinMutex::new(Shared::default()));

    let mut report = ConditionReport::default();

    for wake_all in [false, true] {
        let waiters: Vec<_> = (0..CONDITION_WAITERS)
            .map(|i| {
                let (lock, cond, shared) =
                    (Arc::clone(&lock), Arc::clone(&cond), Arc::clone(&shared));
                KThread::define()
                    .name(format!("waiter {i}"))
                    .fork(kernel, move || {
                        lock.acquire();
                        shared.lock().slept.push(i);
                        cond.sleep();
                        shared.lock().woken.push(i);
                        lock.release();
                    })
            })
            .collect();

        while cond.waiter_count() < CONDITION_WAITERS {
            kernel.yield_current();
        }

        lock.acquire();
        if wake_all {
            cond.wake_all();
        } else {
            for _ in 0..CONDITION_WAITERS {
                cond.wake();
            }
        }
        lock.release();

        for waiter in waiters {
            waiter.join();
        }

        let mut shared = shared.lock();
        let slept = std::mem::take(&mut shared.slept);
        let woken = std::mem::take(&mut shared.woken);
        if wake_all {
            report.wake_all_order = woken;
        } else {
            report.sleep_order = slept;
            report.wake_order = woken;
        }
    }

    let players: Vec<_> = (0..2)
        .map(|me| {
            let (lock, cond, shared) =
                (Arc::clone(&lock), Arc::clone(&cond), Arc::clone(&shared));
            KThread::define()
                .name(format!("player {me}"))
                .fork(kernel, move || {
                    for _ in 0..PING_PONG_ROUNDS {
                        lock.acquire();
                        loop {
                            let turn = shared.lock().turn;
                            if turn == me {
                                break;
                            }
                            cond.sleep();
                        }
                        {
                            let mut shared = shared.lock();
                            shared.woken.push(me);
                            shared.turn = 1 - me;
                        }
                        cond.wake_all();
                        lock.release();
                    }
                })
        })
        .collect();

    for player in players {
        player.join();
    }
    report.ping_pong = std::mem::take(&mut shared.lock().woken);

    report
}
