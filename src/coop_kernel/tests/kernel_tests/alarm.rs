//! Timed sleep on the real kernel
use coop_kernel::{
    selftest::{self, ALARM_DURATIONS, ALARM_FORK_DURATION},
    KThread, SchedulerKind,
};
use quickcheck::{QuickCheck, TestResult};
use spin::Mutex as SpinMutex;
use std::sync::Arc;

use crate::run;

/// The latest a sleeper may resume: the first timer interrupt at or after the
/// deadline, plus some time for the other ready threads to run.
fn latest_wakeup(requested: i64, timer_ticks: u64) -> u64 {
    requested as u64 + 2 * timer_ticks + 100
}

pub fn self_test(scheduler: SchedulerKind) {
    let (reports, _) = run(scheduler, |tk| {
        let timer_ticks = tk.config().timer_ticks;
        (selftest::alarm_test(tk, &ALARM_DURATIONS), timer_ticks)
    });
    let (reports, timer_ticks) = reports;

    assert_eq!(reports.len(), ALARM_DURATIONS.len());
    for report in reports {
        log::info!("{report}");
        assert!(report.is_ok(), "{report:?}");
        assert!(
            report.waited <= latest_wakeup(report.requested, timer_ticks),
            "{report:?}"
        );
    }
}

pub fn fork_self_test(scheduler: SchedulerKind) {
    let (report, _) = run(scheduler, |tk| selftest::alarm_fork_test(tk));
    assert_eq!(report.requested, ALARM_FORK_DURATION);
    assert!(report.is_ok(), "{report:?}");
}

pub fn non_positive(scheduler: SchedulerKind) {
    let (elapsed, _) = run(scheduler, |tk| {
        let timer = tk.kernel().machine().timer();
        let start = timer.time();
        tk.alarm().wait_until(0);
        tk.alarm().wait_until(-100);
        (timer.time() - start, tk.alarm().pending().len())
    });
    assert_eq!(elapsed, (0, 0));
}

/// Three threads sleep for 100, 200 and 150 ticks, starting at almost the same
/// time. The timer fires on every tick, so they wake up in deadline order.
pub fn staggered_deadlines(scheduler: SchedulerKind) {
    const TIMER_TICKS: u64 = coop_machine::KERNEL_TICK;
    let config = coop_kernel::KernelConfig {
        timer_ticks: TIMER_TICKS,
        ..crate::config(scheduler)
    };

    let (wakeups, _) = coop_kernel::ThreadedKernel::run(config, |tk| {
        let wakeups = Arc::new(SpinMutex::new(Vec::new()));

        let sleepers: Vec<_> = [100, 200, 150]
            .into_iter()
            .enumerate()
            .map(|(i, x)| {
                let tk2 = Arc::clone(tk);
                let wakeups = Arc::clone(&wakeups);
                KThread::define().fork(tk.kernel(), move || {
                    let start = tk2.kernel().machine().timer().time();
                    tk2.alarm().wait_until(x);
                    let end = tk2.kernel().machine().timer().time();
                    wakeups.lock().push((i, x, start, end));
                })
            })
            .collect();

        for sleeper in sleepers {
            sleeper.join();
        }

        let wakeups = wakeups.lock().clone();
        wakeups
    })
    .unwrap();

    let order: Vec<_> = wakeups.iter().map(|&(i, ..)| i).collect();
    assert_eq!(order, [0, 2, 1]);

    for (i, x, start, end) in wakeups {
        log::info!("sleeper {i}: requested {x}, slept from {start} to {end}");
        assert!(end >= start + x as u64);
        assert!(end - start <= latest_wakeup(x, TIMER_TICKS));
    }
}

/// Every sleeper resumes no earlier than its deadline and not long after the
/// first timer interrupt following it.
pub fn many_sleepers(scheduler: SchedulerKind) {
    fn prop(scheduler: SchedulerKind, durations: Vec<i16>) -> TestResult {
        if durations.len() > 8 {
            return TestResult::discard();
        }

        let (results, _) = run(scheduler, move |tk| {
            let results = Arc::new(SpinMutex::new(Vec::new()));
            let sleepers: Vec<_> = durations
                .into_iter()
                .map(|x| {
                    let tk2 = Arc::clone(tk);
                    let results = Arc::clone(&results);
                    KThread::define().fork(tk.kernel(), move || {
                        let timer = tk2.kernel().machine().timer();
                        let start = timer.time();
                        tk2.alarm().wait_until(x.into());
                        results.lock().push((x, timer.time() - start));
                    })
                })
                .collect();
            for sleeper in sleepers {
                sleeper.join();
            }
            let timer_ticks = tk.config().timer_ticks;
            let results = results.lock().clone();
            (results, timer_ticks)
        });
        let (results, timer_ticks) = results;

        TestResult::from_bool(results.into_iter().all(|(x, waited)| {
            if x <= 0 {
                waited == 0
            } else {
                waited >= x as u64 && waited <= latest_wakeup(x.into(), timer_ticks)
            }
        }))
    }

    let property: fn(Vec<i16>) -> TestResult = match scheduler {
        SchedulerKind::RoundRobin => |d| prop(SchedulerKind::RoundRobin, d),
        SchedulerKind::Priority => |d| prop(SchedulerKind::Priority, d),
    };
    QuickCheck::new().tests(20).quickcheck(property);
}
