//! Thread management
use coop_kernel::{
    selftest::{self, PingEvent, PING_ITERATIONS},
    ConfigError, HaltError, KThread, KernelConfig, KernelError, SchedulerKind, ThreadSt,
    ThreadedKernel, DEFAULT_PRIORITY,
};
use spin::Mutex as SpinMutex;
use std::sync::Arc;

use crate::run;

pub fn ping(scheduler: SchedulerKind) {
    let (events, _) = run(scheduler, |tk| selftest::ping_test(tk));
    for event in events.iter() {
        log::debug!("{event}");
    }

    // No timer interrupt happens this early, so the threads strictly
    // alternate
    let expected: Vec<_> = (0..PING_ITERATIONS)
        .flat_map(|iteration| {
            [0, 1]
                .into_iter()
                .map(move |thread| PingEvent { thread, iteration })
        })
        .collect();
    assert_eq!(events, expected);
}

pub fn join_finished(scheduler: SchedulerKind) {
    let (ran, _) = run(scheduler, |tk| {
        let ran = Arc::new(SpinMutex::new(0));
        let thread = {
            let ran = Arc::clone(&ran);
            KThread::define().fork(tk.kernel(), move || *ran.lock() += 1)
        };

        while thread.status() != ThreadSt::Finished {
            tk.kernel().yield_current();
        }

        // Neither of these blocks
        thread.join();
        thread.join();

        let ran = *ran.lock();
        ran
    });
    assert_eq!(ran, 1);
}

pub fn statuses(scheduler: SchedulerKind) {
    run(scheduler, |tk| {
        let kernel = tk.kernel();

        let main = KThread::current(kernel);
        assert_eq!(main.name(), "main");
        assert_eq!(main.status(), ThreadSt::Running);
        assert_eq!(main.priority(), DEFAULT_PRIORITY);

        let idle = kernel.idle_thread().map(|id| KThread::from_id(kernel, id));
        assert_eq!(
            idle.as_ref().map(|idle| idle.status()),
            Some(ThreadSt::Ready)
        );

        let observed = Arc::new(SpinMutex::new(None));
        let thread = {
            let (worker_kernel, observed) = (kernel.clone(), Arc::clone(&observed));
            KThread::define()
                .name("worker")
                .priority(3)
                .fork(kernel, move || {
                    let me = KThread::current(&worker_kernel);
                    *observed.lock() = Some((me.name(), me.status()));
                })
        };

        assert_eq!(thread.name(), "worker");
        assert_eq!(thread.priority(), 3);
        assert_eq!(thread.status(), ThreadSt::Ready);
        assert_ne!(thread, main);

        thread.join();
        assert_eq!(thread.status(), ThreadSt::Finished);
        assert_eq!(
            *observed.lock(),
            Some(("worker".to_owned(), ThreadSt::Running))
        );

        let unnamed = KThread::define().fork(kernel, || {});
        assert_eq!(unnamed.name(), "(unnamed thread)");
        unnamed.join();
    });
}

/// Threads run in priority order under the priority scheduler and in fork
/// order under the round-robin scheduler.
pub fn priority_order(scheduler: SchedulerKind) {
    let (order, _) = run(scheduler, |tk| {
        let order = Arc::new(SpinMutex::new(Vec::new()));

        let threads: Vec<_> = [("low", 2), ("high", 6), ("mid", 4), ("demoted", 7)]
            .into_iter()
            .map(|(name, priority)| {
                let order = Arc::clone(&order);
                KThread::define()
                    .name(name)
                    .priority(priority)
                    .fork(tk.kernel(), move || order.lock().push(name))
            })
            .collect();

        threads[3].set_priority(1);

        for thread in threads {
            thread.join();
        }

        let order = order.lock().clone();
        order
    });

    match scheduler {
        SchedulerKind::RoundRobin => assert_eq!(order, ["low", "high", "mid", "demoted"]),
        SchedulerKind::Priority => assert_eq!(order, ["high", "mid", "low", "demoted"]),
    }
}

pub fn stats(scheduler: SchedulerKind) {
    let (_, stats) = run(scheduler, |tk| {
        selftest::ping_test(tk);
        tk.alarm().wait_until(2_000);
    });
    log::info!("{stats}");
    assert!(stats.total_ticks >= 2_000);
    assert!(stats.timer_interrupts >= 4);
    assert!(stats.context_switches >= 2 * PING_ITERATIONS as u64);
}

/// The machine halts as soon as `main` returns, whether or not other threads
/// are done.
pub fn main_returns_early(scheduler: SchedulerKind) {
    let (output, _) = run(scheduler, |tk| {
        let sleeper_tk = Arc::clone(tk);
        KThread::define().fork(tk.kernel(), move || {
            sleeper_tk.alarm().wait_until(1_000_000);
            unreachable!();
        });
        tk.kernel().yield_current();
        42
    });
    assert_eq!(output, 42);
}

pub fn terminate(scheduler: SchedulerKind) {
    let result = ThreadedKernel::run(crate::config(scheduler), |tk| {
        let terminator_tk = Arc::clone(tk);
        KThread::define()
            .fork(tk.kernel(), move || {
                terminator_tk.terminate();
            })
            .join();
    });
    assert!(
        matches!(result, Err(KernelError::Terminated)),
        "{result:?}"
    );
}

pub fn tick_limit(scheduler: SchedulerKind) {
    const LIMIT: u64 = 100_000;
    let config = KernelConfig {
        max_ticks: Some(LIMIT),
        ..crate::config(scheduler)
    };

    let result = ThreadedKernel::run(config, |tk| tk.alarm().wait_until(i64::MAX));
    assert!(
        matches!(
            result,
            Err(KernelError::Halt(HaltError::TickLimitExceeded { limit: LIMIT }))
        ),
        "{result:?}"
    );
}

pub fn invalid_config(scheduler: SchedulerKind) {
    let config = KernelConfig {
        timer_ticks: 0,
        ..crate::config(scheduler)
    };

    let result = ThreadedKernel::run(config, |_| ());
    assert!(
        matches!(
            result,
            Err(KernelError::Config(ConfigError::ZeroTimerTicks))
        ),
        "{result:?}"
    );
}

pub fn join_self(scheduler: SchedulerKind) {
    run(scheduler, |tk| KThread::current(tk.kernel()).join());
}

pub fn forward_panic(scheduler: SchedulerKind) {
    run(scheduler, |tk| {
        KThread::define()
            .name("doomed")
            .fork(tk.kernel(), || panic!("boom"))
            .join();
    });
}
