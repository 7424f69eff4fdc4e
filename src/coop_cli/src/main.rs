use clap::Parser;
use coop_kernel::{selftest, KernelConfig, SchedulerKind, ThreadedKernel};
use std::path::PathBuf;
use thiserror::Error;

mod selection;

use selection::SelfTest;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("coop_cli=info"))
        .init();

    if let Err(e) = main_inner() {
        log::error!("Command failed.\n{:?}", e);
        std::process::exit(1);
    }
}

#[derive(Error, Debug)]
enum MainError {
    #[error("Could not run the self-test '{0}'.")]
    RunTest(SelfTest, #[source] coop_kernel::KernelError),
    #[error("{0} self-test(s) failed.")]
    TestFail(usize),
}

/// Boots the cooperative kernel on a simulated machine and runs its
/// self-tests
#[derive(Parser, Debug)]
struct Opt {
    /// Read the kernel configuration from this TOML file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Override the scheduler (`round_robin` or `priority`)
    #[arg(short = 's', long = "scheduler")]
    scheduler: Option<SchedulerKind>,
    /// Override the timer interrupt period, in ticks
    #[arg(long = "timer-ticks")]
    timer_ticks: Option<u64>,
    /// Halt with an error when the clock goes past this many ticks
    #[arg(long = "max-ticks")]
    max_ticks: Option<u64>,
    /// The self-tests to run. Runs all of them if none are given.
    #[arg(value_enum)]
    tests: Vec<SelfTest>,
}

impl Opt {
    fn kernel_config(&self) -> anyhow::Result<KernelConfig> {
        let mut config = match &self.config {
            Some(path) => KernelConfig::load(path)?,
            None => KernelConfig::default(),
        };

        if let Some(scheduler) = self.scheduler {
            config.scheduler = scheduler;
        }
        if let Some(timer_ticks) = self.timer_ticks {
            config.timer_ticks = timer_ticks;
        }
        if self.max_ticks.is_some() {
            config.max_ticks = self.max_ticks;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main_inner() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let config = opt.kernel_config()?;
    log::debug!("config = {:?}", config);

    let tests = selection::expand(&opt.tests);
    log::info!(
        "Performing {} self-test(s) with the {} scheduler",
        tests.len(),
        config.scheduler
    );

    let mut failed_tests = Vec::new();

    for &test in tests.iter() {
        log::info!(" - {}", test);

        let (ok, stats) = ThreadedKernel::run(config.clone(), move |tk| run_self_test(tk, test))
            .map_err(|e| MainError::RunTest(test, e))?;
        println!("{stats}");

        if ok {
            log::info!("Self-test '{}' was successful", test);
        } else {
            log::error!("Self-test '{}' failed", test);
            failed_tests.push(test);
        }
    }

    log::info!(
        "Summary: {} success, {} fail",
        tests.len() - failed_tests.len(),
        failed_tests.len(),
    );

    if !failed_tests.is_empty() {
        log::error!("Failed self-tests:");
        for test in failed_tests.iter() {
            log::error!(" - {}", test);
        }
        return Err(MainError::TestFail(failed_tests.len()).into());
    }

    Ok(())
}

/// Run `test` on the current kernel thread, print its report, and return
/// whether it passed.
fn run_self_test(tk: &std::sync::Arc<ThreadedKernel>, test: SelfTest) -> bool {
    match test {
        SelfTest::Ping => {
            for event in selftest::ping_test(tk) {
                println!("{event}");
            }
            true
        }
        SelfTest::Alarm => {
            let mut ok = true;
            let reports = selftest::alarm_test(tk, &selftest::ALARM_DURATIONS)
                .into_iter()
                .chain([selftest::alarm_fork_test(tk)]);
            for report in reports {
                println!("{report}");
                ok &= report.is_ok();
            }
            ok
        }
        SelfTest::Condition => {
            let report = selftest::condition_test(tk);
            println!("{report}");
            report.is_ok()
        }
        SelfTest::All => unreachable!("`All` is expanded before running"),
    }
}
