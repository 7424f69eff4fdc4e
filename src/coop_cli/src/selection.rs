//! Self-test selection
use clap::ValueEnum;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SelfTest {
    /// Two threads yielding to each other
    Ping,
    /// Timed sleeps on the main thread and a forked thread
    Alarm,
    /// Condition variable wake order and ping-pong
    Condition,
    /// Every self-test
    All,
}

impl SelfTest {
    const EACH: [Self; 3] = [Self::Ping, Self::Alarm, Self::Condition];
}

impl fmt::Display for SelfTest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Ping => "ping",
            Self::Alarm => "alarm",
            Self::Condition => "condition",
            Self::All => "all",
        })
    }
}

/// Replace [`SelfTest::All`] with every self-test and remove duplicates,
/// preserving order. An empty selection means everything.
pub fn expand(selected: &[SelfTest]) -> Vec<SelfTest> {
    let selected = if selected.is_empty() {
        &[SelfTest::All][..]
    } else {
        selected
    };

    let mut tests = Vec::new();
    for &test in selected {
        let each: &[SelfTest] = match test {
            SelfTest::All => &SelfTest::EACH,
            _ => std::slice::from_ref(&test),
        };
        for &test in each {
            if !tests.contains(&test) {
                tests.push(test);
            }
        }
    }
    tests
}
