//! User-mode scheduling of host threads.
//!
//! A [`ThreadGroup`] owns a set of host threads (*workers*) and makes sure that
//! at most one of them makes progress at any point of time. The currently
//! running worker hands the processor over to another worker by calling
//! [`ThreadGroup::switch_to`], which blocks the caller until some other worker
//! switches back to it.
//!
//! The group does not make any scheduling decision on its own. Deciding which
//! worker runs next is entirely up to the caller (the kernel).
//!
//! # Shutdown
//!
//! [`ThreadGroup::shutdown`] tears down the group. Every worker that is
//! waiting to be scheduled (or that tries to wait after this point) unwinds its
//! stack and exits. The unwinding does not invoke the panic hook, and the
//! payload is swallowed by the worker's entry point.
//!
//! A panic in a worker initiates a shutdown. The first panic payload is
//! forwarded to the thread calling [`ThreadGroup::join`].
use slab::Slab;
use spin::Mutex as SpinMutex;
use std::{
    any::Any,
    fmt, panic,
    sync::Arc,
    thread::{self, JoinHandle},
};


/// Identifies a worker thread in a [`ThreadGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(usize);

/// The unwinding payload used to discard the stack of a worker on shutdown.
struct Shutdown;

/// A set of host threads sharing a single logical processor.
#[derive(Clone)]
pub struct ThreadGroup {
    inner: Arc<Inner>,
}

struct Inner {
    state: SpinMutex<State>,
}

struct State {
    workers: Slab<Worker>,
    /// The worker currently owning the processor.
    running: Option<WorkerId>,
    shut_down: bool,
    /// The first panic payload raised by a worker.
    panic: Option<Box<dyn Any + Send>>,
    /// The host thread blocked in [`ThreadGroup::join`].
    joiner: Option<thread::Thread>,
}

struct Worker {
    thread: thread::Thread,
    join_handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.state.try_lock() {
            Some(state) => f
                .debug_struct("ThreadGroup")
                .field("num_workers", &state.workers.len())
                .field("running", &state.running)
                .field("shut_down", &state.shut_down)
                .finish(),
            None => f.write_str("ThreadGroup(< locked >)"),
        }
    }
}

impl Default for ThreadGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: SpinMutex::new(State {
                    workers: Slab::new(),
                    running: None,
                    shut_down: false,
                    panic: None,
                    joiner: None,
                }),
            }),
        }
    }

    /// Create a worker thread. The worker doesn't start running `f` until it's
    /// scheduled by [`Self::start`] or [`Self::switch_to`].
    pub fn spawn(&self, f: impl FnOnce(WorkerId) + Send + 'static) -> WorkerId {
        let mut state = self.inner.state.lock();
        let entry = state.workers.vacant_entry();
        let worker_id = WorkerId(entry.key());

        let group = self.clone();
        let join_handle = thread::spawn(move || group.worker_main(worker_id, f));

        log::trace!("spawned {worker_id:?}");

        entry.insert(Worker {
            thread: join_handle.thread().clone(),
            join_handle: Some(join_handle),
        });

        worker_id
    }

    fn worker_main(&self, worker_id: WorkerId, f: impl FnOnce(WorkerId)) {
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.wait_until_scheduled(worker_id);
            f(worker_id);
        }));

        match result {
            Ok(()) => {
                let mut state = self.inner.state.lock();
                if state.running == Some(worker_id) && !state.shut_down {
                    // Nobody was given the processor. Nothing can run anymore.
                    log::warn!("{worker_id:?} exited without handing over the processor");
                    drop(state);
                    self.shutdown();
                }
            }
            Err(payload) if payload.is::<Shutdown>() => {
                log::trace!("{worker_id:?} was unwound by shutdown");
            }
            Err(payload) => {
                log::debug!("{worker_id:?} panicked; shutting down the thread group");
                {
                    let mut state = self.inner.state.lock();
                    if state.panic.is_none() {
                        state.panic = Some(payload);
                    }
                }
                self.shutdown();
            }
        }
    }

    /// Block the calling host thread until `worker_id` is chosen to run.
    fn wait_until_scheduled(&self, worker_id: WorkerId) {
        loop {
            {
                let state = self.inner.state.lock();
                if state.shut_down {
                    drop(state);
                    abandon_current();
                }
                if state.running == Some(worker_id) {
                    return;
                }
            }
            thread::park();
        }
    }

    /// Give the processor to `worker_id`. Must be called from a thread outside
    /// the group when no worker is running.
    pub fn start(&self, worker_id: WorkerId) {
        let mut state = self.inner.state.lock();
        assert!(state.running.is_none(), "a worker is already running");
        log::trace!("starting {worker_id:?}");
        state.running = Some(worker_id);
        state.workers[worker_id.0].thread.unpark();
    }

    /// Hand the processor over from `from` (the calling worker) to `to`.
    /// Returns when `from` is scheduled again.
    ///
    /// If the group has been shut down, the calling worker is unwound instead.
    pub fn switch_to(&self, from: WorkerId, to: WorkerId) {
        {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                drop(state);
                abandon_current();
            }
            debug_assert_eq!(state.running, Some(from));
            if from == to {
                return;
            }
            log::trace!("switch {from:?} -> {to:?}");
            state.running = Some(to);
            state.workers[to.0].thread.unpark();
        }

        self.wait_until_scheduled(from);
    }

    /// Hand the processor over from `from` (the calling worker) to `to`
    /// without waiting to be scheduled again. The caller is expected to
    /// return from its entry point right after this.
    pub fn exit_and_switch(&self, from: WorkerId, to: WorkerId) {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return;
        }
        debug_assert_eq!(state.running, Some(from));
        log::trace!("exit {from:?} -> {to:?}");
        state.running = Some(to);
        if from != to {
            state.workers[to.0].thread.unpark();
        }
    }

    /// Initiate shutdown. Workers waiting for the processor will be unwound.
    /// Does nothing if the group is already shutting down.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return;
        }
        log::debug!("shutting down the thread group");
        state.shut_down = true;
        state.running = None;
        for (_, worker) in state.workers.iter() {
            worker.thread.unpark();
        }
        if let Some(joiner) = &state.joiner {
            joiner.unpark();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// Wait until the group shuts down and every worker exits. Must be called
    /// from a thread outside the group.
    ///
    /// Returns the payload of the first panic raised by a worker, if any.
    pub fn join(&self) -> thread::Result<()> {
        self.inner.state.lock().joiner = Some(thread::current());

        loop {
            if self.inner.state.lock().shut_down {
                break;
            }
            thread::park();
        }

        let join_handles: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.joiner = None;
            state
                .workers
                .iter_mut()
                .filter_map(|(_, worker)| worker.join_handle.take())
                .collect()
        };

        log::trace!("waiting for {} worker(s) to exit", join_handles.len());
        for join_handle in join_handles {
            // Panics are caught by `worker_main`, so this can't fail
            let _ = join_handle.join();
        }

        match self.inner.state.lock().panic.take() {
            Some(payload) => Err(payload),
            None => Ok(()),
        }
    }
}

/// Unwind the calling worker's stack. Used when the group is shut down while
/// the worker still has frames on its stack.
pub fn abandon_current() -> ! {
    panic::resume_unwind(Box::new(Shutdown));
}
