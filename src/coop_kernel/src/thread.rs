//! Threads
//!
//! Every kernel thread runs on its own host worker thread provided by the
//! machine. The machine only lets one of them run at a time, and which one
//! runs is decided here.
//!
//! # Thread states
//!
//! ```text
//!        fork          dispatch          sleep_current
//!  New ───────▶ Ready ─────────▶ Running ─────────────▶ Blocked
//!                 ▲                 │  │                   │
//!                 └── yield_current ┘  │ finish            │
//!                 ▲                    ▼                   │
//!                 │                 Finished               │
//!                 └─────────────────── ready ──────────────┘
//! ```
//!
//! The scheduling state is only touched with interrupts disabled.
use coop_machine::{Machine, Stats, WorkerId};
use slab::Slab;
use std::{fmt, sync::Arc};

use crate::{
    klock::{IntCell, InterruptGuard},
    PortInterrupts, PortThreading, PortTimer, TimerHandler,
};

pub mod readyqueue;
pub use self::readyqueue::{PriorityQueue, RoundRobinQueue, SchedulerKind, ThreadQueue};

/// Thread priority. Larger values run first under [`SchedulerKind::Priority`].
pub type Priority = u8;

pub const MIN_PRIORITY: Priority = 0;
pub const MAX_PRIORITY: Priority = 7;
pub const DEFAULT_PRIORITY: Priority = 1;

/// A non-owning handle to a thread in a [`Kernel`]'s thread table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(usize);

impl ThreadId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSt {
    /// The thread has been created but is not ready yet.
    New,
    Ready,
    Running,
    /// The thread is waiting for someone to call [`Kernel::ready`] on it.
    Blocked,
    /// The thread has returned from its entry point.
    Finished,
}

#[derive(Debug)]
struct ThreadCb {
    name: String,
    priority: Priority,
    st: ThreadSt,
    worker: Option<WorkerId>,
    /// The thread waiting in [`Kernel::join`] for this one.
    joiner: Option<ThreadId>,
}

#[derive(Debug)]
struct ThreadState {
    /// Entries are never removed, so `ThreadId`s remain valid.
    threads: Slab<ThreadCb>,
    current: ThreadId,
    /// Runs when the ready queue is empty. Never enters the ready queue.
    idle: Option<ThreadId>,
    ready_queue: Box<dyn ThreadQueue>,
}

impl ThreadState {
    fn cb(&mut self, thread: ThreadId) -> &mut ThreadCb {
        match self.threads.get_mut(thread.0) {
            Some(cb) => cb,
            None => panic!("{thread:?} does not exist"),
        }
    }

    fn worker(&self, thread: ThreadId) -> WorkerId {
        match self.threads.get(thread.0).and_then(|cb| cb.worker) {
            Some(worker) => worker,
            None => panic!("{thread:?} has no host thread"),
        }
    }
}

/// The thread runtime of a cooperative kernel, running on a [`Machine`].
///
/// `Kernel` is a cheap handle. Cloning it doesn't create a new kernel.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

struct KernelInner {
    machine: Machine,
    state: IntCell<ThreadState>,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("machine", &self.inner.machine)
            .field("state", &self.inner.state)
            .finish()
    }
}

impl Kernel {
    /// Construct a kernel on `machine`. The calling context becomes the
    /// `main` thread, which is considered to be running. Its body is supplied
    /// later by [`Self::boot_main`].
    ///
    /// Interrupts must be disabled.
    pub fn new(machine: Machine, scheduler: SchedulerKind) -> Self {
        assert!(
            machine.interrupt().is_disabled(),
            "interrupts must be disabled during boot"
        );

        let mut threads = Slab::new();
        let main = ThreadId(threads.insert(ThreadCb {
            name: "main".to_owned(),
            priority: DEFAULT_PRIORITY,
            st: ThreadSt::Running,
            worker: None,
            joiner: None,
        }));

        log::debug!("creating a kernel with the {scheduler} scheduler");

        Self {
            inner: Arc::new(KernelInner {
                machine,
                state: IntCell::new(ThreadState {
                    threads,
                    current: main,
                    idle: None,
                    ready_queue: scheduler.new_ready_queue(),
                }),
            }),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.inner.machine
    }

    pub fn stats(&self) -> Stats {
        self.inner.machine.stats()
    }

    /// Give the `main` thread a host thread that will run `body`. Returns the
    /// worker to hand to [`Machine::run`].
    pub(crate) fn boot_main(&self, body: impl FnOnce() + Send + 'static) -> WorkerId {
        let worker = self.machine().ums().spawn(move |_| body());

        let _guard = InterruptGuard::new(self);
        let mut st = self.inner.state.borrow_mut(self);
        let main = st.current;
        st.cb(main).worker = Some(worker);
        worker
    }

    /// Create the idle thread, which yields forever. It runs whenever no other
    /// thread is ready, letting the clock advance.
    pub(crate) fn create_idle_thread(&self) -> ThreadId {
        let _guard = InterruptGuard::new(self);

        let kernel = self.clone();
        let idle = self.create_thread("idle".to_owned(), MIN_PRIORITY, move || loop {
            kernel.yield_current();
        });
        self.inner.state.borrow_mut(self).idle = Some(idle);
        self.ready(idle);
        idle
    }

    fn create_thread(
        &self,
        name: String,
        priority: Priority,
        body: impl FnOnce() + Send + 'static,
    ) -> ThreadId {
        let id = ThreadId(self.inner.state.borrow_mut(self).threads.insert(ThreadCb {
            name,
            priority,
            st: ThreadSt::New,
            worker: None,
            joiner: None,
        }));

        let kernel = self.clone();
        let worker = self
            .machine()
            .ums()
            .spawn(move |_| kernel.thread_main(body));
        self.inner.state.borrow_mut(self).cb(id).worker = Some(worker);

        log::trace!("created {id:?}");
        id
    }

    /// The entry point of every forked thread.
    fn thread_main(&self, body: impl FnOnce()) {
        // The thread that switched to us had interrupts disabled
        self.machine().interrupt().enable();
        body();
        self.finish_current();
    }

    /// Terminate the current thread. Wakes up the joiner, if any.
    fn finish_current(&self) {
        self.machine().interrupt().disable();

        let joiner = {
            let mut st = self.inner.state.borrow_mut(self);
            let current = st.current;
            log::trace!("{current:?} finished");
            let cb = st.cb(current);
            cb.st = ThreadSt::Finished;
            cb.joiner.take()
        };

        if let Some(joiner) = joiner {
            self.ready(joiner);
        }

        let (from, to) = self.choose_next_thread();
        self.machine().exit_and_switch(from, to);
    }

    /// Dispatch the next thread from the ready queue, or the idle thread if
    /// the queue is empty. The current thread's state must have been updated
    /// already. Returns the host threads to switch from and to.
    fn choose_next_thread(&self) -> (WorkerId, WorkerId) {
        let mut guard = self.inner.state.borrow_mut(self);
        let st = &mut *guard;

        let next = match st.ready_queue.pop_front().or(st.idle) {
            Some(next) => next,
            None => panic!("no thread is ready to run"),
        };

        let prev = std::mem::replace(&mut st.current, next);
        let cb = st.cb(next);
        debug_assert_eq!(cb.st, ThreadSt::Ready);
        cb.st = ThreadSt::Running;

        if prev != next {
            log::trace!("switching from {prev:?} to {next:?}");
        }

        (st.worker(prev), st.worker(next))
    }

    /// Run the next thread. Returns when the current thread is dispatched
    /// again.
    fn run_next_thread(&self) {
        let (from, to) = self.choose_next_thread();
        self.machine().context_switch(from, to);
    }

    /// Get the currently running thread.
    pub fn current_thread(&self) -> ThreadId {
        self.inner.state.read_with(|st| st.current)
    }

    /// Block the current thread and run another one. Returns after another
    /// thread calls [`Self::ready`] on the current thread and it's dispatched.
    ///
    /// # Panics
    ///
    /// Panics if interrupts are enabled.
    pub fn sleep_current(&self) {
        assert!(
            self.are_interrupts_disabled(),
            "sleep_current called with interrupts enabled"
        );

        {
            let mut st = self.inner.state.borrow_mut(self);
            let current = st.current;
            let cb = st.cb(current);
            if cb.st != ThreadSt::Finished {
                cb.st = ThreadSt::Blocked;
            }
            log::trace!("{current:?} is going to sleep");
        }

        self.run_next_thread();
    }

    /// Make `thread` eligible for running.
    ///
    /// # Panics
    ///
    /// Panics if interrupts are enabled or `thread` is already ready.
    pub fn ready(&self, thread: ThreadId) {
        let mut guard = self.inner.state.borrow_mut(self);
        let st = &mut *guard;

        let cb = st.cb(thread);
        assert_ne!(cb.st, ThreadSt::Ready, "{thread:?} is already ready");
        cb.st = ThreadSt::Ready;
        let priority = cb.priority;

        log::trace!("readying {thread:?}");
        if st.idle != Some(thread) {
            st.ready_queue.push_back(thread, priority);
        }
    }

    /// Relinquish the processor if any other thread is ready to run. The
    /// current thread remains ready.
    pub fn yield_current(&self) {
        let _guard = InterruptGuard::new(self);

        let current = self.current_thread();
        self.ready(current);
        self.run_next_thread();
    }

    /// Wait for `thread` to finish. Returns immediately if it already has.
    ///
    /// # Panics
    ///
    /// Panics if `thread` is the current thread or is already being joined.
    pub fn join(&self, thread: ThreadId) {
        let current = self.current_thread();
        assert_ne!(thread, current, "a thread cannot join itself");

        let _guard = InterruptGuard::new(self);

        let must_wait = {
            let mut st = self.inner.state.borrow_mut(self);
            let cb = st.cb(thread);
            if cb.st == ThreadSt::Finished {
                false
            } else {
                assert!(
                    cb.joiner.is_none(),
                    "{thread:?} is already being joined by {:?}",
                    cb.joiner
                );
                cb.joiner = Some(current);
                true
            }
        };

        if must_wait {
            self.sleep_current();
        }
    }

    /// Get the state of `thread`.
    pub fn thread_status(&self, thread: ThreadId) -> ThreadSt {
        self.inner.state.read_with(|st| st.threads[thread.0].st)
    }

    pub fn thread_name(&self, thread: ThreadId) -> String {
        self.inner
            .state
            .read_with(|st| st.threads[thread.0].name.clone())
    }

    pub fn thread_priority(&self, thread: ThreadId) -> Priority {
        self.inner.state.read_with(|st| st.threads[thread.0].priority)
    }

    /// Change the priority of `thread`. A ready thread is moved to the back of
    /// its new priority level.
    ///
    /// # Panics
    ///
    /// Panics if `priority` is greater than [`MAX_PRIORITY`].
    pub fn set_thread_priority(&self, thread: ThreadId, priority: Priority) {
        assert!(priority <= MAX_PRIORITY, "priority {priority} is out of range");

        let _guard = InterruptGuard::new(self);
        let mut guard = self.inner.state.borrow_mut(self);
        let st = &mut *guard;

        let cb = st.cb(thread);
        cb.priority = priority;
        if cb.st == ThreadSt::Ready && st.ready_queue.remove(thread) {
            st.ready_queue.push_back(thread, priority);
        }
    }

    /// Get the idle thread, if it has been created.
    pub fn idle_thread(&self) -> Option<ThreadId> {
        self.inner.state.read_with(|st| st.idle)
    }

    /// Get the number of threads in the ready queue.
    pub fn ready_count(&self) -> usize {
        self.inner.state.read_with(|st| st.ready_queue.len())
    }
}

impl PortThreading for Kernel {
    type ThreadId = ThreadId;

    fn current_thread(&self) -> ThreadId {
        Kernel::current_thread(self)
    }

    fn sleep_current(&self) {
        Kernel::sleep_current(self)
    }

    fn ready(&self, thread: ThreadId) {
        Kernel::ready(self, thread)
    }

    fn yield_current(&self) {
        Kernel::yield_current(self)
    }
}

impl PortInterrupts for Kernel {
    fn disable_interrupts(&self) -> bool {
        self.machine().interrupt().disable()
    }

    fn restore_interrupts(&self, enabled: bool) {
        self.machine().interrupt().restore(enabled)
    }

    fn are_interrupts_disabled(&self) -> bool {
        self.machine().interrupt().is_disabled()
    }
}

impl PortTimer for Kernel {
    fn time(&self) -> u64 {
        self.machine().timer().time()
    }

    fn set_timer_handler(&self, handler: TimerHandler) {
        self.machine().timer().set_interrupt_handler(handler)
    }
}

/// A handle to a kernel thread.
#[derive(Clone)]
pub struct KThread {
    kernel: Kernel,
    id: ThreadId,
}

impl fmt::Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("KThread").field(&self.id).finish()
    }
}

impl PartialEq for KThread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.kernel.inner, &other.kernel.inner) && self.id == other.id
    }
}

impl Eq for KThread {}

impl KThread {
    /// Start defining a new thread.
    pub fn define() -> ThreadBuilder {
        ThreadBuilder {
            name: None,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Get the currently running thread.
    pub fn current(kernel: &Kernel) -> Self {
        Self::from_id(kernel, kernel.current_thread())
    }

    pub fn from_id(kernel: &Kernel, id: ThreadId) -> Self {
        Self {
            kernel: kernel.clone(),
            id,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> String {
        self.kernel.thread_name(self.id)
    }

    pub fn status(&self) -> ThreadSt {
        self.kernel.thread_status(self.id)
    }

    pub fn priority(&self) -> Priority {
        self.kernel.thread_priority(self.id)
    }

    /// See [`Kernel::set_thread_priority`].
    pub fn set_priority(&self, priority: Priority) {
        self.kernel.set_thread_priority(self.id, priority)
    }

    /// See [`Kernel::join`].
    pub fn join(&self) {
        self.kernel.join(self.id)
    }
}

/// The builder type for [`KThread`]. Created by [`KThread::define`].
#[must_use = "call `fork` to create the thread"]
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    name: Option<String>,
    priority: Priority,
}

impl ThreadBuilder {
    /// Specify the thread's name. Only used for diagnostics.
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Specify the thread's initial priority. Defaults to
    /// [`DEFAULT_PRIORITY`].
    ///
    /// # Panics
    ///
    /// Panics if `priority` is greater than [`MAX_PRIORITY`].
    pub fn priority(self, priority: Priority) -> Self {
        assert!(priority <= MAX_PRIORITY, "priority {priority} is out of range");
        Self { priority, ..self }
    }

    /// Create the thread and make it ready. It starts running `body` when
    /// it's first dispatched and finishes when `body` returns.
    pub fn fork(self, kernel: &Kernel, body: impl FnOnce() + Send + 'static) -> KThread {
        let _guard = InterruptGuard::new(kernel);

        let name = self
            .name
            .unwrap_or_else(|| "(unnamed thread)".to_owned());
        log::trace!("forking '{name}'");

        let id = kernel.create_thread(name, self.priority, body);
        kernel.ready(id);

        KThread::from_id(kernel, id)
    }
}
