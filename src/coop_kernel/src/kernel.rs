//! Kernel bootstrap
use coop_machine::{ums, Machine, Stats};
use spin::Mutex as SpinMutex;
use std::{fmt, sync::Arc};

use crate::{Alarm, Condition2, Kernel, KernelConfig, KernelError, Lock};

/// A kernel with threads, timed sleep and synchronization primitives.
///
/// This is the context object through which kernel code reaches the single
/// [`Alarm`] instance.
pub struct ThreadedKernel {
    kernel: Kernel,
    alarm: Arc<Alarm<Kernel>>,
    config: KernelConfig,
}

impl fmt::Debug for ThreadedKernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadedKernel")
            .field("config", &self.config)
            .field("kernel", &self.kernel)
            .field("alarm", &self.alarm)
            .finish()
    }
}

impl ThreadedKernel {
    /// Boot a kernel and run `main` on its `main` thread.
    ///
    /// The machine halts as soon as `main` returns. Threads that haven't
    /// finished by then are discarded. Returns the value returned by `main`
    /// and the machine's statistics.
    ///
    /// If any kernel thread panics, the panic is propagated to the caller.
    pub fn run<R, F>(config: KernelConfig, main: F) -> Result<(R, Stats), KernelError>
    where
        R: Send + 'static,
        F: FnOnce(&Arc<Self>) -> R + Send + 'static,
    {
        config.validate()?;
        log::info!("booting ({config:?})");

        // Interrupts are disabled until `main` starts
        let kernel = Kernel::new(Machine::new(config.machine_config()), config.scheduler);
        kernel.create_idle_thread();
        let alarm = Alarm::new(kernel.clone());

        let this = Arc::new(Self {
            kernel: kernel.clone(),
            alarm,
            config,
        });

        let output = Arc::new(SpinMutex::new(None));

        let main_worker = {
            let output = Arc::clone(&output);
            kernel.boot_main(move || {
                this.kernel.machine().interrupt().enable();

                let result = main(&this);
                *output.lock() = Some(result);

                log::debug!("the main thread returned; halting the machine");
                this.kernel.machine().halt();
            })
        };

        let stats = kernel.machine().run(main_worker)?;
        log::info!("{stats}");

        let output = output.lock().take().ok_or(KernelError::Terminated)?;
        Ok((output, stats))
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn alarm(&self) -> &Arc<Alarm<Kernel>> {
        &self.alarm
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn new_lock(&self) -> Arc<Lock<Kernel>> {
        Arc::new(Lock::new(self.kernel.clone()))
    }

    pub fn new_condition(&self, lock: &Arc<Lock<Kernel>>) -> Condition2<Kernel> {
        Condition2::new(self.kernel.clone(), Arc::clone(lock))
    }

    /// Halt the machine immediately. [`Self::run`] returns
    /// [`KernelError::Terminated`].
    pub fn terminate(&self) -> ! {
        log::debug!("terminated by {:?}", self.kernel.current_thread());
        self.kernel.machine().halt();
        ums::abandon_current();
    }
}
