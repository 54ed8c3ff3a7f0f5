use crate::observability::logging::LogHandle;
use crate::observability::telemetry::ReactorTelemetry;
use crate::reactor::poll::{Multiplexer, ReactorError};
use crate::reactor::timer::Scheduler;
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

/// Callback invoked when a registered descriptor reports readiness.
pub trait IoHandler {
    fn on_ready(&self, fd: RawFd, mask: u8);
}

/// Hook invoked once at the end of every reactor iteration, after all timer
/// and I/O dispatch for that pass.
pub trait IterationHook {
    fn on_iteration_end(&self);
}

struct Registration {
    fd: RawFd,
    handler: Rc<dyn IoHandler>,
}

/// Single-threaded readiness/timer loop. `run()` is the process's entire
/// control flow and never returns under normal operation.
pub struct Reactor<M: Multiplexer> {
    mux: RefCell<M>,
    scheduler: Scheduler,
    registrations: RefCell<Vec<Registration>>,
    iteration_hook: RefCell<Option<Rc<dyn IterationHook>>>,
    telemetry: RefCell<ReactorTelemetry>,
    log: LogHandle,
    ready_buf: RefCell<Vec<(RawFd, u8)>>,
}

impl<M: Multiplexer> Reactor<M> {
    pub fn new(mux: M, scheduler: Scheduler, log: LogHandle) -> Self {
        Self {
            mux: RefCell::new(mux),
            scheduler,
            registrations: RefCell::new(Vec::new()),
            iteration_hook: RefCell::new(None),
            telemetry: RefCell::new(ReactorTelemetry::default()),
            log,
            ready_buf: RefCell::new(Vec::new()),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Registers a readiness handle. Ownership of the descriptor stays with
    /// the registering adapter; the reactor never closes it.
    pub fn register(
        &self,
        fd: RawFd,
        mask: u8,
        handler: Rc<dyn IoHandler>,
    ) -> Result<(), ReactorError> {
        self.mux.borrow_mut().register(fd, mask)?;
        self.registrations
            .borrow_mut()
            .push(Registration { fd, handler });
        Ok(())
    }

    pub fn deregister(&self, fd: RawFd) -> Result<(), ReactorError> {
        self.mux.borrow_mut().deregister(fd)?;
        self.registrations
            .borrow_mut()
            .retain(|registration| registration.fd != fd);
        Ok(())
    }

    /// Installs the process-wide end-of-iteration callback.
    pub fn set_iteration_hook(&self, hook: Rc<dyn IterationHook>) {
        *self.iteration_hook.borrow_mut() = Some(hook);
    }

    pub fn telemetry(&self) -> ReactorTelemetry {
        self.telemetry.borrow().clone()
    }

    /// Runs forever. A failed multiplexer wait is transient: the iteration
    /// is abandoned and the loop continues without backoff, so a spurious
    /// wake-up can never stop collection.
    pub fn run(&self) -> ! {
        loop {
            self.run_once();
        }
    }

    /// One reactor pass: wait, fire due timers (ascending deadline) before
    /// any I/O dispatch, dispatch readiness, then the iteration hook.
    pub fn run_once(&self) {
        self.telemetry.borrow_mut().iterations += 1;

        let peeked_deadline = self.scheduler.peek_deadline();
        let timeout_ms = peeked_deadline.map(|deadline| {
            let now = self.scheduler.now_ms();
            deadline.saturating_sub(now)
        });

        let mut ready = self.ready_buf.take();
        ready.clear();
        let wait = self.mux.borrow_mut().wait(timeout_ms, &mut ready);
        if let Err(err) = wait {
            *self.ready_buf.borrow_mut() = ready;
            self.telemetry.borrow_mut().transient_errors += 1;
            self.log.warn("reactor", &format!("wait failed: {err}"));
            return;
        }

        // No callback has run between the deadline peek and here, so the
        // peeked state is still authoritative for this pass.
        if peeked_deadline.is_some() {
            let now = self.scheduler.now_ms();
            for (token, handler) in self.scheduler.take_due(now) {
                self.telemetry.borrow_mut().timers_fired += 1;
                handler.on_timer(token);
            }
        }

        let dispatch: Vec<(Rc<dyn IoHandler>, RawFd, u8)> = {
            let registrations = self.registrations.borrow();
            ready
                .iter()
                .filter_map(|&(fd, mask)| {
                    registrations
                        .iter()
                        .find(|registration| registration.fd == fd)
                        .map(|registration| (Rc::clone(&registration.handler), fd, mask))
                })
                .collect()
        };
        *self.ready_buf.borrow_mut() = ready;
        for (handler, fd, mask) in dispatch {
            handler.on_ready(fd, mask);
        }

        let hook = self.iteration_hook.borrow().clone();
        if let Some(hook) = hook {
            hook.on_iteration_end();
        }
    }
}
