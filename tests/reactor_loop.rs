use std::cell::{Cell, RefCell};
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use telwatch::{
    Clock, CollectorLogger, IoHandler, IterationHook, LogHandle, LogLevel, Multiplexer, Reactor,
    ReactorError, Scheduler, TimerHandler, TimerToken, READABLE,
};

struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    fn new(now: u64) -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(now),
        })
    }

    fn advance(&self, delta: u64) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// One scripted reactor pass: the readiness the multiplexer reports, or an
/// error, plus how far the clock jumps while "blocked".
enum Step {
    Ready(Vec<(RawFd, u8)>),
    Fail,
}

struct ScriptedMultiplexer {
    steps: RefCell<Vec<(Step, u64)>>,
    clock: Rc<ManualClock>,
    observed_timeouts: Rc<RefCell<Vec<Option<u64>>>>,
}

impl Multiplexer for ScriptedMultiplexer {
    fn register(&mut self, _fd: RawFd, _mask: u8) -> Result<(), ReactorError> {
        Ok(())
    }

    fn deregister(&mut self, _fd: RawFd) -> Result<(), ReactorError> {
        Ok(())
    }

    fn wait(
        &mut self,
        timeout_ms: Option<u64>,
        ready: &mut Vec<(RawFd, u8)>,
    ) -> Result<usize, ReactorError> {
        self.observed_timeouts.borrow_mut().push(timeout_ms);
        let (step, elapsed) = if self.steps.borrow().is_empty() {
            (Step::Ready(Vec::new()), timeout_ms.unwrap_or(0))
        } else {
            self.steps.borrow_mut().remove(0)
        };
        self.clock.advance(elapsed);
        match step {
            Step::Ready(pairs) => {
                let count = pairs.len();
                ready.extend(pairs);
                Ok(count)
            }
            Step::Fail => Err(ReactorError::Wait(io::Error::new(
                io::ErrorKind::Interrupted,
                "spurious wake-up",
            ))),
        }
    }
}

fn trace() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

struct TracingIo {
    entries: Rc<RefCell<Vec<String>>>,
}

impl IoHandler for TracingIo {
    fn on_ready(&self, fd: RawFd, _mask: u8) {
        self.entries.borrow_mut().push(format!("io:{fd}"));
    }
}

struct TracingTimer {
    label: &'static str,
    entries: Rc<RefCell<Vec<String>>>,
}

impl TimerHandler for TracingTimer {
    fn on_timer(&self, _token: TimerToken) {
        self.entries.borrow_mut().push(format!("timer:{}", self.label));
    }
}

struct TracingHook {
    entries: Rc<RefCell<Vec<String>>>,
}

impl IterationHook for TracingHook {
    fn on_iteration_end(&self) {
        self.entries.borrow_mut().push("hook".to_string());
    }
}

fn quiet_log() -> LogHandle {
    LogHandle::new(CollectorLogger::stderr(LogLevel::Error))
}

fn build(
    clock: &Rc<ManualClock>,
    steps: Vec<(Step, u64)>,
) -> (
    Reactor<ScriptedMultiplexer>,
    Rc<RefCell<Vec<Option<u64>>>>,
) {
    let observed = Rc::new(RefCell::new(Vec::new()));
    let mux = ScriptedMultiplexer {
        steps: RefCell::new(steps),
        clock: Rc::clone(clock),
        observed_timeouts: Rc::clone(&observed),
    };
    let scheduler = Scheduler::new(Rc::clone(clock) as Rc<dyn Clock>);
    (Reactor::new(mux, scheduler, quiet_log()), observed)
}

#[test]
fn due_timers_fire_before_io_from_the_same_pass() {
    let clock = ManualClock::new(0);
    // I/O arrives at the same instant the timer becomes due.
    let (reactor, _) = build(&clock, vec![(Step::Ready(vec![(7, READABLE)]), 50)]);
    let entries = trace();
    reactor
        .register(
            7,
            READABLE,
            Rc::new(TracingIo {
                entries: Rc::clone(&entries),
            }),
        )
        .unwrap();
    reactor.scheduler().schedule(
        50,
        None,
        Rc::new(TracingTimer {
            label: "due",
            entries: Rc::clone(&entries),
        }),
    );
    reactor.set_iteration_hook(Rc::new(TracingHook {
        entries: Rc::clone(&entries),
    }));

    reactor.run_once();

    assert_eq!(*entries.borrow(), vec!["timer:due", "io:7", "hook"]);
}

#[test]
fn wait_duration_tracks_the_nearest_deadline() {
    let clock = ManualClock::new(100);
    let (reactor, observed) = build(
        &clock,
        vec![
            (Step::Ready(Vec::new()), 40), // first pass, deadline in 40ms
            (Step::Ready(Vec::new()), 0),  // second pass, deadline already due
        ],
    );
    let entries = trace();
    reactor.scheduler().schedule(
        40,
        None,
        Rc::new(TracingTimer {
            label: "t",
            entries: Rc::clone(&entries),
        }),
    );

    reactor.run_once();
    // Timer queue drained, no further deadline: wait becomes infinite.
    reactor.run_once();

    let observed = observed.borrow();
    assert_eq!(observed[0], Some(40));
    assert_eq!(observed[1], None);
    assert_eq!(*entries.borrow(), vec!["timer:t"]);
}

#[test]
fn overdue_deadline_yields_zero_wait() {
    let clock = ManualClock::new(1_000);
    let (reactor, observed) = build(&clock, vec![(Step::Ready(Vec::new()), 0)]);
    let entries = trace();
    reactor.scheduler().schedule(
        0,
        None,
        Rc::new(TracingTimer {
            label: "now",
            entries: Rc::clone(&entries),
        }),
    );
    clock.advance(10); // deadline is now 10ms in the past

    reactor.run_once();

    assert_eq!(observed.borrow()[0], Some(0));
    assert_eq!(*entries.borrow(), vec!["timer:now"]);
}

#[test]
fn failed_wait_is_transient_and_skips_the_pass() {
    let clock = ManualClock::new(0);
    let (reactor, _) = build(
        &clock,
        vec![
            (Step::Fail, 0),
            (Step::Ready(Vec::new()), 100),
        ],
    );
    let entries = trace();
    reactor.scheduler().schedule(
        60,
        None,
        Rc::new(TracingTimer {
            label: "survivor",
            entries: Rc::clone(&entries),
        }),
    );
    reactor.set_iteration_hook(Rc::new(TracingHook {
        entries: Rc::clone(&entries),
    }));

    reactor.run_once(); // fails: no timers, no I/O, no hook
    assert!(entries.borrow().is_empty());
    assert_eq!(reactor.telemetry().transient_errors, 1);

    reactor.run_once(); // next pass proceeds normally
    assert_eq!(*entries.borrow(), vec!["timer:survivor", "hook"]);
    assert_eq!(reactor.telemetry().iterations, 2);
}

#[test]
fn repeating_timer_keeps_firing_across_passes() {
    let clock = ManualClock::new(0);
    let (reactor, _) = build(
        &clock,
        vec![
            (Step::Ready(Vec::new()), 20),
            (Step::Ready(Vec::new()), 20),
            (Step::Ready(Vec::new()), 20),
        ],
    );
    let entries = trace();
    reactor.scheduler().schedule(
        20,
        Some(20),
        Rc::new(TracingTimer {
            label: "tick",
            entries: Rc::clone(&entries),
        }),
    );

    reactor.run_once();
    reactor.run_once();
    reactor.run_once();

    assert_eq!(
        *entries.borrow(),
        vec!["timer:tick", "timer:tick", "timer:tick"]
    );
}
