use crate::event::Event;
use crate::reactor::core::IterationHook;
use crate::reactor::TimeSource;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Process-wide event sequence counter. The bus stamps organic events from
/// it; the reconciliation engine draws synthetic-event sequences from the
/// same counter so both interleave in one global order. Zero is reserved to
/// mean "absent" and is skipped on wrap.
#[derive(Clone)]
pub struct SharedSequence {
    next: Rc<Cell<u32>>,
}

impl SharedSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Starts the counter at an arbitrary value (used to test wrap
    /// behavior). Zero is normalized to one.
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: Rc::new(Cell::new(if first == 0 { 1 } else { first })),
        }
    }

    pub fn next(&self) -> u32 {
        let value = self.next.get();
        let mut following = value.wrapping_add(1);
        if following == 0 {
            following = 1;
        }
        self.next.set(following);
        value
    }
}

impl Default for SharedSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer of domain events. `handle` must dispatch by category and
/// ignore categories it does not recognize; it must not block on external
/// I/O, since fan-out runs on the reactor thread.
pub trait Sink {
    fn name(&self) -> &str;
    fn handle(&self, event: &Event);

    /// Maintenance hook invoked at most once per reactor pass.
    fn on_iteration_end(&self) {}
}

/// Sequencing fan-out bus. Publishing stamps the event header and delivers
/// it to every registered sink synchronously, in registration order. There
/// is no queueing, no backpressure, and no retry at this layer; durability
/// is entirely the sinks' concern.
pub struct EventBus {
    sinks: RefCell<Vec<Rc<dyn Sink>>>,
    sequence: SharedSequence,
    time: Rc<dyn TimeSource>,
    published: Cell<u64>,
}

impl EventBus {
    pub fn new(sequence: SharedSequence, time: Rc<dyn TimeSource>) -> Self {
        Self {
            sinks: RefCell::new(Vec::new()),
            sequence,
            time,
            published: Cell::new(0),
        }
    }

    pub fn register(&self, sink: Rc<dyn Sink>) {
        self.sinks.borrow_mut().push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.borrow().len()
    }

    pub fn sequence(&self) -> SharedSequence {
        self.sequence.clone()
    }

    /// Number of events published so far.
    pub fn published(&self) -> u64 {
        self.published.get()
    }

    /// Stamps sequence (and timestamp, if unset) and fans the event out.
    /// Returns the stamped event so producers can inspect the header.
    pub fn publish(&self, mut event: Event) -> Event {
        event.sequence = self.sequence.next();
        if event.timestamp == 0 {
            event.timestamp = self.time.wall_seconds();
        }
        self.published.set(self.published.get() + 1);
        let sinks: Vec<Rc<dyn Sink>> = self.sinks.borrow().clone();
        for sink in sinks {
            sink.handle(&event);
        }
        event
    }

    /// Runs every sink's maintenance hook; installed as the reactor's
    /// end-of-iteration callback.
    pub fn run_maintenance(&self) {
        let sinks: Vec<Rc<dyn Sink>> = self.sinks.borrow().clone();
        for sink in sinks {
            sink.on_iteration_end();
        }
    }
}

impl IterationHook for EventBus {
    fn on_iteration_end(&self) {
        self.run_maintenance();
    }
}
