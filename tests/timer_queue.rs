use std::cell::RefCell;
use std::rc::Rc;
use telwatch::{Clock, Scheduler, TimerHandler, TimerQueue, TimerToken};

struct RecordingHandler {
    label: &'static str,
    fired: Rc<RefCell<Vec<&'static str>>>,
}

impl RecordingHandler {
    fn new(label: &'static str, fired: Rc<RefCell<Vec<&'static str>>>) -> Rc<Self> {
        Rc::new(Self { label, fired })
    }
}

impl TimerHandler for RecordingHandler {
    fn on_timer(&self, _token: TimerToken) {
        self.fired.borrow_mut().push(self.label);
    }
}

struct ManualClock {
    now: std::cell::Cell<u64>,
}

impl ManualClock {
    fn new(now: u64) -> Rc<Self> {
        Rc::new(Self {
            now: std::cell::Cell::new(now),
        })
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

#[test]
fn timers_fire_in_deadline_order_with_insertion_order_ties() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut queue = TimerQueue::new();

    // Inserted out of order: t3, first t2, t1, second t2.
    queue.insert(30, None, RecordingHandler::new("t3", Rc::clone(&fired)));
    queue.insert(20, None, RecordingHandler::new("t2-first", Rc::clone(&fired)));
    queue.insert(10, None, RecordingHandler::new("t1", Rc::clone(&fired)));
    queue.insert(20, None, RecordingHandler::new("t2-second", Rc::clone(&fired)));

    for (token, handler) in queue.take_due(30) {
        handler.on_timer(token);
    }

    assert_eq!(*fired.borrow(), vec!["t1", "t2-first", "t2-second", "t3"]);
    assert!(queue.is_empty());
}

#[test]
fn due_timers_only_fire_up_to_now() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut queue = TimerQueue::new();
    queue.insert(10, None, RecordingHandler::new("early", Rc::clone(&fired)));
    queue.insert(50, None, RecordingHandler::new("late", Rc::clone(&fired)));

    for (token, handler) in queue.take_due(10) {
        handler.on_timer(token);
    }

    assert_eq!(*fired.borrow(), vec!["early"]);
    assert_eq!(queue.peek_deadline(), Some(50));
}

#[test]
fn cancelled_timer_never_fires() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut queue = TimerQueue::new();
    let keep = RecordingHandler::new("keep", Rc::clone(&fired));
    let drop_ = RecordingHandler::new("drop", Rc::clone(&fired));
    queue.insert(10, None, keep);
    let token = queue.insert(10, None, drop_);

    assert!(queue.cancel(token));
    assert!(!queue.cancel(token));

    for (token, handler) in queue.take_due(100) {
        handler.on_timer(token);
    }
    assert_eq!(*fired.borrow(), vec!["keep"]);
}

#[test]
fn repeating_timer_rearms_from_current_time() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut queue = TimerQueue::new();
    queue.insert(10, Some(25), RecordingHandler::new("tick", Rc::clone(&fired)));

    // Fired late, at t=40; the next deadline is 40 + 25, not 10 + 25.
    let due = queue.take_due(40);
    assert_eq!(due.len(), 1);
    assert_eq!(queue.peek_deadline(), Some(65));

    let due = queue.take_due(64);
    assert!(due.is_empty());
    let due = queue.take_due(65);
    assert_eq!(due.len(), 1);
}

#[test]
fn scheduler_places_deadlines_relative_to_its_clock() {
    let clock = ManualClock::new(1_000);
    let scheduler = Scheduler::new(clock);
    let fired = Rc::new(RefCell::new(Vec::new()));
    scheduler.schedule(250, None, RecordingHandler::new("a", Rc::clone(&fired)));

    assert_eq!(scheduler.pending(), 1);
    let due = scheduler.take_due(1_249);
    assert!(due.is_empty());
    let due = scheduler.take_due(1_250);
    assert_eq!(due.len(), 1);
    assert_eq!(scheduler.pending(), 0);
}
