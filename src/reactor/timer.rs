use crate::reactor::clock::Clock;
use std::cell::RefCell;
use std::rc::Rc;

/// Handle identifying a pending timer, returned by [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// Callback invoked when a timer deadline is due. Implementors keep their
/// mutable state behind interior mutability; the whole process is single
/// threaded.
pub trait TimerHandler {
    fn on_timer(&self, token: TimerToken);
}

struct TimerEntry {
    token: TimerToken,
    deadline_ms: u64,
    interval_ms: Option<u64>,
    handler: Rc<dyn TimerHandler>,
}

/// Ordered collection of pending deadlines. Entries are kept ascending by
/// deadline; equal deadlines fire in insertion order. The expected entry
/// count is small (one or two per sink), so insertion is a linear scan.
pub struct TimerQueue {
    entries: Vec<TimerEntry>,
    next_token: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_token: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deadline of the next timer to fire, if any.
    pub fn peek_deadline(&self) -> Option<u64> {
        self.entries.first().map(|entry| entry.deadline_ms)
    }

    /// Inserts a timer at its deadline position. Ties go after existing
    /// entries with the same deadline: first inserted, first fired.
    pub fn insert(
        &mut self,
        deadline_ms: u64,
        interval_ms: Option<u64>,
        handler: Rc<dyn TimerHandler>,
    ) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.insert_entry(TimerEntry {
            token,
            deadline_ms,
            interval_ms,
            handler,
        });
        token
    }

    fn insert_entry(&mut self, entry: TimerEntry) {
        let pos = self
            .entries
            .iter()
            .position(|existing| existing.deadline_ms > entry.deadline_ms)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
    }

    /// Withdraws a pending timer. Returns false when the token is unknown
    /// (already fired or previously cancelled).
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        match self.entries.iter().position(|entry| entry.token == token) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Detaches every entry due at `now_ms`, re-arming repeating timers at
    /// `now + interval`. The detached handlers are returned in firing order
    /// so the caller can invoke them without holding a borrow of the queue.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<(TimerToken, Rc<dyn TimerHandler>)> {
        let mut due = Vec::new();
        while let Some(front) = self.entries.first() {
            if front.deadline_ms > now_ms {
                break;
            }
            let entry = self.entries.remove(0);
            due.push((entry.token, Rc::clone(&entry.handler)));
            if let Some(interval) = entry.interval_ms {
                // Re-armed from the current time, not the prior deadline, so
                // periodic timers drift under load. Preserved behavior.
                self.insert_entry(TimerEntry {
                    token: entry.token,
                    deadline_ms: now_ms + interval.max(1),
                    interval_ms: Some(interval),
                    handler: entry.handler,
                });
            }
        }
        due
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared scheduling handle handed to sinks and sources. Clones refer to the
/// same queue; the reactor drains it.
#[derive(Clone)]
pub struct Scheduler {
    queue: Rc<RefCell<TimerQueue>>,
    clock: Rc<dyn Clock>,
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            queue: Rc::new(RefCell::new(TimerQueue::new())),
            clock,
        }
    }

    /// Arms a timer `delay_ms` from now. A non-`None` interval re-arms the
    /// timer after every firing until it is cancelled.
    pub fn schedule(
        &self,
        delay_ms: u64,
        interval_ms: Option<u64>,
        handler: Rc<dyn TimerHandler>,
    ) -> TimerToken {
        let deadline = self.clock.now_ms() + delay_ms;
        self.queue
            .borrow_mut()
            .insert(deadline, interval_ms, handler)
    }

    pub fn cancel(&self, token: TimerToken) -> bool {
        self.queue.borrow_mut().cancel(token)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn peek_deadline(&self) -> Option<u64> {
        self.queue.borrow().peek_deadline()
    }

    /// Drains due entries; called by the reactor each pass.
    pub fn take_due(&self, now_ms: u64) -> Vec<(TimerToken, Rc<dyn TimerHandler>)> {
        self.queue.borrow_mut().take_due(now_ms)
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}
