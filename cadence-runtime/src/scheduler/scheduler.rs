use super::clock::Clock;
use super::handle::{TaskHandle, TaskId};
use crate::error::{BoxError, TaskResult};
use crate::store::SkipList;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type OnceTask = Box<dyn FnOnce(&Scheduler) -> TaskResult>;
type RepeatTask = Box<dyn FnMut(&Scheduler) -> TaskResult>;
type StopCallback = Box<dyn FnOnce(&Scheduler)>;

/// Whether the run-loop is driving ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// Published when a recurring task fails and cancels itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFault {
    pub task: TaskId,
    pub message: String,
}

#[derive(Clone, Copy)]
enum Cadence {
    EveryTick,
    Interval(Duration),
}

enum Work {
    Once(OnceTask),
    Repeat { task: RepeatTask, cadence: Cadence },
}

struct ScheduledEntry {
    handle: TaskHandle,
    work: Work,
}

/// Raised by a tick that observed a stop request; caught by [`Scheduler::tick`].
struct StopSignal;

struct Shared {
    clock: Rc<dyn Clock>,
    tick_interval: Duration,
    state: Cell<RunState>,
    stop_requested: Cell<bool>,
    driver_active: Cell<bool>,
    next_id: Cell<u64>,
    ticks: Cell<u64>,
    immediate: RefCell<VecDeque<ScheduledEntry>>,
    deadlines: RefCell<SkipList<u64, ScheduledEntry>>,
    stop_callbacks: RefCell<Vec<StopCallback>>,
    fault_listeners: RefCell<Vec<mpsc::UnboundedSender<TaskFault>>>,
}

/// Single-threaded cooperative run-loop.
///
/// Each tick drains the immediate queue that existed when the tick began,
/// then every deadline entry that is due, in ascending deadline order with
/// ties broken by scheduling order. Clones are handles to the same loop.
///
/// Callbacks receive the scheduler so they can queue follow-up work without
/// holding a clone of it.
#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub(crate) fn from_parts(clock: Rc<dyn Clock>, tick_interval: Duration) -> Self {
        Self {
            shared: Rc::new(Shared {
                clock,
                tick_interval,
                state: Cell::new(RunState::Stopped),
                stop_requested: Cell::new(false),
                driver_active: Cell::new(false),
                next_id: Cell::new(1),
                ticks: Cell::new(0),
                immediate: RefCell::new(VecDeque::new()),
                deadlines: RefCell::new(SkipList::new()),
                stop_callbacks: RefCell::new(Vec::new()),
                fault_listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Scheduler on the wall clock with the default tick interval.
    pub fn new() -> Self {
        Self::with_clock(super::clock::SystemClock)
    }

    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self::from_parts(Rc::new(clock), super::builder::DEFAULT_TICK_INTERVAL)
    }

    pub fn now(&self) -> u64 {
        self.shared.clock.now_millis()
    }

    pub fn state(&self) -> RunState {
        self.shared.state.get()
    }

    pub fn tick_interval(&self) -> Duration {
        self.shared.tick_interval
    }

    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.get()
    }

    pub fn pending_immediate(&self) -> usize {
        self.shared.immediate.borrow().len()
    }

    /// Entries in the deadline store, including cancelled ones not yet
    /// reached.
    pub fn pending_deadlines(&self) -> usize {
        self.shared.deadlines.borrow().len()
    }

    fn next_handle(&self) -> TaskHandle {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);
        TaskHandle::new(TaskId(id))
    }

    /// Run `f` on a later tick than the current one.
    pub fn call_soon<F>(&self, f: F) -> TaskHandle
    where
        F: FnOnce(&Scheduler) -> TaskResult + 'static,
    {
        let handle = self.next_handle();
        self.push_immediate(ScheduledEntry {
            handle: handle.clone(),
            work: Work::Once(Box::new(f)),
        });
        handle
    }

    /// Run `f` once `delay` has elapsed.
    pub fn call_later<F>(&self, delay: Duration, f: F) -> TaskHandle
    where
        F: FnOnce(&Scheduler) -> TaskResult + 'static,
    {
        self.call_at(self.deadline_after(delay), f)
    }

    /// Run `f` once the clock reaches `timestamp` (milliseconds).
    pub fn call_at<F>(&self, timestamp: u64, f: F) -> TaskHandle
    where
        F: FnOnce(&Scheduler) -> TaskResult + 'static,
    {
        let handle = self.next_handle();
        self.insert_deadline(
            timestamp,
            ScheduledEntry {
                handle: handle.clone(),
                work: Work::Once(Box::new(f)),
            },
        );
        handle
    }

    /// Run `f` once per tick, starting with the next one, until cancelled.
    pub fn call_every<F>(&self, f: F) -> TaskHandle
    where
        F: FnMut(&Scheduler) -> TaskResult + 'static,
    {
        let handle = self.next_handle();
        self.push_immediate(ScheduledEntry {
            handle: handle.clone(),
            work: Work::Repeat {
                task: Box::new(f),
                cadence: Cadence::EveryTick,
            },
        });
        handle
    }

    /// Run `f` every `period`, measured from the end of the previous run,
    /// until cancelled.
    pub fn call_interval<F>(&self, period: Duration, f: F) -> TaskHandle
    where
        F: FnMut(&Scheduler) -> TaskResult + 'static,
    {
        let handle = self.next_handle();
        self.insert_deadline(
            self.deadline_after(period),
            ScheduledEntry {
                handle: handle.clone(),
                work: Work::Repeat {
                    task: Box::new(f),
                    cadence: Cadence::Interval(period),
                },
            },
        );
        handle
    }

    /// Subscribe to recurring-task faults.
    pub fn subscribe_faults(&self) -> mpsc::UnboundedReceiver<TaskFault> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.fault_listeners.borrow_mut().push(tx);
        rx
    }

    fn deadline_after(&self, delay: Duration) -> u64 {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.now().saturating_add(millis)
    }

    fn push_immediate(&self, entry: ScheduledEntry) {
        self.shared.immediate.borrow_mut().push_back(entry);
    }

    fn insert_deadline(&self, deadline: u64, entry: ScheduledEntry) {
        let rank = self.shared.deadlines.borrow_mut().insert(deadline, entry);
        debug!(deadline, rank, "deadline scheduled");
    }

    /// Start driving ticks on the current tokio `LocalSet`. Calling it again
    /// while running does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `LocalSet`, like `tokio::task::spawn_local`.
    pub fn run(&self) {
        if self.state() == RunState::Running {
            return;
        }
        self.shared.state.set(RunState::Running);
        info!("scheduler running");

        if !self.shared.driver_active.get() {
            self.shared.driver_active.set(true);
            let scheduler = self.clone();
            tokio::task::spawn_local(async move { scheduler.drive().await });
        }
    }

    async fn drive(self) {
        while self.state() == RunState::Running {
            self.tick();
            if self.state() != RunState::Running {
                break;
            }
            tokio::time::sleep(self.shared.tick_interval).await;
        }
        self.shared.driver_active.set(false);
    }

    /// Ask the loop to halt after the current tick and then call `callback`.
    /// When the loop is not running, `callback` runs right away.
    pub fn stop<F>(&self, callback: F)
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        if self.state() != RunState::Running {
            callback(self);
            return;
        }
        self.shared.stop_callbacks.borrow_mut().push(Box::new(callback));
        self.shared.stop_requested.set(true);
    }

    /// Perform one run-loop iteration.
    pub fn tick(&self) {
        if let Err(StopSignal) = self.run_tick() {
            self.halt();
        }
    }

    fn run_tick(&self) -> Result<(), StopSignal> {
        let tick = self.shared.ticks.get() + 1;
        self.shared.ticks.set(tick);

        let batch = std::mem::take(&mut *self.shared.immediate.borrow_mut());
        let now = self.now();
        debug!(tick, immediate = batch.len(), now, "tick");
        for entry in batch {
            self.invoke(entry);
        }

        // Work scheduled by these callbacks waits for the next tick.
        let due = self.take_due(self.now());
        for entry in due {
            self.invoke(entry);
        }

        if self.shared.stop_requested.get() {
            return Err(StopSignal);
        }
        Ok(())
    }

    fn take_due(&self, now: u64) -> Vec<ScheduledEntry> {
        let mut deadlines = self.shared.deadlines.borrow_mut();
        let mut due = Vec::new();
        while matches!(deadlines.first(), Some((deadline, _)) if *deadline <= now) {
            if let Some((_, entry)) = deadlines.pop_first() {
                due.push(entry);
            }
        }
        due
    }

    fn halt(&self) {
        self.shared.stop_requested.set(false);
        self.shared.state.set(RunState::Stopped);
        info!(ticks = self.tick_count(), "scheduler stopped");

        let callbacks = std::mem::take(&mut *self.shared.stop_callbacks.borrow_mut());
        for callback in callbacks {
            callback(self);
        }
    }

    fn invoke(&self, entry: ScheduledEntry) {
        let ScheduledEntry { handle, work } = entry;
        if handle.is_cancelled() {
            debug!(task = %handle.id(), "skipping cancelled task");
            return;
        }

        match work {
            Work::Once(task) => {
                if let Err(message) = guarded(|| task(self)) {
                    warn!(task = %handle.id(), error = %message, "task failed");
                }
            }
            Work::Repeat { mut task, cadence } => match guarded(|| task(self)) {
                Ok(()) => {
                    if handle.is_cancelled() {
                        return;
                    }
                    let entry = ScheduledEntry {
                        handle,
                        work: Work::Repeat { task, cadence },
                    };
                    match cadence {
                        Cadence::EveryTick => self.push_immediate(entry),
                        Cadence::Interval(period) => {
                            self.insert_deadline(self.deadline_after(period), entry)
                        }
                    }
                }
                Err(message) => {
                    handle.cancel();
                    warn!(task = %handle.id(), error = %message, "recurring task faulted and was cancelled");
                    self.publish_fault(TaskFault {
                        task: handle.id(),
                        message,
                    });
                }
            },
        }
    }

    fn publish_fault(&self, fault: TaskFault) {
        self.shared
            .fault_listeners
            .borrow_mut()
            .retain(|listener| listener.send(fault.clone()).is_ok());
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a callback, turning both returned errors and panics into a message.
fn guarded<F>(f: F) -> Result<(), String>
where
    F: FnOnce() -> TaskResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(describe(&error)),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn describe(error: &BoxError) -> String {
    error.to_string()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn record(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> impl FnOnce(&Scheduler) -> TaskResult {
        let log = log.clone();
        move |_| {
            log.borrow_mut().push(name);
            Ok(())
        }
    }

    #[test]
    fn deadlines_run_in_ascending_order() {
        let clock = ManualClock::new(0);
        let scheduler = Scheduler::with_clock(clock.clone());
        let log = recorder();

        scheduler.call_later(Duration::from_millis(300), record(&log, "A"));
        scheduler.call_later(Duration::from_millis(100), record(&log, "B"));
        scheduler.call_later(Duration::from_millis(200), record(&log, "C"));

        scheduler.tick();
        assert!(log.borrow().is_empty());

        clock.advance(Duration::from_millis(300));
        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["B", "C", "A"]);
        assert_eq!(scheduler.pending_deadlines(), 0);
    }

    #[test]
    fn equal_deadlines_keep_scheduling_order() {
        let clock = ManualClock::new(1_000);
        let scheduler = Scheduler::with_clock(clock.clone());
        let log = recorder();

        scheduler.call_at(1_050, record(&log, "first"));
        scheduler.call_later(Duration::from_millis(50), record(&log, "second"));
        scheduler.call_at(1_010, record(&log, "early"));

        clock.set(1_050);
        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["early", "first", "second"]);
    }

    #[test]
    fn cancelled_entries_are_skipped_lazily() {
        let clock = ManualClock::new(0);
        let scheduler = Scheduler::with_clock(clock.clone());
        let log = recorder();

        let handle = scheduler.call_later(Duration::from_millis(10), record(&log, "cancelled"));
        scheduler.call_later(Duration::from_millis(20), record(&log, "kept"));
        handle.cancel();
        assert_eq!(scheduler.pending_deadlines(), 2);

        clock.advance(Duration::from_millis(50));
        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["kept"]);
        assert_eq!(scheduler.pending_deadlines(), 0);
    }

    #[test]
    fn call_soon_never_runs_in_the_scheduling_tick() {
        let scheduler = Scheduler::with_clock(ManualClock::new(0));
        let log = recorder();

        let inner = log.clone();
        scheduler.call_soon(move |s| {
            inner.borrow_mut().push("outer");
            let a = inner.clone();
            s.call_soon(move |_| {
                a.borrow_mut().push("inner-1");
                Ok(())
            });
            let b = inner.clone();
            s.call_soon(move |_| {
                b.borrow_mut().push("inner-2");
                Ok(())
            });
            Ok(())
        });

        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["outer"]);
        assert_eq!(scheduler.pending_immediate(), 2);

        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["outer", "inner-1", "inner-2"]);
    }

    #[test]
    #[tracing_test::traced_test]
    fn a_failing_callback_does_not_block_the_rest_of_the_drain() {
        let scheduler = Scheduler::with_clock(ManualClock::new(0));
        let log = recorder();

        scheduler.call_soon(|_| Err("boom".into()));
        scheduler.call_soon(|_| panic!("kaboom"));
        scheduler.call_soon(record(&log, "after"));

        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["after"]);
        assert!(logs_contain("task failed"));
        assert!(logs_contain("panicked: kaboom"));
    }

    #[test]
    fn call_every_runs_once_per_tick_until_cancelled() {
        let scheduler = Scheduler::with_clock(ManualClock::new(0));
        let count = Rc::new(Cell::new(0));

        let counter = count.clone();
        let handle = scheduler.call_every(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(count.get(), 3);

        handle.cancel();
        scheduler.tick();
        scheduler.tick();
        assert_eq!(count.get(), 3);
        assert_eq!(scheduler.pending_immediate(), 0);
    }

    #[test]
    fn call_interval_reschedules_after_each_run() {
        let clock = ManualClock::new(0);
        let scheduler = Scheduler::with_clock(clock.clone());
        let runs = Rc::new(RefCell::new(Vec::new()));

        let seen = runs.clone();
        let handle = scheduler.call_interval(Duration::from_millis(100), move |s| {
            seen.borrow_mut().push(s.now());
            Ok(())
        });

        for _ in 0..5 {
            clock.advance(Duration::from_millis(50));
            scheduler.tick();
        }
        assert_eq!(*runs.borrow(), vec![100, 200]);

        handle.cancel();
        clock.advance(Duration::from_millis(500));
        scheduler.tick();
        assert_eq!(runs.borrow().len(), 2);
    }

    #[test]
    fn recurring_task_can_cancel_itself_from_inside() {
        let scheduler = Scheduler::with_clock(ManualClock::new(0));
        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<TaskHandle>>> = Rc::new(RefCell::new(None));

        let counter = count.clone();
        let own = slot.clone();
        let handle = scheduler.call_every(move |_| {
            counter.set(counter.get() + 1);
            if counter.get() == 2 {
                if let Some(handle) = own.borrow().as_ref() {
                    handle.cancel();
                }
            }
            Ok(())
        });
        *slot.borrow_mut() = Some(handle);

        for _ in 0..5 {
            scheduler.tick();
        }
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn faulting_recurring_task_cancels_and_reports() {
        let scheduler = Scheduler::with_clock(ManualClock::new(0));
        let mut faults = scheduler.subscribe_faults();
        let count = Rc::new(Cell::new(0));

        let counter = count.clone();
        let handle = scheduler.call_every(move |_| {
            counter.set(counter.get() + 1);
            if counter.get() == 2 {
                return Err("sync failed".into());
            }
            Ok(())
        });

        for _ in 0..4 {
            scheduler.tick();
        }
        assert_eq!(count.get(), 2);
        assert!(handle.is_cancelled());

        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.task, handle.id());
        assert_eq!(fault.message, "sync failed");
        assert!(faults.try_recv().is_err());
    }

    #[test]
    fn panicking_recurring_task_cancels_and_reports() {
        let scheduler = Scheduler::with_clock(ManualClock::new(0));
        let mut faults = scheduler.subscribe_faults();
        let log = recorder();

        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let handle = scheduler.call_every(move |_| {
            counter.set(counter.get() + 1);
            panic!("poll exploded");
        });
        let steady = log.clone();
        scheduler.call_every(move |_| {
            steady.borrow_mut().push("steady");
            Ok(())
        });

        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(runs.get(), 1);
        assert!(handle.is_cancelled());
        assert_eq!(*log.borrow(), vec!["steady", "steady", "steady"]);

        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.task, handle.id());
        assert_eq!(fault.message, "panicked: poll exploded");
        assert!(faults.try_recv().is_err());
    }

    #[test]
    fn zero_delay_work_scheduled_while_draining_waits_a_tick() {
        let clock = ManualClock::new(0);
        let scheduler = Scheduler::with_clock(clock);
        let log = recorder();

        let inner = log.clone();
        scheduler.call_later(Duration::ZERO, move |s| {
            inner.borrow_mut().push("first");
            let again = inner.clone();
            s.call_later(Duration::ZERO, move |_| {
                again.borrow_mut().push("second");
                Ok(())
            });
            Ok(())
        });

        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["first"]);
        scheduler.tick();
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn stop_when_idle_calls_back_immediately() {
        let scheduler = Scheduler::with_clock(ManualClock::new(0));
        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        scheduler.stop(move |_| flag.set(true));
        assert!(called.get());
        assert_eq!(scheduler.state(), RunState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drives_ticks_until_stopped() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = Scheduler::with_clock(ManualClock::new(0));
                let count = Rc::new(Cell::new(0u32));
                let stopped = Rc::new(Cell::new(false));

                let counter = count.clone();
                let done = stopped.clone();
                scheduler.call_every(move |s| {
                    counter.set(counter.get() + 1);
                    if counter.get() == 3 {
                        let done = done.clone();
                        s.stop(move |_| done.set(true));
                    }
                    Ok(())
                });

                scheduler.run();
                scheduler.run();
                assert_eq!(scheduler.state(), RunState::Running);

                tokio::time::sleep(Duration::from_secs(1)).await;
                assert!(stopped.get());
                assert_eq!(count.get(), 3);
                assert_eq!(scheduler.state(), RunState::Stopped);

                let ticks = scheduler.tick_count();
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(scheduler.tick_count(), ticks);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_outside_finishes_the_next_tick_first() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = Scheduler::with_clock(ManualClock::new(0));
                let log = recorder();

                scheduler.run();
                tokio::task::yield_now().await;
                let ticks_before = scheduler.tick_count();

                scheduler.call_soon(record(&log, "queued"));
                let after = log.clone();
                scheduler.stop(move |_| after.borrow_mut().push("stopped"));
                assert_eq!(scheduler.state(), RunState::Running);

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(*log.borrow(), vec!["queued", "stopped"]);
                assert_eq!(scheduler.tick_count(), ticks_before + 1);
                assert_eq!(scheduler.state(), RunState::Stopped);
            })
            .await;
    }
}
