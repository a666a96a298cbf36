use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Identifier assigned to every scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Cancellation token for scheduled work.
///
/// Cancellation is lazy: the entry stays queued and is skipped once it is
/// reached. Recurring tasks share one handle across all their runs.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    cancelled: Rc<Cell<bool>>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            cancelled: Rc::new(Cell::new(false)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}
