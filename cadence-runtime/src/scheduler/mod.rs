mod builder;
mod clock;
mod handle;
mod scheduler;

pub use builder::{SchedulerBuilder, DEFAULT_TICK_INTERVAL};
pub use clock::{Clock, ManualClock, SystemClock};
pub use handle::{TaskHandle, TaskId};
pub use scheduler::{RunState, Scheduler, TaskFault};
