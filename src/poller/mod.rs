mod executor;
mod scheduler;
mod task;

pub use executor::{CycleOutcome, TaskRunner};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use task::{PollingTask, TaskState};
