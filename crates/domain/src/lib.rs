pub mod calendar;
pub mod job;
pub mod repositories;
pub mod value_objects;
pub mod worker;

pub use calendar::*;
pub use job::*;
pub use repositories::*;
pub use scheduler_errors::{SchedulerError, SchedulerResult};
pub use value_objects::*;
pub use worker::*;
