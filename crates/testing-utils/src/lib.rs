//! # Scheduler Testing Utils
//!
//! Shared testing utilities for the workday scheduler.
//! This crate provides entity builders and small async helpers
//! that can be used across all other crates in the workspace.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then build entities in your tests:
//!
//! ```rust
//! use scheduler_testing_utils::{JobBuilder, WorkerBuilder};
//!
//! let worker = WorkerBuilder::new().with_max_parallel(2).build();
//! let job = JobBuilder::new().with_queue("reports").build();
//! assert!(worker.can_accept_job(&job.queue, Some(&job.job_key)));
//! ```

pub mod builders;
pub mod helpers;

pub use builders::*;
pub use helpers::*;
