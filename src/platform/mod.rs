//! Host integration: the scheduler every backend callback and event dispatch runs on.

pub mod runtime;

pub use runtime::{default_scheduler, spawn_detached, Task, TaskScheduler, TokioScheduler};
