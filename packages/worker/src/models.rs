pub mod boundary;
pub mod render;
pub mod runner;
pub mod source;
pub mod video;

pub use boundary::{ProcessBoundary, TaskBoundary};
pub use runner::{JobOutcome, JobRunner, spawn_local_runner};
