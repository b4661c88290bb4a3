pub mod job_events;

pub use job_events::consume_job_events;
