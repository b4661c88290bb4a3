mod service;
mod stuck;

pub use service::DlqService;
pub use stuck::{detect_and_handle_stuck_jobs, run_stuck_job_detector};
