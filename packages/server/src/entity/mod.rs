pub mod access_log;
pub mod completed_job;
pub mod dead_letter_message;
pub mod media_item;
pub mod watermark_job;
