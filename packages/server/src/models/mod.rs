pub mod media;
pub mod metrics;
pub mod reveal;
pub mod watermark;
