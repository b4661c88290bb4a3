mod common;
mod media;
mod metrics;
mod reveal;
mod watermark;
