//! Logging setup and timing utilities

mod logging;
mod profiler;

pub use logging::{setup_logging, LogConfig};
pub use profiler::{Profiler, ProfilerGuard, SpanStats};
