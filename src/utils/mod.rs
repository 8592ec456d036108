//! Shared helpers

mod logger;
mod timer;

pub use logger::{init_logger, LogLevel};
pub use timer::{epoch_ms, format_duration_ms, Timer};
