//! Counters and compilation profiles for the tracing JIT

pub mod compilation_profiler;
pub mod stats;

pub use compilation_profiler::{CompilationEvent, CompilationProfiler, TargetCompileStats};
pub use stats::{JitStats, TargetCounters};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
