//! What each trace compilation cost and produced.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

use crate::current_time_ms;

/// One finished trace compilation
#[derive(Debug, Clone)]
pub struct CompilationEvent {
    /// Trace target name
    pub target: String,

    /// Wall-clock time from warmup expiry to installation
    pub duration: Duration,

    /// Time per phase (optimize, backend, ...)
    pub phases: Vec<(String, Duration)>,

    /// Instructions before the optimizer ran
    pub insts_before: usize,

    /// Instructions handed to the backend
    pub insts_after: usize,

    /// Size reported by the backend
    pub code_size: usize,

    /// Optimizer counters (loads folded, stores removed, ...)
    pub pass_counters: Vec<(String, u64)>,

    /// Milliseconds since the epoch when the event was created
    pub timestamp_ms: u64,
}

impl CompilationEvent {
    pub fn new(target: impl Into<String>, duration: Duration) -> Self {
        Self {
            target: target.into(),
            duration,
            phases: Vec::new(),
            insts_before: 0,
            insts_after: 0,
            code_size: 0,
            pass_counters: Vec::new(),
            timestamp_ms: current_time_ms(),
        }
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.pass_counters
            .iter()
            .find(|(counter, _)| counter == name)
            .map(|(_, value)| *value)
    }
}

/// Running totals for one target.
#[derive(Debug, Clone, Default)]
pub struct TargetCompileStats {
    pub target: String,

    /// Number of times compiled; more than one only after re-registration
    pub compilation_count: u32,

    /// Total compilation time (microseconds)
    pub total_compilation_time_us: u64,

    /// Last compilation timestamp
    pub last_compiled_ms: u64,

    pub last_code_size: usize,
}

impl TargetCompileStats {
    pub fn new(target: String) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn record_compilation(&mut self, duration_us: u64, code_size: usize) {
        self.compilation_count += 1;
        self.total_compilation_time_us += duration_us;
        self.last_compiled_ms = current_time_ms();
        self.last_code_size = code_size;
    }

    pub fn avg_compilation_time_us(&self) -> f64 {
        if self.compilation_count == 0 {
            0.0
        } else {
            self.total_compilation_time_us as f64 / f64::from(self.compilation_count)
        }
    }
}

/// Keeps per-target totals and a bounded history of compilation events.
pub struct CompilationProfiler {
    per_target: RwLock<HashMap<String, TargetCompileStats>>,

    events: RwLock<Vec<CompilationEvent>>,

    /// Oldest events are dropped past this many.
    capacity: usize,
}

impl Default for CompilationProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilationProfiler {
    pub fn new() -> Self {
        Self::with_history(1000)
    }

    pub fn with_history(capacity: usize) -> Self {
        Self {
            per_target: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record_compilation(&self, event: CompilationEvent) {
        let duration_us = event.duration.as_micros() as u64;

        let mut per_target = self.per_target.write();
        per_target
            .entry(event.target.clone())
            .or_insert_with(|| TargetCompileStats::new(event.target.clone()))
            .record_compilation(duration_us, event.code_size);
        drop(per_target);

        let mut history = self.events.write();
        if history.len() >= self.capacity {
            history.remove(0);
        }
        history.push(event);
    }

    pub fn target_stats(&self, target: &str) -> Option<TargetCompileStats> {
        self.per_target.read().get(target).cloned()
    }

    /// Events oldest first.
    pub fn history(&self) -> Vec<CompilationEvent> {
        self.events.read().clone()
    }

    pub fn last_event(&self, target: &str) -> Option<CompilationEvent> {
        self.events
            .read()
            .iter()
            .rev()
            .find(|event| event.target == target)
            .cloned()
    }

    pub fn total_compilation_time(&self) -> Duration {
        let total_us: u64 = self
            .per_target
            .read()
            .values()
            .map(|s| s.total_compilation_time_us)
            .sum();
        Duration::from_micros(total_us)
    }

    /// Code size of the latest compilation of every target.
    pub fn total_code_size(&self) -> usize {
        self.per_target
            .read()
            .values()
            .map(|s| s.last_code_size)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let profiler = CompilationProfiler::with_history(2);
        for name in ["a", "b", "c"] {
            let mut event = CompilationEvent::new(name, Duration::from_micros(10));
            event.code_size = 4;
            profiler.record_compilation(event);
        }
        let history = profiler.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].target, "b");
        assert_eq!(profiler.total_code_size(), 12);
        assert_eq!(profiler.total_compilation_time(), Duration::from_micros(30));
    }

    #[test]
    fn test_counters_and_lookup() {
        let profiler = CompilationProfiler::new();
        let mut event = CompilationEvent::new("fib", Duration::from_micros(5));
        event.pass_counters.push(("loads_folded".to_string(), 3));
        profiler.record_compilation(event);

        let last = profiler.last_event("fib").unwrap();
        assert_eq!(last.counter("loads_folded"), Some(3));
        assert_eq!(last.counter("missing"), None);
        assert_eq!(profiler.target_stats("fib").unwrap().compilation_count, 1);
    }
}
