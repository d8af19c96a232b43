use std::time::Duration;

use crate::timer::Stopwatch;

/// Wall-clock time of the phases of one compilation, in the order they ran.
#[derive(Default)]
pub struct Profiler {
    phases: Vec<PhaseTiming>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` as the phase `name`. A phase that runs twice is recorded
    /// twice.
    pub fn record_phase<F, T>(&mut self, name: &'static str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let stopwatch = Stopwatch::start_new();
        let output = f();
        self.phases.push(PhaseTiming {
            name,
            duration: stopwatch.elapsed(),
        });
        output
    }

    pub fn phases(&self) -> &[PhaseTiming] {
        &self.phases
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|phase| phase.duration).sum()
    }

    /// `(name, duration)` pairs for reporting.
    pub fn into_pairs(self) -> Vec<(String, Duration)> {
        self.phases
            .into_iter()
            .map(|phase| (phase.name.to_string(), phase.duration))
            .collect()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PhaseTiming {
    pub name: &'static str,
    pub duration: Duration,
}
