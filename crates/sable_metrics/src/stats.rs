//! Per-target call counters

use parking_lot::RwLock;
use std::collections::HashMap;

/// How calls to one trace target were dispatched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetCounters {
    /// Calls that ran the traced IR through the interpreter
    pub interpreted: u64,
    /// Calls that went straight to the compiled routine
    pub compiled: u64,
    /// Calls that re-entered a target already being interpreted
    pub reentrant: u64,
    /// Call sites spliced into the trace
    pub inlined: u64,
    /// Call sites left as ordinary calls
    pub declined: u64,
}

#[derive(Default)]
pub struct JitStats {
    targets: RwLock<HashMap<String, TargetCounters>>,
}

impl JitStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, target: &str, f: impl FnOnce(&mut TargetCounters)) {
        let mut targets = self.targets.write();
        if let Some(counters) = targets.get_mut(target) {
            f(counters);
            return;
        }
        let mut counters = TargetCounters::default();
        f(&mut counters);
        targets.insert(target.to_string(), counters);
    }

    pub fn record_interpreted(&self, target: &str) {
        self.update(target, |c| c.interpreted += 1);
    }

    pub fn record_compiled_call(&self, target: &str) {
        self.update(target, |c| c.compiled += 1);
    }

    pub fn record_reentrant(&self, target: &str) {
        self.update(target, |c| c.reentrant += 1);
    }

    pub fn record_inline(&self, target: &str, inlined: bool) {
        self.update(target, |c| {
            if inlined {
                c.inlined += 1;
            } else {
                c.declined += 1;
            }
        });
    }

    pub fn get(&self, target: &str) -> TargetCounters {
        self.targets.read().get(target).copied().unwrap_or_default()
    }

    pub fn all(&self) -> Vec<(String, TargetCounters)> {
        let mut all: Vec<_> = self
            .targets
            .read()
            .iter()
            .map(|(name, counters)| (name.clone(), *counters))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
