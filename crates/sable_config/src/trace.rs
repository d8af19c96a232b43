use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::parse_list;

/// Configuration for tracing and inlining
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Interpreted calls before a target is compiled
    pub warmup: i64,

    /// Nesting limit for transitive inlining
    pub max_inline_depth: usize,

    /// Weights of the inlined and fallback arms of a guarded indirect call
    pub guard_weights: [u32; 2],

    /// Record taken branches as weights while interpreting
    pub profile_branches: bool,

    /// Callees that are never inlined
    pub do_not_trace: Vec<String>,

    /// Callees inlined even when a built-in rule would refuse them
    pub always_trace: Vec<String>,

    /// Where pre-backend IR is written, if anywhere
    pub dump_dir: Option<PathBuf>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            warmup: 100,
            max_inline_depth: 16,
            guard_weights: [1000, 1],
            profile_branches: true,
            do_not_trace: Vec::new(),
            always_trace: Vec::new(),
            dump_dir: None,
        }
    }
}

impl TraceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.merge_with_lookup(lookup);
        config
    }

    /// Overrides the fields whose variables are set and parse.
    pub fn merge_with_lookup(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("SABLE_WARMUP") {
            self.warmup = val.parse().unwrap_or(self.warmup);
        }

        if let Some(val) = lookup("SABLE_MAX_INLINE_DEPTH") {
            self.max_inline_depth = val.parse().unwrap_or(self.max_inline_depth);
        }

        if let Some(val) = lookup("SABLE_GUARD_WEIGHTS") {
            if let Some(weights) = parse_weights(&val) {
                self.guard_weights = weights;
            }
        }

        if let Some(val) = lookup("SABLE_PROFILE_BRANCHES") {
            self.profile_branches = val.parse().unwrap_or(self.profile_branches);
        }

        if let Some(val) = lookup("SABLE_DO_NOT_TRACE") {
            self.do_not_trace = parse_list(&val);
        }

        if let Some(val) = lookup("SABLE_ALWAYS_TRACE") {
            self.always_trace = parse_list(&val);
        }

        if let Some(val) = lookup("SABLE_DUMP_DIR") {
            self.dump_dir = (!val.is_empty()).then(|| PathBuf::from(val));
        }
    }
}

/// Parses `"taken,fallback"`.
fn parse_weights(value: &str) -> Option<[u32; 2]> {
    let (taken, fallback) = value.split_once(',')?;
    Some([taken.trim().parse().ok()?, fallback.trim().parse().ok()?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_and_weights() {
        let config = TraceConfig::from_lookup(&|key: &str| match key {
            "SABLE_DO_NOT_TRACE" => Some("a, b,,c".to_string()),
            "SABLE_GUARD_WEIGHTS" => Some("50, 2".to_string()),
            "SABLE_DUMP_DIR" => Some("/tmp/sable".to_string()),
            _ => None,
        });
        assert_eq!(config.do_not_trace, vec!["a", "b", "c"]);
        assert_eq!(config.guard_weights, [50, 2]);
        assert_eq!(config.dump_dir, Some(PathBuf::from("/tmp/sable")));
    }

    #[test]
    fn test_malformed_weights_keep_default() {
        assert_eq!(parse_weights("7"), None);
        assert_eq!(parse_weights("x,1"), None);
        let config = TraceConfig::from_lookup(&|key: &str| {
            (key == "SABLE_GUARD_WEIGHTS").then(|| "oops".to_string())
        });
        assert_eq!(config.guard_weights, [1000, 1]);
    }
}
