use serde::{Deserialize, Serialize};

use crate::parse_list;

/// Configuration for the optimizer pipeline and its runtime-specific passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Full rounds of the pass schedule
    pub rounds: usize,

    /// Iteration cap for the fact engine's derive/apply loop
    pub fact_rounds: usize,

    /// Iteration cap for the scalar cleanup battery
    pub scalar_rounds: usize,

    /// Allocation functions whose result aliases nothing
    pub malloc_like: Vec<String>,

    /// Calls that never leave an exception pending
    pub non_raising_calls: Vec<String>,

    /// Calls that ask whether an exception is pending
    pub exception_queries: Vec<String>,

    /// Global holding the current recursion depth
    pub recursion_depth_symbol: Option<String>,

    /// Routine called when the recursion limit is exceeded
    pub recursion_overflow_handler: Option<String>,

    /// Calls that may run between a recursion enter/leave pair
    pub recursion_safe_calls: Vec<String>,

    /// Byte offset of the reference count in an object header
    pub refcount_offset: i64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            fact_rounds: 16,
            scalar_rounds: 16,
            malloc_like: vec![
                "malloc".to_string(),
                "calloc".to_string(),
                "aligned_alloc".to_string(),
            ],
            non_raising_calls: Vec::new(),
            exception_queries: Vec::new(),
            recursion_depth_symbol: None,
            recursion_overflow_handler: None,
            recursion_safe_calls: Vec::new(),
            refcount_offset: 0,
        }
    }
}

impl OptimizerConfig {
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
        if let Some(val) = lookup("SABLE_OPT_ROUNDS") {
            self.rounds = val.parse().unwrap_or(self.rounds);
        }

        if let Some(val) = lookup("SABLE_FACT_ROUNDS") {
            self.fact_rounds = val.parse().unwrap_or(self.fact_rounds);
        }

        if let Some(val) = lookup("SABLE_SCALAR_ROUNDS") {
            self.scalar_rounds = val.parse().unwrap_or(self.scalar_rounds);
        }

        if let Some(val) = lookup("SABLE_MALLOC_LIKE") {
            self.malloc_like = parse_list(&val);
        }

        if let Some(val) = lookup("SABLE_NON_RAISING") {
            self.non_raising_calls = parse_list(&val);
        }

        if let Some(val) = lookup("SABLE_EXCEPTION_QUERIES") {
            self.exception_queries = parse_list(&val);
        }

        if let Some(val) = lookup("SABLE_RECURSION_DEPTH_SYMBOL") {
            self.recursion_depth_symbol = (!val.is_empty()).then_some(val);
        }

        if let Some(val) = lookup("SABLE_RECURSION_OVERFLOW_HANDLER") {
            self.recursion_overflow_handler = (!val.is_empty()).then_some(val);
        }

        if let Some(val) = lookup("SABLE_RECURSION_SAFE_CALLS") {
            self.recursion_safe_calls = parse_list(&val);
        }

        if let Some(val) = lookup("SABLE_REFCOUNT_OFFSET") {
            self.refcount_offset = val.parse().unwrap_or(self.refcount_offset);
        }
    }

    /// Whether the recursion-check pass has the names it needs.
    pub fn recursion_checks_enabled(&self) -> bool {
        self.recursion_depth_symbol.is_some() && self.recursion_overflow_handler.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursion_names_from_lookup() {
        let config = OptimizerConfig::from_lookup(&|key: &str| match key {
            "SABLE_RECURSION_DEPTH_SYMBOL" => Some("recursion_depth".to_string()),
            "SABLE_RECURSION_OVERFLOW_HANDLER" => Some("recursion_overflow".to_string()),
            "SABLE_RECURSION_SAFE_CALLS" => Some("list_append,dict_get".to_string()),
            _ => None,
        });
        assert!(config.recursion_checks_enabled());
        assert_eq!(config.recursion_safe_calls.len(), 2);
        assert!(!OptimizerConfig::default().recursion_checks_enabled());
    }
}
