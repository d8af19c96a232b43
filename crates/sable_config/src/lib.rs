//! JIT configuration
//!
//! Every section has defaults, reads `SABLE_*` environment variables, and can
//! be loaded from a TOML file when the `toml-config` feature is enabled.

pub mod optimizer;
pub mod target;
pub mod trace;

pub use crate::optimizer::OptimizerConfig;
pub use crate::target::TargetTriple;
pub use crate::trace::TraceConfig;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How much the JIT reports through `tracing`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Nothing beyond warnings.
    #[default]
    Silent,
    /// Pass counters and compile timing.
    Stats,
    /// Every fold, removal and inline decision, and the IR around the optimizer.
    Ir,
    /// Step-level detail of the fact engine and the interpreter.
    Interpreting,
}

impl Verbosity {
    pub fn name(self) -> &'static str {
        match self {
            Verbosity::Silent => "silent",
            Verbosity::Stats => "stats",
            Verbosity::Ir => "ir",
            Verbosity::Interpreting => "interpreting",
        }
    }

    pub fn stats(self) -> bool {
        self >= Verbosity::Stats
    }

    pub fn ir(self) -> bool {
        self >= Verbosity::Ir
    }

    pub fn interpreting(self) -> bool {
        self >= Verbosity::Interpreting
    }

    /// `tracing` filter that shows what this level reports.
    pub fn log_filter(self) -> &'static str {
        match self {
            Verbosity::Silent => "sable=warn",
            Verbosity::Stats | Verbosity::Ir => "sable=info",
            Verbosity::Interpreting => "sable=trace",
        }
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "silent" => Ok(Verbosity::Silent),
            "1" | "stats" => Ok(Verbosity::Stats),
            "2" | "ir" => Ok(Verbosity::Ir),
            "3" | "interpreting" => Ok(Verbosity::Interpreting),
            other => Err(format!("unknown verbosity `{other}`")),
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complete JIT configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    pub verbosity: Verbosity,
    pub trace: TraceConfig,
    pub optimizer: OptimizerConfig,
}

impl JitConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            verbosity: lookup("SABLE_VERBOSITY")
                .and_then(|val| val.parse().ok())
                .unwrap_or_default(),
            trace: TraceConfig::from_lookup(&lookup),
            optimizer: OptimizerConfig::from_lookup(&lookup),
        }
    }

    /// Load configuration from TOML file
    #[cfg(feature = "toml-config")]
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: JitConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn from_file(_path: &Path) -> anyhow::Result<Self> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Save configuration to TOML file
    #[cfg(feature = "toml-config")]
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Save configuration to TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn save_to_file(&self, _path: &Path) -> anyhow::Result<()> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Merge with environment variables (env vars take precedence)
    pub fn merge_with_env(self) -> Self {
        self.merge_with_lookup(|key| std::env::var(key).ok())
    }

    pub fn merge_with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.trace.merge_with_lookup(&lookup);
        self.optimizer.merge_with_lookup(&lookup);
        if let Some(verbosity) = lookup("SABLE_VERBOSITY").and_then(|val| val.parse().ok()) {
            self.verbosity = verbosity;
        }
        self
    }
}

/// Splits a comma separated list, dropping empty entries.
pub(crate) fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
