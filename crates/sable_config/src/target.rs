//! Target platform description for compiled routines

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target architecture/OS configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTriple {
    /// Architecture (e.g., x86_64, aarch64)
    pub arch: String,
    /// Vendor (e.g., unknown, apple, pc)
    pub vendor: String,
    /// Operating system (e.g., linux, darwin)
    pub os: String,
    /// ABI/environment (e.g., gnu, musl)
    pub env: Option<String>,
}

impl TargetTriple {
    pub fn new(
        arch: impl Into<String>,
        vendor: impl Into<String>,
        os: impl Into<String>,
        env: Option<impl Into<String>>,
    ) -> Self {
        Self {
            arch: arch.into(),
            vendor: vendor.into(),
            os: os.into(),
            env: env.map(Into::into),
        }
    }

    /// Parse a target triple string (e.g., "x86_64-unknown-linux-gnu")
    pub fn parse(triple: &str) -> Result<Self, String> {
        let parts: Vec<&str> = triple.split('-').collect();
        if parts.len() < 3 || parts.iter().any(|part| part.is_empty()) {
            return Err(format!("Invalid target triple format: {triple}"));
        }

        let arch = match parts[0] {
            "arm64" => "aarch64".to_string(),
            other => other.to_string(),
        };
        let env = (parts.len() > 3).then(|| parts[3..].join("-"));

        Ok(Self {
            arch,
            vendor: parts[1].to_string(),
            os: parts[2].to_string(),
            env,
        })
    }

    /// The triple of the running process.
    pub fn host() -> Self {
        let env = match std::env::consts::OS {
            "linux" => Some("gnu"),
            _ => None,
        };
        let vendor = match std::env::consts::OS {
            "macos" => "apple",
            _ => "unknown",
        };
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        Self::new(std::env::consts::ARCH, vendor, os, env)
    }

    pub fn pointer_width(&self) -> u32 {
        match self.arch.as_str() {
            "x86" | "i386" | "i686" | "arm" | "armv7" | "wasm32" | "riscv32" => 4,
            _ => 8,
        }
    }

    pub fn is_little_endian(&self) -> bool {
        !matches!(
            self.arch.as_str(),
            "powerpc" | "powerpc64" | "s390x" | "mips" | "mips64" | "sparc64"
        )
    }

    /// Check if this is a Unix-like target
    pub fn is_unix(&self) -> bool {
        matches!(
            self.os.as_str(),
            "linux" | "darwin" | "freebsd" | "openbsd" | "netbsd"
        )
    }
}

impl FromStr for TargetTriple {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Default for TargetTriple {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for TargetTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.env {
            Some(env) => write!(f, "{}-{}-{}-{}", self.arch, self.vendor, self.os, env),
            None => write!(f, "{}-{}-{}", self.arch, self.vendor, self.os),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triple() {
        let triple = TargetTriple::parse("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(triple.arch, "x86_64");
        assert_eq!(triple.vendor, "unknown");
        assert_eq!(triple.os, "linux");
        assert_eq!(triple.env, Some("gnu".to_string()));
        assert_eq!(triple.to_string(), "x86_64-unknown-linux-gnu");
        assert_eq!(triple.pointer_width(), 8);
    }

    #[test]
    fn test_arm64_is_normalized() {
        let triple = TargetTriple::parse("arm64-apple-darwin").unwrap();
        assert_eq!(triple.arch, "aarch64");
        assert!(triple.is_unix());
        assert!(triple.is_little_endian());
    }

    #[test]
    fn test_invalid_triple() {
        assert!(TargetTriple::parse("x86_64").is_err());
        assert!(TargetTriple::parse("x86_64--linux").is_err());
    }
}
