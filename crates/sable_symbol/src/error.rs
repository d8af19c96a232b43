use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("symbol `{0}` not found")]
    Unknown(String),

    #[error("symbol `{name}` is defined in more than one module: {}", modules.join(", "))]
    Ambiguous { name: String, modules: Vec<String> },

    #[error("failed to read image {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse image {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to open shared library {}: {message}", path.display())]
    Library { path: PathBuf, message: String },
}
