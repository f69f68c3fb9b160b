use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading a compiled handler module.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The module could not be opened at all
    #[error("cannot open module {path}: {message}")]
    Open { path: PathBuf, message: String },

    /// The module does not export the handler symbol
    #[error("symbol `{symbol}` not found in {path}")]
    MissingSymbol { symbol: String, path: PathBuf },

    /// The module exports the symbol with another handler kind
    #[error("symbol `{symbol}` in {path} has kind {actual}, expected {expected}")]
    Shape {
        symbol: String,
        path: PathBuf,
        expected: u32,
        actual: u32,
    },
}

/// Errors raised by an external tool invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The program is not installed or not on `PATH`
    #[error("`{0}` not found")]
    NotFound(String),

    /// The program ran and exited unsuccessfully
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("cannot run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error types for transformer operations
#[derive(Error, Debug)]
pub enum TransformError {
    /// Source could not be parsed into a syntax tree
    #[error("parse error: {0}")]
    Parse(String),

    /// Synthesized unit could not be written or formatted
    #[error("failed to extract `{name}`: {message}")]
    Extraction { name: String, message: String },

    /// External compiler failed
    #[error("failed to build `{name}`: {message}")]
    Build { name: String, message: String },

    /// Compiled handler could not be loaded
    #[error("failed to load `{name}`: {source}")]
    Load {
        name: String,
        decorator: bool,
        #[source]
        source: LoadError,
    },

    /// A handler returned failure
    #[error("directive `{directive}` failed: {message}")]
    Handler { directive: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    pub fn handler(directive: &str, message: impl Into<String>) -> Self {
        Self::Handler {
            directive: directive.to_string(),
            message: message.into(),
        }
    }

    /// Errors that indicate a broken build environment rather than a bad file.
    ///
    /// These abort the whole batch instead of just the current file.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Load { decorator, source, .. } => {
                *decorator || matches!(source, LoadError::Open { .. })
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let open = TransformError::Load {
            name: "m".into(),
            decorator: false,
            source: LoadError::Open {
                path: "m.so".into(),
                message: "missing".into(),
            },
        };
        assert!(open.is_fatal());

        let method_symbol = TransformError::Load {
            name: "m".into(),
            decorator: false,
            source: LoadError::MissingSymbol {
                symbol: "m".into(),
                path: "m.so".into(),
            },
        };
        assert!(!method_symbol.is_fatal());

        let decorator_symbol = TransformError::Load {
            name: "d".into(),
            decorator: true,
            source: LoadError::MissingSymbol {
                symbol: "d".into(),
                path: "d.so".into(),
            },
        };
        assert!(decorator_symbol.is_fatal());

        assert!(!TransformError::Parse("bad".into()).is_fatal());
    }
}
