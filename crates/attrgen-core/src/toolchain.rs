//! External toolchain: the compiler that builds handler modules and the formatter.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::constants::EXTRACT_EDITION;
use crate::error::ToolError;

/// Invocations of the external compiler and formatter.
pub trait Toolchain {
    /// Format `path` in place. Returns `Ok(false)` when no formatter is installed.
    fn format(&self, path: &Path) -> Result<bool, ToolError>;

    /// Compile the unit at `source` into a dynamic library at `output`.
    fn build_dylib(&self, source: &Path, output: &Path) -> Result<(), ToolError>;
}

/// `rustc` and `rustfmt`, honouring the `RUSTC` and `RUSTFMT` environment variables.
#[derive(Debug, Clone)]
pub struct RustToolchain {
    rustc: String,
    rustfmt: String,
}

impl Default for RustToolchain {
    fn default() -> Self {
        Self {
            rustc: std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string()),
            rustfmt: std::env::var("RUSTFMT").unwrap_or_else(|_| "rustfmt".to_string()),
        }
    }
}

impl RustToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_programs(rustc: impl Into<String>, rustfmt: impl Into<String>) -> Self {
        Self {
            rustc: rustc.into(),
            rustfmt: rustfmt.into(),
        }
    }

    /// Whether the compiler can be started at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.rustc)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

impl Toolchain for RustToolchain {
    fn format(&self, path: &Path) -> Result<bool, ToolError> {
        let args = [
            OsStr::new("--edition"),
            OsStr::new(EXTRACT_EDITION),
            path.as_os_str(),
        ];
        match run(&self.rustfmt, args) {
            Ok(()) => Ok(true),
            Err(ToolError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn build_dylib(&self, source: &Path, output: &Path) -> Result<(), ToolError> {
        run(
            &self.rustc,
            [
                OsStr::new("--crate-type"),
                OsStr::new("cdylib"),
                OsStr::new("--edition"),
                OsStr::new(EXTRACT_EDITION),
                OsStr::new("--cap-lints"),
                OsStr::new("allow"),
                OsStr::new("-o"),
                output.as_os_str(),
                source.as_os_str(),
            ],
        )
    }
}

fn run<'a>(program: &str, args: impl IntoIterator<Item = &'a OsStr>) -> Result<(), ToolError> {
    let mut command = Command::new(program);
    command.args(args);
    debug!("Running {:?}", command);

    let output = command.output().map_err(|source| match source.kind() {
        ErrorKind::NotFound => ToolError::NotFound(program.to_string()),
        _ => ToolError::Spawn {
            program: program.to_string(),
            source,
        },
    })?;

    if output.status.success() {
        return Ok(());
    }

    Err(ToolError::Failed {
        program: program.to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
