#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use attrgen_core::{ToolError, Toolchain, TransformConfig};

/// Toolchain that records builds and writes empty modules instead of compiling.
#[derive(Clone, Default)]
pub struct FakeToolchain {
    builds: Arc<AtomicUsize>,
    formats: Arc<AtomicUsize>,
}

impl FakeToolchain {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn formats(&self) -> usize {
        self.formats.load(Ordering::SeqCst)
    }
}

impl Toolchain for FakeToolchain {
    fn format(&self, _path: &Path) -> Result<bool, ToolError> {
        self.formats.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn build_dylib(&self, _source: &Path, output: &Path) -> Result<(), ToolError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        fs::write(output, b"").map_err(|source| ToolError::Spawn {
            program: "fake-rustc".to_string(),
            source,
        })
    }
}

/// Toolchain whose compiler always fails.
pub struct BrokenCompiler;

impl Toolchain for BrokenCompiler {
    fn format(&self, _path: &Path) -> Result<bool, ToolError> {
        Ok(true)
    }

    fn build_dylib(&self, _source: &Path, _output: &Path) -> Result<(), ToolError> {
        Err(ToolError::Failed {
            program: "rustc".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "error[E0425]: cannot find value".to_string(),
        })
    }
}

pub fn write(root: &Path, name: &str, contents: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

pub fn config(root: &Path) -> TransformConfig {
    TransformConfig {
        run_formatter: false,
        ..TransformConfig::new(root)
    }
}
