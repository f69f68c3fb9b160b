//! Discovery of candidate source files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::TransformConfig;
use crate::constants::{SOURCE_EXTENSION, TEST_FILE_MARKER};

/// Directory names never descended into, besides hidden ones and the scratch dir.
const SKIPPED_DIRS: &[&str] = &["target"];

/// Recursively collect the files under `config.base_dir` that may carry annotations,
/// sorted by path.
pub fn find_candidates(config: &TransformConfig) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(&config.base_dir, config, &mut found)?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, config: &TransformConfig, found: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if entry.file_type()?.is_dir() {
            if !skip_dir(&name, config) {
                walk(&path, config, found)?;
            }
        } else if is_candidate(&path, &name, config) {
            found.push(path);
        }
    }

    Ok(())
}

fn skip_dir(name: &str, config: &TransformConfig) -> bool {
    name.starts_with('.') || name == config.scratch_dir || SKIPPED_DIRS.contains(&name)
}

fn is_candidate(path: &Path, name: &str, config: &TransformConfig) -> bool {
    if name.contains(TEST_FILE_MARKER) || name.contains(&config.generated_suffix) {
        return false;
    }
    path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
}
