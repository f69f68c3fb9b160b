use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{BUILD_DIR, GENERATED_SUFFIX, GENERATION_FLAG};

/// Transformer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Root directory that is walked for candidate files
    pub base_dir: PathBuf,
    /// Name of the scratch directory created under `base_dir`
    pub scratch_dir: String,
    /// Flag that gates generated files
    pub generation_flag: String,
    /// Suffix appended to the stem of generated files
    pub generated_suffix: String,
    /// Run the formatter on extracted units and generated files
    pub run_formatter: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            base_dir: ".".into(),
            scratch_dir: BUILD_DIR.to_string(),
            generation_flag: GENERATION_FLAG.to_string(),
            generated_suffix: GENERATED_SUFFIX.to_string(),
            run_formatter: true,
        }
    }
}

impl TransformConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.base_dir.join(&self.scratch_dir)
    }

    /// `dir/foo.rs` -> `dir/foo_generated.rs`.
    pub fn generated_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match source.extension() {
            Some(ext) => format!("{stem}{}.{}", self.generated_suffix, ext.to_string_lossy()),
            None => format!("{stem}{}", self.generated_suffix),
        };
        source.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_path() {
        let config = TransformConfig::default();
        assert_eq!(
            config.generated_path(Path::new("src/model/user.rs")),
            PathBuf::from("src/model/user_generated.rs")
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TransformConfig =
            serde_json::from_str(r#"{ "base_dir": "/tmp/project", "run_formatter": false }"#)
                .unwrap();
        assert_eq!(config.scratch_path(), PathBuf::from("/tmp/project/attrgen"));
        assert_eq!(config.generation_flag, "generated");
        assert!(!config.run_formatter);
    }
}
