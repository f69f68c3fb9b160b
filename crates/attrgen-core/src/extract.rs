//! Extraction of user handlers into stand-alone compilation units.
//!
//! A function marked with `decorator` or `method` is copied, together with the imports of
//! its file that it uses and an inlined copy of the handler SDK, into
//! `<scratch>/extracted/<name>/extract.rs`, then built into a dynamic library under
//! `<scratch>/<category>/`. A content signature stored next to the unit skips the build
//! when neither the function nor its category changed.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use attrgen_sdk::abi::{KIND_DECORATOR, KIND_METHOD, KIND_SYMBOL_SUFFIX};

use crate::constants::{
    DECORATORS_DIR, EXTRACT_DIR, EXTRACT_HASH_FILE, EXTRACT_SOURCE_FILE, METHODS_DIR, SDK_MODULE,
};
use crate::error::{Result, ToolError, TransformError};
use crate::toolchain::Toolchain;

/// Handler SDK source, inlined into every extracted unit.
const SDK_SOURCE: &str = include_str!("../../attrgen-sdk/src/lib.rs");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Decorator,
    Method,
}

impl HandlerKind {
    /// Scratch sub-directory holding compiled modules of this kind.
    pub fn category(self) -> &'static str {
        match self {
            Self::Decorator => DECORATORS_DIR,
            Self::Method => METHODS_DIR,
        }
    }

    /// Value of the `<name>_handler_kind` static exported by the module.
    pub fn abi_kind(self) -> u32 {
        match self {
            Self::Decorator => KIND_DECORATOR,
            Self::Method => KIND_METHOD,
        }
    }
}

/// A handler that has been extracted and built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedArtifact {
    pub name: String,
    pub kind: HandlerKind,
    pub source_hash: String,
    pub module_path: PathBuf,
    /// False when the cached build was reused.
    pub rebuilt: bool,
}

/// Content signature of a handler: sha256 over its category and exact source text.
pub fn signature(kind: HandlerKind, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.category().as_bytes());
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Builds the compilation unit for one handler.
pub fn synthesize_unit(name: &str, source: &str, kind: HandlerKind, imports: &[String]) -> String {
    let mut unit = String::new();

    let _ = writeln!(unit, "#![allow(dead_code, unused_imports)]\n");
    let _ = writeln!(unit, "mod {SDK_MODULE} {{\n{SDK_SOURCE}\n}}\n");

    for import in imports {
        let _ = writeln!(unit, "{import}");
    }
    if !imports.is_empty() {
        unit.push('\n');
    }

    let _ = writeln!(unit, "{source}\n");

    let abi = format!("{SDK_MODULE}::abi");
    match kind {
        HandlerKind::Decorator => {
            let _ = writeln!(
                unit,
                "#[export_name = \"{name}\"]\n\
                 pub unsafe extern \"C\" fn __attrgen_entry(\n    \
                     request: *const {abi}::RawRequest,\n    \
                     sink: *mut ::std::ffi::c_void,\n    \
                     emit: {abi}::EmitFn,\n\
                 ) -> i32 {{\n    \
                     {abi}::call_decorator({name}, request, sink, emit)\n\
                 }}\n"
            );
        }
        HandlerKind::Method => {
            let _ = writeln!(
                unit,
                "#[export_name = \"{name}\"]\n\
                 pub unsafe extern \"C\" fn __attrgen_entry(\n    \
                     args: *const {abi}::RawStr,\n    \
                     args_len: usize,\n    \
                     sink: *mut ::std::ffi::c_void,\n    \
                     emit: {abi}::EmitFn,\n\
                 ) -> i32 {{\n    \
                     {abi}::call_method({name}, args, args_len, sink, emit)\n\
                 }}\n"
            );
        }
    }

    let _ = writeln!(
        unit,
        "#[export_name = \"{name}{KIND_SYMBOL_SUFFIX}\"]\n\
         pub static __ATTRGEN_HANDLER_KIND: u32 = {};",
        kind.abi_kind()
    );

    unit
}

/// Extracts and builds handlers under one scratch directory.
pub struct Extractor<'t> {
    scratch: PathBuf,
    toolchain: &'t dyn Toolchain,
    run_formatter: bool,
}

impl<'t> Extractor<'t> {
    pub fn new(scratch: impl Into<PathBuf>, toolchain: &'t dyn Toolchain) -> Self {
        Self {
            scratch: scratch.into(),
            toolchain,
            run_formatter: true,
        }
    }

    pub fn run_formatter(mut self, run: bool) -> Self {
        self.run_formatter = run;
        self
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    pub fn unit_dir(&self, name: &str) -> PathBuf {
        self.scratch.join(EXTRACT_DIR).join(name)
    }

    /// `<scratch>/<category>/<dll-prefix><name><dll-suffix>`
    pub fn module_path(&self, name: &str, kind: HandlerKind) -> PathBuf {
        self.scratch.join(kind.category()).join(format!(
            "{}{name}{}",
            std::env::consts::DLL_PREFIX,
            std::env::consts::DLL_SUFFIX
        ))
    }

    /// Whether the stored signature of `name` equals `hash`.
    pub fn is_unchanged(&self, name: &str, hash: &str) -> bool {
        fs::read_to_string(self.unit_dir(name).join(EXTRACT_HASH_FILE))
            .map(|stored| stored == hash)
            .unwrap_or(false)
    }

    /// Extract and build `name` unless its signature is unchanged and the module exists.
    pub fn extract(
        &self,
        name: &str,
        source: &str,
        kind: HandlerKind,
        imports: &[String],
    ) -> Result<ExtractedArtifact> {
        let source_hash = signature(kind, source);
        let module_path = self.module_path(name, kind);

        if self.is_unchanged(name, &source_hash) && module_path.exists() {
            debug!("Skipping unmodified {:?} handler `{}`", kind, name);
            return Ok(ExtractedArtifact {
                name: name.to_string(),
                kind,
                source_hash,
                module_path,
                rebuilt: false,
            });
        }

        let unit_dir = self.unit_dir(name);
        let unit_path = unit_dir.join(EXTRACT_SOURCE_FILE);
        let imports = crate::imports::resolve(source, imports);
        fs::create_dir_all(&unit_dir)
            .and_then(|()| fs::write(&unit_path, synthesize_unit(name, source, kind, &imports)))
            .map_err(|e| TransformError::Extraction {
                name: name.to_string(),
                message: format!("cannot write {}: {e}", unit_path.display()),
            })?;

        if self.run_formatter {
            self.format_unit(name, &unit_path)?;
        }

        if let Some(parent) = module_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.toolchain
            .build_dylib(&unit_path, &module_path)
            .map_err(|e| TransformError::Build {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let hash_path = unit_dir.join(EXTRACT_HASH_FILE);
        if hash_path.exists() {
            fs::remove_file(&hash_path)?;
        }
        fs::write(&hash_path, &source_hash)?;

        info!("Built {:?} handler `{}` into {}", kind, name, module_path.display());
        Ok(ExtractedArtifact {
            name: name.to_string(),
            kind,
            source_hash,
            module_path,
            rebuilt: true,
        })
    }

    fn format_unit(&self, name: &str, path: &Path) -> Result<()> {
        match self.toolchain.format(path) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("Formatter not found, leaving {} unformatted", path.display());
                Ok(())
            }
            Err(e @ ToolError::NotFound(_)) => {
                warn!("{}", e);
                Ok(())
            }
            Err(e) => Err(TransformError::Extraction {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
