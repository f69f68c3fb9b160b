//! # Attrgen Core
//!
//! Annotation-driven source transformation for Rust sources:
//! - Directive parsing of `// #[name(args)]` comments
//! - Binding of directives to the declarations they decorate
//! - Builtin and user-supplied handlers that mutate the syntax tree
//! - Extraction, compilation and loading of user handlers with a content-hash cache
//!
//! Transformed files are written as `<stem>_generated.rs` next to their original and only
//! compile with `--cfg generated`. The flag does not pull the generated file into the
//! build by itself; the parent module picks it with a path attribute:
//!
//! ```rust,ignore
//! #[cfg_attr(generated, path = "model_generated.rs")]
//! mod model;
//! ```
//!
//! Build with `RUSTFLAGS="--cfg generated"` to compile `model_generated.rs` in place of
//! `model.rs`.

#![warn(clippy::all)]

pub mod builtin;
pub mod cfg_expr;
pub mod cleanup;
pub mod config;
pub mod constants;
pub mod context;
pub mod directive;
pub mod error;
pub mod extract;
pub mod imports;
pub mod loader;
pub mod offsets;
pub mod toolchain;
pub mod transformer;
pub mod tree;
pub mod usage;
pub mod walker;

pub use config::TransformConfig;
pub use context::{FileSession, TransformContext};
pub use directive::{parse_directives, DirectiveInstruction};
pub use error::{LoadError, Result, ToolError, TransformError};
pub use extract::{ExtractedArtifact, Extractor, HandlerKind};
pub use loader::HandlerRegistry;
pub use toolchain::{RustToolchain, Toolchain};
pub use transformer::{BatchSummary, FileOutcome, FileReport, Transformer};
pub use usage::{extract_usages, AnnotationUsage};

/// Attrgen version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for attrgen components
pub fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("attrgen_core={level},attrgen={level}"))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
