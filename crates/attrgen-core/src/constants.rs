//! Fixed names shared across the transformer.

/// Scratch root created under the target directory.
pub const BUILD_DIR: &str = "attrgen";

/// Compiled method-class handler modules.
pub const METHODS_DIR: &str = "methods";

/// Compiled decorator-class handler modules.
pub const DECORATORS_DIR: &str = "decorators";

/// One sub-directory per extracted handler.
pub const EXTRACT_DIR: &str = "extracted";

/// Synthesized compilation unit inside an extraction directory.
pub const EXTRACT_SOURCE_FILE: &str = "extract.rs";

/// Cached content signature inside an extraction directory.
pub const EXTRACT_HASH_FILE: &str = "extract.hash";

/// Character that follows the comment marker on an annotation line.
pub const ANNOTATION_PREFIX: char = '#';

/// Line comment marker character (the marker is two of them).
pub const COMMENT_MARKER: char = '/';

/// Extension of candidate source files.
pub const SOURCE_EXTENSION: &str = "rs";

/// Conditional-compilation flag that activates generated files.
pub const GENERATION_FLAG: &str = "generated";

/// Suffix inserted before the extension of a generated file.
pub const GENERATED_SUFFIX: &str = "_generated";

/// File names containing this marker are never transformed.
pub const TEST_FILE_MARKER: &str = "_test";

/// Module name under which the handler SDK is inlined into extracted units.
pub const SDK_MODULE: &str = "attrgen_sdk";

/// Edition passed to rustc and rustfmt for extracted units.
pub const EXTRACT_EDITION: &str = "2021";
