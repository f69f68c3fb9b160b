mod common;

use std::fs;

use anyhow::Result;
use attrgen_core::extract::signature;
use attrgen_core::{Extractor, HandlerKind, TransformError};
use pretty_assertions::assert_eq;

use common::FakeToolchain;

const GREET: &str = "pub fn greet(args: &[String]) -> String {\n    format!(\"hello {}\", args.join(\" \"))\n}";

#[test]
fn test_unchanged_source_is_not_rebuilt() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let toolchain = FakeToolchain::default();
    let extractor = Extractor::new(dir.path(), &toolchain).run_formatter(false);

    let first = extractor.extract("greet", GREET, HandlerKind::Method, &[])?;
    assert!(first.rebuilt);
    assert_eq!(toolchain.builds(), 1);

    let second = extractor.extract("greet", GREET, HandlerKind::Method, &[])?;
    assert!(!second.rebuilt);
    assert_eq!(second.source_hash, first.source_hash);
    assert_eq!(second.module_path, first.module_path);
    assert_eq!(toolchain.builds(), 1);
    Ok(())
}

#[test]
fn test_one_byte_change_rebuilds() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let toolchain = FakeToolchain::default();
    let extractor = Extractor::new(dir.path(), &toolchain).run_formatter(false);

    extractor.extract("greet", GREET, HandlerKind::Method, &[])?;
    let changed = GREET.replace("hello", "hallo");
    let artifact = extractor.extract("greet", &changed, HandlerKind::Method, &[])?;

    assert!(artifact.rebuilt);
    assert_eq!(toolchain.builds(), 2);
    let stored = fs::read_to_string(dir.path().join("extracted/greet/extract.hash"))?;
    assert_eq!(stored, signature(HandlerKind::Method, &changed));
    Ok(())
}

#[test]
fn test_missing_module_is_rebuilt() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let toolchain = FakeToolchain::default();
    let extractor = Extractor::new(dir.path(), &toolchain).run_formatter(false);

    let artifact = extractor.extract("greet", GREET, HandlerKind::Method, &[])?;
    fs::remove_file(&artifact.module_path)?;
    extractor.extract("greet", GREET, HandlerKind::Method, &[])?;
    assert_eq!(toolchain.builds(), 2);
    Ok(())
}

#[test]
fn test_unit_is_written_and_formatted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let toolchain = FakeToolchain::default();
    let extractor = Extractor::new(dir.path(), &toolchain);

    let imports = vec!["use std::fmt::Write;".to_string()];
    extractor.extract("greet", GREET, HandlerKind::Method, &imports)?;

    let unit = fs::read_to_string(dir.path().join("extracted/greet/extract.rs"))?;
    assert!(unit.contains("mod attrgen_sdk {"));
    assert!(unit.contains("use std::fmt::Write;"));
    assert!(unit.contains(GREET));
    assert_eq!(toolchain.formats(), 1);
    Ok(())
}

const STRIP: &str = "pub fn strip(c: &mut TransformContext) -> Result<(), String> {\n    c.delete();\n    Ok(())\n}";

#[test]
fn test_unit_carries_only_resolvable_imports() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let toolchain = FakeToolchain::default();
    let extractor = Extractor::new(dir.path(), &toolchain).run_formatter(false);

    let imports = vec![
        "use attrgen_sdk::TransformContext;".to_string(),
        "use crate::model::User;".to_string(),
        "use super::shared;".to_string(),
        "use std::collections::HashMap;".to_string(),
    ];
    extractor.extract("strip", STRIP, HandlerKind::Decorator, &imports)?;

    let unit = fs::read_to_string(dir.path().join("extracted/strip/extract.rs"))?;
    assert!(unit.contains("use attrgen_sdk::TransformContext;"));
    assert!(!unit.contains("crate::model"));
    assert!(!unit.contains("super::shared"));
    assert!(!unit.contains("use std::collections::HashMap;"));
    Ok(())
}

#[test]
fn test_unwritable_unit_is_an_extraction_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::create_dir_all(dir.path().join("extracted"))?;
    // a file where the unit directory should go
    fs::write(dir.path().join("extracted/strip"), "")?;

    let toolchain = FakeToolchain::default();
    let extractor = Extractor::new(dir.path(), &toolchain).run_formatter(false);
    let err = extractor
        .extract("strip", STRIP, HandlerKind::Decorator, &[])
        .unwrap_err();

    assert!(matches!(err, TransformError::Extraction { ref name, .. } if name == "strip"));
    assert_eq!(toolchain.builds(), 0);
    Ok(())
}
