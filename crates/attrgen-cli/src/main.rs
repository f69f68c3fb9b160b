use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use attrgen_core::{init_tracing, BatchSummary, TransformConfig, Transformer};
use clap::{Arg, ArgAction, Command};
use tracing::debug;

fn cli() -> Command {
    Command::new("attrgen")
        .version(attrgen_core::VERSION)
        .about("Applies annotation-driven transformations to Rust sources")
        .arg(
            Arg::new("dir")
                .value_name("DIR")
                .help("Directory to scan for annotated .rs files")
                .default_value(".")
                .index(1),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log every directive execution")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the run summary as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-format")
                .long("no-format")
                .help("Do not run rustfmt on extracted units and generated files")
                .action(ArgAction::SetTrue),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    init_tracing(matches.get_flag("verbose"));

    let dir = matches
        .get_one::<String>("dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let config = TransformConfig {
        run_formatter: !matches.get_flag("no-format"),
        ..TransformConfig::new(dir)
    };

    debug!("Configuration: {:?}", config);
    let mut transformer = Transformer::new(config);
    let summary = transformer.execute().context("transformation aborted")?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if !summary.success() {
        bail!("{} file(s) failed to transform", summary.errors.len());
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    for path in summary.written() {
        println!("wrote {}", path.display());
    }
    for error in &summary.errors {
        eprintln!("error: {}: {}", error.path.display(), error.message);
    }
    println!(
        "{} files scanned, {} annotated, {} written, {} unchanged, {} handlers built",
        summary.files_scanned,
        summary.files_with_usages,
        summary.files_written,
        summary.files_unchanged,
        summary.handlers_built
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_flags() {
        let matches = cli().get_matches_from(["attrgen", "src", "-v", "--json", "--no-format"]);
        assert_eq!(matches.get_one::<String>("dir").map(String::as_str), Some("src"));
        assert!(matches.get_flag("verbose"));
        assert!(matches.get_flag("json"));
        assert!(matches.get_flag("no-format"));
    }

    #[test]
    fn test_run_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Transformer::new(TransformConfig::new(dir.path()))
            .execute()
            .unwrap();
        assert_eq!(summary.files_scanned, 0);
        assert!(summary.success());
    }
}
