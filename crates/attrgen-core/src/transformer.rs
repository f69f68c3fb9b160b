//! The transformation pipeline.
//!
//! Each candidate file goes through usage scanning, the builtin phase, loading of the
//! handlers exported by that phase, the user phase and cleanup. A file whose handlers
//! modified nothing produces no output; otherwise `<stem>_generated.rs` is written next
//! to it, leaving the original untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::builtin::{self, BuiltinEnv};
use crate::cleanup::cleanup;
use crate::config::TransformConfig;
use crate::context::{FileSession, TransformContext};
use crate::error::{Result, ToolError, TransformError};
use crate::extract::{Extractor, HandlerKind};
use crate::loader::HandlerRegistry;
use crate::toolchain::{RustToolchain, Toolchain};
use crate::tree::SourceTree;
use crate::usage::{usages_in, AnnotationUsage};
use crate::walker::find_candidates;

/// Final state of one processed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "output", rename_all = "snake_case")]
pub enum FileOutcome {
    /// No annotation comments
    NoUsages,
    /// Annotations present, but no handler changed the tree
    NotModified,
    /// The result equals the original or the existing generated file
    Unchanged,
    /// A generated file was written
    Written(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub usages: usize,
    pub applied: usize,
    pub handlers_built: usize,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub path: PathBuf,
    pub message: String,
}

/// Summary of a transformation run
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchSummary {
    pub files_scanned: u64,
    pub files_with_usages: u64,
    pub files_written: u64,
    pub files_unchanged: u64,
    pub handlers_built: u64,
    pub reports: Vec<FileReport>,
    pub errors: Vec<FileError>,
}

impl BatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: FileReport) {
        self.files_scanned += 1;
        if report.usages > 0 {
            self.files_with_usages += 1;
        }
        self.handlers_built += report.handlers_built as u64;
        match report.outcome {
            FileOutcome::Written(_) => self.files_written += 1,
            FileOutcome::Unchanged => self.files_unchanged += 1,
            FileOutcome::NoUsages | FileOutcome::NotModified => {}
        }
        self.reports.push(report);
    }

    pub fn record_error(&mut self, path: &Path, error: &TransformError) {
        self.files_scanned += 1;
        self.errors.push(FileError {
            path: path.to_path_buf(),
            message: error.to_string(),
        });
    }

    pub fn written(&self) -> impl Iterator<Item = &Path> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            FileOutcome::Written(path) => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Running state of one file between phases.
struct FileState {
    original: String,
    tree: SourceTree,
    usages: Vec<AnnotationUsage>,
    session: FileSession,
    modified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Builtin,
    User,
}

impl FileState {
    fn new(original: String) -> Result<Self> {
        let tree = SourceTree::parse(original.clone())?;
        let usages = usages_in(&tree);
        Ok(Self {
            original,
            tree,
            usages,
            session: FileSession::new(),
            modified: false,
        })
    }

    fn applied(&self) -> usize {
        self.usages.iter().filter(|u| u.applied).count()
    }

    fn run_phase(
        &mut self,
        phase: Phase,
        extractor: &Extractor<'_>,
        registry: &HandlerRegistry,
    ) -> Result<()> {
        for index in 0..self.usages.len() {
            if self.usages[index].applied {
                continue;
            }

            let original_anchor = self.usages[index].anchor;
            if self.session.offsets.is_rewritten(original_anchor) {
                debug!("Annotation at {} was rewritten by an earlier handler", original_anchor);
                continue;
            }
            let anchor = self.session.offsets.to_current(original_anchor);
            let Some(node) = self.tree.correlate(anchor) else {
                debug!("No declaration follows annotation at {}", original_anchor);
                continue;
            };

            let usage = &self.usages[index];
            let mut ctx = TransformContext::new(&mut self.tree, node, &[], &self.original);
            let mut dispatched = 0;

            for directive in &usage.directives {
                ctx.set_arguments(&directive.arguments);
                let name = directive.name.as_str();

                match (phase, directive.is_builtin) {
                    (Phase::Builtin, true) => {
                        let Some(handler) = builtin::lookup(name) else {
                            continue;
                        };
                        debug!("Executing builtin `{}` on {}", name, ctx.node().kind);
                        let mut env = BuiltinEnv {
                            extractor,
                            session: &mut self.session,
                        };
                        handler(&mut ctx, &mut env)?;
                        dispatched += 1;
                    }
                    (Phase::Builtin, false) => {}
                    // dispatched during the builtin phase
                    (Phase::User, true) => dispatched += 1,
                    (Phase::User, false) => {
                        if let Some(result) = registry.call_decorator(name, &mut ctx) {
                            debug!("Executed decorator `{}`", name);
                            result?;
                            dispatched += 1;
                        } else if let Some(result) = registry.call_method(name, &directive.arguments) {
                            debug!("Executed method `{}`", name);
                            let output = result?;
                            if !output.trim().is_empty() {
                                ctx.insert_after(output);
                            }
                            dispatched += 1;
                        } else {
                            debug!("No handler for `{}`", name);
                        }
                    }
                }
            }

            let modified = ctx.modified();
            let deleted = ctx.node().is_deleted();
            if dispatched == usage.directives.len() || deleted {
                self.usages[index].applied = true;
            }

            if modified {
                self.rerender()?;
            }
        }

        Ok(())
    }

    /// Render pending mutations, record their offsets and re-parse the result.
    fn rerender(&mut self) -> Result<()> {
        let (text, splices) = self.tree.render();
        self.session.offsets.record(&splices);
        self.tree = SourceTree::parse(text)?;
        self.modified = true;
        Ok(())
    }
}

/// Walks a directory tree and transforms every annotated file.
pub struct Transformer {
    config: TransformConfig,
    toolchain: Box<dyn Toolchain>,
    registry: HandlerRegistry,
}

impl Transformer {
    pub fn new(config: TransformConfig) -> Self {
        Self {
            config,
            toolchain: Box::new(RustToolchain::new()),
            registry: HandlerRegistry::new(),
        }
    }

    /// Use another toolchain for building handlers and formatting output.
    pub fn toolchain(mut self, toolchain: Box<dyn Toolchain>) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Transform every candidate file under the base directory.
    ///
    /// Per-file failures are collected in the summary; only fatal errors abort the run.
    pub fn execute(&mut self) -> Result<BatchSummary> {
        let files = find_candidates(&self.config)?;
        info!("Found {} candidate files under {}", files.len(), self.config.base_dir.display());

        let mut summary = BatchSummary::new();
        for path in files {
            match self.transform_file(&path) {
                Ok(report) => summary.record(report),
                Err(e) if e.is_fatal() => {
                    error!("Aborting on {}: {}", path.display(), e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Failed to transform {}: {}", path.display(), e);
                    summary.record_error(&path, &e);
                }
            }
        }

        Ok(summary)
    }

    /// Transform a single file.
    pub fn transform_file(&mut self, path: &Path) -> Result<FileReport> {
        let source = fs::read_to_string(path)?;
        let mut state = FileState::new(source)?;
        let mut report = FileReport {
            path: path.to_path_buf(),
            usages: state.usages.len(),
            applied: 0,
            handlers_built: 0,
            outcome: FileOutcome::NoUsages,
        };

        if state.usages.is_empty() {
            return Ok(report);
        }
        debug!("{}: {} annotations", path.display(), state.usages.len());

        let extractor = Extractor::new(self.config.scratch_path(), self.toolchain.as_ref())
            .run_formatter(self.config.run_formatter);

        self.registry.clear();
        state.run_phase(Phase::Builtin, &extractor, &self.registry)?;

        report.handlers_built = state.session.exports.iter().filter(|a| a.rebuilt).count();
        bootstrap(&mut self.registry, &state.session)?;

        if !self.registry.is_empty() {
            state.run_phase(Phase::User, &extractor, &self.registry)?;
        }
        report.applied = state.applied();

        if !state.modified {
            report.outcome = FileOutcome::NotModified;
            return Ok(report);
        }

        let output = cleanup(state.tree.source(), &self.config.generation_flag)?;
        report.outcome = self.write_output(path, &state.original, output)?;
        Ok(report)
    }

    fn write_output(&self, path: &Path, original: &str, output: String) -> Result<FileOutcome> {
        if output == original {
            debug!("{}: output equals the original", path.display());
            return Ok(FileOutcome::Unchanged);
        }

        let target = self.config.generated_path(path);
        let staging = staging_path(&target);
        fs::write(&staging, &output)?;

        if self.config.run_formatter {
            match self.toolchain.format(&staging) {
                Ok(true) => {}
                Ok(false) => warn!("Formatter not found, {} stays unformatted", target.display()),
                Err(e @ ToolError::NotFound(_)) => warn!("{}", e),
                Err(e) => warn!("Failed to format {}: {}", target.display(), e),
            }
        }

        let staged = fs::read_to_string(&staging)?;
        let existing = fs::read_to_string(&target).ok();
        if existing.as_deref() == Some(staged.as_str()) || staged == original {
            fs::remove_file(&staging)?;
            debug!("{} is up to date", target.display());
            return Ok(FileOutcome::Unchanged);
        }

        fs::rename(&staging, &target)?;
        info!("Wrote {}", target.display());
        Ok(FileOutcome::Written(target))
    }
}

/// Temporary file the output is formatted in before it replaces `target`.
fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Load every handler exported by the builtin phase.
fn bootstrap(registry: &mut HandlerRegistry, session: &FileSession) -> Result<()> {
    for artifact in &session.exports {
        let decorator = artifact.kind == HandlerKind::Decorator;
        if let Err(source) = registry.load(artifact) {
            let error = TransformError::Load {
                name: artifact.name.clone(),
                decorator,
                source,
            };
            if error.is_fatal() {
                return Err(error);
            }
            warn!("Skipping method: {}", error);
        }
    }
    Ok(())
}
