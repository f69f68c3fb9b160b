//! Usage extraction: finds annotation comments and turns each into an [`AnnotationUsage`].

use serde::{Deserialize, Serialize};

use crate::constants::{ANNOTATION_PREFIX, COMMENT_MARKER};
use crate::directive::{parse_directives, DirectiveInstruction};
use crate::error::Result;
use crate::tree::{Comment, SourceTree};

/// One annotation comment and the directives it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationUsage {
    /// Offset right after the comment, in coordinates of the scanned source.
    pub anchor: usize,
    pub directives: Vec<DirectiveInstruction>,
    /// Set once every directive has been dispatched to a handler.
    pub applied: bool,
}

impl AnnotationUsage {
    pub fn names(&self) -> Vec<&str> {
        self.directives.iter().map(|d| d.name.as_str()).collect()
    }
}

/// Scan a whole file for annotation usages, in source order.
pub fn extract_usages(source: &str) -> Result<Vec<AnnotationUsage>> {
    let tree = SourceTree::parse(source)?;
    Ok(usages_in(&tree))
}

pub fn usages_in(tree: &SourceTree) -> Vec<AnnotationUsage> {
    tree.comments()
        .iter()
        .filter(|comment| !comment.is_doc)
        .filter_map(usage_from_comment)
        .collect()
}

fn usage_from_comment(comment: &Comment) -> Option<AnnotationUsage> {
    let line = comment.text.trim();
    if !is_annotation_line(line) {
        return None;
    }

    let directives = parse_directives(line);
    if directives.is_empty() {
        return None;
    }

    Some(AnnotationUsage {
        anchor: comment.range.end,
        directives,
        applied: false,
    })
}

/// Whether `line` is exactly two comment markers followed by the annotation prefix,
/// whitespace aside.
pub fn is_annotation_line(line: &str) -> bool {
    let mut markers = 0;
    for c in line.chars() {
        if c.is_whitespace() {
            continue;
        }
        if c == COMMENT_MARKER {
            markers += 1;
            continue;
        }
        return markers == 2 && c == ANNOTATION_PREFIX;
    }
    false
}
