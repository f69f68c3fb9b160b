//! Mutation cursor handed to handlers, and the per-file session state.

use attrgen_sdk::Edit;

use crate::extract::ExtractedArtifact;
use crate::offsets::OffsetMap;
use crate::tree::{NodeId, NodeRef, SourceTree};

/// State owned by the processing of a single file.
#[derive(Debug, Default)]
pub struct FileSession {
    /// Handlers exported by the builtin phase, in export order.
    pub exports: Vec<ExtractedArtifact>,
    /// Edits rendered so far, for translating usage anchors.
    pub offsets: OffsetMap,
}

impl FileSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&mut self, artifact: ExtractedArtifact) {
        self.exports.retain(|a| a.name != artifact.name);
        self.exports.push(artifact);
    }
}

/// Cursor over one node of the file being transformed.
///
/// Every mutation sets the `modified` flag; the pipeline checks it once per usage, after
/// all of the usage's directives ran.
pub struct TransformContext<'a> {
    tree: &'a mut SourceTree,
    node: NodeId,
    args: &'a [String],
    file_source: &'a str,
    modified: bool,
}

impl<'a> TransformContext<'a> {
    pub fn new(
        tree: &'a mut SourceTree,
        node: NodeId,
        args: &'a [String],
        file_source: &'a str,
    ) -> Self {
        Self {
            tree,
            node,
            args,
            file_source,
            modified: false,
        }
    }

    /// The annotated node; a tombstone once deleted.
    pub fn node(&self) -> NodeRef<'_> {
        self.tree.node(self.node)
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn tree(&self) -> &SourceTree {
        self.tree
    }

    /// Top-level `use` declarations of the running buffer.
    pub fn imports(&self) -> Vec<String> {
        self.tree.imports()
    }

    pub fn arguments(&self) -> &[String] {
        self.args
    }

    /// Switch to another directive's arguments on the same node.
    pub fn set_arguments(&mut self, args: &'a [String]) {
        self.args = args;
    }

    /// The file as read from disk, before any transformation.
    pub fn file_source(&self) -> &str {
        self.file_source
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn replace(&mut self, text: impl Into<String>) {
        self.tree.replace(self.node, text.into());
        self.modified = true;
    }

    pub fn delete(&mut self) {
        self.tree.delete(self.node);
        self.modified = true;
    }

    pub fn insert_before(&mut self, text: impl Into<String>) {
        self.tree.insert_before(self.node, text.into());
        self.modified = true;
    }

    pub fn insert_after(&mut self, text: impl Into<String>) {
        self.tree.insert_after(self.node, text.into());
        self.modified = true;
    }

    /// Replay edits reported by a compiled decorator, in order.
    pub fn apply(&mut self, edits: Vec<Edit>) {
        for edit in edits {
            match edit {
                Edit::Replace(text) => self.replace(text),
                Edit::Delete => self.delete(),
                Edit::InsertBefore(text) => self.insert_before(text),
                Edit::InsertAfter(text) => self.insert_after(text),
            }
        }
    }
}
