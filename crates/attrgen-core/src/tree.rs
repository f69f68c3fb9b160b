//! Syntax tree of one source file.
//!
//! The tree-sitter tree itself is immutable, so [`SourceTree`] lowers the structural nodes
//! (items and statements an annotation can decorate) into an arena of [`NodeSlot`]s.
//! Handlers mutate slots; deleting a slot flips it to a tombstone so every [`NodeId`] stays
//! valid. [`SourceTree::render`] splices the pending mutations back over the source text.

use std::ops::Range;

use attrgen_sdk::DELETED_KIND;
use tree_sitter::{Node, Parser, Tree};

use crate::error::{Result, TransformError};

/// Index of a slot in a [`SourceTree`] arena.
pub type NodeId = usize;

/// Node kinds an annotation can be bound to.
pub const STRUCTURAL_KINDS: &[&str] = &[
    "function_item",
    "function_signature_item",
    "struct_item",
    "enum_item",
    "union_item",
    "type_item",
    "const_item",
    "static_item",
    "impl_item",
    "trait_item",
    "mod_item",
    "macro_definition",
    "use_declaration",
    "let_declaration",
    "expression_statement",
];

pub fn is_structural(kind: &str) -> bool {
    STRUCTURAL_KINDS.contains(&kind)
}

/// Parse Rust source, failing when the tree contains syntax errors.
pub fn parse_rust(source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_rust::LANGUAGE.into())
        .map_err(|e| TransformError::Parse(format!("failed to set Rust language: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| TransformError::Parse("parser produced no tree".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        let mut location = None;
        walk_preorder(root, |node, _| {
            if location.is_none() && (node.is_error() || node.is_missing()) {
                let point = node.start_position();
                location = Some((point.row + 1, point.column + 1));
            }
        });
        let (line, column) = location.unwrap_or((1, 1));
        return Err(TransformError::Parse(format!(
            "syntax error at {line}:{column}"
        )));
    }

    Ok(tree)
}

/// Visit every node in document order together with its depth.
pub fn walk_preorder<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>, usize)) {
    let mut cursor = root.walk();
    let mut depth = 0;
    loop {
        visit(cursor.node(), depth);
        if cursor.goto_first_child() {
            depth += 1;
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
            depth -= 1;
        }
    }
}

/// A comment token of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// Byte range of the comment text, without a trailing newline.
    pub range: Range<usize>,
    pub text: String,
    pub is_doc: bool,
}

pub fn is_doc_comment(text: &str) -> bool {
    (text.starts_with("///") && !text.starts_with("////"))
        || text.starts_with("//!")
        || (text.starts_with("/**") && !text.starts_with("/***") && text != "/**/")
        || text.starts_with("/*!")
}

fn is_outer_doc_comment(text: &str) -> bool {
    is_doc_comment(text) && !text.starts_with("//!") && !text.starts_with("/*!")
}

/// Pending state of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Original,
    Replaced(String),
    Deleted,
}

#[derive(Debug, Clone)]
pub struct NodeSlot {
    pub kind: &'static str,
    /// Full span, including outer attributes and doc comments.
    pub range: Range<usize>,
    pub name: Option<String>,
    pub depth: usize,
    /// Whitespace between the start of the line and the node.
    pub indent: String,
    pub state: SlotState,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl NodeSlot {
    fn from_node(node: Node<'_>, source: &str, depth: usize) -> Self {
        let start = leading_start(node, source);
        let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let prefix = &source[line_start..start];
        let indent = if prefix.chars().all(char::is_whitespace) {
            prefix.to_string()
        } else {
            String::new()
        };

        let name = node
            .child_by_field_name("name")
            .or_else(|| node.child_by_field_name("type"))
            .or_else(|| node.child_by_field_name("pattern"))
            .and_then(|n| n.utf8_text(source.as_bytes()).ok())
            .map(str::to_string);

        Self {
            kind: node.kind(),
            range: start..node.end_byte(),
            name,
            depth,
            indent,
            state: SlotState::Original,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state == SlotState::Deleted
    }

    fn is_mutated(&self) -> bool {
        self.state != SlotState::Original || !self.before.is_empty() || !self.after.is_empty()
    }
}

/// Start of a node once its outer attributes and doc comments are included.
fn leading_start(node: Node<'_>, source: &str) -> usize {
    let mut start = node.start_byte();
    let mut prev = node.prev_sibling();
    while let Some(sibling) = prev {
        let absorb = match sibling.kind() {
            "attribute_item" => true,
            "line_comment" | "block_comment" => sibling
                .utf8_text(source.as_bytes())
                .map(is_outer_doc_comment)
                .unwrap_or(false),
            _ => false,
        };
        if !absorb {
            break;
        }
        start = sibling.start_byte();
        prev = sibling.prev_sibling();
    }
    start
}

/// Read-only view of the node a cursor points at.
#[derive(Debug, Clone)]
pub struct NodeRef<'a> {
    pub id: NodeId,
    pub kind: &'a str,
    pub name: Option<&'a str>,
    pub text: &'a str,
    pub range: Range<usize>,
}

impl NodeRef<'_> {
    pub fn is_deleted(&self) -> bool {
        self.kind == DELETED_KIND
    }
}

/// Replacement of `range` (current-buffer coordinates) by `new_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    pub start: usize,
    pub end: usize,
    pub new_len: usize,
}

pub struct SourceTree {
    source: String,
    tree: Tree,
    slots: Vec<NodeSlot>,
}

impl SourceTree {
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let tree = parse_rust(&source)?;

        let mut slots = Vec::new();
        walk_preorder(tree.root_node(), |node, depth| {
            if is_structural(node.kind()) {
                slots.push(NodeSlot::from_node(node, &source, depth));
            }
        });

        Ok(Self {
            source,
            tree,
            slots,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn slots(&self) -> &[NodeSlot] {
        &self.slots
    }

    pub fn slot(&self, id: NodeId) -> &NodeSlot {
        &self.slots[id]
    }

    pub fn text(&self, range: Range<usize>) -> &str {
        &self.source[range]
    }

    /// Current view of a slot, reflecting replacements and deletion.
    pub fn node(&self, id: NodeId) -> NodeRef<'_> {
        let slot = &self.slots[id];
        let (kind, text) = match &slot.state {
            SlotState::Original => (slot.kind, &self.source[slot.range.clone()]),
            SlotState::Replaced(text) => (slot.kind, text.as_str()),
            SlotState::Deleted => (DELETED_KIND, ""),
        };
        NodeRef {
            id,
            kind,
            name: slot.name.as_deref(),
            text,
            range: slot.range.clone(),
        }
    }

    pub fn replace(&mut self, id: NodeId, text: String) {
        self.slots[id].state = SlotState::Replaced(text);
    }

    pub fn delete(&mut self, id: NodeId) {
        self.slots[id].state = SlotState::Deleted;
    }

    pub fn insert_before(&mut self, id: NodeId, text: String) {
        self.slots[id].before.push(text);
    }

    pub fn insert_after(&mut self, id: NodeId, text: String) {
        self.slots[id].after.push(text);
    }

    /// Whether `source[range]` holds nothing but whitespace and comments.
    pub fn is_trivia(&self, range: Range<usize>) -> bool {
        is_trivia(&self.source[range])
    }

    /// Bind an anchor offset to the nearest following structural node.
    ///
    /// The gap between the anchor and the node may only contain whitespace and comments.
    /// Every later candidate's gap contains the first candidate's gap, so the first
    /// rejection is final.
    pub fn correlate(&self, anchor: usize) -> Option<NodeId> {
        let id = self
            .slots
            .iter()
            .position(|slot| slot.range.start >= anchor)?;
        self.is_trivia(anchor..self.slots[id].range.start)
            .then_some(id)
    }

    /// Top-level `use` declarations, verbatim.
    pub fn imports(&self) -> Vec<String> {
        let root = self.root();
        let mut cursor = root.walk();
        root.children(&mut cursor)
            .filter(|child| child.kind() == "use_declaration")
            .filter_map(|child| child.utf8_text(self.source.as_bytes()).ok())
            .map(str::to_string)
            .collect()
    }

    /// Every comment in document order.
    pub fn comments(&self) -> Vec<Comment> {
        let mut comments = Vec::new();
        walk_preorder(self.root(), |node, _| {
            if matches!(node.kind(), "line_comment" | "block_comment") {
                let start = node.start_byte();
                let raw = &self.source[start..node.end_byte()];
                let text = raw.trim_end_matches(['\n', '\r']);
                comments.push(Comment {
                    range: start..start + text.len(),
                    text: text.to_string(),
                    is_doc: is_doc_comment(text),
                });
            }
        });
        comments
    }

    /// Inner attributes (`#![...]`) at the top of the file, as `(range, text)`.
    pub fn inner_attributes(&self) -> Vec<(Range<usize>, String)> {
        let root = self.root();
        let mut cursor = root.walk();
        root.children(&mut cursor)
            .filter(|child| child.kind() == "inner_attribute_item")
            .map(|child| {
                let range = child.start_byte()..child.end_byte();
                let text = self.source[range.clone()].to_string();
                (range, text)
            })
            .collect()
    }

    pub fn is_modified(&self) -> bool {
        self.slots.iter().any(NodeSlot::is_mutated)
    }

    /// Render the source with every pending mutation applied.
    ///
    /// Returns the new text and the splices it was built from, in ascending order.
    /// Insertions around an otherwise untouched slot become zero-width splices at its
    /// edges, so the slot's own text and anything nested in it keep their positions.
    pub fn render(&self) -> (String, Vec<Splice>) {
        let rewritten: Vec<(usize, &Range<usize>)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state != SlotState::Original)
            .map(|(id, slot)| (id, &slot.range))
            .collect();
        // slots inside a replaced or deleted slot are rendered by it
        let covered = |id: NodeId, range: &Range<usize>| {
            rewritten.iter().any(|&(other, outer)| {
                other != id && outer.start <= range.start && range.end <= outer.end
            })
        };

        let mut pieces: Vec<(Range<usize>, String)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(id, slot)| slot.is_mutated() && !covered(*id, &slot.range))
            .flat_map(|(_, slot)| self.render_slot(slot))
            .collect();
        pieces.sort_by_key(|(range, _)| (range.start, range.end));

        let mut output = String::with_capacity(self.source.len());
        let mut splices = Vec::new();
        let mut cursor = 0;

        for (range, replacement) in pieces {
            if range.start < cursor {
                continue;
            }
            output.push_str(&self.source[cursor..range.start]);
            output.push_str(&replacement);
            splices.push(Splice {
                start: range.start,
                end: range.end,
                new_len: replacement.len(),
            });
            cursor = range.end;
        }
        output.push_str(&self.source[cursor..]);

        (output, splices)
    }

    fn render_slot(&self, slot: &NodeSlot) -> Vec<(Range<usize>, String)> {
        let separator = format!("\n{}", slot.indent);

        let body = match &slot.state {
            SlotState::Original => {
                let mut pieces = Vec::new();
                if !slot.before.is_empty() {
                    let text: String = slot
                        .before
                        .iter()
                        .map(|b| format!("{b}{separator}"))
                        .collect();
                    pieces.push((slot.range.start..slot.range.start, text));
                }
                if !slot.after.is_empty() {
                    let text: String = slot
                        .after
                        .iter()
                        .map(|a| format!("{separator}{a}"))
                        .collect();
                    pieces.push((slot.range.end..slot.range.end, text));
                }
                return pieces;
            }
            SlotState::Replaced(text) => Some(text.as_str()),
            SlotState::Deleted => None,
        };

        let pieces: Vec<&str> = slot
            .before
            .iter()
            .map(String::as_str)
            .chain(body)
            .chain(slot.after.iter().map(String::as_str))
            .collect();

        if pieces.is_empty() {
            return vec![(self.line_span(slot), String::new())];
        }

        vec![(slot.range.clone(), pieces.join(&separator))]
    }

    /// Span of a deleted slot, widened to its whole line when nothing else shares it.
    fn line_span(&self, slot: &NodeSlot) -> Range<usize> {
        let mut start = slot.range.start;
        let mut end = slot.range.end;

        let rest = &self.source[end..];
        let trailing = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        let line_owned = !slot.indent.is_empty() || self.source[..start].ends_with('\n') || start == 0;

        if line_owned && rest[trailing..].starts_with('\n') {
            start -= slot.indent.len();
            end += trailing + 1;
        }
        start..end
    }
}

/// Lexical check that `text` contains only whitespace, line comments and block comments.
pub fn is_trivia(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b if b.is_ascii_whitespace() => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = text[i..].find('\n').map(|n| i + n + 1).unwrap_or(bytes.len());
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let mut depth = 1;
                i += 2;
                while i < bytes.len() && depth > 0 {
                    if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                        depth += 1;
                        i += 2;
                    } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                if depth > 0 {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "use std::fmt;\n\n#[derive(Debug)]\nstruct A;\n\nfn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n";

    #[test]
    fn test_parse_rejects_syntax_errors() {
        let err = SourceTree::parse("fn main( {").err().expect("syntax error");
        assert!(matches!(err, TransformError::Parse(_)));
    }

    #[test]
    fn test_slots_include_outer_attributes() {
        let tree = SourceTree::parse(SOURCE).unwrap();
        let kinds: Vec<&str> = tree.slots().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec!["use_declaration", "struct_item", "function_item", "let_declaration", "expression_statement"]
        );
        let strukt = tree.node(1);
        assert_eq!(strukt.text, "#[derive(Debug)]\nstruct A;");
        assert_eq!(strukt.name, Some("A"));
        assert_eq!(tree.slot(3).indent, "    ");
    }

    #[test]
    fn test_imports() {
        let tree = SourceTree::parse(SOURCE).unwrap();
        assert_eq!(tree.imports(), vec!["use std::fmt;".to_string()]);
    }

    #[test]
    fn test_trivia() {
        assert!(is_trivia("\n\n  // note\n /* block /* nested */ */\n"));
        assert!(!is_trivia("\nlet a = 1;\n"));
        assert!(!is_trivia("/* open"));
    }

    #[test]
    fn test_render_delete_removes_whole_line() {
        let mut tree = SourceTree::parse(SOURCE).unwrap();
        tree.delete(3);
        let (out, splices) = tree.render();
        assert_eq!(
            out,
            "use std::fmt;\n\n#[derive(Debug)]\nstruct A;\n\nfn main() {\n    println!(\"{x}\");\n}\n"
        );
        assert_eq!(splices.len(), 1);
        assert_eq!(splices[0].new_len, 0);
    }

    #[test]
    fn test_render_inserts_with_indentation() {
        let mut tree = SourceTree::parse(SOURCE).unwrap();
        tree.insert_before(3, "let w = 0;".to_string());
        tree.replace(3, "let x = w + 1;".to_string());
        tree.insert_after(3, "let y = x;".to_string());
        let (out, _) = tree.render();
        assert!(out.contains("    let w = 0;\n    let x = w + 1;\n    let y = x;\n"));
        assert!(tree.is_modified());
    }

    #[test]
    fn test_insertions_leave_nested_text_in_place() {
        let mut tree = SourceTree::parse(SOURCE).unwrap();
        tree.insert_before(2, "// before".to_string());
        tree.insert_after(2, "// after".to_string());
        tree.replace(3, "let x = 2;".to_string());
        let (out, splices) = tree.render();
        assert_eq!(
            out,
            "use std::fmt;\n\n#[derive(Debug)]\nstruct A;\n\n// before\nfn main() {\n    let x = 2;\n    println!(\"{x}\");\n}\n// after\n"
        );
        let widths: Vec<usize> = splices.iter().map(|s| s.end - s.start).collect();
        assert_eq!(widths, vec![0, 10, 0]);
    }

    #[test]
    fn test_tombstone_keeps_ids_valid() {
        let mut tree = SourceTree::parse(SOURCE).unwrap();
        tree.delete(1);
        assert!(tree.node(1).is_deleted());
        assert_eq!(tree.node(2).kind, "function_item");
    }
}
