//! Import resolution for extracted handler units.
//!
//! An extracted unit is a single file compiled on its own, so only imports that name
//! something the handler uses, and that resolve outside the host crate, are carried over.
//! Use trees are flattened into one `use` per bound name.

use std::collections::HashSet;

use tracing::debug;
use tree_sitter::Node;

use crate::tree::{parse_rust, walk_preorder};

/// Path roots that only resolve inside the host crate.
const RELATIVE_ROOTS: &[&str] = &["crate", "super", "self"];

/// One name brought into scope by a `use` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseEntry {
    /// Full path, `a::b::c` or `a::b::*`.
    pub path: String,
    pub alias: Option<String>,
}

impl UseEntry {
    fn root(&self) -> &str {
        self.path
            .trim_start_matches("::")
            .split("::")
            .next()
            .unwrap_or_default()
    }

    /// Name this entry binds; `None` for glob imports.
    pub fn bound_name(&self) -> Option<&str> {
        match &self.alias {
            Some(alias) => Some(alias),
            None if self.path.ends_with('*') => None,
            None => self.path.rsplit("::").next(),
        }
    }

    pub fn is_relative(&self) -> bool {
        RELATIVE_ROOTS.contains(&self.root())
    }

    pub fn render(&self) -> String {
        match &self.alias {
            Some(alias) => format!("use {} as {alias};", self.path),
            None => format!("use {};", self.path),
        }
    }
}

/// Flatten the `use` declarations in `text` into single-name entries.
pub fn flatten(text: &str) -> Vec<UseEntry> {
    let tree = match parse_rust(text) {
        Ok(tree) => tree,
        Err(e) => {
            debug!("Skipping import {:?}: {}", text, e);
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    let root = tree.root_node();
    let mut cursor = root.walk();
    for declaration in root.children(&mut cursor) {
        if declaration.kind() != "use_declaration" {
            continue;
        }
        if let Some(argument) = declaration.child_by_field_name("argument") {
            flatten_tree(argument, "", text, &mut entries);
        }
    }
    entries
}

fn join(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}::{path}")
    }
}

fn flatten_tree(node: Node<'_>, prefix: &str, text: &str, out: &mut Vec<UseEntry>) {
    let source = text.as_bytes();
    let text_of = |n: Node<'_>| n.utf8_text(source).unwrap_or_default();

    match node.kind() {
        "line_comment" | "block_comment" => {}
        "scoped_use_list" => {
            let prefix = match node.child_by_field_name("path") {
                Some(path) => join(prefix, text_of(path)),
                None => prefix.to_string(),
            };
            if let Some(list) = node.child_by_field_name("list") {
                flatten_tree(list, &prefix, text, out);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                flatten_tree(child, prefix, text, out);
            }
        }
        "use_as_clause" => {
            let (Some(path), Some(alias)) = (
                node.child_by_field_name("path"),
                node.child_by_field_name("alias"),
            ) else {
                return;
            };
            out.push(UseEntry {
                path: join(prefix, text_of(path)),
                alias: Some(text_of(alias).to_string()),
            });
        }
        // `{self}` re-imports the prefix itself
        "self" if !prefix.is_empty() => out.push(UseEntry {
            path: prefix.to_string(),
            alias: None,
        }),
        _ => out.push(UseEntry {
            path: join(prefix, text_of(node)),
            alias: None,
        }),
    }
}

/// Every identifier that occurs in `source`, including those inside macro invocations.
pub fn identifiers(source: &str) -> Option<HashSet<String>> {
    let tree = parse_rust(source).ok()?;
    let mut names = HashSet::new();
    walk_preorder(tree.root_node(), |node, _| {
        if matches!(node.kind(), "identifier" | "type_identifier") {
            if let Ok(name) = node.utf8_text(source.as_bytes()) {
                names.insert(name.to_string());
            }
        }
    });
    Some(names)
}

/// Imports of the host file that the handler in `source` needs.
///
/// Entries rooted at `crate`, `super` or `self` are dropped, as are entries whose bound
/// name never occurs in `source`. Glob imports and `as _` trait imports are kept when
/// they are not crate-relative.
pub fn resolve(source: &str, imports: &[String]) -> Vec<String> {
    let used = identifiers(source);
    let mut resolved: Vec<String> = Vec::new();

    for entry in imports.iter().flat_map(|import| flatten(import)) {
        if entry.is_relative() {
            debug!("Dropping crate-relative import `{}`", entry.path);
            continue;
        }
        let keep = match (entry.bound_name(), &used) {
            (None | Some("_"), _) => true,
            (Some(name), Some(used)) => used.contains(name),
            // keep everything when the handler itself does not parse
            (Some(_), None) => true,
        };
        let rendered = entry.render();
        if keep && !resolved.contains(&rendered) {
            resolved.push(rendered);
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(text: &str) -> Vec<String> {
        flatten(text).into_iter().map(|e| e.render()).collect()
    }

    #[test]
    fn test_flatten_use_trees() {
        assert_eq!(paths("use std::fmt;"), vec!["use std::fmt;"]);
        assert_eq!(
            paths("pub use std::{collections::{HashMap, HashSet as Set}, io::{self, Write}};"),
            vec![
                "use std::collections::HashMap;",
                "use std::collections::HashSet as Set;",
                "use std::io;",
                "use std::io::Write;",
            ]
        );
        assert_eq!(paths("use std::fmt::Write as _;"), vec!["use std::fmt::Write as _;"]);
        assert_eq!(paths("use std::collections::*;"), vec!["use std::collections::*;"]);
        assert!(paths("use std::{").is_empty());
    }

    #[test]
    fn test_bound_names() {
        let entries = flatten("use a::{b, c as d, e::*};");
        let names: Vec<Option<&str>> = entries.iter().map(UseEntry::bound_name).collect();
        assert_eq!(names, vec![Some("b"), Some("d"), None]);
    }

    #[test]
    fn test_resolve_keeps_only_used_external_imports() {
        let handler = "pub fn strip(c: &mut TransformContext) -> Result<(), String> {\n    let mut seen: HashMap<String, u32> = HashMap::new();\n    seen.insert(c.node_text().to_string(), 1);\n    c.delete();\n    Ok(())\n}";
        let imports = vec![
            "use attrgen_sdk::TransformContext;".to_string(),
            "use crate::model::User;".to_string(),
            "use super::helpers;".to_string(),
            "use std::collections::{BTreeMap, HashMap};".to_string(),
            "use std::fmt::Write as _;".to_string(),
        ];
        assert_eq!(
            resolve(handler, &imports),
            vec![
                "use attrgen_sdk::TransformContext;",
                "use std::collections::HashMap;",
                "use std::fmt::Write as _;",
            ]
        );
    }

    #[test]
    fn test_names_inside_macros_count_as_used() {
        let handler = "fn greet(args: &[String]) -> String {\n    format!(\"{}\", Upper(args.join(\" \")))\n}";
        let imports = vec!["use std::string::String as Upper;".to_string()];
        assert_eq!(resolve(handler, &imports), vec!["use std::string::String as Upper;"]);
    }
}
