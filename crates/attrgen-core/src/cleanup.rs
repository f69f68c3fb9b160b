//! Final pass over a generated file: rewrite the `cfg` header so the file only compiles
//! with the generation flag, and drop non-doc comments.

use std::ops::Range;

use tracing::warn;

use crate::cfg_expr::CfgExpr;
use crate::error::Result;
use crate::tree::SourceTree;

/// Rewrite a `cfg` predicate for the generated file.
///
/// A predicate already satisfied by `flag` alone is kept. One that mentions `flag` in
/// another position loses it, and becomes `flag` when nothing else remains. Any other
/// predicate is conjoined with `flag`.
pub fn require_flag(expr: CfgExpr, flag: &str) -> CfgExpr {
    if expr.eval_with_only(flag) {
        return expr;
    }

    let flag_expr = CfgExpr::Flag(flag.to_string());
    if expr.references(flag) {
        return expr.strip_flag(flag).unwrap_or(flag_expr);
    }
    CfgExpr::All(vec![expr, flag_expr])
}

pub fn cleanup(source: &str, flag: &str) -> Result<String> {
    let tree = SourceTree::parse(source)?;
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    let mut has_cfg = false;

    for (range, text) in tree.inner_attributes() {
        let Some(parsed) = CfgExpr::parse_attribute(&text) else {
            continue;
        };
        has_cfg = true;

        let header = match parsed {
            Ok(expr) => require_flag(expr, flag),
            Err(e) => {
                warn!("Replacing unparseable {} ({})", text, e);
                CfgExpr::Flag(flag.to_string())
            }
        };
        if !matches_original(&text, &header) {
            edits.push((range, format!("#![cfg({header})]")));
        }
    }

    for comment in tree.comments().into_iter().filter(|c| !c.is_doc) {
        edits.push((comment_span(source, comment.range), String::new()));
    }

    edits.sort_by_key(|(range, _)| range.start);

    let mut output = String::with_capacity(source.len() + flag.len() + 16);
    if !has_cfg {
        output.push_str(&format!("#![cfg({flag})]\n"));
    }

    let mut cursor = 0;
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        output.push_str(&source[cursor..range.start]);
        output.push_str(&replacement);
        cursor = range.end;
    }
    output.push_str(&source[cursor..]);

    Ok(output)
}

/// Whether the attribute already holds `header`, spacing aside.
fn matches_original(text: &str, header: &CfgExpr) -> bool {
    CfgExpr::parse_attribute(text)
        .and_then(|parsed| parsed.ok())
        .is_some_and(|expr| &expr == header)
}

/// Span removed with a comment: the whole line when the comment is alone on it,
/// otherwise the comment and the whitespace before it.
fn comment_span(source: &str, range: Range<usize>) -> Range<usize> {
    let line_start = source[..range.start].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &source[line_start..range.start];

    let rest = &source[range.end..];
    let line_end = rest.find('\n').map_or(source.len(), |i| range.end + i + 1);
    let suffix = &source[range.end..line_end];

    if prefix.trim().is_empty() && suffix.trim().is_empty() {
        return line_start..line_end;
    }

    let leading = prefix.len() - prefix.trim_end().len();
    if suffix.trim().is_empty() {
        range.start - leading..range.end
    } else {
        range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn clean(source: &str) -> String {
        cleanup(source, "generated").unwrap()
    }

    #[test]
    fn test_missing_header_is_prepended() {
        assert_eq!(
            clean("use std::fmt;\n\n// plain\n/// Doc\nfn f() {} // trailing\n"),
            "#![cfg(generated)]\nuse std::fmt;\n\n/// Doc\nfn f() {}\n"
        );
    }

    #[test]
    fn test_negated_flag_becomes_flag() {
        assert_eq!(
            clean("#![cfg(not(generated))]\nstruct A;\n"),
            "#![cfg(generated)]\nstruct A;\n"
        );
    }

    #[test]
    fn test_stripped_predicate_keeps_remainder() {
        assert_eq!(
            clean("#![cfg(all(unix, not(generated)))]\nstruct A;\n"),
            "#![cfg(unix)]\nstruct A;\n"
        );
    }

    #[test]
    fn test_unrelated_predicate_is_conjoined() {
        assert_eq!(
            clean("#![cfg(unix)]\nstruct A;\n"),
            "#![cfg(all(unix, generated))]\nstruct A;\n"
        );
    }

    #[test]
    fn test_satisfied_header_is_kept_verbatim() {
        let source = "#![cfg( any(generated,test) )]\n//! Inner doc\nstruct A;\n";
        assert_eq!(clean(source), source);
    }

    #[test]
    fn test_other_inner_attributes_are_untouched() {
        assert_eq!(
            clean("#![allow(dead_code)]\nstruct A;\n"),
            "#![cfg(generated)]\n#![allow(dead_code)]\nstruct A;\n"
        );
    }

    #[test]
    fn test_require_flag() {
        let expr = CfgExpr::parse("any(windows, not(generated))").unwrap();
        assert_eq!(require_flag(expr, "generated").to_string(), "windows");

        let expr = CfgExpr::parse("feature = \"fast\"").unwrap();
        assert_eq!(
            require_flag(expr, "generated").to_string(),
            "all(feature = \"fast\", generated)"
        );
    }
}
