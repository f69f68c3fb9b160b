//! Directive parser.
//!
//! Lexes a single annotation line such as `// #[derive_enum, options(Kind, strict)]` into
//! an ordered list of [`DirectiveInstruction`]s. The scan is forward-only and forgiving:
//! malformed input yields whatever was complete before the end of the line, never an error.

use std::iter::Peekable;
use std::str::Chars;

use serde::{Deserialize, Serialize};

use crate::builtin;

const LIST_START: char = '[';
const LIST_END: char = ']';
const SEPARATOR: char = ',';
const PARAMS_START: char = '(';
const PARAMS_END: char = ')';

/// One parsed directive: a handler name with its string arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveInstruction {
    pub name: String,
    pub arguments: Vec<String>,
    pub is_builtin: bool,
}

/// Parse the directive list of `line`, resolving builtin membership against the engine's
/// builtin registry.
pub fn parse_directives(line: &str) -> Vec<DirectiveInstruction> {
    DirectiveParser::new(line, builtin::is_builtin).parse()
}

pub struct DirectiveParser<'a, F> {
    chars: Peekable<Chars<'a>>,
    is_builtin: F,
    result: Vec<DirectiveInstruction>,
}

impl<'a, F> DirectiveParser<'a, F>
where
    F: Fn(&str) -> bool,
{
    pub fn new(line: &'a str, is_builtin: F) -> Self {
        Self {
            chars: line.chars().peekable(),
            is_builtin,
            result: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Vec<DirectiveInstruction> {
        while let Some(c) = self.chars.next() {
            if c == LIST_START {
                self.parse_list();
                break;
            }
        }
        self.result
    }

    fn parse_list(&mut self) {
        let mut name = String::new();
        let mut args = Vec::new();

        while let Some(c) = self.chars.next() {
            match c {
                PARAMS_START => args = self.parse_params(),
                PARAMS_END => {}
                SEPARATOR | LIST_END => {
                    self.emit(std::mem::take(&mut name), std::mem::take(&mut args));
                    if c == LIST_END {
                        return;
                    }
                }
                c if c.is_whitespace() => {}
                c => name.push(c),
            }
        }
    }

    /// Collect arguments up to the closing parenthesis. An unterminated list keeps the
    /// arguments completed so far.
    fn parse_params(&mut self) -> Vec<String> {
        let mut args = Vec::new();
        let mut arg = String::new();

        while let Some(c) = self.chars.next() {
            match c {
                PARAMS_END | SEPARATOR => {
                    let value = arg.trim();
                    if !(c == PARAMS_END && args.is_empty() && value.is_empty()) {
                        args.push(value.to_string());
                    }
                    arg.clear();
                    if c == PARAMS_END {
                        return args;
                    }
                }
                c => arg.push(c),
            }
        }

        args
    }

    fn emit(&mut self, name: String, arguments: Vec<String>) {
        if name.is_empty() {
            return;
        }
        let is_builtin = (self.is_builtin)(&name);
        self.result.push(DirectiveInstruction {
            name,
            arguments,
            is_builtin,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn directive(name: &str, args: &[&str], is_builtin: bool) -> DirectiveInstruction {
        DirectiveInstruction {
            name: name.to_string(),
            arguments: args.iter().map(|a| a.to_string()).collect(),
            is_builtin,
        }
    }

    #[test]
    fn test_single_builtin() {
        assert_eq!(
            parse_directives("// #[decorator]"),
            vec![directive("decorator", &[], true)]
        );
    }

    #[test]
    fn test_arguments() {
        assert_eq!(
            parse_directives("#[test(1,2,3)]"),
            vec![directive("test", &["1", "2", "3"], false)]
        );
    }

    #[test]
    fn test_list_keeps_order() {
        assert_eq!(
            parse_directives("#[test, decorator]"),
            vec![directive("test", &[], false), directive("decorator", &[], true)]
        );
        assert_eq!(
            parse_directives("#[test, decorator, test(1,2,3)]"),
            vec![
                directive("test", &[], false),
                directive("decorator", &[], true),
                directive("test", &["1", "2", "3"], false),
            ]
        );
    }

    #[test]
    fn test_empty_argument_list() {
        assert_eq!(parse_directives("#[gen()]"), vec![directive("gen", &[], false)]);
    }

    #[test]
    fn test_arguments_are_trimmed_raw_strings() {
        assert_eq!(
            parse_directives("#[options(Kind, a b , \"x\")]"),
            vec![directive("options", &["Kind", "a b", "\"x\""], false)]
        );
    }

    #[test]
    fn test_unicode_names() {
        assert_eq!(
            parse_directives("#[générer(ü)]"),
            vec![directive("générer", &["ü"], false)]
        );
    }

    #[test]
    fn test_malformed_input_yields_partial_result() {
        assert_eq!(
            parse_directives("#[method, broken(1,2"),
            vec![directive("method", &[], true)]
        );
        assert_eq!(parse_directives("#[unterminated"), vec![]);
        assert_eq!(parse_directives("no list here"), vec![]);
    }

    #[test]
    fn test_stops_at_list_end() {
        assert_eq!(
            parse_directives("#[a] trailing [b]"),
            vec![directive("a", &[], false)]
        );
    }

    #[test]
    fn test_custom_builtin_lookup() {
        let parsed = DirectiveParser::new("#[x, y]", |name| name == "y").parse();
        assert_eq!(parsed, vec![directive("x", &[], false), directive("y", &[], true)]);
    }
}
