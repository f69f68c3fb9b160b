//! `cfg(...)` predicates: parsing, evaluation, flag stripping and rendering.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgExpr {
    Flag(String),
    KeyValue(String, String),
    All(Vec<CfgExpr>),
    Any(Vec<CfgExpr>),
    Not(Box<CfgExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Open,
    Close,
    Comma,
    Eq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<CharIndices<'_>> = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            ',' => tokens.push(Token::Comma),
            '=' => tokens.push(Token::Eq),
            '"' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => return Err("unterminated string".to_string()),
                        },
                        Some((_, c)) => value.push(c),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if !(next.is_alphanumeric() || next == '_') {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            c => return Err(format!("unexpected `{c}` at {pos}")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn predicate(&mut self) -> Result<CfgExpr, String> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            other => return Err(format!("expected identifier, found {other:?}")),
        };

        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                match self.next() {
                    Some(Token::Str(value)) => Ok(CfgExpr::KeyValue(name, value)),
                    other => Err(format!("expected string after `{name} =`, found {other:?}")),
                }
            }
            Some(Token::Open) => {
                self.pos += 1;
                let list = self.list()?;
                match name.as_str() {
                    "all" => Ok(CfgExpr::All(list)),
                    "any" => Ok(CfgExpr::Any(list)),
                    "not" if list.len() == 1 => {
                        Ok(CfgExpr::Not(Box::new(list.into_iter().next().ok_or("empty not")?)))
                    }
                    "not" => Err("`not` takes exactly one predicate".to_string()),
                    other => Err(format!("unknown operator `{other}`")),
                }
            }
            _ => Ok(CfgExpr::Flag(name)),
        }
    }

    /// Comma separated predicates up to and including the closing parenthesis.
    fn list(&mut self) -> Result<Vec<CfgExpr>, String> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&Token::Close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.predicate()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::Close) => return Ok(items),
                other => return Err(format!("expected `,` or `)`, found {other:?}")),
            }
        }
    }
}

impl CfgExpr {
    /// Parse the predicate between the parentheses of `cfg(...)`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut parser = Parser {
            tokens: tokenize(input)?,
            pos: 0,
        };
        let expr = parser.predicate()?;
        if parser.peek().is_some() {
            return Err("trailing input after predicate".to_string());
        }
        Ok(expr)
    }

    /// Parse a whole inner attribute such as `#![cfg(unix)]`.
    ///
    /// Returns `None` when the attribute is not a `cfg` attribute at all.
    pub fn parse_attribute(attribute: &str) -> Option<Result<Self, String>> {
        let body = attribute
            .trim()
            .strip_prefix("#![")?
            .strip_suffix(']')?
            .trim();
        let inner = body.strip_prefix("cfg")?.trim_start();
        let inner = inner.strip_prefix('(')?.strip_suffix(')')?;
        Some(Self::parse(inner))
    }

    /// Evaluate with `flag` as the only enabled option.
    pub fn eval_with_only(&self, flag: &str) -> bool {
        match self {
            Self::Flag(name) => name == flag,
            Self::KeyValue(..) => false,
            Self::All(items) => items.iter().all(|e| e.eval_with_only(flag)),
            Self::Any(items) => items.iter().any(|e| e.eval_with_only(flag)),
            Self::Not(inner) => !inner.eval_with_only(flag),
        }
    }

    pub fn references(&self, flag: &str) -> bool {
        match self {
            Self::Flag(name) => name == flag,
            Self::KeyValue(..) => false,
            Self::All(items) | Self::Any(items) => items.iter().any(|e| e.references(flag)),
            Self::Not(inner) => inner.references(flag),
        }
    }

    /// Remove every occurrence of `flag`, collapsing operators left with one child.
    ///
    /// Returns `None` when nothing remains.
    pub fn strip_flag(self, flag: &str) -> Option<Self> {
        match self {
            Self::Flag(name) if name == flag => None,
            Self::Not(inner) => inner.strip_flag(flag).map(|e| Self::Not(Box::new(e))),
            Self::All(items) => Self::strip_list(items, flag, Self::All),
            Self::Any(items) => Self::strip_list(items, flag, Self::Any),
            other => Some(other),
        }
    }

    fn strip_list(items: Vec<Self>, flag: &str, rebuild: fn(Vec<Self>) -> Self) -> Option<Self> {
        if items.is_empty() {
            return Some(rebuild(items));
        }
        let mut kept: Vec<Self> = items.into_iter().filter_map(|e| e.strip_flag(flag)).collect();
        match kept.len() {
            0 => None,
            1 => kept.pop(),
            _ => Some(rebuild(kept)),
        }
    }
}

impl fmt::Display for CfgExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, op: &str, items: &[CfgExpr]) -> fmt::Result {
            write!(f, "{op}(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::Flag(name) => write!(f, "{name}"),
            Self::KeyValue(key, value) => write!(f, "{key} = {value:?}"),
            Self::All(items) => list(f, "all", items),
            Self::Any(items) => list(f, "any", items),
            Self::Not(inner) => write!(f, "not({inner})"),
        }
    }
}
