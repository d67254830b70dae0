//! Image filter expressions.
//!
//! ```text
//! expr    := and_expr (OR and_expr)*
//! and_expr:= not_expr (AND not_expr)*
//! not_expr:= NOT not_expr | '(' expr ')' | term
//! term    := (tag|caption|name|path) ':' string
//!          | (tags|chars|tokens) ':' op integer
//!          | string
//! ```
//!
//! Keywords and keys are case-insensitive. Strings are single or double
//! quoted (backslash escapes) or a run of non-space characters other than
//! parentheses. `*` in a tag or caption pattern matches any text.

use super::entry::ImageEntry;
use crate::{CaptionKitError, Result};
use regex::Regex;
use std::fmt;

/// Numeric comparison operator in count terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    const ALL: [(&'static str, CompareOp); 7] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        ("<=", CompareOp::Le),
        (">=", CompareOp::Ge),
        ("=", CompareOp::Eq),
        ("<", CompareOp::Lt),
        (">", CompareOp::Gt),
    ];

    fn apply(&self, left: usize, right: usize) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Gt => left > right,
            CompareOp::Le => left <= right,
            CompareOp::Ge => left >= right,
        }
    }
}

/// What a count term counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountField {
    Tags,
    Chars,
    Tokens,
}

/// A case-insensitive pattern with `*` wildcards.
#[derive(Debug, Clone)]
pub struct Pattern {
    text: String,
    whole: Regex,
    anywhere: Regex,
}

impl Pattern {
    fn new(text: &str) -> Result<Self> {
        let body = text
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let compile = |pattern: String| {
            Regex::new(&pattern)
                .map_err(|e| CaptionKitError::validation("filter", format!("bad pattern: {}", e)))
        };
        Ok(Self {
            text: text.to_string(),
            whole: compile(format!("(?is)^{}$", body))?,
            anywhere: compile(format!("(?is){}", body))?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn matches_whole(&self, value: &str) -> bool {
        self.whole.is_match(value)
    }

    fn matches_within(&self, value: &str) -> bool {
        self.anywhere.is_match(value)
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Any tag equals the pattern.
    Tag(Pattern),
    /// The caption contains the pattern.
    Caption(Pattern),
    /// File name contains the text.
    Name(String),
    /// Full path contains the text.
    Path(String),
    Count {
        field: CountField,
        op: CompareOp,
        value: usize,
    },
    /// Bare string: a tag or caption match.
    Text(Pattern),
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Parse filter text. Empty or blank text means no filter.
    pub fn parse(input: &str) -> Result<Option<Self>> {
        if input.trim().is_empty() {
            return Ok(None);
        }
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let filter = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(filter_error(format!(
                "unexpected {}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(Some(filter))
    }

    /// Whether `entry` passes this filter; `separator` joins tags into the caption.
    pub fn matches(&self, entry: &ImageEntry, separator: &str) -> bool {
        match self {
            Filter::Tag(pattern) => entry.tags.iter().any(|t| pattern.matches_whole(t)),
            Filter::Caption(pattern) => pattern.matches_within(&entry.caption(separator)),
            Filter::Name(text) => contains_ignore_case(&entry.file_name(), text),
            Filter::Path(text) => contains_ignore_case(&entry.path.to_string_lossy(), text),
            Filter::Count { field, op, value } => {
                let count = match field {
                    CountField::Tags => entry.tags.len(),
                    CountField::Chars => entry.caption(separator).chars().count(),
                    CountField::Tokens => entry.caption(separator).split_whitespace().count(),
                };
                op.apply(count, *value)
            }
            Filter::Text(pattern) => {
                entry.tags.iter().any(|t| pattern.matches_whole(t))
                    || pattern.matches_within(&entry.caption(separator))
            }
            Filter::Not(inner) => !inner.matches(entry, separator),
            Filter::And(items) => items.iter().all(|f| f.matches(entry, separator)),
            Filter::Or(items) => items.iter().any(|f| f.matches(entry, separator)),
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn filter_error(message: String) -> CaptionKitError {
    CaptionKitError::validation("filter", message)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    /// `key:value` for string keys.
    Keyed(String, String),
    Count(CountField, CompareOp, usize),
    Str(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Not => f.write_str("NOT"),
            Token::And => f.write_str("AND"),
            Token::Or => f.write_str("OR"),
            Token::Keyed(key, value) => write!(f, "'{}:{}'", key, value),
            Token::Count(..) => f.write_str("count term"),
            Token::Str(s) => write!(f, "'{}'", s),
        }
    }
}

const STRING_KEYS: [&str; 4] = ["tag", "caption", "name", "path"];
const COUNT_KEYS: [(&str, CountField); 3] = [
    ("tags", CountField::Tags),
    ("chars", CountField::Chars),
    ("tokens", CountField::Tokens),
];

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Consume `key:` if the input starts with it (case-insensitive).
    fn eat_key(&mut self, key: &str) -> bool {
        let rest = self.rest();
        let len = key.len() + 1;
        match rest.get(..len) {
            Some(head)
                if head.ends_with(':')
                    && head
                        .get(..key.len())
                        .is_some_and(|k| k.eq_ignore_ascii_case(key)) =>
            {
                self.pos += len;
                true
            }
            _ => false,
        }
    }

    /// Optionally quoted string. Returns the value and whether it was quoted.
    fn string(&mut self) -> Result<(String, bool)> {
        let rest = self.rest();
        let Some(first) = rest.chars().next() else {
            return Err(filter_error("expected a string at end of input".to_string()));
        };
        if first == '"' || first == '\'' {
            let mut value = String::new();
            let mut chars = rest.char_indices().skip(1);
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, escaped)) => value.push(escaped),
                        None => break,
                    },
                    c if c == first => {
                        self.pos += i + c.len_utf8();
                        return Ok((value, true));
                    }
                    c => value.push(c),
                }
            }
            return Err(filter_error(format!("unterminated {} quote", first)));
        }

        let end = rest
            .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(filter_error(format!("expected a string at '{}'", rest)));
        }
        self.pos += end;
        Ok((rest[..end].to_string(), false))
    }

    fn count(&mut self, field: CountField) -> Result<Token> {
        self.skip_whitespace();
        let rest = self.rest();
        let (symbol, op) = CompareOp::ALL
            .iter()
            .find(|(s, _)| rest.starts_with(s))
            .ok_or_else(|| filter_error(format!("expected a comparison operator at '{}'", rest)))?;
        self.pos += symbol.len();
        self.skip_whitespace();

        let rest = self.rest();
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let value = rest[..end]
            .parse::<usize>()
            .map_err(|_| filter_error(format!("expected a number at '{}'", rest)))?;
        self.pos += end;
        Ok(Token::Count(field, *op, value))
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace();
        let rest = self.rest();
        let Some(first) = rest.chars().next() else {
            return Ok(None);
        };
        match first {
            '(' => {
                self.pos += 1;
                return Ok(Some(Token::LParen));
            }
            ')' => {
                self.pos += 1;
                return Ok(Some(Token::RParen));
            }
            _ => {}
        }

        for (key, field) in COUNT_KEYS {
            if self.eat_key(key) {
                return self.count(field).map(Some);
            }
        }
        for key in STRING_KEYS {
            if self.eat_key(key) {
                self.skip_whitespace();
                let (value, _) = self.string()?;
                return Ok(Some(Token::Keyed(key.to_string(), value)));
            }
        }

        let (value, quoted) = self.string()?;
        if !quoted {
            match value.to_ascii_uppercase().as_str() {
                "NOT" => return Ok(Some(Token::Not)),
                "AND" => return Ok(Some(Token::And)),
                "OR" => return Ok(Some(Token::Or)),
                _ => {}
            }
        }
        Ok(Some(Token::Str(value)))
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { input, pos: 0 };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Filter> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Filter::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Filter> {
        let mut items = vec![self.parse_not()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            items.push(self.parse_not()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Filter::And(items)
        })
    }

    fn parse_not(&mut self) -> Result<Filter> {
        match self.next() {
            Some(Token::Not) => Ok(Filter::Not(Box::new(self.parse_not()?))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(filter_error(format!("expected ')', found {}", other))),
                    None => Err(filter_error("missing ')'".to_string())),
                }
            }
            Some(Token::Keyed(key, value)) => match key.as_str() {
                "tag" => Ok(Filter::Tag(Pattern::new(&value)?)),
                "caption" => Ok(Filter::Caption(Pattern::new(&value)?)),
                "name" => Ok(Filter::Name(value)),
                _ => Ok(Filter::Path(value)),
            },
            Some(Token::Count(field, op, value)) => Ok(Filter::Count { field, op, value }),
            Some(Token::Str(value)) => Ok(Filter::Text(Pattern::new(&value)?)),
            Some(other) => Err(filter_error(format!("unexpected {}", other))),
            None => Err(filter_error("unexpected end of filter".to_string())),
        }
    }
}
