//! PEP 508 environment markers.
//!
//! A marker such as `platform_system == "Windows" and python_version == "3.11"`
//! restricts a requirement to matching environments. Markers are parsed into a
//! small expression tree and evaluated against a [`MarkerEnvironment`].

use super::version::{Version, VersionSpecifier};
use crate::{CaptionKitError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Variables a marker may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerVariable {
    PythonVersion,
    PythonFullVersion,
    OsName,
    SysPlatform,
    PlatformRelease,
    PlatformSystem,
    PlatformVersion,
    PlatformMachine,
    PlatformPythonImplementation,
    ImplementationName,
    ImplementationVersion,
    Extra,
}

impl MarkerVariable {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerVariable::PythonVersion => "python_version",
            MarkerVariable::PythonFullVersion => "python_full_version",
            MarkerVariable::OsName => "os_name",
            MarkerVariable::SysPlatform => "sys_platform",
            MarkerVariable::PlatformRelease => "platform_release",
            MarkerVariable::PlatformSystem => "platform_system",
            MarkerVariable::PlatformVersion => "platform_version",
            MarkerVariable::PlatformMachine => "platform_machine",
            MarkerVariable::PlatformPythonImplementation => "platform_python_implementation",
            MarkerVariable::ImplementationName => "implementation_name",
            MarkerVariable::ImplementationVersion => "implementation_version",
            MarkerVariable::Extra => "extra",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let variable = match name {
            "python_version" => MarkerVariable::PythonVersion,
            "python_full_version" => MarkerVariable::PythonFullVersion,
            "os_name" | "os.name" => MarkerVariable::OsName,
            "sys_platform" | "sys.platform" => MarkerVariable::SysPlatform,
            "platform_release" | "platform.release" => MarkerVariable::PlatformRelease,
            "platform_system" | "platform.system" => MarkerVariable::PlatformSystem,
            "platform_version" | "platform.version" => MarkerVariable::PlatformVersion,
            "platform_machine" | "platform.machine" => MarkerVariable::PlatformMachine,
            "platform_python_implementation" | "platform.python_implementation" => {
                MarkerVariable::PlatformPythonImplementation
            }
            "implementation_name" => MarkerVariable::ImplementationName,
            "implementation_version" => MarkerVariable::ImplementationVersion,
            "extra" => MarkerVariable::Extra,
            _ => return None,
        };
        Some(variable)
    }

    /// Variables whose values compare as versions rather than strings.
    pub fn is_version(&self) -> bool {
        matches!(
            self,
            MarkerVariable::PythonVersion
                | MarkerVariable::PythonFullVersion
                | MarkerVariable::ImplementationVersion
        )
    }
}

impl fmt::Display for MarkerVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator inside a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compatible,
    ArbitraryEqual,
    In,
    NotIn,
}

impl MarkerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerOp::Equal => "==",
            MarkerOp::NotEqual => "!=",
            MarkerOp::Less => "<",
            MarkerOp::LessEqual => "<=",
            MarkerOp::Greater => ">",
            MarkerOp::GreaterEqual => ">=",
            MarkerOp::Compatible => "~=",
            MarkerOp::ArbitraryEqual => "===",
            MarkerOp::In => "in",
            MarkerOp::NotIn => "not in",
        }
    }
}

/// One side of a marker comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MarkerValue {
    Variable(MarkerVariable),
    Literal(String),
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Variable(v) => write!(f, "{}", v),
            MarkerValue::Literal(s) if s.contains('"') => write!(f, "'{}'", s),
            MarkerValue::Literal(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// A parsed marker expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    Compare {
        lhs: MarkerValue,
        op: MarkerOp,
        rhs: MarkerValue,
    },
    And(Vec<Marker>),
    Or(Vec<Marker>),
}

impl Marker {
    /// Parse marker text (the part after `;` in a requirement line).
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            source: input,
            tokens,
            pos: 0,
        };
        let marker = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error(format!(
                "unexpected {} after complete expression",
                parser.tokens[parser.pos].describe()
            )));
        }
        Ok(marker)
    }

    /// Evaluate against an environment.
    pub fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        match self {
            Marker::And(items) => items.iter().all(|m| m.evaluate(env)),
            Marker::Or(items) => items.iter().any(|m| m.evaluate(env)),
            Marker::Compare { lhs, op, rhs } => evaluate_compare(lhs, *op, rhs, env),
        }
    }

    /// Variables referenced anywhere in the expression.
    pub fn variables(&self) -> BTreeSet<MarkerVariable> {
        let mut out = BTreeSet::new();
        self.visit_compares(&mut |lhs, _, rhs| {
            for side in [lhs, rhs] {
                if let MarkerValue::Variable(v) = side {
                    out.insert(*v);
                }
            }
        });
        out
    }

    /// Literal values compared against `variable`, in first-seen order.
    pub fn referenced_values(&self, variable: MarkerVariable) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.visit_compares(&mut |lhs, _, rhs| {
            let literal = match (lhs, rhs) {
                (MarkerValue::Variable(v), MarkerValue::Literal(s))
                | (MarkerValue::Literal(s), MarkerValue::Variable(v))
                    if *v == variable =>
                {
                    Some(s)
                }
                _ => None,
            };
            if let Some(s) = literal {
                if !out.contains(s) {
                    out.push(s.clone());
                }
            }
        });
        out
    }

    fn visit_compares<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a MarkerValue, MarkerOp, &'a MarkerValue),
    ) {
        match self {
            Marker::Compare { lhs, op, rhs } => f(lhs, *op, rhs),
            Marker::And(items) | Marker::Or(items) => {
                for item in items {
                    item.visit_compares(f);
                }
            }
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Compare { lhs, op, rhs } => write!(f, "{} {} {}", lhs, op.as_str(), rhs),
            Marker::And(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    match item {
                        Marker::Or(_) => write!(f, "({})", item)?,
                        _ => write!(f, "{}", item)?,
                    }
                }
                Ok(())
            }
            Marker::Or(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

fn evaluate_compare(lhs: &MarkerValue, op: MarkerOp, rhs: &MarkerValue, env: &MarkerEnvironment) -> bool {
    let is_version = [lhs, rhs]
        .iter()
        .any(|side| matches!(side, MarkerValue::Variable(v) if v.is_version()));
    let resolve = |side: &MarkerValue| match side {
        MarkerValue::Variable(v) => env.get(*v).to_string(),
        MarkerValue::Literal(s) => s.clone(),
    };
    let left = resolve(lhs);
    let right = resolve(rhs);

    match op {
        MarkerOp::In => right.contains(left.as_str()),
        MarkerOp::NotIn => !right.contains(left.as_str()),
        _ if is_version && Version::parse(&left).is_some() => {
            let spec = VersionSpecifier::parse(&format!("{}{}", op.as_str(), right));
            match spec {
                Some(spec) => spec.matches(&left),
                None => false,
            }
        }
        MarkerOp::Equal => left == right,
        MarkerOp::NotEqual => left != right,
        MarkerOp::ArbitraryEqual => left.eq_ignore_ascii_case(&right),
        MarkerOp::Less => left < right,
        MarkerOp::LessEqual => left <= right,
        MarkerOp::Greater => left > right,
        MarkerOp::GreaterEqual => left >= right,
        MarkerOp::Compatible => false,
    }
}

// ============================================================================
// Tokenizer and parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Op(MarkerOp),
    And,
    Or,
    Not,
    In,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{}'", s),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Op(op) => format!("operator '{}'", op.as_str()),
            Token::And => "'and'".to_string(),
            Token::Or => "'or'".to_string(),
            Token::Not => "'not'".to_string(),
            Token::In => "'in'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let err = |message: String| CaptionKitError::Marker {
        marker: input.to_string(),
        message,
    };
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| *ch == quote)
                    .map(|p| start + p)
                    .ok_or_else(|| err("unterminated string".to_string()))?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
                let (op, len) = if rest.starts_with("===") {
                    (MarkerOp::ArbitraryEqual, 3)
                } else if rest.starts_with("==") {
                    (MarkerOp::Equal, 2)
                } else if rest.starts_with("!=") {
                    (MarkerOp::NotEqual, 2)
                } else if rest.starts_with("<=") {
                    (MarkerOp::LessEqual, 2)
                } else if rest.starts_with(">=") {
                    (MarkerOp::GreaterEqual, 2)
                } else if rest.starts_with("~=") {
                    (MarkerOp::Compatible, 2)
                } else if rest.starts_with('<') {
                    (MarkerOp::Less, 1)
                } else if rest.starts_with('>') {
                    (MarkerOp::Greater, 1)
                } else {
                    return Err(err(format!("invalid operator at '{}'", rest)));
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(err(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: String) -> CaptionKitError {
        CaptionKitError::Marker {
            marker: self.source.to_string(),
            message,
        }
    }

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

    fn parse_or(&mut self) -> Result<Marker> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Marker::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Marker> {
        let mut items = vec![self.parse_atom()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            items.push(self.parse_atom()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Marker::And(items)
        })
    }

    fn parse_atom(&mut self) -> Result<Marker> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(self.error("expected ')'".to_string())),
            };
        }

        let lhs = self.parse_value()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            Some(Token::In) => MarkerOp::In,
            Some(Token::Not) => match self.next() {
                Some(Token::In) => MarkerOp::NotIn,
                _ => return Err(self.error("expected 'in' after 'not'".to_string())),
            },
            Some(other) => {
                return Err(self.error(format!("expected operator, found {}", other.describe())))
            }
            None => return Err(self.error("expected operator, found end of marker".to_string())),
        };
        let rhs = self.parse_value()?;

        if matches!(
            (&lhs, &rhs),
            (MarkerValue::Literal(_), MarkerValue::Literal(_))
        ) {
            debug!("Marker compares two literals: {}", self.source);
        }

        Ok(Marker::Compare { lhs, op, rhs })
    }

    fn parse_value(&mut self) -> Result<MarkerValue> {
        match self.next() {
            Some(Token::Str(s)) => Ok(MarkerValue::Literal(s)),
            Some(Token::Ident(name)) => MarkerVariable::from_name(&name)
                .map(MarkerValue::Variable)
                .ok_or_else(|| self.error(format!("unknown marker variable '{}'", name))),
            Some(other) => Err(self.error(format!(
                "expected variable or string, found {}",
                other.describe()
            ))),
            None => Err(self.error("expected variable or string, found end of marker".to_string())),
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Values of every marker variable for one target environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerEnvironment {
    pub python_version: String,
    pub python_full_version: String,
    pub os_name: String,
    pub sys_platform: String,
    pub platform_release: String,
    pub platform_system: String,
    pub platform_version: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub implementation_name: String,
    pub implementation_version: String,
    #[serde(default)]
    pub extra: String,
}

impl MarkerEnvironment {
    /// Environment for a `platform_system` value ("Windows", "Linux", "Darwin")
    /// and a Python version ("3.11" or "3.11.4").
    pub fn for_platform(platform_system: &str, python_version: &str) -> Self {
        let (os_name, sys_platform, machine) = match platform_system {
            "Windows" => ("nt", "win32", "AMD64"),
            "Darwin" => ("posix", "darwin", "arm64"),
            _ => ("posix", "linux", "x86_64"),
        };
        let parsed = Version::parse(python_version);
        let short = parsed
            .as_ref()
            .map(Version::major_minor)
            .unwrap_or_else(|| python_version.to_string());
        let full = match parsed.as_ref().map(|v| v.release().len()) {
            Some(n) if n >= 3 => python_version.to_string(),
            _ => format!("{}.0", short),
        };

        Self {
            python_version: short,
            python_full_version: full.clone(),
            os_name: os_name.to_string(),
            sys_platform: sys_platform.to_string(),
            platform_release: String::new(),
            platform_system: platform_system.to_string(),
            platform_version: String::new(),
            platform_machine: machine.to_string(),
            platform_python_implementation: "CPython".to_string(),
            implementation_name: "cpython".to_string(),
            implementation_version: full,
            extra: String::new(),
        }
    }

    /// Environment of the machine this process runs on.
    pub fn host(python_version: &str) -> Self {
        let system = match std::env::consts::OS {
            "windows" => "Windows",
            "macos" => "Darwin",
            "linux" => "Linux",
            other => other,
        };
        let mut env = Self::for_platform(system, python_version);
        env.platform_machine = match (std::env::consts::OS, std::env::consts::ARCH) {
            ("windows", "x86_64") => "AMD64".to_string(),
            ("macos", "aarch64") => "arm64".to_string(),
            (_, arch) => arch.to_string(),
        };
        env
    }

    /// Look up a variable's value.
    pub fn get(&self, variable: MarkerVariable) -> &str {
        match variable {
            MarkerVariable::PythonVersion => &self.python_version,
            MarkerVariable::PythonFullVersion => &self.python_full_version,
            MarkerVariable::OsName => &self.os_name,
            MarkerVariable::SysPlatform => &self.sys_platform,
            MarkerVariable::PlatformRelease => &self.platform_release,
            MarkerVariable::PlatformSystem => &self.platform_system,
            MarkerVariable::PlatformVersion => &self.platform_version,
            MarkerVariable::PlatformMachine => &self.platform_machine,
            MarkerVariable::PlatformPythonImplementation => &self.platform_python_implementation,
            MarkerVariable::ImplementationName => &self.implementation_name,
            MarkerVariable::ImplementationVersion => &self.implementation_version,
            MarkerVariable::Extra => &self.extra,
        }
    }
}

/// Ask a local interpreter for its version (`python3`, then `python`).
///
/// Returns `None` when no interpreter can be run.
pub async fn detect_python_version() -> Option<String> {
    for program in ["python3", "python"] {
        let output = tokio::process::Command::new(program)
            .args([
                "-c",
                "import sys; print('%d.%d.%d' % sys.version_info[:3])",
            ])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if Version::parse(&version).is_some() {
                    debug!("Detected Python {} via {}", version, program);
                    return Some(version);
                }
            }
            Ok(_) => debug!("{} exited unsuccessfully", program),
            Err(e) => debug!("Failed to run {}: {}", program, e),
        }
    }
    None
}
