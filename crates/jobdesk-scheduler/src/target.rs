//! Invoke target parsing: `module.function` or `module.function(arg, ...)`.
//!
//! Arguments are literals only: quoted strings, integers, floats, booleans
//! (`true`/`false` or `True`/`False`) and nested `[...]` lists or `(...)`
//! tuples. Nothing is evaluated.

use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};
use std::sync::LazyLock;

use jobdesk_core::{truncate_chars, INVOKE_TARGET_MAX_CHARS};
use regex::Regex;

use crate::error::ValidationError;

/// Deepest `[`/`(` nesting accepted in an argument list.
pub const MAX_NESTING_DEPTH: usize = 32;

static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)\.(\w+)(?:\((?s:(.*))\))?$").expect("valid invoke target regex")
});

/// A literal argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<ArgValue>),
}

impl ArgValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Integers widen to floats.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::List(_) => "list",
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

/// Strings render bare at the top level and quoted inside lists.
impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A parsed invoke target.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeTarget {
    pub module: String,
    pub function: String,
    pub args: Vec<ArgValue>,
}

impl InvokeTarget {
    /// `module.function`, without arguments.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }
}

impl FromStr for InvokeTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_invoke_target(s)
    }
}

/// Parses an invoke target string.
///
/// # Errors
///
/// Returns [`ValidationError::InvokeTarget`] when the string is not
/// `identifier.identifier` with an optional parenthesised literal list, or
/// when any argument is not a literal. Targets longer than the stored column
/// or nested deeper than [`MAX_NESTING_DEPTH`] are rejected too.
pub fn parse_invoke_target(raw: &str) -> Result<InvokeTarget, ValidationError> {
    let len = raw.chars().count();
    if len > INVOKE_TARGET_MAX_CHARS {
        return Err(ValidationError::target(
            &format!("{}...", truncate_chars(raw, 64)),
            format!("longer than {INVOKE_TARGET_MAX_CHARS} characters ({len})"),
        ));
    }

    let trimmed = raw.trim();
    let caps = TARGET_RE.captures(trimmed).ok_or_else(|| {
        ValidationError::target(raw, "expected module.function or module.function(args)")
    })?;

    let args = match caps.get(3) {
        Some(list) => LiteralParser::new(list.as_str())
            .parse_arguments()
            .map_err(|reason| ValidationError::target(raw, reason))?,
        None => Vec::new(),
    };

    Ok(InvokeTarget {
        module: caps[1].to_string(),
        function: caps[2].to_string(),
        args,
    })
}

// ---------------------------------------------------------------------------
// Literal parser
// ---------------------------------------------------------------------------

struct LiteralParser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    depth: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            depth: 0,
        }
    }

    fn parse_arguments(mut self) -> Result<Vec<ArgValue>, String> {
        let (items, _) = self.parse_sequence(None)?;
        self.skip_ws();
        match self.chars.next() {
            None => Ok(items),
            Some((pos, c)) => Err(format!("unexpected {c:?} at offset {pos}")),
        }
    }

    /// Parses comma-separated values until `close` (or end of input when
    /// `close` is `None`). Returns the items and whether a comma was seen.
    fn parse_sequence(&mut self, close: Option<char>) -> Result<(Vec<ArgValue>, bool), String> {
        let mut items = Vec::new();
        let mut saw_comma = false;

        loop {
            self.skip_ws();
            match self.peek() {
                None if close.is_none() => return Ok((items, saw_comma)),
                None => {
                    return Err(format!(
                        "unterminated container, expected {:?}",
                        close.unwrap_or(')')
                    ))
                }
                Some(c) if Some(c) == close => {
                    self.chars.next();
                    return Ok((items, saw_comma));
                }
                Some(_) => {}
            }

            items.push(self.parse_value()?);
            self.skip_ws();

            match self.peek() {
                Some(',') => {
                    self.chars.next();
                    saw_comma = true;
                }
                Some(c) if Some(c) == close => {}
                None if close.is_none() => {}
                Some(c) => return Err(format!("expected ',' but found {c:?}")),
                None => {
                    return Err(format!(
                        "unterminated container, expected {:?}",
                        close.unwrap_or(')')
                    ))
                }
            }
        }
    }

    fn parse_value(&mut self) -> Result<ArgValue, String> {
        match self.peek() {
            Some('\'' | '"') => self.parse_string().map(ArgValue::Str),
            Some('[') => {
                let (items, _) = self.parse_nested(']')?;
                Ok(ArgValue::List(items))
            }
            Some('(') => {
                let (mut items, saw_comma) = self.parse_nested(')')?;
                // `(x)` is a parenthesised value, `(x,)` and `()` are tuples.
                if items.len() == 1 && !saw_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(ArgValue::List(items))
                }
            }
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_word(),
            Some(c) => Err(format!("unexpected {c:?}")),
            None => Err("expected a value".to_string()),
        }
    }

    /// Consumes an opening bracket and parses up to `close`.
    fn parse_nested(&mut self, close: char) -> Result<(Vec<ArgValue>, bool), String> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(format!(
                "arguments nested deeper than {MAX_NESTING_DEPTH} levels"
            ));
        }
        self.chars.next();
        self.depth += 1;
        let parsed = self.parse_sequence(Some(close));
        self.depth -= 1;
        parsed
    }

    fn parse_string(&mut self) -> Result<String, String> {
        let Some((start, quote)) = self.chars.next() else {
            return Err("expected a string".to_string());
        };
        let mut out = String::new();

        while let Some((_, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(out),
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, '0')) => out.push('\0'),
                    Some((_, e @ ('\\' | '\'' | '"'))) => out.push(e),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                other => out.push(other),
            }
        }

        Err(format!("unterminated string starting at offset {start}"))
    }

    fn parse_number(&mut self) -> Result<ArgValue, String> {
        let start = self.offset();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_') {
                self.chars.next();
            } else {
                break;
            }
        }
        let token = &self.src[start..self.offset()];
        let cleaned = token.replace('_', "");

        let is_float = cleaned.contains(['.', 'e', 'E']);
        if is_float {
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(ArgValue::Float)
                .ok_or_else(|| format!("invalid number {token:?}"))
        } else {
            cleaned
                .parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|e| format!("invalid integer {token:?}: {e}"))
        }
    }

    fn parse_word(&mut self) -> Result<ArgValue, String> {
        let start = self.offset();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.chars.next();
            } else {
                break;
            }
        }
        match &self.src[start..self.offset()] {
            "true" | "True" => Ok(ArgValue::Bool(true)),
            "false" | "False" => Ok(ArgValue::Bool(false)),
            word => Err(format!("{word:?} is not a literal")),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.src.len(), |&(i, _)| i)
    }
}
