//! Context-projection expression language.
//!
//! A small, deliberately inert grammar of dotted-path field access with
//! pipe-chained filters, evaluated over a `RunContext`. Never evaluates
//! host code.
//!
//! ```text
//! expr    := path ( '|' filter )*
//! path    := segment ( '.' segment )*
//! segment := ident | ident '[' index ']'
//! index   := uint
//! filter  := ident ( '(' arg (',' arg)* ')' )?
//! arg     := string | number | ident
//! ```

use serde_json::Value;
use std::fmt;

use crate::model::{Json, RunContext};

/// An error produced while parsing or evaluating a projection expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// The expression text could not be parsed.
    #[error("malformed projection expression at byte {pos}: {reason}")]
    Malformed {
        /// Byte offset of the failure.
        pos: usize,
        /// Human-readable reason.
        reason: String,
    },
    /// An unknown filter name was referenced.
    #[error("unknown filter: {0}")]
    UnknownFilter(String),
    /// A filter was called with the wrong argument count or types.
    #[error("invalid arguments to filter {0}")]
    InvalidFilterArgs(String),
}

/// One segment of a dotted path: either a bare field name or an indexed one.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Field(String),
    Index(String, usize),
}

#[derive(Debug, Clone, PartialEq)]
enum FilterArg {
    Str(String),
    Num(f64),
    Ident(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    name: String,
    args: Vec<FilterArg>,
}

/// A parsed, reusable projection expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    path: Vec<PathSegment>,
    filters: Vec<Filter>,
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match seg {
                PathSegment::Field(name) => write!(f, "{name}")?,
                PathSegment::Index(name, idx) => write!(f, "{name}[{idx}]")?,
            }
        }
        for filt in &self.filters {
            write!(f, " | {}", filt.name)?;
        }
        Ok(())
    }
}

impl Projection {
    /// Parses a projection expression, returning a reusable handle.
    pub fn parse(src: &str) -> Result<Self, ProjectionError> {
        let mut parser = Parser::new(src);
        let path = parser.parse_path()?;
        let mut filters = Vec::new();
        loop {
            parser.skip_ws();
            if parser.eof() {
                break;
            }
            parser.expect_char('|')?;
            filters.push(parser.parse_filter()?);
        }
        if path.is_empty() {
            return Err(ProjectionError::Malformed {
                pos: 0,
                reason: "empty path".to_string(),
            });
        }
        Ok(Self { path, filters })
    }

    /// Evaluates this projection against a run context, returning the
    /// selected (and filtered) JSON value, or `Value::Null` if the path
    /// does not resolve and no `default` filter recovers it.
    pub fn evaluate(&self, ctx: &RunContext) -> Result<Json, ProjectionError> {
        let root = serde_json::json!({
            "bag": ctx.bag,
            // node outputs are addressed by their own id as the first path
            // segment, e.g. `node_a.output`
        });
        let mut current = self.resolve_root(&root, ctx);
        for filter in &self.filters {
            current = apply_filter(filter, current)?;
        }
        Ok(current)
    }

    fn resolve_root(&self, root: &Json, ctx: &RunContext) -> Json {
        let first = match self.path.first() {
            Some(PathSegment::Field(name)) => name.as_str(),
            Some(PathSegment::Index(name, _)) => name.as_str(),
            None => return Value::Null,
        };

        let mut current = if first == "bag" {
            root.get("bag").cloned().unwrap_or(Value::Null)
        } else if let Some(output) = ctx.outputs.get(first) {
            output.clone()
        } else {
            Value::Null
        };

        // walk remaining segments (skip the first, already consumed above)
        for seg in self.path.iter().skip(1) {
            current = step(&current, seg);
        }
        // if the path was a single segment that was itself indexed, apply index
        if self.path.len() == 1 {
            if let PathSegment::Index(_, idx) = &self.path[0] {
                current = index_into(&current, *idx);
            }
        }
        current
    }
}

fn step(value: &Json, seg: &PathSegment) -> Json {
    match seg {
        PathSegment::Field(name) => value.get(name).cloned().unwrap_or(Value::Null),
        PathSegment::Index(name, idx) => {
            let field = value.get(name).cloned().unwrap_or(Value::Null);
            index_into(&field, *idx)
        }
    }
}

fn index_into(value: &Json, idx: usize) -> Json {
    value.get(idx).cloned().unwrap_or(Value::Null)
}

fn apply_filter(filter: &Filter, input: Json) -> Result<Json, ProjectionError> {
    match filter.name.as_str() {
        "default" => {
            if input.is_null() {
                match filter.args.first() {
                    Some(FilterArg::Str(s)) => Ok(Value::String(s.clone())),
                    Some(FilterArg::Num(n)) => Ok(serde_json::json!(n)),
                    Some(FilterArg::Ident(i)) => Ok(Value::String(i.clone())),
                    None => Err(ProjectionError::InvalidFilterArgs("default".to_string())),
                }
            } else {
                Ok(input)
            }
        }
        "to_string" => Ok(Value::String(match input {
            Value::String(s) => s,
            other => other.to_string(),
        })),
        "to_number" => {
            let n = match &input {
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::String(s) => s.parse::<f64>().unwrap_or(0.0),
                _ => 0.0,
            };
            Ok(serde_json::json!(n))
        }
        "truncate" => {
            let n = match filter.args.first() {
                Some(FilterArg::Num(n)) => *n as usize,
                _ => return Err(ProjectionError::InvalidFilterArgs("truncate".to_string())),
            };
            let s = match input {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Value::String(s.chars().take(n).collect()))
        }
        "json_encode" => Ok(Value::String(input.to_string())),
        other => Err(ProjectionError::UnknownFilter(other.to_string())),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while !self.eof() && self.src.as_bytes()[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn expect_char(&mut self, c: char) -> Result<(), ProjectionError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(ProjectionError::Malformed {
                pos: self.pos,
                reason: format!("expected '{c}'"),
            })
        }
    }

    fn parse_ident(&mut self) -> Result<String, ProjectionError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(ProjectionError::Malformed {
                pos: self.pos,
                reason: "expected identifier".to_string(),
            });
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_path(&mut self) -> Result<Vec<PathSegment>, ProjectionError> {
        let mut segments = Vec::new();
        loop {
            let name = self.parse_ident()?;
            if self.peek() == Some('[') {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let idx: usize = self.src[start..self.pos].parse().map_err(|_| {
                    ProjectionError::Malformed {
                        pos: start,
                        reason: "expected unsigned integer index".to_string(),
                    }
                })?;
                self.expect_char(']')?;
                segments.push(PathSegment::Index(name, idx));
            } else {
                segments.push(PathSegment::Field(name));
            }
            if self.peek() == Some('.') {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok(segments)
    }

    fn parse_filter(&mut self) -> Result<Filter, ProjectionError> {
        self.skip_ws();
        let name = self.parse_ident()?;
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                self.skip_ws();
                if self.peek() == Some(')') {
                    break;
                }
                args.push(self.parse_arg()?);
                self.skip_ws();
                if self.peek() == Some(',') {
                    self.pos += 1;
                    continue;
                }
                break;
            }
            self.expect_char(')')?;
        }
        Ok(Filter { name, args })
    }

    fn parse_arg(&mut self) -> Result<FilterArg, ProjectionError> {
        self.skip_ws();
        match self.peek() {
            Some('"') => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != '"') {
                    self.pos += 1;
                }
                let s = self.src[start..self.pos].to_string();
                self.expect_char('"')?;
                Ok(FilterArg::Str(s))
            }
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let start = self.pos;
                if c == '-' {
                    self.pos += 1;
                }
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.')
                {
                    self.pos += 1;
                }
                self.src[start..self.pos]
                    .parse::<f64>()
                    .map(FilterArg::Num)
                    .map_err(|_| ProjectionError::Malformed {
                        pos: start,
                        reason: "expected number".to_string(),
                    })
            }
            Some(_) => self.parse_ident().map(FilterArg::Ident),
            None => Err(ProjectionError::Malformed {
                pos: self.pos,
                reason: "expected argument".to_string(),
            }),
        }
    }
}
