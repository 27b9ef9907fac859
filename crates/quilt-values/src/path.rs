//! Structural addressing within a value.
//!
//! ```text
//! path  := part*
//! part  := '.' fieldName
//!        | '[' indexValue ']' ('@key')?
//!        | '@type' | '@target' | '@at(' int ')' ('@key')?
//! indexValue := number | '"' escapedStr '"' | 'true' | 'false' | '#' hash
//! ```
//!
//! `@key` resolves the preceding index to the key instead of the value
//! (maps) or to the member itself (sets). `@at(n)` indexes by position,
//! negative counting from the end. `@target` dereferences a ref through
//! the store. `@type` yields the type of the current value.

use quilt_hash::Address;

use crate::error::{ValueError, ValueResult};
use crate::store::ValueReader;
use crate::value::Value;

/// One step of a path.
#[derive(Clone, Debug, PartialEq)]
pub enum PathPart {
    /// `.name` into a struct field.
    Field(String),
    /// `[index]` into a map (by key), list (by position), or set (by
    /// member).
    Index { key: Value, into_key: bool },
    /// `[#hash]` into a map or set by the key's address.
    HashIndex { hash: Address, into_key: bool },
    /// `@at(n)` by ordinal position; negative counts from the end.
    AtIndex { index: i64, into_key: bool },
    /// `@type`.
    Type,
    /// `@target` through a ref.
    Target,
}

/// A parsed path: a sequence of parts applied left to right.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Path(Vec<PathPart>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parts(&self) -> &[PathPart] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one more part.
    pub fn join(&self, part: PathPart) -> Self {
        let mut parts = self.0.clone();
        parts.push(part);
        Self(parts)
    }

    /// Parse a path string.
    pub fn parse(input: &str) -> ValueResult<Self> {
        if input.is_empty() {
            return Err(ValueError::PathParse("empty path".into()));
        }
        let mut parts = Vec::new();
        let mut rest = input;
        while !rest.is_empty() {
            rest = parse_part(rest, &mut parts)?;
        }
        Ok(Self(parts))
    }

    /// Resolve against a value. `None` means some step had nothing to
    /// produce (missing field, absent key, index out of range).
    pub fn resolve(&self, value: &Value, store: &dyn ValueReader) -> ValueResult<Option<Value>> {
        let mut current = value.clone();
        for part in &self.0 {
            match resolve_part(part, &current, store)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

fn parse_part<'a>(input: &'a str, parts: &mut Vec<PathPart>) -> ValueResult<&'a str> {
    let mut chars = input.chars();
    match chars.next() {
        Some('.') => {
            let rest = chars.as_str();
            let end = rest
                .char_indices()
                .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let name = &rest[..end];
            if !crate::structs::is_valid_field_name(name) {
                return Err(ValueError::PathParse(format!("invalid field: {rest:?}")));
            }
            parts.push(PathPart::Field(name.to_string()));
            Ok(&rest[end..])
        }
        Some('[') => {
            let rest = chars.as_str();
            let (part, rest) = parse_index(rest)?;
            parts.push(part);
            Ok(rest)
        }
        Some('@') => {
            let rest = chars.as_str();
            let end = rest
                .char_indices()
                .find(|(_, c)| !c.is_ascii_lowercase())
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let annotation = &rest[..end];
            let rest = &rest[end..];
            match annotation {
                "type" => {
                    parts.push(PathPart::Type);
                    Ok(rest)
                }
                "target" => {
                    parts.push(PathPart::Target);
                    Ok(rest)
                }
                "at" => {
                    let rest = rest.strip_prefix('(').ok_or_else(|| {
                        ValueError::PathParse("@at requires a position argument".into())
                    })?;
                    let close = rest.find(')').ok_or_else(|| {
                        ValueError::PathParse("@at( is missing closing )".into())
                    })?;
                    let index: i64 = rest[..close].trim().parse().map_err(|_| {
                        ValueError::PathParse(format!("invalid position: {}", &rest[..close]))
                    })?;
                    parts.push(PathPart::AtIndex {
                        index,
                        into_key: false,
                    });
                    Ok(&rest[close + 1..])
                }
                "key" => {
                    match parts.last_mut() {
                        Some(PathPart::Index { into_key, .. })
                        | Some(PathPart::HashIndex { into_key, .. })
                        | Some(PathPart::AtIndex { into_key, .. }) => *into_key = true,
                        _ => {
                            return Err(ValueError::PathParse(
                                "@key must follow an index".into(),
                            ))
                        }
                    }
                    Ok(rest)
                }
                other => Err(ValueError::PathParse(format!(
                    "unknown annotation: @{other}"
                ))),
            }
        }
        Some(c) => Err(ValueError::PathParse(format!(
            "invalid operator: {c}"
        ))),
        None => Ok(""),
    }
}

fn parse_index(input: &str) -> ValueResult<(PathPart, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return Err(ValueError::PathParse("path ends in [".into()));
    }

    if let Some(rest) = input.strip_prefix('#') {
        let close = rest
            .find(']')
            .ok_or_else(|| ValueError::PathParse("[ is missing closing ]".into()))?;
        let hash: Address = rest[..close]
            .parse()
            .map_err(|e| ValueError::PathParse(format!("invalid hash: {e}")))?;
        return Ok((
            PathPart::HashIndex {
                hash,
                into_key: false,
            },
            &rest[close + 1..],
        ));
    }

    if let Some(rest) = input.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = rest.char_indices();
        loop {
            match chars.next() {
                Some((i, '"')) => {
                    let rest = &rest[i + 1..];
                    let rest = rest.strip_prefix(']').ok_or_else(|| {
                        ValueError::PathParse("[ is missing closing ]".into())
                    })?;
                    return Ok((
                        PathPart::Index {
                            key: Value::String(out),
                            into_key: false,
                        },
                        rest,
                    ));
                }
                Some((_, '\\')) => match chars.next() {
                    Some((_, c @ ('"' | '\\'))) => out.push(c),
                    _ => {
                        return Err(ValueError::PathParse(
                            "invalid escape in string index".into(),
                        ))
                    }
                },
                Some((_, c)) => out.push(c),
                None => {
                    return Err(ValueError::PathParse(
                        "unterminated string index".into(),
                    ))
                }
            }
        }
    }

    let close = input
        .find(']')
        .ok_or_else(|| ValueError::PathParse("[ is missing closing ]".into()))?;
    let token = input[..close].trim();
    let key = match token {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => {
            let n: f64 = other
                .parse()
                .map_err(|_| ValueError::PathParse(format!("invalid index: {other:?}")))?;
            Value::Number(n)
        }
    };
    Ok((
        PathPart::Index {
            key,
            into_key: false,
        },
        &input[close + 1..],
    ))
}

fn resolve_part(
    part: &PathPart,
    value: &Value,
    store: &dyn ValueReader,
) -> ValueResult<Option<Value>> {
    match part {
        PathPart::Field(name) => Ok(match value {
            Value::Struct(s) => s.get(name).cloned(),
            _ => None,
        }),
        PathPart::Index { key, into_key } => match value {
            Value::Map(m) => {
                let entry = m
                    .entries(store)?
                    .into_iter()
                    .find(|e| &e.key == key);
                Ok(entry.map(|e| if *into_key { e.key } else { e.value }))
            }
            Value::List(l) => match key {
                Value::Number(n) if n.fract() == 0.0 => l.item_at(store, *n as i64),
                _ => Ok(None),
            },
            Value::Set(s) => Ok(if s.has(store, key)? {
                Some(key.clone())
            } else {
                None
            }),
            _ => Ok(None),
        },
        PathPart::HashIndex { hash, into_key } => match value {
            Value::Map(m) => Ok(m
                .entry_by_key_address(store, *hash)?
                .map(|e| if *into_key { e.key } else { e.value })),
            Value::Set(s) => s.member_by_address(store, *hash),
            _ => Ok(None),
        },
        PathPart::AtIndex { index, into_key } => match value {
            Value::List(l) => l.item_at(store, *index),
            Value::Map(m) => Ok(m
                .entry_at(store, *index)?
                .map(|e| if *into_key { e.key } else { e.value })),
            Value::Set(s) => s.member_at(store, *index),
            _ => Ok(None),
        },
        PathPart::Type => Ok(Some(Value::Type(value.type_of()))),
        PathPart::Target => match value {
            Value::Ref(r) => Ok(Some(store.read_value(&r.address())?)),
            _ => Ok(None),
        },
    }
}

impl std::fmt::Display for PathPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathPart::Field(name) => write!(f, ".{name}"),
            PathPart::Index { key, into_key } => {
                match key {
                    Value::Bool(b) => write!(f, "[{b}]")?,
                    Value::Number(n) => write!(f, "[{n}]")?,
                    Value::String(s) => write!(f, "[{:?}]", s)?,
                    other => write!(f, "[#{}]", other.address())?,
                }
                if *into_key {
                    write!(f, "@key")?;
                }
                Ok(())
            }
            PathPart::HashIndex { hash, into_key } => {
                write!(f, "[#{hash}]")?;
                if *into_key {
                    write!(f, "@key")?;
                }
                Ok(())
            }
            PathPart::AtIndex { index, into_key } => {
                write!(f, "@at({index})")?;
                if *into_key {
                    write!(f, "@key")?;
                }
                Ok(())
            }
            PathPart::Type => write!(f, "@type"),
            PathPart::Target => write!(f, "@target"),
        }
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for part in &self.0 {
            write!(f, "{part}")?;
        }
        Ok(())
    }
}
