//! Key paths and nested document addressing.
//!
//! A key path names one root key (the stored entry) plus an optional
//! remainder addressing a field inside that entry's document. Paths are
//! written either as dotted strings (`user.address[0].city`,
//! `prefs["ui.theme"]`) or as explicit segment lists.
//!
//! The codec operates on `serde_json::Value` trees:
//!
//! - [`read`] never mutates and returns `None` on any miss.
//! - [`write`] creates missing intermediates: an array when the next segment
//!   is an index, an object otherwise. Scalars in the way are replaced.
//! - [`remove`] deletes object fields but only nulls array slots, so arrays
//!   keep their length.

use serde_json::{Map, Value};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::ValidationError;

/// Largest array index a path may address. Writes pad arrays with `null`
/// up to the index, so this bounds allocation.
pub const MAX_ARRAY_INDEX: usize = 1 << 20;

// ============================================================================
// KEY PATH
// ============================================================================

/// A caller-supplied key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPath {
    /// `a.b[0].c` notation.
    Dotted(String),
    /// Explicit segments; the first is the root key.
    Segments(Vec<String>),
}

/// One step into a document below the root key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// A validated path: root key plus typed remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub root: String,
    pub rest: Vec<Segment>,
}

impl ResolvedPath {
    /// True when the path addresses the whole root document.
    pub fn is_root(&self) -> bool {
        self.rest.is_empty()
    }
}

/// Outcome of [`remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Whether the document was mutated.
    pub removed: bool,
    /// Whether the document is now an empty object (or was removed whole).
    pub remaining_empty: bool,
}

impl KeyPath {
    /// The root key: the first segment, or the prefix before the first `.`
    /// or `[`. Empty input yields an empty string.
    pub fn root_key(&self) -> String {
        match self {
            KeyPath::Dotted(path) => {
                let end = path.find(['.', '[']).unwrap_or(path.len());
                path[..end].to_string()
            }
            KeyPath::Segments(segments) => segments.first().cloned().unwrap_or_default(),
        }
    }

    /// Split into root key and typed remainder.
    ///
    /// Fails when the root key is empty or the remainder is malformed.
    pub fn resolve(&self) -> Result<ResolvedPath, ValidationError> {
        let root = self.root_key();
        if root.is_empty() {
            return Err(self.invalid("root key is empty"));
        }

        let rest = match self {
            KeyPath::Dotted(path) => {
                let remainder = &path[root.len()..];
                if remainder.is_empty() {
                    Vec::new()
                } else if let Some(after_dot) = remainder.strip_prefix('.') {
                    tokenize(after_dot).map_err(|reason| self.invalid(reason))?
                } else {
                    tokenize(remainder).map_err(|reason| self.invalid(reason))?
                }
            }
            KeyPath::Segments(segments) => segments[1..]
                .iter()
                .map(|s| Segment::from_unquoted(s))
                .collect(),
        };

        if rest
            .iter()
            .any(|s| matches!(s, Segment::Index(i) if *i > MAX_ARRAY_INDEX))
        {
            return Err(self.invalid("array index too large"));
        }

        Ok(ResolvedPath { root, rest })
    }

    fn invalid(&self, reason: &str) -> ValidationError {
        ValidationError::InvalidKeyPath {
            path: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Dotted(path) => f.write_str(path),
            KeyPath::Segments(segments) => f.write_str(&segments.join(".")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Dotted(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Dotted(path)
    }
}

impl From<&String> for KeyPath {
    fn from(path: &String) -> Self {
        KeyPath::Dotted(path.clone())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        KeyPath::Segments(segments)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(segments: &[&str]) -> Self {
        KeyPath::Segments(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(segments: [&str; N]) -> Self {
        KeyPath::Segments(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&KeyPath> for KeyPath {
    fn from(path: &KeyPath) -> Self {
        path.clone()
    }
}

impl Segment {
    /// Digit-only segments without a leading zero are indices.
    fn from_unquoted(raw: &str) -> Self {
        let is_index = !raw.is_empty()
            && raw.bytes().all(|b| b.is_ascii_digit())
            && (raw == "0" || !raw.starts_with('0'));
        match raw.parse::<usize>() {
            Ok(index) if is_index => Segment::Index(index),
            _ => Segment::Field(raw.to_string()),
        }
    }

    fn object_key(&self) -> String {
        match self {
            Segment::Field(key) => key.clone(),
            Segment::Index(index) => index.to_string(),
        }
    }
}

// ============================================================================
// TOKENIZER
// ============================================================================

fn tokenize(input: &str) -> Result<Vec<Segment>, &'static str> {
    let mut segments = Vec::new();
    let mut buf = String::new();
    // A dotted segment is pending: at the start and after every '.'.
    let mut open = true;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if open {
                    segments.push(Segment::from_unquoted(&buf));
                    buf.clear();
                }
                open = true;
            }
            '[' => {
                if open && !buf.is_empty() {
                    segments.push(Segment::from_unquoted(&buf));
                    buf.clear();
                }
                segments.push(read_bracket(&mut chars)?);
                open = false;
            }
            ']' => return Err("unexpected ']'"),
            _ => {
                open = true;
                buf.push(c);
            }
        }
    }

    if open {
        segments.push(Segment::from_unquoted(&buf));
    }
    Ok(segments)
}

fn read_bracket(chars: &mut Peekable<Chars<'_>>) -> Result<Segment, &'static str> {
    match chars.peek().copied() {
        Some(quote @ ('"' | '\'')) => {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(escaped) => key.push(escaped),
                        None => return Err("unterminated quoted key"),
                    },
                    Some(c) if c == quote => break,
                    Some(c) => key.push(c),
                    None => return Err("unterminated quoted key"),
                }
            }
            match chars.next() {
                Some(']') => Ok(Segment::Field(key)),
                _ => Err("expected ']' after quoted key"),
            }
        }
        _ => {
            let mut raw = String::new();
            loop {
                match chars.next() {
                    Some(']') => break,
                    Some(c) => raw.push(c),
                    None => return Err("unterminated bracket"),
                }
            }
            let raw = raw.trim();
            if raw.is_empty() {
                return Err("empty bracket");
            }
            Ok(Segment::from_unquoted(raw))
        }
    }
}

// ============================================================================
// CODEC
// ============================================================================

/// Root key of a path (see [`KeyPath::root_key`]).
pub fn root_key(path: &KeyPath) -> String {
    path.root_key()
}

/// Read the value at `path` inside `doc`.
pub fn read<'a>(doc: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |node, segment| child(node, segment))
}

/// Write `value` at `path` inside `doc`, creating intermediates.
pub fn write(doc: &mut Value, path: &[Segment], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *doc = value;
        return;
    };

    let slot = match first {
        Segment::Index(index) => {
            if !doc.is_array() && !doc.is_object() {
                *doc = Value::Array(Vec::new());
            }
            match doc {
                Value::Array(items) => {
                    if items.len() <= *index {
                        items.resize(*index + 1, Value::Null);
                    }
                    &mut items[*index]
                }
                Value::Object(map) => map.entry(first.object_key()).or_insert(Value::Null),
                _ => return,
            }
        }
        Segment::Field(key) => {
            if !doc.is_object() {
                *doc = Value::Object(Map::new());
            }
            match doc {
                Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                _ => return,
            }
        }
    };

    write(slot, rest, value);
}

/// Remove the value at `path` inside `doc`.
///
/// Object fields are deleted; array slots are set to `null`. An empty path
/// removes the whole document.
pub fn remove(doc: &mut Value, path: &[Segment]) -> Removal {
    let Some((last, parents)) = path.split_last() else {
        *doc = Value::Null;
        return Removal {
            removed: true,
            remaining_empty: true,
        };
    };

    let removed = match parents
        .iter()
        .try_fold(&mut *doc, |node, segment| child_mut(node, segment))
    {
        Some(Value::Array(items)) => match last {
            Segment::Index(index) if *index < items.len() => {
                items[*index] = Value::Null;
                true
            }
            _ => false,
        },
        Some(Value::Object(map)) => map.remove(&last.object_key()).is_some(),
        _ => false,
    };

    Removal {
        removed,
        remaining_empty: is_empty_document(doc),
    }
}

/// True for an empty JSON object.
pub fn is_empty_document(doc: &Value) -> bool {
    matches!(doc, Value::Object(map) if map.is_empty())
}

fn child<'a>(node: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match (node, segment) {
        (Value::Array(items), Segment::Index(index)) => items.get(*index),
        (Value::Object(map), segment) => map.get(&segment.object_key()),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    match (node, segment) {
        (Value::Array(items), Segment::Index(index)) => items.get_mut(*index),
        (Value::Object(map), segment) => map.get_mut(&segment.object_key()),
        _ => None,
    }
}
