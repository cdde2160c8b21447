//! Path patterns
//!
//! A pattern is a `/`-separated list of segments. Each segment is either a
//! literal, matched case-sensitively, or a named parameter written `:name` or
//! `{name}` that binds exactly one non-empty request segment.
//!
//! ```
//! use scriptgate_server::path::PathPattern;
//!
//! let pattern = PathPattern::compile("/users/:id/posts/{post}").unwrap();
//! let params = pattern.matches("/users/42/posts/hello%20world").unwrap();
//! assert_eq!(params["id"], "42");
//! assert_eq!(params["post"], "hello world");
//! assert!(pattern.matches("/users/42").is_none());
//! ```

use std::collections::HashMap;
use std::fmt;

use scriptgate_common::protocol::{Result, ScriptgateError};

/// Parameters bound by a successful match, keyed by parameter name.
pub type Params = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled, immutable path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    /// Canonical form: trailing slash removed, parameters written `:name`
    canonical: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compiles `pattern`, rejecting malformed segments and repeated parameter names.
    pub fn compile(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(ScriptgateError::invalid_pattern(pattern, "pattern must start with '/'"));
        }

        let trimmed = normalize_path(pattern);
        let mut segments = Vec::new();

        for raw in split_segments(trimmed) {
            let segment = parse_segment(pattern, raw)?;
            if let Segment::Param(name) = &segment {
                let repeated = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(existing) if existing == name));
                if repeated {
                    return Err(ScriptgateError::invalid_pattern(
                        pattern,
                        format!("parameter '{}' repeats", name),
                    ));
                }
            }
            segments.push(segment);
        }

        let canonical = if segments.is_empty() {
            "/".to_string()
        } else {
            segments
                .iter()
                .map(|s| match s {
                    Segment::Literal(lit) => format!("/{}", lit),
                    Segment::Param(name) => format!("/:{}", name),
                })
                .collect()
        };

        Ok(Self {
            canonical,
            segments,
        })
    }

    /// Matches a request path, returning the bound parameters.
    ///
    /// Parameter values are percent-decoded; a segment that does not decode to
    /// valid UTF-8 is bound verbatim.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let parts: Vec<&str> = split_segments(normalize_path(path)).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), decode_segment(part));
                }
            }
        }

        Some(params)
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn param_names(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn param_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count()
    }

    /// True when the pattern has no parameter segments.
    pub fn is_exact(&self) -> bool {
        self.param_count() == 0
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Strips trailing slashes; `/` (and the empty path) become `/`.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn split_segments(normalized: &str) -> impl Iterator<Item = &str> {
    let rest = normalized.strip_prefix('/').unwrap_or(normalized);
    rest.split('/').filter(move |_| !rest.is_empty())
}

fn parse_segment(pattern: &str, raw: &str) -> Result<Segment> {
    if raw.is_empty() {
        return Err(ScriptgateError::invalid_pattern(pattern, "empty path segment"));
    }

    let name = if let Some(name) = raw.strip_prefix(':') {
        name
    } else if let Some(inner) = raw.strip_prefix('{') {
        inner.strip_suffix('}').ok_or_else(|| {
            ScriptgateError::invalid_pattern(pattern, format!("unbalanced braces in '{}'", raw))
        })?
    } else if raw.contains('{') || raw.contains('}') {
        return Err(ScriptgateError::invalid_pattern(
            pattern,
            format!("unbalanced braces in '{}'", raw),
        ));
    } else {
        return Ok(Segment::Literal(raw.to_string()));
    };

    validate_param_name(pattern, name)?;
    Ok(Segment::Param(name.to_string()))
}

fn validate_param_name(pattern: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(ScriptgateError::invalid_pattern(pattern, "empty parameter name"));
    };

    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ScriptgateError::invalid_pattern(
            pattern,
            format!("invalid parameter name '{}'", name),
        ));
    }
    Ok(())
}

fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
