//! Script templates with named placeholders
//!
//! A template is remote-shell source text containing `{{Name}}` (or
//! `{{.Name}}`) placeholders. Arguments are any `Serialize` record whose
//! fields map 1:1 onto the placeholders. Substitution is literal: values are
//! not escaped for the target shell, so callers must make sure they cannot
//! break out of the surrounding quoting.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Errors raised while rendering a template
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Placeholder refers to a field the arguments do not have
    #[error("template {template}: no field `{field}` in arguments")]
    MissingField {
        /// Template name
        template: String,
        /// Placeholder name
        field: String,
    },

    /// Unterminated or empty placeholder
    #[error("template {template}: malformed placeholder at byte {offset}")]
    Syntax {
        /// Template name
        template: String,
        /// Byte offset of the opening braces
        offset: usize,
    },

    /// Arguments did not serialize to a flat record
    #[error("template {template}: arguments must serialize to a record: {reason}")]
    InvalidArgs {
        /// Template name
        template: String,
        /// Why the arguments were rejected
        reason: String,
    },
}

/// A named, parameterised remote script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template<'a> {
    name: &'a str,
    source: &'a str,
}

impl<'a> Template<'a> {
    /// Create a template from source text
    #[must_use]
    pub const fn new(name: &'a str, source: &'a str) -> Self {
        Self { name, source }
    }

    /// Template name used in diagnostics
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Raw template source
    #[must_use]
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Render this template
    ///
    /// # Errors
    /// See [`render`]
    pub fn render<A: Serialize + ?Sized>(&self, args: &A) -> Result<RenderedScript, TemplateError> {
        render_named(self.name, self.source, args)
    }
}

/// Fully substituted script text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedScript(String);

impl RenderedScript {
    /// Wrap already-final script text
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Script text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the script text
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RenderedScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a template with the given arguments
///
/// Pure and deterministic: the same template and arguments always produce
/// the same text.
///
/// # Errors
/// Returns `TemplateError::MissingField` when a placeholder names a field the
/// arguments lack, `TemplateError::Syntax` for an unterminated or empty
/// placeholder and `TemplateError::InvalidArgs` when `args` is not a record.
pub fn render<A: Serialize + ?Sized>(
    template: &Template<'_>,
    args: &A,
) -> Result<RenderedScript, TemplateError> {
    template.render(args)
}

fn render_named<A: Serialize + ?Sized>(
    name: &str,
    source: &str,
    args: &A,
) -> Result<RenderedScript, TemplateError> {
    let fields = to_record(name, args)?;

    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    let mut consumed = 0;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            return Err(TemplateError::Syntax {
                template: name.to_string(),
                offset: consumed + start,
            });
        };

        let key = after_open[..end].trim();
        let key = key.strip_prefix('.').unwrap_or(key);
        if key.is_empty() || key.contains(char::is_whitespace) || key.contains(OPEN) {
            return Err(TemplateError::Syntax {
                template: name.to_string(),
                offset: consumed + start,
            });
        }

        let value = fields.get(key).ok_or_else(|| TemplateError::MissingField {
            template: name.to_string(),
            field: key.to_string(),
        })?;
        push_value(&mut out, value);

        let advance = start + OPEN.len() + end + CLOSE.len();
        consumed += advance;
        rest = &rest[advance..];
    }
    out.push_str(rest);

    Ok(RenderedScript(out))
}

fn to_record<A: Serialize + ?Sized>(name: &str, args: &A) -> Result<Map<String, Value>, TemplateError> {
    match serde_json::to_value(args) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(TemplateError::InvalidArgs {
            template: name.to_string(),
            reason: format!("got {}", kind_of(&other)),
        }),
        Err(e) => Err(TemplateError::InvalidArgs {
            template: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Null => {}
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            out.push_str(&value.to_string());
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
