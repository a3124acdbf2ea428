//! Filename templates (`[name].[contenthash:8].js`)
//!
//! A template is parsed once and can then be rendered to a concrete string
//! or compiled into a JavaScript string expression whose placeholders are
//! resolved by the emitted runtime.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\w+)(?::(\d+))?\]").expect("placeholder regex is valid"));

/// Substitutions a template may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Id,
    Name,
    ContentHash,
    FullHash,
    Runtime,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "contenthash" | "chunkhash" => Some(Self::ContentHash),
            "fullhash" | "hash" => Some(Self::FullHash),
            "runtime" => Some(Self::Runtime),
            _ => None,
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::ContentHash => "contenthash",
            Self::FullHash => "fullhash",
            Self::Runtime => "runtime",
        };
        write!(f, "[{}]", name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder [{name}] in template '{template}'")]
    UnknownPlaceholder { name: String, template: String },

    #[error("placeholder {placeholder} cannot be resolved in template '{template}'")]
    Unresolved {
        placeholder: Placeholder,
        template: String,
    },
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder { key: Placeholder, len: Option<usize> },
}

/// A parsed filename template
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template, rejecting unknown placeholders
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for cap in PLACEHOLDER_REGEX.captures_iter(source) {
            let whole = cap.get(0).expect("capture group 0 always exists");
            let name = &cap[1];
            let key = Placeholder::parse(name).ok_or_else(|| TemplateError::UnknownPlaceholder {
                name: name.to_string(),
                template: source.to_string(),
            })?;
            let len = cap.get(2).and_then(|m| m.as_str().parse().ok());

            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Placeholder { key, len });
            last = whole.end();
        }

        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Original template text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the template uses the given placeholder
    pub fn contains(&self, placeholder: Placeholder) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder { key, .. } if *key == placeholder))
    }

    /// Render to a concrete string
    pub fn render<F>(&self, resolve: F) -> Result<String, TemplateError>
    where
        F: Fn(Placeholder) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { key, len } => {
                    let value = resolve(*key).ok_or_else(|| self.unresolved(*key))?;
                    match len {
                        Some(n) => out.extend(value.chars().take(*n)),
                        None => out.push_str(&value),
                    }
                }
            }
        }

        Ok(out)
    }

    /// Compile to a JavaScript string expression; `resolve` yields JS expressions
    pub fn to_js_expr<F>(&self, resolve: F) -> Result<String, TemplateError>
    where
        F: Fn(Placeholder) -> Option<String>,
    {
        let mut parts = Vec::with_capacity(self.segments.len() + 1);

        if !matches!(self.segments.first(), Some(Segment::Literal(_))) {
            parts.push("\"\"".to_string());
        }

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    parts.push(serde_json::Value::String(text.clone()).to_string());
                }
                Segment::Placeholder { key, len } => {
                    let expr = resolve(*key).ok_or_else(|| self.unresolved(*key))?;
                    match len {
                        Some(n) => parts.push(format!("String({}).slice(0, {})", expr, n)),
                        None => parts.push(expr),
                    }
                }
            }
        }

        Ok(parts.join(" + "))
    }

    fn unresolved(&self, placeholder: Placeholder) -> TemplateError {
        TemplateError::Unresolved {
            placeholder,
            template: self.source.clone(),
        }
    }
}
