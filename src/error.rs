//! Error taxonomy shared by every component.

use std::fmt;

use serde::Serialize;

/// Stable tag carried by every surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    TemplateParse,
    TemplateInvalid,
    ArtUnavailable,
    ArtTimeout,
    Cancelled,
    Persistence,
    Config,
    Io,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TemplateParse => "template-parse",
            ErrorKind::TemplateInvalid => "template-invalid",
            ErrorKind::ArtUnavailable => "art-unavailable",
            ErrorKind::ArtTimeout => "art-timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by component errors so callers can branch on the tag.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for crate::validation::ValidationError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

impl Classify for crate::templates::TemplateError {
    fn kind(&self) -> ErrorKind {
        match self {
            crate::templates::TemplateError::Parse { .. } => ErrorKind::TemplateParse,
            crate::templates::TemplateError::Invalid { .. } => ErrorKind::TemplateInvalid,
        }
    }
}
