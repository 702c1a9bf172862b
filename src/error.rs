use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stable error-kind tag so callers can route diagnostics without matching
/// on every concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    Semantic,
    EngineCompat,
    Io,
}

/// A position in the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Span { line, column }
    }
}

/// Errors raised by the parser or by file-based entry points.
///
/// The validator does not raise these: it returns a `Report` of
/// `Diagnostic`s instead, since it must surface every violation in one pass.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("duplicate property '{key}' on element '{element_id}'")]
    DuplicateKey { element_id: String, key: String },

    #[error("element '{element_id}' is missing required field '{field}'")]
    MissingRequiredField { element_id: String, field: String },

    #[error("missing OpenAPI sidecar for '{stem}' (expected {stem}.yaml or {stem}.yml)")]
    MissingOpenApi { stem: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl CompileError {
    pub fn syntax(span: Span, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Syntax { .. } => ErrorKind::Syntax,
            CompileError::DuplicateKey { .. } | CompileError::MissingRequiredField { .. } => {
                ErrorKind::Semantic
            }
            CompileError::MissingOpenApi { .. } | CompileError::Io(_) => ErrorKind::Io,
        }
    }
}

/// One validator finding. `rule` is a stable short code (`"V1"`..`"V9"`)
/// so callers can filter or suppress specific checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub rule: &'static str,
    pub message: String,
    pub element_id: Option<String>,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, rule: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            rule,
            message: message.into(),
            element_id: None,
            span: None,
        }
    }

    pub fn with_element(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Validator output. Exhaustive: every violation found in one pass, never
/// just the first one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Report {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
