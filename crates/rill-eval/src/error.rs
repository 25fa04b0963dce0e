//! Evaluation and check errors.

use thiserror::Error;

use rill_core::context::ContextError;
use rill_core::filesystem::FsError;
use rill_core::manifest::{ManifestBuildError, ManifestError};
use rill_core::transaction::TransactionError;
use rill_core::value::SharingError;

use crate::ast::NodeSpan;

/// A failed `assert`. The pretty form carries source highlighting for the
/// CLI; the message is the plain fallback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AssertionError {
    pub message: String,
    pub pretty: String,
}

impl AssertionError {
    pub fn new(message: impl Into<String>, pretty: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pretty: pretty.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EvalErrorKind {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Sharing(#[from] SharingError),
    #[error(transparent)]
    Assertion(#[from] AssertionError),
    #[error("type error: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("values of type {kind} have no property '{name}'")]
    MissingProperty { kind: &'static str, name: String },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("unknown pattern '%{0}'")]
    UnknownPattern(String),
    #[error("index {index} is out of bounds (length {len})")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    IntOverflow,
    #[error("execution was cancelled")]
    Cancelled,
    #[error("lthread error: {0}")]
    LThread(String),
    #[error("not implemented yet: {0}")]
    NotImplementedYet(&'static str),
    #[error("{0}")]
    Other(String),
}

/// An evaluation error with the source position stack accumulated while it
/// propagated up the evaluator.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub spans: Vec<NodeSpan>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind) -> Self {
        Self {
            kind,
            spans: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: NodeSpan) -> Self {
        self.spans.push(span);
        self
    }

    pub fn assertion(&self) -> Option<&AssertionError> {
        match &self.kind {
            EvalErrorKind::Assertion(assertion) => Some(assertion),
            _ => None,
        }
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        EvalError::new(kind)
    }
}

macro_rules! eval_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for EvalError {
                fn from(err: $source) -> Self {
                    EvalError::new(err.into())
                }
            }
        )*
    };
}

eval_error_from!(
    ContextError,
    TransactionError,
    ManifestError,
    FsError,
    SharingError,
    AssertionError,
);

impl From<ManifestBuildError> for EvalError {
    fn from(err: ManifestBuildError) -> Self {
        match err {
            ManifestBuildError::Manifest(e) => EvalError::new(e.into()),
            ManifestBuildError::Context(e) => EvalError::new(e.into()),
        }
    }
}

/// A static-check diagnostic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CheckError {
    pub message: String,
    pub span: NodeSpan,
}

impl CheckError {
    pub fn new(message: impl Into<String>, span: NodeSpan) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}
