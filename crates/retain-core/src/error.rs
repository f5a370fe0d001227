use thiserror::Error;

use crate::runtime::FramePhase;

/// Errors raised by the state store.
///
/// A type mismatch means two different widget kinds resolved to the same key.
/// It is a bug in identity allocation, so callers should stop the frame rather
/// than paper over it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state '{key}' holds a {stored}, but a {requested} was requested")]
    TypeMismatch {
        key: String,
        stored: &'static str,
        requested: &'static str,
    },
}

/// Errors raised by the frame runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("{operation} is not allowed while the runtime is {phase}")]
    Phase {
        operation: &'static str,
        phase: FramePhase,
    },
    #[error(transparent)]
    State(#[from] StateError),
}
