use thiserror::Error;

/// Errors raised by field and polynomial operations.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FieldError {
    #[error("attempted to invert zero")]
    NotInvertible,
    #[error("interpolation needs at least one point")]
    EmptyPointSet,
    #[error("duplicate x-coordinate {0} in point set")]
    DuplicateXCoordinate(u128),
}
