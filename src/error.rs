//! Error types for zedbase.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZedbaseError>;

#[derive(Error, Debug)]
pub enum ZedbaseError {
    /// The caller passed something unusable: an inverted range, a bad
    /// configuration value, malformed CLI arguments. Surfaced before any
    /// store operation is attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A store operation failed. The message names the operation and the
    /// offending table/row; partial writes already applied stay in place.
    #[error("store error: {0}")]
    Io(String),

    /// The persisted index or data cells are malformed. Fatal for the
    /// operation; the store should be treated as inconsistent.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Operation on a client that has already been closed.
    #[error("index is closed")]
    Closed,
}
