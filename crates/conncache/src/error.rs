//! Error types for conncache

use std::fmt;

/// Result type alias for conncache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while opening a cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A configuration value is out of range
    InvalidConfig(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid cache config: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Failure of [`ConnCache::put`](crate::ConnCache::put).
///
/// The rejected payload travels back inside the error, so the caller keeps
/// ownership of the connection and is responsible for closing it.
#[derive(PartialEq, Eq)]
pub enum PutError<T> {
    /// Every slot of the cache is occupied by a live entry
    CapacityExhausted(T),
}

impl<T> PutError<T> {
    /// Recover the payload that could not be cached
    pub fn into_inner(self) -> T {
        match self {
            PutError::CapacityExhausted(payload) => payload,
        }
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::CapacityExhausted(_) => f.write_str("CapacityExhausted(..)"),
        }
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::CapacityExhausted(_) => write!(f, "Connection cache is full"),
        }
    }
}

impl<T> std::error::Error for PutError<T> {}
