//! Structured errors for the dict core: a concrete variant per boundary
//! instead of a formatted string, since this crate is not pinned to one
//! host process.

use thiserror::Error;

/// Failure kinds surfaced by the value codec (§4.2).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid UUID {0:?}: expected canonical 8-4-4-4-12 hex")]
    InvalidUuid(String),
    #[error("invalid hex blob {0:?}: expected even-length hex")]
    InvalidHex(String),
    #[error("invalid int64 {0:?}")]
    InvalidInt64(String),
    #[error("invalid uint64 {0:?}: leading '-' is not allowed")]
    InvalidUint64(String),
    #[error("invalid double {0:?}")]
    InvalidDouble(String),
    #[error("type {0:?} does not accept a non-empty suffix")]
    SuffixNotAllowed(String),
}

/// Top-level error kind (§7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    /// No map matched a path, or the path continues past the matched pattern.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Value codec failure.
    #[error("type error: {0}")]
    Type(#[from] TypeError),
    /// Opaque message surfaced by the SQL driver.
    #[error("sql error: {0}")]
    Sql(String),
    /// Driver reported an ambiguous acknowledgement for a commit.
    #[error("write uncertain")]
    WriteUncertain,
    /// Map/pattern configuration failed referential validation (§4.12).
    #[error("invalid map configuration: {0}")]
    InvalidConfig(String),
}

pub type DictResult<T> = Result<T, DictError>;

/// Distinct commit outcomes (§4.6, §7). `NotFound` is not an error: an
/// `atomic_inc` batch whose rows all missed is a legitimate outcome a caller
/// may want to handle differently from a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Ok,
    NotFound,
    WriteUncertain,
    Failed,
}

/// Outcome of a point lookup (§4.7, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    NotFound,
    Found(Vec<String>),
    Error(DictError),
}
