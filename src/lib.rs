//! Key/value dictionary core (§1 PURPOSE & SCOPE): pattern-addressed values
//! backed by an arbitrary SQL table set, with point lookup, prefix
//! iteration, batched writes and TTL expiry. The SQL driver itself is an
//! external, pluggable collaborator (§6) — this crate owns matching,
//! query building, batching and the public handle, not any one database's
//! wire protocol.

pub mod cache;
pub mod config;
pub mod dict;
pub mod driver;
pub mod error;
pub mod expire;
pub mod iter;
pub mod lookup;
pub mod map;
pub mod pattern;
pub mod query;
pub mod txn;
pub mod value;

#[cfg(test)]
mod testutil;

pub use dict::{Dict, OpContext};
pub use driver::{DriverCapabilities, Execution, SqlConnection, SqlResult, SqlRow, SqlTransaction};
pub use error::{CommitOutcome, DictError, DictResult, LookupResult, TypeError};
pub use iter::{IterCtx, IterFlags, IterItem, IterStep};
pub use map::{Map, MapSet, PatternField};
pub use txn::Txn;
pub use value::{ParamValue, ValueType};
