//! SQL driver contract (§6, consumed). The driver itself — connection
//! pooling internals, prepared-statement support discovery, wire protocol —
//! is out of scope (§1); this module is the trait boundary the rest of the
//! crate programs against, plus the capability bitmap §4.4 branches on.

use crate::error::DictResult;
use crate::value::ParamValue;

bitflags::bitflags! {
    /// Capability bitmap (§6). Queried once per connection and cached by
    /// the caller; §4.4's UPSERT strategy branches on it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriverCapabilities: u8 {
        const PREP_STATEMENTS  = 0b001;
        const ON_DUPLICATE_KEY = 0b010;
        const ON_CONFLICT_DO   = 0b100;
    }
}

/// One result row, with typed column accessors (§6).
pub trait SqlRow {
    fn get(&self, idx: usize) -> Option<ParamValue>;
    fn column_count(&self) -> usize;
}

/// A prepared statement result cursor (§6, §4.8 "streams rows").
pub trait SqlResult {
    /// Pull the next row, if any. `None` signals exhaustion. Per §5, this
    /// is one of the three suspension points (`sql_result_more`) when the
    /// connection is operating asynchronously — the sync trait surfaces the
    /// same shape; async callers use `SqlConnection::query_async`.
    fn next_row(&mut self) -> DictResult<Option<Box<dyn SqlRow>>>;
}

/// A single statement execution: `SELECT` returns rows; `INSERT`/`UPDATE`/
/// `DELETE` return an affected-row count (used by §4.5's inc not-found
/// detection and §4.9's expiry scan).
pub enum Execution {
    Rows(Box<dyn SqlResult>),
    AffectedRows(u64),
}

/// A connection the core performs work through. Transactions are obtained
/// via `begin`; outside a transaction, single statements run autocommit.
pub trait SqlConnection {
    fn capabilities(&self) -> DriverCapabilities;

    /// Synchronous statement execution (suspension point only inside an
    /// async driver's own internals, never observed here, §5).
    fn execute(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution>;

    /// Asynchronous statement execution (`sql_statement_query`, §5/§6). The
    /// callback is invoked exactly once, with the connection's event loop
    /// driving completion.
    fn execute_async(
        &mut self,
        sql: &str,
        params: &[ParamValue],
        callback: Box<dyn FnOnce(DictResult<Execution>)>,
    );

    fn begin(&mut self) -> DictResult<Box<dyn SqlTransaction + '_>>;
}

/// An open SQL transaction (§4.6, §6).
pub trait SqlTransaction {
    fn execute(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution>;

    /// `sql_transaction_commit`, a suspension point (§5). Synchronous here;
    /// `commit_async` is the suspending variant a real async driver would
    /// use.
    fn commit(self: Box<Self>) -> DictResult<()>;

    fn commit_async(self: Box<Self>, callback: Box<dyn FnOnce(DictResult<()>)>);

    fn rollback(self: Box<Self>) -> DictResult<()>;
}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
