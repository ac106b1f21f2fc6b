//! Transaction batcher (§4.6): deferred `set`/`inc` queues with a
//! mergeability test, flushed into a single UPSERT or UPDATE whenever the
//! batch boundary changes, and again at commit. Queued ops phase into plain
//! rows and dispatch once per flush instead of per op.

use std::mem::take;

use crate::driver::{DriverCapabilities, Execution, SqlConnection, SqlTransaction};
use crate::error::{CommitOutcome, DictError, DictResult};
use crate::map::Map;
use crate::query::{self, BuiltQuery, SetEntry};

#[derive(Debug, Clone)]
struct PendingSet {
    map: Map,
    bound_values: Vec<String>,
    username: Option<String>,
    value: String,
    expire_secs: u32,
}

#[derive(Debug, Clone)]
struct PendingInc {
    map: Map,
    bound_values: Vec<String>,
    username: Option<String>,
    delta: i64,
}

/// State machine from §4.6: `Open -> (Flushing -> Open)* -> Committing ->
/// {Committed, RolledBack}`. `Flushing`/`Committing` are transient within a
/// single call and not worth modelling as states a caller could observe
/// between calls, so only the rest states are tracked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Open,
    Done,
}

/// Transaction context (§3 "Lifecycles", §4.6). Owns the two deferred
/// queues, the live SQL transaction flushes execute against, and a sticky
/// error; exists from `begin` to `commit`/`rollback`.
pub struct Txn<'c> {
    sql_txn: Box<dyn SqlTransaction + 'c>,
    pending_sets: Vec<PendingSet>,
    pending_incs: Vec<PendingInc>,
    /// Running total of affected rows across every flushed increment, used
    /// for §4.5/§4.6's not-found detection.
    inc_rows_affected: u64,
    inc_flushed_any: bool,
    sticky_error: Option<DictError>,
    state: TxnState,
    caps: DriverCapabilities,
    now_epoch_secs: i64,
}

impl<'c> Txn<'c> {
    pub fn begin(conn: &'c mut dyn SqlConnection, now_epoch_secs: i64) -> DictResult<Self> {
        let caps = conn.capabilities();
        let sql_txn = conn.begin()?;
        Ok(Txn {
            sql_txn,
            pending_sets: Vec::new(),
            pending_incs: Vec::new(),
            inc_rows_affected: 0,
            inc_flushed_any: false,
            sticky_error: None,
            state: TxnState::Open,
            caps,
            now_epoch_secs,
        })
    }

    pub fn is_open(&self) -> bool {
        self.state == TxnState::Open
    }

    pub fn sticky_error(&self) -> Option<&DictError> {
        self.sticky_error.as_ref()
    }

    fn set_sticky(&mut self, e: DictError) {
        if self.sticky_error.is_none() {
            log::warn!("transaction aborted: {e}");
            self.sticky_error = Some(e);
        }
    }

    /// Enqueue a `set` (§4.6). Once an error is sticky, further ops are
    /// accepted syntactically but are no-ops (§7).
    pub fn set(
        &mut self,
        map: &Map,
        bound_values: Vec<String>,
        username: Option<String>,
        value: String,
        expire_secs: u32,
    ) {
        if self.sticky_error.is_some() || !self.is_open() {
            return;
        }
        // Step 1: the other queue cannot merge with this one; flush it.
        self.flush_incs();

        // Step 2: mergeability test against the same-kind queue (§4.6,
        // GLOSSARY "Mergeable").
        if let Some(last) = self.pending_sets.last() {
            if !mergeable(&last.map, &last.bound_values, &last.username, map, &bound_values, &username) {
                self.flush_sets();
            } else if last.bound_values == bound_values {
                // §9 Open Question (E3): reject a same-key repeat within a
                // batch rather than silently double-binding the column.
                self.set_sticky(DictError::InvalidKey(format!(
                    "set for key already queued in this batch (table {:?})",
                    map.table
                )));
                return;
            }
        }

        self.pending_sets.push(PendingSet { map: map.clone(), bound_values, username, value, expire_secs });
    }

    /// Enqueue an `atomic_inc` (§4.5, §4.6).
    pub fn inc(&mut self, map: &Map, bound_values: Vec<String>, username: Option<String>, delta: i64) {
        if self.sticky_error.is_some() || !self.is_open() {
            return;
        }
        self.flush_sets();

        if let Some(last) = self.pending_incs.last() {
            if !mergeable(&last.map, &last.bound_values, &last.username, map, &bound_values, &username) {
                self.flush_incs();
            }
        }

        self.pending_incs.push(PendingInc { map: map.clone(), bound_values, username, delta });
    }

    /// `unset` (§6): delete a single key outright. Not a mergeable op kind
    /// of its own; it flushes both queues first like a boundary change,
    /// then runs immediately against the live transaction.
    pub fn unset(&mut self, built: BuiltQuery) {
        if self.sticky_error.is_some() || !self.is_open() {
            return;
        }
        self.flush_sets();
        self.flush_incs();
        if self.sticky_error.is_some() {
            return;
        }
        if let Err(e) = self.sql_txn.execute(&built.sql, &built.params) {
            self.set_sticky(e);
        }
    }

    fn flush_sets(&mut self) {
        if self.pending_sets.is_empty() {
            return;
        }
        let batch = take(&mut self.pending_sets);
        match build_set_batch(&batch, self.caps, self.now_epoch_secs) {
            Ok(built) => {
                if let Err(e) = self.sql_txn.execute(&built.sql, &built.params) {
                    self.set_sticky(e);
                }
            }
            Err(e) => self.set_sticky(e),
        }
    }

    fn flush_incs(&mut self) {
        if self.pending_incs.is_empty() {
            return;
        }
        let batch = take(&mut self.pending_incs);
        match build_inc_batch(&batch) {
            Ok(built) => match self.sql_txn.execute(&built.sql, &built.params) {
                Ok(Execution::AffectedRows(n)) => {
                    self.inc_flushed_any = true;
                    self.inc_rows_affected += n;
                }
                Ok(Execution::Rows(_)) => {
                    self.set_sticky(DictError::Sql("UPDATE returned a row cursor".to_string()))
                }
                Err(e) => self.set_sticky(e),
            },
            Err(e) => self.set_sticky(e),
        }
    }

    /// Commit (§4.6): flush both queues, then commit the driver
    /// transaction. A sticky error (from enqueue or from a flush) turns
    /// commit into rollback instead.
    pub fn commit(mut self) -> CommitOutcome {
        if self.sticky_error.is_none() {
            self.flush_sets();
        }
        if self.sticky_error.is_none() {
            self.flush_incs();
        }
        self.state = TxnState::Done;

        if let Some(err) = self.sticky_error.take() {
            let _ = self.sql_txn.rollback();
            return outcome_for_error(&err);
        }

        match self.sql_txn.commit() {
            Ok(()) if self.inc_flushed_any && self.inc_rows_affected == 0 => CommitOutcome::NotFound,
            Ok(()) => CommitOutcome::Ok,
            Err(e) => {
                if matches!(e, DictError::WriteUncertain) {
                    log::warn!("commit outcome uncertain: {e}");
                }
                outcome_for_error(&e)
            }
        }
    }

    /// `rollback` (§4.6, §6): synchronously aborts any unflushed queues and
    /// issues driver rollback; never touches the sticky error (an explicit
    /// rollback is not itself a failure).
    pub fn rollback(mut self) -> DictResult<()> {
        self.pending_sets.clear();
        self.pending_incs.clear();
        self.state = TxnState::Done;
        self.sql_txn.rollback()
    }
}

fn outcome_for_error(e: &DictError) -> CommitOutcome {
    match e {
        DictError::WriteUncertain => CommitOutcome::WriteUncertain,
        _ => CommitOutcome::Failed,
    }
}

/// Mergeability test (§4.6, GLOSSARY "Mergeable"): same table, same scope,
/// same username field when private, identical bound pattern values.
fn mergeable(
    a_map: &Map,
    a_values: &[String],
    a_user: &Option<String>,
    b_map: &Map,
    b_values: &[String],
    b_user: &Option<String>,
) -> bool {
    a_map.table == b_map.table
        && a_map.is_private_scope() == b_map.is_private_scope()
        && a_map.username_field == b_map.username_field
        && a_values == b_values
        && (!a_map.is_private_scope() || a_user == b_user)
}

fn build_set_batch(
    batch: &[PendingSet],
    caps: DriverCapabilities,
    now_epoch_secs: i64,
) -> DictResult<BuiltQuery> {
    let first = &batch[0];
    let entries: Vec<SetEntry> = batch
        .iter()
        .map(|p| SetEntry { map: &p.map, value: p.value.clone() })
        .collect();

    query::build_upsert(
        &first.map.table,
        &first.bound_values,
        &first.map,
        &entries,
        first.username.as_deref(),
        first.expire_secs,
        now_epoch_secs,
        caps,
    )
}

fn build_inc_batch(batch: &[PendingInc]) -> DictResult<BuiltQuery> {
    let first = &batch[0];
    let deltas: Vec<i64> = batch.iter().map(|p| p.delta).collect();
    query::build_increment(&first.map, &first.bound_values, &deltas, first.username.as_deref())
}
