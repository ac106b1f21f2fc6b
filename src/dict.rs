//! The dict handle (§3 "Lifecycles", §6 "Dict driver contract"): owns a
//! cached SQL connection plus the read-only map set, and exposes the public
//! surface every other module implements the internals of.
//!
//! A thin dispatch layer: validate inputs, delegate to the module that does
//! the real work, log what was done.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::ConnectionCache;
use crate::driver::SqlConnection;
use crate::error::{DictError, DictResult, LookupResult};
use crate::expire;
use crate::iter::{self, IterCtx, IterFlags, IterItem, IterStep};
use crate::lookup;
use crate::map::MapSet;
use crate::query;
use crate::txn::Txn;

/// Per-operation settings (§3 "Operation context"). Carried by the caller on
/// every entry point rather than stashed on the handle, since a single dict
/// serves many concurrent operations with different settings.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub username: Option<String>,
    /// `0` means "no TTL write" (§3).
    pub expire_secs: u32,
    /// Explicit commit timestamp override; `None` uses the caller-supplied
    /// `now_epoch_secs` passed to each call instead.
    pub timestamp: Option<i64>,
    /// Masks bound pattern values out of the debug log line for this op.
    pub hide_log_values: bool,
    pub max_rows: Option<u32>,
}

impl OpContext {
    fn log_key<'a>(&self, key: &'a str) -> &'a str {
        if self.hide_log_values {
            "<hidden>"
        } else {
            key
        }
    }
}

/// A dict handle (§3, §6). Holds the map set (read-only, shared) and a
/// cached connection acquired through `ConnectionCache`.
pub struct Dict {
    maps: MapSet,
    conn: Arc<Mutex<dyn SqlConnection + Send>>,
    driver: String,
    connect_string: String,
}

impl Dict {
    /// `init(uri, settings)` (§6): acquires a connection from the cache
    /// (calling `make` only on a cache miss) and validates `maps`.
    pub fn init<F>(
        maps: MapSet,
        driver: &str,
        connect_string: &str,
        cache: &mut ConnectionCache,
        make: F,
    ) -> DictResult<Self>
    where
        F: FnOnce() -> Arc<Mutex<dyn SqlConnection + Send>>,
    {
        let conn = cache.acquire(driver, connect_string, make);
        log::debug!("dict init: driver={driver} maps={}", maps.len());
        Ok(Dict {
            maps,
            conn,
            driver: driver.to_string(),
            connect_string: connect_string.to_string(),
        })
    }

    /// `deinit(dict)` (§6): releases the cached connection's refcount.
    pub fn deinit(self, cache: &mut ConnectionCache) {
        cache.release(&self.driver, &self.connect_string);
    }

    /// `wait(dict)` (§6): blocks until the driver is idle. Every call in
    /// this crate already runs synchronously to completion before
    /// returning (§5: async drivers only suspend inside their own
    /// `execute_async`/`commit_async`), so there is nothing outstanding to
    /// wait for; kept as an explicit entrypoint for API parity.
    pub fn wait(&self) {}

    pub fn maps(&self) -> &MapSet {
        &self.maps
    }

    /// Locks the cached connection for the duration of one operation (or,
    /// for a transaction, for the caller to hold across `transaction_init`
    /// through `commit`/`rollback`).
    pub fn lock(&self) -> MutexGuard<'_, dyn SqlConnection + Send> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `lookup(dict, op, key)` (§6, §4.7).
    pub fn lookup(&self, op: &OpContext, key: &str, now_epoch_secs: i64) -> LookupResult {
        log::debug!("lookup {}", op.log_key(key));
        let mut guard = self.lock();
        lookup::lookup(&mut *guard, &self.maps, key, op.username.as_deref(), now_epoch_secs)
    }

    /// `lookup_async(dict, op, key, cb)` (§6, §4.7).
    pub fn lookup_async(
        &self,
        op: &OpContext,
        key: &str,
        now_epoch_secs: i64,
        callback: Box<dyn FnOnce(LookupResult)>,
    ) {
        log::debug!("lookup_async {}", op.log_key(key));
        let mut guard = self.lock();
        lookup::lookup_async(&mut *guard, &self.maps, key, op.username.as_deref(), now_epoch_secs, callback);
    }

    /// `iterate_init(dict, op, path, flags)` (§6, §4.8).
    pub fn iterate_init<'d>(
        &'d self,
        op: &OpContext,
        path: &str,
        flags: IterFlags,
        now_epoch_secs: i64,
    ) -> IterCtx<'d> {
        log::debug!("iterate_init {}", op.log_key(path));
        iter::IterCtx::init(&self.maps, path, flags, op.username.clone(), op.max_rows, now_epoch_secs)
    }

    /// `iterate(ctx)` (§6): one synchronous step.
    pub fn iterate(&self, ctx: &mut IterCtx<'_>) -> Option<IterItem> {
        let mut guard = self.lock();
        ctx.next(&mut *guard)
    }

    /// `iterate(ctx)` under the `ASYNC` flag (§4.8, §6): `has_more` is
    /// `IterStep::Pending`, signalling the caller to wait on the driver's
    /// event loop and call again rather than block.
    pub fn iterate_async(&self, ctx: &mut IterCtx<'_>) -> IterStep {
        let mut guard = self.lock();
        ctx.next_async(&mut *guard)
    }

    /// `iterate_deinit(ctx)` (§6): the final error, if the stream was
    /// short-circuited (§7).
    pub fn iterate_deinit(&self, mut ctx: IterCtx<'_>) -> DictResult<()> {
        ctx.destroy();
        match ctx.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `transaction_init` (§6, §4.6). The caller holds `conn` (typically
    /// from `dict.lock()`) for the transaction's whole lifetime; `Txn`
    /// borrows it rather than this method locking internally, since a
    /// transaction spans many calls the handle itself can't scope a lock
    /// around. `op.timestamp`, when set, overrides `now_epoch_secs` as the
    /// commit time every write in the transaction is stamped with (§3).
    pub fn transaction_init<'g>(
        &self,
        conn: &'g mut (dyn SqlConnection + Send),
        op: &OpContext,
        now_epoch_secs: i64,
    ) -> DictResult<Txn<'g>> {
        Txn::begin(conn, op.timestamp.unwrap_or(now_epoch_secs))
    }

    /// `set` (§6, §4.4, §4.6): resolve `key` to a map, then enqueue.
    pub fn set(&self, txn: &mut Txn, op: &OpContext, key: &str, value: &str) -> DictResult<()> {
        log::debug!("set {}", op.log_key(key));
        let (_, map, matched) = self.select_bound(key)?;
        txn.set(map, matched.values, op.username.clone(), value.to_string(), op.expire_secs);
        Ok(())
    }

    /// `unset` (§6): delete the row for `key` outright.
    pub fn unset(&self, txn: &mut Txn, op: &OpContext, key: &str) -> DictResult<()> {
        log::debug!("unset {}", op.log_key(key));
        let (_, map, matched) = self.select_bound(key)?;
        let built = query::build_delete_by_key(map, &matched.values, op.username.as_deref())?;
        txn.unset(built);
        Ok(())
    }

    /// `atomic_inc` (§6, §4.5, §4.6).
    pub fn atomic_inc(&self, txn: &mut Txn, op: &OpContext, key: &str, delta: i64) -> DictResult<()> {
        log::debug!("atomic_inc {}", op.log_key(key));
        let (_, map, matched) = self.select_bound(key)?;
        txn.inc(map, matched.values, op.username.clone(), delta);
        Ok(())
    }

    fn select_bound(&self, key: &str) -> DictResult<(usize, &crate::map::Map, crate::pattern::MatchResult)> {
        match self.maps.select_exact(key) {
            Some(found) => Ok(found),
            None if self.maps.any_exceeded(key) => Err(DictError::InvalidKey(
                "Key continues past the matched pattern".to_string(),
            )),
            None => Err(DictError::InvalidKey(format!("no map matches key {key:?}"))),
        }
    }

    /// `expire_scan(dict)` (§6, §4.9): `0` if no map declares `expire_field`,
    /// `1` otherwise.
    pub fn expire_scan(&self, now_epoch_secs: i64) -> DictResult<u32> {
        let mut guard = self.lock();
        let scanned = expire::expire_scan(&mut *guard, &self.maps, now_epoch_secs)?;
        Ok(if scanned > 0 { 1 } else { 0 })
    }
}
