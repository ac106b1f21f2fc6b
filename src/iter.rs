//! Iteration engine (§4.8): multi-map streaming iteration with continuation
//! across maps and row -> key reconstruction. The explicit
//! `(next_map_idx, allow_null_map)` cursor, rather than a coroutine, is the
//! §9 design note: an explicit plain-data cursor over control-flow
//! abstractions, so each step is a plain struct mutation, not a generator.

use std::cell::RefCell;
use std::rc::Rc;

use crate::driver::{Execution, SqlConnection, SqlResult};
use crate::error::DictError;
use crate::map::{Map, MapSet};
use crate::pattern;
use crate::query::{self, RecurseMode, SortOrder};
use crate::value;

bitflags::bitflags! {
    /// Iteration flags (§4.8, §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IterFlags: u16 {
        const RECURSE      = 0b00001;
        const EXACT_KEY    = 0b00010;
        const NO_VALUE     = 0b00100;
        const SORT_BY_KEY  = 0b01000;
        const SORT_BY_VALUE= 0b10000;
        // ASYNC is not a bit here: sync/async are separate entrypoints
        // (`iterate`/`iterate_async`) driven by the same cursor state.
    }
}

/// One yielded item: a fully reconstructed path plus its decoded value
/// columns (empty when `NO_VALUE` is set).
#[derive(Debug, Clone, PartialEq)]
pub struct IterItem {
    pub key: String,
    pub values: Vec<String>,
}

/// Outcome of one async step (§4.8 "Async mode", §6 `iterate(ctx)`:
/// `has_more` signals async wait). `Pending` means the driver's
/// `execute_async` did not resolve its callback within this call — this
/// engine only drives drivers that either settle inline (like
/// `testutil::MemoryDriver`) or settle later via their own event loop
/// re-invoking `next_async` once they wake it; there is no separate
/// half-finished continuation to resume, the whole map-advance step retries.
#[derive(Debug, Clone, PartialEq)]
pub enum IterStep {
    Item(IterItem),
    End,
    Pending,
}

/// Iteration context (§3 "Lifecycles", §4.8). Owns the cursor across maps
/// and the current map's row stream; freed by dropping it (`iterate_deinit`
/// is simply this value going out of scope in this crate's Rust surface).
pub struct IterCtx<'a> {
    maps: &'a MapSet,
    path: String,
    flags: IterFlags,
    username: Option<String>,
    max_rows: Option<u32>,
    now_epoch_secs: i64,
    returned: u32,
    /// `(next_map_idx, allow_null_map)` cursor from §9: `allow_null_map`
    /// flips true the first time any map partially matches `path`, so that
    /// running out of maps afterwards is ordinary exhaustion rather than an
    /// `InvalidKey` (which is reserved for a path no map can serve at all).
    next_map_idx: usize,
    allow_null_map: bool,
    /// Current map's matched prefix + its open row stream, if any.
    current: Option<CurrentMap>,
    destroyed: bool,
    error: Option<DictError>,
    exact_key_done: bool,
}

struct CurrentMap {
    map_idx: usize,
    prefix_values: Vec<String>,
    rows: Box<dyn SqlResult>,
}

/// Result of one async map-advance attempt.
enum Advance {
    Ready,
    End,
    Pending,
}

/// Issues `built` through `execute_async` and, if the driver resolved its
/// callback before the call returned, hands back the result. `Box<dyn
/// FnOnce>` callbacks are implicitly `'static`, so the closure captures only
/// an owned `Rc<RefCell<_>>` slot rather than borrowing the `IterCtx` — the
/// same shape `lookup::lookup_async` uses for its own callback state.
fn run_async(
    conn: &mut dyn SqlConnection,
    built: &query::BuiltQuery,
) -> Option<crate::error::DictResult<Execution>> {
    let slot: Rc<RefCell<Option<crate::error::DictResult<Execution>>>> = Rc::new(RefCell::new(None));
    let slot2 = slot.clone();
    conn.execute_async(
        &built.sql,
        &built.params,
        Box::new(move |res| {
            *slot2.borrow_mut() = Some(res);
        }),
    );
    Rc::try_unwrap(slot).ok().and_then(|cell| cell.into_inner())
}

impl<'a> IterCtx<'a> {
    pub fn init(
        maps: &'a MapSet,
        path: &str,
        flags: IterFlags,
        username: Option<String>,
        max_rows: Option<u32>,
        now_epoch_secs: i64,
    ) -> Self {
        IterCtx {
            maps,
            path: path.to_string(),
            flags,
            username,
            max_rows,
            now_epoch_secs,
            returned: 0,
            next_map_idx: 0,
            allow_null_map: false,
            current: None,
            destroyed: false,
            error: None,
            exact_key_done: false,
        }
    }

    /// Marks the context as cancelled mid-flight (§5 "Cancellation"): any
    /// result already in flight for an async callback is dropped instead of
    /// delivered.
    pub fn destroy(&mut self) {
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Final error, if the stream was short-circuited (§7: "iteration
    /// errors short-circuit the stream and are reported at deinit").
    pub fn take_error(&mut self) -> Option<DictError> {
        self.error.take()
    }

    fn recurse(&self) -> bool {
        self.flags.contains(IterFlags::RECURSE)
    }

    fn sort(&self) -> SortOrder {
        if self.flags.contains(IterFlags::SORT_BY_KEY) {
            SortOrder::ByKey
        } else if self.flags.contains(IterFlags::SORT_BY_VALUE) {
            SortOrder::ByValue
        } else {
            SortOrder::Unsorted
        }
    }

    /// `iterate(ctx)` (§4.8, §6): synchronous next item, or `None` at end.
    pub fn next(&mut self, conn: &mut dyn SqlConnection) -> Option<IterItem> {
        if self.destroyed || self.error.is_some() {
            return None;
        }
        if self.flags.contains(IterFlags::EXACT_KEY) {
            return self.next_exact_key(conn);
        }
        if let Some(max) = self.max_rows {
            if self.returned >= max {
                return None;
            }
        }

        loop {
            if self.current.is_none() {
                if !self.advance_to_next_map(conn) {
                    return None;
                }
            }

            let map_idx = self.current.as_ref().unwrap().map_idx;
            let row_result = self.current.as_mut().unwrap().rows.next_row();
            match row_result {
                Ok(Some(row)) => {
                    let prefix_values = self.current.as_ref().unwrap().prefix_values.clone();
                    let map = self.maps.get(map_idx).unwrap();
                    if let Some(item) = self.decode_row(map, &prefix_values, row.as_ref()) {
                        self.returned += 1;
                        return Some(item);
                    }
                    // TTL-skipped row; keep pulling from the same map.
                }
                Ok(None) => {
                    self.current = None; // exhausted, advance to next map
                }
                Err(e) => {
                    self.error = Some(e);
                    return None;
                }
            }
        }
    }

    fn next_exact_key(&mut self, conn: &mut dyn SqlConnection) -> Option<IterItem> {
        if self.exact_key_done {
            return None;
        }
        self.exact_key_done = true;

        let Some((_, map, matched)) = self.maps.select_exact(&self.path) else {
            if !self.maps.any_exceeded(&self.path) {
                return None;
            }
            self.error = Some(DictError::InvalidKey("Key continues past the matched pattern".to_string()));
            return None;
        };

        let built = match query::build_select(
            map,
            &matched.values,
            RecurseMode::None,
            self.username.as_deref(),
            SortOrder::Unsorted,
            None,
            0,
            !self.flags.contains(IterFlags::NO_VALUE),
            map.expire_field.is_some(),
            false,
        ) {
            Ok(q) => q,
            Err(e) => {
                self.error = Some(e);
                return None;
            }
        };

        let exec = match conn.execute(&built.sql, &built.params) {
            Ok(e) => e,
            Err(e) => {
                self.error = Some(e);
                return None;
            }
        };
        let mut rows = match exec {
            Execution::Rows(r) => r,
            Execution::AffectedRows(_) => {
                self.error = Some(DictError::Sql("SELECT returned no row cursor".to_string()));
                return None;
            }
        };

        match rows.next_row() {
            Ok(Some(row)) => self.decode_row(map, &matched.values, row.as_ref()),
            Ok(None) => None,
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }

    /// Async `iterate(ctx)` (§4.8 "Async mode", §6): identical cursor logic
    /// to `next`, but issues each map's `SELECT` through
    /// `SqlConnection::execute_async` instead of blocking. A driver that
    /// resolves its callback before `execute_async` returns (every driver
    /// this crate ships, and any genuinely single-threaded one) yields an
    /// item or end immediately; a driver that defers resolution to its own
    /// event loop gets `IterStep::Pending` back and is expected to call
    /// `next_async` again once it wakes — the map cursor is left unchanged
    /// on `Pending`, so the retry re-issues the same query.
    pub fn next_async(&mut self, conn: &mut dyn SqlConnection) -> IterStep {
        if self.destroyed || self.error.is_some() {
            return IterStep::End;
        }
        if self.flags.contains(IterFlags::EXACT_KEY) {
            return self.next_exact_key_async(conn);
        }
        if let Some(max) = self.max_rows {
            if self.returned >= max {
                return IterStep::End;
            }
        }

        loop {
            if self.current.is_none() {
                match self.advance_to_next_map_async(conn) {
                    Advance::Ready => {}
                    Advance::End => return IterStep::End,
                    Advance::Pending => return IterStep::Pending,
                }
            }

            let map_idx = self.current.as_ref().unwrap().map_idx;
            let row_result = self.current.as_mut().unwrap().rows.next_row();
            match row_result {
                Ok(Some(row)) => {
                    let prefix_values = self.current.as_ref().unwrap().prefix_values.clone();
                    let map = self.maps.get(map_idx).unwrap();
                    if let Some(item) = self.decode_row(map, &prefix_values, row.as_ref()) {
                        self.returned += 1;
                        return IterStep::Item(item);
                    }
                    // TTL-skipped row; keep pulling from the same map.
                }
                Ok(None) => {
                    self.current = None;
                }
                Err(e) => {
                    self.error = Some(e);
                    return IterStep::End;
                }
            }
        }
    }

    fn next_exact_key_async(&mut self, conn: &mut dyn SqlConnection) -> IterStep {
        if self.exact_key_done {
            return IterStep::End;
        }

        let Some((_, map, matched)) = self.maps.select_exact(&self.path) else {
            self.exact_key_done = true;
            if !self.maps.any_exceeded(&self.path) {
                return IterStep::End;
            }
            self.error = Some(DictError::InvalidKey("Key continues past the matched pattern".to_string()));
            return IterStep::End;
        };

        let built = match query::build_select(
            map,
            &matched.values,
            RecurseMode::None,
            self.username.as_deref(),
            SortOrder::Unsorted,
            None,
            0,
            !self.flags.contains(IterFlags::NO_VALUE),
            map.expire_field.is_some(),
            false,
        ) {
            Ok(q) => q,
            Err(e) => {
                self.exact_key_done = true;
                self.error = Some(e);
                return IterStep::End;
            }
        };

        match run_async(conn, &built) {
            None => IterStep::Pending,
            Some(Ok(Execution::Rows(mut rows))) => {
                self.exact_key_done = true;
                match rows.next_row() {
                    Ok(Some(row)) => match self.decode_row(map, &matched.values, row.as_ref()) {
                        Some(item) => IterStep::Item(item),
                        None => IterStep::End,
                    },
                    Ok(None) => IterStep::End,
                    Err(e) => {
                        self.error = Some(e);
                        IterStep::End
                    }
                }
            }
            Some(Ok(Execution::AffectedRows(_))) => {
                self.exact_key_done = true;
                self.error = Some(DictError::Sql("SELECT returned no row cursor".to_string()));
                IterStep::End
            }
            Some(Err(e)) => {
                self.exact_key_done = true;
                self.error = Some(e);
                IterStep::End
            }
        }
    }

    /// Async counterpart of `advance_to_next_map`: same candidate-map walk,
    /// `execute_async` in place of `execute`.
    fn advance_to_next_map_async(&mut self, conn: &mut dyn SqlConnection) -> Advance {
        while self.next_map_idx < self.maps.len() {
            let from = self.next_map_idx;
            self.next_map_idx += 1;
            let Some((idx, map, matched)) = self.maps.select_partial_from(from, &self.path, self.recurse())
            else {
                continue;
            };
            if idx != from {
                self.next_map_idx = idx + 1;
            }

            let recurse_mode = if self.recurse() { RecurseMode::Full } else { RecurseMode::One };
            let built = match query::build_select(
                map,
                &matched.values,
                recurse_mode,
                self.username.as_deref(),
                self.sort(),
                self.max_rows,
                self.returned,
                !self.flags.contains(IterFlags::NO_VALUE),
                map.expire_field.is_some(),
                true,
            ) {
                Ok(q) => q,
                Err(_) => continue,
            };

            match run_async(conn, &built) {
                None => {
                    // Not resolved inline: roll the cursor back so the next
                    // call to `next_async` re-issues this same map's query
                    // (§5 "Cancellation"/§9 continuation discipline).
                    self.next_map_idx = from;
                    return Advance::Pending;
                }
                Some(Ok(Execution::Rows(rows))) => {
                    self.allow_null_map = true;
                    self.current = Some(CurrentMap { map_idx: idx, prefix_values: matched.values, rows });
                    return Advance::Ready;
                }
                Some(Ok(Execution::AffectedRows(_))) => {
                    self.error = Some(DictError::Sql("SELECT returned no row cursor".to_string()));
                    return Advance::End;
                }
                Some(Err(e)) => {
                    self.error = Some(e);
                    return Advance::End;
                }
            }
        }
        if self.allow_null_map {
            Advance::End
        } else {
            self.error = Some(DictError::InvalidKey("no map matched this path for iteration".to_string()));
            Advance::End
        }
    }

    /// Advances the map cursor, skipping maps that don't partially match or
    /// that (with `RECURSE` off) leave more than one field unbound (§4.8
    /// step 1). Opens the `SELECT` for the first candidate that matches and
    /// runs it, leaving `self.current` holding its row cursor.
    fn advance_to_next_map(&mut self, conn: &mut dyn SqlConnection) -> bool {
        while self.next_map_idx < self.maps.len() {
            let from = self.next_map_idx;
            self.next_map_idx += 1;
            let Some((idx, map, matched)) = self.maps.select_partial_from(from, &self.path, self.recurse())
            else {
                continue;
            };
            if idx != from {
                // select_partial_from may have skipped ahead; keep the
                // cursor consistent with the map it actually matched.
                self.next_map_idx = idx + 1;
            }

            let recurse_mode = if self.recurse() { RecurseMode::Full } else { RecurseMode::One };
            let built = match query::build_select(
                map,
                &matched.values,
                recurse_mode,
                self.username.as_deref(),
                self.sort(),
                self.max_rows,
                self.returned,
                !self.flags.contains(IterFlags::NO_VALUE),
                map.expire_field.is_some(),
                true,
            ) {
                Ok(q) => q,
                Err(_) => continue, // this map can't serve this path depth; try the next
            };

            let exec = match conn.execute(&built.sql, &built.params) {
                Ok(e) => e,
                Err(e) => {
                    self.error = Some(e);
                    return false;
                }
            };
            let rows = match exec {
                Execution::Rows(r) => r,
                Execution::AffectedRows(_) => {
                    self.error = Some(DictError::Sql("SELECT returned no row cursor".to_string()));
                    return false;
                }
            };

            self.allow_null_map = true;
            self.current = Some(CurrentMap {
                map_idx: idx,
                prefix_values: matched.values,
                rows,
            });
            return true;
        }
        self.allow_null_map_or_error()
    }

    fn allow_null_map_or_error(&mut self) -> bool {
        if !self.allow_null_map {
            self.error = Some(DictError::InvalidKey(
                "no map matched this path for iteration".to_string(),
            ));
        }
        false
    }

    fn decode_row(&self, map: &Map, prefix_values: &[String], row: &dyn crate::driver::SqlRow) -> Option<IterItem> {
        let mut col = 0usize;
        if map.expire_field.is_some() {
            if let Some(crate::value::ParamValue::Int64(exp)) = row.get(col) {
                col += 1;
                if exp < self.now_epoch_secs {
                    return None;
                }
            } else {
                col += 1;
            }
        }

        let mut values = Vec::new();
        if !self.flags.contains(IterFlags::NO_VALUE) {
            for ty in &map.value_types {
                let decoded = row.get(col).map(|raw| value::decode(*ty, &raw)).unwrap_or_default();
                values.push(decoded);
                col += 1;
            }
        }

        let mut all_values = prefix_values.to_vec();
        for field in &map.pattern_fields[prefix_values.len()..] {
            let decoded = row
                .get(col)
                .map(|raw| value::decode(field.ty, &raw))
                .unwrap_or_default();
            all_values.push(decoded);
            col += 1;
        }

        let key = pattern::substitute(&map.pattern, &all_values);
        log::trace!("iter decoded row -> key={key}");
        Some(IterItem { key, values })
    }
}
