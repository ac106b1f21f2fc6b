//! Lookup engine (§4.7): synchronous and asynchronous point retrieval with
//! TTL skip. Bulk scan, row decode, early skip, cut down to a single-row
//! fetch against one matched map.

use crate::driver::{Execution, SqlConnection};
use crate::error::{DictError, DictResult, LookupResult};
use crate::map::MapSet;
use crate::query::{self, RecurseMode, SortOrder};
use crate::value;

/// Builds and runs the `RECURSE_NONE` `SELECT` for `path` against the first
/// matching map, skipping rows whose `expire_field` has passed (§4.7, §8.9).
///
/// `now_epoch_secs` is the caller-supplied clock reading (§9: normalised to
/// whole seconds, matching `expire_field`'s write side in `query::build_upsert`).
pub fn lookup(
    conn: &mut dyn SqlConnection,
    maps: &MapSet,
    path: &str,
    username: Option<&str>,
    now_epoch_secs: i64,
) -> LookupResult {
    let Some((_, map, matched)) = maps.select_exact(path) else {
        if maps.any_exceeded(path) {
            return LookupResult::Error(DictError::InvalidKey(
                "Key continues past the matched pattern".to_string(),
            ));
        }
        return LookupResult::NotFound;
    };

    let built = match query::build_select(
        map,
        &matched.values,
        RecurseMode::None,
        username,
        SortOrder::Unsorted,
        None,
        0,
        true,
        map.expire_field.is_some(),
        false,
    ) {
        Ok(q) => q,
        Err(e) => return LookupResult::Error(e),
    };

    let exec = match conn.execute(&built.sql, &built.params) {
        Ok(e) => e,
        Err(e) => return LookupResult::Error(e),
    };
    let mut rows = match exec {
        Execution::Rows(r) => r,
        Execution::AffectedRows(_) => {
            return LookupResult::Error(DictError::Sql("SELECT returned no row cursor".to_string()))
        }
    };

    loop {
        let row = match rows.next_row() {
            Ok(Some(r)) => r,
            Ok(None) => return LookupResult::NotFound,
            Err(e) => return LookupResult::Error(e),
        };

        let mut col = 0usize;
        if map.expire_field.is_some() {
            let expire = row.get(col);
            col += 1;
            if let Some(crate::value::ParamValue::Int64(exp)) = expire {
                if exp < now_epoch_secs {
                    continue; // TTL row, skip (§8.9)
                }
            }
        }

        // Sync variant surfaces a NULL primary value as an empty string
        // (§4.7); `lookup_async` is the one that downgrades it to NotFound.
        let mut values = Vec::with_capacity(map.value_field.len());
        for ty in &map.value_types {
            let decoded = row.get(col).map(|raw| value::decode(*ty, &raw)).unwrap_or_default();
            values.push(decoded);
            col += 1;
        }
        return LookupResult::Found(values);
    }
}

/// Async variant (§4.7, §6): identical query construction, delivered through
/// `callback`. A `NULL` primary value is downgraded to `NotFound` here
/// (sync `lookup` instead surfaces it as an empty string).
pub fn lookup_async(
    conn: &mut dyn SqlConnection,
    maps: &MapSet,
    path: &str,
    username: Option<&str>,
    now_epoch_secs: i64,
    callback: Box<dyn FnOnce(LookupResult)>,
) {
    let Some((_, map, matched)) = maps.select_exact(path) else {
        if maps.any_exceeded(path) {
            callback(LookupResult::Error(DictError::InvalidKey(
                "Key continues past the matched pattern".to_string(),
            )));
        } else {
            callback(LookupResult::NotFound);
        }
        return;
    };

    let expire_field = map.expire_field.is_some();
    let value_types = map.value_types.clone();

    let built = match query::build_select(
        map,
        &matched.values,
        RecurseMode::None,
        username,
        SortOrder::Unsorted,
        None,
        0,
        true,
        expire_field,
        false,
    ) {
        Ok(q) => q,
        Err(e) => {
            callback(LookupResult::Error(e));
            return;
        }
    };

    conn.execute_async(
        &built.sql,
        &built.params,
        Box::new(move |res| {
            let result = decode_async_result(res, expire_field, &value_types, now_epoch_secs);
            callback(result);
        }),
    );
}

fn decode_async_result(
    res: DictResult<Execution>,
    expire_field: bool,
    value_types: &[value::ValueType],
    now_epoch_secs: i64,
) -> LookupResult {
    let exec = match res {
        Ok(e) => e,
        Err(e) => return LookupResult::Error(e),
    };
    let mut rows = match exec {
        Execution::Rows(r) => r,
        Execution::AffectedRows(_) => {
            return LookupResult::Error(DictError::Sql("SELECT returned no row cursor".to_string()))
        }
    };

    loop {
        let row = match rows.next_row() {
            Ok(Some(r)) => r,
            Ok(None) => return LookupResult::NotFound,
            Err(e) => return LookupResult::Error(e),
        };

        let mut col = 0usize;
        if expire_field {
            if let Some(crate::value::ParamValue::Int64(exp)) = row.get(col) {
                col += 1;
                if exp < now_epoch_secs {
                    continue;
                }
            } else {
                col += 1;
            }
        }

        let primary_raw = row.get(col);
        if primary_raw.is_none() {
            return LookupResult::NotFound; // NULL primary value (§4.7 async)
        }

        let mut values = Vec::with_capacity(value_types.len());
        for ty in value_types {
            match row.get(col) {
                Some(raw) => values.push(value::decode(*ty, &raw)),
                None => return LookupResult::NotFound,
            }
            col += 1;
        }
        return LookupResult::Found(values);
    }
}
