//! Query builder (§4.3–§4.5, §4.9): compose `SELECT`/`INSERT+UPSERT`/
//! `UPDATE`/`DELETE` text with parameter arrays. Dynamic SQL string assembly
//! via `format!`, joined against identifiers quoted through
//! `driver::quote_ident`.

use crate::driver::{quote_ident as qi, DriverCapabilities};
use crate::error::{DictError, DictResult};
use crate::map::Map;
use crate::value::{self, ParamValue};

/// How an iteration's `WHERE` treats unbound path segments (§4.3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurseMode {
    /// `RECURSE_NONE`: every pattern field is bound; plain equality.
    None,
    /// `RECURSE_ONE`: one level of children beneath the bound prefix.
    One,
    /// `RECURSE_FULL`: the whole subtree beneath the bound prefix.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Unsorted,
    ByKey,
    ByValue,
}

/// A built statement: SQL text plus the parameters bound to its `?` slots,
/// in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<ParamValue>,
}

/// Encode every bound pattern value against its declared type, in order.
fn encode_bound(map: &Map, bound_values: &[String]) -> DictResult<Vec<ParamValue>> {
    bound_values
        .iter()
        .zip(map.pattern_fields.iter())
        .map(|(v, f)| value::encode(f.ty, v, "").map_err(DictError::from))
        .collect()
}

/// The `WHERE` clause fragment + its parameters, shared by every statement
/// kind that filters on pattern columns (§4.3).
fn where_clause(
    map: &Map,
    bound_values: &[String],
    recurse: RecurseMode,
    username: Option<&str>,
) -> DictResult<(String, Vec<ParamValue>)> {
    let total = map.pattern_fields.len();
    let n = bound_values.len();

    if n > total {
        return Err(DictError::InvalidKey(
            "Key continues past the matched pattern".to_string(),
        ));
    }
    if recurse == RecurseMode::None && n != total {
        return Err(DictError::InvalidKey(
            "Key continues past the matched pattern".to_string(),
        ));
    }
    if recurse == RecurseMode::One && total.saturating_sub(n) > 1 {
        return Err(DictError::InvalidKey(
            "one-level iteration can only leave a single field unbound".to_string(),
        ));
    }

    let mut clauses = Vec::new();
    let mut params = Vec::new();

    // Equality on every bound field. For RECURSE_ONE/Full with no unbound
    // field remaining, the final bound field still gets its equality here;
    // the depth-guard literal below is appended on top of it.
    for i in 0..n {
        let field = &map.pattern_fields[i];
        clauses.push(format!("{} = ?", qi(&field.column)));
        params.push(value::encode(field.ty, &bound_values[i], "")?);
    }

    match recurse {
        RecurseMode::None => {}
        RecurseMode::One => {
            if n < total {
                // The remaining field binds a single path segment (§4.1: `$`
                // never consumes a `/`), so its column never holds a value
                // with embedded path separators to filter on. The one-level
                // depth limit is already enforced above (more than one field
                // left unbound is rejected before this match runs); no
                // further clause is needed here.
            } else if let Some(last) = map.pattern_fields.last() {
                // Path already bound the final field (§4.3): literal,
                // unparameterised depth guard on that same column.
                clauses.push(format!("{} LIKE '%'", qi(&last.column)));
                clauses.push(format!("{} NOT LIKE '%/%'", qi(&last.column)));
            }
        }
        RecurseMode::Full => {
            // Same reasoning as RECURSE_ONE above: every pattern field,
            // bound or not, holds a plain segment value with no embedded
            // `/`, so there is nothing to discriminate on beyond the
            // equalities for already-bound fields above. Full recursion
            // selects every row under that prefix.
        }
    }

    if let (true, Some(col), Some(user)) = (
        map.is_private_scope(),
        map.username_field.as_deref(),
        username,
    ) {
        clauses.push(format!("{} = ?", qi(col)));
        params.push(ParamValue::Text(user.to_string()));
    }

    if clauses.is_empty() {
        return Ok((String::new(), params));
    }
    Ok((clauses.join(" AND "), params))
}

/// §4.3: `SELECT` with a recursion-mode `WHERE`, optional ordering, optional
/// `LIMIT`.
#[allow(clippy::too_many_arguments)]
pub fn build_select(
    map: &Map,
    bound_values: &[String],
    recurse: RecurseMode,
    username: Option<&str>,
    sort: SortOrder,
    max_rows: Option<u32>,
    already_returned: u32,
    project_value: bool,
    project_expire: bool,
    project_unbound_pattern_cols: bool,
) -> DictResult<BuiltQuery> {
    let mut select_cols: Vec<String> = Vec::new();
    if project_expire {
        if let Some(ef) = &map.expire_field {
            select_cols.push(qi(ef));
        }
    }
    if project_value {
        select_cols.extend(map.value_field.iter().map(|c| qi(c)));
    }
    if project_unbound_pattern_cols {
        select_cols.extend(
            map.pattern_fields[bound_values.len()..]
                .iter()
                .map(|f| qi(&f.column)),
        );
    }
    if select_cols.is_empty() {
        select_cols.push("1".to_string());
    }

    let (where_sql, mut params) = where_clause(map, bound_values, recurse, username)?;

    let mut sql = format!("SELECT {} FROM {}", select_cols.join(", "), qi(&map.table));
    if !where_sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }

    match sort {
        SortOrder::Unsorted => {}
        SortOrder::ByKey => {
            let cols: Vec<String> = map.pattern_fields.iter().map(|f| qi(&f.column)).collect();
            if !cols.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&cols.join(", "));
            }
        }
        SortOrder::ByValue => {
            let cols: Vec<String> = map.value_field.iter().map(|c| qi(c)).collect();
            if !cols.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&cols.join(", "));
            }
        }
    }

    if let Some(max) = max_rows {
        let remaining = max.saturating_sub(already_returned);
        sql.push_str(&format!(" LIMIT {remaining}"));
    }

    Ok(BuiltQuery { sql, params })
}

/// §4.4: one multi-column UPSERT for a batch of `(map, value)` pairs that
/// share table + pattern values + username scope (the transaction
/// batcher's flush). `bound_values` is common to every entry in the batch.
pub struct SetEntry<'a> {
    pub map: &'a Map,
    /// One value per `map.value_field[0]`-shaped write; only the primary
    /// column participates in the batch per §3/§4.4, later entries in the
    /// batch override earlier ones deterministically (§9 E3 decision, see
    /// DESIGN.md: same-key repeats are rejected before reaching here).
    pub value: String,
}

pub fn build_upsert(
    table: &str,
    bound_values: &[String],
    map: &Map,
    entries: &[SetEntry],
    username: Option<&str>,
    expire_secs: u32,
    now_epoch: i64,
    caps: DriverCapabilities,
) -> DictResult<BuiltQuery> {
    debug_assert!(entries.iter().all(|e| e.map.table == table));

    let pattern_cols: Vec<String> = map.pattern_fields.iter().map(|f| qi(&f.column)).collect();
    // One value column per queue entry, each encoded against its own map's
    // primary value type (a merged batch may span two maps that write
    // different columns of the same table under the same key). Entries for
    // the same column replace earlier ones rather than duplicating it (E3's
    // rejection makes this branch unreachable for inputs the batcher itself
    // produced, but a caller hand-building a batch still gets sane output).
    let mut value_cols: Vec<(String, ParamValue)> = Vec::new();
    for e in entries {
        let col = e.map.value_field[0].clone();
        let encoded = value::encode(e.map.value_types[0], &e.value, "")?;
        match value_cols.iter_mut().find(|(c, _)| *c == col) {
            Some(slot) => slot.1 = encoded,
            None => value_cols.push((col, encoded)),
        }
    }

    let mut all_insert_cols: Vec<String> = value_cols.iter().map(|(c, _)| qi(c)).collect();
    let mut params: Vec<ParamValue> = value_cols.iter().map(|(_, v)| v.clone()).collect();

    if let (true, Some(col)) = (map.is_private_scope(), map.username_field.as_deref()) {
        all_insert_cols.push(qi(col));
        params.push(ParamValue::Text(username.unwrap_or_default().to_string()));
    }
    let mut expire_written = false;
    if expire_secs > 0 {
        if let Some(ef) = &map.expire_field {
            all_insert_cols.push(qi(ef));
            params.push(ParamValue::Int64(now_epoch + expire_secs as i64));
            expire_written = true;
        }
    }
    all_insert_cols.extend(pattern_cols.clone());
    params.extend(encode_bound(map, bound_values)?);

    let placeholders: Vec<&str> = all_insert_cols.iter().map(|_| "?").collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qi(table),
        all_insert_cols.join(", "),
        placeholders.join(", ")
    );

    // Re-bind the same values for the UPDATE side (§4.4: "doubles the
    // parameter list for UPSERT dialects"). Pattern columns are the
    // conflict key and are never part of the update set.
    let mut push_update_clause = |sql: &mut String, params: &mut Vec<ParamValue>| {
        let mut sets: Vec<String> = value_cols
            .iter()
            .map(|(c, v)| {
                params.push(v.clone());
                format!("{} = ?", qi(c))
            })
            .collect();
        if expire_written {
            if let Some(ef) = &map.expire_field {
                sets.push(format!("{} = ?", qi(ef)));
                params.push(ParamValue::Int64(now_epoch + expire_secs as i64));
            }
        }
        sql.push_str(&sets.join(", "));
    };

    if caps.contains(DriverCapabilities::ON_DUPLICATE_KEY) {
        sql.push_str(" ON DUPLICATE KEY UPDATE ");
        push_update_clause(&mut sql, &mut params);
    } else if caps.contains(DriverCapabilities::ON_CONFLICT_DO) {
        let mut conflict_cols = pattern_cols.clone();
        if let (true, Some(col)) = (map.is_private_scope(), map.username_field.as_deref()) {
            conflict_cols.push(qi(col));
        }
        sql.push_str(&format!(" ON CONFLICT ({}) DO UPDATE SET ", conflict_cols.join(", ")));
        push_update_clause(&mut sql, &mut params);
    }
    // Else: bare INSERT, no capability to express an upsert (§4.4).

    Ok(BuiltQuery { sql, params })
}

/// §4.5: a single `UPDATE ... SET col = col + ?` for a batch of increments
/// sharing table + bound pattern values.
pub fn build_increment(
    map: &Map,
    bound_values: &[String],
    deltas: &[i64],
    username: Option<&str>,
) -> DictResult<BuiltQuery> {
    let col = qi(&map.value_field[0]);
    let mut params = Vec::new();
    let total: i64 = deltas.iter().sum();
    let set_clause = format!("{col} = {col} + ?");
    params.push(ParamValue::Int64(total));

    let (where_sql, where_params) = where_clause(map, bound_values, RecurseMode::None, username)?;
    let mut sql = format!("UPDATE {} SET {}", qi(&map.table), set_clause);
    if !where_sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    params.extend(where_params);
    Ok(BuiltQuery { sql, params })
}

/// `unset`: delete a single bound key outright (§6). Shares the
/// `RECURSE_NONE` `WHERE` with `build_select`'s exact-lookup path.
pub fn build_delete_by_key(
    map: &Map,
    bound_values: &[String],
    username: Option<&str>,
) -> DictResult<BuiltQuery> {
    let (where_sql, params) = where_clause(map, bound_values, RecurseMode::None, username)?;
    let mut sql = format!("DELETE FROM {}", qi(&map.table));
    if !where_sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    Ok(BuiltQuery { sql, params })
}

/// §4.9: bulk `DELETE` for one map's expired rows.
pub fn build_expire_delete(map: &Map, now_epoch_secs: i64) -> Option<BuiltQuery> {
    let ef = map.expire_field.as_deref()?;
    Some(BuiltQuery {
        sql: format!("DELETE FROM {} WHERE {} <= ?", qi(&map.table), qi(ef)),
        params: vec![ParamValue::Int64(now_epoch_secs)],
    })
}
