//! In-memory `SqlConnection` fake used by this crate's own tests.
//!
//! Grounded on the test-fake style of
//! `other_examples/0f5834ec_sethhall-matchy__src-database.rs.rs` (a small
//! owned-storage stand-in for the real on-disk driver). This module only exists to let
//! `lookup.rs`/`iter.rs`/`txn.rs`/`expire.rs`/`dict.rs` exercise the exact
//! SQL text `query.rs` emits without a live database; it is not part of the
//! driver contract itself (§6 keeps that external).

use std::collections::HashMap;

use crate::driver::{DriverCapabilities, Execution, SqlConnection, SqlResult, SqlRow, SqlTransaction};
use crate::error::{DictError, DictResult};
use crate::value::ParamValue;

#[derive(Debug, Clone, Default)]
pub struct MemoryRow(pub Vec<(String, ParamValue)>);

impl MemoryRow {
    fn get_named(&self, col: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(c, _)| c == col).map(|(_, v)| v)
    }
}

impl SqlRow for MemoryRow {
    fn get(&self, idx: usize) -> Option<ParamValue> {
        self.0.get(idx).map(|(_, v)| v.clone())
    }

    fn column_count(&self) -> usize {
        self.0.len()
    }
}

pub struct MemoryResult {
    rows: std::vec::IntoIter<MemoryRow>,
}

impl SqlResult for MemoryResult {
    fn next_row(&mut self) -> DictResult<Option<Box<dyn SqlRow>>> {
        Ok(self.rows.next().map(|r| Box::new(r) as Box<dyn SqlRow>))
    }
}

#[derive(Clone, Default)]
struct MemoryTable {
    /// Columns that form this table's conflict key for UPSERT (typically
    /// pattern columns plus a username column).
    key_columns: Vec<String>,
    rows: Vec<MemoryRow>,
}

/// An in-memory stand-in for a single connection. Not thread-safe; wrapped
/// in `Arc<Mutex<_>>` by callers the same way a real pooled connection would
/// be (§5, `cache.rs`).
pub struct MemoryDriver {
    caps: DriverCapabilities,
    tables: HashMap<String, MemoryTable>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        MemoryDriver {
            caps: DriverCapabilities::PREP_STATEMENTS | DriverCapabilities::ON_DUPLICATE_KEY,
            tables: HashMap::new(),
        }
    }

    pub fn with_capabilities(caps: DriverCapabilities) -> Self {
        MemoryDriver { caps, tables: HashMap::new() }
    }

    /// Declares a table and the columns that uniquely identify a row, the
    /// way a real schema's primary/unique key would (out of scope per §1,
    /// but a test fixture still needs to know it to emulate `ON DUPLICATE
    /// KEY UPDATE` / `ON CONFLICT DO UPDATE`).
    pub fn register_table(&mut self, name: &str, key_columns: Vec<String>) {
        self.tables.entry(name.to_string()).or_default().key_columns = key_columns;
    }

    pub fn table_rows(&self, name: &str) -> Vec<Vec<(String, ParamValue)>> {
        self.tables
            .get(name)
            .map(|t| t.rows.iter().map(|r| r.0.clone()).collect())
            .unwrap_or_default()
    }

    pub fn seed_row(&mut self, table: &str, row: Vec<(&str, ParamValue)>) {
        let entry = self.tables.entry(table.to_string()).or_default();
        entry
            .rows
            .push(MemoryRow(row.into_iter().map(|(c, v)| (c.to_string(), v)).collect()));
    }

    fn exec_sql(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution> {
        if sql.starts_with("SELECT ") {
            self.exec_select(sql, params)
        } else if sql.starts_with("INSERT INTO ") {
            self.exec_insert(sql, params)
        } else if sql.starts_with("UPDATE ") {
            self.exec_update(sql, params)
        } else if sql.starts_with("DELETE FROM ") {
            self.exec_delete(sql, params)
        } else {
            Err(DictError::Sql(format!("unsupported statement: {sql}")))
        }
    }

    fn exec_select(&self, sql: &str, params: &[ParamValue]) -> DictResult<Execution> {
        let rest = sql.strip_prefix("SELECT ").unwrap();
        let (cols_part, mut remaining) = split_once_str(rest, " FROM ").ok_or_else(|| {
            DictError::Sql(format!("malformed SELECT (missing FROM): {sql}"))
        })?;
        let cols: Vec<String> = split_top(cols_part, ", ").iter().map(|s| unquote(s)).collect();

        let mut limit: Option<usize> = None;
        if let Some(idx) = remaining.find(" LIMIT ") {
            limit = remaining[idx + 7..].trim().parse::<usize>().ok();
            remaining = &remaining[..idx];
        }
        let mut order_cols: Vec<String> = Vec::new();
        if let Some(idx) = remaining.find(" ORDER BY ") {
            order_cols = split_top(&remaining[idx + 10..], ", ").iter().map(|s| unquote(s)).collect();
            remaining = &remaining[..idx];
        }
        let mut where_clause: Option<&str> = None;
        if let Some(idx) = remaining.find(" WHERE ") {
            where_clause = Some(&remaining[idx + 7..]);
            remaining = &remaining[..idx];
        }
        let table = unquote(remaining.trim());

        let empty = MemoryTable::default();
        let tbl = self.tables.get(&table).unwrap_or(&empty);

        let mut matched: Vec<&MemoryRow> = Vec::new();
        let conds = where_clause.map(|w| split_top(w, " AND ")).unwrap_or_default();
        for row in &tbl.rows {
            // Every row re-walks the same WHERE text against the same
            // params, so the placeholder cursor always starts at 0.
            let mut pi = 0usize;
            if eval_conditions(&conds, row, params, &mut pi) {
                matched.push(row);
            }
        }

        if !order_cols.is_empty() {
            matched.sort_by(|a, b| {
                for c in &order_cols {
                    let av = a.get_named(c).map(display_value).unwrap_or_default();
                    let bv = b.get_named(c).map(display_value).unwrap_or_default();
                    let ord = av.cmp(&bv);
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }
        if let Some(n) = limit {
            matched.truncate(n);
        }

        let projected: Vec<MemoryRow> = matched
            .into_iter()
            .map(|row| {
                let vals = cols
                    .iter()
                    .map(|c| {
                        if c == "1" {
                            (c.clone(), ParamValue::Int64(1))
                        } else {
                            (c.clone(), row.get_named(c).cloned().unwrap_or(ParamValue::Text(String::new())))
                        }
                    })
                    .collect();
                MemoryRow(vals)
            })
            .collect();

        Ok(Execution::Rows(Box::new(MemoryResult { rows: projected.into_iter() })))
    }

    fn exec_insert(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution> {
        let rest = sql.strip_prefix("INSERT INTO ").unwrap();
        let paren = rest.find(" (").ok_or_else(|| DictError::Sql(format!("malformed INSERT: {sql}")))?;
        let table = unquote(&rest[..paren]);
        let after_table = &rest[paren + 2..];
        let close = after_table.find(')').ok_or_else(|| DictError::Sql(format!("malformed INSERT: {sql}")))?;
        let insert_cols: Vec<String> = split_top(&after_table[..close], ", ").iter().map(|s| unquote(s)).collect();

        let after_cols = &after_table[close + 1..];
        let values_start = after_cols.find('(').ok_or_else(|| DictError::Sql(format!("malformed INSERT: {sql}")))?;
        let values_end = after_cols[values_start..]
            .find(')')
            .map(|i| values_start + i)
            .ok_or_else(|| DictError::Sql(format!("malformed INSERT: {sql}")))?;
        let n_values = insert_cols.len();
        let insert_params: Vec<ParamValue> = params[..n_values].to_vec();
        let rest_params = &params[n_values..];

        let tail = after_cols[values_end + 1..].trim();
        let update_cols: Vec<String> = if let Some(upd) = tail.strip_prefix(" ON DUPLICATE KEY UPDATE ").or_else(|| tail.strip_prefix("ON DUPLICATE KEY UPDATE ")) {
            parse_set_list(upd)
        } else if let Some(idx) = tail.find("DO UPDATE SET ") {
            parse_set_list(&tail[idx + "DO UPDATE SET ".len()..])
        } else {
            Vec::new()
        };
        let update_params: Vec<ParamValue> = rest_params[..update_cols.len()].to_vec();

        let entry = self.tables.entry(table).or_default();
        let new_row: Vec<(String, ParamValue)> = insert_cols.into_iter().zip(insert_params).collect();

        let key_cols = entry.key_columns.clone();
        let existing = entry.rows.iter_mut().find(|r| {
            !key_cols.is_empty()
                && key_cols.iter().all(|k| {
                    let new_v = new_row.iter().find(|(c, _)| c == k).map(|(_, v)| v);
                    let old_v = r.get_named(k);
                    new_v.is_some() && new_v == old_v
                })
        });

        match existing {
            Some(row) => {
                if update_cols.is_empty() {
                    return Err(DictError::Sql("duplicate key on bare INSERT".to_string()));
                }
                for (col, val) in update_cols.into_iter().zip(update_params) {
                    if let Some(slot) = row.0.iter_mut().find(|(c, _)| *c == col) {
                        slot.1 = val;
                    } else {
                        row.0.push((col, val));
                    }
                }
                Ok(Execution::AffectedRows(1))
            }
            None => {
                entry.rows.push(MemoryRow(new_row));
                Ok(Execution::AffectedRows(1))
            }
        }
    }

    fn exec_update(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution> {
        let rest = sql.strip_prefix("UPDATE ").unwrap();
        let (table_part, after_set) = split_once_str(rest, " SET ").ok_or_else(|| DictError::Sql(format!("malformed UPDATE: {sql}")))?;
        let table = unquote(table_part.trim());

        let (set_part, where_part) = match after_set.find(" WHERE ") {
            Some(idx) => (&after_set[..idx], Some(&after_set[idx + 7..])),
            None => (after_set, None),
        };
        // `"col" = "col" + ?`
        let set_col = unquote(set_part.split(" = ").next().unwrap_or("").trim());
        let delta = params[0].clone();
        let mut pi = 1usize;

        let conds = where_part.map(|w| split_top(w, " AND ")).unwrap_or_default();

        let entry = self.tables.entry(table).or_default();
        let mut affected = 0u64;
        for row in entry.rows.iter_mut() {
            let mut row_pi = pi;
            if eval_conditions(&conds, row, params, &mut row_pi) {
                if let Some(slot) = row.0.iter_mut().find(|(c, _)| *c == set_col) {
                    slot.1 = add_delta(&slot.1, &delta);
                } else {
                    row.0.push((set_col.clone(), delta.clone()));
                }
                affected += 1;
            }
            pi = row_pi;
        }
        Ok(Execution::AffectedRows(affected))
    }

    fn exec_delete(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution> {
        let rest = sql.strip_prefix("DELETE FROM ").unwrap();
        let (table_part, where_part) = split_once_str(rest, " WHERE ").ok_or_else(|| DictError::Sql(format!("malformed DELETE: {sql}")))?;
        let table = unquote(table_part.trim());
        let conds = split_top(where_part, " AND ");

        let entry = self.tables.entry(table).or_default();
        let before = entry.rows.len();
        let mut pi = 0usize;
        entry.rows.retain(|row| {
            let mut row_pi = pi;
            let keep = !eval_conditions(&conds, row, params, &mut row_pi);
            pi = row_pi;
            keep
        });
        Ok(Execution::AffectedRows((before - entry.rows.len()) as u64))
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlConnection for MemoryDriver {
    fn capabilities(&self) -> DriverCapabilities {
        self.caps
    }

    fn execute(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution> {
        self.exec_sql(sql, params)
    }

    fn execute_async(
        &mut self,
        sql: &str,
        params: &[ParamValue],
        callback: Box<dyn FnOnce(DictResult<Execution>)>,
    ) {
        callback(self.exec_sql(sql, params));
    }

    fn begin(&mut self) -> DictResult<Box<dyn SqlTransaction + '_>> {
        let snapshot: HashMap<String, MemoryTable> = self.tables.clone();
        Ok(Box::new(MemoryTxn { driver: self, snapshot }))
    }
}

struct MemoryTxn<'a> {
    driver: &'a mut MemoryDriver,
    snapshot: HashMap<String, MemoryTable>,
}

impl SqlTransaction for MemoryTxn<'_> {
    fn execute(&mut self, sql: &str, params: &[ParamValue]) -> DictResult<Execution> {
        self.driver.exec_sql(sql, params)
    }

    fn commit(self: Box<Self>) -> DictResult<()> {
        Ok(())
    }

    fn commit_async(self: Box<Self>, callback: Box<dyn FnOnce(DictResult<()>)>) {
        callback(Ok(()));
    }

    fn rollback(self: Box<Self>) -> DictResult<()> {
        self.driver.tables = self.snapshot;
        Ok(())
    }
}

fn eval_conditions(conds: &[&str], row: &MemoryRow, params: &[ParamValue], pi: &mut usize) -> bool {
    for cond in conds {
        if !eval_condition(cond, row, params, pi) {
            return false;
        }
    }
    true
}

fn eval_condition(cond: &str, row: &MemoryRow, params: &[ParamValue], pi: &mut usize) -> bool {
    let cond = cond.trim();
    if let Some(idx) = cond.find(" NOT LIKE ") {
        let col = unquote(cond[..idx].trim());
        let pattern_lit = cond[idx + " NOT LIKE ".len()..].trim();
        let pattern = if pattern_lit == "?" {
            let v = display_value(&params[*pi]);
            *pi += 1;
            v
        } else {
            unquote_single(pattern_lit)
        };
        let val = row.get_named(&col).map(display_value).unwrap_or_default();
        return !like_match(&val, &pattern);
    }
    if let Some(idx) = cond.find(" LIKE ") {
        let col = unquote(cond[..idx].trim());
        let pattern_lit = cond[idx + " LIKE ".len()..].trim();
        let pattern = if pattern_lit == "?" {
            let v = display_value(&params[*pi]);
            *pi += 1;
            v
        } else {
            unquote_single(pattern_lit)
        };
        let val = row.get_named(&col).map(display_value).unwrap_or_default();
        return like_match(&val, &pattern);
    }
    if let Some(idx) = cond.find(" <= ") {
        let col = unquote(cond[..idx].trim());
        let rhs = cond[idx + " <= ".len()..].trim();
        let bound = if rhs == "?" {
            let v = params[*pi].clone();
            *pi += 1;
            v
        } else {
            ParamValue::Text(unquote_single(rhs))
        };
        let val = row.get_named(&col).cloned().unwrap_or(ParamValue::Text(String::new()));
        return value_le(&val, &bound);
    }
    if let Some(idx) = cond.find(" = ") {
        let col = unquote(cond[..idx].trim());
        let rhs = cond[idx + " = ".len()..].trim();
        let expected = if rhs == "?" {
            let v = params[*pi].clone();
            *pi += 1;
            v
        } else {
            ParamValue::Text(unquote_single(rhs))
        };
        let val = row.get_named(&col).cloned().unwrap_or(ParamValue::Text(String::new()));
        return display_value(&val) == display_value(&expected);
    }
    false
}

fn parse_set_list(s: &str) -> Vec<String> {
    split_top(s, ", ")
        .iter()
        .map(|pair| unquote(pair.split(" = ").next().unwrap_or("").trim()))
        .collect()
}

/// Splits on the first occurrence of `sep`, returning `(before, after)`.
fn split_once_str<'a>(s: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    s.find(sep).map(|idx| (&s[..idx], &s[idx + sep.len()..]))
}

/// Splits `s` on `sep` without regard to quoting (our generated SQL never
/// nests `sep` inside an identifier or literal).
fn split_top<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    s.split(sep).collect()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        s[1..s.len() - 1].replace("\"\"", "\"")
    } else {
        s.to_string()
    }
}

fn unquote_single(s: &str) -> String {
    let s = s.trim();
    if s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2 {
        s[1..s.len() - 1].replace("''", "'")
    } else {
        s.to_string()
    }
}

fn display_value(v: &ParamValue) -> String {
    match v {
        ParamValue::Text(s) => s.clone(),
        ParamValue::Int64(n) => n.to_string(),
        ParamValue::Uint64(n) => n.to_string(),
        ParamValue::Double(d) => d.to_string(),
        ParamValue::Uuid(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        ParamValue::Blob(bytes, suffix) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            format!("{hex}{suffix}")
        }
    }
}

fn value_le(a: &ParamValue, b: &ParamValue) -> bool {
    match (a, b) {
        (ParamValue::Int64(x), ParamValue::Int64(y)) => x <= y,
        (ParamValue::Uint64(x), ParamValue::Uint64(y)) => x <= y,
        (ParamValue::Double(x), ParamValue::Double(y)) => x <= y,
        _ => display_value(a) <= display_value(b),
    }
}

fn add_delta(current: &ParamValue, delta: &ParamValue) -> ParamValue {
    match (current, delta) {
        (ParamValue::Int64(c), ParamValue::Int64(d)) => ParamValue::Int64(c + d),
        (ParamValue::Uint64(c), ParamValue::Uint64(d)) => ParamValue::Uint64(c + d),
        (ParamValue::Double(c), ParamValue::Double(d)) => ParamValue::Double(c + d),
        _ => delta.clone(),
    }
}

/// LIKE-pattern match with `%` as the only wildcard, matching the handful of
/// patterns `query.rs` ever emits (`"/%"`, `"/%/%"`, literal `"%"`).
fn like_match(value: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return value == pattern;
    }
    let mut pos = 0usize;
    if !value[pos..].starts_with(parts[0]) {
        return false;
    }
    pos += parts[0].len();
    for mid in &parts[1..parts.len() - 1] {
        if mid.is_empty() {
            continue;
        }
        match value[pos..].find(mid) {
            Some(idx) => pos += idx + mid.len(),
            None => return false,
        }
    }
    let last = parts[parts.len() - 1];
    if last.is_empty() {
        return true;
    }
    value[pos..].ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_match_prefix_wildcard() {
        assert!(like_match("/alice", "/%"));
        assert!(!like_match("alice", "/%"));
    }

    #[test]
    fn like_match_two_segments() {
        assert!(like_match("/alice/42", "/%/%"));
        assert!(!like_match("/alice", "/%/%"));
    }

    #[test]
    fn select_and_insert_round_trip() {
        let mut d = MemoryDriver::new();
        d.register_table("Q", vec!["u".to_string()]);
        d.execute(
            "INSERT INTO \"Q\" (\"v\", \"u\") VALUES (?, ?) ON DUPLICATE KEY UPDATE \"v\" = ?",
            &[ParamValue::Int64(5), ParamValue::Text("alice".to_string()), ParamValue::Int64(5)],
        )
        .unwrap();
        let exec = d
            .execute("SELECT \"v\" FROM \"Q\" WHERE \"u\" = ?", &[ParamValue::Text("alice".to_string())])
            .unwrap();
        match exec {
            Execution::Rows(mut r) => {
                let row = r.next_row().unwrap().unwrap();
                assert_eq!(row.get(0), Some(ParamValue::Int64(5)));
            }
            _ => panic!("expected rows"),
        }
    }
}
