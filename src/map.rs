//! Map definitions and the map selector (§3, §4.1 tie-break rule).
//!
//! A read-only, validated structure built once (at config load time, see
//! `config.rs`) and shared across every operation on a `Dict`.

use crate::error::{DictError, DictResult};
use crate::pattern::{self, MatchMode, MatchResult};
use crate::value::ValueType;

/// A single wildcard position: its SQL column name and type (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct PatternField {
    pub column: String,
    pub ty: ValueType,
}

/// Binds a pattern to a SQL table (§3).
#[derive(Debug, Clone)]
pub struct Map {
    pub pattern: String,
    pub table: String,
    pub pattern_fields: Vec<PatternField>,
    /// Result columns; position 0 is the primary value used by set/inc.
    pub value_field: Vec<String>,
    pub value_types: Vec<ValueType>,
    pub username_field: Option<String>,
    pub expire_field: Option<String>,
}

impl Map {
    /// Referential validation spec.md §6 asks the core to perform: field
    /// counts line up, and `pattern` actually declares as many `$` as
    /// `pattern_fields` expects.
    pub fn validate(&self) -> DictResult<()> {
        let dollars = pattern::field_count(&self.pattern);
        if dollars != self.pattern_fields.len() {
            return Err(DictError::InvalidConfig(format!(
                "map for table {:?}: pattern {:?} has {} wildcards but {} pattern_fields",
                self.table,
                self.pattern,
                dollars,
                self.pattern_fields.len()
            )));
        }
        if self.value_field.is_empty() {
            return Err(DictError::InvalidConfig(format!(
                "map for table {:?}: value_field must not be empty",
                self.table
            )));
        }
        if self.value_field.len() != self.value_types.len() {
            return Err(DictError::InvalidConfig(format!(
                "map for table {:?}: value_field has {} columns but value_types has {}",
                self.table,
                self.value_field.len(),
                self.value_types.len()
            )));
        }
        for (label, col) in [("username_field", &self.username_field), ("expire_field", &self.expire_field)] {
            if let Some(col) = col {
                if col.contains('$') || col.contains('/') {
                    return Err(DictError::InvalidConfig(format!(
                        "map for table {:?}: {label} {col:?} must be a plain column name, not a pattern",
                        self.table
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_private_scope(&self) -> bool {
        self.pattern.starts_with(DICT_PATH_PRIVATE)
    }
}

/// Scope prefixes (§3, §6). Single characters by contract, kept as named
/// `&str` constants for call-site clarity rather than bare literals.
pub const DICT_PATH_SHARED: &str = "shared/";
pub const DICT_PATH_PRIVATE: &str = "priv/";

/// An ordered, read-only collection of maps, matched first-match-wins in
/// declaration order (§4.1).
#[derive(Debug, Clone, Default)]
pub struct MapSet {
    maps: Vec<Map>,
}

impl MapSet {
    pub fn new(maps: Vec<Map>) -> DictResult<Self> {
        for m in &maps {
            m.validate()?;
        }
        Ok(MapSet { maps })
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Map> {
        self.maps.get(idx)
    }

    /// First map (in declaration order) whose pattern exactly matches
    /// `path`, plus its bound values.
    pub fn select_exact(&self, path: &str) -> Option<(usize, &Map, MatchResult)> {
        for (idx, m) in self.maps.iter().enumerate() {
            let r = pattern::match_pattern(&m.pattern, path, MatchMode::Exact, true);
            if r.matched {
                return Some((idx, m, r));
            }
        }
        None
    }

    /// True if some map's pattern fully matched a prefix of `path` but the
    /// path had trailing segments left over — used by the lookup engine
    /// (§4.3, §4.7) to raise the specific "Key continues past the matched
    /// pattern" error instead of a generic "no map matched" when
    /// `select_exact` finds nothing.
    pub fn any_exceeded(&self, path: &str) -> bool {
        self.maps
            .iter()
            .any(|m| pattern::match_pattern(&m.pattern, path, MatchMode::Exact, true).exceeded)
    }

    /// Enumerate maps starting at `from_idx` whose pattern partially
    /// matches `path` (used by the iteration engine's map-to-map chaining,
    /// §4.8).
    pub fn select_partial_from(
        &self,
        from_idx: usize,
        path: &str,
        recurse: bool,
    ) -> Option<(usize, &Map, MatchResult)> {
        for idx in from_idx..self.maps.len() {
            let m = &self.maps[idx];
            let r = pattern::match_pattern(&m.pattern, path, MatchMode::Partial, recurse);
            if r.matched {
                return Some((idx, m, r));
            }
        }
        None
    }
}
