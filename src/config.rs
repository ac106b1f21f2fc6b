//! Configuration (§4.12, ambient): the on-disk shape maps are loaded from
//! before the matcher ever sees them. Loading itself ("parsed elsewhere",
//! spec.md §6) is out of scope in the sense that this crate does not own a
//! host-wide config format; what it does own is turning already-parsed
//! records into validated `Map`s: load the raw shape, then run referential
//! validation once so every later match/query step can trust it.

use serde::Deserialize;

use crate::error::{DictError, DictResult};
use crate::map::{Map, MapSet, PatternField};
use crate::value::ValueType;

#[derive(Debug, Clone, Deserialize)]
pub struct PatternFieldConfig {
    pub column: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    pub pattern: String,
    pub table: String,
    #[serde(default)]
    pub pattern_fields: Vec<PatternFieldConfig>,
    pub value_field: String,
    pub value_types: Vec<String>,
    #[serde(default)]
    pub username_field: Option<String>,
    #[serde(default)]
    pub expire_field: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DictConfig {
    #[serde(default)]
    pub maps: Vec<MapConfig>,
}

impl DictConfig {
    pub fn from_toml(text: &str) -> DictResult<Self> {
        toml::from_str(text).map_err(|e| DictError::InvalidConfig(e.to_string()))
    }

    pub fn from_json(text: &str) -> DictResult<Self> {
        serde_json::from_str(text).map_err(|e| DictError::InvalidConfig(e.to_string()))
    }

    pub fn into_map_set(self) -> DictResult<MapSet> {
        let maps = self
            .maps
            .into_iter()
            .map(Map::try_from)
            .collect::<DictResult<Vec<_>>>()?;
        MapSet::new(maps)
    }
}

impl TryFrom<MapConfig> for Map {
    type Error = DictError;

    fn try_from(cfg: MapConfig) -> DictResult<Map> {
        let pattern_fields = cfg
            .pattern_fields
            .into_iter()
            .map(|f| {
                let ty = ValueType::from_str(&f.ty).ok_or_else(|| {
                    DictError::InvalidConfig(format!(
                        "pattern field {:?}: unknown type {:?}",
                        f.column, f.ty
                    ))
                })?;
                Ok(PatternField { column: f.column, ty })
            })
            .collect::<DictResult<Vec<_>>>()?;

        let value_field: Vec<String> = cfg
            .value_field
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let value_types = cfg
            .value_types
            .iter()
            .map(|t| {
                ValueType::from_str(t)
                    .ok_or_else(|| DictError::InvalidConfig(format!("unknown value type {t:?}")))
            })
            .collect::<DictResult<Vec<_>>>()?;

        let map = Map {
            pattern: cfg.pattern,
            table: cfg.table,
            pattern_fields,
            value_field,
            value_types,
            username_field: cfg.username_field,
            expire_field: cfg.expire_field,
        };
        map.validate()?;
        Ok(map)
    }
}
