//! Value codec (§4.2): parse/emit the five SQL value kinds, hex<->binary,
//! UUID canonicalisation. A small, closed enum with `from_str`/`as_str`
//! rather than a trait per kind.

use crate::error::TypeError;

/// Closed set of SQL value kinds a pattern field or value column may hold
/// (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Int64,
    Uint64,
    Double,
    Uuid,
    HexBlob,
}

impl ValueType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STRING" => Some(Self::String),
            "INT64" => Some(Self::Int64),
            "UINT64" => Some(Self::Uint64),
            "DOUBLE" => Some(Self::Double),
            "UUID" => Some(Self::Uuid),
            "HEXBLOB" => Some(Self::HexBlob),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Int64 => "INT64",
            Self::Uint64 => "UINT64",
            Self::Double => "DOUBLE",
            Self::Uuid => "UUID",
            Self::HexBlob => "HEXBLOB",
        }
    }
}

/// A value bound into a prepared statement parameter slot. The driver
/// contract (§6) binds by column index per value kind; this is what a
/// `Map`'s value/pattern columns get encoded into before binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    /// 16 raw bytes.
    Uuid([u8; 16]),
    /// Raw bytes, optionally followed by a literal text suffix (HEXBLOB's
    /// `LIKE`-suffix trick, §4.2).
    Blob(Vec<u8>, String),
}

/// `encode(type, text, suffix)` from §4.2.
pub fn encode(ty: ValueType, text: &str, suffix: &str) -> Result<ParamValue, TypeError> {
    match ty {
        ValueType::String => Ok(ParamValue::Text(format!("{text}{suffix}"))),
        ValueType::Int64 => {
            if !suffix.is_empty() {
                return Err(TypeError::SuffixNotAllowed(ty.as_str().to_string()));
            }
            text.parse::<i64>()
                .map(ParamValue::Int64)
                .map_err(|_| TypeError::InvalidInt64(text.to_string()))
        }
        ValueType::Uint64 => {
            if !suffix.is_empty() {
                return Err(TypeError::SuffixNotAllowed(ty.as_str().to_string()));
            }
            if text.starts_with('-') {
                return Err(TypeError::InvalidUint64(text.to_string()));
            }
            text.parse::<u64>()
                .map(ParamValue::Uint64)
                .map_err(|_| TypeError::InvalidUint64(text.to_string()))
        }
        ValueType::Double => {
            if !suffix.is_empty() {
                return Err(TypeError::SuffixNotAllowed(ty.as_str().to_string()));
            }
            text.parse::<f64>()
                .map(ParamValue::Double)
                .map_err(|_| TypeError::InvalidDouble(text.to_string()))
        }
        ValueType::Uuid => parse_uuid(text).map(ParamValue::Uuid),
        ValueType::HexBlob => parse_hex(text).map(|bytes| ParamValue::Blob(bytes, suffix.to_string())),
    }
}

/// `decode(type, raw) -> string`, always a string per §4.2.
pub fn decode(ty: ValueType, raw: &ParamValue) -> String {
    match (ty, raw) {
        (ValueType::String, ParamValue::Text(s)) => s.clone(),
        (ValueType::Int64, ParamValue::Int64(n)) => n.to_string(),
        (ValueType::Uint64, ParamValue::Uint64(n)) => n.to_string(),
        (ValueType::Double, ParamValue::Double(d)) => d.to_string(),
        (ValueType::Uuid, ParamValue::Uuid(bytes)) => format_uuid(bytes),
        (ValueType::HexBlob, ParamValue::Blob(bytes, _)) => to_hex(bytes),
        _ => panic!("decode: value kind {ty:?} does not match encoded variant {raw:?}"),
    }
}

fn parse_uuid(text: &str) -> Result<[u8; 16], TypeError> {
    let cleaned: String = text.chars().filter(|c| *c != '-').collect();
    if cleaned.len() != 32 || !cleaned.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TypeError::InvalidUuid(text.to_string()));
    }
    let segs: [usize; 5] = [8, 4, 4, 4, 12];
    let mut offset = 0;
    for (i, part) in text.split('-').enumerate() {
        if i >= segs.len() || part.len() != segs[i] {
            return Err(TypeError::InvalidUuid(text.to_string()));
        }
        offset += part.len();
    }
    if text.contains('-') && offset != 32 {
        return Err(TypeError::InvalidUuid(text.to_string()));
    }
    let mut bytes = [0u8; 16];
    for i in 0..16 {
        bytes[i] = u8::from_str_radix(&cleaned[i * 2..i * 2 + 2], 16)
            .map_err(|_| TypeError::InvalidUuid(text.to_string()))?;
    }
    Ok(bytes)
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    let hex = to_hex(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn parse_hex(text: &str) -> Result<Vec<u8>, TypeError> {
    if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TypeError::InvalidHex(text.to_string()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| TypeError::InvalidHex(text.to_string())))
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
