use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

/// One exported entity. Objects keep their source key order.
pub type ArticleRecord = Value;

/// A resolved pointer to a binary image asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Always ends in `.png`, `.jpg` or `.jpeg`
    pub filename: String,
}

/// A pending download: fetch `url` into `<image dir>/<filename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct MapRecord {
    pub id: Option<String>,
    pub title: String,
    pub source_url: Option<String>,
    pub folder: PathBuf,
    pub normalized_title: String,
    pub image: Option<ImageRef>,
}

/// Returns the trimmed string at `key` if present and not blank.
pub fn str_field<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Identifiers arrive as strings or numbers; blank strings, zero and other
/// kinds count as absent.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// String form of a scalar without JSON quoting.
pub fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn entity_class(record: &Value) -> &str {
    record
        .get("entityClass")
        .and_then(Value::as_str)
        .unwrap_or("")
}
