//! Tagged string values for reader keyword arguments.
//!
//! Job files and the command line pass reader options as strings. A string
//! may start with a tag such as `<bool>` or `<float>` selecting how the rest
//! is converted. The converter table is pluggable; tags that would evaluate
//! code (`<eval>`, `<exec>`, `<import>`) are refused unless a caller
//! registers them explicitly.

use crate::error::{Result, SmError};
use crate::frame::parse_timestamp;
use crate::paths::expand_user;
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Tags never provided by the default table.
pub const REFUSED_TAGS: [&str; 3] = ["eval", "exec", "import"];

/// A converted keyword-argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum KwValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<KwValue>),
    Dict(BTreeMap<String, KwValue>),
    Path(PathBuf),
    DateTime(NaiveDateTime),
}

impl KwValue {
    pub fn kind(&self) -> &'static str {
        match self {
            KwValue::Null => "null",
            KwValue::Bool(_) => "bool",
            KwValue::Int(_) => "int",
            KwValue::Float(_) => "float",
            KwValue::Str(_) => "str",
            KwValue::List(_) => "list",
            KwValue::Dict(_) => "dict",
            KwValue::Path(_) => "path",
            KwValue::DateTime(_) => "datetime",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            KwValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric value; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KwValue::Int(i) => Some(*i as f64),
            KwValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KwValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// List of strings; a bare string is a one-element list.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            KwValue::Str(s) => Some(vec![s.clone()]),
            KwValue::List(items) => items
                .iter()
                .map(|item| match item {
                    KwValue::Str(s) => Some(s.clone()),
                    KwValue::Int(i) => Some(i.to_string()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, KwValue>> {
        match self {
            KwValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, KwValue::Null)
    }
}

/// Conversion function behind one tag.
pub type Converter = fn(&str) -> Result<KwValue>;

fn conversion_error(tag: &str, value: &str, reason: impl Into<String>) -> SmError {
    SmError::Conversion {
        tag: tag.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn convert_bool(value: &str) -> Result<KwValue> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(KwValue::Bool(true)),
        "false" | "0" | "no" => Ok(KwValue::Bool(false)),
        _ => Err(conversion_error("bool", value, "expected true or false")),
    }
}

fn convert_int(value: &str) -> Result<KwValue> {
    value
        .trim()
        .parse::<i64>()
        .map(KwValue::Int)
        .map_err(|e| conversion_error("int", value, e.to_string()))
}

fn convert_float(value: &str) -> Result<KwValue> {
    value
        .trim()
        .parse::<f64>()
        .map(KwValue::Float)
        .map_err(|e| conversion_error("float", value, e.to_string()))
}

fn convert_str(value: &str) -> Result<KwValue> {
    Ok(KwValue::Str(value.to_string()))
}

/// Untagged scalar inside a list or dict.
fn infer(value: &str) -> KwValue {
    let value = value.trim();
    if let Ok(KwValue::Bool(b)) = convert_bool(value) {
        if !value.chars().all(|c| c.is_ascii_digit()) {
            return KwValue::Bool(b);
        }
    }
    if let Ok(i) = value.parse::<i64>() {
        return KwValue::Int(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return KwValue::Float(f);
    }
    if value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("null") {
        return KwValue::Null;
    }
    KwValue::Str(value.to_string())
}

fn split_items(value: &str) -> impl Iterator<Item = &str> {
    let inner = value.trim();
    let inner = inner
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .or_else(|| inner.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
        .unwrap_or(inner);
    inner.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn convert_list(value: &str) -> Result<KwValue> {
    Ok(KwValue::List(split_items(value).map(infer).collect()))
}

fn convert_dict(value: &str) -> Result<KwValue> {
    let mut dict = BTreeMap::new();
    for item in split_items(value) {
        let (key, val) = item
            .split_once(':')
            .ok_or_else(|| conversion_error("dict", value, format!("entry '{}' lacks ':'", item)))?;
        dict.insert(key.trim().to_string(), infer(val));
    }
    Ok(KwValue::Dict(dict))
}

fn convert_path(value: &str) -> Result<KwValue> {
    Ok(KwValue::Path(expand_user(value.trim())))
}

fn convert_datetime(value: &str) -> Result<KwValue> {
    parse_timestamp(value.trim())
        .map(KwValue::DateTime)
        .ok_or_else(|| conversion_error("datetime", value, "unrecognised timestamp"))
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^<([A-Za-z_][A-Za-z0-9_]*)>(.*)$").expect("tag pattern is a valid regex")
    })
}

/// Tag name → converter.
#[derive(Debug, Clone)]
pub struct TagConverters {
    converters: HashMap<String, Converter>,
}

impl Default for TagConverters {
    fn default() -> Self {
        let mut converters: HashMap<String, Converter> = HashMap::new();
        converters.insert("bool".into(), convert_bool);
        converters.insert("int".into(), convert_int);
        converters.insert("float".into(), convert_float);
        converters.insert("str".into(), convert_str);
        converters.insert("list".into(), convert_list);
        converters.insert("dict".into(), convert_dict);
        converters.insert("path".into(), convert_path);
        converters.insert("datetime".into(), convert_datetime);
        Self { converters }
    }
}

impl TagConverters {
    /// Table without any converter.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, converter: Converter) {
        self.converters.insert(tag.into(), converter);
    }

    pub fn remove(&mut self, tag: &str) -> Option<Converter> {
        self.converters.remove(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.converters.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Convert `raw`; untagged strings are returned unchanged.
    ///
    /// # Errors
    /// * `SmError::Unsupported` for refused code-evaluating tags
    /// * `SmError::ConfigNotFound` for any other unknown tag
    /// * `SmError::Conversion` when the converter rejects the value
    pub fn convert(&self, raw: &str) -> Result<KwValue> {
        let Some(captures) = tag_pattern().captures(raw) else {
            return Ok(KwValue::Str(raw.to_string()));
        };
        let tag = &captures[1];
        let value = &captures[2];

        match self.converters.get(tag) {
            Some(converter) => converter(value),
            None if REFUSED_TAGS.contains(&tag) => Err(SmError::unsupported(
                format!("code-evaluating tag <{}>", tag),
                None,
            )),
            None => Err(SmError::config_not_found(format!("tag converter <{}>", tag), None)),
        }
    }

    /// Convert every value of a keyword-argument map.
    pub fn convert_map(&self, raw: &BTreeMap<String, String>) -> Result<BTreeMap<String, KwValue>> {
        raw.iter()
            .map(|(key, value)| Ok((key.clone(), self.convert(value)?)))
            .collect()
    }
}
