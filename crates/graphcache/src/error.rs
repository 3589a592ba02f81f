use crate::key::CacheKey;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Problems with the cache configuration. These surface from `CacheBuilder::build`, never
/// while merging.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not parse cache configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("type {0} has no key function")]
    MissingKey(String),
    #[error("{0} is not a declared type")]
    UnknownType(String),
    #[error("{typename}.{field} points at undeclared type {target}")]
    UnknownRelationTarget {
        typename: String,
        field: String,
        target: String,
    },
    #[error("the composite key of {typename} is built from {field}, which is not a children relation")]
    CompositeOverNonList { typename: String, field: String },
    #[error("derived relation {typename}.{target} is invalid: {reason}")]
    InvalidDerived {
        typename: String,
        target: String,
        reason: String,
    },
}

/// Errors returned to the execution layer for writes the cache cannot interpret.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("{0} is not a declared type")]
    UnknownType(String),
    #[error("data written as {typename} must be an object, got {found}")]
    NotAnObject { typename: String, found: &'static str },
    #[error("no record is stored under {0}")]
    MissingRecord(CacheKey),
    #[error("{typename}.{field} is not a children relation")]
    NotAList { typename: String, field: String },
    #[error("{typename}.{field} expected {expected}, got {found}")]
    InvalidValue {
        typename: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("no derived relation {typename}.{target} is registered over {source_field}")]
    UnknownDerived {
        typename: String,
        source_field: String,
        target: String,
    },
    #[error("unknown stream handle {0}")]
    UnknownStream(usize),
}

/// Recoverable inconsistencies. The cache keeps going and records these for inspection.
#[derive(Clone, Debug, PartialEq, thiserror::Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheWarning {
    #[error("{typename} record written under {location} has no identity, stored as {placeholder}")]
    MissingIdentity {
        typename: String,
        location: String,
        placeholder: CacheKey,
    },
    #[error("increment for {parent}.{field} arrived after the stream closed and was dropped")]
    LateIncrement { parent: CacheKey, field: String },
    #[error("{from} was rekeyed onto the existing record {to}, the records were merged")]
    RekeyConflict { from: CacheKey, to: CacheKey },
    #[error("stream for {parent}.{field} failed and was cancelled: {message}")]
    StreamFailed {
        parent: CacheKey,
        field: String,
        message: String,
    },
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}
