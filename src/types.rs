// src/types.rs
//! Records flowing through a pass: sources in, gatherer responses in between,
//! results out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::scheduler::Frequency;
use crate::status::Status;

/// Gatherer names selected by a source: one name or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GathererSelection {
    One(String),
    Many(Vec<String>),
}

impl Default for GathererSelection {
    fn default() -> Self {
        GathererSelection::Many(Vec::new())
    }
}

impl GathererSelection {
    /// Distinct, non-empty names in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            GathererSelection::One(n) => vec![n.as_str()],
            GathererSelection::Many(v) => v.iter().map(String::as_str).collect(),
        };
        let mut out: Vec<&str> = Vec::with_capacity(raw.len());
        for n in raw {
            let n = n.trim();
            if !n.is_empty() && !out.contains(&n) {
                out.push(n);
            }
        }
        out
    }
}

impl From<&str> for GathererSelection {
    fn from(s: &str) -> Self {
        GathererSelection::One(s.to_string())
    }
}

impl From<Vec<&str>> for GathererSelection {
    fn from(v: Vec<&str>) -> Self {
        GathererSelection::Many(v.into_iter().map(str::to_string).collect())
    }
}

/// Self-scheduling state carried by a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurring {
    #[serde(
        default,
        deserialize_with = "de_frequency",
        skip_serializing_if = "Option::is_none"
    )]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub next_trigger_timestamp: Option<DateTime<Utc>>,
}

fn de_frequency<'de, D>(d: D) -> Result<Option<Frequency>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(d)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("none") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// One unit of work, owned by the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub gatherer: GathererSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring: Option<Recurring>,
    /// Errors attached during a pass by `before_run` hooks. Never stored: a
    /// persisted `errors` key is read and dropped.
    #[serde(default, skip_serializing, deserialize_with = "de_discard")]
    pub errors: Vec<String>,
    /// Gatherer-specific settings keyed by gatherer name, plus any free-form
    /// properties used by filters.
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

fn de_discard<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    serde::de::IgnoredAny::deserialize(d)?;
    Ok(Vec::new())
}

impl Source {
    pub fn new(id: impl Into<String>, gatherer: impl Into<GathererSelection>) -> Self {
        Self {
            id: id.into(),
            label: None,
            gatherer: gatherer.into(),
            recurring: None,
            errors: Vec::new(),
            config: Map::new(),
        }
    }

    /// Settings for one gatherer, if the source carries any.
    pub fn gatherer_config(&self, name: &str) -> Option<&Value> {
        self.config.get(name)
    }

    /// Frequency of a recurring source; `None` for one-shot sources.
    pub fn frequency(&self) -> Option<Frequency> {
        self.recurring.as_ref().and_then(|r| r.frequency)
    }
}

/// Whether a result came from a one-shot or a recurring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    #[default]
    Single,
    Recurring,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Single => "single",
            ResultKind::Recurring => "recurring",
        }
    }
}

/// What a gatherer hands back for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GathererResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Accepts a single error or a list; each entry is either `{message}` or
    /// used as its own message.
    #[serde(
        default,
        deserialize_with = "de_errors",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub errors: Vec<String>,
}

impl GathererResponse {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            status_text: None,
            data: None,
            metrics: None,
            metadata: None,
            errors: Vec::new(),
        }
    }

    pub fn retrieved(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(Status::Retrieved)
        }
    }

    pub fn submitted() -> Self {
        Self::new(Status::Submitted)
    }

    /// Error response whose status text and single error carry `message`.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status_text: Some(message.clone()),
            errors: vec![message],
            ..Self::new(Status::Error)
        }
    }
}

fn de_errors<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.into_iter().map(error_message).collect(),
        Some(other) => vec![error_message(other)],
    })
}

/// Message of one raw error value. Entries with no message become `""`.
pub fn error_message(v: Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Object(ref m) => match m.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
            None => v.to_string(),
        },
        other => other.to_string(),
    }
}

/// Output record for one processed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherResult {
    pub id: String,
    pub source_id: String,
    #[serde(rename = "type", default)]
    pub kind: ResultKind,
    #[serde(default)]
    pub gatherer: GathererSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: Status,
    pub created_timestamp: DateTime<Utc>,
    pub modified_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Raw response per invoked gatherer name.
    #[serde(default)]
    pub responses: BTreeMap<String, GathererResponse>,
    /// Free-form fields filled by extensions.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Per-source hook context.
#[derive(Debug)]
pub struct SourceContext<'a> {
    pub source: &'a mut Source,
    pub result: Option<&'a mut GatherResult>,
}

/// Per-pass hook context.
#[derive(Debug)]
pub struct PassContext<'a> {
    pub sources: &'a mut Vec<Source>,
    pub results: &'a mut Vec<GatherResult>,
}
