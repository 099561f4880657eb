//! Minimal record filters used by the in-memory connector.
//!
//! Forms:
//! - `path`: property is truthy
//! - `!path`: property is falsy or missing
//! - `path OP literal` with OP in `= == != > >= < <=`
//!
//! `path` is dot-addressed (`recurring.frequency`). Literals are JSON
//! (`3`, `true`, `null`, `"text"`), single-quoted strings, or bare words.

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    path: Vec<String>,
    negate: bool,
    cmp: Option<(Op, Value)>,
}

fn filter_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(!)?\s*([A-Za-z_][\w.]*)\s*(?:(==|!=|>=|<=|=|>|<)\s*(.+?))?\s*$")
            .expect("filter regex")
    })
}

impl FromStr for Filter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = filter_re()
            .captures(s)
            .ok_or_else(|| anyhow!("unsupported filter expression: {s:?}"))?;
        let path: Vec<String> = caps[2].split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            anyhow::bail!("empty path segment in filter: {s:?}");
        }
        let cmp = match (caps.get(3), caps.get(4)) {
            (Some(op), Some(lit)) => Some((parse_op(op.as_str()), parse_literal(lit.as_str()))),
            _ => None,
        };
        Ok(Self {
            path,
            negate: caps.get(1).is_some(),
            cmp,
        })
    }
}

fn parse_op(s: &str) -> Op {
    match s {
        "!=" => Op::Ne,
        ">" => Op::Gt,
        ">=" => Op::Ge,
        "<" => Op::Lt,
        "<=" => Op::Le,
        _ => Op::Eq,
    }
}

fn parse_literal(s: &str) -> Value {
    let s = s.trim();
    if let Ok(v) = serde_json::from_str::<Value>(s) {
        return v;
    }
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        return Value::String(s[1..s.len() - 1].to_string());
    }
    Value::String(s.to_string())
}

/// Dot-path lookup; array segments are numeric indices.
pub fn lookup<'a>(record: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut cur = record;
    for seg in path {
        cur = match cur {
            Value::Object(m) => m.get(seg)?,
            Value::Array(a) => a.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

impl Filter {
    pub fn matches(&self, record: &Value) -> bool {
        let v = lookup(record, &self.path);
        let hit = match &self.cmp {
            None => truthy(v),
            Some((op, lit)) => {
                let v = v.unwrap_or(&Value::Null);
                let ord = compare(v, lit);
                match op {
                    Op::Eq => ord == Some(Ordering::Equal),
                    Op::Ne => ord != Some(Ordering::Equal),
                    Op::Gt => ord == Some(Ordering::Greater),
                    Op::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                    Op::Lt => ord == Some(Ordering::Less),
                    Op::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                }
            }
        };
        hit != self.negate
    }
}

pub fn parse_all(filters: &[String]) -> Result<Vec<Filter>> {
    filters.iter().map(|f| f.parse()).collect()
}

pub fn matches_all(record: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(record))
}
