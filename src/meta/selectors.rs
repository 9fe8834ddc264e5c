//! Label and field selector parsing
//!
//! Implements the selector grammars the API server accepts on LIST requests:
//! labels support equality (`k=v`, `k==v`, `k!=v`), existence (`k`, `!k`)
//! and set membership (`k in (a,b)`, `k notin (a,b)`); field selectors are
//! comma-separated equality conjuncts (`k=v`, `k==v`, `k!=v`).

use serde_json::Value;

use crate::error::{KubecacheError, KubecacheResult};
use crate::meta::status::Status;

/// One parsed label requirement
#[derive(Debug, Clone, PartialEq)]
pub enum LabelRequirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    Exists { key: String },
    NotExists { key: String },
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
}

/// A parsed label selector: the conjunction of its requirements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSelector {
    pub requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    /// Parse a selector string; empty selects everything
    pub fn parse(selector: &str) -> KubecacheResult<Self> {
        let mut requirements = Vec::new();
        for clause in split_clauses(selector) {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            requirements.push(parse_label_clause(clause)?);
        }
        Ok(Self { requirements })
    }

    /// Whether a label map satisfies every requirement
    pub fn matches(&self, labels: Option<&serde_json::Map<String, Value>>) -> bool {
        let get = |key: &str| -> Option<String> {
            labels
                .and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        self.requirements.iter().all(|req| match req {
            LabelRequirement::Equals { key, value } => get(key).as_deref() == Some(value),
            LabelRequirement::NotEquals { key, value } => get(key).as_deref() != Some(value),
            LabelRequirement::Exists { key } => get(key).is_some(),
            LabelRequirement::NotExists { key } => get(key).is_none(),
            LabelRequirement::In { key, values } => {
                get(key).map(|v| values.contains(&v)).unwrap_or(false)
            }
            LabelRequirement::NotIn { key, values } => {
                get(key).map(|v| !values.contains(&v)).unwrap_or(true)
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// One parsed field requirement; only equality operators exist for fields
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRequirement {
    pub path: String,
    pub value: String,
    pub negated: bool,
}

/// A parsed field selector: the conjunction of its requirements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelector {
    pub requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    /// Parse a selector string; empty selects everything
    pub fn parse(selector: &str) -> KubecacheResult<Self> {
        let mut requirements = Vec::new();
        for clause in selector.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            requirements.push(parse_field_clause(clause)?);
        }
        Ok(Self { requirements })
    }

    /// Whether an object's rendered field values satisfy every requirement;
    /// `lookup` renders a dotted path to its string form
    pub fn matches(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        self.requirements.iter().all(|req| {
            let actual = lookup(&req.path).unwrap_or_default();
            (actual == req.value) != req.negated
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

fn parse_error(selector_kind: &str, clause: &str, reason: &str) -> KubecacheError {
    KubecacheError::api(Status::bad_request(format!(
        "unable to parse {selector_kind} selector: invalid clause {clause:?}: {reason}"
    )))
}

fn parse_label_clause(clause: &str) -> KubecacheResult<LabelRequirement> {
    if let Some((key, values)) = split_set_clause(clause, " notin ") {
        return Ok(LabelRequirement::NotIn { key, values });
    }
    if let Some((key, values)) = split_set_clause(clause, " in ") {
        return Ok(LabelRequirement::In { key, values });
    }
    if let Some((key, value)) = clause.split_once("!=") {
        return Ok(LabelRequirement::NotEquals {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        });
    }
    if let Some((key, value)) = clause.split_once("==").or_else(|| clause.split_once('=')) {
        return Ok(LabelRequirement::Equals {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        });
    }
    if let Some(key) = clause.strip_prefix('!') {
        return Ok(LabelRequirement::NotExists {
            key: key.trim().to_string(),
        });
    }
    if clause.contains(['(', ')']) {
        return Err(parse_error("label", clause, "unexpected parenthesis"));
    }
    Ok(LabelRequirement::Exists {
        key: clause.to_string(),
    })
}

fn split_set_clause(clause: &str, op: &str) -> Option<(String, Vec<String>)> {
    let (key, rest) = clause.split_once(op)?;
    let rest = rest.trim();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    let values = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    Some((key.trim().to_string(), values))
}

/// Split on commas that are not inside a `(...)` value set
fn split_clauses(selector: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in selector.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                clauses.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    clauses.push(current);
    clauses
}

fn parse_field_clause(clause: &str) -> KubecacheResult<FieldRequirement> {
    if let Some((path, value)) = clause.split_once("!=") {
        let path = path.trim();
        if path.is_empty() {
            return Err(parse_error("field", clause, "empty field path"));
        }
        return Ok(FieldRequirement {
            path: path.to_string(),
            value: value.trim().to_string(),
            negated: true,
        });
    }
    if let Some((path, value)) = clause.split_once("==").or_else(|| clause.split_once('=')) {
        let path = path.trim();
        if path.is_empty() {
            return Err(parse_error("field", clause, "empty field path"));
        }
        return Ok(FieldRequirement {
            path: path.to_string(),
            value: value.trim().to_string(),
            negated: false,
        });
    }
    Err(parse_error("field", clause, "expected '=', '==' or '!='"))
}
