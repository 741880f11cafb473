//! Label selector expressions, used both for label selectors and for annotation filters.
//!
//! Grammar (comma separated requirements, all must hold):
//!
//! - `key=value`, `key==value`, `key!=value`
//! - `key in (a, b)`, `key notin (a, b)`
//! - `key` (exists), `!key` (does not exist)

use crate::error::ConfigError;
use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    pub fn matches(&self, map: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => map.get(key) == Some(value),
            Requirement::NotEquals(key, value) => map.get(key) != Some(value),
            Requirement::In(key, values) => map.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => !map.get(key).is_some_and(|v| values.contains(v)),
            Requirement::Exists(key) => map.contains_key(key),
            Requirement::DoesNotExist(key) => !map.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(key, value) => write!(f, "{key}={value}"),
            Requirement::NotEquals(key, value) => write!(f, "{key}!={value}"),
            Requirement::In(key, values) => write!(f, "{key} in ({})", values.join(",")),
            Requirement::NotIn(key, values) => write!(f, "{key} notin ({})", values.join(",")),
            Requirement::Exists(key) => write!(f, "{key}"),
            Requirement::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

/// A parsed selector. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, map: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| req.matches(map))
    }

    /// Pod selectors of services: every key/value pair must be present. An empty map selects nothing.
    pub fn from_match_labels(labels: &BTreeMap<String, String>) -> Self {
        Selector {
            requirements: labels
                .iter()
                .map(|(k, v)| Requirement::Equals(k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.requirements.iter().map(ToString::to_string).collect::<Vec<_>>();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for Selector {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ConfigError::Selector {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut requirements = Vec::new();
        for part in split_requirements(input).map_err(|reason| err(&reason))? {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(part).map_err(|reason| err(&reason))?);
        }
        Ok(Selector { requirements })
    }
}

/// Splits at commas that are not inside a parenthesized value set.
fn split_requirements(input: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or_else(|| "unbalanced ')'".to_string())?,
            ',' if depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn parse_requirement(part: &str) -> Result<Requirement, String> {
    if let Some(key) = part.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(validate_key(key.trim())?));
    }
    if let Some((key, value)) = part.split_once("!=") {
        return Ok(Requirement::NotEquals(validate_key(key.trim())?, value.trim().to_string()));
    }
    if let Some((key, value)) = part.split_once("==").or_else(|| part.split_once('=')) {
        return Ok(Requirement::Equals(validate_key(key.trim())?, value.trim().to_string()));
    }
    if let Some((key, rest)) = part.split_once(char::is_whitespace) {
        let rest = rest.trim_start();
        let (operator, values) = rest
            .split_once(char::is_whitespace)
            .map(|(op, values)| (op, values.trim()))
            .or_else(|| rest.find('(').map(|idx| (rest[..idx].trim(), &rest[idx..])))
            .ok_or_else(|| format!("expected operator after {key:?}"))?;
        let values = parse_value_set(values)?;
        let key = validate_key(key.trim())?;
        return match operator {
            "in" => Ok(Requirement::In(key, values)),
            "notin" => Ok(Requirement::NotIn(key, values)),
            op => Err(format!("unknown operator {op:?}")),
        };
    }
    Ok(Requirement::Exists(validate_key(part)?))
}

fn parse_value_set(values: &str) -> Result<Vec<String>, String> {
    let inner = values
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| format!("expected parenthesized values, found {values:?}"))?;
    Ok(inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

fn validate_key(key: &str) -> Result<String, String> {
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    if let Some(c) = key.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))) {
        return Err(format!("invalid character {c:?} in key {key:?}"));
    }
    Ok(key.to_string())
}
