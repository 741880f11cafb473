//! A uniform read-only view over typed and schemaless cluster objects.

use crate::error::{
    ConfigError,
    ExtractError,
};
use kube::{
    api::{
        ApiResource,
        DynamicObject,
    },
    Resource,
    ResourceExt as _,
};
use serde::{
    Serialize,
    Serializer,
};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
};

static NULL: Value = Value::Null;

/// Names usable as the first path segment to address the convenience fields instead of the raw object.
const CONVENIENCE_FIELDS: &[&str] = &[
    "Name",
    "Namespace",
    "Kind",
    "APIVersion",
    "Labels",
    "Annotations",
    "Metadata",
    "Spec",
    "Status",
    "Object",
];

#[derive(Debug, Clone)]
pub struct ObjectView {
    name: String,
    namespace: String,
    kind: String,
    api_version: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    object: Value,
}

impl ObjectView {
    /// Wraps a typed object such as a `Service` or a `Node`.
    pub fn from_resource<K>(resource: &K) -> Result<Self, ExtractError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let kind = K::kind(&()).to_string();
        let api_version = K::api_version(&()).to_string();
        let mut object = serde_json::to_value(resource).map_err(|err| ExtractError::Conversion {
            object: format!("{}/{}", kind.to_lowercase(), resource.name_any()),
            kind: "object tree",
            message: err.to_string(),
        })?;
        if let Value::Object(map) = &mut object {
            map.entry("apiVersion")
                .or_insert_with(|| Value::String(api_version.clone()));
            map.entry("kind").or_insert_with(|| Value::String(kind.clone()));
        }

        Ok(ObjectView {
            name: resource.name_any(),
            namespace: resource.namespace().unwrap_or_default(),
            kind,
            api_version,
            labels: resource.labels().clone(),
            annotations: resource.annotations().clone(),
            object,
        })
    }

    /// Wraps a schemaless object. Kind and apiVersion fall back to the discovered resource when the object omits them.
    pub fn from_dynamic(resource: &DynamicObject, api_resource: &ApiResource) -> Result<Self, ExtractError> {
        let (kind, api_version) = match &resource.types {
            Some(types) => (types.kind.clone(), types.api_version.clone()),
            None => (api_resource.kind.clone(), api_resource.api_version.clone()),
        };
        let object = serde_json::to_value(resource).map_err(|err| ExtractError::Conversion {
            object: format!("{}/{}", kind.to_lowercase(), resource.name_any()),
            kind: "object tree",
            message: err.to_string(),
        })?;

        Ok(ObjectView {
            name: resource.name_any(),
            namespace: resource.namespace().unwrap_or_default(),
            kind,
            api_version,
            labels: resource.labels().clone(),
            annotations: resource.annotations().clone(),
            object,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty for cluster scoped objects.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn metadata(&self) -> &Value {
        self.object.get("metadata").unwrap_or(&NULL)
    }

    pub fn spec(&self) -> &Value {
        self.object.get("spec").unwrap_or(&NULL)
    }

    pub fn status(&self) -> &Value {
        self.object.get("status").unwrap_or(&NULL)
    }

    pub fn object(&self) -> &Value {
        &self.object
    }

    /// The provenance label value: `<kind>/<namespace>/<name>`, or `<kind>/<name>` for cluster scoped objects.
    pub fn resource_label(&self) -> String {
        let kind = self.kind.to_lowercase();
        if self.namespace.is_empty() {
            format!("{kind}/{}", self.name)
        } else {
            format!("{kind}/{}/{}", self.namespace, self.name)
        }
    }

    /// Resolves a field path. A path that does not resolve is [`FieldValue::Missing`], never an error.
    pub fn lookup(&self, path: &FieldPath) -> FieldValue {
        let convenience = matches!(
            path.segments.first(),
            Some(Segment::Key(key)) if CONVENIENCE_FIELDS.contains(&key.as_str())
        );

        if convenience {
            match serde_json::to_value(self) {
                Ok(root) => resolve(&root, &path.segments),
                Err(err) => {
                    debug!(object = %self.resource_label(), "cannot build field tree: {err}");
                    FieldValue::Missing
                }
            }
        } else {
            resolve(&self.object, &path.segments)
        }
    }

    /// Like [`ObjectView::lookup`] but flattened into strings, splitting string values on commas and whitespace.
    pub fn lookup_strings(&self, path: &FieldPath) -> Vec<String> {
        self.lookup(path).into_strings()
    }
}

/// The template environment: convenience fields next to the full raw object under `Object`.
impl Serialize for ObjectView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Fields<'a> {
            name: &'a str,
            namespace: &'a str,
            kind: &'a str,
            #[serde(rename = "APIVersion")]
            api_version: &'a str,
            labels: &'a BTreeMap<String, String>,
            annotations: &'a BTreeMap<String, String>,
            metadata: &'a Value,
            spec: &'a Value,
            status: &'a Value,
            object: &'a Value,
        }

        Fields {
            name: &self.name,
            namespace: &self.namespace,
            kind: &self.kind,
            api_version: &self.api_version,
            labels: &self.labels,
            annotations: &self.annotations,
            metadata: self.metadata(),
            spec: self.spec(),
            status: self.status(),
            object: &self.object,
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// A parsed path such as `status.loadBalancer.ingress[*].ip` or `metadata.annotations['example.org/target']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for FieldPath {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = |reason: String| ConfigError::FieldPath {
            input: input.to_string(),
            reason,
        };

        let mut path = input.trim();
        if let Some(inner) = path.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            path = inner.trim();
        }
        let path = path.strip_prefix('.').unwrap_or(path);
        if path.is_empty() {
            return Err(err("empty path".to_string()));
        }

        let mut segments = Vec::new();
        let mut chars = path.chars().peekable();
        let mut key = String::new();
        // Whether a key is required before the next separator, e.g. after a '.'.
        let mut expect_key = true;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if key.is_empty() {
                        if expect_key {
                            return Err(err("empty segment".to_string()));
                        }
                    } else {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    expect_key = true;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    } else if segments.is_empty() {
                        return Err(err("path starts with an index".to_string()));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(err("missing ']'".to_string()));
                    }
                    segments.push(parse_bracket(inner.trim()).map_err(err)?);
                    expect_key = false;
                    if !matches!(chars.peek(), None | Some('.') | Some('[')) {
                        return Err(err("expected '.' or '[' after ']'".to_string()));
                    }
                }
                ']' => return Err(err("unexpected ']'".to_string())),
                c if c.is_whitespace() => return Err(err("unexpected whitespace".to_string())),
                c => key.push(c),
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if expect_key {
            return Err(err("path ends with '.'".to_string()));
        }

        Ok(FieldPath {
            raw: input.trim().to_string(),
            segments,
        })
    }
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(key) = inner.strip_prefix(quote).and_then(|k| k.strip_suffix(quote)) {
            return Ok(Segment::Key(key.to_string()));
        }
    }
    inner
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| format!("invalid index {inner:?}"))
}

/// Result of a path lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Scalar(Value),
    List(Vec<Value>),
}

impl FieldValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    pub fn into_strings(self) -> Vec<String> {
        let values = match self {
            FieldValue::Missing => return Vec::new(),
            FieldValue::Scalar(value) => vec![value],
            FieldValue::List(values) => values,
        };

        let mut out = Vec::new();
        for value in values {
            match value {
                Value::String(s) => out.extend(
                    s.split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|part| !part.is_empty())
                        .map(str::to_string),
                ),
                Value::Number(n) => out.push(n.to_string()),
                Value::Bool(b) => out.push(b.to_string()),
                Value::Array(items) => out.extend(FieldValue::List(items).into_strings()),
                Value::Null | Value::Object(_) => {}
            }
        }
        out
    }
}

fn resolve(root: &Value, segments: &[Segment]) -> FieldValue {
    let mut current = vec![root];
    let mut fanned_out = false;

    for segment in segments {
        let mut next = Vec::with_capacity(current.len());
        for value in current {
            match (segment, value) {
                (Segment::Key(key), Value::Object(map)) => next.extend(map.get(key)),
                (Segment::Index(idx), Value::Array(items)) => next.extend(items.get(*idx)),
                (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                _ => {}
            }
        }
        if matches!(segment, Segment::Wildcard) {
            fanned_out = true;
        }
        current = next.into_iter().filter(|v| !v.is_null()).collect();
        if current.is_empty() {
            return FieldValue::Missing;
        }
    }

    if !fanned_out && current.len() == 1 {
        return match current[0] {
            Value::Array(items) => FieldValue::List(items.clone()),
            value => FieldValue::Scalar(value.clone()),
        };
    }
    FieldValue::List(current.into_iter().cloned().collect())
}
