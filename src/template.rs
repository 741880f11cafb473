//! User supplied templates producing hostnames or targets.
//!
//! Templates use the tera syntax and see the fields of [`ObjectView`]:
//!
//! ```text
//! {{ Name }}.{{ Namespace }}.example.org
//! {% for ing in Status.loadBalancer.ingress %}{{ ing.ip }},{% endfor %}
//! {{ Annotations | get(key="example.org/hostname", default="") }}
//! ```

use crate::{
    error::{
        ConfigError,
        ExtractError,
    },
    object::ObjectView,
};
use std::{
    collections::HashMap,
    error::Error as _,
    net::{
        Ipv4Addr,
        Ipv6Addr,
    },
};
use tera::{
    Tera,
    Value,
};

pub const FQDN_TEMPLATE: &str = "fqdn";
pub const TARGET_TEMPLATE: &str = "target";
pub const HOST_TARGET_TEMPLATE: &str = "host-target";

/// A template compiled once at construction.
#[derive(Debug, Clone)]
pub struct Template {
    name: &'static str,
    tera: Tera,
}

impl Template {
    /// Compiles `input`. An empty or whitespace only input means "no template" and yields `None`.
    pub fn parse(name: &'static str, input: &str) -> Result<Option<Self>, ConfigError> {
        if input.trim().is_empty() {
            return Ok(None);
        }

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        register_helpers(&mut tera);
        tera.add_raw_template(name, input)
            .map_err(|source| ConfigError::Template { name, source })?;

        Ok(Some(Template { name, tera }))
    }

    /// Renders the template against `object` and splits the output into trimmed, dot-stripped, non-empty entries
    /// (first occurrence order). Fields missing from the object render as no output.
    pub fn exec(&self, object: &ObjectView) -> Result<Vec<String>, ExtractError> {
        let render_error = |message: String| ExtractError::TemplateRender {
            name: self.name,
            object: object.resource_label(),
            message,
        };

        let context = tera::Context::from_serialize(object).map_err(|err| render_error(err.to_string()))?;
        let output = match self.tera.render(self.name, &context) {
            Ok(output) => output,
            Err(err) if is_missing_field(&err) => {
                debug!(
                    template = self.name,
                    object = %object.resource_label(),
                    "template references a missing field: {}",
                    error_chain(&err)
                );
                return Ok(Vec::new());
            }
            Err(err) => return Err(render_error(error_chain(&err))),
        };

        let mut values = Vec::new();
        for value in output.split(',') {
            let value = value.trim().trim_end_matches('.');
            if !value.is_empty() && !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        }
        Ok(values)
    }
}

fn is_missing_field(err: &tera::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = source {
        if err.to_string().contains("not found in context") {
            return true;
        }
        source = err.source();
    }
    false
}

fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

fn register_helpers(tera: &mut Tera) {
    tera.register_filter("trim_prefix", |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
        let s = tera::try_get_value!("trim_prefix", "value", String, value);
        let prefix = string_arg("trim_prefix", "prefix", args)?;
        Ok(Value::String(s.strip_prefix(prefix.as_str()).unwrap_or(&s).to_string()))
    });
    tera.register_filter("trim_suffix", |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
        let s = tera::try_get_value!("trim_suffix", "value", String, value);
        let suffix = string_arg("trim_suffix", "suffix", args)?;
        Ok(Value::String(s.strip_suffix(suffix.as_str()).unwrap_or(&s).to_string()))
    });
    // absent keys render empty like `m["key"]` does
    tera.register_filter("get", |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
        let key = string_arg("get", "key", args)?;
        let Value::Object(map) = value else {
            return Err(tera::Error::msg(format!("Filter `get` was used on a value that isn't an object: {value}")));
        };
        Ok(map
            .get(&key)
            .or_else(|| args.get("default"))
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())))
    });
    tera.register_filter("from_json", |value: &Value, _: &HashMap<String, Value>| -> tera::Result<Value> {
        let s = tera::try_get_value!("from_json", "value", String, value);
        serde_json::from_str(&s).map_err(|err| tera::Error::msg(format!("Filter `from_json` received invalid JSON: {err}")))
    });

    tera.register_tester("ipv4", |value: Option<&Value>, _: &[Value]| -> tera::Result<bool> {
        Ok(value.and_then(Value::as_str).is_some_and(|s| s.parse::<Ipv4Addr>().is_ok()))
    });
    tera.register_tester("ipv6", |value: Option<&Value>, _: &[Value]| -> tera::Result<bool> {
        Ok(value.and_then(Value::as_str).is_some_and(|s| s.parse::<Ipv6Addr>().is_ok()))
    });
}

fn string_arg(filter: &str, name: &str, args: &HashMap<String, Value>) -> tera::Result<String> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(tera::Error::msg(format!(
            "Filter `{filter}` expected argument `{name}` to be a string, got {other}"
        ))),
        None => Err(tera::Error::msg(format!("Filter `{filter}` expected an arg called `{name}`"))),
    }
}

/// The templates configured for a source. Each one is optional.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    pub fqdn: Option<Template>,
    pub target: Option<Template>,
    pub host_target: Option<Template>,
}

impl TemplateSet {
    pub fn new(fqdn: &str, target: &str, host_target: &str) -> Result<Self, ConfigError> {
        Ok(TemplateSet {
            fqdn: Template::parse(FQDN_TEMPLATE, fqdn)?,
            target: Template::parse(TARGET_TEMPLATE, target)?,
            host_target: Template::parse(HOST_TARGET_TEMPLATE, host_target)?,
        })
    }

    /// Whether any template can produce hostnames.
    pub fn produces_hostnames(&self) -> bool {
        self.fqdn.is_some() || self.host_target.is_some()
    }
}
