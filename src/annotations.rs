//! The annotation vocabulary understood on every watched object.
//!
//! All rules are pure functions over an annotation map. Malformed values never abort processing of an object, they
//! degrade to "not configured" and emit a warning.

use crate::endpoint::{
    ProviderSpecific,
    ProviderSpecificProperty,
    Ttl,
    MAX_TTL_SECONDS,
};
use std::collections::BTreeMap;

pub const ANNOTATION_PREFIX: &str = "dnssource.io/";

/// Comma separated hostnames to publish.
pub const HOSTNAME_KEY: &str = "dnssource.io/hostname";
/// Comma separated hostnames that point at the cluster internal address.
pub const INTERNAL_HOSTNAME_KEY: &str = "dnssource.io/internal-hostname";
/// Comma separated targets, overriding kind specific target derivation.
pub const TARGET_KEY: &str = "dnssource.io/target";
/// Record TTL, either seconds or a duration such as `1m`.
pub const TTL_KEY: &str = "dnssource.io/ttl";
/// Identity of the controller that is responsible for the object.
pub const CONTROLLER_KEY: &str = "dnssource.io/controller";
pub const SET_IDENTIFIER_KEY: &str = "dnssource.io/set-identifier";
pub const ALIAS_KEY: &str = "dnssource.io/alias";
/// `true` excludes the object from publication.
pub const IGNORE_KEY: &str = "dnssource.io/ignore";
/// `dnssource.io/provider-<provider>-<attribute>` becomes the provider specific property `<provider>/<attribute>`.
pub const PROVIDER_SPECIFIC_PREFIX: &str = "dnssource.io/provider-";

pub type Annotations = BTreeMap<String, String>;

/// Whether the object explicitly names another controller. Objects without the annotation belong to everyone.
pub fn is_controller_mismatch(annotations: &Annotations, controller: &str) -> bool {
    matches!(annotations.get(CONTROLLER_KEY), Some(value) if value != controller)
}

pub fn is_ignored(annotations: &Annotations) -> bool {
    annotations
        .get(IGNORE_KEY)
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

/// Splits a comma separated list, trimming whitespace and trailing dots and dropping empty entries.
pub fn split_hostname_annotation(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim().trim_end_matches('.').to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

pub fn hostnames(annotations: &Annotations) -> Vec<String> {
    annotations
        .get(HOSTNAME_KEY)
        .map(|value| split_hostname_annotation(value))
        .unwrap_or_default()
}

pub fn internal_hostnames(annotations: &Annotations) -> Vec<String> {
    annotations
        .get(INTERNAL_HOSTNAME_KEY)
        .map(|value| split_hostname_annotation(value))
        .unwrap_or_default()
}

/// Targets from the target annotation. Empty means the kind specific derivation applies.
pub fn targets(annotations: &Annotations) -> Vec<String> {
    annotations
        .get(TARGET_KEY)
        .map(|value| split_hostname_annotation(value))
        .unwrap_or_default()
}

/// Reads the TTL annotation. `resource` only decorates the warning for unusable values.
pub fn ttl(annotations: &Annotations, resource: &str) -> Ttl {
    let Some(value) = annotations.get(TTL_KEY) else {
        return Ttl::UNCONFIGURED;
    };
    match parse_ttl(value) {
        Ok(ttl) => ttl,
        Err(err) => {
            warn!(%resource, ?value, "ignoring ttl annotation: {err}");
            Ttl::UNCONFIGURED
        }
    }
}

/// Accepts whole seconds (`300`) or a duration with unit (`5m`, `1h 30m`).
pub fn parse_ttl(value: &str) -> Result<Ttl, String> {
    let value = value.trim();
    let seconds = if let Ok(seconds) = value.parse::<i64>() {
        seconds
    } else if value.starts_with(|c: char| c.is_ascii_digit()) {
        let duration = humantime::parse_duration(value).map_err(|err| format!("invalid duration: {err}"))?;
        i64::try_from(duration.as_secs()).map_err(|_| "duration out of range".to_string())?
    } else {
        return Err("not a number or duration".to_string());
    };

    if seconds < 0 {
        return Err(format!("negative ttl {seconds}"));
    }
    if seconds > MAX_TTL_SECONDS {
        return Err(format!("ttl {seconds} exceeds maximum of {MAX_TTL_SECONDS}"));
    }
    Ok(Ttl::seconds(seconds))
}

/// Provider specific properties and the set identifier. Properties are ordered by annotation key.
pub fn provider_specific(annotations: &Annotations) -> (ProviderSpecific, String) {
    let mut properties = ProviderSpecific::new();
    let mut set_identifier = String::new();

    for (key, value) in annotations {
        if key == SET_IDENTIFIER_KEY {
            set_identifier = value.trim().to_string();
        } else if key == ALIAS_KEY {
            if value.trim().eq_ignore_ascii_case("true") {
                properties.push(ProviderSpecificProperty {
                    name: "alias".to_string(),
                    value: "true".to_string(),
                });
            }
        } else if let Some(attr) = key.strip_prefix(PROVIDER_SPECIFIC_PREFIX) {
            if attr.is_empty() {
                continue;
            }
            let name = match attr.split_once('-') {
                Some((provider, attr)) if !provider.is_empty() && !attr.is_empty() => format!("{provider}/{attr}"),
                _ => attr.to_string(),
            };
            properties.push(ProviderSpecificProperty {
                name,
                value: value.clone(),
            });
        }
    }

    (properties, set_identifier)
}

/// Caller supplied switches that change how the rules apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRules {
    pub controller: String,
    pub ignore_hostname_annotation: bool,
}

impl Default for AnnotationRules {
    fn default() -> Self {
        AnnotationRules {
            controller: crate::config::DEFAULT_CONTROLLER.to_string(),
            ignore_hostname_annotation: false,
        }
    }
}

impl AnnotationRules {
    /// Terminal reasons to skip an object altogether.
    pub fn skip_reason(&self, annotations: &Annotations) -> Option<String> {
        if is_controller_mismatch(annotations, &self.controller) {
            let found = annotations.get(CONTROLLER_KEY).map(String::as_str).unwrap_or_default();
            return Some(format!(
                "controller value does not match, found: {found:?}, required: {:?}",
                self.controller
            ));
        }
        if is_ignored(annotations) {
            return Some(format!("{IGNORE_KEY} is set"));
        }
        None
    }

    pub fn hostnames(&self, annotations: &Annotations) -> Vec<String> {
        if self.ignore_hostname_annotation {
            return Vec::new();
        }
        hostnames(annotations)
    }

    pub fn internal_hostnames(&self, annotations: &Annotations) -> Vec<String> {
        if self.ignore_hostname_annotation {
            return Vec::new();
        }
        internal_hostnames(annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> Annotations {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn hostnames_are_trimmed_and_dot_stripped() {
        let a = annotations(&[(HOSTNAME_KEY, " a.example.org., b.example.org ,, ")]);
        assert_eq!(hostnames(&a), vec!["a.example.org", "b.example.org"]);
    }

    #[test]
    fn empty_hostname_annotation_yields_nothing() {
        assert!(hostnames(&annotations(&[(HOSTNAME_KEY, " , . ")])).is_empty());
        assert!(hostnames(&annotations(&[])).is_empty());
    }

    #[test]
    fn ignore_hostname_annotation_skips_rule() {
        let a = annotations(&[(HOSTNAME_KEY, "a.example.org"), (INTERNAL_HOSTNAME_KEY, "b.internal")]);
        let rules = AnnotationRules {
            ignore_hostname_annotation: true,
            ..Default::default()
        };
        assert!(rules.hostnames(&a).is_empty());
        assert!(rules.internal_hostnames(&a).is_empty());
        assert_eq!(AnnotationRules::default().hostnames(&a), vec!["a.example.org"]);
    }

    #[test]
    fn ttl_accepts_seconds_and_durations() {
        assert_eq!(parse_ttl("300"), Ok(Ttl::seconds(300)));
        assert_eq!(parse_ttl("0"), Ok(Ttl::seconds(0)));
        assert_eq!(parse_ttl("1m"), Ok(Ttl::seconds(60)));
        assert_eq!(parse_ttl("1h 30m"), Ok(Ttl::seconds(5400)));
        assert_eq!(parse_ttl("1500ms"), Ok(Ttl::seconds(1)));
    }

    #[test]
    fn bad_ttl_is_unconfigured() {
        for value in ["-10", "not-a-number", "", "10x", "4294967296"] {
            let a = annotations(&[(TTL_KEY, value)]);
            assert_eq!(ttl(&a, "service/default/foo"), Ttl::UNCONFIGURED, "ttl {value:?}");
        }
        assert_eq!(ttl(&annotations(&[]), "service/default/foo"), Ttl::UNCONFIGURED);
    }

    #[test]
    fn controller_mismatch() {
        assert!(!is_controller_mismatch(&annotations(&[]), "dns-source"));
        assert!(!is_controller_mismatch(
            &annotations(&[(CONTROLLER_KEY, "dns-source")]),
            "dns-source"
        ));
        assert!(is_controller_mismatch(
            &annotations(&[(CONTROLLER_KEY, "someone-else")]),
            "dns-source"
        ));

        let rules = AnnotationRules::default();
        assert!(rules
            .skip_reason(&annotations(&[(CONTROLLER_KEY, "someone-else")]))
            .is_some());
        assert!(rules.skip_reason(&annotations(&[(IGNORE_KEY, "True")])).is_some());
        assert!(rules.skip_reason(&annotations(&[(IGNORE_KEY, "false")])).is_none());
    }

    #[test]
    fn provider_specific_and_set_identifier() {
        let a = annotations(&[
            ("dnssource.io/provider-aws-weight", "10"),
            ("dnssource.io/provider-cloudflare-proxied", "true"),
            ("dnssource.io/provider-", "ignored"),
            ("dnssource.io/provider-plain", "x"),
            (ALIAS_KEY, "true"),
            (SET_IDENTIFIER_KEY, " blue "),
            ("unrelated/key", "y"),
        ]);
        let (props, set_identifier) = provider_specific(&a);
        assert_eq!(set_identifier, "blue");
        let names = props.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["alias", "aws/weight", "cloudflare/proxied", "plain"]);
        assert_eq!(props[1].value, "10");
    }
}
