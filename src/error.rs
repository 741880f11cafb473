use std::time::Duration;

/// Problems in user supplied configuration. These are raised while sources are constructed and never per object.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid template {name:?}: {source}")]
    Template {
        name: &'static str,
        #[source]
        source: tera::Error,
    },

    #[error("invalid selector {input:?}: {reason}")]
    Selector { input: String, reason: String },

    #[error("invalid field path {input:?}: {reason}")]
    FieldPath { input: String, reason: String },

    #[error(
        "invalid resource identifier {0:?}: expected format resource.version.group (e.g. certificates.v1.cert-manager.io)"
    )]
    ResourceId(String),

    #[error("no source configured")]
    NoSources,
}

/// Failures that concern a single object. The adapter skips the object, logs and continues with the cycle.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to apply template {name:?} on {object}: {message}")]
    TemplateRender {
        name: &'static str,
        object: String,
        message: String,
    },

    #[error("failed to convert {object} into {kind}: {message}")]
    Conversion {
        object: String,
        kind: &'static str,
        message: String,
    },
}

/// Failures of the listing/cache collaborators. They abort the cycle of the affected source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to list {kind}: {message}")]
    List { kind: String, message: String },

    #[error("cache for {kind} did not sync within {timeout:?}")]
    CacheSyncTimeout { kind: String, timeout: Duration },

    #[error("cache for {kind} stopped before its initial sync completed")]
    CacheStopped { kind: String },

    #[error("resource {resource:?} not found in {group_version:?}")]
    ResourceNotFound { resource: String, group_version: String },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
