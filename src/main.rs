#[macro_use]
extern crate tracing;

use clap::Parser;
use eyre::{
    Result,
    WrapErr as _,
};
use futures::StreamExt as _;
use kube::CustomResourceExt as _;
use kube_dns_source::{
    config::{
        ConversionPolicy,
        MergePrecedence,
        SourceConfig,
        SourceKind,
    },
    context::Context,
    endpoint::Endpoint,
    resources,
    watch::{
        watch_endpoints,
        WatchConfig,
    },
};
use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Print the DNSEndpoint CRD
    Crds,
    /// Extract the endpoints once and print them
    Endpoints(ArgsSources),
    /// Print the endpoints whenever they change
    Watch(ArgsWatch),
}

#[derive(Parser)]
struct ArgsWatch {
    #[clap(flatten)]
    sources: ArgsSources,

    #[clap(
        long,
        env = "DNS_SOURCE_INTERVAL",
        help = "Re-extract periodically even without changes",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    interval: Duration,

    #[clap(
        long,
        env = "DNS_SOURCE_MIN_EVENT_INTERVAL",
        help = "Coalesce change notifications arriving faster than this",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    min_event_interval: Duration,
}

#[derive(Parser)]
struct ArgsSources {
    #[clap(long, env = "DNS_SOURCE_CONFIG", help = "YAML file with the source configuration. Flags override it")]
    config: Option<PathBuf>,

    #[clap(long = "source", env = "DNS_SOURCE_SOURCES", value_delimiter = ',', help = "service, ingress, pod, node, unstructured or crd")]
    sources: Vec<SourceKind>,

    #[clap(long, env = "DNS_SOURCE_NAMESPACE", help = "Only watch this namespace")]
    namespace: Option<String>,

    #[clap(long, env = "DNS_SOURCE_LABEL_FILTER")]
    label_filter: Option<String>,

    #[clap(long, env = "DNS_SOURCE_ANNOTATION_FILTER")]
    annotation_filter: Option<String>,

    #[clap(long, env = "DNS_SOURCE_FQDN_TEMPLATE")]
    fqdn_template: Option<String>,

    #[clap(long, env = "DNS_SOURCE_TARGET_TEMPLATE")]
    target_template: Option<String>,

    #[clap(long, env = "DNS_SOURCE_HOST_TARGET_TEMPLATE", help = "Comma separated host:target pairs")]
    host_target_template: Option<String>,

    #[clap(long, help = "Union templated hostnames with annotated ones")]
    combine_fqdn_annotation: bool,

    #[clap(long)]
    ignore_hostname_annotation: bool,

    #[clap(long, env = "DNS_SOURCE_CONTROLLER", help = "Only objects without or with this controller annotation")]
    controller: Option<String>,

    #[clap(long, help = "Publish cluster IPs of ClusterIP services")]
    publish_internal_services: bool,

    #[clap(long, help = "Publish host IPs instead of pod IPs for headless services and pods")]
    publish_host_ip: bool,

    #[clap(long)]
    always_publish_not_ready_addresses: bool,

    #[clap(long, help = "Do not publish per-pod records for headless services")]
    no_headless_pod_records: bool,

    #[clap(long, value_delimiter = ',')]
    service_type_filter: Vec<String>,

    #[clap(long = "unstructured-resource", value_delimiter = ',', help = "resource.version.group, e.g. configmaps.v1")]
    unstructured_resources: Vec<String>,

    #[clap(long = "hostname-path", help = "Field path of hostnames, e.g. spec.hosts[*]")]
    hostname_paths: Vec<String>,

    #[clap(long = "target-path", help = "Field path of targets, e.g. status.addresses[*].value")]
    target_paths: Vec<String>,

    #[clap(long, help = "skip or abort on DNSEndpoint objects that cannot be converted")]
    conversion_policy: Option<ConversionPolicy>,

    #[clap(long, help = "by-provenance or first-seen")]
    merge_precedence: Option<MergePrecedence>,

    #[clap(long, env = "DNS_SOURCE_CACHE_SYNC_TIMEOUT", value_parser = humantime::parse_duration)]
    cache_sync_timeout: Option<Duration>,

    #[clap(long, short, default_value = "yaml", help = "yaml or json")]
    output: OutputFormat,
}

#[derive(Clone, Copy)]
enum OutputFormat {
    Yaml,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            s => Err(eyre::eyre!("Invalid output format: {s:?}")),
        }
    }
}

impl ArgsSources {
    fn source_config(&self) -> Result<SourceConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
                serde_yaml::from_str(&content).wrap_err_with(|| format!("Failed to parse {}", path.display()))?
            }
            None => SourceConfig::default(),
        };

        if !self.sources.is_empty() {
            config.sources = self.sources.clone();
        }
        override_with(&mut config.namespace, self.namespace.clone().map(Some));
        override_with(&mut config.label_selector, self.label_filter.clone());
        override_with(&mut config.annotation_filter, self.annotation_filter.clone());
        override_with(&mut config.fqdn_template, self.fqdn_template.clone());
        override_with(&mut config.target_template, self.target_template.clone());
        override_with(&mut config.host_target_template, self.host_target_template.clone());
        override_with(&mut config.controller, self.controller.clone());
        override_with(&mut config.conversion_policy, self.conversion_policy);
        override_with(&mut config.merge_precedence, self.merge_precedence);
        override_with(&mut config.cache_sync_timeout, self.cache_sync_timeout);

        config.combine_fqdn_annotation |= self.combine_fqdn_annotation;
        config.ignore_hostname_annotation |= self.ignore_hostname_annotation;
        config.publish_internal |= self.publish_internal_services;
        config.publish_host_ip |= self.publish_host_ip;
        config.always_publish_not_ready |= self.always_publish_not_ready_addresses;
        config.headless_pod_records &= !self.no_headless_pod_records;

        config.service_type_filter.extend(self.service_type_filter.iter().cloned());
        config.unstructured_resources.extend(self.unstructured_resources.iter().cloned());
        config.hostname_paths.extend(self.hostname_paths.iter().cloned());
        config.target_paths.extend(self.target_paths.iter().cloned());

        Ok(config)
    }
}

fn override_with<T>(value: &mut T, flag: Option<T>) {
    if let Some(flag) = flag {
        *value = flag;
    }
}

fn print_endpoints(endpoints: &[Endpoint], output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Yaml => print!("---\n{}", serde_yaml::to_string(endpoints)?),
        OutputFormat::Json => println!("{}", serde_json::to_string(endpoints)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Args::parse() {
        Args::Crds => {
            let yaml = serde_yaml::to_string(&resources::DNSEndpoint::crd()).wrap_err("Failed to serialize CRD")?;
            print!("{yaml}")
        }
        Args::Endpoints(args) => {
            let config = args.source_config()?;
            let context = Context::new(kube::Client::try_default().await?);
            let pipeline = context.build_pipeline(&config).await?;
            let endpoints = pipeline.endpoints().await?;
            info!(sources = ?pipeline.source_names(), count = endpoints.len(), "Extracted endpoints");
            print_endpoints(&endpoints, args.output)?;
        }
        Args::Watch(args) => {
            let config = args.sources.source_config()?;
            let context = Context::new(kube::Client::try_default().await?);
            let pipeline = Arc::new(context.build_pipeline(&config).await?);
            info!(sources = ?pipeline.source_names(), "Watching endpoints");

            let updates = watch_endpoints(
                pipeline,
                WatchConfig {
                    interval: args.interval,
                    min_interval: args.min_event_interval,
                },
            );
            let mut updates = std::pin::pin!(updates);
            loop {
                tokio::select! {
                    Some(endpoints) = updates.next() => print_endpoints(&endpoints, args.sources.output)?,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            info!("Watch stopped");
        }
    }

    Ok(())
}
