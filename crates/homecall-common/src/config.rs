use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use url::Url;

use crate::{
    error::{HomecallError, Result},
    types::TagSet,
};

pub const DEFAULT_METRICS_PORT: u16 = 2112;
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(5 * 60);

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_CLUSTER: &str = "local";
const DEFAULT_UNKNOWN: &str = "unknown";
const DEFAULT_CONTROLLER_VERSION: &str = "v1.0.0";

/// Process-wide settings, read once at startup and handed to each component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub namespace: String,
    pub cluster: String,
    pub resource_kind: String,
    pub resource_name: String,
    pub controller_name: String,
    pub controller_version: String,
    pub broker: Option<String>,
    pub topic: Option<String>,
    pub metrics_port: u16,
    pub publish_interval: Duration,
    pub pod_counts_enabled: bool,
    /// In-cluster Kubernetes API server, when running inside a pod.
    pub kube_api_server: Option<String>,
}

/// Validated destination of the push sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub broker: BrokerAddress,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAddress {
    /// Bootstrap brokers spoken to over the Kafka wire protocol, as `host:port`.
    Kafka(Vec<String>),
    /// A Kafka REST proxy, selected only by an explicit `http(s)://` address.
    RestProxy(Url),
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kafka(bootstrap) => write!(f, "{}", bootstrap.join(",")),
            Self::RestProxy(url) => write!(f, "{url}"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            cluster: DEFAULT_CLUSTER.to_string(),
            resource_kind: DEFAULT_UNKNOWN.to_string(),
            resource_name: DEFAULT_UNKNOWN.to_string(),
            controller_name: DEFAULT_UNKNOWN.to_string(),
            controller_version: DEFAULT_CONTROLLER_VERSION.to_string(),
            broker: None,
            topic: None,
            metrics_port: DEFAULT_METRICS_PORT,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            pod_counts_enabled: true,
            kube_api_server: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Values are
    /// trimmed and empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let metrics_port = match get("METRICS_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|err| {
                HomecallError::Config(format!("invalid METRICS_PORT {raw:?}: {err}"))
            })?,
            None => defaults.metrics_port,
        };

        let publish_interval = match get("METRICS_PUBLISH_INTERVAL") {
            Some(raw) => parse_interval_secs(&raw)?,
            None => defaults.publish_interval,
        };

        let pod_counts_enabled = match get("METRICS_POD_COUNTS") {
            Some(raw) => parse_bool("METRICS_POD_COUNTS", &raw)?,
            None => defaults.pod_counts_enabled,
        };

        Ok(Self {
            namespace: get("POD_NAMESPACE").unwrap_or(defaults.namespace),
            cluster: get("CLUSTER_NAME")
                .or_else(|| get("KUBECONTEXT"))
                .unwrap_or(defaults.cluster),
            resource_kind: get("RESOURCE_KIND").unwrap_or(defaults.resource_kind),
            resource_name: get("RESOURCE_NAME").unwrap_or(defaults.resource_name),
            controller_name: get("CONTROLLER_NAME").unwrap_or(defaults.controller_name),
            controller_version: get("CONTROLLER_VERSION").unwrap_or(defaults.controller_version),
            broker: get("KAFKA_BROKER"),
            topic: get("KAFKA_TOPIC"),
            metrics_port,
            publish_interval,
            pod_counts_enabled,
            kube_api_server: get("KUBERNETES_SERVICE_HOST").map(|host| {
                let port = get("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".to_string());
                kube_api_url(&host, &port)
            }),
        })
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.metrics_port))
    }

    pub fn tags(&self) -> TagSet {
        TagSet::new()
            .with("namespace", &self.namespace)
            .with("cluster", &self.cluster)
            .with("resource_kind", &self.resource_kind)
            .with("resource_name", &self.resource_name)
            .with("controller", &self.controller_name)
            .with("controller_version", &self.controller_version)
    }

    /// Validates the push sink settings. Both the broker address and the
    /// topic are required; nothing is defaulted.
    pub fn push_target(&self) -> Result<PushTarget> {
        let broker = self
            .broker
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HomecallError::Config("missing KAFKA_BROKER".to_string()))?;
        let topic = self
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HomecallError::Config("missing KAFKA_TOPIC".to_string()))?;

        Ok(PushTarget {
            broker: parse_broker_address(broker)?,
            topic: topic.to_string(),
        })
    }
}

fn kube_api_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{host}]:{port}")
    } else {
        format!("https://{host}:{port}")
    }
}

fn parse_broker_address(broker: &str) -> Result<BrokerAddress> {
    if broker.contains("://") {
        let url = Url::parse(broker).map_err(|err| {
            HomecallError::Config(format!("invalid KAFKA_BROKER {broker:?}: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(HomecallError::Config(format!(
                "KAFKA_BROKER {broker:?} must be host:port or an http(s) REST proxy URL"
            )));
        }
        return Ok(BrokerAddress::RestProxy(url));
    }

    let bootstrap = broker
        .split(',')
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(|address| {
            match address.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    Ok(address.to_string())
                }
                _ => Err(HomecallError::Config(format!(
                    "invalid KAFKA_BROKER address {address:?}: expected host:port"
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    if bootstrap.is_empty() {
        return Err(HomecallError::Config("missing KAFKA_BROKER".to_string()));
    }
    Ok(BrokerAddress::Kafka(bootstrap))
}

fn parse_interval_secs(raw: &str) -> Result<Duration> {
    let secs = raw.parse::<u64>().map_err(|err| {
        HomecallError::Config(format!("invalid METRICS_PUBLISH_INTERVAL {raw:?}: {err}"))
    })?;
    if secs == 0 {
        return Err(HomecallError::Config(
            "METRICS_PUBLISH_INTERVAL must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HomecallError::Config(format!(
            "invalid {key} {raw:?}: expected a boolean"
        ))),
    }
}
