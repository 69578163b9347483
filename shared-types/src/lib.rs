use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::time::Duration;

/// Backend-owned bookkeeping attached to every stored resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Opaque token assigned by the backend on every write. Only ever compared
    /// for equality.
    #[serde(default)]
    pub resource_version: String,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.resource_version.is_empty()
    }
}

/// A resource kind that can be stored, listed and watched by name
pub trait Resource:
    Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Path segment the kind is stored under
    const KIND: &'static str;

    fn name(&self) -> &str;
    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;
}

/// Named backend service target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub name: String,
    /// Selects the dialer/load-balancing logic a consumer applies
    #[serde(rename = "type")]
    pub upstream_type: String,
    #[serde(default)]
    pub connection_timeout: Duration,
    /// Backend-specific configuration payload
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Upstream {
    pub fn new(
        name: impl Into<String>,
        upstream_type: impl Into<String>,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            upstream_type: upstream_type.into(),
            connection_timeout,
            spec: serde_json::Value::Null,
            metadata: Metadata::default(),
        }
    }
}

impl Resource for Upstream {
    const KIND: &'static str = "upstreams";

    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// How a route matches the request path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    Prefix(String),
    Exact(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub matcher: Matcher,
    /// Name of the upstream requests are sent to
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslConfig {
    /// Reference into the secret store holding the certificate chain and key
    pub secret_ref: String,
}

/// Named set of routing rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_config: Option<SslConfig>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl VirtualHost {
    pub fn new(name: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domains,
            ..Self::default()
        }
    }
}

impl Resource for VirtualHost {
    const KIND: &'static str = "virtualhosts";

    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Point-in-time view of every tracked resource, each list sorted by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub upstreams: Vec<Upstream>,
    pub virtual_hosts: Vec<VirtualHost>,
}

impl Config {
    /// Secret references named by the virtual hosts, sorted and de-duplicated
    pub fn secret_refs(&self) -> Vec<String> {
        self.virtual_hosts
            .iter()
            .filter_map(|vh| vh.ssl_config.as_ref())
            .map(|ssl| ssl.secret_ref.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Secret reference -> key -> value
pub type SecretMap = BTreeMap<String, BTreeMap<String, String>>;
