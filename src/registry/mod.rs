pub mod memory;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use anyhow::Result;
use thiserror::Error;

pub use memory::{InMemoryRegistry, RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::Starting => "STARTING",
            Status::OutOfService => "OUT_OF_SERVICE",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(Status::Up),
            "DOWN" => Ok(Status::Down),
            "STARTING" => Ok(Status::Starting),
            "OUT_OF_SERVICE" => Ok(Status::OutOfService),
            "UNKNOWN" => Ok(Status::Unknown),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Port number encoded as `{"$": 8080, "@enabled": "true"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "PortRepr", into = "PortRepr")]
pub struct Port(pub u16);

#[derive(Serialize, Deserialize)]
struct PortRepr {
    #[serde(rename = "$", default)]
    value: u16,
    #[serde(rename = "@enabled", default)]
    enabled: String,
}

impl From<PortRepr> for Port {
    fn from(repr: PortRepr) -> Self {
        Port(repr.value)
    }
}

impl From<Port> for PortRepr {
    fn from(port: Port) -> Self {
        PortRepr {
            value: port.0,
            enabled: (port.0 != 0).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataCenterType {
    #[default]
    MyOwn,
    Amazon,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AmazonMetadata {
    pub hostname: String,
    pub public_hostname: String,
    pub local_hostname: String,
    pub public_ipv4: String,
    pub local_ipv4: String,
    pub availability_zone: String,
    pub instance_id: String,
    pub instance_type: String,
    pub ami_id: String,
    pub ami_launch_index: String,
    pub ami_manifest_path: String,
}

const DEFAULT_DATA_CENTER_CLASS: &str = "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo";

fn default_data_center_class() -> String {
    DEFAULT_DATA_CENTER_CLASS.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCenter {
    #[serde(rename = "@class", default = "default_data_center_class")]
    pub class: String,
    #[serde(default)]
    pub name: DataCenterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AmazonMetadata>,
}

impl Default for DataCenter {
    fn default() -> Self {
        Self {
            class: default_data_center_class(),
            name: DataCenterType::MyOwn,
            metadata: None,
        }
    }
}

/// Lease timing as reported by the registry. Ignored by instance equality.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lease {
    pub renewal_interval_in_secs: u64,
    pub duration_in_secs: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registration_timestamp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_renewal_timestamp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub eviction_timestamp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub service_up_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: String,
    #[serde(default)]
    pub host_name: String,
    pub app: String,
    #[serde(default)]
    pub ip_addr: String,
    #[serde(default)]
    pub vip_address: String,
    #[serde(default)]
    pub secure_vip_address: String,
    #[serde(default)]
    pub status: Status,
    #[serde(rename = "overriddenstatus", alias = "overriddenStatus", default = "unknown_status")]
    pub overridden_status: Status,
    #[serde(default)]
    pub port: Port,
    #[serde(default)]
    pub secure_port: Port,
    #[serde(default)]
    pub home_page_url: String,
    #[serde(default)]
    pub status_page_url: String,
    #[serde(default)]
    pub health_check_url: String,
    #[serde(default)]
    pub data_center_info: DataCenter,
    #[serde(default)]
    pub lease_info: Lease,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn unknown_status() -> Status {
    Status::Unknown
}

impl Instance {
    pub fn new(app: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            app: app.into(),
            status: Status::Up,
            overridden_status: Status::Unknown,
            ..Default::default()
        }
    }
}

/// Two instances are equal when everything but the lease matches. App names
/// compare case-insensitively since the registry upper-cases them.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.instance_id == other.instance_id
            && self.host_name == other.host_name
            && self.app.eq_ignore_ascii_case(&other.app)
            && self.ip_addr == other.ip_addr
            && self.vip_address == other.vip_address
            && self.secure_vip_address == other.secure_vip_address
            && self.status == other.status
            && self.overridden_status == other.overridden_status
            && self.port == other.port
            && self.secure_port == other.secure_port
            && self.home_page_url == other.home_page_url
            && self.status_page_url == other.status_page_url
            && self.health_check_url == other.health_check_url
            && self.data_center_info == other.data_center_info
            && self.metadata == other.metadata
    }
}

impl Eq for Instance {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    #[serde(rename = "instance", default)]
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEnvelope {
    pub instance: Instance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationEnvelope {
    pub application: Application,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Applications {
    #[serde(rename = "application", default)]
    pub applications: Vec<Application>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationsEnvelope {
    pub applications: Applications,
}

/// Source of the full application listing.
#[async_trait]
pub trait Registry: Send + Sync {
    /// List all applications and their instances
    async fn apps(&self) -> Result<Vec<Application>>;
}

#[async_trait]
impl<T: Registry + ?Sized> Registry for std::sync::Arc<T> {
    async fn apps(&self) -> Result<Vec<Application>> {
        (**self).apps().await
    }
}
