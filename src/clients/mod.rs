//! Clients for the router controller, the DNS zone and the secondary DNS provider.

mod nextdns;
mod route53;
mod udm;


pub use nextdns::NextDnsNotifier;
pub use route53::Route53RecordStore;
pub use udm::{TransportPolicy, UdmClient};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Opaque credential returned by the controller login exchange.
///
/// Only lives for the duration of one tick and is never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the token carries no usable value.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// A resource record set as listed from the zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    /// Fully qualified name, exactly as the provider reports it.
    pub name: String,
    /// Record type, e.g. "A" or "AAAA".
    pub record_type: String,
    /// TTL in seconds, if the provider reported one.
    pub ttl: Option<i64>,
    /// Record values in provider order.
    pub values: Vec<String>,
}

impl RecordSet {
    /// The value compared and replaced during reconciliation.
    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// A create-or-replace write of a single-valued record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub name: String,
    pub record_type: String,
    pub ttl: i64,
    pub value: String,
}

impl ChangeRequest {
    /// Build an upsert that keeps `record`'s name and type but carries only `value`.
    pub fn upsert(record: &RecordSet, value: impl Into<String>, ttl: i64) -> Self {
        Self {
            name: record.name.clone(),
            record_type: record.record_type.clone(),
            ttl,
            value: value.into(),
        }
    }
}

/// Router controller API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Log in and return the session token.
    async fn authenticate(&self, username: &str, password: &str) -> Result<SessionToken>;

    /// Read the WAN uplink IP of the gateway device.
    async fn uplink_ip(&self, token: &SessionToken) -> Result<String>;
}

/// DNS zone holding the record to keep in sync.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List every record set in the zone, in provider order.
    async fn list_records(&self, zone_id: &str) -> Result<Vec<RecordSet>>;

    /// Submit a single UPSERT change and wait for the provider to accept it.
    async fn upsert(&self, zone_id: &str, change: &ChangeRequest) -> Result<()>;
}

/// Secondary DNS-filtering provider that tracks the customer's IP.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkedIpNotifier: Send + Sync {
    /// Report `ip` as the linked IP and verify the provider echoed it back.
    async fn set_linked_ip(&self, ip: &str) -> Result<()>;
}

/// Run authentication and the uplink read, yielding `None` on any failure.
///
/// Used by the on-demand status surface, which shows an unknown IP rather
/// than an error.
pub async fn current_uplink_ip(
    controller: &dyn ControllerApi,
    username: &str,
    password: &str,
) -> Option<String> {
    let token = match controller.authenticate(username, password).await {
        Ok(token) if !token.is_blank() => token,
        Ok(_) => {
            tracing::warn!("Controller returned a blank session token");
            return None;
        }
        Err(e) => {
            tracing::warn!("Failed to authenticate with controller: {}", e);
            return None;
        }
    };

    match controller.uplink_ip(&token).await {
        Ok(ip) if !ip.trim().is_empty() => Some(ip),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Failed to read uplink IP: {}", e);
            None
        }
    }
}
