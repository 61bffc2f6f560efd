//! NextDNS linked IP notifier.

use super::LinkedIpNotifier;
use crate::build_info::BuildInfo;
use crate::config::NextDnsConfig;
use crate::error::{BeaconError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// NextDNS "link IP" client.
pub struct NextDnsNotifier {
    linked_ip_url: String,
    timeout: Duration,
    user_agent: String,
}

impl NextDnsNotifier {
    /// Create a notifier from configuration.
    pub fn new(config: &NextDnsConfig, build: &BuildInfo) -> Self {
        Self::with_url(config.api_linked_ip_url.clone(), config.timeout(), build)
    }

    /// Create with an explicit linked IP URL (for testing).
    pub fn with_url(linked_ip_url: String, timeout: Duration, build: &BuildInfo) -> Self {
        Self {
            linked_ip_url,
            timeout,
            user_agent: build.user_agent(),
        }
    }

    async fn link(&self, ip: &str) -> Result<()> {
        if ip.is_empty() {
            return Err(BeaconError::SecondaryNotifyFailed(
                "linked IP must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()?;

        let response = client.get(&self.linked_ip_url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BeaconError::SecondaryNotifyFailed(format!(
                "HTTP {} from linked IP API",
                status
            )));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(BeaconError::SecondaryNotifyFailed(
                "blank response from linked IP API".to_string(),
            ));
        }
        if body != ip {
            return Err(BeaconError::SecondaryNotifyFailed(format!(
                "uplink IP did not match returned linked IP: {:?} != {:?}",
                ip, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl LinkedIpNotifier for NextDnsNotifier {
    async fn set_linked_ip(&self, ip: &str) -> Result<()> {
        self.link(ip).await.map_err(|e| match e {
            BeaconError::SecondaryNotifyFailed(_) => e,
            other => BeaconError::SecondaryNotifyFailed(other.to_string()),
        })?;

        tracing::debug!("Updated NextDNS linked IP to {}", ip);
        Ok(())
    }
}
