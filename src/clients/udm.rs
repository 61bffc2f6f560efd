//! UniFi OS controller client.

use super::{ControllerApi, SessionToken};
use crate::build_info::BuildInfo;
use crate::config::ControllerConfig;
use crate::error::{BeaconError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const AUTH_LOGIN_PATH: &str = "/api/auth/login";
const DEVICE_STAT_PATH: &str = "/proxy/network/api/s/default/stat/device";

const AUTH_TOKEN_COOKIE: &str = "TOKEN";

/// Name of the gateway unit in the controller's device list.
const GATEWAY_DEVICE_NAME: &str = "UDM";

/// How the controller client treats the controller's TLS certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPolicy {
    /// Normal certificate verification.
    Verified,
    /// Accept any certificate. Controllers ship self-signed certificates and
    /// sit on the local network.
    TrustAnyCertificate,
}

/// Controller client. Builds a fresh HTTP client for every call.
pub struct UdmClient {
    base_url: String,
    timeout: Duration,
    user_agent: String,
    transport: TransportPolicy,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeviceStatResponse {
    #[serde(default)]
    data: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct Device {
    name: Option<String>,
    uplink: Option<Uplink>,
}

#[derive(Debug, Deserialize)]
struct Uplink {
    ip: Option<String>,
}

impl UdmClient {
    /// Create a controller client from configuration.
    pub fn new(config: &ControllerConfig, build: &BuildInfo) -> Self {
        let transport = if config.trust_self_signed_certificate {
            TransportPolicy::TrustAnyCertificate
        } else {
            TransportPolicy::Verified
        };

        Self::with_base_url(config.api_base_url.clone(), config.timeout(), build)
            .with_transport(transport)
    }

    /// Create with an explicit base URL (for testing).
    pub fn with_base_url(base_url: String, timeout: Duration, build: &BuildInfo) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            user_agent: build.user_agent(),
            transport: TransportPolicy::Verified,
        }
    }

    pub fn with_transport(mut self, transport: TransportPolicy) -> Self {
        self.transport = transport;
        self
    }

    pub fn transport(&self) -> TransportPolicy {
        self.transport
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        let builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout);

        let builder = match self.transport {
            TransportPolicy::Verified => builder,
            TransportPolicy::TrustAnyCertificate => builder.danger_accept_invalid_certs(true),
        };

        Ok(builder.build()?)
    }

    async fn login(&self, username: &str, password: &str) -> Result<SessionToken> {
        if username.is_empty() || password.is_empty() {
            return Err(BeaconError::AuthenticationFailed(
                "username and password must not be empty".to_string(),
            ));
        }

        let client = self.http_client()?;
        let url = format!("{}{}", self.base_url, AUTH_LOGIN_PATH);

        let response = client
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(BeaconError::AuthenticationFailed(format!(
                "HTTP {} from {}",
                response.status(),
                AUTH_LOGIN_PATH
            )));
        }

        let token = response
            .cookies()
            .find(|c| c.name() == AUTH_TOKEN_COOKIE)
            .map(|c| SessionToken::new(c.value()))
            .filter(|token| !token.is_blank())
            .ok_or_else(|| {
                BeaconError::AuthenticationFailed(format!(
                    "no {} cookie in login response",
                    AUTH_TOKEN_COOKIE
                ))
            });
        token
    }
}

#[async_trait]
impl ControllerApi for UdmClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<SessionToken> {
        self.login(username, password).await.map_err(|e| match e {
            BeaconError::AuthenticationFailed(_) => e,
            other => BeaconError::AuthenticationFailed(other.to_string()),
        })
    }

    async fn uplink_ip(&self, token: &SessionToken) -> Result<String> {
        let client = self.http_client()?;
        let url = format!("{}{}", self.base_url, DEVICE_STAT_PATH);

        let response = client
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(COOKIE, format!("{}={}", AUTH_TOKEN_COOKIE, token.as_str()))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(BeaconError::UnexpectedStatus {
                endpoint: DEVICE_STAT_PATH.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await?;
        let stat: DeviceStatResponse = serde_json::from_str(&body)
            .map_err(|e| BeaconError::MalformedResponse(format!("device list: {}", e)))?;

        let gateway = stat
            .data
            .into_iter()
            .find(|d| d.name.as_deref() == Some(GATEWAY_DEVICE_NAME))
            .ok_or_else(|| {
                BeaconError::DeviceNotFound(format!(
                    "no device named {} in device list",
                    GATEWAY_DEVICE_NAME
                ))
            })?;

        let ip = gateway
            .uplink
            .and_then(|u| u.ip)
            .filter(|ip| !ip.trim().is_empty())
            .ok_or_else(|| {
                BeaconError::MalformedResponse(format!(
                    "device {} has no uplink IP",
                    GATEWAY_DEVICE_NAME
                ))
            })?;

        tracing::debug!("Controller reports uplink IP {}", ip);
        Ok(ip)
    }
}
