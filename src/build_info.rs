//! Build metadata used to identify beacon to remote APIs.

const USER_AGENT_PREFIX: &str = "Beacon";
const DEV_BUILD: &str = "Dev";

/// Build metadata, resolved once at startup and handed to every HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    /// Build number (usually a git SHA) stamped in at compile time.
    pub build_number: Option<String>,
    /// Crate version.
    pub version: String,
}

impl BuildInfo {
    /// Read build metadata from the compile-time environment.
    ///
    /// `BEACON_BUILD_NUMBER` is expected to be exported by the release build.
    pub fn from_build_env() -> Self {
        Self::new(
            option_env!("BEACON_BUILD_NUMBER").map(str::to_string),
            env!("CARGO_PKG_VERSION"),
        )
    }

    pub fn new(build_number: Option<String>, version: impl Into<String>) -> Self {
        Self {
            build_number,
            version: version.into(),
        }
    }

    /// User-agent string, e.g. `Beacon/3f2a9c1` or `Beacon/Dev`.
    pub fn user_agent(&self) -> String {
        let build = self
            .build_number
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEV_BUILD);

        format!("{}/{}", USER_AGENT_PREFIX, build)
    }
}
