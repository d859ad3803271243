//! Connection configuration.

use serde::{Deserialize, Serialize};

/// Environment variable consulted when no default URI is configured.
pub const DEFAULT_URI_ENV: &str = "LIBVIRT_DEFAULT_URI";

/// Settings applied by a [`Connector`](crate::Connector).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// URI opened by `open_default`. Falls back to the environment, then to
    /// the driver's own default.
    pub default_uri: Option<String>,
    /// Open default connections read-only.
    pub read_only: bool,
}

impl ConnectConfig {
    /// Set the default URI.
    pub fn with_default_uri(mut self, uri: impl Into<String>) -> Self {
        self.default_uri = Some(uri.into());
        self
    }

    /// Open default connections read-only.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Pick the default URI: configured value, then environment, then driver default.
///
/// Empty strings count as unset.
pub fn resolve_default_uri(configured: Option<&str>, env: Option<&str>, driver_default: &str) -> String {
    configured
        .filter(|uri| !uri.is_empty())
        .or_else(|| env.filter(|uri| !uri.is_empty()))
        .unwrap_or(driver_default)
        .to_string()
}
