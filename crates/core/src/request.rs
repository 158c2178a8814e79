//! Inbound request model.

use accelerate_types::{EngineVersion, GatewayError};

/// Header carrying the bearer credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Header carrying the query engine version the client was generated for.
pub const ENGINE_VERSION_HEADER: &str = "prisma-engine-hash";

/// Header set by reverse proxies with the host the client originally used.
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// Plain host header.
pub const HOST_HEADER: &str = "host";

/// The request headers the gateway cares about.
///
/// The transport copies these out of its own header map so that the gateway
/// logic never depends on a particular HTTP framework.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub authorization: Option<String>,
    pub engine_version: Option<String>,
    pub forwarded_host: Option<String>,
    pub host: Option<String>,
}

impl RequestHeaders {
    /// Build from `(name, value)` pairs. Names are matched case-insensitively.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let slot = match name.to_ascii_lowercase().as_str() {
                AUTHORIZATION_HEADER => &mut headers.authorization,
                ENGINE_VERSION_HEADER => &mut headers.engine_version,
                FORWARDED_HOST_HEADER => &mut headers.forwarded_host,
                HOST_HEADER => &mut headers.host,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        headers
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_authorization(format!("Bearer {}", token))
    }

    pub fn with_engine_version(mut self, version: impl Into<String>) -> Self {
        self.engine_version = Some(version.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// The token after `Bearer `, if the header has that shape.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.authorization.as_deref()?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// The requested engine version.
    ///
    /// # Errors
    ///
    /// [`GatewayError::VersionMissing`] if the header is absent or blank.
    pub fn engine_version(&self) -> Result<EngineVersion, GatewayError> {
        match self.engine_version.as_deref().map(str::trim) {
            Some(version) if !version.is_empty() => Ok(EngineVersion::new(version)),
            _ => Err(GatewayError::VersionMissing),
        }
    }

    /// Host the client addressed, preferring the proxy-forwarded one.
    pub fn public_host(&self) -> Option<&str> {
        self.forwarded_host
            .as_deref()
            .or(self.host.as_deref())
            .map(|h| h.split(',').next().unwrap_or(h).trim())
    }
}
