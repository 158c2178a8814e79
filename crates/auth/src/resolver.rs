//! Credential resolution.
//!
//! Turns the bearer credential of a request into the datasource identity the
//! request is allowed to use. Verification is stateless and repeated for every
//! request; nothing is remembered between calls.

use crate::token::verify_token;
use accelerate_core::RequestHeaders;
use accelerate_types::{DatasourceUrl, GatewayError};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

/// How requests are authenticated. The modes are mutually exclusive.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Single tenant, no credential required.
    Static { datasource_url: DatasourceUrl },

    /// Single tenant, bearer must equal a shared API key.
    ApiKey {
        datasource_url: DatasourceUrl,
        api_key: String,
    },

    /// Multi tenant, bearer is a signed token naming the datasource.
    SignedToken { secret: String },
}

impl AuthMode {
    /// Whether different requests may resolve to different datasources.
    pub fn is_multi_tenant(&self) -> bool {
        matches!(self, AuthMode::SignedToken { .. })
    }
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Static { datasource_url } => f
                .debug_struct("Static")
                .field("datasource_url", datasource_url)
                .finish(),
            AuthMode::ApiKey { datasource_url, .. } => f
                .debug_struct("ApiKey")
                .field("datasource_url", datasource_url)
                .field("api_key", &"<redacted>")
                .finish(),
            AuthMode::SignedToken { .. } => f
                .debug_struct("SignedToken")
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Resolves a request's datasource identity from its headers.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    mode: AuthMode,
}

impl CredentialResolver {
    pub fn new(mode: AuthMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    /// Resolve the datasource for a request.
    ///
    /// Async so that secret lookups against remote stores fit the same path.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unauthorized`] for a missing, wrong or forged
    /// credential. The reason is logged at debug level and never returned.
    pub async fn resolve(&self, headers: &RequestHeaders) -> Result<DatasourceUrl, GatewayError> {
        match &self.mode {
            AuthMode::Static { datasource_url } => Ok(datasource_url.clone()),
            AuthMode::ApiKey {
                datasource_url,
                api_key,
            } => {
                let Some(presented) = headers.bearer_token() else {
                    debug!("Rejecting request without bearer credential");
                    return Err(GatewayError::Unauthorized);
                };
                if !keys_match(presented, api_key) {
                    debug!("Rejecting request with wrong API key");
                    return Err(GatewayError::Unauthorized);
                }
                Ok(datasource_url.clone())
            }
            AuthMode::SignedToken { secret } => {
                let Some(token) = headers.bearer_token() else {
                    debug!("Rejecting request without bearer credential");
                    return Err(GatewayError::Unauthorized);
                };
                match verify_token(token, secret) {
                    Ok(claims) => Ok(claims.datasource()),
                    Err(e) => {
                        debug!(error = %e, "Rejecting request with invalid token");
                        Err(GatewayError::Unauthorized)
                    }
                }
            }
        }
    }
}

/// Compare fixed-size digests so timing does not depend on the key prefix.
fn keys_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}
