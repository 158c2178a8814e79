//! Credential resolution and token issuing.
//!
//! - [`CredentialResolver`] maps request headers to a datasource identity
//!   according to the configured [`AuthMode`].
//! - [`issue_token`] mints the signed credentials accepted in
//!   [`AuthMode::SignedToken`] mode.

mod resolver;
mod token;

pub use resolver::{AuthMode, CredentialResolver};
pub use token::{issue_token, issue_token_at, verify_token, TokenClaims, TokenError, TOKEN_ISSUER};
