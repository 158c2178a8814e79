//! Interactive transaction options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time a client may wait to acquire a transaction, in milliseconds.
pub const DEFAULT_MAX_WAIT_MS: u64 = 2_000;

/// Default lifetime of an interactive transaction, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Transaction isolation level requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

/// Body of `POST /{version}/{hash}/transaction/start`.
///
/// Clients send snake_case keys; camelCase is accepted too since both
/// spellings are seen in the wild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Milliseconds to wait for a connection before giving up.
    #[serde(default = "default_max_wait", alias = "maxWait")]
    pub max_wait: u64,

    /// Milliseconds the transaction may stay open on the engine.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Requested isolation level, engine default when absent.
    #[serde(
        default,
        alias = "isolationLevel",
        skip_serializing_if = "Option::is_none"
    )]
    pub isolation_level: Option<IsolationLevel>,
}

fn default_max_wait() -> u64 {
    DEFAULT_MAX_WAIT_MS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT_MS,
            timeout: DEFAULT_TIMEOUT_MS,
            isolation_level: None,
        }
    }
}

impl TransactionOptions {
    pub fn max_wait_duration(&self) -> Duration {
        Duration::from_millis(self.max_wait)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let options: TransactionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, TransactionOptions::default());
        assert_eq!(options.timeout_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_accepts_both_key_spellings() {
        let snake: TransactionOptions = serde_json::from_str(
            r#"{"max_wait":100,"timeout":900,"isolation_level":"Serializable"}"#,
        )
        .unwrap();
        let camel: TransactionOptions = serde_json::from_str(
            r#"{"maxWait":100,"timeout":900,"isolationLevel":"Serializable"}"#,
        )
        .unwrap();

        assert_eq!(snake, camel);
        assert_eq!(snake.isolation_level, Some(IsolationLevel::Serializable));
        assert_eq!(snake.max_wait_duration(), Duration::from_millis(100));
    }
}
