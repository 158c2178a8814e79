//! Transaction handle bookkeeping.
//!
//! # Lifecycle
//!
//! ```text
//! start ──► open ──query──► open ──commit/rollback──► closed
//!             │
//!             └──idle > timeout──► rolled back by sweep ──► closed
//! ```
//!
//! A closed handle is forgotten; presenting it again is rejected with
//! [`TransactionRejection::NotFound`] before any engine is contacted.
//! Commit and rollback take the handle out of the map before calling the
//! engine, so two terminal calls for one handle never both reach it.

use crate::error::TrackerError;
use accelerate_engine::{EngineCache, EngineInstance, EngineLease};
use accelerate_types::{EngineKey, TransactionId, TransactionOptions, TransactionRejection};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Idle time after which an open transaction is rolled back.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct OpenTransaction {
    key: EngineKey,
    instance: Arc<EngineInstance>,
    /// Single-instance mode: the tracker disposes the instance on close.
    owned: bool,
    last_used: Instant,
}

/// Registry of open interactive transactions.
#[derive(Debug)]
pub struct TransactionTracker {
    cache: Arc<EngineCache>,
    open: DashMap<TransactionId, OpenTransaction>,
    idle_timeout: Duration,
}

impl TransactionTracker {
    pub fn new(cache: Arc<EngineCache>, idle_timeout: Duration) -> Self {
        Self {
            cache,
            open: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Number of open transactions.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.open.contains_key(id)
    }

    /// Open a transaction on the leased instance.
    ///
    /// The lease is consumed. An owned instance stays alive, pinned to the
    /// handle, until the transaction closes.
    pub async fn start(
        &self,
        key: &EngineKey,
        lease: EngineLease,
        options: &TransactionOptions,
    ) -> Result<TransactionId, TrackerError> {
        let id = match lease.engine().start_transaction(options).await {
            Ok(id) => id,
            Err(e) => {
                lease.release().await;
                return Err(e.into());
            }
        };

        let (instance, owned) = lease.into_parts();
        let inserted = match self.open.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(OpenTransaction {
                    key: key.clone(),
                    instance: Arc::clone(&instance),
                    owned,
                    last_used: Instant::now(),
                });
                true
            }
        };
        if inserted {
            debug!(tx_id = %id, key = %key, "Transaction started");
            return Ok(id);
        }

        warn!(tx_id = %id, key = %key, "Engine reused an open transaction id");
        if let Err(e) = instance.engine.rollback_transaction(&id).await {
            debug!(tx_id = %id, error = %e, "Rollback of duplicate transaction failed");
        }
        if owned {
            instance.engine.dispose().await;
        }
        Err(TrackerError::Duplicate(id))
    }

    /// Run `query` inside transaction `id`.
    pub async fn query(
        &self,
        key: &EngineKey,
        id: &TransactionId,
        query: Value,
    ) -> Result<Value, TrackerError> {
        let instance = self.checkout(key, id)?;
        Ok(instance.engine.request(query, Some(id)).await?)
    }

    /// Commit transaction `id`. The handle is closed whatever the outcome.
    pub async fn commit(&self, key: &EngineKey, id: &TransactionId) -> Result<Value, TrackerError> {
        let tx = self.take(key, id)?;
        let result = tx.instance.engine.commit_transaction(id).await;
        debug!(tx_id = %id, ok = result.is_ok(), "Transaction committed");
        self.close(tx).await;
        Ok(result?)
    }

    /// Roll back transaction `id`. The handle is closed whatever the outcome.
    pub async fn rollback(
        &self,
        key: &EngineKey,
        id: &TransactionId,
    ) -> Result<Value, TrackerError> {
        let tx = self.take(key, id)?;
        let result = tx.instance.engine.rollback_transaction(id).await;
        debug!(tx_id = %id, ok = result.is_ok(), "Transaction rolled back");
        self.close(tx).await;
        Ok(result?)
    }

    /// Roll back every transaction idle for longer than the timeout.
    ///
    /// Returns how many were expired.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<TransactionId> = self
            .open
            .iter()
            .filter(|tx| now.duration_since(tx.last_used) > self.idle_timeout)
            .map(|tx| tx.key().clone())
            .collect();

        let mut expired = 0;
        for id in stale {
            // Re-check under the shard lock; the handle may have been used since.
            let Some((_, tx)) = self.open.remove_if(&id, |_, tx| {
                now.duration_since(tx.last_used) > self.idle_timeout
            }) else {
                continue;
            };
            info!(tx_id = %id, key = %tx.key, "Rolling back idle transaction");
            if let Err(e) = tx.instance.engine.rollback_transaction(&id).await {
                debug!(tx_id = %id, error = %e, "Rollback of idle transaction failed");
            }
            self.close(tx).await;
            expired += 1;
        }
        expired
    }

    /// Periodically sweep idle transactions until the tracker is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                let expired = tracker.sweep_expired().await;
                if expired > 0 {
                    debug!(expired, open = tracker.len(), "Transaction sweep");
                }
            }
        })
    }

    /// Roll back every open transaction.
    pub async fn shutdown(&self) {
        let ids: Vec<TransactionId> = self.open.iter().map(|tx| tx.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.open.remove(&id) {
                if let Err(e) = tx.instance.engine.rollback_transaction(&id).await {
                    debug!(tx_id = %id, error = %e, "Rollback on shutdown failed");
                }
                self.close(tx).await;
            }
        }
    }

    /// Validate the handle for `key` and mark it used.
    fn checkout(
        &self,
        key: &EngineKey,
        id: &TransactionId,
    ) -> Result<Arc<EngineInstance>, TrackerError> {
        let mut tx = self
            .open
            .get_mut(id)
            .ok_or_else(|| TrackerError::rejected(id, TransactionRejection::NotFound))?;
        if tx.key != *key {
            debug!(tx_id = %id, "Transaction presented with a different key");
            return Err(TrackerError::rejected(id, TransactionRejection::Mismatch));
        }
        if !tx.owned && !self.cache.is_current(&tx.instance) {
            return Err(TrackerError::rejected(id, TransactionRejection::Evicted));
        }
        tx.last_used = Instant::now();
        Ok(Arc::clone(&tx.instance))
    }

    /// Remove the handle for a terminal operation.
    fn take(&self, key: &EngineKey, id: &TransactionId) -> Result<OpenTransaction, TrackerError> {
        let Some((_, tx)) = self.open.remove_if(id, |_, tx| tx.key == *key) else {
            let reason = if self.open.contains_key(id) {
                debug!(tx_id = %id, "Transaction presented with a different key");
                TransactionRejection::Mismatch
            } else {
                TransactionRejection::NotFound
            };
            return Err(TrackerError::rejected(id, reason));
        };
        if !tx.owned && !self.cache.is_current(&tx.instance) {
            return Err(TrackerError::rejected(id, TransactionRejection::Evicted));
        }
        Ok(tx)
    }

    async fn close(&self, tx: OpenTransaction) {
        if tx.owned {
            tx.instance.engine.dispose().await;
        }
    }
}
