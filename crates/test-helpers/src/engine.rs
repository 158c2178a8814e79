use accelerate_core::{BatchItem, BatchRequest, QueryEngine};
use accelerate_types::{EngineError, TransactionId, TransactionOptions, TRANSACTION_API_ERROR};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const UNIQUE_COLUMN: &str = "email";

/// Process-wide so handles from different engines never collide.
static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, Vec<Value>>,
    next_id: u64,
}

impl Tables {
    fn apply(&mut self, query: &Value) -> Result<Value, EngineError> {
        let action = query
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::with_code("P2009", "Missing action"))?;
        if action == "$crash" {
            return Err(EngineError::panic("query engine crashed"));
        }
        let model = query
            .get("modelName")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::with_code("P2009", "Missing modelName"))?;
        let arguments = query
            .pointer("/query/arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let field = format!("{}{}", action, model);

        let result = match action {
            "createOne" => {
                let data = arguments
                    .get("data")
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| EngineError::with_code("P2009", "createOne needs data"))?;
                self.create(model, data)?
            }
            "findMany" => Value::Array(self.matching(model, arguments.get("where"))),
            "findUnique" | "findFirst" => self
                .matching(model, arguments.get("where"))
                .into_iter()
                .next()
                .unwrap_or(Value::Null),
            "deleteMany" => {
                let filter = arguments.get("where").cloned();
                let table = self.rows.entry(model.to_string()).or_default();
                let before = table.len();
                table.retain(|row| !row_matches(row, filter.as_ref()));
                json!({ "count": before - table.len() })
            }
            "aggregate" => json!({ "_count": { "_all": self.matching(model, None).len() } }),
            other => {
                return Err(EngineError::with_code(
                    "P2009",
                    format!("Unknown action {}", other),
                ))
            }
        };

        Ok(json!({ "data": { field: result } }))
    }

    fn create(&mut self, model: &str, mut data: Map<String, Value>) -> Result<Value, EngineError> {
        let table = self.rows.entry(model.to_string()).or_default();
        if let Some(value) = data.get(UNIQUE_COLUMN) {
            if table.iter().any(|row| row.get(UNIQUE_COLUMN) == Some(value)) {
                return Err(EngineError::with_code(
                    "P2002",
                    format!(
                        "Unique constraint failed on the fields: (`{}`)",
                        UNIQUE_COLUMN
                    ),
                )
                .meta(json!({ "modelName": model, "target": [UNIQUE_COLUMN] })));
            }
        }
        self.next_id += 1;
        data.insert("id".to_string(), json!(self.next_id));
        let row = Value::Object(data);
        table.push(row.clone());
        Ok(row)
    }

    fn matching(&self, model: &str, filter: Option<&Value>) -> Vec<Value> {
        self.rows
            .get(model)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn row_matches(row: &Value, filter: Option<&Value>) -> bool {
    match filter.and_then(Value::as_object) {
        Some(filter) => filter.iter().all(|(k, v)| row.get(k) == Some(v)),
        None => true,
    }
}

#[derive(Default)]
struct State {
    committed: Tables,
    /// Open interactive transactions, each staging a private copy.
    open: HashMap<TransactionId, Tables>,
}

/// In-memory query engine.
///
/// Interactive transactions work on a copy of the committed tables that
/// replaces them on commit. Closed or unknown handles are refused with
/// `P2028`, like a real engine.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
    started: AtomicUsize,
    rolled_back: AtomicUsize,
    disposed: AtomicBool,
    disposals: Option<Arc<AtomicUsize>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count disposals into a shared counter.
    pub fn with_disposal_counter(counter: Arc<AtomicUsize>) -> Self {
        Self {
            disposals: Some(counter),
            ..Self::default()
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn transactions_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn transactions_rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    pub fn open_transactions(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Committed rows of `model`.
    pub fn rows(&self, model: &str) -> Vec<Value> {
        self.state.lock().committed.matching(model, None)
    }

    fn check_alive(&self) -> Result<(), EngineError> {
        if self.is_disposed() {
            return Err(EngineError::new("engine instance has been disposed"));
        }
        Ok(())
    }
}

fn transaction_not_found(id: &TransactionId) -> EngineError {
    EngineError::with_code(
        TRANSACTION_API_ERROR,
        format!("Transaction API error: Transaction not found. Transaction ID is invalid, refers to an old closed transaction Prisma doesn't have information about anymore, or was obtained before disconnecting: {}", id),
    )
}

#[async_trait]
impl QueryEngine for FakeEngine {
    async fn request(
        &self,
        query: Value,
        transaction: Option<&TransactionId>,
    ) -> Result<Value, EngineError> {
        self.check_alive()?;
        let mut state = self.state.lock();
        match transaction {
            Some(id) => {
                let tables = state
                    .open
                    .get_mut(id)
                    .ok_or_else(|| transaction_not_found(id))?;
                tables.apply(&query)
            }
            None => state.committed.apply(&query),
        }
    }

    async fn request_batch(&self, batch: BatchRequest) -> Result<Vec<BatchItem>, EngineError> {
        self.check_alive()?;
        let mut state = self.state.lock();

        if batch.is_transactional() {
            let mut staged = state.committed.clone();
            let mut results = Vec::with_capacity(batch.queries.len());
            for (idx, query) in batch.queries.iter().enumerate() {
                results.push(Ok(staged.apply(query).map_err(|e| e.at_batch_index(idx))?));
            }
            state.committed = staged;
            return Ok(results);
        }

        Ok(batch
            .queries
            .iter()
            .enumerate()
            .map(|(idx, query)| {
                state
                    .committed
                    .apply(query)
                    .map_err(|e| e.at_batch_index(idx))
            })
            .collect())
    }

    async fn start_transaction(
        &self,
        _options: &TransactionOptions,
    ) -> Result<TransactionId, EngineError> {
        self.check_alive()?;
        let n = NEXT_TRANSACTION.fetch_add(1, Ordering::SeqCst);
        let id = TransactionId::new(format!("itx-{:06}", n));
        let mut state = self.state.lock();
        let staged = state.committed.clone();
        state.open.insert(id.clone(), staged);
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn commit_transaction(&self, id: &TransactionId) -> Result<Value, EngineError> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let staged = state
            .open
            .remove(id)
            .ok_or_else(|| transaction_not_found(id))?;
        state.committed = staged;
        Ok(json!({}))
    }

    async fn rollback_transaction(&self, id: &TransactionId) -> Result<Value, EngineError> {
        self.check_alive()?;
        self.state
            .lock()
            .open
            .remove(id)
            .ok_or_else(|| transaction_not_found(id))?;
        self.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(json!({}))
    }

    async fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            if let Some(counter) = &self.disposals {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{create_user, crash, find_users};
    use accelerate_core::BatchTransaction;

    #[tokio::test]
    async fn test_unique_email_violation() {
        let engine = FakeEngine::new();
        let created = engine.request(create_user("a@x.io"), None).await.unwrap();
        assert_eq!(created["data"]["createOneUser"]["email"], "a@x.io");

        let err = engine
            .request(create_user("a@x.io"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("P2002"));
        assert_eq!(err.meta["target"], json!(["email"]));
        assert_eq!(engine.rows("User").len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_staging() {
        let engine = FakeEngine::new();
        let id = engine
            .start_transaction(&TransactionOptions::default())
            .await
            .unwrap();
        engine.request(create_user("a@x.io"), Some(&id)).await.unwrap();
        assert!(engine.rows("User").is_empty());

        engine.commit_transaction(&id).await.unwrap();
        assert_eq!(engine.rows("User").len(), 1);

        let err = engine
            .request(find_users(), Some(&id))
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some(TRANSACTION_API_ERROR));
    }

    #[tokio::test]
    async fn test_transactional_batch_is_all_or_nothing() {
        let engine = FakeEngine::new();
        let batch = BatchRequest {
            queries: vec![create_user("a@x.io"), create_user("a@x.io"), create_user("b@x.io")],
            transaction: Some(BatchTransaction::default()),
        };

        let err = engine.request_batch(batch).await.unwrap_err();
        assert_eq!(err.batch_request_idx, Some(1));
        assert!(engine.rows("User").is_empty());
    }

    #[tokio::test]
    async fn test_crash_and_dispose() {
        let engine = FakeEngine::new();
        assert!(engine.request(crash(), None).await.unwrap_err().is_panic);

        engine.dispose().await;
        assert!(engine.is_disposed());
        assert!(engine.request(find_users(), None).await.is_err());
    }
}
