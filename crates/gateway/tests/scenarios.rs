//! End-to-end gateway scenarios against the in-memory engine.

use accelerate_auth::issue_token;
use accelerate_core::RequestHeaders;
use accelerate_engine::MemorySchemaStore;
use accelerate_gateway::{AuthMode, Gateway, GatewayConfig, InstanceMode, Registration};
use accelerate_test_helpers::{fixtures, CountingProvisioner, FakeEngineFactory};
use accelerate_types::{
    GatewayError, SchemaHash, TransactionId, TransactionOptions, TransactionRejection,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "gateway-test-secret";
const CLIENT_VERSION: &str = "5.22.0";

struct Harness {
    gateway: Arc<Gateway>,
    provisioner: Arc<CountingProvisioner>,
    factory: Arc<FakeEngineFactory>,
}

fn harness_with(config: GatewayConfig, provisioner: CountingProvisioner) -> Harness {
    let provisioner = Arc::new(provisioner);
    let factory = Arc::new(FakeEngineFactory::new());
    let gateway = Gateway::builder(config, provisioner.clone(), factory.clone()).build();
    Harness {
        gateway: Arc::new(gateway),
        provisioner,
        factory,
    }
}

fn signed_harness(mode: InstanceMode) -> Harness {
    let config = GatewayConfig::new(AuthMode::SignedToken {
        secret: SECRET.to_string(),
    })
    .with_instance_mode(mode);
    harness_with(config, CountingProvisioner::new())
}

fn headers() -> RequestHeaders {
    let token = issue_token(&fixtures::datasource(), SECRET).unwrap();
    RequestHeaders::default()
        .with_bearer(&token)
        .with_engine_version(fixtures::ENGINE_VERSION)
        .with_host("accelerate.local:4000")
}

fn hash(h: &str) -> SchemaHash {
    SchemaHash::new(h)
}

fn rejection(err: GatewayError) -> TransactionRejection {
    match err {
        GatewayError::Transaction { reason, .. } => reason,
        other => panic!("expected transaction rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_or_forged_credentials_are_unauthorized_everywhere() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let forged = issue_token(&fixtures::datasource(), "wrong-secret").unwrap();
    let variants = [
        RequestHeaders::default().with_engine_version(fixtures::ENGINE_VERSION),
        headers().with_bearer(&forged),
        headers().with_authorization("Basic Zm9vOmJhcg=="),
    ];
    let tx = TransactionId::new("itx-anything");

    for bad in &variants {
        let errors = vec![
            h.gateway
                .query(bad, &hash("a"), fixtures::find_users())
                .await
                .unwrap_err(),
            h.gateway
                .update_schema(bad, &hash("a"), fixtures::SCHEMA)
                .await
                .unwrap_err(),
            h.gateway
                .start_transaction(bad, CLIENT_VERSION, &hash("a"), &TransactionOptions::default())
                .await
                .unwrap_err(),
            h.gateway
                .query_transaction(bad, &hash("a"), &tx, fixtures::find_users())
                .await
                .unwrap_err(),
            h.gateway
                .commit_transaction(bad, &hash("a"), &tx)
                .await
                .unwrap_err(),
            h.gateway
                .rollback_transaction(bad, &hash("a"), &tx)
                .await
                .unwrap_err(),
        ];
        for err in errors {
            assert_eq!(err.status_code(), 401);
            assert_eq!(err.body(), json!({ "Unauthorized": { "reason": "InvalidKey" } }));
        }
    }
}

#[tokio::test]
async fn test_unknown_schema_is_schema_missing() {
    let h = signed_harness(InstanceMode::Shared);

    let err = h
        .gateway
        .query(&headers(), &hash("never-uploaded"), fixtures::find_users())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 404);
    assert_eq!(err.body()["EngineNotStarted"]["reason"], "SchemaMissing");
    assert_eq!(h.provisioner.acquisitions(), 0);
}

#[tokio::test]
async fn test_missing_version_header() {
    let h = signed_harness(InstanceMode::Shared);
    let token = issue_token(&fixtures::datasource(), SECRET).unwrap();
    let no_version = RequestHeaders::default().with_bearer(&token);

    let err = h
        .gateway
        .update_schema(&no_version, &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 404);
    assert_eq!(err.body()["EngineNotStarted"]["reason"], "VersionMissing");
}

#[tokio::test]
async fn test_schema_upload_is_idempotent() {
    let h = signed_harness(InstanceMode::Shared);

    let first = h
        .gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();
    let second = h
        .gateway
        .update_schema(&headers(), &hash("a"), "model Different { id Int @id }")
        .await
        .unwrap();

    assert_eq!(first, Registration::Provisioned);
    assert_eq!(second, Registration::Existing);
    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.gateway.cache().len(), 1);
}

#[tokio::test]
async fn test_concurrent_first_requests_provision_once() {
    let store = Arc::new(MemorySchemaStore::new());
    let provisioner = Arc::new(CountingProvisioner::new().with_delay(Duration::from_millis(30)));
    let factory = Arc::new(FakeEngineFactory::new());
    let config = GatewayConfig::new(AuthMode::SignedToken {
        secret: SECRET.to_string(),
    });

    // Snapshot left behind by an earlier process.
    {
        let previous = Gateway::builder(config.clone(), provisioner.clone(), factory.clone())
            .schema_store(store.clone())
            .build();
        previous
            .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
            .await
            .unwrap();
        previous.shutdown().await;
    }
    let before = provisioner.acquisitions();

    let gateway = Arc::new(
        Gateway::builder(config, provisioner.clone(), factory.clone())
            .schema_store(store)
            .build(),
    );
    let requests = (0..12).map(|_| {
        let gateway = gateway.clone();
        async move {
            gateway
                .query(&headers(), &hash("a"), fixtures::find_users())
                .await
        }
    });
    let results = futures::future::join_all(requests).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(provisioner.acquisitions() - before, 1);
    assert_eq!(gateway.cache().len(), 1);
}

#[tokio::test]
async fn test_create_then_duplicate_returns_structured_error() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let created = h
        .gateway
        .query(&headers(), &hash("a"), fixtures::create_user("ada@example.com"))
        .await
        .unwrap();
    assert_eq!(created["data"]["createOneUser"]["email"], "ada@example.com");

    let err = h
        .gateway
        .query(&headers(), &hash("a"), fixtures::create_user("ada@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    let entry = &err.body()["errors"][0];
    assert_eq!(entry["user_facing_error"]["error_code"], "P2002");
    assert_eq!(entry["user_facing_error"]["is_panic"], false);
    assert_eq!(entry["user_facing_error"]["meta"]["target"], json!(["email"]));
}

#[tokio::test]
async fn test_engine_crash_is_server_error() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let err = h
        .gateway
        .query(&headers(), &hash("a"), fixtures::crash())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.body()["errors"][0]["user_facing_error"]["is_panic"], true);
}

#[tokio::test]
async fn test_transactional_batch_fails_as_a_whole() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let body = json!({
        "batch": [
            fixtures::create_user("one@example.com"),
            fixtures::create_user("one@example.com"),
            fixtures::create_user("three@example.com"),
        ],
        "transaction": { "isolationLevel": "ReadCommitted" }
    });
    let err = h
        .gateway
        .query(&headers(), &hash("a"), body)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Query(_)));
    let errors = err.body()["errors"].as_array().cloned().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["user_facing_error"]["batch_request_idx"], 1);
    assert!(h.factory.engines()[0].rows("User").is_empty());
}

#[tokio::test]
async fn test_independent_batch_keeps_prior_results() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let body = json!({
        "batch": [
            fixtures::create_user("one@example.com"),
            fixtures::create_user("one@example.com"),
            fixtures::create_user("three@example.com"),
        ]
    });
    let err = h
        .gateway
        .query(&headers(), &hash("a"), body)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    let body = err.body();
    assert_eq!(body["batchResult"][0]["createOneUser"]["email"], "one@example.com");
    assert_eq!(body["batchResult"][2]["createOneUser"]["email"], "three@example.com");
    assert_eq!(body["errors"].as_array().map(Vec::len), Some(1));
    assert_eq!(h.factory.engines()[0].rows("User").len(), 2);
}

#[tokio::test]
async fn test_successful_batch_shape() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let response = h
        .gateway
        .query(
            &headers(),
            &hash("a"),
            json!({ "batch": [fixtures::create_user("x@example.com"), fixtures::find_users()] }),
        )
        .await
        .unwrap();

    assert_eq!(response["batchResult"][0]["createOneUser"]["email"], "x@example.com");
    assert_eq!(response["batchResult"][1]["findManyUser"][0]["email"], "x@example.com");
    assert_eq!(response["extensions"], json!({ "traces": [], "logs": [] }));
}

#[tokio::test]
async fn test_interactive_transaction_round_trip() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let started = h
        .gateway
        .start_transaction(&headers(), CLIENT_VERSION, &hash("a"), &TransactionOptions::default())
        .await
        .unwrap();
    assert_eq!(
        started.endpoint,
        format!(
            "https://accelerate.local:4000/{}/a/itx/{}",
            CLIENT_VERSION, started.id
        )
    );
    let body = started.body();
    assert_eq!(body["id"], started.id.as_str());
    assert_eq!(body["data-proxy"]["endpoint"], started.endpoint.as_str());

    h.gateway
        .query_transaction(
            &headers(),
            &hash("a"),
            &started.id,
            fixtures::create_user("tx@example.com"),
        )
        .await
        .unwrap();
    h.gateway
        .commit_transaction(&headers(), &hash("a"), &started.id)
        .await
        .unwrap();
    assert_eq!(h.factory.engines()[0].rows("User").len(), 1);

    let err = h
        .gateway
        .query_transaction(&headers(), &hash("a"), &started.id, fixtures::find_users())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(rejection(err), TransactionRejection::NotFound);
}

#[tokio::test]
async fn test_forwarded_host_wins_in_endpoint() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let mut proxied = headers();
    proxied.forwarded_host = Some("public.example.com".to_string());
    let started = h
        .gateway
        .start_transaction(&proxied, CLIENT_VERSION, &hash("a"), &TransactionOptions::default())
        .await
        .unwrap();

    assert!(started.endpoint.starts_with("https://public.example.com/"));
}

#[tokio::test]
async fn test_handle_cannot_cross_schemas() {
    let h = signed_harness(InstanceMode::Shared);
    for schema_hash in ["a", "b"] {
        h.gateway
            .update_schema(&headers(), &hash(schema_hash), fixtures::SCHEMA)
            .await
            .unwrap();
    }

    let started = h
        .gateway
        .start_transaction(&headers(), CLIENT_VERSION, &hash("a"), &TransactionOptions::default())
        .await
        .unwrap();
    h.gateway
        .query_transaction(
            &headers(),
            &hash("a"),
            &started.id,
            fixtures::create_user("iso@example.com"),
        )
        .await
        .unwrap();

    let err = h
        .gateway
        .commit_transaction(&headers(), &hash("b"), &started.id)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), TransactionRejection::Mismatch);
    // Neither instance committed anything.
    for engine in h.factory.engines() {
        assert!(engine.rows("User").is_empty());
    }

    // A different tenant with its own valid token is refused the same way.
    let other_token = issue_token(&fixtures::other_datasource(), SECRET).unwrap();
    let other_tenant = headers().with_bearer(&other_token);
    h.gateway
        .update_schema(&other_tenant, &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();
    let err = h
        .gateway
        .rollback_transaction(&other_tenant, &hash("a"), &started.id)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), TransactionRejection::Mismatch);

    h.gateway
        .commit_transaction(&headers(), &hash("a"), &started.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_evicted_instance_fails_transaction() {
    let h = signed_harness(InstanceMode::Shared);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();
    let started = h
        .gateway
        .start_transaction(&headers(), CLIENT_VERSION, &hash("a"), &TransactionOptions::default())
        .await
        .unwrap();

    let key = fixtures::engine_key("a");
    assert!(h.gateway.cache().evict(&key).await);

    // No instance and no snapshot store: the triple no longer resolves.
    let err = h
        .gateway
        .commit_transaction(&headers(), &hash("a"), &started.id)
        .await
        .unwrap_err();
    assert_eq!(err.body()["EngineNotStarted"]["reason"], "SchemaMissing");

    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();
    let err = h
        .gateway
        .commit_transaction(&headers(), &hash("a"), &started.id)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), TransactionRejection::Evicted);
}

#[tokio::test]
async fn test_engine_missing_and_startup_errors() {
    let h = signed_harness(InstanceMode::Shared);

    h.provisioner.set_failure(Some("no such version"));
    let err = h
        .gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.body()["EngineNotStarted"]["reason"], "EngineMissing");
    assert!(h.gateway.cache().is_empty());

    h.provisioner.set_failure(None);
    let err = h
        .gateway
        .update_schema(&headers(), &hash("a"), fixtures::INVALID_SCHEMA)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.body()["EngineNotStarted"]["reason"], "EngineStartupError");

    // Nothing was poisoned; a valid upload now succeeds.
    assert_eq!(
        h.gateway
            .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
            .await
            .unwrap(),
        Registration::Provisioned
    );
}

#[tokio::test]
async fn test_single_instance_mode_disposes_after_each_request() {
    let h = signed_harness(InstanceMode::SingleInstance);

    assert_eq!(
        h.gateway
            .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
            .await
            .unwrap(),
        Registration::Stored
    );
    for _ in 0..3 {
        h.gateway
            .query(&headers(), &hash("a"), fixtures::find_users())
            .await
            .unwrap();
    }
    // Failed operations release their instance too.
    h.gateway
        .query(&headers(), &hash("a"), fixtures::crash())
        .await
        .unwrap_err();

    assert_eq!(h.factory.created(), 4);
    assert_eq!(h.factory.disposed(), 4);
    assert!(h.gateway.cache().is_empty());
}

#[tokio::test]
async fn test_single_instance_transaction_uses_issuing_instance() {
    let h = signed_harness(InstanceMode::SingleInstance);
    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();

    let started = h
        .gateway
        .start_transaction(&headers(), CLIENT_VERSION, &hash("a"), &TransactionOptions::default())
        .await
        .unwrap();
    h.gateway
        .query_transaction(
            &headers(),
            &hash("a"),
            &started.id,
            fixtures::create_user("pinned@example.com"),
        )
        .await
        .unwrap();
    h.gateway
        .rollback_transaction(&headers(), &hash("a"), &started.id)
        .await
        .unwrap();

    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.factory.disposed(), 1);
    assert_eq!(h.factory.engines()[0].transactions_rolled_back(), 1);
}

#[tokio::test]
async fn test_static_and_api_key_modes() {
    let static_h = harness_with(
        GatewayConfig::new(AuthMode::Static {
            datasource_url: fixtures::datasource(),
        }),
        CountingProvisioner::new(),
    );
    let no_credential =
        RequestHeaders::default().with_engine_version(fixtures::ENGINE_VERSION);
    static_h
        .gateway
        .update_schema(&no_credential, &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();
    static_h
        .gateway
        .query(&no_credential, &hash("a"), fixtures::find_users())
        .await
        .unwrap();

    let keyed = harness_with(
        GatewayConfig::new(AuthMode::ApiKey {
            datasource_url: fixtures::datasource(),
            api_key: "ABC".to_string(),
        }),
        CountingProvisioner::new(),
    );
    let err = keyed
        .gateway
        .update_schema(&no_credential, &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    keyed
        .gateway
        .update_schema(&no_credential.clone().with_bearer("ABC"), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health_counts_instances_and_transactions() {
    let h = signed_harness(InstanceMode::Shared);
    assert_eq!(h.gateway.health()["engines"], 0);

    h.gateway
        .update_schema(&headers(), &hash("a"), fixtures::SCHEMA)
        .await
        .unwrap();
    h.gateway
        .start_transaction(&headers(), CLIENT_VERSION, &hash("a"), &TransactionOptions::default())
        .await
        .unwrap();

    let health = h.gateway.health();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["engines"], 1);
    assert_eq!(health["transactions"], 1);

    h.gateway.shutdown().await;
    assert_eq!(h.gateway.health()["transactions"], 0);
    assert_eq!(h.factory.disposed(), 1);
}
