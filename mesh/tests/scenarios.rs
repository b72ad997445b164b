//! End-to-end scenarios from the governed-call contract: a registered KB
//! query with field masking, a denied write, an agent-to-agent invocation
//! that completes, one that is denied outright, a KB whose adapter is
//! unreachable, and directory discovery filtered by capability/status.
//!
//! Each test wires the same collaborators `mesh/src/main.rs` wires, minus
//! the live NATS connection: an in-memory [`Store`], a [`LocalMessageBus`],
//! and the reference KB adapters.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use mesh_adapters::{KbAdapter, RelationalKbAdapter};
use mesh_bus::{LocalMessageBus, MessageBus};
use mesh_policy::LocalPolicyClient;
use mesh_registry::DirectoryCache;
use mesh_router::{
    AgentInvokeRequest, EnforcementPipeline, Error as RouterError, KbQueryRequest, RequestRouter,
};
use mesh_store::{
    AgentRegistration, AuditEventType, AuditOutcome, AuditQuery, HealthStatus, KbRegistration,
    Operation, PolicyDefinition, PolicyEffect, PolicyRule, Store,
};
use serde_json::json;

async fn register_agent(store: &Store, identity: &str) {
    store
        .register_agent(AgentRegistration {
            identity: identity.to_owned(),
            version: "1.0.0".into(),
            capabilities: BTreeSet::new(),
            operations: vec![Operation::Invoke],
            schemas: json!({}),
            health_endpoint: "http://localhost/health".into(),
            metadata: json!({}),
        })
        .await
        .unwrap();
    store.update_agent_status(identity, HealthStatus::Active).await.unwrap();
}

async fn create_policy(store: &Store, name: &str, rules: Vec<PolicyRule>) {
    store
        .create_policy(PolicyDefinition {
            policy_name: name.into(),
            rules,
            precedence: 0,
            active: true,
            metadata: json!({}),
        })
        .await
        .unwrap();
}

fn rule(principal: &str, resource: &str, action: &str, effect: PolicyEffect, masking: &[&str]) -> PolicyRule {
    PolicyRule {
        principal: principal.into(),
        resource: resource.into(),
        action: action.into(),
        effect,
        masking_rules: masking.iter().map(|s| (*s).to_owned()).collect(),
    }
}

/// S1. Field-level masking: a successful query masks the configured fields
/// in the response while leaving every other column and row intact.
#[tokio::test]
async fn s1_field_level_masking() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    store
        .register_kb(KbRegistration {
            kb_id: "sales-kb".into(),
            kb_type: "relational".into(),
            endpoint: "postgres://localhost/sales".into(),
            operations: vec!["sql_query".into()],
            kb_schema: json!({}),
            health_endpoint: None,
            metadata: json!({}),
        })
        .await
        .unwrap();
    create_policy(
        &store,
        "marketing-read",
        vec![rule(
            "agent:marketing-*",
            "kb:sales-kb",
            "sql_query",
            PolicyEffect::Allow,
            &["customer_email", "customer_phone"],
        )],
    )
    .await;

    let adapter = Arc::new(RelationalKbAdapter::new("sales-kb"));
    adapter.connect().await.unwrap();
    adapter
        .execute(
            "insert",
            json!({"row": {
                "name": "Alice",
                "customer_email": "a@x",
                "customer_phone": "555-1",
                "ssn": "111-11-1111",
                "credit_card": "4111",
            }}),
        )
        .await
        .unwrap();

    let mut adapters: HashMap<String, Arc<dyn KbAdapter>> = HashMap::new();
    adapters.insert("relational".into(), adapter);

    let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
    let enforcement = EnforcementPipeline::new(Arc::clone(&store), policy, adapters);

    let outcome = enforcement
        .enforce_kb_access("marketing-1", "sales-kb", "sql_query", json!({"query": "SELECT * FROM customers"}))
        .await
        .unwrap();

    assert_eq!(
        outcome.data["rows"][0],
        json!({
            "name": "Alice",
            "customer_email": "[REDACTED]",
            "customer_phone": "[REDACTED]",
            "ssn": "111-11-1111",
            "credit_card": "4111",
        })
    );
    assert_eq!(outcome.masked_fields, vec!["customer_email", "customer_phone"]);

    let audit = store
        .query_audit_logs(&AuditQuery {
            event_type: Some(AuditEventType::Query),
            source_id: Some("marketing-1".into()),
            target_id: Some("sales-kb".into()),
            outcome: Some(AuditOutcome::Success),
            start_time: None,
            end_time: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].masked_fields.as_deref(), Some(&["customer_email".to_owned(), "customer_phone".to_owned()][..]));
}

/// S2. Unauthorized write: a requester with read-only policy coverage is
/// denied, and the denial is the only audit event recorded for the call.
#[tokio::test]
async fn s2_unauthorized_write_denied() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    store
        .register_kb(KbRegistration {
            kb_id: "sales-kb".into(),
            kb_type: "relational".into(),
            endpoint: "postgres://localhost/sales".into(),
            operations: vec!["sql_query".into()],
            kb_schema: json!({}),
            health_endpoint: None,
            metadata: json!({}),
        })
        .await
        .unwrap();
    create_policy(
        &store,
        "marketing-read",
        vec![rule("agent:marketing-*", "kb:sales-kb", "sql_query", PolicyEffect::Allow, &[])],
    )
    .await;

    let adapter = Arc::new(RelationalKbAdapter::new("sales-kb"));
    adapter.connect().await.unwrap();
    let mut adapters: HashMap<String, Arc<dyn KbAdapter>> = HashMap::new();
    adapters.insert("relational".into(), adapter);

    let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
    let enforcement = EnforcementPipeline::new(Arc::clone(&store), policy, adapters);

    let err = enforcement
        .enforce_kb_access("marketing-1", "sales-kb", "execute_sql", json!({"query": "INSERT INTO customers VALUES (...)"}))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::AccessDenied { .. }));

    let audit = store
        .query_audit_logs(&AuditQuery {
            event_type: Some(AuditEventType::Query),
            source_id: Some("marketing-1".into()),
            target_id: Some("sales-kb".into()),
            outcome: Some(AuditOutcome::Denied),
            start_time: None,
            end_time: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
}

fn router_for(store: Arc<Store>, bus: Arc<dyn MessageBus>) -> Arc<RequestRouter> {
    let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
    let adapters: HashMap<String, Arc<dyn KbAdapter>> = HashMap::new();
    let enforcement = Arc::new(EnforcementPipeline::new(Arc::clone(&store), policy, adapters));
    RequestRouter::new(enforcement, store, bus)
}

/// S3. Invocation happy path: `route_agent_invoke` returns a processing
/// tracking id, the target's completion publish resolves the record, and
/// the source is notified.
#[tokio::test]
async fn s3_invocation_happy_path() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    register_agent(&store, "sales-1").await;
    register_agent(&store, "engineering-1").await;
    create_policy(
        &store,
        "sales-invoke-engineering",
        vec![rule("agent:sales-*", "agent:engineering-*", "invoke", PolicyEffect::Allow, &[])],
    )
    .await;

    let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
    let router = router_for(Arc::clone(&store), Arc::clone(&bus));
    router.start().await.unwrap();

    let notifications: Arc<tokio::sync::Mutex<Vec<serde_json::Value>>> = Arc::default();
    let captured = Arc::clone(&notifications);
    bus.subscribe(
        "mesh.agent.sales-1.notifications",
        mesh_bus::handler(move |payload| {
            let captured = Arc::clone(&captured);
            async move {
                captured.lock().await.push(payload);
                None
            }
        }),
    )
    .await
    .unwrap();

    let target_invoked: Arc<tokio::sync::Mutex<Option<serde_json::Value>>> = Arc::default();
    let captured_invoke = Arc::clone(&target_invoked);
    bus.subscribe(
        "mesh.agent.engineering-1.invoke",
        mesh_bus::handler(move |payload| {
            let captured_invoke = Arc::clone(&captured_invoke);
            async move {
                *captured_invoke.lock().await = Some(payload);
                None
            }
        }),
    )
    .await
    .unwrap();

    let response = router
        .route_agent_invoke(AgentInvokeRequest {
            source_agent_id: "sales-1".into(),
            target_agent_id: "engineering-1".into(),
            operation: "prioritize_feature".into(),
            payload: json!({"feature": "X", "demand": "high"}),
        })
        .await;
    assert_eq!(response.status, "processing");
    assert!(!response.tracking_id.is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(target_invoked.lock().await.is_some());

    bus.publish(
        "mesh.routing.completion",
        json!({
            "tracking_id": response.tracking_id,
            "status": "complete",
            "result": {"priority": "P0"},
        }),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let record = router.get_invocation_status(&response.tracking_id).await.unwrap();
    assert_eq!(record.status, mesh_router::InvocationStatus::Completed);
    assert_eq!(record.result, Some(json!({"priority": "P0"})));
    assert!(record.completed_at.is_some());

    assert_eq!(notifications.lock().await.len(), 1);

    let invoke_events = store
        .query_audit_logs(&AuditQuery {
            event_type: Some(AuditEventType::Invoke),
            source_id: Some("sales-1".into()),
            target_id: Some("engineering-1".into()),
            outcome: None,
            start_time: None,
            end_time: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(invoke_events.len(), 2);
    assert!(invoke_events.iter().all(|e| e.outcome == AuditOutcome::Success));
}

/// S4. Invocation denied: no policy permits the call, so the router
/// returns an empty tracking id and never dispatches to the target.
#[tokio::test]
async fn s4_invocation_denied() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    register_agent(&store, "marketing-1").await;
    register_agent(&store, "engineering-1").await;

    let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
    let router = router_for(Arc::clone(&store), Arc::clone(&bus));
    router.start().await.unwrap();

    let dispatched: Arc<tokio::sync::Mutex<bool>> = Arc::default();
    let captured = Arc::clone(&dispatched);
    bus.subscribe(
        "mesh.agent.engineering-1.invoke",
        mesh_bus::handler(move |_payload| {
            let captured = Arc::clone(&captured);
            async move {
                *captured.lock().await = true;
                None
            }
        }),
    )
    .await
    .unwrap();

    let response = router
        .route_agent_invoke(AgentInvokeRequest {
            source_agent_id: "marketing-1".into(),
            target_agent_id: "engineering-1".into(),
            operation: "prioritize_feature".into(),
            payload: json!({}),
        })
        .await;
    assert_eq!(response.status, "denied");
    assert_eq!(response.tracking_id, "");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!*dispatched.lock().await);

    let audit = store
        .query_audit_logs(&AuditQuery {
            event_type: Some(AuditEventType::Invoke),
            source_id: Some("marketing-1".into()),
            target_id: Some("engineering-1".into()),
            outcome: Some(AuditOutcome::Denied),
            start_time: None,
            end_time: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
}

/// S5. KB unavailable: the KB is registered but no adapter serves its type,
/// so the router surfaces an error rather than a denial.
#[tokio::test]
async fn s5_kb_unavailable_returns_error() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    store
        .register_kb(KbRegistration {
            kb_id: "offline-kb".into(),
            kb_type: "relational".into(),
            endpoint: "postgres://unreachable/db".into(),
            operations: vec!["sql_query".into()],
            kb_schema: json!({}),
            health_endpoint: None,
            metadata: json!({}),
        })
        .await
        .unwrap();
    create_policy(
        &store,
        "allow-all",
        vec![rule("*", "*", "*", PolicyEffect::Allow, &[])],
    )
    .await;

    let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
    // No adapters registered for "relational" — the KB type is unsupported
    // at enforcement time, mirroring an adapter that never came online.
    let router = router_for(Arc::clone(&store), bus);

    let response = router
        .route_kb_query(KbQueryRequest {
            requester_id: "agent-1".into(),
            kb_id: "offline-kb".into(),
            operation: "sql_query".into(),
            params: json!({}),
        })
        .await;
    assert_eq!(response.status, "error");
    assert!(response.data.is_none());
    assert!(response.masked_fields.is_none() || response.masked_fields == Some(vec![]));

    let audit = store
        .query_audit_logs(&AuditQuery {
            event_type: Some(AuditEventType::Query),
            source_id: Some("agent-1".into()),
            target_id: Some("offline-kb".into()),
            outcome: Some(AuditOutcome::Error),
            start_time: None,
            end_time: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
}

/// S6. Directory discovery: a query filtered by capability and status
/// returns only the matching agents, excluding unrelated agents and KBs.
#[tokio::test]
async fn s6_directory_discovery_filters() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    store
        .register_agent(AgentRegistration {
            identity: "agent-query".into(),
            version: "1.0.0".into(),
            capabilities: BTreeSet::from(["query_kb".to_owned()]),
            operations: vec![Operation::Query],
            schemas: json!({}),
            health_endpoint: "http://localhost/health".into(),
            metadata: json!({}),
        })
        .await
        .unwrap();
    store.update_agent_status("agent-query", HealthStatus::Active).await.unwrap();

    store
        .register_agent(AgentRegistration {
            identity: "agent-other".into(),
            version: "1.0.0".into(),
            capabilities: BTreeSet::from(["other_cap".to_owned()]),
            operations: vec![Operation::Query],
            schemas: json!({}),
            health_endpoint: "http://localhost/health".into(),
            metadata: json!({}),
        })
        .await
        .unwrap();
    store.update_agent_status("agent-other", HealthStatus::Active).await.unwrap();

    store
        .register_agent(AgentRegistration {
            identity: "agent-stale".into(),
            version: "1.0.0".into(),
            capabilities: BTreeSet::from(["query_kb".to_owned()]),
            operations: vec![Operation::Query],
            schemas: json!({}),
            health_endpoint: "http://localhost/health".into(),
            metadata: json!({}),
        })
        .await
        .unwrap();
    store.update_agent_status("agent-stale", HealthStatus::Offline).await.unwrap();

    store
        .register_kb(KbRegistration {
            kb_id: "some-kb".into(),
            kb_type: "relational".into(),
            endpoint: "postgres://localhost/db".into(),
            operations: vec!["sql_query".into()],
            kb_schema: json!({}),
            health_endpoint: None,
            metadata: json!({}),
        })
        .await
        .unwrap();

    let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
    let cache = DirectoryCache::new(Arc::clone(&store));
    cache.start(Arc::clone(&bus)).await.unwrap();

    let response = bus
        .request(
            "mesh.directory.query",
            json!({"type": "agents", "capability_filter": "query_kb", "status_filter": "active"}),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
        .unwrap();

    let agents = response["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["identity"], "agent-query");
    assert_eq!(response["kbs"].as_array().unwrap().len(), 0);
}
