//! AgentMesh - a governance and routing plane mediating agent-to-knowledge-base
//! and agent-to-agent calls.
//!
//! This is the process entrypoint: load configuration, initialize
//! telemetry, open the persistence store, connect the message bus,
//! construct every service, subscribe the bus surface (`spec.md`
//! §4.9), and run until shutdown is requested.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mesh_adapters::{GraphKbAdapter, KbAdapter, RelationalKbAdapter};
use mesh_bus::{handler, MessageBus, NatsMessageBus};
use mesh_config::ConfigOverrides;
use mesh_policy::{HttpPolicyClient, LocalPolicyClient, PolicyDecisionClient};
use mesh_registry::{
    AgentRegistrationRequest, AgentService, DirectoryCache, HealthMonitor, KbRegistrationRequest,
    KbService,
};
use mesh_router::{AgentInvokeRequest, EnforcementPipeline, KbQueryRequest, RequestRouter};
use mesh_store::{AuditQuery, Store};
use serde_json::{json, Value};
use tracing::info;

/// AgentMesh governance and routing plane.
#[derive(Debug, Parser)]
#[command(name = "mesh", about = "AgentMesh governance and routing plane")]
struct Cli {
    /// Path to a TOML config file, merged above built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured message bus URL.
    #[arg(long)]
    bus_url: Option<String>,
    /// Overrides the configured SQLite store path.
    #[arg(long)]
    store_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = mesh_config::load(ConfigOverrides {
        config_path: cli.config,
        bus_url: cli.bus_url,
        store_path: cli.store_path,
    })
    .context("failed to load configuration")?;

    mesh_telemetry::init(&config.telemetry.log_level, config.telemetry.json)
        .context("failed to initialize telemetry")?;

    info!("starting AgentMesh");

    let store = Arc::new(Store::open(&config.store.path).await.context("failed to open store")?);

    let bus: Arc<dyn MessageBus> = Arc::new(NatsMessageBus::new(config.bus.url.clone()));
    bus.connect().await.context("failed to connect to message bus")?;
    info!(url = %config.bus.url, "connected to message bus");

    let policy: Arc<dyn PolicyDecisionClient> = match &config.policy.decision_service_url {
        Some(url) => {
            info!(url = %url, "using remote policy decision service");
            Arc::new(HttpPolicyClient::new(url.clone(), config.policy.request_timeout()))
        }
        None => {
            info!("no decision service configured, using local wildcard policy evaluator");
            Arc::new(LocalPolicyClient::new(Arc::clone(&store)))
        }
    };

    let relational_adapter = Arc::new(RelationalKbAdapter::new("relational"));
    let graph_adapter = Arc::new(GraphKbAdapter::new("graph"));

    let mut kb_adapters: HashMap<String, Arc<dyn KbAdapter>> = HashMap::new();
    kb_adapters.insert("relational".to_owned(), Arc::clone(&relational_adapter) as Arc<dyn KbAdapter>);
    kb_adapters.insert("graph".to_owned(), Arc::clone(&graph_adapter) as Arc<dyn KbAdapter>);

    relational_adapter.connect().await.context("failed to connect relational adapter")?;
    graph_adapter.connect().await.context("failed to connect graph adapter")?;
    Arc::clone(&relational_adapter).start_listening(Arc::clone(&bus)).await?;
    Arc::clone(&graph_adapter).start_listening(Arc::clone(&bus)).await?;

    let agent_service = Arc::new(AgentService::new(Arc::clone(&store), Arc::clone(&bus)));
    let kb_service = Arc::new(KbService::new(Arc::clone(&store), Arc::clone(&bus)));

    let directory_cache = DirectoryCache::new(Arc::clone(&store));
    Arc::clone(&directory_cache).start(Arc::clone(&bus)).await.context("failed to start directory cache")?;

    let health_monitor = Arc::new(HealthMonitor::new(Arc::clone(&store), &config.health));
    health_monitor.start().await;

    let enforcement = Arc::new(EnforcementPipeline::new(Arc::clone(&store), Arc::clone(&policy), kb_adapters));
    let router = RequestRouter::new(Arc::clone(&enforcement), Arc::clone(&store), Arc::clone(&bus));
    router.start().await.context("failed to start request router")?;

    subscribe_registration_endpoints(&bus, agent_service, kb_service).await?;
    subscribe_routing_endpoints(&bus, Arc::clone(&router)).await?;
    subscribe_audit_endpoint(&bus, Arc::clone(&store)).await?;
    subscribe_health_endpoint(&bus, Arc::clone(&store), Arc::clone(&policy)).await?;

    info!("AgentMesh is ready");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown requested, draining");

    health_monitor.stop().await;
    bus.disconnect().await.ok();

    info!("AgentMesh stopped");
    Ok(())
}

async fn subscribe_registration_endpoints(
    bus: &Arc<dyn MessageBus>,
    agent_service: Arc<AgentService>,
    kb_service: Arc<KbService>,
) -> Result<()> {
    bus.subscribe(
        "mesh.registry.agent.register",
        handler(move |payload| {
            let agent_service = Arc::clone(&agent_service);
            async move { Some(handle_agent_registration(&agent_service, payload).await) }
        }),
    )
    .await
    .context("failed to subscribe mesh.registry.agent.register")?;

    bus.subscribe(
        "mesh.registry.kb.register",
        handler(move |payload| {
            let kb_service = Arc::clone(&kb_service);
            async move { Some(handle_kb_registration(&kb_service, payload).await) }
        }),
    )
    .await
    .context("failed to subscribe mesh.registry.kb.register")?;

    Ok(())
}

async fn handle_agent_registration(agent_service: &AgentService, payload: Value) -> Value {
    let request: AgentRegistrationRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(err) => return json!({"status": "error", "error": format!("malformed request: {err}")}),
    };
    match agent_service.register_agent(request).await {
        Ok(response) => serde_json::to_value(response)
            .unwrap_or_else(|err| json!({"status": "error", "error": err.to_string()})),
        Err(err) => json!({"status": "error", "error": err.to_string()}),
    }
}

async fn handle_kb_registration(kb_service: &KbService, payload: Value) -> Value {
    let request: KbRegistrationRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(err) => return json!({"status": "error", "error": format!("malformed request: {err}")}),
    };
    match kb_service.register_kb(request).await {
        Ok(response) => serde_json::to_value(response)
            .unwrap_or_else(|err| json!({"status": "error", "error": err.to_string()})),
        Err(err) => json!({"status": "error", "error": err.to_string()}),
    }
}

async fn subscribe_routing_endpoints(bus: &Arc<dyn MessageBus>, router: Arc<RequestRouter>) -> Result<()> {
    let kb_router = Arc::clone(&router);
    bus.subscribe(
        "mesh.routing.kb_query",
        handler(move |payload| {
            let router = Arc::clone(&kb_router);
            async move {
                let request: KbQueryRequest = match serde_json::from_value(payload) {
                    Ok(request) => request,
                    Err(err) => {
                        return Some(json!({"status": "error", "error": format!("malformed request: {err}")}))
                    }
                };
                Some(serde_json::to_value(router.route_kb_query(request).await).unwrap_or_default())
            }
        }),
    )
    .await
    .context("failed to subscribe mesh.routing.kb_query")?;

    let invoke_router = Arc::clone(&router);
    bus.subscribe(
        "mesh.routing.agent_invoke",
        handler(move |payload| {
            let router = Arc::clone(&invoke_router);
            async move {
                let request: AgentInvokeRequest = match serde_json::from_value(payload) {
                    Ok(request) => request,
                    Err(err) => {
                        return Some(json!({"status": "failed", "error": format!("malformed request: {err}")}))
                    }
                };
                Some(serde_json::to_value(router.route_agent_invoke(request).await).unwrap_or_default())
            }
        }),
    )
    .await
    .context("failed to subscribe mesh.routing.agent_invoke")?;

    Ok(())
}

async fn subscribe_audit_endpoint(bus: &Arc<dyn MessageBus>, store: Arc<Store>) -> Result<()> {
    bus.subscribe(
        "mesh.audit.query",
        handler(move |payload| {
            let store = Arc::clone(&store);
            async move {
                let query: AuditQuery = match serde_json::from_value(payload) {
                    Ok(query) => query,
                    Err(err) => return Some(json!({"status": "error", "error": err.to_string()})),
                };
                match store.query_audit_logs(&query).await {
                    Ok(records) => Some(json!({"status": "success", "records": records})),
                    Err(err) => Some(json!({"status": "error", "error": err.to_string()})),
                }
            }
        }),
    )
    .await
    .context("failed to subscribe mesh.audit.query")?;
    Ok(())
}

async fn subscribe_health_endpoint(
    bus: &Arc<dyn MessageBus>,
    store: Arc<Store>,
    policy: Arc<dyn PolicyDecisionClient>,
) -> Result<()> {
    bus.subscribe(
        "mesh.health",
        handler(move |_payload| {
            let store = Arc::clone(&store);
            let policy = Arc::clone(&policy);
            async move {
                let store_ok = store.health_check().await.is_ok();
                let policy_ok = policy.health().await;
                Some(json!({
                    "status": if store_ok && policy_ok { "healthy" } else { "degraded" },
                    "store": store_ok,
                    "policy": policy_ok,
                }))
            }
        }),
    )
    .await
    .context("failed to subscribe mesh.health")?;
    Ok(())
}
