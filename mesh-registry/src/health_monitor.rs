//! Background health sweeps over registered agents and KBs.
//!
//! Grounded on `original_source/services/registry/health_service.py`'s
//! `HealthService` (`_monitoring_loop`, `get_health_summary`) for the
//! sweep semantics, and on `agent-kernel/src/registry.rs`'s
//! `RegistrationController`/`run_registration_loop` for the cancellable
//! background-loop shape (`Arc<AtomicBool>` shutdown flag,
//! `tokio::time::interval` with `MissedTickBehavior::Delay`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mesh_adapters::{AdapterHealth, GraphKbAdapter, KbAdapter, RelationalKbAdapter};
use mesh_config::HealthSection;
use mesh_primitives::{SchedulerConfig, TaskScheduler};
use mesh_store::{HealthStatus, Store};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::http_probe::{HttpProbe, ProbeOutcome};

const RECENT_HEARTBEAT: chrono::Duration = chrono::Duration::minutes(1);
const STALE_HEARTBEAT: chrono::Duration = chrono::Duration::minutes(5);

/// Aggregate health counts across every registered agent and KB.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct HealthSummary {
    /// Agents considered active (status active, heartbeat under 1 minute old).
    pub agent_active: usize,
    /// Agents considered degraded (active but stale, or reporting degraded).
    pub agent_degraded: usize,
    /// Agents considered offline.
    pub agent_offline: usize,
    /// KBs reporting active.
    pub kb_active: usize,
    /// KBs reporting degraded.
    pub kb_degraded: usize,
    /// KBs reporting offline.
    pub kb_offline: usize,
}

/// Background monitor that periodically probes every registered agent
/// and KB and updates their stored status.
pub struct HealthMonitor {
    store: Arc<Store>,
    probe: HttpProbe,
    scheduler: TaskScheduler,
    interval: Duration,
    probe_timeout: Duration,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Creates a monitor configured from `section`.
    #[must_use]
    pub fn new(store: Arc<Store>, section: &HealthSection) -> Self {
        Self {
            store,
            probe: HttpProbe::new(),
            scheduler: TaskScheduler::new(SchedulerConfig::default()),
            interval: section.interval(),
            probe_timeout: section.probe_timeout(),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Starts the background sweep loop if not already running.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            warn!("health monitoring is already running");
            return;
        }

        self.shutdown.store(false, Ordering::Release);
        let monitor = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            monitor.run_loop().await;
        }));
    }

    /// Signals the sweep loop to stop and waits for the current tick to
    /// drain before returning.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.shutdown.load(Ordering::Acquire) {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if let Err(err) = self.sweep_once().await {
                error!(?err, "error during health monitoring sweep");
            }
        }
    }

    async fn sweep_once(&self) -> Result<()> {
        debug!("running periodic health checks");

        let agents = self
            .store
            .list_agents(&mesh_store::AgentQuery {
                identity: None,
                status: None,
                capability: None,
                limit: 1000,
            })
            .await?;
        for agent in &agents {
            let identity = agent.identity.clone();
            let endpoint = agent.health_endpoint.clone();
            let store = Arc::clone(&self.store);
            let probe = self.probe.clone();
            let timeout = self.probe_timeout;
            let _ = self
                .scheduler
                .spawn(async move {
                    let status = probe_agent(&probe, &endpoint, timeout).await;
                    if let Err(err) = store.update_agent_status(&identity, status).await {
                        warn!(identity, ?err, "failed to persist agent health status");
                    }
                })
                .await;
        }

        let kbs = self
            .store
            .list_kbs(&mesh_store::KbQuery {
                kb_id: None,
                kb_type: None,
                status: None,
                limit: 1000,
            })
            .await?;
        for kb in &kbs {
            let kb_id = kb.kb_id.clone();
            let kb_type = kb.kb_type.clone();
            let store = Arc::clone(&self.store);
            let _ = self
                .scheduler
                .spawn(async move {
                    let status = probe_kb(&kb_type, &kb_id).await;
                    if let Err(err) = store.update_kb_status(&kb_id, status).await {
                        warn!(kb_id, ?err, "failed to persist KB health status");
                    }
                })
                .await;
        }

        debug!(agents = agents.len(), kbs = kbs.len(), "completed periodic health checks");
        Ok(())
    }

    /// Manually probes a single agent and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::NotFound`] if the agent does not
    /// exist, or propagates store failures.
    pub async fn check_agent_health(&self, identity: &str) -> Result<HealthStatus> {
        let agent = self
            .store
            .get_agent(identity)
            .await?
            .ok_or_else(|| crate::error::Error::NotFound {
                entity_type: "Agent",
                entity_id: identity.to_owned(),
            })?;
        let status = probe_agent(&self.probe, &agent.health_endpoint, self.probe_timeout).await;
        self.store.update_agent_status(identity, status).await?;
        Ok(status)
    }

    /// Manually probes a single KB and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::NotFound`] if the KB does not
    /// exist, or propagates store failures.
    pub async fn check_kb_health(&self, kb_id: &str) -> Result<HealthStatus> {
        let kb = self
            .store
            .get_kb(kb_id)
            .await?
            .ok_or_else(|| crate::error::Error::NotFound {
                entity_type: "KB",
                entity_id: kb_id.to_owned(),
            })?;
        let status = probe_kb(&kb.kb_type, kb_id).await;
        self.store.update_kb_status(kb_id, status).await?;
        Ok(status)
    }

    /// Summarizes current health across every registered agent and KB,
    /// further degrading agents whose last heartbeat has gone stale.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_health_summary(&self) -> Result<HealthSummary> {
        let mut summary = HealthSummary::default();
        let now = Utc::now();

        let agents = self
            .store
            .list_agents(&mesh_store::AgentQuery {
                identity: None,
                status: None,
                capability: None,
                limit: 1000,
            })
            .await?;
        for agent in agents {
            match agent.status {
                HealthStatus::Active => match agent.last_heartbeat {
                    Some(last) if now - last < RECENT_HEARTBEAT => summary.agent_active += 1,
                    Some(last) if now - last < STALE_HEARTBEAT => summary.agent_degraded += 1,
                    _ => summary.agent_offline += 1,
                },
                HealthStatus::Degraded => summary.agent_degraded += 1,
                HealthStatus::Offline => summary.agent_offline += 1,
            }
        }

        let kbs = self
            .store
            .list_kbs(&mesh_store::KbQuery {
                kb_id: None,
                kb_type: None,
                status: None,
                limit: 1000,
            })
            .await?;
        for kb in kbs {
            match kb.status {
                HealthStatus::Active => summary.kb_active += 1,
                HealthStatus::Degraded => summary.kb_degraded += 1,
                HealthStatus::Offline => summary.kb_offline += 1,
            }
        }

        Ok(summary)
    }
}

/// Three-way agent probe: 200 -> active, other status -> degraded,
/// timeout/transport error -> offline. Distinct from the two-way check
/// performed at registration time.
async fn probe_agent(probe: &HttpProbe, endpoint: &str, timeout: Duration) -> HealthStatus {
    match probe.get(endpoint, timeout).await {
        ProbeOutcome::Responded { status: 200, .. } => HealthStatus::Active,
        ProbeOutcome::Responded { status, .. } => {
            warn!(endpoint, status, "agent health sweep returned non-200");
            HealthStatus::Degraded
        }
        ProbeOutcome::Timeout => {
            warn!(endpoint, "agent health sweep timed out");
            HealthStatus::Offline
        }
        ProbeOutcome::Error(err) => {
            warn!(endpoint, error = %err, "agent health sweep failed");
            HealthStatus::Offline
        }
    }
}

/// Type-specific trivial connectivity query. The reference adapters
/// this mesh ships are in-memory, so "connect + health" stands in for
/// the real driver round trip a production adapter would make.
async fn probe_kb(kb_type: &str, kb_id: &str) -> HealthStatus {
    let adapter: Arc<dyn KbAdapter> = match kb_type {
        "relational" => Arc::new(RelationalKbAdapter::new(kb_id)),
        "graph" => Arc::new(GraphKbAdapter::new(kb_id)),
        other => {
            warn!(kb_id, kb_type = other, "unsupported KB type during health sweep");
            return HealthStatus::Offline;
        }
    };

    if adapter.connect().await.is_err() {
        return HealthStatus::Offline;
    }
    match adapter.health().await.status {
        AdapterHealth::Healthy => HealthStatus::Active,
        AdapterHealth::Degraded => HealthStatus::Degraded,
        AdapterHealth::Unhealthy => HealthStatus::Offline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_store::{AgentRegistration, KbRegistration};
    use serde_json::json;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn check_agent_health_marks_unreachable_offline() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store
            .register_agent(AgentRegistration {
                identity: "agent-1".into(),
                version: "1.0.0".into(),
                capabilities: BTreeSet::from(["cap".to_owned()]),
                operations: vec![mesh_store::Operation::Query],
                schemas: json!({}),
                health_endpoint: "http://localhost:1/health".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();

        let monitor = HealthMonitor::new(store, &HealthSection::default());
        let status = monitor.check_agent_health("agent-1").await.unwrap();
        assert_eq!(status, HealthStatus::Offline);
    }

    #[tokio::test]
    async fn check_kb_health_relational_is_active() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store
            .register_kb(KbRegistration {
                kb_id: "customer-db".into(),
                kb_type: "relational".into(),
                endpoint: "postgres://localhost/db".into(),
                operations: vec!["sql_query".into()],
                kb_schema: json!({}),
                health_endpoint: None,
                metadata: json!({}),
            })
            .await
            .unwrap();

        let monitor = HealthMonitor::new(store, &HealthSection::default());
        let status = monitor.check_kb_health("customer-db").await.unwrap();
        assert_eq!(status, HealthStatus::Active);
    }

    #[tokio::test]
    async fn get_health_summary_counts_by_status() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store
            .register_kb(KbRegistration {
                kb_id: "customer-db".into(),
                kb_type: "relational".into(),
                endpoint: "postgres://localhost/db".into(),
                operations: vec!["sql_query".into()],
                kb_schema: json!({}),
                health_endpoint: None,
                metadata: json!({}),
            })
            .await
            .unwrap();
        store.update_kb_status("customer-db", HealthStatus::Active).await.unwrap();

        let monitor = HealthMonitor::new(store, &HealthSection::default());
        let summary = monitor.get_health_summary().await.unwrap();
        assert_eq!(summary.kb_active, 1);
    }
}
