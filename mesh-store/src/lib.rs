#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Embedded SQLite persistence for the AgentMesh control plane.
//!
//! Mirrors the teacher's `sqlx`-backed storage idiom (see
//! `database.rs` in the caxton example) but the table layout, custom
//! `schema_migrations` bookkeeping, and query surface are grounded on
//! `original_source/adapters/persistence/sqlite/{adapter,migrations}.py`:
//! the original names its own migration table `schema_migrations` and
//! `spec.md` §6 calls that name out as part of the persisted layout, so
//! this store runs its own versioned migrations against that table
//! rather than delegating to `sqlx::migrate!`'s `_sqlx_migrations`.

mod error;
mod records;

pub use error::{Error, Result};
pub use records::{
    AgentQuery, AgentRecord, AgentRegistration, AuditEvent, AuditEventType, AuditOutcome,
    AuditQuery, AuditRecord, AuditStats, HealthStatus, KbQuery, KbRecord, KbRegistration,
    Operation, PolicyDecision, PolicyDefinition, PolicyEffect, PolicyRecord, PolicyRule,
};

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mesh_primitives::WildcardPattern;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, instrument};

type Migration = (i64, &'static str, &'static str);

const MIGRATIONS: &[Migration] = &[
    (
        1,
        "agent_registry",
        include_str!("../migrations/0001_agent_registry.sql"),
    ),
    (
        2,
        "kb_registry",
        include_str!("../migrations/0002_kb_registry.sql"),
    ),
    (
        3,
        "policy_store",
        include_str!("../migrations/0003_policy_store.sql"),
    ),
    (
        4,
        "audit_log",
        include_str!("../migrations/0004_audit_log.sql"),
    ),
];

/// Embedded SQLite-backed persistence store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `path`,
    /// enables WAL journaling and `NORMAL` synchronous mode, and
    /// applies any outstanding migrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the file or its parent
    /// directory cannot be created, or [`Error::Migration`] if a
    /// migration fails to apply.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| Error::Connection(err.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|err| Error::Connection(err.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Opens an in-memory store, primarily for tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] if a migration fails to apply.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|err| Error::Connection(err.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|err| Error::Connection(err.to_string()))?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    #[instrument(skip(self))]
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        for (version, name, sql) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await.map_err(|err| {
                    Error::Migration {
                        version: *version,
                        message: err.to_string(),
                    }
                })?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!(version, name, "applied migration");
        }

        Ok(())
    }

    /// Runs a trivial query to verify the connection is alive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] if the connection has failed.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Agent registry
    // ---------------------------------------------------------------

    /// Registers a new agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRecord`] if `identity` is already
    /// registered.
    #[instrument(skip(self, agent), fields(identity = %agent.identity))]
    pub async fn register_agent(&self, agent: AgentRegistration) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO agents (
                id, identity, version, capabilities, operations,
                schemas, health_endpoint, status, registered_at, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&id)
        .bind(&agent.identity)
        .bind(&agent.version)
        .bind(serde_json::to_string(&agent.capabilities)?)
        .bind(serde_json::to_string(&agent.operations)?)
        .bind(serde_json::to_string(&agent.schemas)?)
        .bind(&agent.health_endpoint)
        .bind(HealthStatus::Offline.as_str())
        .bind(now.to_rfc3339())
        .bind(serde_json::to_string(&agent.metadata)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                Error::DuplicateRecord(format!("agent identity `{}`", agent.identity)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches an agent by identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn get_agent(&self, identity: &str) -> Result<Option<AgentRecord>> {
        let row = sqlx::query("SELECT * FROM agents WHERE identity = ?1")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_agent).transpose()
    }

    /// Lists agents matching `query`'s filters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn list_agents(&self, query: &AgentQuery) -> Result<Vec<AgentRecord>> {
        let mut sql = String::from("SELECT * FROM agents WHERE 1=1");
        if query.identity.is_some() {
            sql.push_str(" AND identity = ?");
        }
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" LIMIT ?");

        let mut builder = sqlx::query(&sql);
        if let Some(identity) = &query.identity {
            builder = builder.bind(identity);
        }
        if let Some(status) = query.status {
            builder = builder.bind(status.as_str());
        }
        builder = builder.bind(query.limit);

        let rows = builder.fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = row_to_agent(row)?;
            if let Some(capability) = &query.capability {
                if !record.capabilities.contains(capability) {
                    continue;
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Updates `status` and bumps `last_heartbeat` to now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn update_agent_status(&self, identity: &str, status: HealthStatus) -> Result<()> {
        sqlx::query("UPDATE agents SET status = ?1, last_heartbeat = ?2 WHERE identity = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replaces an agent's declared capability set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure or [`Error::Serialization`]
    /// if the capability set cannot be encoded.
    pub async fn update_agent_capabilities(
        &self,
        identity: &str,
        capabilities: &std::collections::BTreeSet<String>,
    ) -> Result<()> {
        sqlx::query("UPDATE agents SET capabilities = ?1 WHERE identity = ?2")
            .bind(serde_json::to_string(capabilities)?)
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes an agent from the registry. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn deregister_agent(&self, identity: &str) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE identity = ?1")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // KB registry
    // ---------------------------------------------------------------

    /// Registers a new knowledge base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRecord`] if `kb_id` is already
    /// registered.
    #[instrument(skip(self, kb), fields(kb_id = %kb.kb_id))]
    pub async fn register_kb(&self, kb: KbRegistration) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO knowledge_bases (
                id, kb_id, kb_type, endpoint, operations,
                kb_schema, health_endpoint, status, registered_at, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&id)
        .bind(&kb.kb_id)
        .bind(&kb.kb_type)
        .bind(&kb.endpoint)
        .bind(serde_json::to_string(&kb.operations)?)
        .bind(serde_json::to_string(&kb.kb_schema)?)
        .bind(&kb.health_endpoint)
        .bind(HealthStatus::Offline.as_str())
        .bind(now.to_rfc3339())
        .bind(serde_json::to_string(&kb.metadata)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::DuplicateRecord(format!("kb_id `{}`", kb.kb_id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches a knowledge base by `kb_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn get_kb(&self, kb_id: &str) -> Result<Option<KbRecord>> {
        let row = sqlx::query("SELECT * FROM knowledge_bases WHERE kb_id = ?1")
            .bind(kb_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_kb).transpose()
    }

    /// Lists knowledge bases matching `query`'s filters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn list_kbs(&self, query: &KbQuery) -> Result<Vec<KbRecord>> {
        let mut sql = String::from("SELECT * FROM knowledge_bases WHERE 1=1");
        if query.kb_id.is_some() {
            sql.push_str(" AND kb_id = ?");
        }
        if query.kb_type.is_some() {
            sql.push_str(" AND kb_type = ?");
        }
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" LIMIT ?");

        let mut builder = sqlx::query(&sql);
        if let Some(kb_id) = &query.kb_id {
            builder = builder.bind(kb_id);
        }
        if let Some(kb_type) = &query.kb_type {
            builder = builder.bind(kb_type);
        }
        if let Some(status) = query.status {
            builder = builder.bind(status.as_str());
        }
        builder = builder.bind(query.limit);

        let rows = builder.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_kb).collect()
    }

    /// Updates `status` and bumps `last_health_check` to now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn update_kb_status(&self, kb_id: &str, status: HealthStatus) -> Result<()> {
        sqlx::query(
            "UPDATE knowledge_bases SET status = ?1, last_health_check = ?2 WHERE kb_id = ?3",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(kb_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replaces a KB's declared operation list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn update_kb_operations(&self, kb_id: &str, operations: &[String]) -> Result<()> {
        sqlx::query("UPDATE knowledge_bases SET operations = ?1 WHERE kb_id = ?2")
            .bind(serde_json::to_string(operations)?)
            .bind(kb_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a KB from the registry. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn deregister_kb(&self, kb_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM knowledge_bases WHERE kb_id = ?1")
            .bind(kb_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Policy store
    // ---------------------------------------------------------------

    /// Creates a new policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRecord`] if `policy_name` already
    /// exists.
    pub async fn create_policy(&self, policy: PolicyDefinition) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO policies (
                id, policy_name, rules, precedence, active, created_at, updated_at, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&id)
        .bind(&policy.policy_name)
        .bind(serde_json::to_string(&policy.rules)?)
        .bind(policy.precedence)
        .bind(i64::from(policy.active))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(serde_json::to_string(&policy.metadata)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                Error::DuplicateRecord(format!("policy_name `{}`", policy.policy_name)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches a policy by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn get_policy(&self, policy_name: &str) -> Result<Option<PolicyRecord>> {
        let row = sqlx::query("SELECT * FROM policies WHERE policy_name = ?1")
            .bind(policy_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_policy).transpose()
    }

    /// Lists policies, optionally restricted to active ones, ordered
    /// by ascending precedence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn list_policies(&self, active_only: bool) -> Result<Vec<PolicyRecord>> {
        let sql = if active_only {
            "SELECT * FROM policies WHERE active = 1 ORDER BY precedence ASC"
        } else {
            "SELECT * FROM policies ORDER BY precedence ASC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_policy).collect()
    }

    /// Replaces an existing policy's rules, precedence, state, and
    /// metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn update_policy(&self, policy_name: &str, policy: PolicyDefinition) -> Result<()> {
        sqlx::query(
            "UPDATE policies
             SET rules = ?1, precedence = ?2, active = ?3, updated_at = ?4, metadata = ?5
             WHERE policy_name = ?6",
        )
        .bind(serde_json::to_string(&policy.rules)?)
        .bind(policy.precedence)
        .bind(i64::from(policy.active))
        .bind(Utc::now().to_rfc3339())
        .bind(serde_json::to_string(&policy.metadata)?)
        .bind(policy_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes a policy by name. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn delete_policy(&self, policy_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM policies WHERE policy_name = ?1")
            .bind(policy_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Evaluates active policies in ascending precedence order and
    /// returns the first matching rule's decision, or a default-deny
    /// decision if none match.
    ///
    /// This is the fallback evaluator used when no remote policy
    /// decision service is configured (`spec.md` §9, Open Question:
    /// policy authority).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure or [`Error::Serialization`]
    /// if a stored pattern is malformed.
    pub async fn evaluate_policy(
        &self,
        principal: &str,
        resource: &str,
        action: &str,
    ) -> Result<PolicyDecision> {
        let policies = self.list_policies(true).await?;

        for policy in policies {
            for rule in &policy.rules {
                let principal_pattern = WildcardPattern::compile(&rule.principal)?;
                let resource_pattern = WildcardPattern::compile(&rule.resource)?;
                let action_pattern = WildcardPattern::compile(&rule.action)?;

                if principal_pattern.matches(principal)
                    && resource_pattern.matches(resource)
                    && action_pattern.matches(action)
                {
                    return Ok(PolicyDecision {
                        effect: rule.effect,
                        masking_rules: rule.masking_rules.clone(),
                        matched_policy: Some(policy.policy_name),
                    });
                }
            }
        }

        Ok(PolicyDecision::default_deny())
    }

    // ---------------------------------------------------------------
    // Audit log
    // ---------------------------------------------------------------

    /// Appends an audit event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn log_event(&self, event: AuditEvent) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO audit_logs (
                id, event_type, source_id, target_id, outcome, timestamp,
                request_metadata, policy_decision, masked_fields,
                full_request, full_response, provenance_chain
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&id)
        .bind(serde_json::to_string(&event.event_type)?.trim_matches('"'))
        .bind(&event.source_id)
        .bind(&event.target_id)
        .bind(serde_json::to_string(&event.outcome)?.trim_matches('"'))
        .bind(event.timestamp.to_rfc3339())
        .bind(optional_json(&event.request_metadata)?)
        .bind(optional_json(&event.policy_decision)?)
        .bind(optional_json(&event.masked_fields)?)
        .bind(optional_json(&event.full_request)?)
        .bind(optional_json(&event.full_response)?)
        .bind(optional_json(&event.provenance_chain)?)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Queries audit logs matching `query`'s filters, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn query_audit_logs(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let mut sql = String::from("SELECT * FROM audit_logs WHERE 1=1");
        if query.event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if query.source_id.is_some() {
            sql.push_str(" AND source_id = ?");
        }
        if query.target_id.is_some() {
            sql.push_str(" AND target_id = ?");
        }
        if query.outcome.is_some() {
            sql.push_str(" AND outcome = ?");
        }
        if query.start_time.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if query.end_time.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut builder = sqlx::query(&sql);
        if let Some(event_type) = query.event_type {
            builder = builder.bind(serde_json::to_string(&event_type)?.trim_matches('"').to_owned());
        }
        if let Some(source_id) = &query.source_id {
            builder = builder.bind(source_id);
        }
        if let Some(target_id) = &query.target_id {
            builder = builder.bind(target_id);
        }
        if let Some(outcome) = query.outcome {
            builder = builder.bind(serde_json::to_string(&outcome)?.trim_matches('"').to_owned());
        }
        if let Some(start_time) = query.start_time {
            builder = builder.bind(start_time.to_rfc3339());
        }
        if let Some(end_time) = query.end_time {
            builder = builder.bind(end_time.to_rfc3339());
        }
        builder = builder.bind(query.limit);

        let rows = builder.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_audit).collect()
    }

    /// Returns row counts grouped by outcome and by event type,
    /// optionally restricted to a single `source_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on SQL failure.
    pub async fn get_audit_stats(&self, source_id: Option<&str>) -> Result<AuditStats> {
        let outcome_rows = if let Some(source_id) = source_id {
            sqlx::query("SELECT outcome, COUNT(*) as count FROM audit_logs WHERE source_id = ?1 GROUP BY outcome")
                .bind(source_id)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT outcome, COUNT(*) as count FROM audit_logs GROUP BY outcome")
                .fetch_all(&self.pool)
                .await?
        };

        let event_type_rows = if let Some(source_id) = source_id {
            sqlx::query("SELECT event_type, COUNT(*) as count FROM audit_logs WHERE source_id = ?1 GROUP BY event_type")
                .bind(source_id)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT event_type, COUNT(*) as count FROM audit_logs GROUP BY event_type")
                .fetch_all(&self.pool)
                .await?
        };

        let mut stats = AuditStats::default();
        for row in outcome_rows {
            let outcome: String = row.try_get("outcome")?;
            let count: i64 = row.try_get("count")?;
            stats.outcome_counts.insert(outcome, count);
        }
        for row in event_type_rows {
            let event_type: String = row.try_get("event_type")?;
            let count: i64 = row.try_get("count")?;
            stats.event_type_counts.insert(event_type, count);
        }
        Ok(stats)
    }
}

fn optional_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidTimestamp(raw.to_owned()))
}

fn row_to_agent(row: sqlx::sqlite::SqliteRow) -> Result<AgentRecord> {
    let status_str: String = row.try_get("status")?;
    let registered_at: String = row.try_get("registered_at")?;
    let last_heartbeat: Option<String> = row.try_get("last_heartbeat")?;

    Ok(AgentRecord {
        id: row.try_get("id")?,
        identity: row.try_get("identity")?,
        version: row.try_get("version")?,
        capabilities: serde_json::from_str(&row.try_get::<String, _>("capabilities")?)?,
        operations: serde_json::from_str(&row.try_get::<String, _>("operations")?)?,
        schemas: serde_json::from_str::<Value>(&row.try_get::<String, _>("schemas")?)?,
        health_endpoint: row.try_get("health_endpoint")?,
        status: HealthStatus::from_str(&status_str)?,
        registered_at: parse_timestamp(&registered_at)?,
        last_heartbeat: last_heartbeat.map(|ts| parse_timestamp(&ts)).transpose()?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
    })
}

fn row_to_kb(row: sqlx::sqlite::SqliteRow) -> Result<KbRecord> {
    let status_str: String = row.try_get("status")?;
    let registered_at: String = row.try_get("registered_at")?;
    let last_health_check: Option<String> = row.try_get("last_health_check")?;

    Ok(KbRecord {
        id: row.try_get("id")?,
        kb_id: row.try_get("kb_id")?,
        kb_type: row.try_get("kb_type")?,
        endpoint: row.try_get("endpoint")?,
        operations: serde_json::from_str(&row.try_get::<String, _>("operations")?)?,
        kb_schema: serde_json::from_str(&row.try_get::<String, _>("kb_schema")?)?,
        health_endpoint: row.try_get("health_endpoint")?,
        status: HealthStatus::from_str(&status_str)?,
        registered_at: parse_timestamp(&registered_at)?,
        last_health_check: last_health_check
            .map(|ts| parse_timestamp(&ts))
            .transpose()?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
    })
}

fn row_to_policy(row: sqlx::sqlite::SqliteRow) -> Result<PolicyRecord> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let active: i64 = row.try_get("active")?;

    Ok(PolicyRecord {
        id: row.try_get("id")?,
        policy_name: row.try_get("policy_name")?,
        rules: serde_json::from_str(&row.try_get::<String, _>("rules")?)?,
        precedence: row.try_get("precedence")?,
        active: active != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
    })
}

fn row_to_audit(row: sqlx::sqlite::SqliteRow) -> Result<AuditRecord> {
    let event_type_str: String = row.try_get("event_type")?;
    let outcome_str: String = row.try_get("outcome")?;
    let timestamp: String = row.try_get("timestamp")?;

    Ok(AuditRecord {
        id: row.try_get("id")?,
        event_type: serde_json::from_value(Value::String(event_type_str))?,
        source_id: row.try_get("source_id")?,
        target_id: row.try_get("target_id")?,
        outcome: serde_json::from_value(Value::String(outcome_str))?,
        timestamp: parse_timestamp(&timestamp)?,
        request_metadata: optional_value(row.try_get("request_metadata")?)?,
        policy_decision: optional_value(row.try_get("policy_decision")?)?,
        masked_fields: row
            .try_get::<Option<String>, _>("masked_fields")?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        full_request: optional_value(row.try_get("full_request")?)?,
        full_response: optional_value(row.try_get("full_response")?)?,
        provenance_chain: optional_value(row.try_get("provenance_chain")?)?,
    })
}

fn optional_value(raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|raw| serde_json::from_str(&raw)).transpose().map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_agent(identity: &str) -> AgentRegistration {
        AgentRegistration {
            identity: identity.to_owned(),
            version: "1.0.0".to_owned(),
            capabilities: BTreeSet::from(["summarize".to_owned()]),
            operations: vec![Operation::Invoke],
            schemas: Value::Null,
            health_endpoint: "https://agent.example.com/health".to_owned(),
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    #[tokio::test]
    async fn registers_and_fetches_agent() {
        let store = Store::open_in_memory().await.unwrap();
        store.register_agent(sample_agent("sales-1")).await.unwrap();

        let fetched = store.get_agent("sales-1").await.unwrap().unwrap();
        assert_eq!(fetched.identity, "sales-1");
        assert_eq!(fetched.status, HealthStatus::Offline);
    }

    #[tokio::test]
    async fn duplicate_identity_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store.register_agent(sample_agent("sales-1")).await.unwrap();

        let err = store
            .register_agent(sample_agent("sales-1"))
            .await
            .expect_err("duplicate identity must be rejected");
        assert!(matches!(err, Error::DuplicateRecord(_)));
    }

    #[tokio::test]
    async fn capability_filter_matches_membership() {
        let store = Store::open_in_memory().await.unwrap();
        store.register_agent(sample_agent("sales-1")).await.unwrap();

        let matches = store
            .list_agents(&AgentQuery {
                capability: Some("summarize".to_owned()),
                ..AgentQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);

        let no_matches = store
            .list_agents(&AgentQuery {
                capability: Some("translate".to_owned()),
                ..AgentQuery::default()
            })
            .await
            .unwrap();
        assert!(no_matches.is_empty());
    }

    #[tokio::test]
    async fn evaluate_policy_default_denies_without_match() {
        let store = Store::open_in_memory().await.unwrap();
        let decision = store
            .evaluate_policy("agent-a", "kb-1", "query")
            .await
            .unwrap();
        assert_eq!(decision.effect, PolicyEffect::Deny);
        assert!(decision.matched_policy.is_none());
    }

    #[tokio::test]
    async fn evaluate_policy_first_match_wins_by_precedence() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_policy(PolicyDefinition {
                policy_name: "low-priority-allow".to_owned(),
                rules: vec![PolicyRule {
                    principal: "*".to_owned(),
                    resource: "*".to_owned(),
                    action: "*".to_owned(),
                    effect: PolicyEffect::Allow,
                    masking_rules: vec![],
                }],
                precedence: 10,
                active: true,
                metadata: Value::Object(serde_json::Map::new()),
            })
            .await
            .unwrap();
        store
            .create_policy(PolicyDefinition {
                policy_name: "high-priority-deny".to_owned(),
                rules: vec![PolicyRule {
                    principal: "sales-*".to_owned(),
                    resource: "sensitive-kb".to_owned(),
                    action: "*".to_owned(),
                    effect: PolicyEffect::Deny,
                    masking_rules: vec!["ssn".to_owned()],
                }],
                precedence: 1,
                active: true,
                metadata: Value::Object(serde_json::Map::new()),
            })
            .await
            .unwrap();

        let decision = store
            .evaluate_policy("sales-1", "sensitive-kb", "query")
            .await
            .unwrap();
        assert_eq!(decision.effect, PolicyEffect::Deny);
        assert_eq!(decision.matched_policy.as_deref(), Some("high-priority-deny"));
    }

    #[tokio::test]
    async fn audit_log_round_trips_and_stats_aggregate() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .log_event(AuditEvent {
                event_type: AuditEventType::Query,
                source_id: "sales-1".to_owned(),
                target_id: Some("sensitive-kb".to_owned()),
                outcome: AuditOutcome::Denied,
                timestamp: Utc::now(),
                request_metadata: None,
                policy_decision: None,
                masked_fields: None,
                full_request: None,
                full_response: None,
                provenance_chain: None,
            })
            .await
            .unwrap();

        let rows = store.query_audit_logs(&AuditQuery::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, AuditOutcome::Denied);

        let stats = store.get_audit_stats(None).await.unwrap();
        assert_eq!(stats.outcome_counts.get("denied"), Some(&1));
    }

    #[tokio::test]
    async fn migrations_are_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.sqlite3");

        let store = Store::open(&path).await.unwrap();
        store.register_agent(sample_agent("sales-1")).await.unwrap();
        drop(store);

        let reopened = Store::open(&path).await.unwrap();
        let agent = reopened.get_agent("sales-1").await.unwrap();
        assert!(agent.is_some());
    }
}
