//! The agent runtime's SQLite-backed store: goals, tasks, relay pipelines,
//! and circuit breakers.
//!
//! Grounded on `SqliteJobStore` (Symbiont's `crates/runtime`) for the
//! connection/schema bootstrap shape, and on `aof-runtime`'s
//! `FleetCoordinator` for the `tracing`-based event logging style.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use substrate_core::{SubstrateError, SubstrateResult};

use crate::schema;
use crate::types::*;

/// The Agent Runtime's persistent store.
pub struct RuntimeStore {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl RuntimeStore {
    pub fn open(path: &Path) -> SubstrateResult<Self> {
        let conn = substrate_core::db::open_connection(path)?;
        schema::init(&conn)?;
        info!(path = %path.display(), "runtime store opened");
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> SubstrateResult<Self> {
        let conn = substrate_core::db::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Default database path: `$HOME/.claude/agent_runtime_oss/runtime.db`.
    pub fn default_path() -> PathBuf {
        substrate_core::db::home_relative(&[".claude", "agent_runtime_oss", "runtime.db"])
    }

    // ---- Goals -------------------------------------------------------

    pub async fn create_goal(
        &self,
        name: &str,
        description: Option<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> SubstrateResult<Goal> {
        let now = Utc::now();
        let metadata_json = metadata.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO goals (name, description, status, metadata, created_at, updated_at)
             VALUES (?1, ?2, 'active', ?3, ?4, ?4)",
            params![name, description, metadata_json, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        info!(goal_id = id, name, "goal created");
        Ok(Goal {
            id,
            name: name.to_string(),
            description,
            status: GoalStatus::Active,
            metadata,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
        })
    }

    pub async fn get_goal(&self, id: i64) -> SubstrateResult<Goal> {
        let conn = self.conn.lock().await;
        let (name, description, status, metadata_json, created_at, updated_at): (
            String,
            Option<String>,
            String,
            Option<String>,
            String,
            String,
        ) = conn
            .query_row(
                "SELECT name, description, status, metadata, created_at, updated_at FROM goals WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| SubstrateError::not_found(format!("goal {id} not found")))?;

        let tasks = Self::fetch_tasks(&conn, Some(id), None)?;
        Ok(Goal {
            id,
            name,
            description,
            status: GoalStatus::parse(&status),
            metadata: metadata_json
                .map(|j| serde_json::from_str(&j))
                .transpose()?,
            created_at: parse_rfc3339(&created_at)?,
            updated_at: parse_rfc3339(&updated_at)?,
            tasks,
        })
    }

    pub async fn list_goals(&self, status: Option<GoalStatus>) -> SubstrateResult<Vec<GoalSummary>> {
        let conn = self.conn.lock().await;
        let ids: Vec<i64> = match status {
            Some(s) => {
                let mut stmt = conn.prepare("SELECT id FROM goals WHERE status = ?1 ORDER BY created_at")?;
                stmt.query_map(params![s.as_str()], |r| r.get(0))?
                    .collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare("SELECT id FROM goals ORDER BY created_at")?;
                stmt.query_map(params![], |r| r.get(0))?.collect::<Result<_, _>>()?
            }
        };

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let (name, description, status_str, created_at, updated_at): (
                String,
                Option<String>,
                String,
                String,
                String,
            ) = conn.query_row(
                "SELECT name, description, status, created_at, updated_at FROM goals WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )?;
            let tasks = Self::fetch_tasks(&conn, Some(id), None)?;
            let mut histogram = TaskStatusHistogram::default();
            for t in &tasks {
                match t.status {
                    TaskStatus::Pending => histogram.pending += 1,
                    TaskStatus::InProgress => histogram.in_progress += 1,
                    TaskStatus::Completed => histogram.completed += 1,
                    TaskStatus::Failed => histogram.failed += 1,
                    TaskStatus::Cancelled => histogram.cancelled += 1,
                }
            }
            summaries.push(GoalSummary {
                id,
                name,
                description,
                status: GoalStatus::parse(&status_str),
                created_at: parse_rfc3339(&created_at)?,
                updated_at: parse_rfc3339(&updated_at)?,
                task_histogram: histogram,
            });
        }
        Ok(summaries)
    }

    // ---- Tasks -------------------------------------------------------

    pub async fn create_task(
        &self,
        title: &str,
        description: Option<String>,
        goal_id: Option<i64>,
        priority: i32,
        dependencies: Vec<i64>,
    ) -> SubstrateResult<Task> {
        if !(1..=10).contains(&priority) {
            return Err(SubstrateError::invalid_argument("priority must be in 1..=10"));
        }
        let now = Utc::now();
        let deps_json = serde_json::to_string(&dependencies)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (goal_id, title, description, status, priority, dependencies, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
            params![goal_id, title, description, priority, deps_json, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Task {
            id,
            goal_id,
            title: title.to_string(),
            description,
            status: TaskStatus::Pending,
            priority,
            result: None,
            error: None,
            dependencies,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    pub async fn list_tasks(
        &self,
        goal_id: Option<i64>,
        status: Option<TaskStatus>,
    ) -> SubstrateResult<Vec<Task>> {
        let conn = self.conn.lock().await;
        Self::fetch_tasks(&conn, goal_id, status)
    }

    fn fetch_tasks(
        conn: &rusqlite::Connection,
        goal_id: Option<i64>,
        status: Option<TaskStatus>,
    ) -> SubstrateResult<Vec<Task>> {
        let mut sql = String::from(
            "SELECT id, goal_id, title, description, status, priority, result, error, dependencies,
                    created_at, started_at, completed_at
             FROM tasks WHERE 1=1",
        );
        if goal_id.is_some() {
            sql.push_str(" AND goal_id = ?1");
        }
        if status.is_some() {
            sql.push_str(if goal_id.is_some() { " AND status = ?2" } else { " AND status = ?1" });
        }
        sql.push_str(" ORDER BY priority DESC, created_at ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<TaskRow> = match (goal_id, status) {
            (Some(g), Some(s)) => stmt
                .query_map(params![g, s.as_str()], TaskRow::from_row)?
                .collect::<Result<_, _>>()?,
            (Some(g), None) => stmt
                .query_map(params![g], TaskRow::from_row)?
                .collect::<Result<_, _>>()?,
            (None, Some(s)) => stmt
                .query_map(params![s.as_str()], TaskRow::from_row)?
                .collect::<Result<_, _>>()?,
            (None, None) => stmt.query_map(params![], TaskRow::from_row)?.collect::<Result<_, _>>()?,
        };
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Creates the fixed task template for a strategy, per §4.2's table.
    pub async fn decompose_goal(
        &self,
        goal_id: i64,
        strategy: DecomposeStrategy,
    ) -> SubstrateResult<DecomposeOutcome> {
        let start = Instant::now();
        let templates: Vec<(&str, i32)> = match strategy {
            DecomposeStrategy::Sequential => vec![
                ("Analyze", 10),
                ("Design", 9),
                ("Implement", 8),
                ("Test", 7),
                ("Document", 6),
            ],
            DecomposeStrategy::Parallel => vec![("Research", 10), ("Prototype", 9), ("Review", 8)],
            DecomposeStrategy::Hierarchical => vec![
                ("Plan", 10),
                ("Execute Phase 1", 9),
                ("Execute Phase 2", 8),
                ("Integrate", 7),
                ("Validate", 6),
            ],
        };

        let mut task_ids = Vec::with_capacity(templates.len());
        let mut previous_id: Option<i64> = None;
        for (title, priority) in templates {
            let dependencies = match strategy {
                DecomposeStrategy::Sequential => previous_id.into_iter().collect(),
                _ => Vec::new(),
            };
            let task = self
                .create_task(title, None, Some(goal_id), priority, dependencies)
                .await?;
            task_ids.push(task.id);
            previous_id = Some(task.id);
        }

        Ok(DecomposeOutcome {
            task_ids,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Dequeues the highest-priority eligible task and atomically marks it
    /// `in_progress`. Returns `None` if nothing qualifies.
    pub async fn get_next_task(&self) -> SubstrateResult<Option<Task>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let candidate_ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM tasks WHERE status = 'pending' ORDER BY priority DESC, created_at ASC",
            )?;
            stmt.query_map(params![], |r| r.get(0))?.collect::<Result<_, _>>()?
        };

        for id in candidate_ids {
            let deps_json: String =
                tx.query_row("SELECT dependencies FROM tasks WHERE id = ?1", params![id], |r| r.get(0))?;
            let dependencies: Vec<i64> = serde_json::from_str(&deps_json)?;
            let all_done = dependencies.iter().all(|dep_id| {
                tx.query_row(
                    "SELECT status FROM tasks WHERE id = ?1",
                    params![dep_id],
                    |r| r.get::<_, String>(0),
                )
                .map(|s| s == "completed")
                .unwrap_or(false)
            });
            if !all_done {
                continue;
            }

            let now = Utc::now();
            tx.execute(
                "UPDATE tasks SET status = 'in_progress', started_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), id],
            )?;
            let row = TaskRow::fetch(&tx, id)?;
            tx.commit()?;
            info!(task_id = id, "task dequeued");
            return Ok(Some(row.into_task()?));
        }
        tx.commit()?;
        Ok(None)
    }

    pub async fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> SubstrateResult<Task> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let result_json = result.as_ref().map(serde_json::to_string).transpose()?;
        let completed_at = matches!(status, TaskStatus::Completed).then(|| now.to_rfc3339());

        let rows = conn.execute(
            "UPDATE tasks SET status = ?1, result = ?2, error = ?3, completed_at = COALESCE(?4, completed_at)
             WHERE id = ?5",
            params![status.as_str(), result_json, error, completed_at, task_id],
        )?;
        if rows == 0 {
            return Err(SubstrateError::not_found(format!("task {task_id} not found")));
        }
        TaskRow::fetch(&conn, task_id)?.into_task()
    }

    // ---- Relay pipelines -------------------------------------------------

    pub async fn create_relay_pipeline(
        &self,
        name: &str,
        goal: &str,
        agent_types: Vec<String>,
        token_budget: i64,
    ) -> SubstrateResult<RelayPipeline> {
        if agent_types.is_empty() {
            return Err(SubstrateError::invalid_argument("agent_types must be non-empty"));
        }
        let id = short_uuid();
        let now = Utc::now();
        let agent_types_json = serde_json::to_string(&agent_types)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO relay_pipelines (id, name, goal, agent_types, status, current_step, token_budget, tokens_used, baton_data, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, 0, '{}', ?6)",
            params![id, name, goal, agent_types_json, token_budget, now.to_rfc3339()],
        )?;
        for (index, agent_type) in agent_types.iter().enumerate() {
            conn.execute(
                "INSERT INTO relay_steps (pipeline_id, step_index, agent_type, status)
                 VALUES (?1, ?2, ?3, 'pending')",
                params![id, index as i64, agent_type],
            )?;
        }
        info!(pipeline_id = %id, steps = agent_types.len(), "relay pipeline created");
        Ok(RelayPipeline {
            id,
            name: name.to_string(),
            goal: goal.to_string(),
            agent_types,
            status: PipelineStatus::Pending,
            current_step: 0,
            token_budget,
            tokens_used: 0,
            baton_data: serde_json::json!({}),
            created_at: now,
            completed_at: None,
        })
    }

    pub async fn get_pipeline(&self, id: &str) -> SubstrateResult<(RelayPipeline, Vec<RelayStep>)> {
        let conn = self.conn.lock().await;
        let pipeline = Self::fetch_pipeline(&conn, id)?;
        let steps = Self::fetch_steps(&conn, id)?;
        Ok((pipeline, steps))
    }

    pub async fn get_relay_baton(&self, id: &str) -> SubstrateResult<RelayBatonView> {
        let conn = self.conn.lock().await;
        let pipeline = Self::fetch_pipeline(&conn, id)?;
        let current_agent = pipeline
            .agent_types
            .get(pipeline.current_step as usize)
            .cloned();
        let tokens_remaining = pipeline.token_budget - pipeline.tokens_used;
        let baton = if pipeline.baton_data.as_object().map(|m| m.is_empty()).unwrap_or(true) {
            None
        } else {
            Some(serde_json::from_value(pipeline.baton_data.clone())?)
        };
        Ok(RelayBatonView {
            current_agent,
            tokens_remaining,
            baton,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn advance_relay(
        &self,
        id: &str,
        quality_score: f64,
        l_score: f64,
        output_entity_id: i64,
        tokens_used: i64,
        output_summary: Option<String>,
    ) -> SubstrateResult<AdvanceOutcome> {
        let handoff_start = Instant::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let pipeline = Self::fetch_pipeline(&tx, id)?;
        if matches!(pipeline.status, PipelineStatus::Completed | PipelineStatus::Failed) {
            return Err(SubstrateError::state_conflict(format!(
                "pipeline {id} is already {}",
                pipeline.status.as_str()
            )));
        }

        let step_index = pipeline.current_step;
        let now = Utc::now();
        let rows = tx.execute(
            "UPDATE relay_steps SET status = 'completed', quality_score = ?1, l_score = ?2,
                    output_entity_id = ?3, tokens_used = ?4, completed_at = ?5
             WHERE pipeline_id = ?6 AND step_index = ?7 AND status != 'completed'",
            params![
                quality_score,
                l_score,
                output_entity_id,
                tokens_used,
                now.to_rfc3339(),
                id,
                step_index,
            ],
        )?;
        if rows == 0 {
            return Err(SubstrateError::state_conflict(format!(
                "step {step_index} of pipeline {id} was already advanced"
            )));
        }

        let new_tokens_used = pipeline.tokens_used + tokens_used;
        // §3.2 states `tokens_used <= token_budget` as the invariant "when a
        // step is accepted", but the advance contract (§4.2) never says a
        // step over budget must be rejected, so this is logged rather than
        // enforced; callers that care about hard budget caps should check
        // `tokens_remaining` from `get_relay_baton` before calling.
        if new_tokens_used > pipeline.token_budget {
            warn!(
                pipeline_id = %id,
                tokens_used = new_tokens_used,
                token_budget = pipeline.token_budget,
                "relay pipeline exceeded its token budget"
            );
        }
        let total_steps = pipeline.agent_types.len() as i64;
        let next_step = step_index + 1;

        if next_step == total_steps {
            tx.execute(
                "UPDATE relay_pipelines SET status = 'completed', current_step = ?1, tokens_used = ?2, completed_at = ?3
                 WHERE id = ?4",
                params![next_step, new_tokens_used, now.to_rfc3339(), id],
            )?;
            tx.commit()?;
            info!(pipeline_id = %id, "relay pipeline completed");
            return Ok(AdvanceOutcome::Completed {
                total_tokens: new_tokens_used,
                handoff_time_ms: handoff_start.elapsed().as_millis() as u64,
            });
        }

        let baton = Baton {
            previous_step: step_index,
            quality_score,
            l_score,
            output_entity_id,
            summary: output_summary,
        };
        let baton_json = serde_json::to_value(&baton)?;
        tx.execute(
            "UPDATE relay_pipelines SET status = 'in_progress', current_step = ?1, tokens_used = ?2, baton_data = ?3
             WHERE id = ?4",
            params![next_step, new_tokens_used, baton_json.to_string(), id],
        )?;
        tx.execute(
            "UPDATE relay_steps SET status = 'in_progress', started_at = ?1 WHERE pipeline_id = ?2 AND step_index = ?3",
            params![now.to_rfc3339(), id, next_step],
        )?;
        tx.commit()?;

        let next_agent = pipeline.agent_types[next_step as usize].clone();
        Ok(AdvanceOutcome::InProgress {
            current_step: next_step,
            next_agent,
            tokens_remaining: pipeline.token_budget - new_tokens_used,
            handoff_time_ms: handoff_start.elapsed().as_millis() as u64,
        })
    }

    fn fetch_pipeline(conn: &rusqlite::Connection, id: &str) -> SubstrateResult<RelayPipeline> {
        let (name, goal, agent_types_json, status, current_step, token_budget, tokens_used, baton_json, created_at, completed_at): (
            String,
            String,
            String,
            String,
            i64,
            i64,
            i64,
            String,
            String,
            Option<String>,
        ) = conn
            .query_row(
                "SELECT name, goal, agent_types, status, current_step, token_budget, tokens_used, baton_data, created_at, completed_at
                 FROM relay_pipelines WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| SubstrateError::not_found(format!("pipeline {id} not found")))?;

        Ok(RelayPipeline {
            id: id.to_string(),
            name,
            goal,
            agent_types: serde_json::from_str(&agent_types_json)?,
            status: PipelineStatus::parse(&status),
            current_step,
            token_budget,
            tokens_used,
            baton_data: serde_json::from_str(&baton_json)?,
            created_at: parse_rfc3339(&created_at)?,
            completed_at: completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
        })
    }

    fn fetch_steps(conn: &rusqlite::Connection, id: &str) -> SubstrateResult<Vec<RelayStep>> {
        let mut stmt = conn.prepare(
            "SELECT pipeline_id, step_index, agent_type, status, quality_score, l_score,
                    output_entity_id, tokens_used, started_at, completed_at
             FROM relay_steps WHERE pipeline_id = ?1 ORDER BY step_index ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(RelayStepRow {
                pipeline_id: row.get(0)?,
                step_index: row.get(1)?,
                agent_type: row.get(2)?,
                status: row.get(3)?,
                quality_score: row.get(4)?,
                l_score: row.get(5)?,
                output_entity_id: row.get(6)?,
                tokens_used: row.get(7)?,
                started_at: row.get(8)?,
                completed_at: row.get(9)?,
            })
        })?;
        let mut steps = Vec::new();
        for r in rows {
            steps.push(r?.into_step()?);
        }
        Ok(steps)
    }

    // ---- Circuit breakers -------------------------------------------------

    pub async fn status(&self, agent_id: &str) -> SubstrateResult<CircuitBreaker> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let breaker = Self::load_or_create_breaker(&tx, agent_id)?;
        let breaker = Self::observe_transition(&tx, breaker)?;
        tx.commit()?;
        Ok(breaker)
    }

    pub async fn list_breakers(&self) -> SubstrateResult<Vec<CircuitBreaker>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let agent_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT agent_id FROM circuit_breakers ORDER BY agent_id")?;
            stmt.query_map(params![], |r| r.get(0))?.collect::<Result<_, _>>()?
        };
        let mut breakers = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            let breaker = Self::load_or_create_breaker(&tx, &agent_id)?;
            breakers.push(Self::observe_transition(&tx, breaker)?);
        }
        tx.commit()?;
        Ok(breakers)
    }

    pub async fn record_failure(
        &self,
        agent_id: &str,
        failure_type: &str,
        error_message: &str,
    ) -> SubstrateResult<CircuitBreaker> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let breaker = Self::load_or_create_breaker(&tx, agent_id)?;
        let mut breaker = Self::observe_transition(&tx, breaker)?;

        let now = Utc::now();
        breaker.failure_count += 1;
        breaker.last_failure_at = Some(now);

        match breaker.state {
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(now);
            }
            BreakerState::Closed if breaker.failure_count >= breaker.failure_threshold => {
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(now);
                warn!(agent_id, failure_count = breaker.failure_count, "circuit breaker tripped");
            }
            _ => {}
        }
        warn!(agent_id, failure_type, error_message, "agent failure recorded");
        Self::save_breaker(&tx, &breaker)?;
        tx.commit()?;
        Ok(breaker)
    }

    pub async fn record_success(&self, agent_id: &str) -> SubstrateResult<CircuitBreaker> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let breaker = Self::load_or_create_breaker(&tx, agent_id)?;
        let mut breaker = Self::observe_transition(&tx, breaker)?;

        let now = Utc::now();
        breaker.last_success_at = Some(now);
        if breaker.state == BreakerState::HalfOpen {
            breaker.state = BreakerState::Closed;
            breaker.failure_count = 0;
            breaker.opened_at = None;
        } else if breaker.state == BreakerState::Closed {
            // Treat the window as "time since last success" per the open
            // question in §9: a success resets the failure count.
            breaker.failure_count = 0;
        }
        Self::save_breaker(&tx, &breaker)?;
        tx.commit()?;
        Ok(breaker)
    }

    pub async fn reset(&self, agent_id: &str) -> SubstrateResult<CircuitBreaker> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut breaker = Self::load_or_create_breaker(&tx, agent_id)?;
        breaker.state = BreakerState::Closed;
        breaker.failure_count = 0;
        breaker.opened_at = None;
        Self::save_breaker(&tx, &breaker)?;
        tx.commit()?;
        Ok(breaker)
    }

    fn load_or_create_breaker(
        conn: &rusqlite::Connection,
        agent_id: &str,
    ) -> SubstrateResult<CircuitBreaker> {
        let row = conn
            .query_row(
                "SELECT agent_id, state, failure_count, last_failure_at, last_success_at, opened_at,
                        failure_threshold, window_seconds, cooldown_seconds, fallback_agent
                 FROM circuit_breakers WHERE agent_id = ?1",
                params![agent_id],
                CircuitBreakerRow::from_row,
            )
            .optional()?;
        match row {
            Some(r) => r.into_breaker(),
            None => {
                let breaker = CircuitBreaker::new(agent_id);
                Self::save_breaker(conn, &breaker)?;
                Ok(breaker)
            }
        }
    }

    /// Applies the lazily-observed `open -> half_open` transition per §4.2.
    fn observe_transition(
        conn: &rusqlite::Connection,
        mut breaker: CircuitBreaker,
    ) -> SubstrateResult<CircuitBreaker> {
        if breaker.state == BreakerState::Open {
            if let Some(opened_at) = breaker.opened_at {
                let elapsed = (Utc::now() - opened_at).num_seconds();
                if elapsed >= breaker.cooldown_seconds {
                    breaker.state = BreakerState::HalfOpen;
                    Self::save_breaker(conn, &breaker)?;
                }
            }
        }
        Ok(breaker)
    }

    fn save_breaker(conn: &rusqlite::Connection, breaker: &CircuitBreaker) -> SubstrateResult<()> {
        conn.execute(
            "INSERT INTO circuit_breakers
                (agent_id, state, failure_count, last_failure_at, last_success_at, opened_at,
                 failure_threshold, window_seconds, cooldown_seconds, fallback_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(agent_id) DO UPDATE SET
                state = excluded.state,
                failure_count = excluded.failure_count,
                last_failure_at = excluded.last_failure_at,
                last_success_at = excluded.last_success_at,
                opened_at = excluded.opened_at,
                fallback_agent = excluded.fallback_agent",
            params![
                breaker.agent_id,
                breaker.state.as_str(),
                breaker.failure_count,
                breaker.last_failure_at.map(|t| t.to_rfc3339()),
                breaker.last_success_at.map(|t| t.to_rfc3339()),
                breaker.opened_at.map(|t| t.to_rfc3339()),
                breaker.failure_threshold,
                breaker.window_seconds,
                breaker.cooldown_seconds,
                breaker.fallback_agent,
            ],
        )?;
        Ok(())
    }
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn parse_rfc3339(s: &str) -> SubstrateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SubstrateError::serialization(format!("bad timestamp '{s}': {e}")))
}

fn parse_opt_rfc3339(s: Option<String>) -> SubstrateResult<Option<DateTime<Utc>>> {
    s.map(|s| parse_rfc3339(&s)).transpose()
}

// ---- Row-mapping helpers ---------------------------------------------

struct TaskRow {
    id: i64,
    goal_id: Option<i64>,
    title: String,
    description: Option<String>,
    status: String,
    priority: i32,
    result: Option<String>,
    error: Option<String>,
    dependencies: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            goal_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            result: row.get(6)?,
            error: row.get(7)?,
            dependencies: row.get(8)?,
            created_at: row.get(9)?,
            started_at: row.get(10)?,
            completed_at: row.get(11)?,
        })
    }

    fn fetch(conn: &rusqlite::Connection, id: i64) -> SubstrateResult<Self> {
        conn.query_row(
            "SELECT id, goal_id, title, description, status, priority, result, error, dependencies,
                    created_at, started_at, completed_at
             FROM tasks WHERE id = ?1",
            params![id],
            Self::from_row,
        )
        .optional()?
        .ok_or_else(|| SubstrateError::not_found(format!("task {id} not found")))
    }

    fn into_task(self) -> SubstrateResult<Task> {
        Ok(Task {
            id: self.id,
            goal_id: self.goal_id,
            title: self.title,
            description: self.description,
            status: TaskStatus::parse(&self.status),
            priority: self.priority,
            result: self.result.map(|r| serde_json::from_str(&r)).transpose()?,
            error: self.error,
            dependencies: serde_json::from_str(&self.dependencies)?,
            created_at: parse_rfc3339(&self.created_at)?,
            started_at: parse_opt_rfc3339(self.started_at)?,
            completed_at: parse_opt_rfc3339(self.completed_at)?,
        })
    }
}

struct RelayStepRow {
    pipeline_id: String,
    step_index: i64,
    agent_type: String,
    status: String,
    quality_score: Option<f64>,
    l_score: Option<f64>,
    output_entity_id: Option<i64>,
    tokens_used: Option<i64>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RelayStepRow {
    fn into_step(self) -> SubstrateResult<RelayStep> {
        Ok(RelayStep {
            pipeline_id: self.pipeline_id,
            step_index: self.step_index,
            agent_type: self.agent_type,
            status: StepStatus::parse(&self.status),
            quality_score: self.quality_score,
            l_score: self.l_score,
            output_entity_id: self.output_entity_id,
            tokens_used: self.tokens_used,
            started_at: parse_opt_rfc3339(self.started_at)?,
            completed_at: parse_opt_rfc3339(self.completed_at)?,
        })
    }
}

struct CircuitBreakerRow {
    agent_id: String,
    state: String,
    failure_count: i64,
    last_failure_at: Option<String>,
    last_success_at: Option<String>,
    opened_at: Option<String>,
    failure_threshold: i64,
    window_seconds: i64,
    cooldown_seconds: i64,
    fallback_agent: Option<String>,
}

impl CircuitBreakerRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            agent_id: row.get(0)?,
            state: row.get(1)?,
            failure_count: row.get(2)?,
            last_failure_at: row.get(3)?,
            last_success_at: row.get(4)?,
            opened_at: row.get(5)?,
            failure_threshold: row.get(6)?,
            window_seconds: row.get(7)?,
            cooldown_seconds: row.get(8)?,
            fallback_agent: row.get(9)?,
        })
    }

    fn into_breaker(self) -> SubstrateResult<CircuitBreaker> {
        Ok(CircuitBreaker {
            agent_id: self.agent_id,
            state: BreakerState::parse(&self.state),
            failure_count: self.failure_count,
            last_failure_at: parse_opt_rfc3339(self.last_failure_at)?,
            last_success_at: parse_opt_rfc3339(self.last_success_at)?,
            opened_at: parse_opt_rfc3339(self.opened_at)?,
            failure_threshold: self.failure_threshold,
            window_seconds: self.window_seconds,
            cooldown_seconds: self.cooldown_seconds,
            fallback_agent: self.fallback_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_dependency_gating() {
        let store = RuntimeStore::open_in_memory().unwrap();
        let t1 = store.create_task("T1", None, None, 9, vec![]).await.unwrap();
        store.create_task("T2", None, None, 10, vec![t1.id]).await.unwrap();

        let next = store.get_next_task().await.unwrap().unwrap();
        assert_eq!(next.title, "T1");

        store
            .update_task_status(t1.id, TaskStatus::Completed, None, None)
            .await
            .unwrap();
        let t1_after = TaskRow::fetch(&store.conn.lock().await, t1.id).unwrap().into_task().unwrap();

        let next = store.get_next_task().await.unwrap().unwrap();
        assert_eq!(next.title, "T2");
        assert!(next.started_at.unwrap() >= t1_after.completed_at.unwrap());
    }

    #[tokio::test]
    async fn relay_handoff_scenario() {
        let store = RuntimeStore::open_in_memory().unwrap();
        let pipeline = store
            .create_relay_pipeline("p", "goal", vec!["r".into(), "a".into(), "s".into()], 1000)
            .await
            .unwrap();

        let outcome = store
            .advance_relay(&pipeline.id, 0.8, 0.9, 42, 100, Some("ok".into()))
            .await
            .unwrap();
        match outcome {
            AdvanceOutcome::InProgress {
                current_step,
                next_agent,
                tokens_remaining,
                ..
            } => {
                assert_eq!(current_step, 1);
                assert_eq!(next_agent, "a");
                assert_eq!(tokens_remaining, 900);
            }
            other => panic!("expected in_progress, got {other:?}"),
        }

        let baton = store.get_relay_baton(&pipeline.id).await.unwrap();
        let b = baton.baton.unwrap();
        assert_eq!(b.previous_step, 0);
        assert_eq!(b.output_entity_id, 42);
        assert_eq!(b.summary.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn relay_pipeline_completes_on_final_step() {
        let store = RuntimeStore::open_in_memory().unwrap();
        let pipeline = store
            .create_relay_pipeline("p", "goal", vec!["only".into()], 500)
            .await
            .unwrap();
        let outcome = store
            .advance_relay(&pipeline.id, 1.0, 1.0, 1, 50, None)
            .await
            .unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Completed { total_tokens: 50, .. }));
        let (fetched, _) = store.get_pipeline(&pipeline.id).await.unwrap();
        assert_eq!(fetched.current_step, 1);
        assert!(matches!(fetched.status, PipelineStatus::Completed));
    }

    #[tokio::test]
    async fn circuit_breaker_trips_and_resets() {
        let store = RuntimeStore::open_in_memory().unwrap();
        for _ in 0..5 {
            store.record_failure("agent-x", "timeout", "boom").await.unwrap();
        }
        let status = store.status("agent-x").await.unwrap();
        assert_eq!(status.state, BreakerState::Open);
        assert!(status.failure_count >= status.failure_threshold);

        let reset = store.reset("agent-x").await.unwrap();
        assert_eq!(reset.state, BreakerState::Closed);
        assert_eq!(reset.failure_count, 0);
    }

    #[tokio::test]
    async fn decompose_sequential_chains_dependencies() {
        let store = RuntimeStore::open_in_memory().unwrap();
        let goal = store.create_goal("Ship feature", None, None).await.unwrap();
        let outcome = store
            .decompose_goal(goal.id, DecomposeStrategy::Sequential)
            .await
            .unwrap();
        assert_eq!(outcome.task_ids.len(), 5);

        let tasks = store.list_tasks(Some(goal.id), None).await.unwrap();
        let design = tasks.iter().find(|t| t.title == "Design").unwrap();
        assert_eq!(design.dependencies.len(), 1);
    }
}
