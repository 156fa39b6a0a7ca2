//! The tiered memory engine's SQLite-backed store.
//!
//! Grounded on `SqliteJobStore` (Symbiont's `crates/runtime`): the schema is
//! initialized before the connection is wrapped in a `tokio::sync::Mutex`,
//! so no caller ever reaches for `blocking_lock` from async code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

use substrate_core::{cosine_similarity, Embedder, HashEmbedder, SubstrateError, SubstrateResult};

use crate::schema;
use crate::types::*;

const PROMOTION_ACCESS_THRESHOLD: i64 = 5;
const PROMOTION_SIGNIFICANCE_THRESHOLD: f64 = 0.8;
const HEURISTIC_TOKENS: [&str; 4] = ["error", "critical", "important", "bug"];

/// The Tiered Memory Engine's persistent store.
pub struct MemoryStore {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl MemoryStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> SubstrateResult<Self> {
        let conn = substrate_core::db::open_connection(path)?;
        schema::init(&conn)?;
        info!(path = %path.display(), "memory store opened");
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Open an in-memory store, used by tests.
    pub fn open_in_memory() -> SubstrateResult<Self> {
        let conn = substrate_core::db::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Default database path per the persistence layout: `$HOME/.claude/enhanced_memory_oss/memory.db`.
    pub fn default_path() -> PathBuf {
        substrate_core::db::home_relative(&[".claude", "enhanced_memory_oss", "memory.db"])
    }

    // ---- Entity creation -------------------------------------------------

    pub async fn create_entities(&self, batch: Vec<NewEntity>) -> SubstrateResult<CreateEntitiesOutcome> {
        let mut outcome = CreateEntitiesOutcome::default();
        let mut conn = self.conn.lock().await;
        for item in batch {
            match Self::create_one_entity(&mut conn, &item) {
                Ok(created) => {
                    info!(entity = %created.name, tier = created.tier.as_str(), "entity created");
                    outcome.created.push(created);
                }
                Err(e) => {
                    warn!(name = %item.name, error = %e, "entity creation failed");
                    outcome.errors.push(e.to_string());
                }
            }
        }
        Ok(outcome)
    }

    fn create_one_entity(
        conn: &mut rusqlite::Connection,
        item: &NewEntity,
    ) -> SubstrateResult<CreatedEntity> {
        let importance = compute_importance(&item.name, &item.observations);
        let tier = Tier::from_importance(importance);
        let now = Utc::now();
        let metadata_json = item
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = conn.transaction()?;
        let insert = tx.execute(
            "INSERT INTO entities (name, entity_type, tier, importance_score, created_at, updated_at, access_count, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, ?6)",
            params![
                item.name,
                item.entity_type,
                tier.as_str(),
                importance,
                now.to_rfc3339(),
                metadata_json,
            ],
        );
        match insert {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(SubstrateError::duplicate(format!(
                    "Entity '{}' already exists",
                    item.name
                )));
            }
            Err(e) => return Err(e.into()),
        }
        let entity_id = tx.last_insert_rowid();

        for obs in &item.observations {
            tx.execute(
                "INSERT INTO observations (entity_id, content, created_at) VALUES (?1, ?2, ?3)",
                params![entity_id, obs, now.to_rfc3339()],
            )?;
        }

        let snapshot = EntitySnapshot {
            name: item.name.clone(),
            entity_type: item.entity_type.clone(),
            observations: item.observations.clone(),
        };
        let snapshot_json = serde_json::to_string(&snapshot)?;
        tx.execute(
            "INSERT INTO entity_versions (entity_id, version_number, snapshot, created_at, commit_message)
             VALUES (?1, 1, ?2, ?3, 'Initial creation')",
            params![entity_id, snapshot_json, now.to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(CreatedEntity {
            id: entity_id,
            name: item.name.clone(),
            tier,
            importance,
        })
    }

    // ---- Entity retrieval -------------------------------------------------

    pub async fn get_entity(&self, name: &str) -> SubstrateResult<Entity> {
        let conn = self.conn.lock().await;
        let id: i64 = conn
            .query_row("SELECT id FROM entities WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| SubstrateError::not_found(format!("entity '{name}' not found")))?;
        Self::fetch_entity_by_id(&conn, id)
    }

    pub async fn delete_entity(&self, name: &str) -> SubstrateResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let id: i64 = tx
            .query_row("SELECT id FROM entities WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| SubstrateError::not_found(format!("entity '{name}' not found")))?;
        tx.execute("DELETE FROM observations WHERE entity_id = ?1", params![id])?;
        tx.execute("DELETE FROM entity_versions WHERE entity_id = ?1", params![id])?;
        tx.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
        tx.commit()?;
        info!(entity = %name, "entity deleted");
        Ok(())
    }

    pub async fn search_entities(&self, query: &str, limit: i64) -> SubstrateResult<Vec<Entity>> {
        let conn = self.conn.lock().await;
        let like = format!("%{}%", query.to_lowercase());
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT e.id, e.importance_score, e.access_count
                 FROM entities e LEFT JOIN observations o ON o.entity_id = e.id
                 WHERE LOWER(e.name) LIKE ?1 OR LOWER(o.content) LIKE ?1
                 ORDER BY e.importance_score DESC, e.access_count DESC
                 LIMIT ?2",
            )?;
            stmt.query_map(params![like, limit], |row| row.get::<_, i64>(0))?
                .collect::<Result<_, _>>()?
        };

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            conn.execute(
                "UPDATE entities SET access_count = access_count + 1 WHERE id = ?1",
                params![id],
            )?;
            results.push(Self::fetch_entity_by_id(&conn, id)?);
        }
        Ok(results)
    }

    fn fetch_entity_by_id(conn: &rusqlite::Connection, id: i64) -> SubstrateResult<Entity> {
        let (name, entity_type, tier, importance_score, created_at, updated_at, access_count, metadata_json): (
            String,
            String,
            String,
            f64,
            String,
            String,
            i64,
            Option<String>,
        ) = conn.query_row(
            "SELECT name, entity_type, tier, importance_score, created_at, updated_at, access_count, metadata
             FROM entities WHERE id = ?1",
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
                ))
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT content FROM observations WHERE entity_id = ?1 ORDER BY id ASC",
        )?;
        let observations: Vec<String> = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let metadata = metadata_json
            .map(|j| serde_json::from_str::<HashMap<String, String>>(&j))
            .transpose()?;

        Ok(Entity {
            id,
            name,
            entity_type,
            tier: Tier::parse(&tier),
            importance_score,
            access_count,
            created_at: parse_rfc3339(&created_at)?,
            updated_at: parse_rfc3339(&updated_at)?,
            metadata,
            observations,
        })
    }

    // ---- Versioning ---------------------------------------------------

    pub async fn diff(
        &self,
        name: &str,
        v1: Option<i64>,
        v2: Option<i64>,
    ) -> SubstrateResult<VersionDiff> {
        let conn = self.conn.lock().await;
        let entity_id: i64 = conn
            .query_row("SELECT id FROM entities WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| SubstrateError::not_found(format!("entity '{name}' not found")))?;

        let latest: i64 = conn
            .query_row(
                "SELECT MAX(version_number) FROM entity_versions WHERE entity_id = ?1",
                params![entity_id],
                |r| r.get(0),
            )
            .optional()?
            .flatten()
            .ok_or_else(|| SubstrateError::not_found(format!("entity '{name}' has no versions")))?;

        let v2 = v2.unwrap_or(latest);
        let v1 = v1.unwrap_or_else(|| (v2 - 1).max(1));

        let v1_snapshot = Self::fetch_snapshot(&conn, entity_id, v1)?;
        let v2_snapshot = Self::fetch_snapshot(&conn, entity_id, v2)?;

        let v1_set: std::collections::HashSet<&String> = v1_snapshot.observations.iter().collect();
        let v2_set: std::collections::HashSet<&String> = v2_snapshot.observations.iter().collect();

        let added_observations = v2_snapshot
            .observations
            .iter()
            .filter(|o| !v1_set.contains(o))
            .cloned()
            .collect();
        let removed_observations = v1_snapshot
            .observations
            .iter()
            .filter(|o| !v2_set.contains(o))
            .cloned()
            .collect();

        Ok(VersionDiff {
            v1,
            v2,
            added_observations,
            removed_observations,
            v1_snapshot,
            v2_snapshot,
        })
    }

    fn fetch_snapshot(
        conn: &rusqlite::Connection,
        entity_id: i64,
        version_number: i64,
    ) -> SubstrateResult<EntitySnapshot> {
        let snapshot_json: String = conn
            .query_row(
                "SELECT snapshot FROM entity_versions WHERE entity_id = ?1 AND version_number = ?2",
                params![entity_id, version_number],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| SubstrateError::not_found(format!("version {version_number} not found")))?;
        Ok(serde_json::from_str(&snapshot_json)?)
    }

    // ---- Working memory -------------------------------------------------

    pub async fn add_working_item(
        &self,
        context_key: &str,
        content: &str,
        priority: i32,
        ttl_minutes: i64,
        entity_id: Option<i64>,
    ) -> SubstrateResult<WorkingMemoryItem> {
        if !(1..=10).contains(&priority) {
            return Err(SubstrateError::invalid_argument("priority must be in 1..=10"));
        }
        let now = Utc::now();
        let expires_at = now + Duration::minutes(ttl_minutes);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO working_memory (context_key, content, priority, ttl_minutes, created_at, expires_at, access_count, entity_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                context_key,
                content,
                priority,
                ttl_minutes,
                now.to_rfc3339(),
                expires_at.to_rfc3339(),
                entity_id,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(WorkingMemoryItem {
            id,
            context_key: context_key.to_string(),
            content: content.to_string(),
            priority,
            created_at: now,
            expires_at,
            access_count: 0,
            entity_id,
        })
    }

    pub async fn get_working_items(
        &self,
        context_key: Option<&str>,
        limit: i64,
    ) -> SubstrateResult<Vec<WorkingMemoryItem>> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let removed = conn.execute(
            "DELETE FROM working_memory WHERE expires_at < ?1",
            params![now],
        )?;
        if removed > 0 {
            debug!(removed, "expired working items evicted");
        }

        let ids: Vec<i64> = match context_key {
            Some(key) => {
                let mut stmt = conn.prepare(
                    "SELECT id FROM working_memory WHERE context_key = ?1 ORDER BY priority DESC, created_at DESC LIMIT ?2",
                )?;
                stmt.query_map(params![key, limit], |row| row.get::<_, i64>(0))?
                    .collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id FROM working_memory ORDER BY priority DESC, created_at DESC LIMIT ?1",
                )?;
                stmt.query_map(params![limit], |row| row.get::<_, i64>(0))?
                    .collect::<Result<_, _>>()?
            }
        };

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            conn.execute(
                "UPDATE working_memory SET access_count = access_count + 1 WHERE id = ?1",
                params![id],
            )?;
            items.push(Self::fetch_working_item(&conn, id)?);
        }
        Ok(items)
    }

    fn fetch_working_item(conn: &rusqlite::Connection, id: i64) -> SubstrateResult<WorkingMemoryItem> {
        conn.query_row(
            "SELECT id, context_key, content, priority, created_at, expires_at, access_count, entity_id
             FROM working_memory WHERE id = ?1",
            params![id],
            |row| {
                Ok(WorkingMemoryItemRow {
                    id: row.get(0)?,
                    context_key: row.get(1)?,
                    content: row.get(2)?,
                    priority: row.get(3)?,
                    created_at: row.get(4)?,
                    expires_at: row.get(5)?,
                    access_count: row.get(6)?,
                    entity_id: row.get(7)?,
                })
            },
        )?
        .into_item()
    }

    // ---- Episodic memory -------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn add_episodic_item(
        &self,
        event_type: &str,
        episode_data: serde_json::Value,
        significance: f64,
        emotional_valence: Option<f64>,
        tags: Vec<String>,
        entity_id: Option<i64>,
    ) -> SubstrateResult<EpisodicItem> {
        if !(0.0..=1.0).contains(&significance) {
            return Err(SubstrateError::invalid_argument("significance must be in [0,1]"));
        }
        if let Some(v) = emotional_valence {
            if !(-1.0..=1.0).contains(&v) {
                return Err(SubstrateError::invalid_argument("emotional_valence must be in [-1,1]"));
            }
        }
        let now = Utc::now();
        let data_json = serde_json::to_string(&episode_data)?;
        let tags_json = serde_json::to_string(&tags)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO episodic_memory (event_type, episode_data, significance_score, emotional_valence, tags, created_at, entity_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![event_type, data_json, significance, emotional_valence, tags_json, now.to_rfc3339(), entity_id],
        )?;
        let id = conn.last_insert_rowid();
        Ok(EpisodicItem {
            id,
            event_type: event_type.to_string(),
            episode_data,
            significance,
            emotional_valence,
            tags,
            created_at: now,
            entity_id,
        })
    }

    /// Symmetric with `get_working_items`: optionally filter by
    /// `event_type`, newest first.
    pub async fn get_episodic_items(
        &self,
        event_type: Option<&str>,
        limit: i64,
    ) -> SubstrateResult<Vec<EpisodicItem>> {
        let conn = self.conn.lock().await;
        let rows: Vec<EpisodicItemRow> = match event_type {
            Some(event_type) => {
                let mut stmt = conn.prepare(
                    "SELECT id, event_type, episode_data, significance_score, emotional_valence, tags, created_at, entity_id
                     FROM episodic_memory WHERE event_type = ?1 ORDER BY created_at DESC LIMIT ?2",
                )?;
                stmt.query_map(params![event_type, limit], Self::map_episodic_row)?
                    .collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, event_type, episode_data, significance_score, emotional_valence, tags, created_at, entity_id
                     FROM episodic_memory ORDER BY created_at DESC LIMIT ?1",
                )?;
                stmt.query_map(params![limit], Self::map_episodic_row)?
                    .collect::<Result<_, _>>()?
            }
        };
        rows.into_iter().map(|r| r.into_item()).collect()
    }

    fn map_episodic_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EpisodicItemRow> {
        Ok(EpisodicItemRow {
            id: row.get(0)?,
            event_type: row.get(1)?,
            episode_data: row.get(2)?,
            significance: row.get(3)?,
            emotional_valence: row.get(4)?,
            tags: row.get(5)?,
            created_at: row.get(6)?,
            entity_id: row.get(7)?,
        })
    }

    fn fetch_all_episodic(conn: &rusqlite::Connection) -> SubstrateResult<Vec<EpisodicItem>> {
        let mut stmt = conn.prepare(
            "SELECT id, event_type, episode_data, significance_score, emotional_valence, tags, created_at, entity_id
             FROM episodic_memory",
        )?;
        let rows = stmt.query_map(params![], Self::map_episodic_row)?;
        let mut items = Vec::new();
        for r in rows {
            items.push(r?.into_item()?);
        }
        Ok(items)
    }

    // ---- Semantic memory -------------------------------------------------

    pub async fn add_concept(
        &self,
        concept_name: &str,
        concept_type: &str,
        definition: &str,
        related_concepts: Vec<String>,
        confidence: f64,
    ) -> SubstrateResult<SemanticConcept> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(SubstrateError::invalid_argument("confidence must be in [0,1]"));
        }
        let now = Utc::now();
        let related_json = serde_json::to_string(&related_concepts)?;
        let conn = self.conn.lock().await;
        let insert = conn.execute(
            "INSERT INTO semantic_memory (concept_name, concept_type, definition, related_concepts, confidence_score, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![concept_name, concept_type, definition, related_json, confidence, now.to_rfc3339()],
        );
        match insert {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(SubstrateError::duplicate(format!(
                    "concept '{concept_name}' already exists"
                )));
            }
            Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();
        Ok(SemanticConcept {
            id,
            concept_name: concept_name.to_string(),
            concept_type: concept_type.to_string(),
            definition: definition.to_string(),
            related_concepts,
            confidence,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_concept(&self, name: &str) -> SubstrateResult<SemanticConcept> {
        let conn = self.conn.lock().await;
        Self::fetch_concept(&conn, name)
    }

    fn fetch_concept(conn: &rusqlite::Connection, name: &str) -> SubstrateResult<SemanticConcept> {
        conn.query_row(
            "SELECT id, concept_name, concept_type, definition, related_concepts, confidence_score, created_at, updated_at
             FROM semantic_memory WHERE concept_name = ?1",
            params![name],
            |row| {
                Ok(SemanticConceptRow {
                    id: row.get(0)?,
                    concept_name: row.get(1)?,
                    concept_type: row.get(2)?,
                    definition: row.get(3)?,
                    related_concepts: row.get(4)?,
                    confidence: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| SubstrateError::not_found(format!("concept '{name}' not found")))?
        .into_concept()
    }

    // ---- Procedural memory -------------------------------------------------

    pub async fn add_skill(
        &self,
        skill_name: &str,
        skill_category: &str,
        procedure_steps: Vec<String>,
        preconditions: Option<String>,
        success_criteria: Option<String>,
    ) -> SubstrateResult<ProceduralSkill> {
        let now = Utc::now();
        let steps_json = serde_json::to_string(&procedure_steps)?;
        let conn = self.conn.lock().await;
        let insert = conn.execute(
            "INSERT INTO procedural_memory (skill_name, skill_category, procedure_steps, preconditions, success_criteria, execution_count, success_rate, avg_execution_time_ms, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0.0, NULL, ?6, ?6)",
            params![skill_name, skill_category, steps_json, preconditions, success_criteria, now.to_rfc3339()],
        );
        match insert {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(SubstrateError::duplicate(format!(
                    "skill '{skill_name}' already exists"
                )));
            }
            Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();
        Ok(ProceduralSkill {
            id,
            skill_name: skill_name.to_string(),
            skill_category: skill_category.to_string(),
            procedure_steps,
            preconditions,
            success_criteria,
            execution_count: 0,
            success_rate: 0.0,
            avg_execution_time_ms: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_skill(&self, name: &str) -> SubstrateResult<ProceduralSkill> {
        let conn = self.conn.lock().await;
        Self::fetch_skill(&conn, name)
    }

    /// Records one execution outcome and updates the running-mean
    /// `success_rate`/`avg_execution_time_ms` (see `SPEC_FULL.md` §4.1).
    pub async fn record_skill_execution(
        &self,
        skill_name: &str,
        success: bool,
        execution_time_ms: f64,
    ) -> SubstrateResult<ProceduralSkill> {
        let conn = self.conn.lock().await;
        let skill = Self::fetch_skill(&conn, skill_name)?;
        let n = skill.execution_count + 1;
        let success_rate =
            (skill.success_rate * (n - 1) as f64 + if success { 1.0 } else { 0.0 }) / n as f64;
        let avg_time = (skill.avg_execution_time_ms.unwrap_or(0.0) * (n - 1) as f64
            + execution_time_ms)
            / n as f64;
        let now = Utc::now();
        conn.execute(
            "UPDATE procedural_memory
             SET execution_count = ?1, success_rate = ?2, avg_execution_time_ms = ?3, updated_at = ?4
             WHERE skill_name = ?5",
            params![n, success_rate, avg_time, now.to_rfc3339(), skill_name],
        )?;
        Ok(ProceduralSkill {
            execution_count: n,
            success_rate,
            avg_execution_time_ms: Some(avg_time),
            updated_at: now,
            ..skill
        })
    }

    fn fetch_skill(conn: &rusqlite::Connection, name: &str) -> SubstrateResult<ProceduralSkill> {
        conn.query_row(
            "SELECT id, skill_name, skill_category, procedure_steps, preconditions, success_criteria,
                    execution_count, success_rate, avg_execution_time_ms, created_at, updated_at
             FROM procedural_memory WHERE skill_name = ?1",
            params![name],
            |row| {
                Ok(ProceduralSkillRow {
                    id: row.get(0)?,
                    skill_name: row.get(1)?,
                    skill_category: row.get(2)?,
                    procedure_steps: row.get(3)?,
                    preconditions: row.get(4)?,
                    success_criteria: row.get(5)?,
                    execution_count: row.get(6)?,
                    success_rate: row.get(7)?,
                    avg_execution_time_ms: row.get(8)?,
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| SubstrateError::not_found(format!("skill '{name}' not found")))?
        .into_skill()
    }

    // ---- Curation -------------------------------------------------

    pub async fn curate(&self) -> SubstrateResult<CurationReport> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let mut report = CurationReport::default();

        report.expired_working_removed = conn.execute(
            "DELETE FROM working_memory WHERE expires_at < ?1",
            params![now.to_rfc3339()],
        )? as u64;

        let eligible: Vec<(i64, String, String, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT id, context_key, content, access_count FROM working_memory WHERE access_count >= ?1",
            )?;
            stmt.query_map(params![PROMOTION_ACCESS_THRESHOLD], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?
        };
        for (_, context_key, content, access_count) in eligible {
            let significance = (0.3 + 0.1 * access_count as f64).min(0.7);
            let data = serde_json::json!({ "content": content, "context": context_key });
            conn.execute(
                "INSERT INTO episodic_memory (event_type, episode_data, significance_score, emotional_valence, tags, created_at, entity_id)
                 VALUES ('promoted_from_working', ?1, ?2, NULL, '[]', ?3, NULL)",
                params![data.to_string(), significance, now.to_rfc3339()],
            )?;
            report.working_to_episodic += 1;
        }

        let candidates: Vec<(i64, String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, episode_data FROM episodic_memory WHERE significance_score >= ?1",
            )?;
            stmt.query_map(params![PROMOTION_SIGNIFICANCE_THRESHOLD], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?
        };
        for (episode_id, event_type, episode_data) in candidates {
            let concept_name = format!("learned_{event_type}_{episode_id}");
            let insert = conn.execute(
                "INSERT INTO semantic_memory (concept_name, concept_type, definition, related_concepts, confidence_score, created_at, updated_at)
                 VALUES (?1, 'derived_pattern', ?2, '[]', ?3, ?4, ?4)",
                params![concept_name, episode_data, PROMOTION_SIGNIFICANCE_THRESHOLD, now.to_rfc3339()],
            );
            match insert {
                Ok(_) => report.episodic_to_semantic += 1,
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    // duplicate concept_name: skip silently, per §4.1.
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            expired = report.expired_working_removed,
            promoted_episodic = report.working_to_episodic,
            promoted_semantic = report.episodic_to_semantic,
            "curation pass complete"
        );
        Ok(report)
    }

    // ---- Similarity -------------------------------------------------

    /// Computes cosine similarity between `query`'s deterministic embedding
    /// and every stored item's content across all four memory classes.
    pub async fn retrieve_memories(&self, query: &str, limit: usize) -> SubstrateResult<Vec<SimilarityHit>> {
        let embedder = HashEmbedder;
        let query_vec = embedder.embed(&[query.to_string()]).remove(0);

        let conn = self.conn.lock().await;
        let mut hits = Vec::new();

        {
            let mut stmt = conn.prepare("SELECT id, content FROM working_memory")?;
            let rows = stmt.query_map(params![], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for r in rows {
                let (id, content) = r?;
                let score = cosine_similarity(&query_vec, &embedder.embed(&[content.clone()]).remove(0));
                hits.push(SimilarityHit { class: "working".into(), id, content, score });
            }
        }
        for item in Self::fetch_all_episodic(&conn)? {
            let content = item.episode_data.to_string();
            let score = cosine_similarity(&query_vec, &embedder.embed(&[content.clone()]).remove(0));
            hits.push(SimilarityHit { class: "episodic".into(), id: item.id, content, score });
        }
        {
            let mut stmt = conn.prepare("SELECT id, definition FROM semantic_memory")?;
            let rows = stmt.query_map(params![], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for r in rows {
                let (id, content) = r?;
                let score = cosine_similarity(&query_vec, &embedder.embed(&[content.clone()]).remove(0));
                hits.push(SimilarityHit { class: "semantic".into(), id, content, score });
            }
        }
        {
            let mut stmt = conn.prepare("SELECT id, procedure_steps FROM procedural_memory")?;
            let rows = stmt.query_map(params![], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for r in rows {
                let (id, content) = r?;
                let score = cosine_similarity(&query_vec, &embedder.embed(&[content.clone()]).remove(0));
                hits.push(SimilarityHit { class: "procedural".into(), id, content, score });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    // ---- Status -------------------------------------------------

    pub async fn status(&self) -> SubstrateResult<MemoryStatus> {
        let conn = self.conn.lock().await;
        let mut entities_by_tier = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT tier, COUNT(*) FROM entities GROUP BY tier")?;
            let rows = stmt.query_map(params![], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for r in rows {
                let (tier, count) = r?;
                entities_by_tier.insert(tier, count);
            }
        }
        let working_memory_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM working_memory", params![], |r| r.get(0))?;
        let episodic_memory_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM episodic_memory", params![], |r| r.get(0))?;
        let semantic_memory_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM semantic_memory", params![], |r| r.get(0))?;
        let procedural_memory_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM procedural_memory", params![], |r| r.get(0))?;
        let total_versions: i64 =
            conn.query_row("SELECT COUNT(*) FROM entity_versions", params![], |r| r.get(0))?;

        Ok(MemoryStatus {
            entities_by_tier,
            working_memory_count,
            episodic_memory_count,
            semantic_memory_count,
            procedural_memory_count,
            total_versions,
            status: "healthy".to_string(),
        })
    }
}

fn compute_importance(name: &str, observations: &[String]) -> f64 {
    let mut score: f64 = 0.5;
    let haystack = format!("{name} {}", observations.join(" ")).to_lowercase();
    if HEURISTIC_TOKENS.iter().any(|t| haystack.contains(t)) {
        score += 0.2;
    }
    if observations.len() > 3 {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

fn parse_rfc3339(s: &str) -> SubstrateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SubstrateError::serialization(format!("bad timestamp '{s}': {e}")))
}

// ---- Row-mapping helpers ---------------------------------------------

struct WorkingMemoryItemRow {
    id: i64,
    context_key: String,
    content: String,
    priority: i32,
    created_at: String,
    expires_at: String,
    access_count: i64,
    entity_id: Option<i64>,
}

impl WorkingMemoryItemRow {
    fn into_item(self) -> SubstrateResult<WorkingMemoryItem> {
        Ok(WorkingMemoryItem {
            id: self.id,
            context_key: self.context_key,
            content: self.content,
            priority: self.priority,
            created_at: parse_rfc3339(&self.created_at)?,
            expires_at: parse_rfc3339(&self.expires_at)?,
            access_count: self.access_count,
            entity_id: self.entity_id,
        })
    }
}

struct EpisodicItemRow {
    id: i64,
    event_type: String,
    episode_data: String,
    significance: f64,
    emotional_valence: Option<f64>,
    tags: String,
    created_at: String,
    entity_id: Option<i64>,
}

impl EpisodicItemRow {
    fn into_item(self) -> SubstrateResult<EpisodicItem> {
        Ok(EpisodicItem {
            id: self.id,
            event_type: self.event_type,
            episode_data: serde_json::from_str(&self.episode_data)?,
            significance: self.significance,
            emotional_valence: self.emotional_valence,
            tags: serde_json::from_str(&self.tags)?,
            created_at: parse_rfc3339(&self.created_at)?,
            entity_id: self.entity_id,
        })
    }
}

struct SemanticConceptRow {
    id: i64,
    concept_name: String,
    concept_type: String,
    definition: String,
    related_concepts: String,
    confidence: f64,
    created_at: String,
    updated_at: String,
}

impl SemanticConceptRow {
    fn into_concept(self) -> SubstrateResult<SemanticConcept> {
        Ok(SemanticConcept {
            id: self.id,
            concept_name: self.concept_name,
            concept_type: self.concept_type,
            definition: self.definition,
            related_concepts: serde_json::from_str(&self.related_concepts)?,
            confidence: self.confidence,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

struct ProceduralSkillRow {
    id: i64,
    skill_name: String,
    skill_category: String,
    procedure_steps: String,
    preconditions: Option<String>,
    success_criteria: Option<String>,
    execution_count: i64,
    success_rate: f64,
    avg_execution_time_ms: Option<f64>,
    created_at: String,
    updated_at: String,
}

impl ProceduralSkillRow {
    fn into_skill(self) -> SubstrateResult<ProceduralSkill> {
        Ok(ProceduralSkill {
            id: self.id,
            skill_name: self.skill_name,
            skill_category: self.skill_category,
            procedure_steps: serde_json::from_str(&self.procedure_steps)?,
            preconditions: self.preconditions,
            success_criteria: self.success_criteria,
            execution_count: self.execution_count,
            success_rate: self.success_rate,
            avg_execution_time_ms: self.avg_execution_time_ms,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entity(name: &str, observations: Vec<&str>) -> NewEntity {
        NewEntity {
            name: name.to_string(),
            entity_type: "t".to_string(),
            observations: observations.into_iter().map(String::from).collect(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn create_entities_with_duplicate() {
        let store = MemoryStore::open_in_memory().unwrap();
        let batch = vec![new_entity("A", vec!["x"]), new_entity("A", vec!["y"])];
        let outcome = store.create_entities(batch).await.unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].tier, Tier::Working);
        assert_eq!(outcome.created[0].importance, 0.5);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("already exists"));
    }

    #[tokio::test]
    async fn importance_bump_to_semantic() {
        let store = MemoryStore::open_in_memory().unwrap();
        let batch = vec![new_entity(
            "Bug1",
            vec!["critical failure", "retry", "replay", "stack", "repro"],
        )];
        let outcome = store.create_entities(batch).await.unwrap();
        assert_eq!(outcome.created[0].importance, 0.8);
        assert_eq!(outcome.created[0].tier, Tier::Semantic);
    }

    #[tokio::test]
    async fn entity_version_one_matches_creation() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .create_entities(vec![new_entity("A", vec!["obs1", "obs2"])])
            .await
            .unwrap();
        let diff = store.diff("A", Some(1), Some(1)).await.unwrap();
        assert!(diff.added_observations.is_empty());
        assert!(diff.removed_observations.is_empty());
        assert_eq!(diff.v1_snapshot.observations, vec!["obs1", "obs2"]);
    }

    #[tokio::test]
    async fn search_increments_access_count() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .create_entities(vec![new_entity("Needle", vec!["haystack content"])])
            .await
            .unwrap();
        let first = store.search_entities("needle", 10).await.unwrap();
        assert_eq!(first[0].access_count, 1);
        let second = store.search_entities("needle", 10).await.unwrap();
        assert_eq!(second[0].access_count, 2);
    }

    #[tokio::test]
    async fn working_memory_promotion_to_episodic() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .add_working_item("ctx", "important content", 5, 60, None)
            .await
            .unwrap();
        for _ in 0..5 {
            store.get_working_items(Some("ctx"), 10).await.unwrap();
        }
        let report = store.curate().await.unwrap();
        assert!(report.working_to_episodic >= 1);
    }

    #[tokio::test]
    async fn get_episodic_items_filters_by_event_type_newest_first() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .add_episodic_item("deploy", serde_json::json!({"n": 1}), 0.5, None, vec![], None)
            .await
            .unwrap();
        store
            .add_episodic_item("rollback", serde_json::json!({"n": 2}), 0.5, None, vec![], None)
            .await
            .unwrap();
        store
            .add_episodic_item("deploy", serde_json::json!({"n": 3}), 0.5, None, vec![], None)
            .await
            .unwrap();

        let all = store.get_episodic_items(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);

        let deploys = store.get_episodic_items(Some("deploy"), 10).await.unwrap();
        assert_eq!(deploys.len(), 2);
        assert!(deploys.iter().all(|e| e.event_type == "deploy"));
        assert_eq!(deploys[0].episode_data, serde_json::json!({"n": 3}));
    }

    #[tokio::test]
    async fn working_memory_ttl_expiry() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.add_working_item("ctx", "will expire", 5, -1, None).await.unwrap();
        let items = store.get_working_items(Some("ctx"), 10).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn record_skill_execution_running_mean() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .add_skill("deploy", "ops", vec!["step1".into()], None, None)
            .await
            .unwrap();
        store.record_skill_execution("deploy", true, 100.0).await.unwrap();
        let skill = store.record_skill_execution("deploy", false, 200.0).await.unwrap();
        assert_eq!(skill.execution_count, 2);
        assert!((skill.success_rate - 0.5).abs() < 1e-9);
        assert!((skill.avg_execution_time_ms.unwrap() - 150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn curation_skips_duplicate_semantic_concept() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .add_episodic_item("milestone", serde_json::json!({"k": "v"}), 0.9, None, vec![], None)
            .await
            .unwrap();
        let first = store.curate().await.unwrap();
        let second = store.curate().await.unwrap();
        assert_eq!(first.episodic_to_semantic, 1);
        assert_eq!(second.episodic_to_semantic, 0);
    }

    #[tokio::test]
    async fn delete_entity_cascades() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .create_entities(vec![new_entity("Gone", vec!["x"])])
            .await
            .unwrap();
        store.delete_entity("Gone").await.unwrap();
        let err = store.get_entity("Gone").await.unwrap_err();
        assert!(matches!(err, SubstrateError::NotFound(_)));
    }

    #[tokio::test]
    async fn retrieve_memories_orders_by_score() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .add_episodic_item("a", serde_json::json!({"text": "alpha"}), 0.4, None, vec![], None)
            .await
            .unwrap();
        store
            .add_episodic_item("b", serde_json::json!({"text": "beta"}), 0.4, None, vec![], None)
            .await
            .unwrap();
        let hits = store.retrieve_memories("alpha", 5).await.unwrap();
        assert!(!hits.is_empty());
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
