//! Data model for the tiered memory engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The four retention tiers a memory entity can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Working,
    Episodic,
    Semantic,
    Procedural,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::Episodic => "episodic",
            Tier::Semantic => "semantic",
            Tier::Procedural => "procedural",
        }
    }

    pub fn parse(s: &str) -> Tier {
        match s {
            "episodic" => Tier::Episodic,
            "semantic" => Tier::Semantic,
            "procedural" => Tier::Procedural,
            _ => Tier::Working,
        }
    }

    /// Assign the initial tier from an importance score, per the §4.1 thresholds.
    pub fn from_importance(score: f64) -> Tier {
        if score >= 0.8 {
            Tier::Semantic
        } else if score >= 0.6 {
            Tier::Episodic
        } else {
            Tier::Working
        }
    }
}

/// A request to create one entity, as part of a creation batch.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

/// Outcome of successfully creating one entity.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedEntity {
    pub id: i64,
    pub name: String,
    pub tier: Tier,
    pub importance: f64,
}

/// Aggregate result of a `create_entities` batch call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateEntitiesOutcome {
    pub created: Vec<CreatedEntity>,
    pub errors: Vec<String>,
}

/// A memory entity with its ordered observations.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub entity_type: String,
    pub tier: Tier,
    pub importance_score: f64,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<HashMap<String, String>>,
    pub observations: Vec<String>,
}

/// Immutable snapshot stored by an `EntityVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityVersion {
    pub id: i64,
    pub entity_id: i64,
    pub version_number: i64,
    pub snapshot: EntitySnapshot,
    pub commit_message: String,
    pub created_at: DateTime<Utc>,
}

/// Result of comparing two versions of the same entity.
#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub v1: i64,
    pub v2: i64,
    pub added_observations: Vec<String>,
    pub removed_observations: Vec<String>,
    pub v1_snapshot: EntitySnapshot,
    pub v2_snapshot: EntitySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkingMemoryItem {
    pub id: i64,
    pub context_key: String,
    pub content: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: i64,
    pub entity_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpisodicItem {
    pub id: i64,
    pub event_type: String,
    pub episode_data: serde_json::Value,
    pub significance: f64,
    pub emotional_valence: Option<f64>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub entity_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticConcept {
    pub id: i64,
    pub concept_name: String,
    pub concept_type: String,
    pub definition: String,
    pub related_concepts: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProceduralSkill {
    pub id: i64,
    pub skill_name: String,
    pub skill_category: String,
    pub procedure_steps: Vec<String>,
    pub preconditions: Option<String>,
    pub success_criteria: Option<String>,
    pub execution_count: i64,
    pub success_rate: f64,
    pub avg_execution_time_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counts returned by a single `curate` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CurationReport {
    pub expired_working_removed: u64,
    pub working_to_episodic: u64,
    pub episodic_to_semantic: u64,
}

/// Counts-per-tier/class plus a health marker, returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub entities_by_tier: HashMap<String, i64>,
    pub working_memory_count: i64,
    pub episodic_memory_count: i64,
    pub semantic_memory_count: i64,
    pub procedural_memory_count: i64,
    pub total_versions: i64,
    pub status: String,
}

/// One scored hit from `retrieve_memories`, spanning any memory class.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityHit {
    pub class: String,
    pub id: i64,
    pub content: String,
    pub score: f32,
}
