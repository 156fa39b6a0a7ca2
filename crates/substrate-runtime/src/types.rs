//! Data model for the agent runtime: goals, tasks, relay pipelines, and
//! circuit breakers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    Cancelled,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Completed => "completed",
            GoalStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> GoalStatus {
        match s {
            "completed" => GoalStatus::Completed,
            "cancelled" => GoalStatus::Cancelled,
            _ => GoalStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> TaskStatus {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Goal {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: GoalStatus,
    pub metadata: Option<HashMap<String, String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

/// Per-status task counts for one goal, used by `list_goals`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TaskStatusHistogram {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub task_histogram: TaskStatusHistogram,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub goal_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub dependencies: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Decomposition strategies named in §4.2's template table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecomposeStrategy {
    Sequential,
    Parallel,
    Hierarchical,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecomposeOutcome {
    pub task_ids: Vec<i64>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::InProgress => "in_progress",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> PipelineStatus {
        match s {
            "in_progress" => PipelineStatus::InProgress,
            "completed" => PipelineStatus::Completed,
            "failed" => PipelineStatus::Failed,
            _ => PipelineStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayPipeline {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub agent_types: Vec<String>,
    pub status: PipelineStatus,
    pub current_step: i64,
    pub token_budget: i64,
    pub tokens_used: i64,
    pub baton_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> StepStatus {
        match s {
            "in_progress" => StepStatus::InProgress,
            "completed" => StepStatus::Completed,
            "failed" => StepStatus::Failed,
            _ => StepStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStep {
    pub pipeline_id: String,
    pub step_index: i64,
    pub agent_type: String,
    pub status: StepStatus,
    pub quality_score: Option<f64>,
    pub l_score: Option<f64>,
    pub output_entity_id: Option<i64>,
    pub tokens_used: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The opaque baton handed from one relay step to the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baton {
    pub previous_step: i64,
    pub quality_score: f64,
    pub l_score: f64,
    pub output_entity_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Result of `get_relay_baton`.
#[derive(Debug, Clone, Serialize)]
pub struct RelayBatonView {
    pub current_agent: Option<String>,
    pub tokens_remaining: i64,
    pub baton: Option<Baton>,
}

/// Result of `advance_relay`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Completed {
        total_tokens: i64,
        handoff_time_ms: u64,
    },
    InProgress {
        current_step: i64,
        next_agent: String,
        tokens_remaining: i64,
        handoff_time_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    pub fn parse(s: &str) -> BreakerState {
        match s {
            "open" => BreakerState::Open,
            "half_open" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreaker {
    pub agent_id: String,
    pub state: BreakerState,
    pub failure_count: i64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub failure_threshold: i64,
    pub window_seconds: i64,
    pub cooldown_seconds: i64,
    pub fallback_agent: Option<String>,
}

impl CircuitBreaker {
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
            failure_threshold: 5,
            window_seconds: 60,
            cooldown_seconds: 300,
            fallback_agent: None,
        }
    }
}
