//! `substratectl runtime ...` - exercises `substrate-runtime::RuntimeStore`.

use clap::Subcommand;
use substrate_runtime::{DecomposeStrategy, GoalStatus, RuntimeStore, TaskStatus};

#[derive(Subcommand, Debug)]
pub enum RuntimeCommands {
    /// Create a goal
    CreateGoal {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Fetch a goal and its tasks
    GetGoal { id: i64 },
    /// List goals, optionally filtered by status (active|completed|cancelled)
    ListGoals {
        #[arg(long)]
        status: Option<String>,
    },
    /// Create a task, optionally attached to a goal and gated on dependencies
    CreateTask {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        goal_id: Option<i64>,
        #[arg(long, default_value_t = 5)]
        priority: i32,
        #[arg(long = "depends-on")]
        dependencies: Vec<i64>,
    },
    /// List tasks, optionally filtered by goal and/or status
    ListTasks {
        #[arg(long)]
        goal_id: Option<i64>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Expand a goal into its fixed task template (sequential|parallel|hierarchical)
    Decompose {
        goal_id: i64,
        #[arg(long, default_value = "sequential")]
        strategy: String,
    },
    /// Dequeue the next eligible pending task, honoring dependency gating
    NextTask,
    /// Transition a task's status
    UpdateTask {
        id: i64,
        status: String,
        #[arg(long)]
        error: Option<String>,
    },
    /// Create a relay pipeline over an ordered list of agent types
    CreateRelay {
        name: String,
        goal: String,
        #[arg(long = "agent")]
        agent_types: Vec<String>,
        #[arg(long, default_value_t = 100_000)]
        token_budget: i64,
    },
    /// Fetch a pipeline and its steps
    GetRelay { id: String },
    /// Fetch the current baton for a pipeline
    GetBaton { id: String },
    /// Complete the current step and hand off to the next agent (or finish)
    AdvanceRelay {
        id: String,
        #[arg(long)]
        quality_score: f64,
        #[arg(long)]
        l_score: f64,
        #[arg(long)]
        output_entity_id: i64,
        #[arg(long)]
        tokens_used: i64,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Fetch a single agent's circuit breaker state
    BreakerStatus { agent_id: String },
    /// List every circuit breaker
    ListBreakers,
    /// Record a failure against an agent's circuit breaker
    RecordFailure {
        agent_id: String,
        #[arg(long, default_value = "error")]
        failure_type: String,
        #[arg(long, default_value = "")]
        error_message: String,
    },
    /// Record a success against an agent's circuit breaker
    RecordSuccess { agent_id: String },
    /// Force-reset a circuit breaker to closed
    ResetBreaker { agent_id: String },
}

pub async fn execute(store: &RuntimeStore, cmd: RuntimeCommands) -> anyhow::Result<()> {
    match cmd {
        RuntimeCommands::CreateGoal { name, description } => {
            print_json(&store.create_goal(&name, description, None).await?)
        }
        RuntimeCommands::GetGoal { id } => print_json(&store.get_goal(id).await?),
        RuntimeCommands::ListGoals { status } => {
            print_json(&store.list_goals(status.as_deref().map(parse_goal_status).transpose()?).await?)
        }
        RuntimeCommands::CreateTask {
            title,
            description,
            goal_id,
            priority,
            dependencies,
        } => print_json(
            &store
                .create_task(&title, description, goal_id, priority, dependencies)
                .await?,
        ),
        RuntimeCommands::ListTasks { goal_id, status } => print_json(
            &store
                .list_tasks(goal_id, status.as_deref().map(parse_task_status).transpose()?)
                .await?,
        ),
        RuntimeCommands::Decompose { goal_id, strategy } => {
            print_json(&store.decompose_goal(goal_id, parse_strategy(&strategy)?).await?)
        }
        RuntimeCommands::NextTask => print_json(&store.get_next_task().await?),
        RuntimeCommands::UpdateTask { id, status, error } => print_json(
            &store
                .update_task_status(id, parse_task_status(&status)?, None, error)
                .await?,
        ),
        RuntimeCommands::CreateRelay {
            name,
            goal,
            agent_types,
            token_budget,
        } => print_json(
            &store
                .create_relay_pipeline(&name, &goal, agent_types, token_budget)
                .await?,
        ),
        RuntimeCommands::GetRelay { id } => print_json(&store.get_pipeline(&id).await?),
        RuntimeCommands::GetBaton { id } => print_json(&store.get_relay_baton(&id).await?),
        RuntimeCommands::AdvanceRelay {
            id,
            quality_score,
            l_score,
            output_entity_id,
            tokens_used,
            summary,
        } => print_json(
            &store
                .advance_relay(&id, quality_score, l_score, output_entity_id, tokens_used, summary)
                .await?,
        ),
        RuntimeCommands::BreakerStatus { agent_id } => print_json(&store.status(&agent_id).await?),
        RuntimeCommands::ListBreakers => print_json(&store.list_breakers().await?),
        RuntimeCommands::RecordFailure {
            agent_id,
            failure_type,
            error_message,
        } => print_json(&store.record_failure(&agent_id, &failure_type, &error_message).await?),
        RuntimeCommands::RecordSuccess { agent_id } => {
            print_json(&store.record_success(&agent_id).await?)
        }
        RuntimeCommands::ResetBreaker { agent_id } => print_json(&store.reset(&agent_id).await?),
    }
}

fn parse_strategy(s: &str) -> anyhow::Result<DecomposeStrategy> {
    match s {
        "sequential" => Ok(DecomposeStrategy::Sequential),
        "parallel" => Ok(DecomposeStrategy::Parallel),
        "hierarchical" => Ok(DecomposeStrategy::Hierarchical),
        other => Err(anyhow::anyhow!("unknown strategy '{other}' (want sequential|parallel|hierarchical)")),
    }
}

fn parse_goal_status(s: &str) -> anyhow::Result<GoalStatus> {
    match s {
        "active" => Ok(GoalStatus::Active),
        "completed" => Ok(GoalStatus::Completed),
        "cancelled" => Ok(GoalStatus::Cancelled),
        other => Err(anyhow::anyhow!("unknown goal status '{other}'")),
    }
}

fn parse_task_status(s: &str) -> anyhow::Result<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "in_progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(anyhow::anyhow!("unknown task status '{other}'")),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
