//! SQL schema for the agent runtime's SQLite store.

use substrate_core::SubstrateResult;

pub fn init(conn: &rusqlite::Connection) -> SubstrateResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            goal_id INTEGER,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 5,
            result TEXT,
            error TEXT,
            dependencies TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            FOREIGN KEY (goal_id) REFERENCES goals(id)
        );

        CREATE TABLE IF NOT EXISTS relay_pipelines (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            goal TEXT NOT NULL,
            agent_types TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            current_step INTEGER NOT NULL DEFAULT 0,
            token_budget INTEGER NOT NULL,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            baton_data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS relay_steps (
            pipeline_id TEXT NOT NULL,
            step_index INTEGER NOT NULL,
            agent_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            quality_score REAL,
            l_score REAL,
            output_entity_id INTEGER,
            tokens_used INTEGER,
            started_at TEXT,
            completed_at TEXT,
            PRIMARY KEY (pipeline_id, step_index),
            FOREIGN KEY (pipeline_id) REFERENCES relay_pipelines(id)
        );

        CREATE TABLE IF NOT EXISTS circuit_breakers (
            agent_id TEXT PRIMARY KEY,
            state TEXT NOT NULL DEFAULT 'closed',
            failure_count INTEGER NOT NULL DEFAULT 0,
            last_failure_at TEXT,
            last_success_at TEXT,
            opened_at TEXT,
            failure_threshold INTEGER NOT NULL DEFAULT 5,
            window_seconds INTEGER NOT NULL DEFAULT 60,
            cooldown_seconds INTEGER NOT NULL DEFAULT 300,
            fallback_agent TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_goal_id ON tasks(goal_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_relay_steps_pipeline_id ON relay_steps(pipeline_id);",
    )?;
    Ok(())
}
