//! SQL schema for the memory service's SQLite store.
//!
//! Mirrors `enhanced-memory-mcp/server.py`'s `init_database`, minus the
//! `entities.compressed_data` column (never written by any surviving
//! handler — see `SPEC_FULL.md` §3).

use substrate_core::SubstrateResult;

pub fn init(conn: &rusqlite::Connection) -> SubstrateResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            entity_type TEXT NOT NULL,
            tier TEXT NOT NULL DEFAULT 'working',
            importance_score REAL NOT NULL DEFAULT 0.5,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (entity_id) REFERENCES entities(id)
        );

        CREATE TABLE IF NOT EXISTS entity_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL,
            version_number INTEGER NOT NULL,
            snapshot TEXT NOT NULL,
            created_at TEXT NOT NULL,
            commit_message TEXT,
            FOREIGN KEY (entity_id) REFERENCES entities(id)
        );

        CREATE TABLE IF NOT EXISTS working_memory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            context_key TEXT NOT NULL,
            content TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 5,
            ttl_minutes INTEGER NOT NULL DEFAULT 60,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            entity_id INTEGER,
            FOREIGN KEY (entity_id) REFERENCES entities(id)
        );

        CREATE TABLE IF NOT EXISTS episodic_memory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            episode_data TEXT NOT NULL,
            significance_score REAL NOT NULL DEFAULT 0.5,
            emotional_valence REAL,
            tags TEXT,
            created_at TEXT NOT NULL,
            entity_id INTEGER,
            FOREIGN KEY (entity_id) REFERENCES entities(id)
        );

        CREATE TABLE IF NOT EXISTS semantic_memory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            concept_name TEXT UNIQUE NOT NULL,
            concept_type TEXT NOT NULL,
            definition TEXT NOT NULL,
            related_concepts TEXT,
            confidence_score REAL NOT NULL DEFAULT 0.5,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS procedural_memory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            skill_name TEXT UNIQUE NOT NULL,
            skill_category TEXT NOT NULL,
            procedure_steps TEXT NOT NULL,
            preconditions TEXT,
            success_criteria TEXT,
            execution_count INTEGER NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0.0,
            avg_execution_time_ms REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
        CREATE INDEX IF NOT EXISTS idx_entities_tier ON entities(tier);
        CREATE INDEX IF NOT EXISTS idx_observations_entity ON observations(entity_id);
        CREATE INDEX IF NOT EXISTS idx_working_context ON working_memory(context_key);
        CREATE INDEX IF NOT EXISTS idx_episodic_type ON episodic_memory(event_type);",
    )?;
    Ok(())
}
