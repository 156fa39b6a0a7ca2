use clap::{Parser, Subcommand};

use crate::commands;

/// substratectl - local exerciser for the memory engine, agent runtime, and
/// deliberation council services.
///
/// This is not the MCP transport (out of scope per spec §1): it is the
/// ambient "does this actually run" surface every one of the three
/// services carries, adapting their plain async methods to a CLI the way
/// a future MCP adapter would adapt them to JSON-RPC.
#[derive(Parser, Debug)]
#[command(name = "substratectl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tiered memory engine: entities, working/episodic/semantic/procedural
    /// memory, curation, similarity search
    Memory {
        /// Path to the SQLite database (defaults to
        /// $HOME/.claude/enhanced_memory_oss/memory.db)
        #[arg(long, global = true, env = "SUBSTRATE_MEMORY_DB")]
        db: Option<String>,

        #[command(subcommand)]
        command: commands::memory::MemoryCommands,
    },

    /// Agent runtime: goals, tasks, relay pipelines, circuit breakers
    Runtime {
        /// Path to the SQLite database (defaults to
        /// $HOME/.claude/agent_runtime_oss/runtime.db)
        #[arg(long, global = true, env = "SUBSTRATE_RUNTIME_DB")]
        db: Option<String>,

        #[command(subcommand)]
        command: commands::runtime::RuntimeCommands,
    },

    /// LLM deliberation council: providers, three-stage deliberation, the
    /// nine named patterns
    Council {
        #[command(subcommand)]
        command: commands::council::CouncilCommands,
    },

    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: commands::completion::Shell,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Memory { db, command } => {
                let store = open_memory_store(db)?;
                commands::memory::execute(&store, command).await
            }
            Commands::Runtime { db, command } => {
                let store = open_runtime_store(db)?;
                commands::runtime::execute(&store, command).await
            }
            Commands::Council { command } => {
                let service = substrate_council::CouncilService::from_env();
                commands::council::execute(&service, command).await
            }
            Commands::Completion { shell } => commands::completion::execute(shell),
        }
    }
}

fn open_memory_store(db: Option<String>) -> anyhow::Result<substrate_memory::MemoryStore> {
    let path = db
        .map(std::path::PathBuf::from)
        .unwrap_or_else(substrate_memory::MemoryStore::default_path);
    substrate_memory::MemoryStore::open(&path).map_err(|e| anyhow::anyhow!(e.to_string()))
}

fn open_runtime_store(db: Option<String>) -> anyhow::Result<substrate_runtime::RuntimeStore> {
    let path = db
        .map(std::path::PathBuf::from)
        .unwrap_or_else(substrate_runtime::RuntimeStore::default_path);
    substrate_runtime::RuntimeStore::open(&path).map_err(|e| anyhow::anyhow!(e.to_string()))
}
