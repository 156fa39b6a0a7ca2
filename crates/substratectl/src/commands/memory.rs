//! `substratectl memory ...` - exercises `substrate-memory::MemoryStore`.

use clap::Subcommand;
use substrate_memory::{MemoryStore, NewEntity};

#[derive(Subcommand, Debug)]
pub enum MemoryCommands {
    /// Create one entity in episodic/working-adjacent storage
    CreateEntity {
        name: String,
        entity_type: String,
        #[arg(long = "observation")]
        observations: Vec<String>,
    },
    /// Fetch a single entity by name
    GetEntity { name: String },
    /// Delete an entity (also removes its version history)
    DeleteEntity { name: String },
    /// Full-text search over entity names/observations
    SearchEntities {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Diff two versions of an entity (defaults: latest vs latest-1)
    Diff {
        name: String,
        #[arg(long)]
        v1: Option<i64>,
        #[arg(long)]
        v2: Option<i64>,
    },
    /// Push an item into working memory with a TTL
    AddWorking {
        context_key: String,
        content: String,
        #[arg(long, default_value_t = 5)]
        priority: i32,
        #[arg(long, default_value_t = 60)]
        ttl_minutes: i64,
        #[arg(long)]
        entity_id: Option<i64>,
    },
    /// List working memory items, optionally scoped to a context key
    GetWorking {
        #[arg(long)]
        context_key: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Record an episodic memory item
    AddEpisodic {
        event_type: String,
        #[arg(long, default_value = "{}")]
        episode_data: String,
        #[arg(long, default_value_t = 0.5)]
        significance: f64,
        #[arg(long)]
        emotional_valence: Option<f64>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        entity_id: Option<i64>,
    },
    /// List episodic memory items, optionally scoped to an event type
    GetEpisodic {
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Run one curation pass (working -> episodic -> semantic promotion)
    Curate,
    /// Cosine-similarity search across all four memory classes
    Retrieve {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print per-tier counts and database size
    Status,
}

pub async fn execute(store: &MemoryStore, cmd: MemoryCommands) -> anyhow::Result<()> {
    match cmd {
        MemoryCommands::CreateEntity {
            name,
            entity_type,
            observations,
        } => {
            let outcome = store
                .create_entities(vec![NewEntity {
                    name,
                    entity_type,
                    observations,
                    metadata: None,
                }])
                .await?;
            print_json(&outcome)
        }
        MemoryCommands::GetEntity { name } => print_json(&store.get_entity(&name).await?),
        MemoryCommands::DeleteEntity { name } => {
            store.delete_entity(&name).await?;
            println!("deleted {name}");
            Ok(())
        }
        MemoryCommands::SearchEntities { query, limit } => {
            print_json(&store.search_entities(&query, limit).await?)
        }
        MemoryCommands::Diff { name, v1, v2 } => print_json(&store.diff(&name, v1, v2).await?),
        MemoryCommands::AddWorking {
            context_key,
            content,
            priority,
            ttl_minutes,
            entity_id,
        } => print_json(
            &store
                .add_working_item(&context_key, &content, priority, ttl_minutes, entity_id)
                .await?,
        ),
        MemoryCommands::GetWorking { context_key, limit } => {
            print_json(&store.get_working_items(context_key.as_deref(), limit).await?)
        }
        MemoryCommands::AddEpisodic {
            event_type,
            episode_data,
            significance,
            emotional_valence,
            tags,
            entity_id,
        } => {
            let episode_data = serde_json::from_str(&episode_data)?;
            print_json(
                &store
                    .add_episodic_item(&event_type, episode_data, significance, emotional_valence, tags, entity_id)
                    .await?,
            )
        }
        MemoryCommands::GetEpisodic { event_type, limit } => print_json(
            &store
                .get_episodic_items(event_type.as_deref(), limit)
                .await?,
        ),
        MemoryCommands::Curate => print_json(&store.curate().await?),
        MemoryCommands::Retrieve { query, limit } => {
            print_json(&store.retrieve_memories(&query, limit).await?)
        }
        MemoryCommands::Status => print_json(&store.status().await?),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
