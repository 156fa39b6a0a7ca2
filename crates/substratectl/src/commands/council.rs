//! `substratectl council ...` - exercises `substrate-council::CouncilService`.

use clap::Subcommand;
use substrate_council::CouncilService;

#[derive(Subcommand, Debug)]
pub enum CouncilCommands {
    /// List CLI providers whose binary is present on PATH
    Providers,
    /// Query a single provider directly
    Query {
        provider: String,
        prompt: String,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run the full three-stage council (propose, rank, synthesize) and save the transcript
    Deliberate {
        question: String,
        #[arg(long = "model")]
        models: Vec<String>,
        #[arg(long)]
        chairman: Option<String>,
        /// Skip writing the conversation transcript to disk
        #[arg(long)]
        no_save: bool,
    },
    /// List the nine named deliberation patterns
    Patterns,
    /// Run one named pattern
    RunPattern {
        pattern_id: String,
        question: String,
        #[arg(long = "model")]
        models: Vec<String>,
        #[arg(long, default_value_t = 2)]
        rounds: u32,
        #[arg(long, default_value_t = 3)]
        branches: u32,
    },
}

pub async fn execute(service: &CouncilService, cmd: CouncilCommands) -> anyhow::Result<()> {
    match cmd {
        CouncilCommands::Providers => print_json(&service.get_available_providers()),
        CouncilCommands::Query {
            provider,
            prompt,
            timeout,
        } => print_json(&service.query(&provider, &prompt, timeout).await),
        CouncilCommands::Deliberate {
            question,
            models,
            chairman,
            no_save,
        } => {
            let models = (!models.is_empty()).then_some(models);
            let run = service.run_full_council(&question, models, chairman).await;
            if !no_save {
                match service.save_conversation(&question, &run) {
                    Ok(path) => eprintln!("saved transcript to {}", path.display()),
                    Err(e) => eprintln!("warning: failed to save transcript: {e}"),
                }
            }
            print_json(&run)
        }
        CouncilCommands::Patterns => print_json(&service.list_patterns()),
        CouncilCommands::RunPattern {
            pattern_id,
            question,
            models,
            rounds,
            branches,
        } => {
            let models = (!models.is_empty()).then_some(models);
            let run = service
                .run_pattern(&pattern_id, &question, models, rounds, branches)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            print_json(&run)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
