mod cli;
mod commands;

use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays clean JSON for scripting, per the
    // CLI-surface contract in SPEC_FULL.md §7.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli.execute().await {
        let payload = serde_json::json!({ "error": err.to_string() });
        eprintln!("{payload}");
        std::process::exit(1);
    }
}
