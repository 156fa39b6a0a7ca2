//! Environment-driven configuration, read once at process start.
//!
//! Mirrors `llm-council-mcp/backend/config.py` field for field: the same
//! variable names, the same defaults, the same "cli" provider mode.

use std::collections::HashMap;
use std::path::PathBuf;

/// Immutable configuration for a `CouncilService`, read once from the
/// environment at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider_mode: String,
    pub cli_council_models: Vec<String>,
    pub cli_chairman_model: String,
    pub provider_timeouts: HashMap<String, u64>,
    pub max_ranking_retries: u32,
    pub parallel_queries: bool,
    pub data_dir: PathBuf,
}

impl Config {
    /// Read configuration from the process environment, applying the
    /// defaults named in §6's configuration table.
    pub fn from_env() -> Self {
        let provider_mode = std::env::var("PROVIDER_MODE").unwrap_or_else(|_| "cli".to_string());

        let cli_council_models = std::env::var("CLI_COUNCIL_MODELS")
            .unwrap_or_else(|_| "claude,codex,gemini".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let cli_chairman_model =
            std::env::var("CLI_CHAIRMAN_MODEL").unwrap_or_else(|_| "codex".to_string());

        let mut provider_timeouts = HashMap::new();
        for (var, provider) in [
            ("CLAUDE_TIMEOUT", "claude"),
            ("CODEX_TIMEOUT", "codex"),
            ("GEMINI_TIMEOUT", "gemini"),
        ] {
            let secs = std::env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(120);
            provider_timeouts.insert(provider.to_string(), secs);
        }

        let max_ranking_retries = std::env::var("MAX_RANKING_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(2);

        let parallel_queries = std::env::var("PARALLEL_QUERIES")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        let data_dir = std::env::var("LLM_COUNCIL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".llm-council")
            });

        Self {
            provider_mode,
            cli_council_models,
            cli_chairman_model,
            provider_timeouts,
            max_ranking_retries,
            parallel_queries,
            data_dir,
        }
    }

    pub fn timeout_for(&self, provider: &str) -> u64 {
        self.provider_timeouts.get(provider).copied().unwrap_or(120)
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.data_dir.join("conversations")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
