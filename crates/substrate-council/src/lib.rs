//! substrate-council - the multi-provider CLI deliberation council.
//!
//! Wraps three CLI-based LLM providers (`claude`, `codex`, `gemini`) as a
//! single capability: spawn, await under a deadline, collect UTF-8 text.
//! The three-stage protocol and nine named patterns are built entirely on
//! top of that primitive — no provider ever needs special-casing outside
//! [`provider`] and [`council::stage3_synthesize_final`]'s gemini prompt
//! transform.

pub mod config;
pub mod council;
pub mod patterns;
pub mod provider;

pub use config::Config;
pub use council::CouncilRun;
pub use patterns::{PatternInfo, PatternRun};
pub use provider::ProviderResult;

/// The council's public surface: every operation named in spec §4.3.
pub struct CouncilService {
    config: Config,
}

impl CouncilService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get_available_providers(&self) -> Vec<String> {
        provider::get_available_providers()
    }

    pub async fn query(
        &self,
        provider: &str,
        prompt: &str,
        timeout: Option<u64>,
    ) -> ProviderResult {
        provider::query(&self.config, provider, prompt, timeout).await
    }

    pub async fn query_parallel(
        &self,
        providers: &[String],
        prompt: &str,
        timeout: Option<u64>,
    ) -> Vec<(String, ProviderResult)> {
        provider::query_parallel(&self.config, providers, prompt, timeout).await
    }

    pub async fn run_full_council(
        &self,
        question: &str,
        council_models: Option<Vec<String>>,
        chairman_model: Option<String>,
    ) -> CouncilRun {
        council::run_full_council(&self.config, question, council_models, chairman_model).await
    }

    pub fn save_conversation(
        &self,
        question: &str,
        result: &CouncilRun,
    ) -> std::io::Result<std::path::PathBuf> {
        council::save_conversation(&self.config, question, result)
    }

    pub fn list_patterns(&self) -> Vec<PatternInfo> {
        patterns::list_patterns()
    }

    pub async fn run_pattern(
        &self,
        pattern_id: &str,
        question: &str,
        models: Option<Vec<String>>,
        rounds: u32,
        branches: u32,
    ) -> Result<PatternRun, String> {
        patterns::run_pattern(&self.config, pattern_id, question, models, rounds, branches).await
    }
}
