//! CLI provider descriptors and subprocess query primitives.
//!
//! Grounded on `llm-council-mcp/backend/cli_providers.py`'s `PROVIDERS`
//! table and `query_cli_provider`, and on `aof-tools::ShellTool`'s
//! spawn-capture-timeout shape for the subprocess plumbing itself.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;

/// A CLI-based LLM provider: a binary, an argument template with a
/// `{prompt}` slot, and an optional environment override.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub command: &'static str,
    pub args_template: &'static [&'static str],
    pub env_override: &'static [(&'static str, &'static str)],
}

/// The normative provider table from §6.
pub const PROVIDERS: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        name: "claude",
        command: "claude",
        args_template: &["-p", "{prompt}", "--print"],
        env_override: &[("ANTHROPIC_API_KEY", "")],
    },
    ProviderDescriptor {
        name: "codex",
        command: "codex",
        args_template: &["{prompt}"],
        env_override: &[],
    },
    ProviderDescriptor {
        name: "gemini",
        command: "gemini",
        args_template: &["-p", "{prompt}"],
        env_override: &[],
    },
];

pub fn descriptor(name: &str) -> Option<&'static ProviderDescriptor> {
    PROVIDERS.iter().find(|p| p.name == name)
}

/// Providers whose binary is present on `PATH`.
pub fn get_available_providers() -> Vec<String> {
    PROVIDERS
        .iter()
        .filter(|p| which::which(p.command).is_ok())
        .map(|p| p.name.to_string())
        .collect()
}

/// The outcome of a single provider query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderResult {
    pub content: Option<String>,
    pub error: Option<String>,
}

impl ProviderResult {
    fn ok(content: String) -> Self {
        Self {
            content: Some(content),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            content: None,
            error: Some(message.into()),
        }
    }
}

/// Strip lines that both start with `/` and contain a `.`, per §4.3's
/// gemini-specific transformation (avoids inadvertent path interpretation).
fn transform_gemini_prompt(prompt: &str) -> String {
    prompt
        .lines()
        .filter(|line| !(line.trim_start().starts_with('/') && line.contains('.')))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Query a single provider, honoring `min(timeout, provider_default)`.
pub async fn query(
    config: &Config,
    provider: &str,
    prompt: &str,
    timeout_override: Option<u64>,
) -> ProviderResult {
    let Some(desc) = descriptor(provider) else {
        return ProviderResult::err(format!("Unknown provider: {provider}"));
    };

    if which::which(desc.command).is_err() {
        return ProviderResult::err(format!("{provider} CLI not installed"));
    }

    let prompt = if provider == "gemini" {
        transform_gemini_prompt(prompt)
    } else {
        prompt.to_string()
    };

    let args: Vec<String> = desc
        .args_template
        .iter()
        .map(|a| a.replace("{prompt}", &prompt))
        .collect();

    let mut cmd = Command::new(desc.command);
    cmd.args(&args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // On timeout the output-collecting future is dropped without an explicit
    // kill; kill_on_drop makes that drop tear down the child instead of
    // leaking an orphaned provider process (spec §5, "the subprocess tree
    // is killed").
    cmd.kill_on_drop(true);
    let env_override: HashMap<&str, &str> = desc.env_override.iter().copied().collect();
    for (key, value) in &env_override {
        cmd.env(key, value);
    }

    let default_timeout = config.timeout_for(provider);
    let actual_timeout = timeout_override.unwrap_or(default_timeout).min(default_timeout);

    info!(provider, timeout = actual_timeout, "querying provider");

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ProviderResult::err(format!("failed to spawn {provider}: {e}")),
    };

    match timeout(Duration::from_secs(actual_timeout), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let message = if stderr.trim().is_empty() {
                    format!("exit code {}", output.status.code().unwrap_or(-1))
                } else {
                    stderr
                };
                warn!(provider, error = %message, "provider returned an error");
                ProviderResult::err(message)
            } else {
                let content = String::from_utf8_lossy(&output.stdout).trim().to_string();
                info!(provider, chars = content.len(), "provider responded");
                ProviderResult::ok(content)
            }
        }
        Ok(Err(e)) => ProviderResult::err(format!("{provider} execution failed: {e}")),
        Err(_) => {
            warn!(provider, timeout = actual_timeout, "provider timed out");
            ProviderResult::err(format!("Timeout after {actual_timeout}s"))
        }
    }
}

/// Launch all queries concurrently and wait for all; results preserve
/// input order per §4.3 ("Ordering of results is by input order").
pub async fn query_parallel(
    config: &Config,
    providers: &[String],
    prompt: &str,
    timeout_override: Option<u64>,
) -> Vec<(String, ProviderResult)> {
    let futures = providers
        .iter()
        .map(|p| async move { (p.clone(), query(config, p, prompt, timeout_override).await) });
    futures::future::join_all(futures).await
}
