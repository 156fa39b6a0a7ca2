//! The nine named deliberation patterns, each a distinct orchestration
//! over the provider primitives in [`crate::provider`].
//!
//! Grounded on `llm-council-mcp/backend/patterns.py`.

use serde::Serialize;

use crate::config::Config;
use crate::council;
use crate::provider::{query, query_parallel};

#[derive(Debug, Clone, Serialize)]
pub struct PatternInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub stages: &'static [&'static str],
    pub recommended_for: &'static [&'static str],
}

pub const PATTERNS: &[PatternInfo] = &[
    PatternInfo {
        id: "deliberation",
        name: "Standard Deliberation",
        description: "3-stage process: respond, rank, synthesize",
        stages: &["collect_responses", "peer_ranking", "synthesis"],
        recommended_for: &["general questions", "balanced analysis", "consensus building"],
    },
    PatternInfo {
        id: "debate",
        name: "Adversarial Debate",
        description: "Models argue different positions, chairman judges",
        stages: &["opening_arguments", "rebuttals", "judgment"],
        recommended_for: &["controversial topics", "exploring tradeoffs", "decision making"],
    },
    PatternInfo {
        id: "devils_advocate",
        name: "Devil's Advocate",
        description: "One model challenges the consensus of others",
        stages: &["initial_consensus", "challenge", "defense"],
        recommended_for: &["testing assumptions", "finding flaws", "stress testing ideas"],
    },
    PatternInfo {
        id: "socratic",
        name: "Socratic Dialogue",
        description: "Progressive questioning to deepen understanding",
        stages: &["initial_response", "questioning_rounds"],
        recommended_for: &["complex topics", "educational content", "deep exploration"],
    },
    PatternInfo {
        id: "red_team",
        name: "Red Team Analysis",
        description: "Focused on finding vulnerabilities and issues",
        stages: &["proposal", "attack", "recommendations"],
        recommended_for: &["security analysis", "risk assessment", "code review"],
    },
    PatternInfo {
        id: "tree_of_thought",
        name: "Tree of Thought",
        description: "Explore multiple solution branches in parallel",
        stages: &["branch_generation", "evaluation"],
        recommended_for: &["problem solving", "creative tasks", "optimization"],
    },
    PatternInfo {
        id: "self_consistency",
        name: "Self-Consistency",
        description: "Multiple independent attempts, aggregate results",
        stages: &["parallel_attempts", "consistency_check"],
        recommended_for: &["factual questions", "calculations", "verification"],
    },
    PatternInfo {
        id: "round_robin",
        name: "Round Robin",
        description: "Sequential refinement by each model",
        stages: &["initial", "refinement_rounds"],
        recommended_for: &["iterative improvement", "collaborative writing", "code refinement"],
    },
    PatternInfo {
        id: "expert_panel",
        name: "Expert Panel",
        description: "Models take domain-specific expert roles",
        stages: &["role_assignment", "expert_opinions", "integration"],
        recommended_for: &["multi-disciplinary topics", "comprehensive analysis", "technical decisions"],
    },
];

pub fn list_patterns() -> Vec<PatternInfo> {
    PATTERNS.to_vec()
}

/// Fixed expert roles assigned in `expert_panel`, cycled over the
/// provider list in order.
const EXPERT_ROLES: &[&str] = &["Technical", "Business", "Critical", "Innovation"];

#[derive(Debug, Clone, Serialize)]
pub struct PatternRun {
    pub pattern_id: String,
    pub stages: serde_json::Value,
    pub final_answer: Option<String>,
}

async fn chairman_of(config: &Config, models: &[String]) -> String {
    if models.iter().any(|m| m == &config.cli_chairman_model) {
        config.cli_chairman_model.clone()
    } else {
        models.first().cloned().unwrap_or_else(|| config.cli_chairman_model.clone())
    }
}

fn models_or_default(config: &Config, models: Option<Vec<String>>) -> Vec<String> {
    models.unwrap_or_else(|| config.cli_council_models.clone())
}

/// Execute a named pattern. `rounds` (default 2) and `branches`
/// (default 3) parameterize `socratic`/`round_robin` and
/// `tree_of_thought`/`self_consistency` respectively, per SPEC_FULL §4.3.
pub async fn run_pattern(
    config: &Config,
    pattern_id: &str,
    question: &str,
    models: Option<Vec<String>>,
    rounds: u32,
    branches: u32,
) -> Result<PatternRun, String> {
    let models = models_or_default(config, models);
    if models.is_empty() {
        return Err("no models configured".to_string());
    }

    match pattern_id {
        "deliberation" => {
            let run = council::run_full_council(config, question, Some(models), None).await;
            Ok(PatternRun {
                pattern_id: pattern_id.to_string(),
                stages: serde_json::to_value(&run).unwrap(),
                final_answer: run.stage3,
            })
        }
        "debate" => run_debate(config, question, &models).await,
        "devils_advocate" => run_devils_advocate(config, question, &models).await,
        "socratic" => run_socratic(config, question, &models, rounds).await,
        "red_team" => run_red_team(config, question, &models).await,
        "tree_of_thought" => run_tree_of_thought(config, question, &models, branches).await,
        "self_consistency" => run_self_consistency(config, question, &models, rounds).await,
        "round_robin" => run_round_robin(config, question, &models, rounds).await,
        "expert_panel" => run_expert_panel(config, question, &models).await,
        other => Err(format!("unknown pattern: {other}")),
    }
}

async fn run_debate(config: &Config, question: &str, models: &[String]) -> Result<PatternRun, String> {
    let opening_prompt = format!("Argue your position on: {question}\n\nState your strongest case.");
    let openings = query_parallel(config, models, &opening_prompt, None).await;

    let all_openings: String = openings
        .iter()
        .map(|(m, r)| format!("### {m}\n{}\n", r.content.clone().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n");

    let rebuttal_prompt =
        format!("Original question: {question}\n\nOpening arguments from all participants:\n\n{all_openings}\n\nProvide your rebuttal, addressing the strongest counter-arguments.");
    let rebuttals = query_parallel(config, models, &rebuttal_prompt, None).await;

    let chairman = chairman_of(config, models).await;
    let all_rebuttals: String = rebuttals
        .iter()
        .map(|(m, r)| format!("### {m}\n{}\n", r.content.clone().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n");
    let judgment_prompt = format!(
        "You are judging a debate on: {question}\n\nOpening arguments:\n\n{all_openings}\n\nRebuttals:\n\n{all_rebuttals}\n\nRender your judgment on who made the stronger case and why."
    );
    let judgment = query(config, &chairman, &judgment_prompt, None).await;

    Ok(PatternRun {
        pattern_id: "debate".to_string(),
        stages: serde_json::json!({
            "opening_arguments": named(&openings),
            "rebuttals": named(&rebuttals),
            "chairman": chairman,
        }),
        final_answer: judgment.content,
    })
}

async fn run_devils_advocate(
    config: &Config,
    question: &str,
    models: &[String],
) -> Result<PatternRun, String> {
    if models.len() < 2 {
        return Err("devils_advocate requires at least two models".to_string());
    }
    let (challenger, rest) = models.split_first().unwrap();
    let rest = rest.to_vec();

    let consensus_prompt = format!("Provide your answer to: {question}");
    let consensus = query_parallel(config, &rest, &consensus_prompt, None).await;

    let consensus_text: String = consensus
        .iter()
        .map(|(m, r)| format!("### {m}\n{}\n", r.content.clone().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n");
    let challenge_prompt = format!(
        "You are a devil's advocate. The following is the consensus view on: {question}\n\n{consensus_text}\n\nChallenge this consensus: identify its weaknesses, hidden assumptions, and failure modes."
    );
    let challenge = query(config, challenger, &challenge_prompt, None).await;

    let defense_prompt = format!(
        "Your earlier answer on \"{question}\" was challenged as follows:\n\n{}\n\nDefend or revise your position.",
        challenge.content.clone().unwrap_or_default()
    );
    let defense = query_parallel(config, &rest, &defense_prompt, None).await;

    Ok(PatternRun {
        pattern_id: "devils_advocate".to_string(),
        stages: serde_json::json!({
            "initial_consensus": named(&consensus),
            "challenger": challenger,
            "challenge": challenge.content,
            "defense": named(&defense),
        }),
        final_answer: None,
    })
}

async fn run_socratic(
    config: &Config,
    question: &str,
    models: &[String],
    rounds: u32,
) -> Result<PatternRun, String> {
    let chairman = chairman_of(config, models).await;
    let initial_prompt = format!("Provide an initial answer to: {question}");
    let mut current = query_parallel(config, models, &initial_prompt, None).await;
    let mut round_log = Vec::new();

    for round in 0..rounds.max(1) {
        let answers_text: String = current
            .iter()
            .map(|(m, r)| format!("### {m}\n{}\n", r.content.clone().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("\n");
        let question_prompt = format!(
            "Round {}: The following are answers to \"{question}\":\n\n{answers_text}\n\nAsk probing questions that would deepen or challenge this understanding.",
            round + 1
        );
        let probing = query(config, &chairman, &question_prompt, None).await;

        let refine_prompt = format!(
            "Refine your earlier answer to \"{question}\" in light of these probing questions:\n\n{}",
            probing.content.clone().unwrap_or_default()
        );
        current = query_parallel(config, models, &refine_prompt, None).await;

        round_log.push(serde_json::json!({
            "round": round + 1,
            "questions": probing.content,
            "refinements": named(&current),
        }));
    }

    Ok(PatternRun {
        pattern_id: "socratic".to_string(),
        stages: serde_json::json!({ "rounds": round_log, "chairman": chairman }),
        final_answer: None,
    })
}

async fn run_red_team(config: &Config, question: &str, models: &[String]) -> Result<PatternRun, String> {
    let chairman = chairman_of(config, models).await;
    let proposal_prompt = format!("State a concrete proposal addressing: {question}");
    let proposal = query(config, &chairman, &proposal_prompt, None).await;

    let attack_prompt = format!(
        "Red-team the following proposal for \"{question}\":\n\n{}\n\nIdentify vulnerabilities, attack vectors, and failure modes.",
        proposal.content.clone().unwrap_or_default()
    );
    let attacks = query_parallel(config, models, &attack_prompt, None).await;

    let attacks_text: String = attacks
        .iter()
        .map(|(m, r)| format!("### {m}\n{}\n", r.content.clone().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n");
    let recommendation_prompt = format!(
        "Given the following attacks against the proposal for \"{question}\":\n\n{attacks_text}\n\nProvide concrete, prioritized recommendations to mitigate the identified risks."
    );
    let recommendations = query(config, &chairman, &recommendation_prompt, None).await;

    Ok(PatternRun {
        pattern_id: "red_team".to_string(),
        stages: serde_json::json!({
            "proposal": proposal.content,
            "attacks": named(&attacks),
            "chairman": chairman,
        }),
        final_answer: recommendations.content,
    })
}

async fn run_tree_of_thought(
    config: &Config,
    question: &str,
    models: &[String],
    branches: u32,
) -> Result<PatternRun, String> {
    let chairman = chairman_of(config, models).await;
    let branch_models: Vec<String> = models.iter().take(branches.max(1) as usize).cloned().collect();

    let branch_prompt =
        format!("Propose a distinct approach to solving: {question}\n\nBe creative; do not converge on the obvious answer.");
    let branch_outputs = query_parallel(config, &branch_models, &branch_prompt, None).await;

    let branches_text: String = branch_outputs
        .iter()
        .map(|(m, r)| format!("### {m}\n{}\n", r.content.clone().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n");
    let evaluation_prompt = format!(
        "The following are distinct approaches to \"{question}\":\n\n{branches_text}\n\nEvaluate each branch and select the strongest, explaining why."
    );
    let evaluation = query(config, &chairman, &evaluation_prompt, None).await;

    Ok(PatternRun {
        pattern_id: "tree_of_thought".to_string(),
        stages: serde_json::json!({ "branches": named(&branch_outputs), "chairman": chairman }),
        final_answer: evaluation.content,
    })
}

async fn run_self_consistency(
    config: &Config,
    question: &str,
    models: &[String],
    attempts: u32,
) -> Result<PatternRun, String> {
    let chairman = chairman_of(config, models).await;
    let prompt = format!("Answer this question precisely: {question}");

    let mut per_model = Vec::new();
    for model in models {
        let mut model_attempts = Vec::new();
        for _ in 0..attempts.max(1) {
            let result = query(config, model, &prompt, None).await;
            model_attempts.push(result.content.unwrap_or_default());
        }
        per_model.push(serde_json::json!({ "model": model, "attempts": model_attempts }));
    }

    let attempts_text = serde_json::to_string_pretty(&per_model).unwrap_or_default();
    let consistency_prompt = format!(
        "The following are repeated independent attempts at answering \"{question}\":\n\n{attempts_text}\n\nIdentify the most consistent answer across attempts and report it, noting any disagreement."
    );
    let consistency_check = query(config, &chairman, &consistency_prompt, None).await;

    Ok(PatternRun {
        pattern_id: "self_consistency".to_string(),
        stages: serde_json::json!({ "parallel_attempts": per_model, "chairman": chairman }),
        final_answer: consistency_check.content,
    })
}

async fn run_round_robin(
    config: &Config,
    question: &str,
    models: &[String],
    rounds: u32,
) -> Result<PatternRun, String> {
    let mut running_answer = format!("Initial question: {question}");
    let mut log = Vec::new();

    for round in 0..rounds.max(1) {
        for model in models {
            let prompt = format!(
                "Round {}: refine the following running answer to \"{question}\":\n\n{running_answer}",
                round + 1
            );
            let result = query(config, model, &prompt, None).await;
            if let Some(content) = result.content {
                running_answer = content.clone();
                log.push(serde_json::json!({ "round": round + 1, "model": model, "refinement": content }));
            }
        }
    }

    Ok(PatternRun {
        pattern_id: "round_robin".to_string(),
        stages: serde_json::json!({ "refinement_rounds": log }),
        final_answer: Some(running_answer),
    })
}

async fn run_expert_panel(config: &Config, question: &str, models: &[String]) -> Result<PatternRun, String> {
    let chairman = chairman_of(config, models).await;

    let mut opinions = Vec::new();
    for (index, model) in models.iter().enumerate() {
        let role = EXPERT_ROLES[index % EXPERT_ROLES.len()];
        let prompt = format!(
            "You are a {role} expert. Provide your perspective on: {question}"
        );
        let result = query(config, model, &prompt, None).await;
        opinions.push(serde_json::json!({
            "model": model,
            "role": role,
            "opinion": result.content,
        }));
    }

    let opinions_text = serde_json::to_string_pretty(&opinions).unwrap_or_default();
    let integration_prompt = format!(
        "The following experts gave their perspectives on \"{question}\":\n\n{opinions_text}\n\nIntegrate these perspectives into a single, comprehensive recommendation."
    );
    let integration = query(config, &chairman, &integration_prompt, None).await;

    Ok(PatternRun {
        pattern_id: "expert_panel".to_string(),
        stages: serde_json::json!({ "expert_opinions": opinions, "chairman": chairman }),
        final_answer: integration.content,
    })
}

fn named(results: &[(String, crate::provider::ProviderResult)]) -> serde_json::Value {
    serde_json::json!(results
        .iter()
        .map(|(m, r)| serde_json::json!({ "model": m, "content": r.content, "error": r.error }))
        .collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_all_nine_patterns() {
        assert_eq!(list_patterns().len(), 9);
        assert!(PATTERNS.iter().any(|p| p.id == "expert_panel"));
    }
}
