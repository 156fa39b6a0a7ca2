//! The three-stage deliberation protocol: collection, anonymized peer
//! ranking, and chairman synthesis.
//!
//! Grounded on `llm-council-mcp/backend/council.py`.

use std::collections::HashMap;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::provider::{query, query_parallel, ProviderResult};

#[derive(Debug, Clone, Serialize)]
pub struct Ranking {
    pub evaluator: String,
    pub raw_evaluation: String,
    pub parsed_ranking: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateRank {
    pub model: String,
    pub label: String,
    pub average_rank: f64,
    pub vote_count: usize,
    pub positions: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stage2Result {
    pub rankings: Vec<Ranking>,
    pub label_to_model: HashMap<String, String>,
    pub aggregate_rankings: Vec<AggregateRank>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CouncilMetadata {
    pub council_models: Vec<String>,
    pub chairman_model: String,
    pub response_count: usize,
    pub ranking_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CouncilRun {
    pub success: bool,
    pub error: Option<String>,
    pub stage1: Vec<(String, String)>,
    pub stage2: Option<Stage2Result>,
    pub stage3: Option<String>,
    pub metadata: Option<CouncilMetadata>,
}

fn label_for(index: usize) -> String {
    let letter = (b'A' + index as u8) as char;
    format!("Response {letter}")
}

/// Map successful providers to labels in the order Stage 1 returned them.
fn anonymize(responses: &[(String, String)]) -> (String, HashMap<String, String>) {
    let mut label_to_model = HashMap::new();
    let mut parts = Vec::with_capacity(responses.len());
    for (index, (model, response)) in responses.iter().enumerate() {
        let label = label_for(index);
        parts.push(format!("### {label}\n\n{response}\n"));
        label_to_model.insert(label, model.clone());
    }
    (parts.join("\n"), label_to_model)
}

/// Extract the ranking from an evaluator's raw text: prefer the labels in
/// a `FINAL RANKING:` numbered block, else the order of first occurrence
/// of each `Response X` mention.
pub fn parse_ranking_from_text(text: &str) -> Vec<String> {
    let final_ranking = Regex::new(
        r"(?is)FINAL RANKING[:\s]*\n((?:\d+[.)]\s*Response\s+[A-Z].*\n?)+)",
    )
    .unwrap();
    let response_mention = Regex::new(r"Response\s+([A-Z])").unwrap();

    if let Some(caps) = final_ranking.captures(text) {
        let section = caps.get(1).unwrap().as_str();
        return response_mention
            .captures_iter(section)
            .map(|c| format!("Response {}", &c[1]))
            .collect();
    }

    let mut seen = std::collections::HashSet::new();
    let mut ordered = Vec::new();
    for caps in response_mention.captures_iter(text) {
        let label = caps[1].to_string();
        if seen.insert(label.clone()) {
            ordered.push(format!("Response {label}"));
        }
    }
    ordered
}

/// Aggregate rankings across evaluators: mean position ascending, ties
/// broken by order of first appearance among evaluators.
pub fn calculate_aggregate_rankings(
    rankings: &[Ranking],
    label_to_model: &HashMap<String, String>,
) -> Vec<AggregateRank> {
    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    // (evaluator_index, position_within_that_evaluator) of the first time
    // each label appears anywhere across all evaluators, in evaluator
    // order — this is the "order in which the candidate first appeared
    // among evaluators" tie-break from §8 scenario 7.
    let mut first_appearance: HashMap<String, (usize, usize)> = HashMap::new();

    for (evaluator_index, ranking) in rankings.iter().enumerate() {
        for (position, label) in ranking.parsed_ranking.iter().enumerate() {
            if !label_to_model.contains_key(label) {
                continue;
            }
            positions.entry(label.clone()).or_default().push(position + 1);
            first_appearance
                .entry(label.clone())
                .or_insert((evaluator_index, position));
        }
    }

    let mut results: Vec<AggregateRank> = Vec::new();
    for label in label_to_model.keys() {
        if let Some(pos) = positions.get(label) {
            if pos.is_empty() {
                continue;
            }
            let average_rank = pos.iter().sum::<usize>() as f64 / pos.len() as f64;
            results.push(AggregateRank {
                model: label_to_model[label].clone(),
                label: label.clone(),
                average_rank: (average_rank * 100.0).round() / 100.0,
                vote_count: pos.len(),
                positions: pos.clone(),
            });
        }
    }

    results.sort_by(|a, b| {
        a.average_rank
            .partial_cmp(&b.average_rank)
            .unwrap()
            .then_with(|| first_appearance[&a.label].cmp(&first_appearance[&b.label]))
    });
    results
}

pub async fn stage1_collect_responses(
    config: &Config,
    question: &str,
    models: &[String],
) -> Vec<(String, String)> {
    let prompt = format!(
        "Please provide a thorough, well-reasoned answer to the following question:\n\n{question}\n\nFocus on accuracy, clarity, and completeness in your response."
    );

    info!(models = models.len(), "stage 1: querying council models");
    let results = query_parallel(config, models, &prompt, None).await;

    let mut responses = Vec::new();
    for (model, result) in results {
        match result.content {
            Some(content) => responses.push((model, content)),
            None => warn!(model, error = ?result.error, "stage 1 model failed"),
        }
    }
    info!(collected = responses.len(), total = models.len(), "stage 1 complete");
    responses
}

pub async fn stage2_collect_rankings(
    config: &Config,
    question: &str,
    responses: &[(String, String)],
    models: &[String],
) -> Stage2Result {
    let (formatted, label_to_model) = anonymize(responses);

    let prompt = format!(
        "You are evaluating responses to this question:\n\n{question}\n\nHere are the anonymized responses:\n\n{formatted}\n\nPlease evaluate each response for:\n1. Accuracy and correctness\n2. Completeness and depth\n3. Clarity and organization\n4. Practical usefulness\n\nAfter your evaluation, provide your final ranking in this exact format:\n\nFINAL RANKING:\n1. Response X\n2. Response Y\n3. Response Z\n\n(Replace X, Y, Z with the actual labels, ranked from best to worst)"
    );

    info!(models = models.len(), "stage 2: collecting peer rankings");
    let results = query_parallel(config, models, &prompt, None).await;

    let mut rankings = Vec::new();
    for (model, result) in results {
        match result.content {
            Some(content) => {
                let parsed = parse_ranking_from_text(&content);
                rankings.push(Ranking {
                    evaluator: model,
                    raw_evaluation: content,
                    parsed_ranking: parsed,
                });
            }
            None => warn!(model, error = ?result.error, "stage 2 evaluator failed"),
        }
    }

    let aggregate_rankings = calculate_aggregate_rankings(&rankings, &label_to_model);
    info!(rankings = rankings.len(), "stage 2 complete");
    Stage2Result {
        rankings,
        label_to_model,
        aggregate_rankings,
    }
}

pub async fn stage3_synthesize_final(
    config: &Config,
    question: &str,
    responses: &[(String, String)],
    aggregate_rankings: &[AggregateRank],
    chairman: &str,
) -> String {
    let response_map: HashMap<&str, &str> = responses
        .iter()
        .map(|(m, r)| (m.as_str(), r.as_str()))
        .collect();

    let ranked_responses: Vec<String> = aggregate_rankings
        .iter()
        .filter_map(|rank| {
            response_map.get(rank.model.as_str()).map(|response| {
                format!(
                    "### {} (Avg Rank: {})\n\n{}",
                    rank.model, rank.average_rank, response
                )
            })
        })
        .collect();

    let ranking_table: Vec<String> = aggregate_rankings
        .iter()
        .map(|r| format!("- {}: avg rank {}", r.model, r.average_rank))
        .collect();

    let prompt = format!(
        "You are the chairman synthesizing a final answer.\n\nOriginal question: {question}\n\nThe council has provided and ranked these responses (ordered by peer-ranking quality):\n\n{}\n\nAggregate Rankings:\n{}\n\nPlease synthesize a comprehensive final answer that:\n1. Incorporates the best insights from the highest-ranked responses\n2. Addresses any important points from lower-ranked responses\n3. Resolves any conflicts between responses\n4. Provides a clear, authoritative answer\n\nYour synthesized response:",
        ranked_responses.join("\n\n"),
        ranking_table.join("\n"),
    );

    info!(chairman, "stage 3: synthesizing");
    let ProviderResult { content, error } = query(config, chairman, &prompt, None).await;

    match content {
        Some(content) => {
            info!("stage 3 complete");
            content
        }
        None => {
            warn!(chairman, error = ?error, "chairman synthesis failed");
            match aggregate_rankings.first().and_then(|r| response_map.get(r.model.as_str())) {
                Some(top) => format!("[Chairman synthesis failed. Top-ranked response:]\n\n{top}"),
                None => "[Synthesis failed. No valid responses available.]".to_string(),
            }
        }
    }
}

/// Run the complete three-stage deliberation.
pub async fn run_full_council(
    config: &Config,
    question: &str,
    council_models: Option<Vec<String>>,
    chairman_model: Option<String>,
) -> CouncilRun {
    let models = council_models.clone().unwrap_or_else(|| config.cli_council_models.clone());
    let chairman = chairman_model.clone().unwrap_or_else(|| config.cli_chairman_model.clone());

    let responses = stage1_collect_responses(config, question, &models).await;
    if responses.is_empty() {
        return CouncilRun {
            success: false,
            error: Some("No responses collected in Stage 1".to_string()),
            stage1: Vec::new(),
            stage2: None,
            stage3: None,
            metadata: None,
        };
    }

    let stage2 = stage2_collect_rankings(config, question, &responses, &models).await;
    let stage3 = stage3_synthesize_final(
        config,
        question,
        &responses,
        &stage2.aggregate_rankings,
        &chairman,
    )
    .await;

    let ranking_count = stage2.rankings.len();
    CouncilRun {
        success: true,
        error: None,
        stage1: responses.clone(),
        stage2: Some(stage2),
        stage3: Some(stage3),
        metadata: Some(CouncilMetadata {
            council_models: models,
            chairman_model: chairman,
            response_count: responses.len(),
            ranking_count,
        }),
    }
}

/// Persist a council run as a dated JSON file, using exclusive-create
/// with a disambiguating numeric suffix on same-second collision (§5
/// "Shared resources").
pub fn save_conversation(
    config: &Config,
    question: &str,
    result: &CouncilRun,
) -> std::io::Result<std::path::PathBuf> {
    let dir = config.conversations_dir();
    std::fs::create_dir_all(&dir)?;

    let now = Utc::now();
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let record = serde_json::json!({
        "id": stamp,
        "created_at": now.to_rfc3339(),
        "question": question,
        "result": result,
    });
    let bytes = serde_json::to_vec_pretty(&record)?;

    let mut suffix = 0u32;
    loop {
        let filename = if suffix == 0 {
            format!("{stamp}.json")
        } else {
            format!("{stamp}_{}.json", suffix + 1)
        };
        let path = dir.join(filename);
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(&bytes)?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                suffix += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_ranking_block() {
        let text = "Some reasoning...\n\nFINAL RANKING:\n1. Response B\n2. Response A\n3. Response C\n";
        assert_eq!(
            parse_ranking_from_text(text),
            vec!["Response B", "Response A", "Response C"]
        );
    }

    #[test]
    fn falls_back_to_first_occurrence_order() {
        let text = "I think Response C is decent but Response A is better, and Response C again.";
        assert_eq!(parse_ranking_from_text(text), vec!["Response C", "Response A"]);
    }

    #[test]
    fn aggregate_ranking_scenario_from_spec() {
        let mut label_to_model = HashMap::new();
        label_to_model.insert("Response A".to_string(), "claude".to_string());
        label_to_model.insert("Response B".to_string(), "codex".to_string());
        label_to_model.insert("Response C".to_string(), "gemini".to_string());

        let rankings = vec![
            Ranking {
                evaluator: "claude".into(),
                raw_evaluation: String::new(),
                parsed_ranking: vec!["Response B".into(), "Response A".into(), "Response C".into()],
            },
            Ranking {
                evaluator: "gemini".into(),
                raw_evaluation: String::new(),
                parsed_ranking: vec!["Response A".into(), "Response B".into(), "Response C".into()],
            },
        ];

        let aggregate = calculate_aggregate_rankings(&rankings, &label_to_model);
        assert_eq!(aggregate[0].average_rank, 1.5);
        assert_eq!(aggregate[1].average_rank, 1.5);
        assert_eq!(aggregate[2].average_rank, 3.0);
        // B and A tie at 1.5; B appeared first (evaluator 0, position 0),
        // matching §8 scenario 7's expected [B, A, C].
        assert_eq!(aggregate[0].label, "Response B");
        assert_eq!(aggregate[1].label, "Response A");
        assert_eq!(aggregate[2].label, "Response C");
    }
}
