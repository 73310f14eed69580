//! Model smoke tests and a small comparative benchmark over the roster.

use std::cmp::Ordering;
use std::time::Instant;

use serde::Serialize;

use super::client::ChatApi;
use super::error::ChatError;
use super::types::{ChatReply, ChatTurn, GenerationParams, DEFAULT_TEMPERATURE};

pub const DEFAULT_TEST_PROMPT: &str = "Hello! Please introduce yourself.";
pub const TEST_MAX_TOKENS: u32 = 200;

pub const BENCHMARK_PROMPTS: [&str; 3] = [
    "Write a haiku about artificial intelligence.",
    "Explain quantum computing in simple terms.",
    "List 3 creative uses for a paperclip.",
];

/// Average response time assumed for a model with no successful run.
const NO_SUCCESS_RESPONSE_MS: f64 = 999_999.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTestResult {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ChatReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelTestResult {
    pub fn is_success(&self) -> bool {
        self.reply.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRanking {
    pub model: String,
    pub name: String,
    pub avg_response_time_ms: f64,
    pub avg_length: f64,
    pub error_count: u32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
    /// Highest score first.
    pub rankings: Vec<ModelRanking>,
    pub results: Vec<ModelTestResult>,
}

fn test_params() -> GenerationParams {
    GenerationParams {
        max_tokens: TEST_MAX_TOKENS,
        temperature: DEFAULT_TEMPERATURE,
    }
}

fn ensure_configured(api: &dyn ChatApi) -> Result<(), ChatError> {
    if api.is_configured() {
        Ok(())
    } else {
        Err(ChatError::configuration("API key not configured"))
    }
}

async fn run_one(api: &dyn ChatApi, model: &str, prompt: &str) -> ModelTestResult {
    let history = [ChatTurn::user(prompt)];
    let started = Instant::now();
    let (reply, error) = match api.chat(&history, model, test_params()).await {
        Ok(mut reply) => {
            reply
                .response_time_ms
                .get_or_insert(started.elapsed().as_millis() as u64);
            (Some(reply), None)
        }
        Err(err) => {
            log::warn!("Model {} failed: {}", model, err.message());
            (None, Some(err.message().to_string()))
        }
    };
    ModelTestResult {
        model: model.to_string(),
        prompt: prompt.to_string(),
        reply,
        error,
    }
}

/// Send one prompt to every roster model, one at a time.
pub async fn test_all_models(
    api: &dyn ChatApi,
    prompt: &str,
) -> Result<Vec<ModelTestResult>, ChatError> {
    ensure_configured(api)?;
    let mut results = Vec::with_capacity(api.models().len());
    for model in api.models() {
        results.push(run_one(api, model.id, prompt).await);
    }
    Ok(results)
}

pub(crate) fn score(avg_response_time_ms: f64, avg_length: f64, error_count: u32) -> f64 {
    let time_score = (5.0 - avg_response_time_ms / 1000.0).max(0.0);
    let length_score = (avg_length / 100.0).min(5.0);
    let error_score = (5.0 - error_count as f64).max(0.0);
    time_score + length_score + error_score
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn rank(api: &dyn ChatApi, results: &[ModelTestResult]) -> Vec<ModelRanking> {
    let mut rankings: Vec<ModelRanking> = api
        .models()
        .iter()
        .map(|model| {
            let runs = results.iter().filter(|r| r.model == model.id);
            let mut times = Vec::new();
            let mut lengths = Vec::new();
            let mut error_count = 0u32;
            for run in runs {
                match &run.reply {
                    Some(reply) => {
                        times.push(reply.response_time_ms.unwrap_or(0) as f64);
                        lengths.push(reply.content.encode_utf16().count() as f64);
                    }
                    None => error_count += 1,
                }
            }

            let avg_response_time_ms = mean(&times).unwrap_or(NO_SUCCESS_RESPONSE_MS);
            let avg_length = mean(&lengths).unwrap_or(0.0);
            ModelRanking {
                model: model.id.to_string(),
                name: model.name.to_string(),
                avg_response_time_ms,
                avg_length,
                error_count,
                score: score(avg_response_time_ms, avg_length, error_count),
            }
        })
        .collect();

    rankings.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    rankings
}

/// Run the fixed prompt set against every model and rank the models.
pub async fn benchmark_models(api: &dyn ChatApi) -> Result<BenchmarkReport, ChatError> {
    ensure_configured(api)?;

    let mut results = Vec::new();
    for prompt in BENCHMARK_PROMPTS {
        for model in api.models() {
            results.push(run_one(api, model.id, prompt).await);
        }
    }
    log::info!(
        "Benchmark finished: {} runs, {} failed",
        results.len(),
        results.iter().filter(|r| !r.is_success()).count()
    );

    Ok(BenchmarkReport {
        rankings: rank(api, &results),
        results,
    })
}
