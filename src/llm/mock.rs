//! Deterministic mock gateway, used when no LLM endpoint is configured. Grounded in the
//! teacher's `MockEmbeddingService` (`context/vector_db.rs`), generalized from embeddings-only
//! to chat completions so the rest of the pipeline is unit-testable without a live model.

use async_trait::async_trait;

use super::{LlmGateway, RouteOutcome, RouteUsage};
use crate::budget::ChatMessage;
use crate::error::PipelineError;

#[derive(Debug, Default)]
pub struct MockLlmGateway {
    pub embedding_dim: usize,
}

impl MockLlmGateway {
    pub fn new(embedding_dim: usize) -> Self {
        Self { embedding_dim }
    }

    /// Deterministic pseudo-embedding: hashes the text into a fixed-size vector so repeated
    /// calls with the same input are stable (useful for idempotence tests).
    fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let dim = if self.embedding_dim == 0 {
            3072
        } else {
            self.embedding_dim
        };
        let mut seed: u64 = 1469598103934665603;
        for byte in text.as_bytes() {
            seed ^= *byte as u64;
            seed = seed.wrapping_mul(1099511628211);
        }
        (0..dim)
            .map(|i| {
                let mixed = seed.wrapping_add(i as u64).wrapping_mul(2654435761);
                ((mixed % 2000) as f32 / 1000.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl LlmGateway for MockLlmGateway {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|t| self.deterministic_embedding(t)).collect())
    }

    async fn reason(&self, _messages: &[ChatMessage], _max_out: usize) -> Result<String, PipelineError> {
        Ok(r#"{"extracted_codes": []}"#.to_string())
    }

    async fn route(
        &self,
        task: &str,
        _prompt: &str,
        _system: &str,
    ) -> Result<RouteOutcome, PipelineError> {
        let text = match task {
            "identify_central_category" => {
                r#"{"selected_central_category": "adoption", "evaluation": [], "detailed_reasoning": "mock"}"#
            }
            "build_paradigm" => {
                r#"{"selected_central_category": "adoption", "conditions": [], "context": [],
                "intervening_conditions": [], "actions": [], "consequences": [],
                "propositions": [], "confidence_score": 0.5}"#
            }
            "analyze_gaps" => {
                r#"{"readiness_score": 0.5, "identified_gaps": [], "theoretical_sampling_plan": ""}"#
            }
            _ => "{}",
        };
        Ok(RouteOutcome {
            text: text.to_string(),
            model: "mock".to_string(),
            usage: RouteUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
            },
        })
    }
}
