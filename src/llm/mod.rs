//! LLM gateway (`spec.md` §4.2, C2): a stateless facade over chat-style and embedding-style
//! model endpoints.

pub mod mock;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::ChatMessage;
use crate::config::GatewayConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub text: String,
    pub model: String,
    pub usage: RouteUsage,
}

/// Typed calls to reasoning / embedding / router models. Returns raw text; JSON parsing is the
/// caller's responsibility via [`crate::json_decode::decode_llm_json`].
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    async fn reason(&self, messages: &[ChatMessage], max_out: usize) -> Result<String, PipelineError>;

    /// Routes a task-shaped prompt through a model chosen for that task, with fallback to
    /// cheaper models on transient failure (`SPEC_FULL.md` §4.2 [ADDED]).
    async fn route(
        &self,
        task: &str,
        prompt: &str,
        system: &str,
    ) -> Result<RouteOutcome, PipelineError>;
}

/// Builds the production gateway: an HTTP-backed client when an endpoint is configured, a
/// deterministic mock otherwise — mirrors `spec.md` §4.2's "when unconfigured, return
/// deterministic mock outputs" requirement.
pub fn build_gateway(config: &GatewayConfig) -> std::sync::Arc<dyn LlmGateway> {
    match &config.endpoint {
        Some(endpoint) => std::sync::Arc::new(HttpLlmGateway::new(endpoint.clone(), config.clone())),
        None => std::sync::Arc::new(mock::MockLlmGateway::default()),
    }
}

/// Thin `reqwest`-backed client against an OpenAI-Chat-Completions-shaped endpoint (the shape
/// the original's Azure OpenAI deployment also exposes; grounded in
/// `original_source/backend/app/core/settings.py`'s `AZURE_OPENAI_*` keys, kept provider-neutral
/// here rather than Azure-specific).
pub struct HttpLlmGateway {
    endpoint: String,
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpLlmGateway {
    pub fn new(endpoint: String, config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self {
            endpoint,
            config,
            client,
        }
    }

    async fn post_chat(&self, model: &str, messages: &[ChatMessage], max_out: usize) -> Result<String, PipelineError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            max_tokens: usize,
        }
        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatMessageResponse,
        }
        #[derive(Deserialize)]
        struct ChatMessageResponse {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
        }

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&ChatRequest {
                model,
                messages,
                max_tokens: max_out,
            });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let started = std::time::Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::LlmTimeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                PipelineError::LlmError {
                    message: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(PipelineError::LlmError {
                message: format!("status {}", response.status()),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::LlmError {
                message: e.to_string(),
            })?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::LlmError {
                message: "empty choices array".to_string(),
            })
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        #[derive(Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(Deserialize)]
        struct EmbedItem {
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct EmbedResponse {
            data: Vec<EmbedItem>,
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&EmbedRequest {
                model: &self.config.model_embedding,
                input: texts,
            });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| PipelineError::LlmError {
            message: e.to_string(),
        })?;
        let body: EmbedResponse = response.json().await.map_err(|e| PipelineError::LlmError {
            message: e.to_string(),
        })?;
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }

    async fn reason(&self, messages: &[ChatMessage], max_out: usize) -> Result<String, PipelineError> {
        self.post_chat(&self.config.model_reasoning_advanced, messages, max_out)
            .await
    }

    async fn route(
        &self,
        task: &str,
        prompt: &str,
        system: &str,
    ) -> Result<RouteOutcome, PipelineError> {
        let model = router::model_for_task(task, &self.config);
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            },
        ];

        let mut chain = std::iter::once(model.clone())
            .chain(self.config.model_fallback_chain.clone())
            .peekable();

        let mut last_err = None;
        while let Some(candidate) = chain.next() {
            match self
                .post_chat(&candidate, &messages, self.config.max_output_tokens())
                .await
            {
                Ok(text) => {
                    let prompt_tokens = crate::budget::estimate_messages_tokens(&messages, &candidate);
                    let completion_tokens = crate::budget::estimate_tokens(&text, &candidate);
                    return Ok(RouteOutcome {
                        text,
                        model: candidate,
                        usage: RouteUsage {
                            prompt_tokens,
                            completion_tokens,
                        },
                    });
                }
                Err(e) if chain.peek().is_some() => {
                    tracing::warn!(error = %e, model = %candidate, "route: falling back to next model");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(PipelineError::LlmError {
            message: "no model available".to_string(),
        }))
    }
}

impl GatewayConfig {
    fn max_output_tokens(&self) -> usize {
        4096
    }
}
