//! theogen-core: coding, theory-generation and task-orchestration core for a multi-tenant
//! grounded-theory research platform.
//!
//! `Platform` is the composition root: it owns the store adapters, the LLM gateway, the task
//! orchestrator and the rate limiter, wired the way `AgentRuntime` wired the teacher's scheduler/
//! lifecycle/resource/communication components from one `RuntimeConfig`.

pub mod budget;
pub mod coding;
pub mod config;
pub mod error;
pub mod json_decode;
pub mod llm;
pub mod orchestrator;
pub mod ratelimit;
pub mod store;
pub mod theory;
pub mod types;

use std::sync::Arc;

use config::PlatformConfig;
use coding::CodingEngine;
use error::PipelineError;
use orchestrator::{Dispatcher, ExternalQueueDispatcher, InProcessDispatcher, TaskOrchestrator};
use ratelimit::{RateLimitConfig, RateLimiter};
use store::neo4j::Neo4jStoreAdapter;
use store::postgres::PgStoreAdapter;
use store::qdrant::QdrantStoreAdapter;
use theory::TheoryPipeline;

/// The wired platform: every component a request handler needs, built once at startup from
/// [`PlatformConfig`].
pub struct Platform {
    pub config: PlatformConfig,
    pub coding: Arc<CodingEngine>,
    pub theory: Arc<TheoryPipeline>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub ratelimiter: Arc<RateLimiter>,
}

impl Platform {
    /// Connects every store adapter, builds the LLM gateway, and wires the coding engine, theory
    /// pipeline, task orchestrator and dispatcher together. Fails fast on any connection error —
    /// there is no degraded-startup mode for a store the platform cannot reach at all.
    pub async fn bootstrap(config: PlatformConfig) -> Result<Self, PipelineError> {
        let relational: Arc<dyn store::RelationalStore> =
            Arc::new(PgStoreAdapter::connect(&config.database_url).await?);
        let graph: Arc<dyn store::GraphStore> =
            Arc::new(Neo4jStoreAdapter::connect(&config.neo4j).await?);
        let vector: Arc<dyn store::VectorStore> =
            Arc::new(QdrantStoreAdapter::new(config.qdrant.clone()));
        let llm = llm::build_gateway(&config.llm);

        let redis = match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str()).map_err(|e| PipelineError::StoreFatal {
                    store: "redis",
                    source: anyhow::anyhow!(e),
                })?;
                let conn = redis::aio::ConnectionManager::new(client)
                    .await
                    .map_err(|e| PipelineError::StoreFatal {
                        store: "redis",
                        source: anyhow::anyhow!(e),
                    })?;
                Some(conn)
            }
            None => None,
        };

        let coding = Arc::new(CodingEngine {
            relational: Arc::clone(&relational),
            graph: Arc::clone(&graph),
            vector: Arc::clone(&vector),
            llm: Arc::clone(&llm),
            concurrency: config.concurrency.clone(),
        });

        let theory = Arc::new(TheoryPipeline {
            relational: Arc::clone(&relational),
            graph: Arc::clone(&graph),
            vector: Arc::clone(&vector),
            llm: Arc::clone(&llm),
            auto_coder: Arc::clone(&coding) as Arc<dyn theory::AutoCoder>,
            budget: config.budget.clone(),
            concurrency: config.concurrency.clone(),
            judge_config: config.judge.clone(),
            features: config.features.clone(),
        });

        let orchestrator = Arc::new(TaskOrchestrator::new(redis.clone(), config.task.clone()));

        let dispatcher: Arc<dyn Dispatcher> = if config.features.use_external_queue {
            let redis = redis.clone().ok_or_else(|| PipelineError::StoreFatal {
                store: "redis",
                source: anyhow::anyhow!("USE_EXTERNAL_QUEUE requires REDIS_URL"),
            })?;
            Arc::new(ExternalQueueDispatcher {
                redis,
                queue_key: "theogen:theory_tasks".to_string(),
            })
        } else {
            Arc::new(InProcessDispatcher {
                orchestrator: Arc::clone(&orchestrator),
                pipeline: Arc::clone(&theory),
            })
        };

        let ratelimiter = Arc::new(match redis {
            Some(conn) => RateLimiter::with_redis(conn, RateLimitConfig::default()),
            None => RateLimiter::local(RateLimitConfig::default()),
        });

        Ok(Self {
            config,
            coding,
            theory,
            orchestrator,
            dispatcher,
            ratelimiter,
        })
    }
}
