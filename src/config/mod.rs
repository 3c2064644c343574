//! Typed configuration, loaded from environment variables with environment-profile defaults.
//!
//! Follows the teacher's `*Config` + `impl Default` convention (`error_handler::ErrorHandlerConfig`,
//! `lib::RuntimeConfig`) rather than pulling in a `config`-crate layering engine — the original
//! (`original_source/backend/app/core/settings.py`) reads plain environment variables too.

use std::time::Duration;

/// Deployment profile; opinionated defaults for several sub-configs vary by profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvProfile {
    Production,
    Staging,
    Development,
}

impl Default for EnvProfile {
    fn default() -> Self {
        EnvProfile::Development
    }
}

impl EnvProfile {
    /// Grounded in `settings.py::_normalize_env`: accepts common aliases, defaults to
    /// development for anything unrecognised rather than failing startup.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "prod" | "production" | "live" => EnvProfile::Production,
            "staging" | "stage" | "preprod" | "uat" => EnvProfile::Staging,
            _ => EnvProfile::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model_reasoning_advanced: String,
    pub model_reasoning_fast: String,
    pub model_router: String,
    pub model_embedding: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// Cheaper-model fallback chain consulted on `LLM_ERROR`/timeout (§4.2 [ADDED]).
    pub model_fallback_chain: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model_reasoning_advanced: "reasoning-advanced".to_string(),
            model_reasoning_fast: "reasoning-fast".to_string(),
            model_router: "router".to_string(),
            model_embedding: "embedding".to_string(),
            request_timeout: Duration::from_secs(60),
            max_retries: 2,
            model_fallback_chain: vec!["reasoning-fast".to_string(), "router".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub context_limit: usize,
    pub max_output_tokens: usize,
    pub margin: usize,
    pub max_degrade_steps: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context_limit: 128_000,
            max_output_tokens: 4_096,
            margin: 512,
            max_degrade_steps: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub coding_fragment_concurrency: usize,
    pub theory_interview_concurrency: usize,
    pub theory_qdrant_retrieval_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            coding_fragment_concurrency: 8,
            theory_interview_concurrency: 3,
            theory_qdrant_retrieval_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub min_interviews: usize,
    pub adaptive_thresholds_on: bool,
    pub adaptive_ratio: f32,
    pub balance_min_evidence: usize,
    pub max_share_per_interview: f32,
    pub unknown_constructs_ratio: f32,
    /// Rollout-policy window size (`W` in `spec.md` §4.6).
    pub rollout_window: usize,
    pub rollout_min_theories: usize,
    pub rollout_promote_max_bad: usize,
    pub rollout_degrade_min_bad: usize,
    pub rollout_cooldown_runs: usize,
    pub rollout_max_mode_changes_per_window: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            min_interviews: 3,
            adaptive_thresholds_on: true,
            adaptive_ratio: 0.5,
            balance_min_evidence: 6,
            max_share_per_interview: 0.6,
            unknown_constructs_ratio: 0.4,
            rollout_window: 10,
            rollout_min_theories: 5,
            rollout_promote_max_bad: 1,
            rollout_degrade_min_bad: 3,
            rollout_cooldown_runs: 2,
            rollout_max_mode_changes_per_window: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureToggles {
    pub use_judge: bool,
    pub judge_warn_only: bool,
    pub sync_claims_graph: bool,
    pub sync_claims_vector: bool,
    pub use_subgraph_evidence: bool,
    pub use_deterministic_routing: bool,
    pub use_external_queue: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            use_judge: true,
            judge_warn_only: false,
            sync_claims_graph: true,
            sync_claims_vector: true,
            use_subgraph_evidence: true,
            use_deterministic_routing: false,
            use_external_queue: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub task_ttl: Duration,
    pub task_lock_ttl: Duration,
    pub poll_backoff: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            task_ttl: Duration::from_secs(24 * 3600),
            task_lock_ttl: Duration::from_secs(600),
            poll_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QdrantConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Neo4jConfig {
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// A contradiction between an explicit setting and its environment-profile default, surfaced
/// rather than silently resolved (`spec.md` §6: "any contradiction is surfaced as a startup
/// issue, never silent").
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub env_profile: EnvProfile,
    pub fail_startup_on_config_errors: bool,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub neo4j: Neo4jConfig,
    pub qdrant: QdrantConfig,
    pub llm: GatewayConfig,
    pub budget: BudgetConfig,
    pub concurrency: ConcurrencyConfig,
    pub judge: JudgeConfig,
    pub features: FeatureToggles,
    pub task: TaskConfig,
}

impl PlatformConfig {
    /// Loads from environment variables, applying profile defaults first and explicit
    /// `std::env::var` overrides second. Returns the config plus any contradictions found.
    pub fn from_env() -> (Self, Vec<ConfigIssue>) {
        let env_profile = std::env::var("APP_ENV")
            .map(|v| EnvProfile::parse(&v))
            .unwrap_or_default();

        let mut issues = Vec::new();
        let mut features = FeatureToggles::default();

        if env_profile == EnvProfile::Production {
            features.judge_warn_only = false;
        }
        if let Ok(raw) = std::env::var("THEORY_JUDGE_WARN_ONLY") {
            let explicit = matches!(raw.trim(), "1" | "true" | "TRUE");
            if env_profile == EnvProfile::Production && explicit {
                issues.push(ConfigIssue {
                    field: "THEORY_JUDGE_WARN_ONLY",
                    detail: "warn-only judge mode explicitly enabled in a production profile"
                        .to_string(),
                });
            }
            features.judge_warn_only = explicit;
        }

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/theogen".to_string());
        let redis_url = std::env::var("REDIS_URL").ok();

        let config = PlatformConfig {
            env_profile,
            fail_startup_on_config_errors: std::env::var("THEORY_FAIL_STARTUP_ON_CONFIG_ERRORS")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE"))
                .unwrap_or(false),
            database_url,
            redis_url,
            neo4j: Neo4jConfig {
                uri: std::env::var("NEO4J_URI").ok(),
                user: std::env::var("NEO4J_USER").ok(),
                password: std::env::var("NEO4J_PASSWORD").ok(),
            },
            qdrant: QdrantConfig {
                url: std::env::var("QDRANT_URL").ok(),
                api_key: std::env::var("QDRANT_API_KEY").ok(),
            },
            llm: GatewayConfig {
                endpoint: std::env::var("LLM_ENDPOINT").ok(),
                api_key: std::env::var("LLM_API_KEY").ok(),
                ..GatewayConfig::default()
            },
            budget: BudgetConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            judge: JudgeConfig::default(),
            features,
            task: TaskConfig::default(),
        };

        (config, issues)
    }
}
