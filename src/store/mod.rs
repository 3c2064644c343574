//! Store adapters (`spec.md` §4.1, C1): typed CRUD + batch UNWIND/UPSERT, tenancy-scoped.
//!
//! All three traits are `#[async_trait] pub trait X: Send + Sync` with one production struct
//! each, mirroring the teacher's `VectorDatabase`/`QdrantClientWrapper` split
//! (`context/vector_db.rs`).

pub mod neo4j;
pub mod postgres;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::*;

/// A single coding sync row for the graph adapter's `UNWIND`-based batch write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodedAsEdge {
    pub code_id: CodeId,
    pub fragment_id: FragmentId,
    pub confidence: f32,
    pub source: LinkSource,
    pub run_id: uuid::Uuid,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub char_start: Option<i32>,
    pub char_end: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoOccurrence {
    pub category_a: CategoryId,
    pub category_b: CategoryId,
    pub count: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryNetworkMetrics {
    pub category_id: CategoryId,
    pub code_degree: u32,
    pub fragment_degree: u32,
    pub pagerank: Option<f32>,
    pub gds_degree: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkSummary {
    pub category_count: usize,
    pub code_count: usize,
    pub fragment_count: usize,
    pub metrics: Vec<CategoryNetworkMetrics>,
    pub co_occurrences: Vec<CoOccurrence>,
    /// `true` when PageRank/weighted-degree were computed via the GDS extension rather than
    /// Cypher-only fallback.
    pub used_gds: bool,
}

/// Every write is an `UNWIND` over a row set (idempotent, MERGE semantics); server-side query
/// timeouts are configured; absence of the GDS extension degrades algorithmic metrics to
/// Cypher-only metrics rather than failing.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn sync_interview_coding(
        &self,
        project_id: ProjectId,
        interview_id: InterviewId,
        fragments: &[Fragment],
        codes: &[Code],
        edges: &[CodedAsEdge],
    ) -> Result<(), PipelineError>;

    async fn sync_category_taxonomy(
        &self,
        project_id: ProjectId,
        categories: &[Category],
        codes: &[Code],
    ) -> Result<(), PipelineError>;

    async fn compute_network_metrics(
        &self,
        project_id: ProjectId,
    ) -> Result<NetworkSummary, PipelineError>;

    async fn sync_claims(
        &self,
        project_id: ProjectId,
        claims: &[Claim],
    ) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone)]
pub struct FragmentEmbeddingPoint {
    pub project_id: ProjectId,
    pub owner_id: uuid::Uuid,
    pub interview_id: InterviewId,
    pub fragment_id: FragmentId,
    pub text: String,
    pub embedding: Vec<f32>,
    pub codes: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct ClaimEmbeddingPoint {
    pub project_id: ProjectId,
    pub owner_id: uuid::Uuid,
    pub theory_id: TheoryId,
    pub claim_id: ClaimId,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub fragment_id: Option<FragmentId>,
    pub claim_id: Option<ClaimId>,
    pub interview_id: Option<InterviewId>,
    pub score: f32,
    pub text: String,
}

/// Collections are named `project_<uuid>_fragments`, auto-created on first upsert. Every query
/// is scoped by `project_id` and, when known, `owner_id`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_fragment_embeddings(
        &self,
        points: &[FragmentEmbeddingPoint],
    ) -> Result<(), PipelineError>;

    async fn upsert_claim_embeddings(
        &self,
        points: &[ClaimEmbeddingPoint],
    ) -> Result<(), PipelineError>;

    async fn search_fragments(
        &self,
        project_id: ProjectId,
        owner_id: Option<uuid::Uuid>,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, PipelineError>;
}

/// Session-scoped transactions: each logically independent unit of work opens its own
/// connection (never shared across concurrent tasks).
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn load_project(&self, project_id: ProjectId) -> Result<Project, PipelineError>;

    async fn load_interview(&self, interview_id: InterviewId) -> Result<Interview, PipelineError>;

    async fn load_fragments(
        &self,
        interview_id: InterviewId,
    ) -> Result<Vec<Fragment>, PipelineError>;

    async fn load_codes(&self, project_id: ProjectId) -> Result<Vec<Code>, PipelineError>;

    async fn load_categories(&self, project_id: ProjectId) -> Result<Vec<Category>, PipelineError>;

    async fn load_completed_uncoded_interviews(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<InterviewId>, PipelineError>;

    async fn get_or_create_code(
        &self,
        project_id: ProjectId,
        label: &str,
        definition: Option<&str>,
        created_by: &str,
    ) -> Result<Code, PipelineError>;

    async fn insert_code_fragment_links(
        &self,
        links: &[CodeFragmentLink],
    ) -> Result<(), PipelineError>;

    async fn mark_fragment_embedding_synced(
        &self,
        fragment_ids: &[FragmentId],
    ) -> Result<(), PipelineError>;

    async fn upsert_category(
        &self,
        project_id: ProjectId,
        name: &str,
        is_central: bool,
    ) -> Result<Category, PipelineError>;

    async fn save_theory(&self, theory: &Theory) -> Result<(), PipelineError>;

    async fn load_recent_theories(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> Result<Vec<Theory>, PipelineError>;
}
