//! Entity model: Project, Interview, Fragment, Code, Category, Theory, Claim.
//!
//! Mirrors `spec.md` §3. The relational store is authoritative for all of these; the graph and
//! vector stores hold derived projections keyed by the same ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{CategoryId, ClaimId, CodeId, FragmentId, InterviewId, ProjectId, TheoryId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub tenant_id: uuid::Uuid,
    pub owner_id: uuid::Uuid,
    pub domain_template: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// Transcription lifecycle of an Interview. Only `Completed` interviews feed the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl Default for TranscriptionStatus {
    fn default() -> Self {
        TranscriptionStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interview {
    pub id: InterviewId,
    pub project_id: ProjectId,
    pub status: TranscriptionStatus,
    pub full_text: String,
    pub word_count: i32,
    pub language: String,
}

impl Interview {
    pub fn is_ready_for_coding(&self) -> bool {
        self.status == TranscriptionStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub interview_id: InterviewId,
    pub text: String,
    pub start_offset: i32,
    pub end_offset: i32,
    pub paragraph_index: Option<i32>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub speaker_id: Option<String>,
    pub embedding_synced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Code {
    pub id: CodeId,
    pub project_id: ProjectId,
    pub label: String,
    pub definition: Option<String>,
    pub category_id: Option<CategoryId>,
    pub created_by: String,
}

impl Code {
    /// Case-insensitive, trimmed label key used for project-scoped uniqueness and cache lookup.
    pub fn label_key(label: &str) -> String {
        label.trim().to_lowercase()
    }
}

/// Provenance of a Code↔Fragment link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    Ai,
    Human,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFragmentLink {
    pub code_id: CodeId,
    pub fragment_id: FragmentId,
    pub confidence: f32,
    pub source: LinkSource,
    pub char_start: Option<i32>,
    pub char_end: Option<i32>,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub project_id: ProjectId,
    pub name: String,
    pub definition: Option<String>,
    pub is_central: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TheoryStatus {
    Draft,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theory {
    pub id: TheoryId,
    pub project_id: ProjectId,
    pub version: i32,
    pub model_json: serde_json::Value,
    pub propositions: serde_json::Value,
    pub validation: serde_json::Value,
    pub gaps: serde_json::Value,
    pub confidence_score: f32,
    pub status: TheoryStatus,
}

/// Edge kind from a derived Claim to its evidence, carried alongside the UNWIND row so the
/// graph adapter can pick the right Cypher relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimEvidenceEdge {
    SupportedBy,
    ContradictedBy,
}

/// A single Claim row to project into the graph store. `id` is computed deterministically by
/// [`Claim::derive_id`], never assigned randomly, so re-running the projection is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub theory_id: TheoryId,
    pub section: String,
    pub order: i32,
    pub text: String,
    pub about_category: CategoryId,
    pub evidence: Vec<(FragmentId, ClaimEvidenceEdge, u32)>,
}

impl Claim {
    /// `UUIDv5(theory_id, "{theory_id}:{section}:{order}:{text}")`.
    pub fn derive_id(theory_id: TheoryId, section: &str, order: i32, text: &str) -> ClaimId {
        let name = format!("{theory_id}:{section}:{order}:{text}");
        ClaimId(uuid::Uuid::new_v5(&theory_id.0, name.as_bytes()))
    }
}

/// In-process cache of a project's codes, keyed by [`Code::label_key`]. Owned by one
/// interview's coding run; Phase A never mutates it (see `spec.md` §5 shared-resource policy).
#[derive(Debug, Clone, Default)]
pub struct CodeCache {
    by_label: HashMap<String, Code>,
}

impl CodeCache {
    pub fn from_codes(codes: Vec<Code>) -> Self {
        let mut by_label = HashMap::with_capacity(codes.len());
        for code in codes {
            by_label.insert(Code::label_key(&code.label), code);
        }
        Self { by_label }
    }

    pub fn get(&self, label: &str) -> Option<&Code> {
        self.by_label.get(&Code::label_key(label))
    }

    pub fn insert(&mut self, code: Code) {
        self.by_label.insert(Code::label_key(&code.label), code);
    }

    pub fn into_values(self) -> Vec<Code> {
        self.by_label.into_values().collect()
    }
}
