//! Coding Engine (`spec.md` §4.4, C4): classifies transcript fragments via LLM and syncs the
//! relational/graph/vector stores. Grounded in
//! `original_source/backend/app/engines/coding_engine.py::CodingEngine.auto_code_interview`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::ConcurrencyConfig;
use crate::error::PipelineError;
use crate::llm::LlmGateway;
use crate::store::{CodedAsEdge, FragmentEmbeddingPoint, GraphStore, RelationalStore, VectorStore};
use crate::theory::AutoCoder;
use crate::types::*;

const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// One `{label, definition, confidence, evidence_text}` entry from the model's
/// `extracted_codes` array. `label`-only bare strings (no definition/confidence/evidence) are
/// tolerated, matching the original's "object or bare-string entries" leniency.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ExtractedCode {
    Full {
        label: String,
        #[serde(default)]
        definition: Option<String>,
        #[serde(default)]
        confidence: Option<f32>,
        #[serde(default)]
        evidence_text: Option<String>,
    },
    Bare(String),
}

impl ExtractedCode {
    fn label(&self) -> &str {
        match self {
            ExtractedCode::Full { label, .. } => label,
            ExtractedCode::Bare(label) => label,
        }
    }

    fn definition(&self) -> Option<&str> {
        match self {
            ExtractedCode::Full { definition, .. } => definition.as_deref(),
            ExtractedCode::Bare(_) => None,
        }
    }

    fn confidence(&self) -> f32 {
        match self {
            ExtractedCode::Full { confidence, .. } => confidence.unwrap_or(0.5),
            ExtractedCode::Bare(_) => 0.5,
        }
    }

    fn evidence_text(&self) -> Option<&str> {
        match self {
            ExtractedCode::Full { evidence_text, .. } => evidence_text.as_deref(),
            ExtractedCode::Bare(_) => None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ExtractedCodesResponse {
    #[serde(default)]
    extracted_codes: Vec<ExtractedCode>,
}

/// Finds `needle`'s char span in `haystack`: exact match first, then case-insensitive.
fn find_char_span(haystack: &str, needle: &str) -> Option<(i32, i32)> {
    if needle.trim().is_empty() {
        return None;
    }
    if let Some(byte_start) = haystack.find(needle) {
        let char_start = haystack[..byte_start].chars().count() as i32;
        let char_end = char_start + needle.chars().count() as i32;
        return Some((char_start, char_end));
    }
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    if let Some(byte_start) = haystack_lower.find(&needle_lower) {
        let char_start = haystack_lower[..byte_start].chars().count() as i32;
        let char_end = char_start + needle_lower.chars().count() as i32;
        return Some((char_start, char_end));
    }
    None
}

pub struct CodingEngine {
    pub relational: Arc<dyn RelationalStore>,
    pub graph: Arc<dyn GraphStore>,
    pub vector: Arc<dyn VectorStore>,
    pub llm: Arc<dyn LlmGateway>,
    pub concurrency: ConcurrencyConfig,
}

impl CodingEngine {
    /// Phase A: parallel LLM classification. Bounded by `CODING_FRAGMENT_CONCURRENCY`. A failed
    /// LLM call degrades to an empty code list for that fragment rather than failing the run.
    async fn classify_fragments(
        &self,
        codes_snapshot: &[Code],
        fragments: &[Fragment],
    ) -> Vec<(FragmentId, Vec<ExtractedCode>)> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.concurrency.coding_fragment_concurrency.max(1),
        ));
        let snapshot = serde_json::to_string(
            &codes_snapshot
                .iter()
                .map(|c| serde_json::json!({"label": c.label, "definition": c.definition}))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        let mut handles = Vec::new();
        for fragment in fragments {
            let semaphore = Arc::clone(&semaphore);
            let llm = Arc::clone(&self.llm);
            let fragment_id = fragment.id;
            let fragment_text = fragment.text.clone();
            let snapshot = snapshot.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let system = "Classify this transcript fragment into existing or new codes. \
                    Respond with strict JSON {\"extracted_codes\": [...]}."
                    .to_string();
                let user = format!("Existing codes: {snapshot}\n\nFragment: {fragment_text}");
                let result = llm.route("coding", &user, &system).await.and_then(|outcome| {
                    crate::json_decode::decode_llm_json(&outcome.text)
                });
                let parsed = match result {
                    Ok(raw) => serde_json::from_value::<ExtractedCodesResponse>(raw)
                        .map(|r| r.extracted_codes)
                        .unwrap_or_default(),
                    Err(err) => {
                        tracing::warn!(error = %err, fragment = %fragment_id, "coding LLM call failed, using empty code list");
                        Vec::new()
                    }
                };
                (fragment_id, parsed)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            if let Ok(pair) = handle.await {
                results.push(pair);
            }
        }
        results
    }

    /// Phase B: sequential database mutation. Get-or-create each extracted code and batch-insert
    /// links; char spans are resolved by substring search of `evidence_text`.
    async fn write_links(
        &self,
        project_id: ProjectId,
        run_id: Uuid,
        fragments: &[Fragment],
        classifications: &[(FragmentId, Vec<ExtractedCode>)],
    ) -> Result<(Vec<Code>, Vec<CodedAsEdge>), PipelineError> {
        let fragments_by_id: std::collections::HashMap<FragmentId, &Fragment> =
            fragments.iter().map(|f| (f.id, f)).collect();
        let mut links = Vec::new();
        let mut edges = Vec::new();
        let mut touched_codes = Vec::new();
        let ts = Utc::now();

        for (fragment_id, extracted) in classifications {
            let Some(fragment) = fragments_by_id.get(fragment_id) else {
                continue;
            };
            for entry in extracted {
                let label = entry.label().trim();
                if label.is_empty() {
                    continue;
                }
                let code = self
                    .relational
                    .get_or_create_code(project_id, label, entry.definition(), "ai")
                    .await?;
                touched_codes.push(code.clone());

                let span = entry
                    .evidence_text()
                    .and_then(|text| find_char_span(&fragment.text, text));
                let (char_start, char_end) = span.map(|(s, e)| (Some(s), Some(e))).unwrap_or((None, None));

                links.push(CodeFragmentLink {
                    code_id: code.id,
                    fragment_id: *fragment_id,
                    confidence: entry.confidence(),
                    source: LinkSource::Ai,
                    char_start,
                    char_end,
                    linked_at: ts,
                });
                edges.push(CodedAsEdge {
                    code_id: code.id,
                    fragment_id: *fragment_id,
                    confidence: entry.confidence(),
                    source: LinkSource::Ai,
                    run_id,
                    ts,
                    char_start,
                    char_end,
                });
            }
        }

        self.relational.insert_code_fragment_links(&links).await?;
        Ok((touched_codes, edges))
    }

    /// Phase C: projection sync. Vector upsert failures and graph sync failures are logged and
    /// swallowed; only the relational write (Phase B) can abort the run.
    async fn sync_projections(
        &self,
        project_id: ProjectId,
        owner_id: Uuid,
        interview_id: InterviewId,
        fragments: &[Fragment],
        codes: &[Code],
        edges: &[CodedAsEdge],
    ) {
        let codes_by_fragment: std::collections::HashMap<FragmentId, Vec<String>> = {
            let mut map: std::collections::HashMap<FragmentId, Vec<String>> =
                std::collections::HashMap::new();
            for edge in edges {
                if let Some(label) = codes.iter().find(|c| c.id == edge.code_id).map(|c| c.label.clone()) {
                    map.entry(edge.fragment_id).or_default().push(label);
                }
            }
            map
        };

        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let embeddings = tokio::time::timeout(STEP_TIMEOUT, self.llm.embed(&texts)).await;
        match embeddings {
            Ok(Ok(embeddings)) => {
                let points: Vec<FragmentEmbeddingPoint> = fragments
                    .iter()
                    .zip(embeddings)
                    .map(|(fragment, embedding)| FragmentEmbeddingPoint {
                        project_id,
                        owner_id,
                        interview_id,
                        fragment_id: fragment.id,
                        text: fragment.text.clone(),
                        embedding,
                        codes: codes_by_fragment.get(&fragment.id).cloned().unwrap_or_default(),
                        created_at: Utc::now(),
                    })
                    .collect();
                let synced_ids: Vec<FragmentId> = points.iter().map(|p| p.fragment_id).collect();
                match tokio::time::timeout(STEP_TIMEOUT, self.vector.upsert_fragment_embeddings(&points)).await {
                    Ok(Ok(())) => {
                        if let Err(err) = self.relational.mark_fragment_embedding_synced(&synced_ids).await {
                            tracing::warn!(error = %err, "marking fragments embedding-synced failed");
                        }
                    }
                    Ok(Err(err)) => tracing::warn!(error = %err, "vector sync failed, continuing"),
                    Err(_) => tracing::warn!("vector sync timed out, continuing"),
                }
            }
            Ok(Err(err)) => tracing::warn!(error = %err, "embedding call failed, skipping vector sync"),
            Err(_) => tracing::warn!("embedding call timed out, skipping vector sync"),
        }

        match tokio::time::timeout(
            STEP_TIMEOUT,
            self.graph
                .sync_interview_coding(project_id, interview_id, fragments, codes, edges),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "graph sync failed, continuing"),
            Err(_) => tracing::warn!("graph sync timed out, continuing"),
        }
    }

    pub async fn auto_code_interview(
        &self,
        project_id: ProjectId,
        interview_id: InterviewId,
    ) -> Result<(), PipelineError> {
        let project = self.relational.load_project(project_id).await?;
        let fragments = self.relational.load_fragments(interview_id).await?;
        if fragments.is_empty() {
            tracing::info!(interview_id = %interview_id, "no fragments, skipping");
            return Ok(());
        }

        let codes_cache = self.relational.load_codes(project_id).await?;
        let classifications = self.classify_fragments(&codes_cache, &fragments).await;

        let run_id = Uuid::new_v4();
        let (touched_codes, edges) = self
            .write_links(project_id, run_id, &fragments, &classifications)
            .await?;

        self.sync_projections(
            project_id,
            project.owner_id,
            interview_id,
            &fragments,
            &touched_codes,
            &edges,
        )
        .await;

        Ok(())
    }
}

#[async_trait::async_trait]
impl AutoCoder for CodingEngine {
    async fn code_interview(
        &self,
        project_id: ProjectId,
        interview_id: InterviewId,
    ) -> Result<(), PipelineError> {
        self.auto_code_interview(project_id, interview_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_char_span() {
        let span = find_char_span("the quick brown fox", "quick");
        assert_eq!(span, Some((4, 9)));
    }

    #[test]
    fn finds_case_insensitive_char_span_when_exact_fails() {
        let span = find_char_span("the Quick brown fox", "quick");
        assert_eq!(span, Some((4, 9)));
    }

    #[test]
    fn returns_none_for_empty_needle() {
        assert_eq!(find_char_span("anything", ""), None);
    }
}
