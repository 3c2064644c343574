//! Theory Engine (`spec.md` §4.5, C5): a staged, token-budgeted LLM reasoning chain producing a
//! grounded-theory paradigm with full provenance. Grounded stage-by-stage in
//! `original_source/backend/app/engines/theory_pipeline.py::TheoryPipeline.run` and
//! `theory_engine.py`.

pub mod judge;
pub mod prompts;

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::{ensure_within_budget, BudgetDebug, ChatMessage, DegradeStep};
use crate::config::{BudgetConfig, ConcurrencyConfig, FeatureToggles, JudgeConfig};
use crate::error::PipelineError;
use crate::llm::LlmGateway;
use crate::store::{ClaimEmbeddingPoint, GraphStore, NetworkSummary, RelationalStore, VectorStore};
use crate::types::*;
use judge::{JudgeResult, RolloutMode, RolloutPolicy, TheoryJudge};
use prompts::{build_prompt, PromptStep};

/// Result of one pipeline stage: succeeded cleanly, succeeded after degrading the payload, or
/// failed outright. Modeled as a plain enum rather than a bespoke effect type — `?` already
/// gives the caller one place to decide whether to keep going.
pub enum StageOutcome<T> {
    Ok(T),
    Degraded(T, Vec<DegradeStep>),
    Failed(PipelineError),
}

impl<T> StageOutcome<T> {
    pub fn into_result(self) -> Result<(T, Vec<DegradeStep>), PipelineError> {
        match self {
            StageOutcome::Ok(value) => Ok((value, Vec::new())),
            StageOutcome::Degraded(value, steps) => Ok((value, steps)),
            StageOutcome::Failed(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TheoryRunRequest {
    pub project_id: ProjectId,
    pub owner_id: Option<Uuid>,
    pub template_key: String,
    pub top_n_categories: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TheoryResult {
    pub theory: Theory,
}

/// Auto-coding hook the Preflight stage calls when a project has fewer than two categories.
/// Modeled as a trait rather than pulling in `crate::coding::CodingEngine` directly so the
/// Theory Engine doesn't depend on the Coding Engine's concrete type, mirroring the teacher's
/// seam-at-the-trait-boundary convention.
#[async_trait::async_trait]
pub trait AutoCoder: Send + Sync {
    async fn code_interview(
        &self,
        project_id: ProjectId,
        interview_id: InterviewId,
    ) -> Result<(), PipelineError>;
}

pub struct TheoryPipeline {
    pub relational: Arc<dyn RelationalStore>,
    pub graph: Arc<dyn GraphStore>,
    pub vector: Arc<dyn VectorStore>,
    pub llm: Arc<dyn LlmGateway>,
    pub auto_coder: Arc<dyn AutoCoder>,
    pub budget: BudgetConfig,
    pub concurrency: ConcurrencyConfig,
    pub judge_config: JudgeConfig,
    pub features: FeatureToggles,
}

impl TheoryPipeline {
    /// Stage 1: Preflight. Loads categories/codes; auto-codes uncoded interviews when the
    /// project has fewer than two categories, then bootstraps categories from code labels when
    /// still short. Fails with `INSUFFICIENT_CATEGORIES` only when both escape hatches leave the
    /// project with fewer than two categories.
    async fn preflight(
        &self,
        project_id: ProjectId,
    ) -> Result<(Vec<Category>, Vec<Code>), PipelineError> {
        let mut categories = self.relational.load_categories(project_id).await?;
        let mut codes = self.relational.load_codes(project_id).await?;

        if categories.len() < 2 {
            let uncoded = self
                .relational
                .load_completed_uncoded_interviews(project_id)
                .await?;
            let semaphore = Arc::new(tokio::sync::Semaphore::new(
                self.concurrency.theory_interview_concurrency.max(1),
            ));
            let mut handles = Vec::new();
            for interview_id in uncoded {
                let semaphore = Arc::clone(&semaphore);
                let auto_coder = Arc::clone(&self.auto_coder);
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    auto_coder.code_interview(project_id, interview_id).await
                }));
            }
            for handle in handles {
                if let Ok(Err(err)) = handle.await {
                    tracing::warn!(error = %err, "auto-coding an interview during preflight failed");
                }
            }
            codes = self.relational.load_codes(project_id).await?;
        }

        if categories.len() < 2 {
            // Bootstrap: promote each distinct code label to its own category.
            let mut seen = HashSet::new();
            for code in &codes {
                let key = Code::label_key(&code.label);
                if seen.insert(key) {
                    let category = self
                        .relational
                        .upsert_category(project_id, &code.label, false)
                        .await?;
                    categories.push(category);
                }
            }
        }

        if categories.len() < 2 {
            return Err(PipelineError::InsufficientCategories {
                categories: categories.len(),
                codes: codes.len(),
                interviews: 0,
            });
        }

        Ok((categories, codes))
    }

    /// Stage 4: Semantic evidence. Embeds `"<name>. <definition>"` for the top-N categories and
    /// retrieves supporting fragments from the vector store.
    async fn semantic_evidence(
        &self,
        request: &TheoryRunRequest,
        categories: &[Category],
        network: &NetworkSummary,
    ) -> Result<HashMap<CategoryId, Vec<crate::store::VectorHit>>, PipelineError> {
        let mut ranked: Vec<&Category> = categories.iter().collect();
        ranked.sort_by(|a, b| {
            let score = |cat: &Category| {
                network
                    .metrics
                    .iter()
                    .find(|m| m.category_id == cat.id)
                    .map(|m| {
                        (
                            m.pagerank.unwrap_or(0.0),
                            m.gds_degree.unwrap_or(0.0),
                            m.code_degree as f32,
                            m.fragment_degree as f32,
                        )
                    })
                    .unwrap_or((0.0, 0.0, 0.0, 0.0))
            };
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top: Vec<&Category> = ranked.into_iter().take(request.top_n_categories.max(1)).collect();
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.concurrency.theory_qdrant_retrieval_concurrency.max(1),
        ));
        let mut handles = Vec::new();
        for category in top {
            let text = format!(
                "{}. {}",
                category.name,
                category.definition.clone().unwrap_or_default()
            );
            let embedding = self
                .llm
                .embed(std::slice::from_ref(&text))
                .await?
                .into_iter()
                .next()
                .unwrap_or_default();
            let semaphore = Arc::clone(&semaphore);
            let vector = Arc::clone(&self.vector);
            let project_id = request.project_id;
            let owner_id = request.owner_id;
            let category_id = category.id;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let hits = vector
                    .search_fragments(project_id, owner_id, &embedding, 20)
                    .await;
                (category_id, hits)
            }));
        }

        let mut evidence_by_category = HashMap::new();
        for handle in handles {
            if let Ok((category_id, Ok(hits))) = handle.await {
                evidence_by_category.insert(category_id, hits);
            }
        }
        Ok(evidence_by_category)
    }

    async fn call_stage_llm(
        &self,
        task: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(serde_json::Value, Vec<ChatMessage>), PipelineError> {
        let system = messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let user = messages
            .get(1)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let outcome = self.llm.route(task, &user, &system).await?;
        let raw = crate::json_decode::decode_llm_json(&outcome.text)?;
        Ok((raw, messages))
    }

    /// Stage 5 helper: runs one budgeted reasoning call. `build_payload` renders the JSON-ish
    /// user payload from the current (possibly degraded) state; `degrade_cb` shrinks that state
    /// and reports which [`DegradeStep`] it took.
    async fn budgeted_stage<B, D>(
        &self,
        task: &str,
        template_key: &str,
        step: PromptStep,
        model_hint: &str,
        mut build_payload: B,
        mut degrade_cb: D,
    ) -> Result<(serde_json::Value, BudgetDebug), PipelineError>
    where
        B: FnMut() -> String,
        D: FnMut(DegradeStep) -> bool,
    {
        let budget = &self.budget;
        let (messages, debug) = ensure_within_budget(
            model_hint,
            budget.context_limit,
            budget.max_output_tokens,
            budget.margin,
            budget.max_degrade_steps,
            || build_prompt(step, template_key, &build_payload()),
            &mut degrade_cb,
        )
        .map_err(|err| PipelineError::BudgetExceeded {
            stage: task.to_string(),
            steps_taken: err.steps_taken,
        })?;

        let (value, _) = self.call_stage_llm(task, messages).await?;
        Ok((value, debug))
    }

    /// Full nine-stage run. `mark_step`/`refresh_lock` are threaded through exactly as the Task
    /// Orchestrator's `Pipeline::run` contract names them (`spec.md` §4.7).
    pub async fn run(
        &self,
        request: &TheoryRunRequest,
        mark_step: &dyn Fn(&str, u8),
        refresh_lock: &dyn Fn(),
    ) -> Result<TheoryResult, PipelineError> {
        mark_step("preflight", 5);
        let (categories, codes) = self.preflight(request.project_id).await?;
        refresh_lock();

        mark_step("graph_taxonomy_sync", 15);
        self.graph
            .sync_category_taxonomy(request.project_id, &categories, &codes)
            .await?;

        mark_step("network_metrics", 25);
        let network = self.graph.compute_network_metrics(request.project_id).await?;
        refresh_lock();

        mark_step("semantic_evidence", 35);
        let evidence_by_category = self
            .semantic_evidence(request, &categories, &network)
            .await?;

        let mut evidence_index = EvidenceIndex::default();
        for category in &categories {
            evidence_index
                .known_category_names
                .insert(category.name.trim().to_lowercase());
            evidence_index
                .category_ids_by_name
                .insert(category.name.trim().to_lowercase(), category.id);
        }
        for hits in evidence_by_category.values() {
            for hit in hits {
                if let (Some(fragment_id), Some(interview_id)) = (hit.fragment_id, hit.interview_id) {
                    evidence_index
                        .fragment_to_interview
                        .insert(fragment_id, interview_id);
                    evidence_index.known_evidence_ids.insert(fragment_id.to_string());
                }
            }
        }

        mark_step("llm_chain", 50);

        // Stage 1: identify central category. Only `categories`/`network-top` degrade steps
        // apply to this payload — it carries no per-category evidence fragments.
        let identify_category_count = Cell::new(categories.len().max(1));
        let identify_network_top = Cell::new(network.metrics.len().max(1));
        let build_identify_payload = || {
            let slim_categories = serde_json::to_string(
                &categories
                    .iter()
                    .take(identify_category_count.get())
                    .map(|c| serde_json::json!({"id": c.id, "name": c.name}))
                    .collect::<Vec<_>>(),
            )
            .unwrap_or_default();
            let slim_network = serde_json::to_string(
                &network
                    .metrics
                    .iter()
                    .take(identify_network_top.get())
                    .collect::<Vec<_>>(),
            )
            .unwrap_or_default();
            format!("{{\"categories\": {slim_categories}, \"network\": {slim_network}}}")
        };
        let degrade_identify = |step: DegradeStep| match step {
            DegradeStep::Categories => {
                let n = identify_category_count.get();
                if n > 1 {
                    identify_category_count.set((n / 2).max(1));
                    true
                } else {
                    false
                }
            }
            DegradeStep::NetworkTop => {
                let n = identify_network_top.get();
                if n > 1 {
                    identify_network_top.set((n / 2).max(1));
                    true
                } else {
                    false
                }
            }
            _ => false,
        };
        let (identify_raw, identify_debug) = self
            .budgeted_stage(
                "identify_central_category",
                &request.template_key,
                PromptStep::IdentifyCentralCategory,
                "reasoning-advanced",
                build_identify_payload,
                degrade_identify,
            )
            .await?;
        let central_category = identify_raw
            .get("selected_central_category")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        // Stage 2: build the Straussian paradigm. Carries per-category evidence fragments
        // retrieved in stage 4, so all six degrade steps but `network_top` apply here, in
        // priority order: shrink fragments-per-category, then fragment-chars, then the other-
        // categories list, then drop evidence from this payload entirely.
        let central_category_obj = categories.iter().find(|c| c.name == central_category);
        let other_categories: Vec<&Category> = categories
            .iter()
            .filter(|c| c.name != central_category)
            .collect();
        let paradigm_frags_per_cat = Cell::new(20usize);
        let paradigm_fragment_chars = Cell::new(4000usize);
        let paradigm_category_count = Cell::new(other_categories.len().max(1));
        let paradigm_evidence_stripped = Cell::new(false);
        let build_paradigm_payload = || {
            let cat_n = paradigm_category_count.get();
            let other_cats: Vec<&str> = other_categories
                .iter()
                .take(cat_n)
                .map(|c| c.name.as_str())
                .collect();

            let mut evidence_obj = serde_json::Map::new();
            if !paradigm_evidence_stripped.get() {
                let frags_n = paradigm_frags_per_cat.get();
                let chars_n = paradigm_fragment_chars.get();
                let included = central_category_obj
                    .into_iter()
                    .chain(other_categories.iter().take(cat_n).copied());
                for category in included {
                    let Some(hits) = evidence_by_category.get(&category.id) else {
                        continue;
                    };
                    let texts: Vec<String> = hits
                        .iter()
                        .take(frags_n)
                        .map(|h| h.text.chars().take(chars_n).collect::<String>())
                        .collect();
                    if !texts.is_empty() {
                        evidence_obj.insert(category.name.clone(), serde_json::json!(texts));
                    }
                }
            }

            serde_json::json!({
                "central_cat": central_category,
                "other_cats": other_cats,
                "evidence": evidence_obj,
            })
            .to_string()
        };
        let degrade_paradigm = |step: DegradeStep| match step {
            DegradeStep::FragmentsPerCategory => {
                if paradigm_evidence_stripped.get() {
                    return false;
                }
                let n = paradigm_frags_per_cat.get();
                if n > 1 {
                    paradigm_frags_per_cat.set((n / 2).max(1));
                    true
                } else {
                    false
                }
            }
            DegradeStep::FragmentChars => {
                if paradigm_evidence_stripped.get() {
                    return false;
                }
                let n = paradigm_fragment_chars.get();
                if n > 300 {
                    paradigm_fragment_chars.set((n / 2).max(300));
                    true
                } else {
                    false
                }
            }
            DegradeStep::Categories => {
                let n = paradigm_category_count.get();
                if n > 1 {
                    paradigm_category_count.set((n / 2).max(1));
                    true
                } else {
                    false
                }
            }
            DegradeStep::StripEvidenceStage2 => {
                if paradigm_evidence_stripped.get() {
                    false
                } else {
                    paradigm_evidence_stripped.set(true);
                    true
                }
            }
            _ => false,
        };
        let (paradigm_raw, paradigm_debug) = self
            .budgeted_stage(
                "build_paradigm",
                &request.template_key,
                PromptStep::BuildParadigm,
                "router",
                build_paradigm_payload,
                degrade_paradigm,
            )
            .await?;
        let normalized = Paradigm::normalize(paradigm_raw);
        let mut paradigm: Paradigm = serde_json::from_value(normalized).unwrap_or_default();

        // Stage 3: analyse saturation & gaps. Only `strip_evidence_stage3` applies — it drops
        // `evidence_ids` from the embedded paradigm without touching `paradigm` itself.
        let gaps_evidence_stripped = Cell::new(false);
        let build_gaps_payload = || {
            if gaps_evidence_stripped.get() {
                serde_json::json!({"theory_data": paradigm.without_evidence_ids()}).to_string()
            } else {
                serde_json::json!({"theory_data": &paradigm}).to_string()
            }
        };
        let degrade_gaps = |step: DegradeStep| match step {
            DegradeStep::StripEvidenceStage3 => {
                if gaps_evidence_stripped.get() {
                    false
                } else {
                    gaps_evidence_stripped.set(true);
                    true
                }
            }
            _ => false,
        };
        let (gaps_raw, gaps_debug) = self
            .budgeted_stage(
                "analyze_gaps",
                &request.template_key,
                PromptStep::AnalyzeGaps,
                "reasoning-fast",
                build_gaps_payload,
                degrade_gaps,
            )
            .await?;

        let paradigm_before_repair = serde_json::to_value(&paradigm).unwrap_or_default();

        mark_step("repair_loop", 65);
        let mut repairs_applied = self.run_repairs(&request.template_key, &mut paradigm).await;

        mark_step("judge", 75);
        let mut missing_evidence_seen = HashSet::new();
        let missing_evidence: Vec<String> = paradigm
            .referenced_evidence_ids()
            .into_iter()
            .filter(|id| !evidence_index.is_known(id) && missing_evidence_seen.insert(id.to_string()))
            .map(|id| id.to_string())
            .collect();
        let judge = TheoryJudge::new(&self.judge_config, evidence_index.fragment_to_interview.len());
        let judge_result = judge.evaluate(&paradigm, &evidence_index, &missing_evidence);

        let past_results = self
            .relational
            .load_recent_theories(request.project_id, self.judge_config.rollout_window)
            .await
            .unwrap_or_default();
        let past_ok: Vec<bool> = past_results
            .iter()
            .rev()
            .map(|t| t.validation.get("judge_ok").and_then(|v| v.as_bool()).unwrap_or(true))
            .collect();
        let rollout = RolloutPolicy::new(&self.judge_config);
        let current_mode = if self.features.judge_warn_only {
            RolloutMode::WarnOnly
        } else {
            RolloutMode::Strict
        };
        let effective_mode = rollout.resolve_mode(&past_ok, current_mode);

        if effective_mode == RolloutMode::Strict && !judge_result.ok {
            repairs_applied.extend(self.run_repairs(&request.template_key, &mut paradigm).await);
            let rejudged = judge.evaluate(&paradigm, &evidence_index, &missing_evidence);
            if !rejudged.ok {
                return Err(PipelineError::JudgeFailed {
                    codes: rejudged.error_codes(),
                });
            }
        }
        repairs_applied.sort();
        repairs_applied.dedup();

        mark_step("persist", 90);
        let theory_id = TheoryId::new();
        let validation = serde_json::json!({
            "gap_analysis": gaps_raw,
            "network_metrics_summary": {
                "category_count": network.category_count,
                "code_count": network.code_count,
                "fragment_count": network.fragment_count,
                "used_gds": network.used_gds,
            },
            "judge_ok": judge_result.ok,
            "judge_errors": judge_result.errors,
            "judge_warnings": judge_result.warnings,
            "rollout_mode": format!("{effective_mode:?}"),
            "budget_debug": {
                "identify_central_category": identify_debug,
                "paradigm": paradigm_debug,
                "analyze_gaps": gaps_debug,
            },
            "paradigm_validation": {
                "before": paradigm_before_repair,
                "after": serde_json::to_value(&paradigm).unwrap_or_default(),
                "repairs_applied": repairs_applied,
                "evidence_index_used": {
                    "known_evidence_ids": evidence_index.known_evidence_ids.len(),
                    "known_category_names": evidence_index.known_category_names.len(),
                    "fragment_to_interview_count": evidence_index.fragment_to_interview.len(),
                },
            },
            "pipeline_runtime": {
                "template_key": request.template_key,
                "project_id": request.project_id,
            },
        });

        let theory = Theory {
            id: theory_id,
            project_id: request.project_id,
            version: past_results.len() as i32 + 1,
            model_json: serde_json::to_value(&paradigm).unwrap_or_default(),
            propositions: serde_json::to_value(&paradigm.propositions).unwrap_or_default(),
            validation,
            gaps: gaps_raw,
            confidence_score: paradigm.confidence_score,
            status: TheoryStatus::Completed,
        };
        self.relational.save_theory(&theory).await?;

        if self.features.sync_claims_graph || self.features.sync_claims_vector {
            mark_step("claim_projection", 97);
            let claims = self.project_claims(theory_id, &paradigm, &evidence_index);
            if self.features.sync_claims_graph {
                if let Err(err) = self.graph.sync_claims(request.project_id, &claims).await {
                    tracing::warn!(error = %err, "claim graph sync failed, continuing");
                }
            }
            if self.features.sync_claims_vector {
                let points: Vec<ClaimEmbeddingPoint> = claims
                    .iter()
                    .map(|c| ClaimEmbeddingPoint {
                        project_id: request.project_id,
                        owner_id: request.owner_id.unwrap_or_default(),
                        theory_id,
                        claim_id: c.id,
                        text: c.text.clone(),
                    })
                    .collect();
                if !points.is_empty() {
                    if let Ok(embeddings) = self
                        .llm
                        .embed(&points.iter().map(|p| p.text.clone()).collect::<Vec<_>>())
                        .await
                    {
                        let mut embedded_points = points;
                        for (point, embedding) in embedded_points.iter_mut().zip(embeddings) {
                            point.embedding = embedding;
                        }
                        if let Err(err) = self.vector.upsert_claim_embeddings(&embedded_points).await {
                            tracing::warn!(error = %err, "claim vector sync failed, continuing");
                        }
                    }
                }
            }
        }

        mark_step("done", 100);
        Ok(TheoryResult { theory })
    }

    /// Stage 6: repair loop. Best-effort: each repair failure leaves the original section
    /// intact rather than aborting the run. Returns the section names actually patched, for
    /// `validation.paradigm_validation.repairs_applied`.
    async fn run_repairs(&self, template_key: &str, paradigm: &mut Paradigm) -> Vec<String> {
        let mut applied = Vec::new();
        let needs_consequence_repair = {
            let types_present: HashSet<_> = paradigm.consequences.iter().filter_map(|c| c.kind).collect();
            let horizons_present: HashSet<_> = paradigm.consequences.iter().filter_map(|c| c.horizon).collect();
            types_present.len() < 3 || horizons_present.len() < 2
        };
        let needs_proposition_repair = paradigm.propositions.len() < 5
            || paradigm
                .propositions
                .iter()
                .any(|p| p.evidence_ids.is_empty());
        let needs_context_repair = paradigm.context.is_empty() && paradigm.intervening_conditions.is_empty();

        for (needed, section) in [
            (needs_consequence_repair, "consequences"),
            (needs_proposition_repair, "propositions"),
            (needs_context_repair, "context_intervening"),
        ] {
            if !needed {
                continue;
            }
            let payload = serde_json::json!({"section": section, "paradigm": &paradigm}).to_string();
            let messages = build_prompt(PromptStep::Repair, template_key, &payload);
            match self.call_stage_llm("repair", messages).await {
                Ok((patch, _)) => {
                    if self.apply_repair_patch(paradigm, section, patch) {
                        applied.push(section.to_string());
                    }
                }
                Err(err) => tracing::warn!(error = %err, section, "repair call failed, keeping original section"),
            }
        }
        applied
    }

    /// Applies one repair patch to `paradigm`. Returns whether the patch actually changed a
    /// section — a patch missing its expected key, or failing to parse, leaves the section
    /// untouched and reports no change.
    fn apply_repair_patch(&self, paradigm: &mut Paradigm, section: &str, patch: serde_json::Value) -> bool {
        let mut changed = false;
        match section {
            "consequences" => {
                if let Some(items) = patch.get("consequences").and_then(|v| v.as_array()) {
                    if let Ok(parsed) = serde_json::from_value::<Vec<ConsequenceItem>>(
                        serde_json::Value::Array(items.clone()),
                    ) {
                        paradigm.consequences = parsed;
                        changed = true;
                    }
                }
            }
            "propositions" => {
                if let Some(items) = patch.get("propositions").and_then(|v| v.as_array()) {
                    if let Ok(parsed) = serde_json::from_value::<Vec<Proposition>>(
                        serde_json::Value::Array(items.clone()),
                    ) {
                        paradigm.propositions = parsed;
                        changed = true;
                    }
                }
            }
            "context_intervening" => {
                if let Some(items) = patch.get("context").and_then(|v| v.as_array()) {
                    if let Ok(parsed) = serde_json::from_value::<Vec<ParadigmItem>>(
                        serde_json::Value::Array(items.clone()),
                    ) {
                        paradigm.context = parsed;
                        changed = true;
                    }
                }
                if let Some(items) = patch.get("intervening_conditions").and_then(|v| v.as_array()) {
                    if let Ok(parsed) = serde_json::from_value::<Vec<ParadigmItem>>(
                        serde_json::Value::Array(items.clone()),
                    ) {
                        paradigm.intervening_conditions = parsed;
                        changed = true;
                    }
                }
            }
            _ => {}
        }
        changed
    }

    /// Stage 9: claim projection. Computes stable claim ids via [`Claim::derive_id`].
    fn project_claims(
        &self,
        theory_id: TheoryId,
        paradigm: &Paradigm,
        evidence_index: &EvidenceIndex,
    ) -> Vec<Claim> {
        let mut claims = Vec::new();
        let mut order = 0i32;

        let mut push_section = |items: &[ParadigmItem], section: &str, claims: &mut Vec<Claim>, order: &mut i32| {
            for item in items {
                let category_id = evidence_index
                    .category_ids_by_name
                    .get(&item.construct.trim().to_lowercase())
                    .copied();
                let Some(category_id) = category_id else { continue };
                let id = Claim::derive_id(theory_id, section, *order, &item.construct);
                let evidence = item
                    .evidence_ids
                    .iter()
                    .filter_map(|eid| eid.parse::<Uuid>().ok())
                    .map(|uuid| (FragmentId(uuid), ClaimEvidenceEdge::SupportedBy, 0u32))
                    .collect();
                claims.push(Claim {
                    id,
                    theory_id,
                    section: section.to_string(),
                    order: *order,
                    text: item.construct.clone(),
                    about_category: category_id,
                    evidence,
                });
                *order += 1;
            }
        };

        push_section(&paradigm.conditions, "conditions", &mut claims, &mut order);
        push_section(&paradigm.context, "context", &mut claims, &mut order);
        push_section(
            &paradigm.intervening_conditions,
            "intervening_conditions",
            &mut claims,
            &mut order,
        );
        push_section(&paradigm.actions, "actions", &mut claims, &mut order);

        for item in &paradigm.consequences {
            let Some(category_id) = evidence_index
                .category_ids_by_name
                .get(&item.construct.trim().to_lowercase())
                .copied()
            else {
                continue;
            };
            let id = Claim::derive_id(theory_id, "consequences", order, &item.construct);
            let evidence = item
                .evidence_ids
                .iter()
                .filter_map(|eid| eid.parse::<Uuid>().ok())
                .map(|uuid| (FragmentId(uuid), ClaimEvidenceEdge::SupportedBy, 0u32))
                .collect();
            claims.push(Claim {
                id,
                theory_id,
                section: "consequences".to_string(),
                order,
                text: item.construct.clone(),
                about_category: category_id,
                evidence,
            });
            order += 1;
        }

        // Propositions aren't anchored to a single category, so they're only projected when the
        // central category itself is known — they're "about" the theory's center.
        if let Some(central_id) = evidence_index
            .category_ids_by_name
            .get(&paradigm.selected_central_category.trim().to_lowercase())
            .copied()
        {
            for proposition in &paradigm.propositions {
                let id = Claim::derive_id(theory_id, "propositions", order, &proposition.text);
                let evidence = proposition
                    .evidence_ids
                    .iter()
                    .filter_map(|eid| eid.parse::<Uuid>().ok())
                    .map(|uuid| (FragmentId(uuid), ClaimEvidenceEdge::SupportedBy, 0u32))
                    .collect();
                claims.push(Claim {
                    id,
                    theory_id,
                    section: "propositions".to_string(),
                    order,
                    text: proposition.text.clone(),
                    about_category: central_id,
                    evidence,
                });
                order += 1;
            }
        }

        claims
    }
}
