//! End-to-end scenarios from `spec.md` §8, driven against in-memory fakes of the three store
//! traits and the LLM gateway rather than live Postgres/Neo4j/Qdrant/LLM backends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use theogen_core::config::{BudgetConfig, ConcurrencyConfig, FeatureToggles, JudgeConfig};
use theogen_core::coding::CodingEngine;
use theogen_core::error::PipelineError;
use theogen_core::llm::{LlmGateway, RouteOutcome, RouteUsage};
use theogen_core::store::{
    ClaimEmbeddingPoint, CodedAsEdge, FragmentEmbeddingPoint, GraphStore, NetworkSummary,
    RelationalStore, VectorHit, VectorStore,
};
use theogen_core::theory::{AutoCoder, TheoryPipeline, TheoryRunRequest};
use theogen_core::types::*;

#[derive(Default)]
struct RelationalState {
    project: Option<Project>,
    interviews: HashMap<InterviewId, Interview>,
    fragments: HashMap<InterviewId, Vec<Fragment>>,
    codes: Vec<Code>,
    categories: Vec<Category>,
    links: Vec<CodeFragmentLink>,
    theories: Vec<Theory>,
}

struct FakeRelationalStore {
    state: Mutex<RelationalState>,
}

impl FakeRelationalStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(RelationalState::default()),
        }
    }
}

#[async_trait]
impl RelationalStore for FakeRelationalStore {
    async fn load_project(&self, project_id: ProjectId) -> Result<Project, PipelineError> {
        self.state
            .lock()
            .unwrap()
            .project
            .clone()
            .filter(|p| p.id == project_id)
            .ok_or(PipelineError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            })
    }

    async fn load_interview(&self, interview_id: InterviewId) -> Result<Interview, PipelineError> {
        self.state
            .lock()
            .unwrap()
            .interviews
            .get(&interview_id)
            .cloned()
            .ok_or(PipelineError::NotFound {
                entity: "interview",
                id: interview_id.to_string(),
            })
    }

    async fn load_fragments(&self, interview_id: InterviewId) -> Result<Vec<Fragment>, PipelineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .fragments
            .get(&interview_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_codes(&self, project_id: ProjectId) -> Result<Vec<Code>, PipelineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .codes
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn load_categories(&self, project_id: ProjectId) -> Result<Vec<Category>, PipelineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .categories
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn load_completed_uncoded_interviews(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<InterviewId>, PipelineError> {
        let state = self.state.lock().unwrap();
        let coded: std::collections::HashSet<FragmentId> =
            state.links.iter().map(|l| l.fragment_id).collect();
        Ok(state
            .interviews
            .values()
            .filter(|i| i.project_id == project_id && i.is_ready_for_coding())
            .filter(|i| {
                state
                    .fragments
                    .get(&i.id)
                    .map(|frags| !frags.is_empty() && frags.iter().all(|f| !coded.contains(&f.id)))
                    .unwrap_or(false)
            })
            .map(|i| i.id)
            .collect())
    }

    async fn get_or_create_code(
        &self,
        project_id: ProjectId,
        label: &str,
        definition: Option<&str>,
        created_by: &str,
    ) -> Result<Code, PipelineError> {
        let mut state = self.state.lock().unwrap();
        let key = Code::label_key(label);
        if let Some(existing) = state
            .codes
            .iter()
            .find(|c| c.project_id == project_id && Code::label_key(&c.label) == key)
        {
            return Ok(existing.clone());
        }
        let code = Code {
            id: CodeId::new(),
            project_id,
            label: label.to_string(),
            definition: definition.map(|s| s.to_string()),
            category_id: None,
            created_by: created_by.to_string(),
        };
        state.codes.push(code.clone());
        Ok(code)
    }

    async fn insert_code_fragment_links(
        &self,
        links: &[CodeFragmentLink],
    ) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap();
        for link in links {
            let exists = state
                .links
                .iter()
                .any(|l| l.code_id == link.code_id && l.fragment_id == link.fragment_id);
            if !exists {
                state.links.push(link.clone());
            }
        }
        Ok(())
    }

    async fn mark_fragment_embedding_synced(
        &self,
        fragment_ids: &[FragmentId],
    ) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap();
        for frags in state.fragments.values_mut() {
            for fragment in frags.iter_mut() {
                if fragment_ids.contains(&fragment.id) {
                    fragment.embedding_synced = true;
                }
            }
        }
        Ok(())
    }

    async fn upsert_category(
        &self,
        project_id: ProjectId,
        name: &str,
        is_central: bool,
    ) -> Result<Category, PipelineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .categories
            .iter()
            .find(|c| c.project_id == project_id && c.name == name)
        {
            return Ok(existing.clone());
        }
        let category = Category {
            id: CategoryId::new(),
            project_id,
            name: name.to_string(),
            definition: Some(format!("{name} definition")),
            is_central,
        };
        state.categories.push(category.clone());
        Ok(category)
    }

    async fn save_theory(&self, theory: &Theory) -> Result<(), PipelineError> {
        self.state.lock().unwrap().theories.push(theory.clone());
        Ok(())
    }

    async fn load_recent_theories(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> Result<Vec<Theory>, PipelineError> {
        let state = self.state.lock().unwrap();
        let mut theories: Vec<Theory> = state
            .theories
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        theories.sort_by_key(|t| -t.version);
        theories.truncate(limit);
        Ok(theories)
    }
}

struct FakeGraphStore;

#[async_trait]
impl GraphStore for FakeGraphStore {
    async fn sync_interview_coding(
        &self,
        _project_id: ProjectId,
        _interview_id: InterviewId,
        _fragments: &[Fragment],
        _codes: &[Code],
        _edges: &[CodedAsEdge],
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn sync_category_taxonomy(
        &self,
        _project_id: ProjectId,
        _categories: &[Category],
        _codes: &[Code],
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn compute_network_metrics(
        &self,
        project_id: ProjectId,
    ) -> Result<NetworkSummary, PipelineError> {
        let _ = project_id;
        Ok(NetworkSummary::default())
    }

    async fn sync_claims(&self, _project_id: ProjectId, _claims: &[Claim]) -> Result<(), PipelineError> {
        Ok(())
    }
}

struct FakeVectorStore;

impl FakeVectorStore {
    fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn upsert_fragment_embeddings(
        &self,
        _points: &[FragmentEmbeddingPoint],
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn upsert_claim_embeddings(&self, _points: &[ClaimEmbeddingPoint]) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn search_fragments(
        &self,
        _project_id: ProjectId,
        _owner_id: Option<Uuid>,
        _query_embedding: &[f32],
        _limit: usize,
    ) -> Result<Vec<VectorHit>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Deterministic gateway: `embed` returns a length-keyed placeholder vector (its value is never
/// inspected downstream in this harness) and `route` answers each pipeline stage with fixed,
/// spec-shaped JSON keyed by task name.
struct FakeLlmGateway {
    central_category: String,
    category_names: Vec<String>,
    evidence_ids: Vec<String>,
}

#[async_trait]
impl LlmGateway for FakeLlmGateway {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
    }

    async fn reason(&self, _messages: &[theogen_core::budget::ChatMessage], _max_out: usize) -> Result<String, PipelineError> {
        Ok("{}".to_string())
    }

    async fn route(&self, task: &str, prompt: &str, _system: &str) -> Result<RouteOutcome, PipelineError> {
        let text = match task {
            "coding" => {
                serde_json::json!({"extracted_codes": [{"label": "barrier", "definition": "a barrier", "confidence": 0.8, "evidence_text": "quick"}]}).to_string()
            }
            "identify_central_category" => {
                serde_json::json!({"selected_central_category": self.central_category}).to_string()
            }
            "build_paradigm" => {
                let other: Vec<&String> = self
                    .category_names
                    .iter()
                    .filter(|n| **n != self.central_category)
                    .collect();
                let item = |name: &str| {
                    serde_json::json!({
                        "construct": name,
                        "description": format!("{name} description"),
                        "evidence_ids": self.evidence_ids.clone(),
                    })
                };
                let propositions: Vec<serde_json::Value> = (0..5)
                    .map(|i| {
                        serde_json::json!({
                            "text": format!("Proposition {i} about {}", self.central_category),
                            "evidence_ids": self.evidence_ids.clone(),
                        })
                    })
                    .collect();
                serde_json::json!({
                    "selected_central_category": self.central_category,
                    "conditions": other.iter().map(|n| item(n)).collect::<Vec<_>>(),
                    "context": [],
                    "intervening_conditions": [],
                    "actions": other.iter().map(|n| item(n)).collect::<Vec<_>>(),
                    "consequences": [
                        {"construct": self.central_category, "description": "material effect", "evidence_ids": self.evidence_ids, "kind": "material", "horizon": "corto_plazo"},
                        {"construct": self.central_category, "description": "social effect", "evidence_ids": self.evidence_ids, "kind": "social", "horizon": "largo_plazo"},
                        {"construct": self.central_category, "description": "institutional effect", "evidence_ids": self.evidence_ids, "kind": "institutional", "horizon": "largo_plazo"},
                    ],
                    "propositions": propositions,
                    "confidence_score": 0.82,
                })
                .to_string()
            }
            "analyze_gaps" => serde_json::json!({"saturation": "high", "sampling_plan": []}).to_string(),
            "repair" => serde_json::json!({}).to_string(),
            other => panic!("unexpected task in FakeLlmGateway::route: {other} (prompt={prompt})"),
        };
        Ok(RouteOutcome {
            text,
            model: "fake".to_string(),
            usage: RouteUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
            },
        })
    }
}

struct NoopAutoCoder;

#[async_trait]
impl AutoCoder for NoopAutoCoder {
    async fn code_interview(&self, _project_id: ProjectId, _interview_id: InterviewId) -> Result<(), PipelineError> {
        Ok(())
    }
}

fn make_fragment(interview_id: InterviewId, text: &str) -> Fragment {
    Fragment {
        id: FragmentId::new(),
        interview_id,
        text: text.to_string(),
        start_offset: 0,
        end_offset: text.len() as i32,
        paragraph_index: Some(0),
        start_ms: None,
        end_ms: None,
        speaker_id: None,
        embedding_synced: false,
    }
}

#[tokio::test]
async fn auto_code_interview_on_empty_interview_is_a_soft_success() {
    let project_id = ProjectId::new();
    let relational = Arc::new(FakeRelationalStore::new());
    relational.state.lock().unwrap().project = Some(Project {
        id: project_id,
        tenant_id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        domain_template: "generic".to_string(),
        language: "en".to_string(),
        created_at: Utc::now(),
    });
    let interview_id = InterviewId::new();
    relational.state.lock().unwrap().interviews.insert(
        interview_id,
        Interview {
            id: interview_id,
            project_id,
            status: TranscriptionStatus::Completed,
            full_text: String::new(),
            word_count: 0,
            language: "en".to_string(),
        },
    );

    let engine = CodingEngine {
        relational: relational.clone(),
        graph: Arc::new(FakeGraphStore),
        vector: Arc::new(FakeVectorStore::new()),
        llm: Arc::new(FakeLlmGateway {
            central_category: "x".to_string(),
            category_names: vec![],
            evidence_ids: vec![],
        }),
        concurrency: ConcurrencyConfig::default(),
    };

    let result = engine.auto_code_interview(project_id, interview_id).await;
    assert!(result.is_ok());
    assert!(relational.state.lock().unwrap().links.is_empty());
}

#[tokio::test]
async fn auto_code_interview_twice_produces_no_duplicate_links() {
    let project_id = ProjectId::new();
    let relational = Arc::new(FakeRelationalStore::new());
    relational.state.lock().unwrap().project = Some(Project {
        id: project_id,
        tenant_id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        domain_template: "generic".to_string(),
        language: "en".to_string(),
        created_at: Utc::now(),
    });
    let interview_id = InterviewId::new();
    relational.state.lock().unwrap().interviews.insert(
        interview_id,
        Interview {
            id: interview_id,
            project_id,
            status: TranscriptionStatus::Completed,
            full_text: "the quick brown fox".to_string(),
            word_count: 4,
            language: "en".to_string(),
        },
    );
    let fragment = make_fragment(interview_id, "the quick brown fox");
    relational
        .state
        .lock()
        .unwrap()
        .fragments
        .insert(interview_id, vec![fragment]);

    let engine = CodingEngine {
        relational: relational.clone(),
        graph: Arc::new(FakeGraphStore),
        vector: Arc::new(FakeVectorStore::new()),
        llm: Arc::new(FakeLlmGateway {
            central_category: "x".to_string(),
            category_names: vec![],
            evidence_ids: vec![],
        }),
        concurrency: ConcurrencyConfig::default(),
    };

    engine.auto_code_interview(project_id, interview_id).await.unwrap();
    engine.auto_code_interview(project_id, interview_id).await.unwrap();

    let state = relational.state.lock().unwrap();
    assert_eq!(state.links.len(), 1, "re-running coding must not duplicate links");
    assert_eq!(state.codes.len(), 1, "get_or_create_code must not create a second 'barrier' code");
}

fn make_pipeline(
    relational: Arc<FakeRelationalStore>,
    vector: Arc<FakeVectorStore>,
    llm: Arc<FakeLlmGateway>,
) -> TheoryPipeline {
    TheoryPipeline {
        relational,
        graph: Arc::new(FakeGraphStore),
        vector,
        llm,
        auto_coder: Arc::new(NoopAutoCoder),
        budget: BudgetConfig::default(),
        concurrency: ConcurrencyConfig::default(),
        judge_config: JudgeConfig::default(),
        features: FeatureToggles {
            sync_claims_graph: false,
            sync_claims_vector: false,
            ..FeatureToggles::default()
        },
    }
}

#[tokio::test]
async fn theory_pipeline_fails_with_insufficient_categories_when_fewer_than_two() {
    let project_id = ProjectId::new();
    let relational = Arc::new(FakeRelationalStore::new());
    relational.state.lock().unwrap().categories.push(Category {
        id: CategoryId::new(),
        project_id,
        name: "only one".to_string(),
        definition: None,
        is_central: false,
    });

    let pipeline = make_pipeline(
        relational,
        Arc::new(FakeVectorStore::new()),
        Arc::new(FakeLlmGateway {
            central_category: "only one".to_string(),
            category_names: vec!["only one".to_string()],
            evidence_ids: vec![],
        }),
    );

    let request = TheoryRunRequest {
        project_id,
        owner_id: None,
        template_key: "generic".to_string(),
        top_n_categories: 8,
    };

    let err = pipeline
        .run(&request, &|_, _| {}, &|| {})
        .await
        .expect_err("fewer than two categories must abort with INSUFFICIENT_CATEGORIES");
    assert_eq!(err.code(), "INSUFFICIENT_CATEGORIES");
}

/// Scenario 1 (`spec.md` §8): happy path, small project — pipeline completes with a judged,
/// saved theory carrying at least 5 propositions, each with non-empty evidence.
#[tokio::test]
async fn theory_pipeline_happy_path_produces_a_judged_theory() {
    let project_id = ProjectId::new();
    let relational = Arc::new(FakeRelationalStore::new());

    let cat_a = Category {
        id: CategoryId::new(),
        project_id,
        name: "access".to_string(),
        definition: Some("access to services".to_string()),
        is_central: false,
    };
    let cat_b = Category {
        id: CategoryId::new(),
        project_id,
        name: "trust".to_string(),
        definition: Some("trust in institutions".to_string()),
        is_central: false,
    };
    {
        let mut state = relational.state.lock().unwrap();
        state.categories.push(cat_a.clone());
        state.categories.push(cat_b.clone());
    }

    // `search_fragments` always returns no hits in this harness, so these evidence ids won't
    // resolve against `EvidenceIndex::known_evidence_ids` and the judge will raise
    // `EVIDENCE_MISSING`. That's fine here: a project's first-ever theory run always resolves to
    // warn-only mode (fewer than `rollout_min_theories` past results), so the run still completes
    // and persists. The judge's evidence-index wiring itself is covered directly in
    // `theory::judge`'s own tests.
    let evidence_ids = vec![FragmentId::new().to_string(), FragmentId::new().to_string()];

    let llm = Arc::new(FakeLlmGateway {
        central_category: "access".to_string(),
        category_names: vec!["access".to_string(), "trust".to_string()],
        evidence_ids,
    });

    let pipeline = make_pipeline(relational.clone(), Arc::new(FakeVectorStore::new()), llm);
    let request = TheoryRunRequest {
        project_id,
        owner_id: None,
        template_key: "generic".to_string(),
        top_n_categories: 8,
    };

    let result = pipeline
        .run(&request, &|_, _| {}, &|| {})
        .await
        .expect("happy-path run should complete");

    assert_eq!(result.theory.project_id, project_id);
    assert_eq!(result.theory.status, TheoryStatus::Completed);
    let propositions = result
        .theory
        .propositions
        .as_array()
        .expect("propositions must serialize as an array");
    assert!(propositions.len() >= 5);
    assert_eq!(relational.state.lock().unwrap().theories.len(), 1);
}
