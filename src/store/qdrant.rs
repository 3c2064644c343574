//! Vector store adapter over Qdrant. Directly adapted from the teacher's
//! `QdrantClientWrapper` (`context/vector_db.rs`): lazy client handle behind
//! `Arc<RwLock<Option<Arc<Qdrant>>>>`, the same `map_qdrant_error` status-code mapping, and the
//! same `extract_*_value` payload helpers — generalized from a single fixed collection to one
//! collection per project (`project_<uuid>_fragments`), tenancy-scoped search, and
//! retry-with-backoff on transient errors per `spec.md` §4.1.

use async_trait::async_trait;
use qdrant_client::config::QdrantConfig as ClientConfig;
use qdrant_client::qdrant::{
    value::Kind as QdrantValueKind, vectors_config::Config as VectorsConfigInner, Condition,
    CreateCollection, Distance, FieldCondition, Filter, Match, PointStruct, SearchPoints,
    UpsertPoints, Value as QdrantValue, VectorParams, VectorsConfig,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ClaimEmbeddingPoint, FragmentEmbeddingPoint, VectorHit, VectorStore};
use crate::config::QdrantConfig;
use crate::error::PipelineError;
use crate::types::{ClaimId, FragmentId, InterviewId, ProjectId};

const VECTOR_DIMENSION: u64 = 3072;
const MAX_RETRY_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

fn map_qdrant_error(error: qdrant_client::QdrantError) -> PipelineError {
    match error {
        qdrant_client::QdrantError::ResponseError { status, .. } => {
            let code = status.code() as u16;
            match code {
                404 => PipelineError::StoreTransient {
                    store: "vector",
                    message: "collection or point not found".to_string(),
                },
                500..=599 => PipelineError::StoreTransient {
                    store: "vector",
                    message: format!("qdrant server error: {status}"),
                },
                _ => PipelineError::StoreFatal {
                    store: "vector",
                    source: anyhow::anyhow!("qdrant error: {status}"),
                },
            }
        }
        other => PipelineError::StoreFatal {
            store: "vector",
            source: anyhow::anyhow!("qdrant error: {other}"),
        },
    }
}

fn is_not_found(err: &PipelineError) -> bool {
    matches!(err, PipelineError::StoreTransient { message, .. } if message.contains("not found"))
}

fn is_transient(err: &PipelineError) -> bool {
    matches!(err, PipelineError::StoreTransient { .. })
}

pub struct QdrantStoreAdapter {
    client: Arc<RwLock<Option<Arc<Qdrant>>>>,
    config: QdrantConfig,
}

impl QdrantStoreAdapter {
    pub fn new(config: QdrantConfig) -> Self {
        Self {
            client: Arc::new(RwLock::new(None)),
            config,
        }
    }

    async fn get_client(&self) -> Result<Arc<Qdrant>, PipelineError> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(Arc::clone(client));
        }
        let url = self
            .config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:6334".to_string());
        let mut client_config = ClientConfig::from_url(&url);
        if let Some(api_key) = &self.config.api_key {
            client_config.api_key = Some(api_key.clone());
        }
        let client = Arc::new(Qdrant::new(client_config).map_err(map_qdrant_error)?);
        *self.client.write().await = Some(Arc::clone(&client));
        Ok(client)
    }

    fn collection_name(project_id: ProjectId) -> String {
        format!("project_{}_fragments", project_id.0)
    }

    async fn ensure_collection(&self, client: &Qdrant, collection: &str) -> Result<(), PipelineError> {
        let collections = client.list_collections().await.map_err(map_qdrant_error)?;
        if collections.collections.iter().any(|c| c.name == collection) {
            return Ok(());
        }
        let vectors_config = VectorsConfig {
            config: Some(VectorsConfigInner::Params(VectorParams {
                size: VECTOR_DIMENSION,
                distance: Distance::Cosine as i32,
                hnsw_config: None,
                quantization_config: None,
                on_disk: None,
                datatype: None,
                multivector_config: None,
            })),
        };
        client
            .create_collection(CreateCollection {
                collection_name: collection.to_string(),
                vectors_config: Some(vectors_config),
                ..Default::default()
            })
            .await
            .map_err(map_qdrant_error)?;
        Ok(())
    }

    /// Retries transient errors with exponential backoff; "not found" short-circuits to the
    /// caller's `on_not_found` value rather than retrying.
    async fn with_retry<T, F, Fut>(&self, on_not_found: T, mut call: F) -> Result<T, PipelineError>
    where
        T: Clone,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if is_not_found(&err) => return Ok(on_not_found),
                Err(err) if is_transient(&err) && attempt < MAX_RETRY_ATTEMPTS => {
                    attempt += 1;
                    let backoff = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                    tracing::warn!(attempt, backoff, "vector store transient error, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn extract_string(value: &QdrantValue) -> Option<String> {
        match &value.kind {
            Some(QdrantValueKind::StringValue(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStoreAdapter {
    async fn upsert_fragment_embeddings(
        &self,
        points: &[FragmentEmbeddingPoint],
    ) -> Result<(), PipelineError> {
        if points.is_empty() {
            return Ok(());
        }
        let project_id = points[0].project_id;
        let collection = Self::collection_name(project_id);
        let client = self.get_client().await?;
        self.ensure_collection(&client, &collection).await?;

        let structs: Vec<PointStruct> = points
            .iter()
            .map(|p| {
                let mut payload = HashMap::new();
                payload.insert("project_id".to_string(), QdrantValue::from(p.project_id.to_string()));
                payload.insert("owner_id".to_string(), QdrantValue::from(p.owner_id.to_string()));
                payload.insert("interview_id".to_string(), QdrantValue::from(p.interview_id.to_string()));
                payload.insert("fragment_id".to_string(), QdrantValue::from(p.fragment_id.to_string()));
                payload.insert("source_type".to_string(), QdrantValue::from("fragment"));
                payload.insert("text".to_string(), QdrantValue::from(p.text.clone()));
                payload.insert(
                    "created_at".to_string(),
                    QdrantValue::from(p.created_at.to_rfc3339()),
                );
                payload.insert(
                    "codes".to_string(),
                    QdrantValue::from(p.codes.clone()),
                );
                PointStruct::new(p.fragment_id.0.to_string(), p.embedding.clone(), payload)
            })
            .collect();

        self.with_retry((), || async {
            client
                .upsert_points(UpsertPoints {
                    collection_name: collection.clone(),
                    points: structs.clone(),
                    ..Default::default()
                })
                .await
                .map(|_| ())
                .map_err(map_qdrant_error)
        })
        .await
    }

    async fn upsert_claim_embeddings(
        &self,
        points: &[ClaimEmbeddingPoint],
    ) -> Result<(), PipelineError> {
        if points.is_empty() {
            return Ok(());
        }
        let project_id = points[0].project_id;
        let collection = Self::collection_name(project_id);
        let client = self.get_client().await?;
        self.ensure_collection(&client, &collection).await?;

        let structs: Vec<PointStruct> = points
            .iter()
            .map(|p| {
                let mut payload = HashMap::new();
                payload.insert("project_id".to_string(), QdrantValue::from(p.project_id.to_string()));
                payload.insert("owner_id".to_string(), QdrantValue::from(p.owner_id.to_string()));
                payload.insert("theory_id".to_string(), QdrantValue::from(p.theory_id.to_string()));
                payload.insert("claim_id".to_string(), QdrantValue::from(p.claim_id.to_string()));
                payload.insert("source_type".to_string(), QdrantValue::from("claim"));
                payload.insert("text".to_string(), QdrantValue::from(p.text.clone()));
                PointStruct::new(p.claim_id.0.to_string(), p.embedding.clone(), payload)
            })
            .collect();

        self.with_retry((), || async {
            client
                .upsert_points(UpsertPoints {
                    collection_name: collection.clone(),
                    points: structs.clone(),
                    ..Default::default()
                })
                .await
                .map(|_| ())
                .map_err(map_qdrant_error)
        })
        .await
    }

    async fn search_fragments(
        &self,
        project_id: ProjectId,
        owner_id: Option<uuid::Uuid>,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, PipelineError> {
        let collection = Self::collection_name(project_id);
        let client = self.get_client().await?;

        let mut must = vec![Condition {
            condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                FieldCondition {
                    key: "project_id".to_string(),
                    r#match: Some(Match {
                        match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(
                            project_id.to_string(),
                        )),
                    }),
                    ..Default::default()
                },
            )),
        }];
        if let Some(owner_id) = owner_id {
            must.push(Condition {
                condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                    FieldCondition {
                        key: "owner_id".to_string(),
                        r#match: Some(Match {
                            match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(
                                owner_id.to_string(),
                            )),
                        }),
                        ..Default::default()
                    },
                )),
            });
        }
        let filter = Filter {
            must,
            ..Default::default()
        };

        let embedding = query_embedding.to_vec();
        let limit_u64 = limit as u64;
        let results = self
            .with_retry(Vec::new(), || async {
                client
                    .search_points(SearchPoints {
                        collection_name: collection.clone(),
                        vector: embedding.clone(),
                        filter: Some(filter.clone()),
                        limit: limit_u64,
                        with_payload: Some(true.into()),
                        ..Default::default()
                    })
                    .await
                    .map(|r| r.result)
                    .map_err(map_qdrant_error)
            })
            .await?;

        Ok(results
            .into_iter()
            .map(|scored| {
                let payload = &scored.payload;
                let fragment_id = payload
                    .get("fragment_id")
                    .and_then(Self::extract_string)
                    .and_then(|s| uuid::Uuid::parse_str(&s).ok())
                    .map(FragmentId);
                let claim_id = payload
                    .get("claim_id")
                    .and_then(Self::extract_string)
                    .and_then(|s| uuid::Uuid::parse_str(&s).ok())
                    .map(ClaimId);
                let interview_id = payload
                    .get("interview_id")
                    .and_then(Self::extract_string)
                    .and_then(|s| uuid::Uuid::parse_str(&s).ok())
                    .map(InterviewId);
                let text = payload
                    .get("text")
                    .and_then(Self::extract_string)
                    .unwrap_or_default();
                VectorHit {
                    fragment_id,
                    claim_id,
                    interview_id,
                    score: scored.score,
                    text,
                }
            })
            .collect())
    }
}
