//! Task Orchestrator (`spec.md` §4.7, C7): an in-process task-record map mirrored to Redis,
//! a per-project distributed lock, and local-vs-broker dispatch.
//!
//! Grounded in `original_source/backend/app/api/theory.py`'s task-map-plus-background-task
//! lifecycle, generalized the way the teacher's `scheduler/task_manager.rs` generalizes per-agent
//! tasks into a `TaskManager` + in-process map + background mirror loop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::error::PipelineError;
use crate::theory::{TheoryResult, TheoryRunRequest};
use crate::types::{ProjectId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub result: Option<TheoryResult>,
    pub error: Option<TaskError>,
    pub project_id: ProjectId,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub step: Option<String>,
}

impl TaskRecord {
    fn queued(task_id: TaskId, project_id: ProjectId, owner_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Queued,
            progress: 0,
            message: None,
            result: None,
            error: None,
            project_id,
            owner_id,
            created_at: now,
            updated_at: now,
            step: None,
        }
    }
}

/// Fire-and-forget pipeline dispatch; status is always read back via the separate polling path,
/// never as a direct return value of `dispatch`.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        task_id: TaskId,
        project_id: ProjectId,
        owner_id: Option<Uuid>,
        request: TheoryRunRequest,
    ) -> Result<(), PipelineError>;
}

/// Runs the pipeline in a spawned task on this process. The default dispatch path.
pub struct InProcessDispatcher {
    pub orchestrator: Arc<TaskOrchestrator>,
    pub pipeline: Arc<crate::theory::TheoryPipeline>,
}

#[async_trait::async_trait]
impl Dispatcher for InProcessDispatcher {
    async fn dispatch(
        &self,
        task_id: TaskId,
        _project_id: ProjectId,
        _owner_id: Option<Uuid>,
        request: TheoryRunRequest,
    ) -> Result<(), PipelineError> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            orchestrator.run_task(task_id, pipeline, request).await;
        });
        Ok(())
    }
}

/// Pushes the same task message onto a Redis list for an out-of-process worker to pop, used
/// when `USE_EXTERNAL_QUEUE` is set (`SPEC_FULL.md` §4.7 [ADDED]). Reuses the orchestrator's
/// existing Redis connection rather than adding a dedicated broker client.
pub struct ExternalQueueDispatcher {
    pub redis: redis::aio::ConnectionManager,
    pub queue_key: String,
}

#[async_trait::async_trait]
impl Dispatcher for ExternalQueueDispatcher {
    async fn dispatch(
        &self,
        task_id: TaskId,
        project_id: ProjectId,
        owner_id: Option<Uuid>,
        request: TheoryRunRequest,
    ) -> Result<(), PipelineError> {
        #[derive(Serialize)]
        struct QueueMessage {
            task_id: TaskId,
            project_id: ProjectId,
            owner_id: Option<Uuid>,
            template_key: String,
            top_n_categories: usize,
        }
        let message = QueueMessage {
            task_id,
            project_id,
            owner_id,
            template_key: request.template_key,
            top_n_categories: request.top_n_categories,
        };
        let payload = serde_json::to_string(&message).map_err(|e| PipelineError::StoreFatal {
            store: "queue",
            source: anyhow::anyhow!(e),
        })?;
        let mut conn = self.redis.clone();
        redis::cmd("RPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| PipelineError::StoreTransient {
                store: "queue",
                message: e.to_string(),
            })
    }
}

/// In-process authoritative map of task records, mirrored to Redis with TTL for cross-process
/// status reads. Redis mirroring is best-effort: a failed mirror write is logged, never
/// surfaced to the caller, since the in-process map remains the source of truth for this
/// process's own polling.
pub struct TaskOrchestrator {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    redis: Option<redis::aio::ConnectionManager>,
    config: TaskConfig,
}

impl TaskOrchestrator {
    pub fn new(redis: Option<redis::aio::ConnectionManager>, config: TaskConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            redis,
            config,
        }
    }

    pub async fn create_task(&self, project_id: ProjectId, owner_id: Option<Uuid>) -> TaskId {
        let task_id = TaskId::new();
        let record = TaskRecord::queued(task_id, project_id, owner_id, Utc::now());
        self.tasks.write().await.insert(task_id, record.clone());
        self.mirror(&record).await;
        task_id
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<TaskRecord> {
        if let Some(record) = self.tasks.read().await.get(&task_id).cloned() {
            return Some(record);
        }
        self.read_mirror(task_id).await
    }

    async fn mirror(&self, record: &TaskRecord) {
        let Some(redis) = &self.redis else { return };
        let Ok(payload) = serde_json::to_string(record) else {
            return;
        };
        let mut conn = redis.clone();
        let key = format!("task:{}", record.task_id);
        if let Err(err) = redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("EX")
            .arg(self.config.task_ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await
        {
            tracing::warn!(error = %err, task_id = %record.task_id, "task mirror write failed");
        }
    }

    async fn read_mirror(&self, task_id: TaskId) -> Option<TaskRecord> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(format!("task:{task_id}"))
            .query_async(&mut conn)
            .await
            .ok()?;
        payload.and_then(|p| serde_json::from_str(&p).ok())
    }

    /// Acquires the per-project lock via `SET NX EX`. Returns `Locked` immediately when another
    /// run already holds it — cancellation isn't offered, so a stuck holder's lock simply
    /// expires and a subsequent run supersedes it.
    async fn acquire_lock(&self, project_id: ProjectId) -> Result<(), PipelineError> {
        let Some(redis) = &self.redis else { return Ok(()) };
        let mut conn = redis.clone();
        let key = format!("lock:project:{project_id}");
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.task_lock_ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| PipelineError::StoreTransient {
                store: "lock",
                message: e.to_string(),
            })?;
        if acquired.is_none() {
            return Err(PipelineError::Locked {
                retry_after_secs: self.config.poll_backoff.as_secs(),
            });
        }
        Ok(())
    }

    async fn refresh_lock(&self, project_id: ProjectId) {
        let Some(redis) = &self.redis else { return };
        let mut conn = redis.clone();
        let key = format!("lock:project:{project_id}");
        if let Err(err) = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.config.task_lock_ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await
        {
            tracing::warn!(error = %err, project_id = %project_id, "lock refresh failed");
        }
    }

    async fn release_lock(&self, project_id: ProjectId) {
        let Some(redis) = &self.redis else { return };
        let mut conn = redis.clone();
        let key = format!("lock:project:{project_id}");
        let _: Result<(), _> = redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
    }

    /// The worker's entrypoint: acquires the lock, runs the pipeline with `mark_step`/
    /// `refresh_lock` callbacks wired to this task's record, and persists the outcome.
    async fn run_task(
        self: Arc<Self>,
        task_id: TaskId,
        pipeline: Arc<crate::theory::TheoryPipeline>,
        request: TheoryRunRequest,
    ) {
        if let Err(err) = self.acquire_lock(request.project_id).await {
            self.transition(task_id, TaskStatus::Failed, 0, None, None, Some(task_error(&err)))
                .await;
            return;
        }

        self.transition(task_id, TaskStatus::Running, 1, Some("started".to_string()), None, None)
            .await;

        let orchestrator = Arc::clone(&self);
        let mark_project_id = request.project_id;
        let mark_step = move |step: &str, progress: u8| {
            let orchestrator = Arc::clone(&orchestrator);
            let task_id = task_id;
            let step = step.to_string();
            tokio::spawn(async move {
                orchestrator
                    .transition(task_id, TaskStatus::Running, progress, Some(step.clone()), None, None)
                    .await;
            });
        };
        let lock_orchestrator = Arc::clone(&self);
        let refresh_lock = move || {
            let lock_orchestrator = Arc::clone(&lock_orchestrator);
            tokio::spawn(async move {
                lock_orchestrator.refresh_lock(mark_project_id).await;
            });
        };

        let result = pipeline.run(&request, &mark_step, &refresh_lock).await;
        self.release_lock(request.project_id).await;

        match result {
            Ok(theory_result) => {
                self.transition(
                    task_id,
                    TaskStatus::Completed,
                    100,
                    Some("done".to_string()),
                    Some(theory_result),
                    None,
                )
                .await;
            }
            Err(err) => {
                self.transition(task_id, TaskStatus::Failed, 0, None, None, Some(task_error(&err)))
                    .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        progress: u8,
        step: Option<String>,
        result: Option<TheoryResult>,
        error: Option<TaskError>,
    ) {
        let mut guard = self.tasks.write().await;
        let Some(record) = guard.get_mut(&task_id) else { return };
        record.status = status;
        record.progress = progress;
        if step.is_some() {
            record.step = step;
        }
        if result.is_some() {
            record.result = result;
        }
        if error.is_some() {
            record.error = error;
        }
        record.updated_at = Utc::now();
        let snapshot = record.clone();
        drop(guard);
        self.mirror(&snapshot).await;
    }

    /// Server-suggested polling backoff, per `spec.md` §4.7 ("clients advised to wait
    /// `next_poll_seconds`").
    pub fn next_poll_seconds(&self) -> u64 {
        self.config.poll_backoff.as_secs()
    }
}

fn task_error(err: &PipelineError) -> TaskError {
    TaskError {
        code: err.code(),
        message: err.to_string(),
    }
}
