//! Relational store adapter over `sqlx::PgPool`, grounded in
//! `original_source/backend/app/engines/coding_engine.py` (`_get_or_create_code`'s
//! select-lowercase-trimmed-label-then-insert pattern) and the `models.py` schema referenced by
//! `SPEC_FULL.md` §3.
//!
//! Each method that performs more than one statement opens its own `sqlx::Transaction` rather
//! than sharing a connection across calls — no adapter method outlives the request it serves.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::RelationalStore;
use crate::error::PipelineError;
use crate::types::*;

fn map_sqlx_error(err: sqlx::Error) -> PipelineError {
    match &err {
        sqlx::Error::RowNotFound => PipelineError::NotFound {
            entity: "row",
            id: String::new(),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PipelineError::StoreTransient {
            store: "relational",
            message: err.to_string(),
        },
        _ => PipelineError::StoreFatal {
            store: "relational",
            source: anyhow::anyhow!(err),
        },
    }
}

pub struct PgStoreAdapter {
    pool: PgPool,
}

impl PgStoreAdapter {
    pub async fn connect(database_url: &str) -> Result<Self, PipelineError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    fn row_to_code(row: &sqlx::postgres::PgRow) -> Result<Code, PipelineError> {
        Ok(Code {
            id: CodeId(row.try_get("id").map_err(map_sqlx_error)?),
            project_id: ProjectId(row.try_get("project_id").map_err(map_sqlx_error)?),
            label: row.try_get("label").map_err(map_sqlx_error)?,
            definition: row.try_get("definition").map_err(map_sqlx_error)?,
            category_id: row
                .try_get::<Option<uuid::Uuid>, _>("category_id")
                .map_err(map_sqlx_error)?
                .map(CategoryId),
            created_by: row.try_get("created_by").map_err(map_sqlx_error)?,
        })
    }
}

#[async_trait]
impl RelationalStore for PgStoreAdapter {
    async fn load_project(&self, project_id: ProjectId) -> Result<Project, PipelineError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, owner_id, domain_template, language, created_at \
             FROM projects WHERE id = $1",
        )
        .bind(project_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| PipelineError::NotFound {
            entity: "project",
            id: project_id.to_string(),
        })?;

        Ok(Project {
            id: ProjectId(row.try_get("id").map_err(map_sqlx_error)?),
            tenant_id: row.try_get("tenant_id").map_err(map_sqlx_error)?,
            owner_id: row.try_get("owner_id").map_err(map_sqlx_error)?,
            domain_template: row.try_get("domain_template").map_err(map_sqlx_error)?,
            language: row.try_get("language").map_err(map_sqlx_error)?,
            created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        })
    }

    async fn load_interview(&self, interview_id: InterviewId) -> Result<Interview, PipelineError> {
        let row = sqlx::query(
            "SELECT id, project_id, status, full_text, word_count, language \
             FROM interviews WHERE id = $1",
        )
        .bind(interview_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| PipelineError::NotFound {
            entity: "interview",
            id: interview_id.to_string(),
        })?;

        let status_raw: String = row.try_get("status").map_err(map_sqlx_error)?;
        let status = match status_raw.as_str() {
            "pending" => TranscriptionStatus::Pending,
            "processing" => TranscriptionStatus::Processing,
            "retrying" => TranscriptionStatus::Retrying,
            "completed" => TranscriptionStatus::Completed,
            _ => TranscriptionStatus::Failed,
        };

        Ok(Interview {
            id: InterviewId(row.try_get("id").map_err(map_sqlx_error)?),
            project_id: ProjectId(row.try_get("project_id").map_err(map_sqlx_error)?),
            status,
            full_text: row.try_get("full_text").map_err(map_sqlx_error)?,
            word_count: row.try_get("word_count").map_err(map_sqlx_error)?,
            language: row.try_get("language").map_err(map_sqlx_error)?,
        })
    }

    async fn load_fragments(
        &self,
        interview_id: InterviewId,
    ) -> Result<Vec<Fragment>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, interview_id, text, start_offset, end_offset, paragraph_index, \
                    start_ms, end_ms, speaker_id, embedding_synced \
             FROM fragments WHERE interview_id = $1 ORDER BY start_offset",
        )
        .bind(interview_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(Fragment {
                    id: FragmentId(row.try_get("id").map_err(map_sqlx_error)?),
                    interview_id: InterviewId(row.try_get("interview_id").map_err(map_sqlx_error)?),
                    text: row.try_get("text").map_err(map_sqlx_error)?,
                    start_offset: row.try_get("start_offset").map_err(map_sqlx_error)?,
                    end_offset: row.try_get("end_offset").map_err(map_sqlx_error)?,
                    paragraph_index: row.try_get("paragraph_index").map_err(map_sqlx_error)?,
                    start_ms: row.try_get("start_ms").map_err(map_sqlx_error)?,
                    end_ms: row.try_get("end_ms").map_err(map_sqlx_error)?,
                    speaker_id: row.try_get("speaker_id").map_err(map_sqlx_error)?,
                    embedding_synced: row.try_get("embedding_synced").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    async fn load_codes(&self, project_id: ProjectId) -> Result<Vec<Code>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, project_id, label, definition, category_id, created_by \
             FROM codes WHERE project_id = $1",
        )
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(Self::row_to_code).collect()
    }

    async fn load_categories(&self, project_id: ProjectId) -> Result<Vec<Category>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, definition, is_central \
             FROM categories WHERE project_id = $1",
        )
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(Category {
                    id: CategoryId(row.try_get("id").map_err(map_sqlx_error)?),
                    project_id: ProjectId(row.try_get("project_id").map_err(map_sqlx_error)?),
                    name: row.try_get("name").map_err(map_sqlx_error)?,
                    definition: row.try_get("definition").map_err(map_sqlx_error)?,
                    is_central: row.try_get("is_central").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    async fn load_completed_uncoded_interviews(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<InterviewId>, PipelineError> {
        let rows = sqlx::query(
            "SELECT i.id FROM interviews i \
             WHERE i.project_id = $1 AND i.status = 'completed' \
               AND EXISTS (SELECT 1 FROM fragments f WHERE f.interview_id = i.id) \
               AND NOT EXISTS ( \
                 SELECT 1 FROM fragments f \
                 JOIN code_fragment_links l ON l.fragment_id = f.id \
                 WHERE f.interview_id = i.id \
               )",
        )
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| Ok(InterviewId(row.try_get("id").map_err(map_sqlx_error)?)))
            .collect()
    }

    /// Mirrors `_get_or_create_code`: a cache-miss select on `lower(trim(label))` scoped to
    /// the project, falling back to insert. Runs inside one transaction so the
    /// select-then-insert is atomic under concurrent fragment coding.
    async fn get_or_create_code(
        &self,
        project_id: ProjectId,
        label: &str,
        definition: Option<&str>,
        created_by: &str,
    ) -> Result<Code, PipelineError> {
        let label = label.trim();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        if let Some(row) = sqlx::query(
            "SELECT id, project_id, label, definition, category_id, created_by FROM codes \
             WHERE project_id = $1 AND lower(trim(label)) = lower(trim($2)) LIMIT 1",
        )
        .bind(project_id.0)
        .bind(label)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        {
            let code = Self::row_to_code(&row)?;
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(code);
        }

        let new_id = CodeId::new();
        sqlx::query(
            "INSERT INTO codes (id, project_id, label, definition, created_by) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (project_id, label) DO NOTHING",
        )
        .bind(new_id.0)
        .bind(project_id.0)
        .bind(label)
        .bind(definition)
        .bind(created_by)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        // Another concurrent coder may have won the insert race; re-select rather than trust
        // `new_id` blindly.
        let row = sqlx::query(
            "SELECT id, project_id, label, definition, category_id, created_by FROM codes \
             WHERE project_id = $1 AND lower(trim(label)) = lower(trim($2)) LIMIT 1",
        )
        .bind(project_id.0)
        .bind(label)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let code = Self::row_to_code(&row)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(code)
    }

    async fn insert_code_fragment_links(
        &self,
        links: &[CodeFragmentLink],
    ) -> Result<(), PipelineError> {
        if links.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for link in links {
            sqlx::query(
                "INSERT INTO code_fragment_links \
                    (code_id, fragment_id, confidence, source, char_start, char_end, linked_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (code_id, fragment_id) DO NOTHING",
            )
            .bind(link.code_id.0)
            .bind(link.fragment_id.0)
            .bind(link.confidence)
            .bind(format!("{:?}", link.source).to_lowercase())
            .bind(link.char_start)
            .bind(link.char_end)
            .bind(link.linked_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn mark_fragment_embedding_synced(
        &self,
        fragment_ids: &[FragmentId],
    ) -> Result<(), PipelineError> {
        if fragment_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<uuid::Uuid> = fragment_ids.iter().map(|f| f.0).collect();
        sqlx::query("UPDATE fragments SET embedding_synced = true WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn upsert_category(
        &self,
        project_id: ProjectId,
        name: &str,
        is_central: bool,
    ) -> Result<Category, PipelineError> {
        let name = name.trim();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT INTO categories (id, project_id, name, is_central) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (project_id, name) DO UPDATE SET is_central = EXCLUDED.is_central OR categories.is_central",
        )
        .bind(CategoryId::new().0)
        .bind(project_id.0)
        .bind(name)
        .bind(is_central)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let row = sqlx::query(
            "SELECT id, project_id, name, definition, is_central FROM categories \
             WHERE project_id = $1 AND lower(trim(name)) = lower(trim($2)) LIMIT 1",
        )
        .bind(project_id.0)
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(Category {
            id: CategoryId(row.try_get("id").map_err(map_sqlx_error)?),
            project_id: ProjectId(row.try_get("project_id").map_err(map_sqlx_error)?),
            name: row.try_get("name").map_err(map_sqlx_error)?,
            definition: row.try_get("definition").map_err(map_sqlx_error)?,
            is_central: row.try_get("is_central").map_err(map_sqlx_error)?,
        })
    }

    async fn save_theory(&self, theory: &Theory) -> Result<(), PipelineError> {
        let status = match theory.status {
            TheoryStatus::Draft => "draft",
            TheoryStatus::Completed => "completed",
        };
        sqlx::query(
            "INSERT INTO theories \
                (id, project_id, version, model_json, propositions, validation, gaps, \
                 confidence_score, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET \
                model_json = EXCLUDED.model_json, propositions = EXCLUDED.propositions, \
                validation = EXCLUDED.validation, gaps = EXCLUDED.gaps, \
                confidence_score = EXCLUDED.confidence_score, status = EXCLUDED.status",
        )
        .bind(theory.id.0)
        .bind(theory.project_id.0)
        .bind(theory.version)
        .bind(&theory.model_json)
        .bind(&theory.propositions)
        .bind(&theory.validation)
        .bind(&theory.gaps)
        .bind(theory.confidence_score)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn load_recent_theories(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> Result<Vec<Theory>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, project_id, version, model_json, propositions, validation, gaps, \
                    confidence_score, status \
             FROM theories WHERE project_id = $1 ORDER BY version DESC LIMIT $2",
        )
        .bind(project_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let status_raw: String = row.try_get("status").map_err(map_sqlx_error)?;
                let status = match status_raw.as_str() {
                    "completed" => TheoryStatus::Completed,
                    _ => TheoryStatus::Draft,
                };
                Ok(Theory {
                    id: TheoryId(row.try_get("id").map_err(map_sqlx_error)?),
                    project_id: ProjectId(row.try_get("project_id").map_err(map_sqlx_error)?),
                    version: row.try_get("version").map_err(map_sqlx_error)?,
                    model_json: row.try_get("model_json").map_err(map_sqlx_error)?,
                    propositions: row.try_get("propositions").map_err(map_sqlx_error)?,
                    validation: row.try_get("validation").map_err(map_sqlx_error)?,
                    gaps: row.try_get("gaps").map_err(map_sqlx_error)?,
                    confidence_score: row.try_get("confidence_score").map_err(map_sqlx_error)?,
                    status,
                })
            })
            .collect()
    }
}
