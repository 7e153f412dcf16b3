use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{Job, JobId, JobStatus, JobStore, WorkerError};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

const JOB_COLUMNS: &str =
    "id, status, payload, worker_id, error_message, created_at, updated_at";

/// 基于PostgreSQL的迁移任务队列
///
/// 认领操作是单条 `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)` 语句，
/// 并发实例不会拿到同一行。
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, sqlx::Error> {
        Ok(Job {
            id: JobId::new(row.try_get("id")?),
            status: row.try_get("status")?,
            payload: row.try_get("payload")?,
            worker_id: row.try_get("worker_id")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// 写入一个待处理任务。任务通常由外部系统创建，这里供运维命令和测试使用
    #[instrument(skip(self, payload))]
    pub async fn enqueue(&self, payload: &serde_json::Value) -> anyhow::Result<Job> {
        let row = sqlx::query(&format!(
            "INSERT INTO migration_jobs (status, payload) VALUES ('pending', $1) RETURNING {JOB_COLUMNS}"
        ))
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        let job = Self::row_to_job(&row).map_err(classify_sqlx_error)?;
        debug!("写入待处理任务: ID {}", job.id);
        Ok(job)
    }
}

/// 查询被拒绝归为存储错误；连接层失败保持原样，由错误归类器归为未知错误
fn classify_sqlx_error(err: sqlx::Error) -> anyhow::Error {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => anyhow::Error::new(err),
        other => anyhow::Error::new(WorkerError::store(other)),
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self), fields(worker_id = %worker_id))]
    async fn claim_next_pending_job(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE migration_jobs
            SET status = 'processing', worker_id = $1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM migration_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        match row {
            Some(row) => {
                let job = Self::row_to_job(&row).map_err(classify_sqlx_error)?;
                debug!("认领待处理任务成功: ID {}", job.id);
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_stalled_jobs(
        &self,
        stalled_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM migration_jobs
            WHERE status = 'processing' AND updated_at < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(stalled_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        rows.iter()
            .map(|row| Self::row_to_job(row).map_err(classify_sqlx_error))
            .collect()
    }

    #[instrument(skip(self), fields(worker_id = %worker_id))]
    async fn claim_stalled_job(
        &self,
        worker_id: &str,
        stalled_before: DateTime<Utc>,
    ) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE migration_jobs
            SET worker_id = $1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM migration_jobs
                WHERE status = 'processing' AND updated_at < $2
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(stalled_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        row.map(|row| Self::row_to_job(&row).map_err(classify_sqlx_error))
            .transpose()
    }

    #[instrument(skip(self, error_message), fields(job_id = %id, status = %status))]
    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE migration_jobs
            SET status = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(WorkerError::store_message(format!("任务不存在: ID {id}")).into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn touch_job(&self, id: JobId) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE migration_jobs SET updated_at = NOW() WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(())
    }
}
