use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::WorkerConfig;
use crate::errors::{WorkerError, WorkerResult};
use crate::models::{Job, JobId, JobStatus};
use crate::traits::JobStore;

/// 错误归类器
///
/// 已经属于 [`WorkerError`] 的失败原样透传，其余一律包装为 `UNKNOWN_ERROR`，
/// 保证到达工作循环分类分支的错误都属于封闭集合。
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn normalize(err: anyhow::Error) -> WorkerError {
        match err.downcast::<WorkerError>() {
            Ok(worker_error) => worker_error,
            Err(other) => WorkerError::unknown(format!("{other:#}")),
        }
    }

    /// 任务处理器的失败：未分类的错误归为该任务的处理错误
    pub fn processing_failure(job_id: JobId, err: anyhow::Error) -> WorkerError {
        match err.downcast::<WorkerError>() {
            Ok(worker_error) => worker_error,
            Err(other) => WorkerError::job_processing(job_id, format!("{other:#}")),
        }
    }

    pub async fn call<T, F>(operation: &'static str, fut: F) -> WorkerResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        fut.await.map_err(|e| {
            let classified = Self::normalize(e);
            debug!(
                operation,
                kind = %classified.kind(),
                code = classified.code(),
                "存储调用失败"
            );
            classified
        })
    }
}

/// 经过错误归类包装的存储客户端
///
/// 进程内唯一的存储入口，所有调用都通过 [`ErrorClassifier::call`]。
#[derive(Clone)]
pub struct ClassifiedStore {
    inner: Arc<dyn JobStore>,
}

impl ClassifiedStore {
    pub fn new(inner: Arc<dyn JobStore>) -> Self {
        Self { inner }
    }

    pub async fn claim_next_pending_job(&self, worker_id: &str) -> WorkerResult<Option<Job>> {
        ErrorClassifier::call(
            "claim_next_pending_job",
            self.inner.claim_next_pending_job(worker_id),
        )
        .await
    }

    pub async fn list_stalled_jobs(
        &self,
        stalled_before: DateTime<Utc>,
        limit: i64,
    ) -> WorkerResult<Vec<Job>> {
        ErrorClassifier::call(
            "list_stalled_jobs",
            self.inner.list_stalled_jobs(stalled_before, limit),
        )
        .await
    }

    pub async fn claim_stalled_job(
        &self,
        worker_id: &str,
        stalled_before: DateTime<Utc>,
    ) -> WorkerResult<Option<Job>> {
        ErrorClassifier::call(
            "claim_stalled_job",
            self.inner.claim_stalled_job(worker_id, stalled_before),
        )
        .await
    }

    pub async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> WorkerResult<()> {
        ErrorClassifier::call(
            "update_job_status",
            self.inner.update_job_status(id, status, error_message),
        )
        .await
    }

    pub async fn touch_job(&self, id: JobId) -> WorkerResult<()> {
        ErrorClassifier::call("touch_job", self.inner.touch_job(id)).await
    }
}

/// 按错误类别区分的退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub retry_delay: Duration,
    pub circuit_breaker_reset_timeout: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            retry_delay: config.retry_delay,
            circuit_breaker_reset_timeout: config.circuit_breaker_reset_timeout,
        }
    }

    /// 叠加在固定轮询间隔之上的额外休眠
    pub fn delay_for(&self, error: &WorkerError) -> Duration {
        match error {
            WorkerError::CircuitBreaker { .. } => self.circuit_breaker_reset_timeout,
            WorkerError::JobProcessing { .. }
            | WorkerError::Store { .. }
            | WorkerError::Generic { .. }
            | WorkerError::StalledJob { .. } => self.retry_delay,
        }
    }
}
