//! 外部协作者接口
//!
//! - [`JobStore`] - 共享的持久化任务队列，提供原子认领
//! - [`JobProcessor`] - 执行任务负载转换并写入终态
//!
//! 两个接口都返回 `anyhow::Result`：具体实现可以以任何方式失败，
//! 由 [`crate::ErrorClassifier`] 在调用边界统一归类。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Job, JobId, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// 原子认领最早的 `pending` 任务
    ///
    /// 必须是事务性的“选择并加锁”：并发调用方永远不会拿到同一个任务。
    /// 成功时任务状态变为 `processing` 并写入 `worker_id`。
    async fn claim_next_pending_job(&self, worker_id: &str) -> anyhow::Result<Option<Job>>;

    /// 查询 `processing` 且 `updated_at` 严格早于 `stalled_before` 的任务，按 `created_at` 升序
    async fn list_stalled_jobs(
        &self,
        stalled_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Job>>;

    /// 原子认领最早的停滞任务，重写 `worker_id` 并刷新 `updated_at`
    ///
    /// 与 [`JobStore::list_stalled_jobs`] 的筛选条件相同，但并发恢复方不会拿到同一个任务。
    async fn claim_stalled_job(
        &self,
        worker_id: &str,
        stalled_before: DateTime<Utc>,
    ) -> anyhow::Result<Option<Job>>;

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<()>;

    /// 刷新 `updated_at`，长任务用它避免被判定为停滞
    async fn touch_job(&self, id: JobId) -> anyhow::Result<()>;
}

/// 任务处理器
///
/// 负责写入任务终态；失败会以处理类错误返回给调用方。
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job, worker_id: &str) -> anyhow::Result<()>;
}
