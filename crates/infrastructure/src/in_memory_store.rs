use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{Job, JobId, JobStatus, JobStore, WorkerError};
use tracing::debug;

/// 内存任务队列实现
///
/// 与 [`crate::PostgresJobStore`] 遵循同一契约，整个认领过程在一把锁内完成，
/// 因此同样是排他的。适用于测试和本地调试，支持注入失败。
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct StoreState {
    jobs: BTreeMap<JobId, Job>,
    next_id: i64,
    injected_failures: VecDeque<anyhow::Error>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let store = Self::new();
        for job in jobs {
            store.insert_job(job);
        }
        store
    }

    /// 写入或覆盖一条任务记录
    pub fn insert_job(&self, job: Job) {
        let mut state = self.lock();
        state.next_id = state.next_id.max(job.id.to_i64());
        state.jobs.insert(job.id, job);
    }

    /// 以当前时间写入一个待处理任务
    pub fn enqueue(&self, payload: serde_json::Value) -> Job {
        self.enqueue_at(payload, Utc::now())
    }

    pub fn enqueue_at(&self, payload: serde_json::Value, created_at: DateTime<Utc>) -> Job {
        let mut state = self.lock();
        state.next_id += 1;
        let job = Job::pending(JobId::new(state.next_id), payload, created_at);
        state.jobs.insert(job.id, job.clone());
        job
    }

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.lock().jobs.get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.values().cloned().collect()
    }

    /// 让接下来的一次存储调用失败
    pub fn inject_failure(&self, error: anyhow::Error) {
        self.lock().injected_failures.push_back(error);
    }

    /// 通过 [`JobStore`] 接口发生的调用总数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        // 持锁期间不会panic，毒化的锁内数据仍然一致
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 记录一次调用并取出注入的失败
    fn begin_call(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, anyhow::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        match state.injected_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    fn oldest_matching<F>(state: &StoreState, predicate: F) -> Option<JobId>
    where
        F: Fn(&Job) -> bool,
    {
        state
            .jobs
            .values()
            .filter(|job| predicate(job))
            .min_by_key(|job| (job.created_at, job.id))
            .map(|job| job.id)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn claim_next_pending_job(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let mut state = self.begin_call()?;
        let Some(id) = Self::oldest_matching(&state, |job| job.status == JobStatus::Pending)
        else {
            return Ok(None);
        };

        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| WorkerError::store_message(format!("任务不存在: ID {id}")))?;
        job.status = JobStatus::Processing;
        job.worker_id = Some(worker_id.to_string());
        job.updated_at = Utc::now();
        debug!("内存队列认领任务: ID {}, worker={}", id, worker_id);
        Ok(Some(job.clone()))
    }

    async fn list_stalled_jobs(
        &self,
        stalled_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Job>> {
        let state = self.begin_call()?;
        let mut stalled: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.is_stalled(stalled_before))
            .cloned()
            .collect();
        stalled.sort_by_key(|job| (job.created_at, job.id));
        stalled.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stalled)
    }

    async fn claim_stalled_job(
        &self,
        worker_id: &str,
        stalled_before: DateTime<Utc>,
    ) -> anyhow::Result<Option<Job>> {
        let mut state = self.begin_call()?;
        let Some(id) = Self::oldest_matching(&state, |job| job.is_stalled(stalled_before)) else {
            return Ok(None);
        };

        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| WorkerError::store_message(format!("任务不存在: ID {id}")))?;
        job.worker_id = Some(worker_id.to_string());
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut state = self.begin_call()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| WorkerError::store_message(format!("任务不存在: ID {id}")))?;
        job.status = status;
        job.error_message = error_message.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn touch_job(&self, id: JobId) -> anyhow::Result<()> {
        let mut state = self.begin_call()?;
        if let Some(job) = state.jobs.get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}
