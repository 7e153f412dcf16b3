use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use migration_core::{Job, JobId, JobProcessor, JobStatus, JobStore, WorkerConfig};
use migration_infrastructure::InMemoryJobStore;

/// 测试用的短周期配置
pub(crate) fn fast_config() -> WorkerConfig {
    WorkerConfig {
        id: "test-worker".to_string(),
        polling_interval: Duration::from_secs(1),
        stalled_job_timeout: Duration::from_secs(10),
        circuit_breaker_reset_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(3),
    }
}

/// 记录调用的任务处理器
#[derive(Default)]
pub(crate) struct RecordingProcessor {
    calls: Mutex<Vec<(JobId, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: bool,
    delay: Duration,
    store: Option<Arc<InMemoryJobStore>>,
}

impl RecordingProcessor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 处理成功后把任务标记为完成
    pub(crate) fn completing(mut self, store: Arc<InMemoryJobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(JobId, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobProcessor for RecordingProcessor {
    async fn process(&self, job: &Job, worker_id: &str) -> anyhow::Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((job.id, worker_id.to_string()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            anyhow::bail!("payload transform failed for job {}", job.id);
        }
        if let Some(store) = &self.store {
            store
                .update_job_status(job.id, JobStatus::Completed, None)
                .await?;
        }
        Ok(())
    }
}
