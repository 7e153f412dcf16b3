use std::sync::Arc;

use migration_core::{
    BackoffPolicy, ClassifiedStore, ErrorClassifier, JobId, JobProcessor, ShutdownListener,
    WorkerConfig, WorkerError, WorkerResult,
};
use tracing::{debug, error, info, instrument, warn};

use crate::processing_slot::{ProcessingSlot, SlotPermit};

/// 一次轮询的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 队列为空
    Idle,
    /// 认领并处理了一个任务
    Processed(JobId),
}

/// 主工作循环
///
/// 每轮：认领最早的待处理任务，交给 [`JobProcessor`]，然后固定休眠轮询间隔。
/// 失败按类别在轮询间隔之上再叠加一段退避休眠，循环本身不会因为失败退出。
pub struct WorkerLoop {
    config: Arc<WorkerConfig>,
    store: ClassifiedStore,
    processor: Arc<dyn JobProcessor>,
    slot: ProcessingSlot,
    backoff: BackoffPolicy,
}

impl WorkerLoop {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: ClassifiedStore,
        processor: Arc<dyn JobProcessor>,
        slot: ProcessingSlot,
    ) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        Self {
            config,
            store,
            processor,
            slot,
            backoff,
        }
    }

    /// 运行直到收到关闭信号
    ///
    /// 关闭只在两次调用之间生效：进行中的认领或处理调用会执行完毕。
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        info!(
            worker_id = %self.config.id,
            polling_interval_ms = self.config.polling_interval.as_millis() as u64,
            "工作循环启动"
        );

        loop {
            let permit = tokio::select! {
                permit = self.slot.acquire() => permit,
                _ = shutdown.recv() => break,
            };
            if shutdown.is_shutdown() {
                break;
            }

            let result = match permit {
                Ok(permit) => self.poll_with_permit(permit).await,
                Err(e) => Err(e),
            };

            if shutdown.sleep(self.config.polling_interval).await {
                break;
            }

            if let Err(e) = result {
                self.log_failure(&e);
                if shutdown.sleep(self.backoff.delay_for(&e)).await {
                    break;
                }
            }
        }

        info!(worker_id = %self.config.id, "工作循环已停止");
    }

    /// 执行一轮认领和处理
    pub async fn poll_once(&self) -> WorkerResult<PollOutcome> {
        let permit = self.slot.acquire().await?;
        self.poll_with_permit(permit).await
    }

    #[instrument(skip_all, fields(worker_id = %self.config.id))]
    async fn poll_with_permit(&self, _permit: SlotPermit) -> WorkerResult<PollOutcome> {
        let Some(job) = self.store.claim_next_pending_job(&self.config.id).await? else {
            debug!("没有待处理任务");
            return Ok(PollOutcome::Idle);
        };

        info!(job_id = %job.id, "认领任务，开始处理");
        self.processor
            .process(&job, &self.config.id)
            .await
            .map_err(|e| ErrorClassifier::processing_failure(job.id, e))?;

        info!(job_id = %job.id, "任务处理完成");
        Ok(PollOutcome::Processed(job.id))
    }

    fn log_failure(&self, error: &WorkerError) {
        let delay_ms = self.backoff.delay_for(error).as_millis() as u64;
        match error {
            WorkerError::CircuitBreaker { .. } => {
                warn!(code = error.code(), delay_ms, "熔断信号，暂停后重试: {}", error);
            }
            WorkerError::JobProcessing { job_id, .. } => {
                error!(job_id = %job_id, code = error.code(), delay_ms, "任务处理失败: {}", error);
            }
            WorkerError::Store { .. } | WorkerError::Generic { .. } | WorkerError::StalledJob { .. } => {
                error!(
                    kind = %error.kind(),
                    code = error.code(),
                    delay_ms,
                    "工作循环迭代失败: {}",
                    error
                );
            }
        }
    }
}
