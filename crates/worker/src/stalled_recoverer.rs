use std::sync::Arc;

use chrono::{DateTime, Utc};
use migration_core::{
    ClassifiedStore, ErrorClassifier, JobId, JobProcessor, ShutdownListener, WorkerConfig,
    WorkerError, WorkerResult,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::processing_slot::{ProcessingSlot, SlotPermit};

/// 一次恢复扫描的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// 没有停滞任务
    NoneStalled,
    /// 恢复并重新处理了一个任务
    Recovered(JobId),
}

/// 停滞任务恢复器
///
/// 以 `stalled_job_timeout` 为周期扫描 `updated_at` 早于 `now - stalled_job_timeout`
/// 的处理中任务，原子认领其中最早创建的一个后以本实例身份重新交给处理器。
/// 到期时处理槽被工作循环占用则排队等待，当前任务结束后立即扫描。
pub struct StalledJobRecoverer {
    config: Arc<WorkerConfig>,
    store: ClassifiedStore,
    processor: Arc<dyn JobProcessor>,
    slot: ProcessingSlot,
}

impl StalledJobRecoverer {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: ClassifiedStore,
        processor: Arc<dyn JobProcessor>,
        slot: ProcessingSlot,
    ) -> Self {
        Self {
            config,
            store,
            processor,
            slot,
        }
    }

    /// 按固定周期扫描直到收到关闭信号
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        let period = self.config.stalled_job_timeout;
        info!(
            worker_id = %self.config.id,
            period_ms = period.as_millis() as u64,
            "停滞任务恢复器启动"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }
            let permit = tokio::select! {
                permit = self.slot.acquire() => permit,
                _ = shutdown.recv() => break,
            };
            if shutdown.is_shutdown() {
                break;
            }

            let result = match permit {
                Ok(permit) => self.scan_with_permit(permit).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(ScanOutcome::Recovered(job_id)) => {
                    info!(job_id = %job_id, "停滞任务已重新处理");
                }
                Ok(ScanOutcome::NoneStalled) => debug!("没有停滞任务"),
                Err(e) => {
                    error!(
                        kind = %e.kind(),
                        code = e.code(),
                        job_id = e.job_id().map(|id| id.to_i64()),
                        "停滞任务恢复失败: {}",
                        e
                    );
                    if shutdown.sleep(self.config.retry_delay).await {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.config.id, "停滞任务恢复器已停止");
    }

    /// 停滞判定阈值：`updated_at` 严格早于该时间的处理中任务视为停滞
    pub fn stalled_before(&self, now: DateTime<Utc>) -> WorkerResult<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.config.stalled_job_timeout)
            .map_err(|e| WorkerError::unknown(format!("停滞超时超出范围: {e}")))?;
        Ok(now - timeout)
    }

    /// 等待处理槽空闲后执行一轮扫描
    pub async fn scan_once(&self) -> WorkerResult<ScanOutcome> {
        let permit = self.slot.acquire().await?;
        self.scan_with_permit(permit).await
    }

    #[instrument(skip_all, fields(worker_id = %self.config.id))]
    async fn scan_with_permit(&self, _permit: SlotPermit) -> WorkerResult<ScanOutcome> {
        let stalled_before = self.stalled_before(Utc::now())?;
        let Some(job) = self
            .store
            .claim_stalled_job(&self.config.id, stalled_before)
            .await?
        else {
            return Ok(ScanOutcome::NoneStalled);
        };

        warn!(
            job_id = %job.id,
            created_at = %job.created_at,
            stalled_before = %stalled_before,
            "发现停滞任务，重新提交处理"
        );
        self.processor
            .process(&job, &self.config.id)
            .await
            .map_err(|e| ErrorClassifier::processing_failure(job.id, e))?;

        Ok(ScanOutcome::Recovered(job.id))
    }
}
