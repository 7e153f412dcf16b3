use std::sync::Arc;

use migration_core::{WorkerError, WorkerResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 单个Worker实例的处理槽
///
/// 工作循环和停滞任务恢复器共享同一个槽，同一时刻最多只有一个任务交给 `JobProcessor`。
#[derive(Debug, Clone)]
pub struct ProcessingSlot {
    semaphore: Arc<Semaphore>,
}

/// 持有期间占用处理槽，drop 时释放
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl ProcessingSlot {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// 等待处理槽空闲
    pub async fn acquire(&self) -> WorkerResult<SlotPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::unknown("处理槽已关闭"))?;
        Ok(SlotPermit { _permit: permit })
    }

    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for ProcessingSlot {
    fn default() -> Self {
        Self::new()
    }
}
