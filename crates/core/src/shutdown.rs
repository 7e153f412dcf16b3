use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 进程内唯一的取消令牌：启动时创建，传给工作循环和停滞任务恢复器，
/// 触发后两者都会在下一个挂起点退出。
pub struct ShutdownManager {
    /// 关闭信号发送器
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    /// 是否已经关闭
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    /// 创建新的关闭管理器
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> ShutdownListener {
        let shutdown_tx = self.shutdown_tx.read().await;
        let rx = if let Some(ref tx) = *shutdown_tx {
            tx.subscribe()
        } else {
            // 如果已经关闭，创建一个立即触发的接收器
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            rx
        };

        ShutdownListener {
            rx,
            is_shutdown: Arc::clone(&self.is_shutdown),
        }
    }

    /// 触发关闭
    pub async fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        info!("触发Worker关闭");

        let mut shutdown_tx = self.shutdown_tx.write().await;
        if let Some(tx) = shutdown_tx.take() {
            debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
            // 忽略错误（可能没有接收者）
            let _ = tx.send(());
        }
    }

    /// 检查是否已经关闭
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ShutdownManager {
    fn clone(&self) -> Self {
        Self {
            shutdown_tx: Arc::clone(&self.shutdown_tx),
            is_shutdown: Arc::clone(&self.is_shutdown),
        }
    }
}

/// 单个后台任务持有的关闭信号接收端
pub struct ShutdownListener {
    rx: broadcast::Receiver<()>,
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownListener {
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// 等待关闭信号
    pub async fn recv(&mut self) {
        if self.is_shutdown() {
            return;
        }
        // Closed 说明发送端已被回收，同样视为关闭
        let _ = self.rx.recv().await;
    }

    /// 可被关闭信号打断的休眠，返回 `true` 表示收到关闭信号
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.recv() => true,
        }
    }
}
