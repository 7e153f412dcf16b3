//! 进程生命周期管理
//!
//! - SIGINT / SIGTERM：触发 [`ShutdownManager`]，等待后台任务退出后以 0 退出
//! - panic 或后台任务意外结束：以 1 退出，由外部进程管理器负责重启

use std::future::Future;
use std::panic::{self, PanicHookInfo};
use std::process::ExitCode;
use std::time::Duration;

use migration_core::ShutdownManager;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 进程退出状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// 收到终止信号后的正常退出
    Graceful,
    /// 启动配置失败或运行期间出现无法恢复的错误
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Graceful => 0,
            ExitStatus::Failure => 1,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// 安装panic钩子：记录panic信息后立即以退出码1结束进程
pub fn install_panic_hook() {
    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());

        error!(location = %location, "进程发生panic，立即退出: {}", message);
        original_hook(info);
        std::process::exit(i32::from(ExitStatus::Failure.code()));
    }));
}

/// 等待SIGINT或SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

/// 生命周期管理器
///
/// 持有进程内唯一的 [`ShutdownManager`]，监督工作循环和停滞任务恢复器两个后台任务。
pub struct LifecycleManager {
    shutdown: ShutdownManager,
    shutdown_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            shutdown: ShutdownManager::new(),
            shutdown_timeout,
        }
    }

    pub fn shutdown_manager(&self) -> &ShutdownManager {
        &self.shutdown
    }

    /// 等待终止信号或后台任务意外结束，返回进程退出状态
    ///
    /// 后台任务只应在关闭信号之后结束：提前结束（包括panic）视为越过了错误边界。
    pub async fn supervise<S>(&self, mut tasks: JoinSet<()>, signal: S) -> ExitStatus
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(signal);

        tokio::select! {
            _ = &mut signal => {
                info!("开始优雅关闭");
            }
            joined = tasks.join_next() => {
                match joined {
                    Some(Err(e)) if e.is_panic() => error!("后台任务panic: {}", e),
                    Some(Err(e)) => error!("后台任务被取消: {}", e),
                    Some(Ok(())) => error!("后台任务意外结束"),
                    None => error!("没有运行中的后台任务"),
                }
                self.shutdown.shutdown().await;
                tasks.abort_all();
                return ExitStatus::Failure;
            }
        }

        self.shutdown.shutdown().await;

        let drain = async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!("后台任务退出时出错: {}", e);
                }
            }
        };

        match tokio::time::timeout(self.shutdown_timeout, drain).await {
            Ok(()) => info!("后台任务已全部退出"),
            Err(_) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "等待后台任务退出超时，强制退出"
                );
                tasks.abort_all();
            }
        }

        ExitStatus::Graceful
    }
}
