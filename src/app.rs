use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use migration_core::{
    ClassifiedStore, JobProcessor, ProcessorConfig, ShutdownManager, StoreConfig, WorkerConfig,
};
use migration_infrastructure::DatabaseManager;
use migration_worker_runtime::{ProcessingSlot, ShellJobProcessor, StalledJobRecoverer, WorkerLoop};
use tokio::task::JoinSet;
use tracing::info;

use crate::lifecycle::{self, ExitStatus, LifecycleManager};

/// 主应用程序：在同一个执行上下文中运行工作循环和停滞任务恢复器
pub struct Application {
    config: Arc<WorkerConfig>,
    worker_loop: Arc<WorkerLoop>,
    recoverer: Arc<StalledJobRecoverer>,
}

impl Application {
    /// 两个后台活动共享同一个存储客户端、处理器和处理槽
    pub fn new(
        config: WorkerConfig,
        store: ClassifiedStore,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        let config = Arc::new(config);
        let slot = ProcessingSlot::new();

        let worker_loop = Arc::new(WorkerLoop::new(
            Arc::clone(&config),
            store.clone(),
            Arc::clone(&processor),
            slot.clone(),
        ));
        let recoverer = Arc::new(StalledJobRecoverer::new(
            Arc::clone(&config),
            store,
            processor,
            slot,
        ));

        Self {
            config,
            worker_loop,
            recoverer,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// 启动两个后台任务，它们在关闭信号触发后退出
    pub async fn spawn(&self, shutdown: &ShutdownManager) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        let worker_loop = Arc::clone(&self.worker_loop);
        let listener = shutdown.subscribe().await;
        tasks.spawn(async move { worker_loop.run(listener).await });

        let recoverer = Arc::clone(&self.recoverer);
        let listener = shutdown.subscribe().await;
        tasks.spawn(async move { recoverer.run(listener).await });

        info!(worker_id = %self.config.id, "Worker后台任务已启动");
        tasks
    }
}

/// `run` 子命令：加载配置、连接存储并运行到收到终止信号
pub async fn run_worker(worker_config: WorkerConfig) -> Result<ExitStatus> {
    let store_config = StoreConfig::from_env().context("加载存储配置失败")?;
    let processor_config = ProcessorConfig::from_env();

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(
        host = %host,
        worker = ?worker_config,
        store = ?store_config,
        processor = ?processor_config,
        "启动数据迁移Worker"
    );

    let database = DatabaseManager::new(&store_config)?;
    let store = ClassifiedStore::new(Arc::new(database.job_store()));
    let processor = ShellJobProcessor::from_config(&processor_config, &worker_config, store.clone())
        .context("创建迁移任务处理器失败")?;

    let lifecycle = LifecycleManager::new(worker_config.shutdown_timeout);
    let app = Application::new(worker_config, store, Arc::new(processor));
    let tasks = app.spawn(lifecycle.shutdown_manager()).await;

    let status = lifecycle
        .supervise(tasks, lifecycle::wait_for_shutdown_signal())
        .await;

    database.close().await;
    info!(worker_id = %app.config().id, exit_code = status.code(), "数据迁移Worker已退出");
    Ok(status)
}

/// `migrate` 子命令
pub async fn run_migrations() -> Result<ExitStatus> {
    let store_config = StoreConfig::from_env().context("加载存储配置失败")?;
    info!(store = ?store_config, "执行数据库迁移");

    let database = DatabaseManager::new(&store_config)?;
    database.migrate().await?;
    database.close().await;
    Ok(ExitStatus::Graceful)
}

/// `stalled` 子命令：按当前停滞阈值列出任务
pub async fn print_stalled_jobs(worker_config: WorkerConfig, limit: i64) -> Result<ExitStatus> {
    let store_config = StoreConfig::from_env().context("加载存储配置失败")?;
    let database = DatabaseManager::new(&store_config)?;
    let store = ClassifiedStore::new(Arc::new(database.job_store()));

    let timeout = chrono::Duration::from_std(worker_config.stalled_job_timeout)
        .context("停滞超时超出范围")?;
    let stalled_before = Utc::now() - timeout;

    let jobs = store.list_stalled_jobs(stalled_before, limit).await?;
    for job in &jobs {
        println!("{}", serde_json::to_string(job)?);
    }
    info!(count = jobs.len(), stalled_before = %stalled_before, "停滞任务查询完成");

    database.close().await;
    Ok(ExitStatus::Graceful)
}
