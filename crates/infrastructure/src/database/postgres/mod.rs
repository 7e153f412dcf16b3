pub mod postgres_job_store;

pub use postgres_job_store::*;

use anyhow::{Context, Result};
use migration_core::StoreConfig;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// 数据库连接池管理器
///
/// 进程启动时创建一次，所有存储调用共享同一个连接池。
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 创建新的数据库管理器
    ///
    /// 连接延迟建立：启动阶段只校验连接地址，存储不可用时由工作循环按存储错误退避。
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect_lazy(&config.database_url)
            .with_context(|| format!("无效的数据库连接地址: {}", config.redacted_url()))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 运行数据库迁移
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("执行数据库迁移失败")?;
        info!("数据库迁移完成");
        Ok(())
    }

    /// 关闭数据库连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn job_store(&self) -> PostgresJobStore {
        PostgresJobStore::new(self.pool.clone())
    }
}
