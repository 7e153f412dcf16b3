use clap::{Parser, Subcommand};
use migration_core::{LogConfig, LogFormat, WorkerConfig};

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(name = "migration-worker")]
#[command(version = "1.0.0")]
#[command(about = "数据迁移任务后台处理守护进程")]
#[command(long_about = "从共享任务队列认领迁移任务并执行，同时恢复被崩溃或卡死的Worker遗留的停滞任务")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// 日志级别，覆盖 LOG_LEVEL
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// 日志格式 (json | pretty)，覆盖 LOG_FORMAT
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Worker ID，覆盖 WORKER_ID
    #[arg(short, long, global = true)]
    pub worker_id: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Default, PartialEq, Eq)]
pub enum Commands {
    /// 运行Worker守护进程（默认）
    #[default]
    Run,
    /// 执行数据库迁移后退出
    Migrate,
    /// 以JSON行输出当前的停滞任务
    Stalled {
        /// 最多输出的任务数
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// 环境变量配置叠加命令行覆盖
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::from_env();
        if let Some(level) = &self.log_level {
            config = config.with_level(level.clone());
        }
        if let Some(format) = self.log_format {
            config = config.with_format(format);
        }
        config
    }

    pub fn worker_config(&self) -> WorkerConfig {
        self.apply_overrides(WorkerConfig::from_env())
    }

    fn apply_overrides(&self, config: WorkerConfig) -> WorkerConfig {
        match self.worker_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => config.with_id(id),
            _ => config,
        }
    }
}
