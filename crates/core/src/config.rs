//! 环境变量配置
//!
//! 启动时解析一次，之后不可变，通过参数传入工作循环、停滞任务恢复器和生命周期管理器。
//! 数值型变量缺失、非数字或为0时回退到默认值，不会中止启动；
//! 只有存储连接地址缺失才会导致启动失败。

use std::time::Duration;

use tracing::warn;

use crate::errors::{WorkerError, WorkerResult};

pub const ENV_WORKER_ID: &str = "WORKER_ID";
pub const ENV_POLLING_INTERVAL_MS: &str = "WORKER_POLLING_INTERVAL_MS";
pub const ENV_STALLED_JOB_TIMEOUT_MS: &str = "WORKER_STALLED_JOB_TIMEOUT_MS";
pub const ENV_CIRCUIT_BREAKER_RESET_TIMEOUT_MS: &str = "WORKER_CIRCUIT_BREAKER_RESET_TIMEOUT_MS";
pub const ENV_RETRY_DELAY_MS: &str = "WORKER_RETRY_DELAY_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "WORKER_SHUTDOWN_TIMEOUT_MS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DATABASE_URL_FALLBACK: &str = "SUPABASE_DB_URL";
pub const ENV_DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";
pub const ENV_MIGRATION_COMMAND: &str = "MIGRATION_COMMAND";
pub const ENV_MIGRATION_COMMAND_ARGS: &str = "MIGRATION_COMMAND_ARGS";

pub const DEFAULT_WORKER_ID: &str = "worker1";
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_STALLED_JOB_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CIRCUIT_BREAKER_RESET_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 15_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Worker进程配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Worker身份标识，写入被认领的任务
    pub id: String,
    /// 每轮循环后的固定休眠（空闲队列的轮询下限）
    pub polling_interval: Duration,
    /// 停滞判定阈值，同时也是恢复扫描周期
    pub stalled_job_timeout: Duration,
    /// 收到熔断信号后的退避时间
    pub circuit_breaker_reset_timeout: Duration,
    /// 普通失败后的退避时间
    pub retry_delay: Duration,
    /// 收到终止信号后等待后台任务退出的最长时间
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_WORKER_ID.to_string(),
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            stalled_job_timeout: Duration::from_millis(DEFAULT_STALLED_JOB_TIMEOUT_MS),
            circuit_breaker_reset_timeout: Duration::from_millis(
                DEFAULT_CIRCUIT_BREAKER_RESET_TIMEOUT_MS,
            ),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let id = lookup(ENV_WORKER_ID)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKER_ID.to_string());

        Self {
            id,
            polling_interval: duration_ms(&lookup, ENV_POLLING_INTERVAL_MS, DEFAULT_POLLING_INTERVAL_MS),
            stalled_job_timeout: duration_ms(
                &lookup,
                ENV_STALLED_JOB_TIMEOUT_MS,
                DEFAULT_STALLED_JOB_TIMEOUT_MS,
            ),
            circuit_breaker_reset_timeout: duration_ms(
                &lookup,
                ENV_CIRCUIT_BREAKER_RESET_TIMEOUT_MS,
                DEFAULT_CIRCUIT_BREAKER_RESET_TIMEOUT_MS,
            ),
            retry_delay: duration_ms(&lookup, ENV_RETRY_DELAY_MS, DEFAULT_RETRY_DELAY_MS),
            shutdown_timeout: duration_ms(
                &lookup,
                ENV_SHUTDOWN_TIMEOUT_MS,
                DEFAULT_SHUTDOWN_TIMEOUT_MS,
            ),
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = id.into();
        self
    }
}

fn duration_ms<F>(lookup: &F, key: &str, default_ms: u64) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Duration::from_millis(default_ms);
    };

    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Duration::from_millis(ms),
        _ => {
            warn!(
                "环境变量 {} 的值无效: {:?}，使用默认值 {}ms",
                key, raw, default_ms
            );
            Duration::from_millis(default_ms)
        }
    }
}

/// 后端存储连接配置
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let database_url = non_empty(ENV_DATABASE_URL)
            .or_else(|| non_empty(ENV_DATABASE_URL_FALLBACK))
            .ok_or_else(|| {
                WorkerError::config_error(format!(
                    "缺少存储连接配置: 请设置 {ENV_DATABASE_URL} 或 {ENV_DATABASE_URL_FALLBACK}"
                ))
            })?;

        let max_connections = match lookup(ENV_DATABASE_MAX_CONNECTIONS) {
            None => DEFAULT_DATABASE_MAX_CONNECTIONS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(
                        "环境变量 {} 的值无效: {:?}，使用默认值 {}",
                        ENV_DATABASE_MAX_CONNECTIONS, raw, DEFAULT_DATABASE_MAX_CONNECTIONS
                    );
                    DEFAULT_DATABASE_MAX_CONNECTIONS
                }
            },
        };

        Ok(Self {
            database_url,
            max_connections,
        })
    }

    /// 隐藏密码后的连接地址，用于日志
    pub fn redacted_url(&self) -> String {
        redact_url(&self.database_url)
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &self.redacted_url())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };
    let credentials = &rest[..at];
    match credentials.find(':') {
        Some(colon) => format!(
            "{}{}:****{}",
            &url[..scheme_end + 3],
            &credentials[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}

/// 默认任务处理器（外部迁移命令）配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let command = lookup(ENV_MIGRATION_COMMAND)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let args = lookup(ENV_MIGRATION_COMMAND_ARGS)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self { command, args }
    }

    pub fn require_command(&self) -> WorkerResult<&str> {
        self.command.as_deref().ok_or_else(|| {
            WorkerError::config_error(format!("缺少迁移命令配置: 请设置 {ENV_MIGRATION_COMMAND}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.id, "worker1");
        assert_eq!(config.polling_interval, Duration::from_millis(15_000));
        assert_eq!(config.stalled_job_timeout, Duration::from_millis(60_000));
        assert_eq!(config.circuit_breaker_reset_timeout, Duration::from_millis(15_000));
        assert_eq!(config.retry_delay, Duration::from_millis(15_000));
    }

    #[test]
    fn test_worker_config_reads_values() {
        let config = WorkerConfig::from_lookup(lookup_from(&[
            (ENV_WORKER_ID, "worker-7"),
            (ENV_POLLING_INTERVAL_MS, "500"),
            (ENV_STALLED_JOB_TIMEOUT_MS, "2000"),
            (ENV_CIRCUIT_BREAKER_RESET_TIMEOUT_MS, "3000"),
            (ENV_RETRY_DELAY_MS, "750"),
        ]));
        assert_eq!(config.id, "worker-7");
        assert_eq!(config.polling_interval, Duration::from_millis(500));
        assert_eq!(config.stalled_job_timeout, Duration::from_millis(2000));
        assert_eq!(config.circuit_breaker_reset_timeout, Duration::from_millis(3000));
        assert_eq!(config.retry_delay, Duration::from_millis(750));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = WorkerConfig::from_lookup(lookup_from(&[
            (ENV_WORKER_ID, "   "),
            (ENV_POLLING_INTERVAL_MS, "fast"),
            (ENV_STALLED_JOB_TIMEOUT_MS, "-5"),
            (ENV_RETRY_DELAY_MS, "0"),
            (ENV_CIRCUIT_BREAKER_RESET_TIMEOUT_MS, "1.5"),
        ]));
        assert_eq!(config, WorkerConfig::default());
    }

    #[test]
    fn test_store_config_requires_url() {
        let err = StoreConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err.code(), crate::CONFIG_ERROR);

        let config = StoreConfig::from_lookup(lookup_from(&[(
            ENV_DATABASE_URL_FALLBACK,
            "postgres://app:secret@db:5432/app",
        )]))
        .unwrap();
        assert_eq!(config.max_connections, DEFAULT_DATABASE_MAX_CONNECTIONS);
        assert_eq!(config.redacted_url(), "postgres://app:****@db:5432/app");
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn test_blank_database_url_falls_back() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, "  "),
            (ENV_DATABASE_URL_FALLBACK, "postgres://app@replica:5432/app"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://app@replica:5432/app");

        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, ""),
            (ENV_DATABASE_URL_FALLBACK, "postgres://app@replica:5432/app"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://app@replica:5432/app");

        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DATABASE_URL, "postgres://app@primary:5432/app"),
            (ENV_DATABASE_URL_FALLBACK, "postgres://app@replica:5432/app"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://app@primary:5432/app");
    }

    #[test]
    fn test_processor_config_splits_args() {
        let config = ProcessorConfig::from_lookup(lookup_from(&[
            (ENV_MIGRATION_COMMAND, "/usr/bin/migrate"),
            (ENV_MIGRATION_COMMAND_ARGS, "--batch 100  --dry-run"),
        ]));
        assert_eq!(config.require_command().unwrap(), "/usr/bin/migrate");
        assert_eq!(config.args, vec!["--batch", "100", "--dry-run"]);

        assert!(ProcessorConfig::from_lookup(lookup_from(&[]))
            .require_command()
            .is_err());
    }
}
