use thiserror::Error;

use crate::models::JobId;

/// 未分类错误的默认错误码
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
/// 启动配置缺失或无效
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Worker错误类型定义
///
/// 封闭的错误分类：新增类别只能通过增加变体完成，分类边界上的 `match` 必须穷尽。
#[derive(Debug, Error)]
pub enum WorkerError {
    /// 通用/未分类错误
    #[error("Worker错误 [{code}]: {message}")]
    Generic { message: String, code: String },

    /// 后端存储拒绝或执行调用失败
    #[error("存储错误: {source}")]
    Store {
        #[source]
        source: BoxError,
    },

    /// 熔断信号：重试前需要退避。保留通道，当前控制流不会构造
    #[error("熔断器打开: {message}")]
    CircuitBreaker { message: String },

    /// 单个任务处理失败
    #[error("任务 {job_id} 处理失败: {message}")]
    JobProcessing { job_id: JobId, message: String },

    /// 停滞任务专用错误。保留通道，当前控制流不会构造
    #[error("任务 {job_id} 已停滞")]
    StalledJob { job_id: JobId },
}

/// 稳定的机器可读错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Worker,
    Store,
    CircuitBreaker,
    JobProcessing,
    StalledJob,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Worker => "WorkerError",
            ErrorKind::Store => "SupabaseError",
            ErrorKind::CircuitBreaker => "CircuitBreakerError",
            ErrorKind::JobProcessing => "JobProcessingError",
            ErrorKind::StalledJob => "StalledJobError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;

impl WorkerError {
    pub fn generic<S: Into<String>, C: Into<String>>(message: S, code: C) -> Self {
        Self::Generic {
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::generic(message, UNKNOWN_ERROR)
    }

    pub fn config_error<S: Into<String>>(message: S) -> Self {
        Self::generic(message, CONFIG_ERROR)
    }

    pub fn store<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store {
            source: Box::new(source),
        }
    }

    pub fn store_message<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        Self::Store {
            source: message.into(),
        }
    }

    pub fn circuit_breaker<S: Into<String>>(message: S) -> Self {
        Self::CircuitBreaker {
            message: message.into(),
        }
    }

    pub fn job_processing<S: Into<String>>(job_id: JobId, message: S) -> Self {
        Self::JobProcessing {
            job_id,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Generic { .. } => ErrorKind::Worker,
            WorkerError::Store { .. } => ErrorKind::Store,
            WorkerError::CircuitBreaker { .. } => ErrorKind::CircuitBreaker,
            WorkerError::JobProcessing { .. } => ErrorKind::JobProcessing,
            WorkerError::StalledJob { .. } => ErrorKind::StalledJob,
        }
    }

    /// 机器可读错误码
    pub fn code(&self) -> &str {
        match self {
            WorkerError::Generic { code, .. } => code,
            WorkerError::Store { .. } => "SUPABASE_ERROR",
            WorkerError::CircuitBreaker { .. } => "CIRCUIT_BREAKER_ERROR",
            WorkerError::JobProcessing { .. } => "JOB_PROCESSING_ERROR",
            WorkerError::StalledJob { .. } => "STALLED_JOB_ERROR",
        }
    }

    /// 与该错误关联的任务（如果有）
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            WorkerError::JobProcessing { job_id, .. } | WorkerError::StalledJob { job_id } => {
                Some(*job_id)
            }
            _ => None,
        }
    }
}
