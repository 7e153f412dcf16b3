//! # 数据模型
//!
//! 迁移任务队列中的任务记录及其状态。
//!
//! ## 状态流转
//! ```text
//! pending ──(原子认领)──▶ processing ──(JobProcessor)──▶ completed / failed
//!                            │
//!                            └──(updated_at 超时)──▶ 停滞任务恢复
//! ```

pub mod job;

pub use job::*;
