//! 迁移任务队列的存储实现
//!
//! - [`PostgresJobStore`] - 生产环境使用的PostgreSQL实现
//! - [`InMemoryJobStore`] - 内存实现，用于测试和本地调试

pub mod database;
pub mod in_memory_store;

pub use database::{DatabaseManager, PostgresJobStore};
pub use in_memory_store::InMemoryJobStore;
