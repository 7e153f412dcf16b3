pub mod postgres;

pub use postgres::{DatabaseManager, PostgresJobStore};
