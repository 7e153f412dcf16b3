pub mod app;
pub mod cli;
pub mod lifecycle;

pub use app::Application;
pub use cli::{Cli, Commands};
pub use lifecycle::{ExitStatus, LifecycleManager};
