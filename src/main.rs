use std::process::ExitCode;

use clap::Parser;
use migration_core::init_logging;
use migration_worker::app;
use migration_worker::lifecycle::{self, ExitStatus};
use migration_worker::{Cli, Commands};
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_config()) {
        eprintln!("初始化日志系统失败: {e:#}");
        return ExitStatus::Failure.into();
    }
    lifecycle::install_panic_hook();

    let result = match cli.command() {
        Commands::Run => app::run_worker(cli.worker_config()).await,
        Commands::Migrate => app::run_migrations().await,
        Commands::Stalled { limit } => app::print_stalled_jobs(cli.worker_config(), limit).await,
    };

    match result {
        Ok(status) => status.into(),
        Err(e) => {
            error!("Worker启动失败: {e:#}");
            ExitStatus::Failure.into()
        }
    }
}
