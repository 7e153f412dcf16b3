use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use migration_core::{
    ClassifiedStore, Job, JobProcessor, JobStatus, ProcessorConfig, WorkerConfig, WorkerError,
    WorkerResult,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// 错误信息中保留的 stderr 末尾行数
const STDERR_TAIL_LINES: usize = 20;
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// 通过外部命令执行迁移的任务处理器
///
/// 子进程通过环境变量 `MIGRATION_JOB_ID`、`MIGRATION_WORKER_ID` 得到任务信息，
/// 任务负载以JSON写入标准输入。进程运行期间定期刷新任务的 `updated_at`。
pub struct ShellJobProcessor {
    command: String,
    args: Vec<String>,
    store: ClassifiedStore,
    heartbeat_interval: Duration,
}

/// 子进程执行结果
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    exit_code: Option<i32>,
    stderr: Vec<String>,
}

impl ShellJobProcessor {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        store: ClassifiedStore,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            store,
            heartbeat_interval: heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
        }
    }

    /// 心跳间隔取停滞超时的三分之一
    pub fn from_config(
        processor: &ProcessorConfig,
        worker: &WorkerConfig,
        store: ClassifiedStore,
    ) -> WorkerResult<Self> {
        let command = processor.require_command()?;
        Ok(Self::new(
            command,
            processor.args.clone(),
            store,
            worker.stalled_job_timeout / 3,
        ))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    async fn run_command(&self, job: &Job, worker_id: &str) -> WorkerResult<CommandOutput> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .env("MIGRATION_JOB_ID", job.id.to_string())
            .env("MIGRATION_WORKER_ID", worker_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            WorkerError::job_processing(job.id, format!("启动迁移命令失败: {} ({e})", self.command))
        })?;

        let missing_pipe = |name: &str| WorkerError::job_processing(job.id, format!("无法获取{name}"));
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let payload = serde_json::to_vec(&job.payload).map_err(|e| {
            WorkerError::job_processing(job.id, format!("序列化任务负载失败: {e}"))
        })?;

        let job_id = job.id;
        let completion = async {
            let (write_result, stdout_lines, stderr_lines) = tokio::join!(
                write_payload(stdin, payload),
                read_lines(stdout),
                read_lines(stderr),
            );
            if let Err(e) = write_result {
                warn!(job_id = %job_id, "写入任务负载失败: {}", e);
            }
            for line in &stdout_lines {
                debug!(job_id = %job_id, "{}", line);
            }
            (child.wait().await, stderr_lines)
        };
        tokio::pin!(completion);

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (status, stderr_lines) = loop {
            tokio::select! {
                result = &mut completion => break result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.store.touch_job(job_id).await {
                        warn!(job_id = %job_id, code = e.code(), "刷新任务心跳失败: {}", e);
                    }
                }
            }
        };

        let status = status.map_err(|e| {
            WorkerError::job_processing(job_id, format!("等待迁移命令结束失败: {e}"))
        })?;

        let skip = stderr_lines.len().saturating_sub(STDERR_TAIL_LINES);
        Ok(CommandOutput {
            success: status.success(),
            exit_code: status.code(),
            stderr: stderr_lines.into_iter().skip(skip).collect(),
        })
    }

    async fn mark_failed(&self, job: &Job, message: &str) -> WorkerError {
        if let Err(e) = self
            .store
            .update_job_status(job.id, JobStatus::Failed, Some(message))
            .await
        {
            warn!(job_id = %job.id, "写入任务失败状态出错: {}", e);
        }
        WorkerError::job_processing(job.id, message)
    }
}

async fn write_payload(mut stdin: ChildStdin, payload: Vec<u8>) -> std::io::Result<()> {
    match stdin.write_all(&payload).await {
        // 子进程不读标准输入时管道会提前关闭
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
        Ok(()) => stdin.shutdown().await,
    }
}

async fn read_lines<R>(reader: R) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut lines = Vec::new();
    let mut line = String::new();
    while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
        lines.push(line.trim_end().to_string());
        line.clear();
    }
    lines
}

#[async_trait]
impl JobProcessor for ShellJobProcessor {
    #[instrument(skip_all, fields(job_id = %job.id, worker_id = %worker_id))]
    async fn process(&self, job: &Job, worker_id: &str) -> anyhow::Result<()> {
        info!(command = %self.command, args = ?self.args, "执行迁移命令");

        let output = match self.run_command(job, worker_id).await {
            Ok(output) => output,
            Err(e) => {
                let message = e.to_string();
                return Err(self.mark_failed(job, &message).await.into());
            }
        };

        if output.success {
            self.store
                .update_job_status(job.id, JobStatus::Completed, None)
                .await?;
            info!("迁移命令执行成功");
            return Ok(());
        }

        let exit = output
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let message = if output.stderr.is_empty() {
            format!("迁移命令退出码 {exit}")
        } else {
            format!("迁移命令退出码 {exit}: {}", output.stderr.join("\n"))
        };
        Err(self.mark_failed(job, &message).await.into())
    }
}
