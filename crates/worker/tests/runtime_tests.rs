//! 工作循环与停滞任务恢复器在同一进程内协同运行的测试

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use migration_core::{
    ClassifiedStore, Job, JobId, JobProcessor, JobStatus, JobStore, ShutdownManager, WorkerConfig,
};
use migration_infrastructure::InMemoryJobStore;
use migration_worker_runtime::{ProcessingSlot, StalledJobRecoverer, WorkerLoop};
use serde_json::json;

/// 处理耗时固定、记录并发度的处理器
struct SlowProcessor {
    store: Arc<InMemoryJobStore>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    processed: Mutex<Vec<(JobId, String)>>,
}

impl SlowProcessor {
    fn new(store: Arc<InMemoryJobStore>, delay: Duration) -> Self {
        Self {
            store,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            processed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl JobProcessor for SlowProcessor {
    async fn process(&self, job: &Job, worker_id: &str) -> anyhow::Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.store
            .update_job_status(job.id, JobStatus::Completed, None)
            .await?;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.processed
            .lock()
            .unwrap()
            .push((job.id, worker_id.to_string()));
        Ok(())
    }
}

fn config() -> Arc<WorkerConfig> {
    Arc::new(WorkerConfig {
        id: "runtime-worker".to_string(),
        polling_interval: Duration::from_millis(100),
        stalled_job_timeout: Duration::from_millis(250),
        circuit_breaker_reset_timeout: Duration::from_secs(1),
        retry_delay: Duration::from_millis(200),
        shutdown_timeout: Duration::from_secs(1),
    })
}

#[tokio::test(start_paused = true)]
async fn test_single_job_in_flight_across_loop_and_recoverer() {
    let store = Arc::new(InMemoryJobStore::new());
    for i in 0..4 {
        store.enqueue(json!({ "pending": i }));
    }
    // 一小时前就停止更新的处理中任务
    let stale_at = Utc::now() - chrono::Duration::hours(1);
    for i in 0..3 {
        let mut job = store.enqueue_at(json!({ "stalled": i }), stale_at);
        job.status = JobStatus::Processing;
        job.worker_id = Some("crashed".to_string());
        job.updated_at = stale_at;
        store.insert_job(job);
    }

    let processor = Arc::new(SlowProcessor::new(store.clone(), Duration::from_millis(400)));
    let config = config();
    let slot = ProcessingSlot::new();
    let classified = ClassifiedStore::new(store.clone());

    let worker = WorkerLoop::new(
        config.clone(),
        classified.clone(),
        processor.clone(),
        slot.clone(),
    );
    let recoverer = StalledJobRecoverer::new(config, classified, processor.clone(), slot);

    let shutdown = ShutdownManager::new();
    let worker_listener = shutdown.subscribe().await;
    let recoverer_listener = shutdown.subscribe().await;
    let worker_handle = tokio::spawn(async move { worker.run(worker_listener).await });
    let recoverer_handle = tokio::spawn(async move { recoverer.run(recoverer_listener).await });

    tokio::time::sleep(Duration::from_secs(20)).await;
    shutdown.shutdown().await;
    worker_handle.await.unwrap();
    recoverer_handle.await.unwrap();

    assert_eq!(processor.max_in_flight.load(Ordering::SeqCst), 1);

    let processed = processor.processed.lock().unwrap().clone();
    assert_eq!(processed.len(), 7);
    assert!(processed
        .iter()
        .all(|(_, worker_id)| worker_id == "runtime-worker"));
    assert!(store
        .jobs()
        .iter()
        .all(|job| job.status == JobStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_both_activities() {
    let store = Arc::new(InMemoryJobStore::new());
    let processor = Arc::new(SlowProcessor::new(store.clone(), Duration::from_millis(10)));
    let config = config();
    let slot = ProcessingSlot::new();
    let classified = ClassifiedStore::new(store.clone());

    let worker = WorkerLoop::new(config.clone(), classified.clone(), processor.clone(), slot.clone());
    let recoverer = StalledJobRecoverer::new(config, classified, processor, slot);

    let shutdown = ShutdownManager::new();
    let worker_listener = shutdown.subscribe().await;
    let recoverer_listener = shutdown.subscribe().await;
    let worker_handle = tokio::spawn(async move { worker.run(worker_listener).await });
    let recoverer_handle = tokio::spawn(async move { recoverer.run(recoverer_listener).await });

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(store.call_count() > 0);

    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), async {
        worker_handle.await.unwrap();
        recoverer_handle.await.unwrap();
    })
    .await
    .expect("background tasks should stop promptly");

    let calls = store.call_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.call_count(), calls);

    // 关闭后仍然可以直接查询存储
    assert!(store.claim_next_pending_job("probe").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_job_recovered_while_queue_stays_busy() {
    let store = Arc::new(InMemoryJobStore::new());
    for i in 0..30 {
        store.enqueue(json!({ "pending": i }));
    }
    let stale_at = Utc::now() - chrono::Duration::hours(1);
    let mut stuck = store.enqueue_at(json!({ "stalled": true }), stale_at);
    stuck.status = JobStatus::Processing;
    stuck.worker_id = None;
    stuck.updated_at = stale_at;
    store.insert_job(stuck.clone());

    // 处理耗时加轮询间隔与恢复周期相同，每次扫描时刻都落在处理过程中
    let config = Arc::new(WorkerConfig {
        id: "busy-worker".to_string(),
        polling_interval: Duration::from_secs(1),
        stalled_job_timeout: Duration::from_secs(10),
        circuit_breaker_reset_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(1),
    });
    let processor = Arc::new(SlowProcessor::new(store.clone(), Duration::from_secs(9)));
    let slot = ProcessingSlot::new();
    let classified = ClassifiedStore::new(store.clone());

    let worker = WorkerLoop::new(
        config.clone(),
        classified.clone(),
        processor.clone(),
        slot.clone(),
    );
    let recoverer = StalledJobRecoverer::new(config, classified, processor.clone(), slot);

    let shutdown = ShutdownManager::new();
    let worker_listener = shutdown.subscribe().await;
    let recoverer_listener = shutdown.subscribe().await;
    let recoverer_handle = tokio::spawn(async move { recoverer.run(recoverer_listener).await });
    tokio::time::sleep(Duration::from_secs(3)).await;
    let worker_handle = tokio::spawn(async move { worker.run(worker_listener).await });

    tokio::time::sleep(Duration::from_secs(60)).await;
    shutdown.shutdown().await;
    worker_handle.await.unwrap();
    recoverer_handle.await.unwrap();

    let recovered = store.get_job(stuck.id).unwrap();
    assert_eq!(recovered.status, JobStatus::Completed);
    assert_eq!(recovered.worker_id.as_deref(), Some("busy-worker"));
    assert_eq!(processor.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(store
        .jobs()
        .iter()
        .any(|job| job.status == JobStatus::Pending));
}
