use super::*;
use crate::core::agent::ScheduleSpec;
use std::sync::atomic::AtomicU32;

fn agent(id: &str, schedule: ScheduleSpec) -> AgentRecord {
    let mut agent = AgentRecord::new("owner-1", "digest", "Summarize");
    agent.id = id.to_string();
    agent.schedule = schedule;
    agent
}

#[test]
fn cron_normalization_adds_seconds_field() {
    assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
    assert_eq!(normalize_cron(" 0 0 9 * * * "), "0 0 9 * * *");
}

#[test]
fn membership_does_not_leak_across_prefixes() {
    let entry = RecurringEntry {
        key: "agent-12:abc".to_string(),
        job: RecurringJob {
            name: "agent-12".to_string(),
            data: JobData {
                agent_id: "12".to_string(),
                owner_id: "o".to_string(),
            },
            repeat: Repeat::Every(1000),
        },
    };
    assert!(entry.belongs_to("12"));
    assert!(!entry.belongs_to("1"));
}

#[test]
fn recurring_job_wire_shape() {
    let job = RecurringJob::for_agent(&agent("a1", ScheduleSpec::interval(5)), Repeat::Every(300_000));
    assert_eq!(
        serde_json::to_value(&job).unwrap(),
        serde_json::json!({
            "name": "agent-a1",
            "data": {"agentId": "a1", "ownerId": "owner-1"},
            "repeat": {"every": 300_000}
        })
    );
}

#[tokio::test]
async fn schedule_agent_replaces_existing_entries() {
    let queue = MemoryJobQueue::new();
    let a1 = agent("a1", ScheduleSpec::interval(5));
    let a12 = agent("a12", ScheduleSpec::cron("0 9 * * *"));

    schedule_agent(&queue, &a1).await.unwrap();
    schedule_agent(&queue, &a12).await.unwrap();
    let key = schedule_agent(&queue, &a1).await.unwrap().unwrap();

    let mine = entries_for_agent(&queue, "a1").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].key, key);
    assert!(key.starts_with("agent-a1:"));
    assert_eq!(entries_for_agent(&queue, "a12").await.unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_schedule_only_clears() {
    let queue = MemoryJobQueue::new();
    let mut a = agent("a1", ScheduleSpec::interval(5));
    schedule_agent(&queue, &a).await.unwrap();
    a.schedule.enabled = false;
    assert_eq!(schedule_agent(&queue, &a).await.unwrap(), None);
    assert!(queue.list_recurring().await.unwrap().is_empty());
}

#[tokio::test]
async fn unschedule_removes_every_matching_entry() {
    let queue = MemoryJobQueue::new();
    let a = agent("a1", ScheduleSpec::interval(5));
    // Two entries for the same agent, e.g. from creation and a later direct re-arm.
    queue
        .add_recurring(RecurringJob::for_agent(&a, Repeat::Every(300_000)))
        .await
        .unwrap();
    queue
        .add_recurring(RecurringJob::for_agent(&a, Repeat::Cron("0 9 * * *".to_string())))
        .await
        .unwrap();
    assert_eq!(unschedule_agent(&queue, "a1").await.unwrap(), 2);
    assert!(entries_for_agent(&queue, "a1").await.unwrap().is_empty());
}

#[tokio::test]
async fn closed_memory_queue_rejects_new_entries() {
    let queue = MemoryJobQueue::new();
    queue.close().await.unwrap();
    let a = agent("a1", ScheduleSpec::interval(5));
    assert!(schedule_agent(&queue, &a).await.is_err());
}

struct Flaky {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl JobHandler for Flaky {
    async fn handle(&self, _job: &JobData) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("transient failure");
        }
        Ok(())
    }
}

fn queued() -> QueuedJob {
    QueuedJob {
        key: "agent-a1:k".to_string(),
        data: JobData {
            agent_id: "a1".to_string(),
            owner_id: "o".to_string(),
        },
    }
}

#[tokio::test(start_paused = true)]
async fn delivery_retries_until_success() {
    let handler = Flaky {
        failures_left: AtomicU32::new(1),
        calls: AtomicU32::new(0),
    };
    let deliveries = deliver(&handler, &queued(), 3, Duration::from_secs(5)).await;
    assert_eq!(deliveries, 2);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn delivery_gives_up_at_max() {
    let handler = Flaky {
        failures_left: AtomicU32::new(10),
        calls: AtomicU32::new(0),
    };
    deliver(&handler, &queued(), 2, Duration::from_secs(5)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn worker_drains_fired_jobs() {
    let (tx, rx) = mpsc::channel(8);
    let queue = MemoryJobQueue::with_sender(tx);
    let a = agent("a1", ScheduleSpec::interval(5));
    let key = schedule_agent(&queue, &a).await.unwrap().unwrap();

    let handler = Arc::new(Flaky {
        failures_left: AtomicU32::new(0),
        calls: AtomicU32::new(0),
    });
    let worker = QueueWorker::new(rx, handler.clone(), 2, Duration::from_millis(10));
    let task = tokio::spawn(worker.run());

    assert!(queue.fire(&key).await.unwrap());
    assert!(!queue.fire("agent-zz:missing").await.unwrap());
    drop(queue);
    task.await.unwrap();
    // Spawned deliveries may still be in flight once the receiver closes.
    for _ in 0..10 {
        if handler.calls.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cron_queue_tracks_and_removes_entries() {
    let (tx, _rx) = mpsc::channel(8);
    let queue = CronJobQueue::start(tx).await.unwrap();
    let a = agent("a1", ScheduleSpec::cron("0 9 * * *"));
    let first = schedule_agent(&queue, &a).await.unwrap().unwrap();
    let second = queue
        .add_recurring(RecurringJob::for_agent(&a, Repeat::Every(60_000)))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(entries_for_agent(&queue, "a1").await.unwrap().len(), 2);
    assert_eq!(unschedule_agent(&queue, "a1").await.unwrap(), 2);
    assert!(queue.list_recurring().await.unwrap().is_empty());
    queue.close().await.unwrap();
}

#[tokio::test]
async fn cron_queue_rejects_bad_expressions() {
    let (tx, _rx) = mpsc::channel(8);
    let queue = CronJobQueue::start(tx).await.unwrap();
    let a = agent("a1", ScheduleSpec::cron("not a cron"));
    let err = schedule_agent(&queue, &a).await.unwrap_err();
    assert!(err.to_string().contains("Invalid cron expression"));
    queue.close().await.unwrap();
}

#[test]
fn cron_validation_accepts_five_and_six_fields() {
    assert!(validate_cron("0 9 * * *").is_ok());
    assert!(validate_cron("0 */15 * * * *").is_ok());
    assert!(validate_cron("every tuesday").is_err());
}
