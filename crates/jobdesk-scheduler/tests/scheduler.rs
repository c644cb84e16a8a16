use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobdesk_core::{
    ConcurrencyPolicy, ExecutionStatus, JobDefinition, JobExecutionRecord, JobStatus,
    MisfirePolicy, FAILURE_MESSAGE,
};
use jobdesk_db::DbError;
use jobdesk_scheduler::{
    add_job_to_scheduler, drain_scheduler, get_next_fire_time, init_scheduler,
    load_enabled_jobs, remove_job_from_scheduler, run_job_once, start_engine, ExecutionOutcome,
    JobLogSink, MemoryLogSink, SchedulerEngine, SchedulerError, TaskRegistry, ValidationError,
};

fn job(job_id: i64, target: &str, cron: &str) -> JobDefinition {
    JobDefinition {
        job_id,
        job_name: format!("job-{job_id}"),
        job_group: "DEFAULT".to_string(),
        invoke_target: target.to_string(),
        cron_expression: cron.to_string(),
        misfire_policy: MisfirePolicy::Discard,
        concurrent: ConcurrencyPolicy::Forbid,
        status: JobStatus::Enabled,
    }
}

fn engine() -> (SchedulerEngine, MemoryLogSink) {
    let sink = MemoryLogSink::new();
    let engine = start_engine(
        Arc::new(TaskRegistry::with_builtin_tasks()),
        Arc::new(sink.clone()),
    )
    .expect("engine starts inside a runtime");
    (engine, sink)
}

/// Polls `sink` until it holds at least `count` records.
async fn wait_for_records(sink: &MemoryLogSink, count: usize) -> Vec<JobExecutionRecord> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let records = sink.records();
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("records arrive before timeout")
}

// ---------------------------------------------------------------------------
// add / remove / next fire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn noon_job_lifecycle() {
    let (engine, sink) = engine();
    let noon = job(1, "sample_task.no_params", "0 0 12 * * ?");
    let before = Utc::now();

    add_job_to_scheduler(&engine, &noon).expect("valid job");

    let next = get_next_fire_time(&engine, 1).expect("next fire time");
    assert!(next >= before);
    assert_eq!(engine.describe(1).expect("entry").key, "sys_job_1");

    let outcome = run_job_once(&engine, &noon)
        .expect("dispatched")
        .await
        .expect("execution task");
    assert_eq!(
        outcome.record().expect("completed").message,
        "no_params executed successfully"
    );
    assert_eq!(wait_for_records(&sink, 1).await.len(), 1);

    remove_job_from_scheduler(&engine, 1);
    assert_eq!(get_next_fire_time(&engine, 1), None);
    remove_job_from_scheduler(&engine, 1);
    assert!(engine.is_empty());
}

#[tokio::test]
async fn adding_twice_replaces_the_entry() {
    let (engine, _sink) = engine();

    engine
        .add(&job(7, "sample_task.no_params", "0 0 3 * * ?"))
        .expect("first add");
    engine
        .add(&job(7, "sample_task.with_params('x')", "0/5 * * * * ?"))
        .expect("second add");

    assert_eq!(engine.len(), 1);
    let entry = engine.describe(7).expect("entry");
    assert_eq!(entry.expression, "0/5 * * * * *");
    assert_eq!(entry.invoke_target, "sample_task.with_params('x')");

    let next = entry.next_fire.expect("next fire");
    assert!(next - Utc::now() <= chrono::Duration::seconds(6));
}

#[tokio::test]
async fn invalid_definitions_are_rejected_without_side_effects() {
    let (engine, _sink) = engine();

    let err = engine
        .add(&job(2, "sample_task.no_params", "* * * * *"))
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Validation(ValidationError::Cron { .. })
    ));

    let err = engine
        .add(&job(2, "not a target", "0 * * * * ?"))
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Validation(ValidationError::InvokeTarget { .. })
    ));

    assert!(engine.is_empty());
}

#[tokio::test]
async fn year_in_the_past_schedules_with_no_next_fire() {
    let (engine, _sink) = engine();
    engine
        .add(&job(3, "sample_task.no_params", "0 0 0 1 1 ? 2000"))
        .expect("valid expression");
    assert!(engine.is_scheduled(3));
    assert_eq!(engine.next_fire_time(3), None);
}

// ---------------------------------------------------------------------------
// run once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_once_records_success() {
    let (engine, sink) = engine();

    let outcome = engine
        .run_once(&job(1, "sample_task.no_params", "0/10 * * * * ?"))
        .expect("dispatched")
        .await
        .expect("execution task");

    let record = outcome.record().expect("completed");
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.message, "no_params executed successfully");

    let logged = wait_for_records(&sink, 1).await;
    assert_eq!(logged[0].job_name, "job-1");
    assert_eq!(logged[0].invoke_target, "sample_task.no_params");
}

#[tokio::test]
async fn run_once_passes_arguments_through() {
    let (engine, _sink) = engine();

    let outcome = engine
        .run_once(&job(
            4,
            "sample_task.with_multi_params('ry', True, 2000)",
            "0 * * * * ?",
        ))
        .expect("dispatched")
        .await
        .expect("execution task");

    assert_eq!(
        outcome.record().expect("completed").message,
        "with_multi_params executed successfully: s=ry, b=true, n=2000"
    );
}

#[tokio::test]
async fn failing_task_is_logged_and_engine_keeps_running() {
    let (engine, sink) = engine();

    let outcome = engine
        .run_once(&job(5, "sample_task.does_not_exist", "0 * * * * ?"))
        .expect("syntactically valid target")
        .await
        .expect("execution task");

    let record = outcome.record().expect("completed");
    assert_eq!(record.status, ExecutionStatus::Failure);
    assert_eq!(record.message, FAILURE_MESSAGE);
    assert!(record.exception_info.contains("does_not_exist"));

    let logged = wait_for_records(&sink, 1).await;
    assert_eq!(logged[0].status, ExecutionStatus::Failure);
    assert!(engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forbid_policy_skips_run_while_previous_is_active() {
    let (engine, _sink) = engine();
    let slow = job(6, "sample_task.sleep_millis(400)", "0 0 3 * * ?");

    let first = engine.run_once(&slow).expect("dispatched");
    while !engine.executor().running().is_running(6) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = engine.run_once(&slow).expect("dispatched").await.expect("task");

    assert_eq!(second, ExecutionOutcome::Skipped);
    assert!(first.await.expect("task").record().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn allow_policy_runs_overlapping_executions() {
    let (engine, sink) = engine();
    let mut slow = job(8, "sample_task.sleep_millis(200)", "0 0 3 * * ?");
    slow.concurrent = ConcurrencyPolicy::Allow;

    let a = engine.run_once(&slow).expect("dispatched");
    let b = engine.run_once(&slow).expect("dispatched");
    assert!(a.await.expect("task").record().is_some());
    assert!(b.await.expect("task").record().is_some());
    assert_eq!(wait_for_records(&sink, 2).await.len(), 2);
}

// ---------------------------------------------------------------------------
// timed fires
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_second_trigger_fires() {
    let (engine, sink) = engine();
    engine
        .add(&job(9, "sample_task.with_params('tick')", "* * * * * ?"))
        .expect("valid job");

    let records = wait_for_records(&sink, 1).await;
    assert_eq!(
        records[0].message,
        "with_params executed successfully: tick"
    );
    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_job_stops_firing() {
    let (engine, sink) = engine();
    engine
        .add(&job(10, "sample_task.no_params", "* * * * * ?"))
        .expect("valid job");
    assert!(engine.remove(10));

    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert!(sink.records().is_empty());
}

// ---------------------------------------------------------------------------
// lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_load_skips_invalid_jobs() {
    let mut disabled = job(13, "sample_task.no_params", "0 * * * * ?");
    disabled.status = JobStatus::Disabled;
    let source = vec![
        job(11, "sample_task.no_params", "0 * * * * ?"),
        job(12, "sample_task.no_params", "not cron"),
        disabled,
    ];

    let (engine, report) = init_scheduler(
        &source,
        Arc::new(TaskRegistry::with_builtin_tasks()),
        Arc::new(MemoryLogSink::new()),
    )
    .await
    .expect("init");

    assert_eq!(report.scheduled, vec![11]);
    assert_eq!(report.failed, vec![12]);
    assert_eq!(engine.scheduled_job_ids(), vec![11]);
}

#[tokio::test]
async fn reload_replaces_existing_entries() {
    let (engine, _sink) = engine();
    let source = vec![job(1, "sample_task.no_params", "0 * * * * ?")];

    load_enabled_jobs(&engine, &source).await.expect("first load");
    load_enabled_jobs(&engine, &source).await.expect("second load");
    assert_eq!(engine.len(), 1);
}

#[tokio::test]
async fn shutdown_rejects_new_work_and_is_idempotent() {
    let (engine, _sink) = engine();
    engine
        .add(&job(1, "sample_task.no_params", "0 * * * * ?"))
        .expect("valid job");

    engine.shutdown();
    engine.shutdown();

    assert!(!engine.is_running());
    assert!(engine.is_empty());
    assert!(matches!(
        engine.add(&job(2, "sample_task.no_params", "0 * * * * ?")),
        Err(SchedulerError::NotRunning)
    ));
    assert!(matches!(
        engine.run_once(&job(2, "sample_task.no_params", "0 * * * * ?")),
        Err(SchedulerError::NotRunning)
    ));
}

/// A sink that takes a while per record, like a remote database.
struct SlowSink {
    inner: MemoryLogSink,
}

#[async_trait]
impl JobLogSink for SlowSink {
    async fn append(&self, record: &JobExecutionRecord) -> Result<(), DbError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.append(record).await
    }
}

#[tokio::test]
async fn drain_flushes_records_of_completed_executions() {
    let sink = MemoryLogSink::new();
    let engine = start_engine(
        Arc::new(TaskRegistry::with_builtin_tasks()),
        Arc::new(SlowSink {
            inner: sink.clone(),
        }),
    )
    .expect("engine starts inside a runtime");
    let handles: Vec<_> = (1..=5)
        .map(|id| {
            run_job_once(&engine, &job(id, "sample_task.no_params", "0 * * * * ?"))
                .expect("dispatched")
        })
        .collect();
    for handle in handles {
        assert!(handle.await.expect("execution task").record().is_some());
    }

    assert!(drain_scheduler(&engine, Duration::from_secs(5)).await);

    assert_eq!(sink.records().len(), 5);
    assert!(!engine.is_running());
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn drain_waits_for_executions_still_running() {
    let mut registry = TaskRegistry::new();
    registry.register_async("t", "slow", 0, |_| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        anyhow::Ok("slow done".to_string())
    });
    let sink = MemoryLogSink::new();
    let engine = start_engine(Arc::new(registry), Arc::new(sink.clone()))
        .expect("engine starts inside a runtime");

    drop(run_job_once(&engine, &job(1, "t.slow", "0 * * * * ?")).expect("dispatched"));
    assert!(engine.drain(Duration::from_secs(5)).await);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "slow done");
}

#[tokio::test]
async fn drain_reports_executions_that_outlive_the_timeout() {
    let mut registry = TaskRegistry::new();
    registry.register_async("t", "stuck", 0, |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        anyhow::Ok(String::new())
    });
    let engine = start_engine(Arc::new(registry), Arc::new(MemoryLogSink::new()))
        .expect("engine starts inside a runtime");

    drop(run_job_once(&engine, &job(1, "t.stuck", "0 * * * * ?")).expect("dispatched"));
    assert!(!engine.drain(Duration::from_millis(100)).await);
    assert_eq!(engine.in_flight(), 1);
}
