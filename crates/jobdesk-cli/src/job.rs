//! `job` subcommands. `check-cron` and `parse-target` work offline; the rest
//! need `DATABASE_URL`.

use std::sync::Arc;

use chrono::{Local, Utc};
use clap::Subcommand;
use jobdesk_core::JobStatus;
use jobdesk_db::{JobFilter, Page};
use jobdesk_scheduler::{
    parse_invoke_target, translate, ExecutionOutcome, JobExecutor, JobLogSink, JobParams,
    RunLogWriter, TaskRegistry,
};

const LIST_PAGE_SIZE: i64 = 500;

#[derive(Debug, Subcommand)]
pub enum JobCommands {
    /// List stored job definitions
    List {
        /// Only show jobs with this status code (0 = enabled, 1 = disabled)
        #[arg(long)]
        status: Option<JobStatus>,
    },
    /// Execute one job now and wait for its log record
    Run {
        /// Job id
        job_id: i64,
    },
    /// Validate a cron expression and print its next fire times
    CheckCron {
        expression: String,
        /// How many upcoming fire times to print
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Parse an invoke target and print its parts
    ParseTarget { target: String },
}

pub(crate) async fn run(command: JobCommands) -> anyhow::Result<()> {
    match command {
        JobCommands::List { status } => run_list(status).await,
        JobCommands::Run { job_id } => run_once(job_id).await,
        JobCommands::CheckCron { expression, count } => check_cron(&expression, count),
        JobCommands::ParseTarget { target } => parse_target(&target),
    }
}

async fn run_list(status: Option<JobStatus>) -> anyhow::Result<()> {
    let pool = jobdesk_db::connect_pool_from_env().await?;
    let filter = JobFilter {
        status,
        ..JobFilter::default()
    };
    let paged = jobdesk_db::list_jobs(&pool, filter, Page::new(1, LIST_PAGE_SIZE)).await?;

    if paged.items.is_empty() {
        println!("no jobs found");
        return Ok(());
    }

    println!(
        "{:<8}{:<24}{:<10}{:<22}TARGET",
        "ID", "NAME", "STATUS", "CRON"
    );
    for row in &paged.items {
        let status = match row.status.parse::<JobStatus>() {
            Ok(JobStatus::Enabled) => "enabled",
            Ok(JobStatus::Disabled) => "disabled",
            Err(_) => "invalid",
        };
        println!(
            "{:<8}{:<24}{:<10}{:<22}{}",
            row.job_id, row.job_name, status, row.cron_expression, row.invoke_target
        );
    }
    if paged.total > LIST_PAGE_SIZE {
        println!("... {} more", paged.total - LIST_PAGE_SIZE);
    }
    Ok(())
}

async fn run_once(job_id: i64) -> anyhow::Result<()> {
    let pool = jobdesk_db::connect_pool_from_env().await?;
    let job = jobdesk_db::get_job(&pool, job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {job_id} not found"))?
        .to_definition()?;

    parse_invoke_target(&job.invoke_target)?;

    let sink: Arc<dyn JobLogSink> = Arc::new(pool.clone());
    let (writer, writer_task) = RunLogWriter::spawn(sink);
    let executor = JobExecutor::new(Arc::new(TaskRegistry::with_builtin_tasks()), writer);

    let outcome = executor.execute(&JobParams::from(&job)).await;

    // Closing the last writer handle lets the drain task finish the insert.
    drop(executor);
    writer_task.await?;

    match outcome {
        ExecutionOutcome::Skipped => println!("job {job_id} skipped: already running"),
        ExecutionOutcome::Completed(record) if record.is_success() => {
            println!("job {job_id} succeeded: {}", record.message);
        }
        ExecutionOutcome::Completed(record) => {
            println!("job {job_id} failed: {}", record.exception_info);
        }
    }
    Ok(())
}

pub(crate) fn check_cron(expression: &str, count: usize) -> anyhow::Result<()> {
    let trigger = translate(expression)?;
    println!("expression: {}", trigger.expression());

    let upcoming = trigger.upcoming(Utc::now(), count);
    if upcoming.is_empty() {
        println!("no future fire times");
        return Ok(());
    }
    for at in upcoming {
        println!(
            "{}  ({})",
            at.to_rfc3339(),
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %Z")
        );
    }
    Ok(())
}

pub(crate) fn parse_target(target: &str) -> anyhow::Result<()> {
    let parsed = parse_invoke_target(target)?;
    println!("module:   {}", parsed.module);
    println!("function: {}", parsed.function);
    if parsed.args.is_empty() {
        println!("args:     (none)");
    }
    for (i, arg) in parsed.args.iter().enumerate() {
        println!("arg[{i}]:   {arg} ({})", arg.type_name());
    }
    Ok(())
}
