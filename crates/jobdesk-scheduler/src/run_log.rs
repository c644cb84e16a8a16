//! Execution record writer.
//!
//! Executions hand their record to [`RunLogWriter::submit`], which never
//! blocks and never fails. A dedicated task drains the channel into a
//! [`JobLogSink`]; sink errors are reported with `tracing` and dropped.
//! [`RunLogWriter::close`] stops intake and lets the task flush what is
//! already queued before it exits.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use jobdesk_core::JobExecutionRecord;
use jobdesk_db::DbError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Persistent destination for execution records.
///
/// Each call must commit independently of any caller transaction.
#[async_trait]
pub trait JobLogSink: Send + Sync {
    async fn append(&self, record: &JobExecutionRecord) -> Result<(), DbError>;
}

#[derive(Debug, Clone)]
pub struct RunLogWriter {
    tx: mpsc::UnboundedSender<JobExecutionRecord>,
    closed: CancellationToken,
}

impl RunLogWriter {
    /// Starts the drain task on the current runtime.
    ///
    /// The returned handle completes once the queued records have been handed
    /// to the sink and either every clone of the writer has been dropped or
    /// [`close`](Self::close) was called.
    #[must_use]
    pub fn spawn(sink: Arc<dyn JobLogSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobExecutionRecord>();
        let closed = CancellationToken::new();
        let close_signal = closed.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = rx.recv() => match received {
                        Some(record) => write_record(sink.as_ref(), &record).await,
                        None => break,
                    },
                    () = close_signal.cancelled() => {
                        rx.close();
                        while let Some(record) = rx.recv().await {
                            write_record(sink.as_ref(), &record).await;
                        }
                        break;
                    }
                }
            }
            tracing::debug!("scheduler: job log writer stopped");
        });

        (Self { tx, closed }, handle)
    }

    /// Stops accepting records. Records queued before this call are still
    /// written; later submissions are dropped with an error log.
    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queues a record, truncated to the column limits.
    pub fn submit(&self, record: JobExecutionRecord) {
        if self.closed.is_cancelled() {
            tracing::error!(
                job_name = %record.job_name,
                "scheduler: job log writer is closed; record dropped"
            );
            return;
        }
        if let Err(e) = self.tx.send(record.bounded()) {
            tracing::error!(
                job_name = %e.0.job_name,
                "scheduler: job log writer has stopped; record dropped"
            );
        }
    }
}

async fn write_record(sink: &dyn JobLogSink, record: &JobExecutionRecord) {
    if let Err(e) = sink.append(record).await {
        tracing::error!(
            error = %e,
            job_name = %record.job_name,
            job_group = %record.job_group,
            "scheduler: failed to write job log"
        );
    }
}

/// In-memory sink, useful for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<JobExecutionRecord>>>,
}

impl MemoryLogSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the records appended so far, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<JobExecutionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl JobLogSink for MemoryLogSink {
    async fn append(&self, record: &JobExecutionRecord) -> Result<(), DbError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
