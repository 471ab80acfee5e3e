use std::sync::Arc;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};

use crate::{
    error::Result,
    models::ClickEvent,
    retry::{with_retry, RetryConfig},
};

// ── Click log ──────────────────────────────────────────────────────────────

/// Append-only click storage. Nothing in the crate updates or deletes rows
/// in `clicks`.
#[derive(Clone)]
pub struct ClickLog {
    pool: SqlitePool,
}

impl ClickLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, event: &ClickEvent) -> Result<()> {
        self.append_batch(std::slice::from_ref(event)).await
    }

    /// Write all events in one transaction: either every event lands or none.
    pub async fn append_batch(&self, events: &[ClickEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                "INSERT INTO clicks (link_code, occurred_at, ip_address) VALUES (?1, ?2, ?3)",
            )
            .bind(&event.link_code)
            .bind(event.occurred_at)
            .bind(&event.ip_address)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ── Recorder ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("click queue is full")]
    QueueFull,
    #[error("click recorder is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    /// Events that may wait in memory before `record` starts refusing them.
    pub capacity: usize,
    /// Events written per transaction.
    pub batch_size: usize,
    pub retry: RetryConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 100,
            retry: RetryConfig::default(),
        }
    }
}

enum Command {
    Record(ClickEvent),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Fire-and-forget click recording.
///
/// `record` only enqueues; a single background task drains the queue into
/// the `ClickLog` in batches, retrying transient store errors. Events still
/// queued when the process crashes are lost (at most `capacity` of them);
/// `shutdown` drains everything already accepted before returning.
#[derive(Clone)]
pub struct ClickRecorder {
    tx: mpsc::Sender<Command>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ClickRecorder {
    /// Start the writer task on the current tokio runtime.
    pub fn spawn(log: ClickLog, config: RecorderConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let worker = tokio::spawn(run_writer(
            rx,
            log,
            config.batch_size.max(1),
            config.retry,
        ));

        Self {
            tx,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Queue one click. Never waits for I/O.
    pub fn record(&self, event: ClickEvent) -> Result<(), RecordError> {
        self.tx
            .try_send(Command::Record(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RecordError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => RecordError::Closed,
            })
    }

    /// Wait until every event queued before this call has been written (or
    /// given up on after retries).
    pub async fn flush(&self) -> Result<(), RecordError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| RecordError::Closed)?;
        done_rx.await.map_err(|_| RecordError::Closed)
    }

    /// Number of commands waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop accepting clicks, write out everything already queued and wait
    /// for the writer to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Click writer task failed: {:?}", e);
            }
        }
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<Command>,
    log: ClickLog,
    batch_size: usize,
    retry: RetryConfig,
) {
    let mut batch: Vec<ClickEvent> = Vec::with_capacity(batch_size);
    let mut waiters: Vec<oneshot::Sender<()>> = Vec::new();

    while let Some(command) = rx.recv().await {
        accept(command, &mut rx, &mut batch, &mut waiters);

        // Drain whatever else is already queued, up to one batch.
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(command) => accept(command, &mut rx, &mut batch, &mut waiters),
                Err(_) => break,
            }
        }

        write_batch(&log, &mut batch, retry).await;
        for waiter in waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    write_batch(&log, &mut batch, retry).await;
    tracing::info!("Click writer stopped");
}

fn accept(
    command: Command,
    rx: &mut mpsc::Receiver<Command>,
    batch: &mut Vec<ClickEvent>,
    waiters: &mut Vec<oneshot::Sender<()>>,
) {
    match command {
        Command::Record(event) => batch.push(event),
        Command::Flush(waiter) => waiters.push(waiter),
        Command::Shutdown => {
            // Buffered commands are still delivered after close.
            tracing::info!("Click writer draining queue before shutdown");
            rx.close();
        }
    }
}

async fn write_batch(log: &ClickLog, batch: &mut Vec<ClickEvent>, retry: RetryConfig) {
    if batch.is_empty() {
        return;
    }

    let events = std::mem::take(batch);
    match with_retry("append_clicks", retry, || log.append_batch(&events)).await {
        Ok(()) => tracing::debug!("Wrote {} click event(s)", events.len()),
        Err(e) => tracing::error!("Dropped {} click event(s): {}", events.len(), e),
    }
}
