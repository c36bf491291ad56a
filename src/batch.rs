use crate::models::{ListingId, StageReport, UploadRecord};
use crate::session::{SessionClient, SessionConfig, SessionError};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Semaphore, mpsc},
    task::{self, JoinSet},
};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Remove the account's active listings before publishing.
    pub clear_existing: bool,
    /// Upper bound on records processed at once; `None` runs all of them.
    pub max_concurrency: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            clear_existing: true,
            max_concurrency: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchCause {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("record worker panicked: {0}")]
    Panicked(String),
}

#[derive(Debug)]
pub struct BatchError {
    pub record: usize,
    pub username: String,
    /// Position of the failing ad within its record, if an ad failed.
    pub ad: Option<usize>,
    pub cause: BatchCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    LoginFailed,
    RemovalFailed,
    Panicked,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdOutcome {
    pub title: String,
    pub listing_id: Option<ListingId>,
    /// Timed publish steps; empty when the ad failed.
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub index: usize,
    pub username: String,
    pub status: RecordStatus,
    pub removed: Option<usize>,
    pub ads: Vec<AdOutcome>,
}

impl RecordReport {
    fn new(index: usize, username: &str, status: RecordStatus) -> Self {
        Self {
            index,
            username: username.to_string(),
            status,
            removed: None,
            ads: Vec::new(),
        }
    }

    pub fn published(&self) -> usize {
        self.ads.iter().filter(|ad| ad.listing_id.is_some()).count()
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub records: Vec<RecordReport>,
    pub errors: Vec<BatchError>,
}

impl BatchReport {
    pub fn published(&self) -> usize {
        self.records.iter().map(RecordReport::published).sum()
    }
}

/// Runs every record on its own task and waits for all of them. Failures are
/// collected while the tasks run and logged once every task has finished.
pub async fn run_batch(
    records: Vec<UploadRecord>,
    config: SessionConfig,
    options: BatchOptions,
) -> BatchReport {
    let batch_id = Uuid::new_v4();
    let total = records.len();
    info!(target = "bolha.batch", batch = %batch_id, records = total, "batch_started");

    let (tx, mut rx) = mpsc::unbounded_channel::<BatchError>();
    let collector = tokio::spawn(async move {
        let mut errors = Vec::new();
        while let Some(err) = rx.recv().await {
            errors.push(err);
        }
        errors
    });

    let limiter = options
        .max_concurrency
        .filter(|n| *n > 0)
        .map(|n| Arc::new(Semaphore::new(n)));
    let mut workers = JoinSet::new();
    let mut owners: HashMap<task::Id, (usize, String)> = HashMap::with_capacity(total);
    for (index, record) in records.into_iter().enumerate() {
        let username = record.account.username.clone();
        let span = info_span!("record", batch = %batch_id, record = index, username = %username);
        let worker = RecordWorker {
            index,
            config: config.clone(),
            clear_existing: options.clear_existing,
            errors: tx.clone(),
        };
        let limiter = limiter.clone();
        let handle = workers.spawn(
            async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                worker.run(record).await
            }
            .instrument(span),
        );
        owners.insert(handle.id(), (index, username));
    }

    let mut slots: Vec<Option<RecordReport>> = vec![None; total];
    while let Some(joined) = workers.join_next_with_id().await {
        match joined {
            Ok((_, report)) => {
                let index = report.index;
                slots[index] = Some(report);
            }
            Err(join_err) => {
                let Some((index, username)) = owners.get(&join_err.id()).cloned() else {
                    error!(target = "bolha.batch", error = %join_err, "unknown_worker_failed");
                    continue;
                };
                let sent = tx.send(BatchError {
                    record: index,
                    username: username.clone(),
                    ad: None,
                    cause: BatchCause::Panicked(join_err.to_string()),
                });
                if let Err(lost) = sent {
                    error!(
                        target = "bolha.batch",
                        record = index,
                        error = %lost.0.cause,
                        "error_channel_closed"
                    );
                }
                slots[index] = Some(RecordReport::new(index, &username, RecordStatus::Panicked));
            }
        }
    }

    // Every worker has finished; dropping the last sender ends the collector.
    drop(tx);
    let errors = match collector.await {
        Ok(errors) => errors,
        Err(err) => {
            error!(target = "bolha.batch", batch = %batch_id, error = %err, "error_collector_failed");
            Vec::new()
        }
    };

    let report = BatchReport {
        batch_id,
        records: slots.into_iter().flatten().collect(),
        errors,
    };
    log_report(&report);
    report
}

fn log_report(report: &BatchReport) {
    for err in &report.errors {
        error!(
            target = "bolha.batch",
            batch = %report.batch_id,
            record = err.record,
            username = %err.username,
            ad = ?err.ad,
            error = %err.cause,
            "record_error"
        );
    }
    info!(
        target = "bolha.batch",
        batch = %report.batch_id,
        records = report.records.len(),
        published = report.published(),
        errors = report.errors.len(),
        "batch_finished"
    );
}

struct RecordWorker {
    index: usize,
    config: SessionConfig,
    clear_existing: bool,
    errors: mpsc::UnboundedSender<BatchError>,
}

impl RecordWorker {
    async fn run(self, record: UploadRecord) -> RecordReport {
        let username = record.account.username.clone();

        let client = match SessionClient::login(record.account, &self.config).await {
            Ok(client) => client,
            Err(err) => {
                self.report(&username, None, err);
                return RecordReport::new(self.index, &username, RecordStatus::LoginFailed);
            }
        };

        let mut report = RecordReport::new(self.index, &username, RecordStatus::Completed);
        if self.clear_existing {
            match client.clear_listings().await {
                Ok(removed) => report.removed = Some(removed),
                Err(err) => {
                    self.report(&username, None, err);
                    report.status = RecordStatus::RemovalFailed;
                    return report;
                }
            }
        }

        for (position, ad) in record.ads.iter().enumerate() {
            let (listing_id, stages) = match client.publish(ad).await {
                Ok(published) => (Some(published.listing_id), published.stages),
                Err(err) => {
                    warn!(
                        target = "bolha.batch",
                        username = client.username(),
                        title = %ad.title,
                        kind = err.kind(),
                        "ad_failed"
                    );
                    self.report(&username, Some(position), err);
                    (None, Vec::new())
                }
            };
            report.ads.push(AdOutcome {
                title: ad.title.clone(),
                listing_id,
                stages,
            });
        }
        report
    }

    fn report(&self, username: &str, ad: Option<usize>, err: SessionError) {
        let sent = self.errors.send(BatchError {
            record: self.index,
            username: username.to_string(),
            ad,
            cause: err.into(),
        });
        if let Err(lost) = sent {
            error!(
                target = "bolha.batch",
                record = self.index,
                error = %lost.0.cause,
                "error_channel_closed"
            );
        }
    }
}
