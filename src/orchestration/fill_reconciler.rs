//! Polls broker executions since a persisted cursor.

use super::fill_ingest::{FillIngestor, ReconcileError};
use crate::broker::BrokerAdapter;
use crate::db::Repository;
use crate::domain::{FillCursor, TimeMs};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FillSyncSummary {
    pub fetched: usize,
    pub inserted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct FillReconciler {
    repo: Arc<Repository>,
    broker: Arc<dyn BrokerAdapter>,
    ingestor: FillIngestor,
    account_id: String,
}

impl FillReconciler {
    pub fn new(
        repo: Arc<Repository>,
        broker: Arc<dyn BrokerAdapter>,
        ingestor: FillIngestor,
        account_id: String,
    ) -> Self {
        Self {
            repo,
            broker,
            ingestor,
            account_id,
        }
    }

    /// One polling cycle from the stored cursor, or from `default_start`
    /// when no cursor has been stored yet.
    pub async fn sync(&self, default_start: TimeMs, now: TimeMs) -> Result<FillSyncSummary, ReconcileError> {
        let since = self
            .repo
            .get_fill_cursor()
            .await?
            .map(|c| c.last_ts)
            .unwrap_or(default_start);
        self.sync_since(since, now).await
    }

    /// Ingest every fill at or after `since`. The cursor advances only past
    /// the contiguous run of fills that were processed successfully.
    pub async fn sync_since(&self, since: TimeMs, now: TimeMs) -> Result<FillSyncSummary, ReconcileError> {
        let mut fills = self.broker.get_fills(&self.account_id, since).await?;
        fills.sort_by(|a, b| (a.ts, a.seq).cmp(&(b.ts, b.seq)));

        let mut summary = FillSyncSummary {
            fetched: fills.len(),
            ..Default::default()
        };
        let mut advance_to: Option<FillCursor> = None;
        let mut contiguous = true;

        for fill in &fills {
            match self.ingestor.ingest(fill, None, now).await {
                Ok(inserted) => {
                    if inserted {
                        summary.inserted += 1;
                    }
                    if contiguous {
                        advance_to = Some(FillCursor::new(fill.ts, fill.seq));
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    contiguous = false;
                    error!(
                        order_id = %fill.order_id,
                        exec_id = %fill.exec_id,
                        error = %e,
                        "Failed to ingest fill"
                    );
                }
            }
        }

        if let Some(cursor) = advance_to {
            self.repo.advance_fill_cursor(cursor, now).await?;
        }
        if summary.fetched > 0 {
            debug!(
                fetched = summary.fetched,
                inserted = summary.inserted,
                failed = summary.failed,
                "Fill sync cycle"
            );
        }
        Ok(summary)
    }
}
