//! Batch Transaction Manager
//!
//! Splits an ordered list of statements into chunks and writes each chunk in
//! a single transaction. Chunks run strictly one after another; a failed
//! chunk is retried as a whole with exponential backoff. Chunks committed
//! before a terminal failure stay committed.

use crate::cypher::CypherStatement;
use crate::error::ImportError;
use crate::executor::TransactionalExecutor;
use anyhow::Result;
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

pub type BatchItem = CypherStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    /// 1-based
    pub current_batch: usize,
    pub total_batches: usize,
    /// Cumulative
    pub items_processed: usize,
    pub total_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchResult {
    pub succeeded: usize,
    pub total_batches: usize,
}

pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

#[derive(Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Retries per chunk after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl BatchOptions {
    pub fn validate(&self) -> std::result::Result<(), ImportError> {
        if self.batch_size == 0 {
            return Err(ImportError::InvalidArgument(
                "batch_size must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// `base * 2^(retry - 1)` for the 1-based retry number.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    base.saturating_mul(factor)
}

// ============================================================================
// Execution
// ============================================================================

pub async fn execute_batch<E>(executor: &E, items: &[BatchItem], options: &BatchOptions) -> Result<BatchResult>
where
    E: TransactionalExecutor + ?Sized,
{
    options.validate()?;

    let total_items = items.len();
    if total_items == 0 {
        return Ok(BatchResult::default());
    }

    let total_batches = total_items.div_ceil(options.batch_size);
    let mut succeeded = 0;

    for (idx, chunk) in items.chunks(options.batch_size).enumerate() {
        let current_batch = idx + 1;
        write_chunk_with_retry(executor, chunk, current_batch, total_batches, options).await?;

        succeeded += chunk.len();
        if let Some(on_progress) = &options.on_progress {
            on_progress(BatchProgress {
                current_batch,
                total_batches,
                items_processed: succeeded,
                total_items,
            });
        }
    }

    info!("✅ Committed {} items in {} batches", succeeded, total_batches);
    Ok(BatchResult {
        succeeded,
        total_batches,
    })
}

async fn write_chunk_with_retry<E>(
    executor: &E,
    chunk: &[BatchItem],
    current_batch: usize,
    total_batches: usize,
    options: &BatchOptions,
) -> Result<()>
where
    E: TransactionalExecutor + ?Sized,
{
    let max_attempts = options.max_retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        debug!(
            "Writing batch {}/{} ({} items, attempt {}/{})",
            current_batch,
            total_batches,
            chunk.len(),
            attempt,
            max_attempts
        );

        match write_chunk(executor, chunk).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_attempts => {
                let delay = backoff_delay(options.base_delay, attempt);
                warn!(
                    "⚠️  Batch {}/{} failed: {}. Retrying in {:?} (attempt {}/{})...",
                    current_batch, total_batches, e, delay, attempt, max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    "❌ Batch {}/{} failed after {} attempts: {}",
                    current_batch, total_batches, max_attempts, e
                );
                return Err(e);
            }
        }
    }
}

/// One transaction: issue every statement concurrently, then commit, or
/// roll back if any statement fails.
async fn write_chunk<E>(executor: &E, chunk: &[BatchItem]) -> Result<()>
where
    E: TransactionalExecutor + ?Sized,
{
    let txn = executor.begin().await?;

    let outcome = try_join_all(chunk.iter().map(|item| txn.run(&item.query, &item.params))).await;

    match outcome {
        Ok(_) => txn.commit().await,
        Err(e) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!("Failed to roll back batch transaction: {}", rollback_err);
            }
            Err(e)
        }
    }
}
