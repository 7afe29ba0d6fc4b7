//! resumable block range scanner
//!
//! Brings the commitment store for one pool in line with the pool's deposit
//! history up to the sanction cutoff. Block ranges and commitment rows carry
//! their own status, so an interrupted scan picks up where it stopped:
//!
//! 1. partition `[created_at, sanctioned_at)` into fixed windows
//! 2. drain pending windows, lowest start block first
//! 3. wait for receipt lookups to settle, demoting orphans to failed
//! 4. retry failed windows, then failed receipts
//!
//! Per-range and per-receipt failures only ever become row status. The scan
//! itself fails on bad parameters, an unreachable chain, a store error or
//! cancellation.

use crate::chain::{ChainEventSource, PoolContract};
use crate::error::{IndexerError, Result, StoreError};
use crate::limiter::RateLimiter;
use crate::progress::{NoopReporter, ProgressReporter, ScanEvent};
use crate::store::{BlockRangeStore, CommitmentQuery, CommitmentStore, RangeQuery, DEFAULT_PAGE_SIZE};
use crate::types::{
    BlockRange, Commitment, CommitmentId, CommitmentKey, CommitmentPatch, CommitmentStatus,
    DepositEvent, NewBlockRange, NewCommitment, PoolKey, RangeStatus, ScanStatus, ScanSummary,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// last block worth scanning is `sanctioned_at_block - 1`; capped at the chain head
    pub sanctioned_at_block: u64,
    /// blocks per range
    pub range_span: u64,
    /// compute units charged for one ranged log query
    pub bulk_query_units: u32,
    /// compute units charged per event follow-up
    pub single_lookup_units: u32,
    /// receipt lookups in flight at once
    pub receipt_concurrency: usize,
    /// polls of the pending backlog before leftovers are treated as orphans
    pub converge_polls: u32,
    pub converge_backoff: Duration,
    pub max_converge_backoff: Duration,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    /// retry rounds in a row that may fail to shrink the failed set; `None` retries until done
    pub max_retry_rounds: Option<u32>,
    pub page_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            sanctioned_at_block: u64::MAX,
            range_span: 2000,
            bulk_query_units: 80,
            single_lookup_units: 20,
            receipt_concurrency: 16,
            converge_polls: 5,
            converge_backoff: Duration::from_millis(200),
            max_converge_backoff: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(60),
            max_retry_rounds: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ScannerConfig {
    fn validate(&self, limiter: &RateLimiter) -> Result<()> {
        if self.range_span == 0 {
            return Err(IndexerError::Config("range span must be positive".into()));
        }
        if self.receipt_concurrency == 0 {
            return Err(IndexerError::Config("receipt concurrency must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(IndexerError::Config("page size must be positive".into()));
        }
        for (name, units) in [("bulk query", self.bulk_query_units), ("single lookup", self.single_lookup_units)] {
            if units == 0 || units > limiter.capacity() {
                return Err(IndexerError::Config(format!(
                    "{} weight {} must be within 1..={}",
                    name,
                    units,
                    limiter.capacity()
                )));
            }
        }
        Ok(())
    }
}

/// doubling delay with a ceiling
struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    fn step(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next * 2).min(self.max);
        current
    }
}

/// per-scan state threaded through every step
struct ScanContext {
    key: PoolKey,
    contract: Arc<dyn PoolContract>,
    created_at: u64,
    sanctioned_at: u64,
    total_size: usize,
    permits: Arc<Semaphore>,
    cancel: watch::Receiver<bool>,
}

impl ScanContext {
    fn ensure_running(&self) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(IndexerError::Cancelled);
        }
        Ok(())
    }
}

/// resolves when the cancel flag goes up; never, if its sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// everything a detached receipt lookup needs
#[derive(Clone)]
struct ReceiptWorker {
    pool: PoolKey,
    contract: Arc<dyn PoolContract>,
    commitments: Arc<dyn CommitmentStore>,
    progress: Arc<dyn ProgressReporter>,
}

impl ReceiptWorker {
    async fn resolve(&self, id: CommitmentId, tx_hash: &str) {
        let recorded = match self.contract.transaction_receipt(tx_hash).await {
            Ok(receipt) if receipt.succeeded() => {
                let depositor = receipt.from.to_lowercase();
                let patched = self.commitments.patch(id, CommitmentPatch::resolved(depositor)).await;
                if patched.is_ok() {
                    self.progress.on_progress(&self.pool, ScanEvent::CommitmentResolved);
                }
                patched.map(|_| ())
            }
            Ok(_) => {
                debug!("{}: tx {} reverted, dropping commitment {}", self.pool, tx_hash, id);
                match self.commitments.remove(id).await {
                    Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                warn!("{}: receipt lookup for {} failed: {}", self.pool, tx_hash, e);
                self.commitments
                    .patch(id, CommitmentPatch::status(CommitmentStatus::Failed))
                    .await
                    .map(|_| ())
            }
        };

        // the row stays pending and the converge step demotes it
        if let Err(e) = recorded {
            warn!("{}: could not record receipt outcome for commitment {}: {}", self.pool, id, e);
        }
    }
}

pub struct BlockRangeScanner {
    chain: Arc<dyn ChainEventSource>,
    commitments: Arc<dyn CommitmentStore>,
    ranges: Arc<dyn BlockRangeStore>,
    limiter: Arc<RateLimiter>,
    progress: Arc<dyn ProgressReporter>,
    config: ScannerConfig,
}

impl BlockRangeScanner {
    pub fn new(
        chain: Arc<dyn ChainEventSource>,
        commitments: Arc<dyn CommitmentStore>,
        ranges: Arc<dyn BlockRangeStore>,
        limiter: Arc<RateLimiter>,
        config: ScannerConfig,
    ) -> Result<Self> {
        config.validate(&limiter)?;
        Ok(Self {
            chain,
            commitments,
            ranges,
            limiter,
            progress: Arc::new(NoopReporter),
            config,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// scan a pool to completion
    pub async fn scan(&self, pool_name: &str, chain_id: u64) -> Result<ScanSummary> {
        let (_keep_alive, cancel) = watch::channel(false);
        self.scan_until(pool_name, chain_id, cancel).await
    }

    /// scan a pool, giving up with `Cancelled` once `cancel` turns true
    ///
    /// A cancelled scan leaves its current range `in-progress`; the next scan
    /// resets it to `pending` and carries on.
    pub async fn scan_until(
        &self,
        pool_name: &str,
        chain_id: u64,
        cancel: watch::Receiver<bool>,
    ) -> Result<ScanSummary> {
        let key = PoolKey::checked(pool_name, chain_id)?;
        let pool = self.chain.find(&key).await.map_err(IndexerError::from_lookup)?;
        let head = pool
            .contract
            .block_number()
            .await
            .map_err(|e| IndexerError::ChainClientUnavailable(e.to_string()))?;

        let mut ctx = ScanContext {
            key,
            contract: pool.contract,
            created_at: pool.created_at_block,
            sanctioned_at: self.config.sanctioned_at_block.min(head),
            total_size: 0,
            permits: Arc::new(Semaphore::new(self.config.receipt_concurrency)),
            cancel,
        };
        ctx.ensure_running()?;

        info!(
            "scanning {} from block {} up to {} (head {})",
            ctx.key, ctx.created_at, ctx.sanctioned_at, head
        );

        self.partition(&ctx).await?;
        self.recover_interrupted(&ctx).await?;

        let queued = self
            .ranges
            .find(
                &RangeQuery::for_pool(&ctx.key)
                    .with_status(RangeStatus::Pending)
                    .with_status(RangeStatus::Failed),
            )
            .await?
            .total;
        self.progress.on_scan_start(&ctx.key, queued);

        self.drain(&mut ctx).await?;
        self.converge(&mut ctx).await?;
        self.retry_failed_ranges(&mut ctx).await?;
        self.retry_failed_commitments(&mut ctx).await?;

        let summary = ScanSummary::complete(ctx.total_size);
        self.progress.on_scan_end(&ctx.key, &summary);
        Ok(summary)
    }

    /// row counts per status for one pool
    pub async fn status(&self, pool_name: &str, chain_id: u64) -> Result<ScanStatus> {
        let key = PoolKey::checked(pool_name, chain_id)?;
        self.status_of(&key).await
    }

    async fn status_of(&self, key: &PoolKey) -> Result<ScanStatus> {
        let mut status = ScanStatus::default();

        let ranges = self.ranges.find(&RangeQuery::for_pool(key)).await?;
        for range in &ranges.data {
            match range.status {
                RangeStatus::Pending => status.pending_ranges += 1,
                RangeStatus::InProgress => status.in_progress_ranges += 1,
                RangeStatus::Completed => status.completed_ranges += 1,
                RangeStatus::Failed => status.failed_ranges += 1,
            }
        }

        let counters = [
            (CommitmentStatus::Pending, &mut status.pending_commitments),
            (CommitmentStatus::Completed, &mut status.completed_commitments),
            (CommitmentStatus::Failed, &mut status.failed_commitments),
        ];
        for (commitment_status, counter) in counters {
            let query = CommitmentQuery::for_pool(key).with_status(commitment_status);
            *counter = self.commitments.count(&query).await?;
        }

        Ok(status)
    }

    /// create the missing windows of `[created_at, sanctioned_at)`; returns the window count
    ///
    /// Stored ranges are kept as they are and new windows only fill the gaps
    /// between them, so a cutoff that moved since the last run never yields
    /// overlapping ranges.
    async fn partition(&self, ctx: &ScanContext) -> Result<usize> {
        let mut existing: Vec<(u64, u64)> = self
            .ranges
            .find(&RangeQuery::for_pool(&ctx.key))
            .await?
            .data
            .into_iter()
            .map(|range| (range.start_block, range.end_block))
            .collect();
        existing.sort_unstable();

        let mut stored = existing.iter().peekable();
        let mut windows = 0;
        let mut created = 0;
        let mut start = ctx.created_at;
        while start < ctx.sanctioned_at {
            // stored ranges wholly behind the cursor
            while stored.next_if(|&&(_, end)| end < start).is_some() {}

            if let Some(&&(stored_start, stored_end)) = stored.peek() {
                if stored_start <= start {
                    windows += 1;
                    start = stored_end.saturating_add(1);
                    stored.next();
                    continue;
                }
            }

            let mut end = start
                .saturating_add(self.config.range_span - 1)
                .min(ctx.sanctioned_at - 1);
            if let Some(&&(stored_start, _)) = stored.peek() {
                end = end.min(stored_start - 1);
            }
            windows += 1;

            match self.ranges.create(NewBlockRange::pending(&ctx.key, start, end)).await {
                Ok(_) => created += 1,
                Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
            start = end + 1;
        }

        if created > 0 {
            info!("{}: created {} of {} block ranges", ctx.key, created, windows);
        }
        Ok(windows)
    }

    /// ranges left in-progress by an interrupted run go back to pending
    async fn recover_interrupted(&self, ctx: &ScanContext) -> Result<()> {
        let stuck = self
            .ranges
            .find(&RangeQuery::for_pool(&ctx.key).with_status(RangeStatus::InProgress))
            .await?;
        if !stuck.data.is_empty() {
            info!("{}: resuming {} interrupted block ranges", ctx.key, stuck.data.len());
        }
        for range in stuck.data {
            self.ranges.patch_status(range.id, RangeStatus::Pending).await?;
        }
        Ok(())
    }

    async fn drain(&self, ctx: &mut ScanContext) -> Result<()> {
        let next_pending = RangeQuery::for_pool(&ctx.key)
            .with_status(RangeStatus::Pending)
            .limit(1);

        loop {
            ctx.ensure_running()?;
            let next = self.ranges.find(&next_pending).await?;
            let Some(range) = next.data.into_iter().next() else {
                return Ok(());
            };
            self.process_range(ctx, range).await?;
        }
    }

    async fn process_range(&self, ctx: &mut ScanContext, range: BlockRange) -> Result<()> {
        self.ranges.patch_status(range.id, RangeStatus::InProgress).await?;
        self.acquire(ctx, self.config.bulk_query_units).await?;

        let events = match ctx.contract.query_deposits(range.start_block, range.end_block).await {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    "{}: deposit query for blocks {}..={} failed: {}",
                    ctx.key, range.start_block, range.end_block, e
                );
                self.ranges.patch_status(range.id, RangeStatus::Failed).await?;
                return Ok(());
            }
        };

        debug!(
            "{}: blocks {}..={} returned {} deposits",
            ctx.key,
            range.start_block,
            range.end_block,
            events.len()
        );
        ctx.total_size += events.len();
        self.progress.on_progress(
            &ctx.key,
            ScanEvent::RangeScanned {
                start_block: range.start_block,
                end_block: range.end_block,
                deposits: events.len(),
            },
        );

        let worker = self.worker(ctx);
        let mut receipts = JoinSet::new();
        for event in events.into_iter().rev() {
            self.acquire(ctx, self.config.single_lookup_units).await?;
            if event.removed {
                debug!("{}: skipping removed log for leaf {}", ctx.key, event.leaf_index);
                self.progress.on_progress(&ctx.key, ScanEvent::CommitmentSkipped);
                continue;
            }

            let Some(id) = self.claim_row(&ctx.key, &event).await? else {
                self.progress.on_progress(&ctx.key, ScanEvent::CommitmentSkipped);
                continue;
            };

            let permit = self.permit(ctx).await?;
            let worker = worker.clone();
            receipts.spawn(async move {
                let _permit = permit;
                worker.resolve(id, &event.transaction_hash).await;
            });
        }

        join_receipts(&mut receipts, &ctx.key).await;
        self.ranges.patch_status(range.id, RangeStatus::Completed).await?;
        Ok(())
    }

    /// row to patch for `event`, or `None` when it already has its depositor
    async fn claim_row(&self, pool: &PoolKey, event: &DepositEvent) -> Result<Option<CommitmentId>> {
        let key = CommitmentKey {
            pool: pool.clone(),
            leaf_index: event.leaf_index,
            tx_hash: event.transaction_hash.clone(),
        };

        let found = self.commitments.find(&CommitmentQuery::by_key(&key)).await?;
        if let Some(row) = found.data.into_iter().next() {
            if row.depositor.is_some() {
                return Ok(None);
            }
            return Ok(Some(row.id));
        }

        match self.commitments.create(NewCommitment::pending(pool, event)).await {
            Ok(row) => Ok(Some(row.id)),
            Err(StoreError::Conflict(existing)) => {
                debug!("{}: leaf {} inserted concurrently, reusing row {}", pool, event.leaf_index, existing);
                Ok(Some(CommitmentId(existing)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// wait for the pending backlog to empty; rows that never settle become failed
    async fn converge(&self, ctx: &mut ScanContext) -> Result<()> {
        let pending = CommitmentQuery::for_pool(&ctx.key).with_status(CommitmentStatus::Pending);
        let mut backoff = Backoff::new(self.config.converge_backoff, self.config.max_converge_backoff);

        for poll in 0..=self.config.converge_polls {
            let remaining = self.commitments.count(&pending).await?;
            if remaining == 0 {
                return Ok(());
            }
            if poll < self.config.converge_polls {
                debug!("{}: waiting on {} pending commitments", ctx.key, remaining);
                self.pause(ctx, backoff.step()).await?;
            }
        }

        let orphans = self.collect_commitments(&pending).await?;
        warn!(
            "{}: {} commitments still pending with no lookup in flight, marking failed",
            ctx.key,
            orphans.len()
        );
        for row in orphans {
            self.commitments
                .patch(row.id, CommitmentPatch::status(CommitmentStatus::Failed))
                .await?;
        }
        Ok(())
    }

    async fn retry_failed_ranges(&self, ctx: &mut ScanContext) -> Result<()> {
        let failed = RangeQuery::for_pool(&ctx.key).with_status(RangeStatus::Failed);
        let mut backoff = Backoff::new(self.config.retry_backoff, self.config.max_retry_backoff);
        let mut stalled = 0;
        let mut previous = usize::MAX;

        loop {
            let ranges = self.ranges.find(&failed).await?;
            if ranges.data.is_empty() {
                return Ok(());
            }

            if ranges.data.len() >= previous {
                stalled += 1;
                self.give_up_if_exhausted(&ctx.key, stalled).await?;
                self.pause(ctx, backoff.step()).await?;
            }
            previous = ranges.data.len();

            info!("{}: retrying {} failed block ranges", ctx.key, ranges.data.len());
            for range in ranges.data {
                self.ranges.patch_status(range.id, RangeStatus::Pending).await?;
            }
            self.drain(ctx).await?;
            self.converge(ctx).await?;
        }
    }

    async fn retry_failed_commitments(&self, ctx: &mut ScanContext) -> Result<()> {
        let failed = CommitmentQuery::for_pool(&ctx.key).with_status(CommitmentStatus::Failed);
        let mut backoff = Backoff::new(self.config.retry_backoff, self.config.max_retry_backoff);
        let mut stalled = 0;
        let mut previous = usize::MAX;

        loop {
            let remaining = self.commitments.count(&failed).await?;
            if remaining == 0 {
                return Ok(());
            }

            if remaining >= previous {
                stalled += 1;
                self.give_up_if_exhausted(&ctx.key, stalled).await?;
                self.pause(ctx, backoff.step()).await?;
            }
            previous = remaining;

            info!("{}: retrying {} failed receipt lookups", ctx.key, remaining);
            let rows = self.collect_commitments(&failed).await?;
            let worker = self.worker(ctx);
            let mut receipts = JoinSet::new();
            for row in rows {
                self.acquire(ctx, self.config.single_lookup_units).await?;
                let permit = self.permit(ctx).await?;
                let worker = worker.clone();
                receipts.spawn(async move {
                    let _permit = permit;
                    worker.resolve(row.id, &row.tx_hash).await;
                });
            }
            join_receipts(&mut receipts, &ctx.key).await;
            self.converge(ctx).await?;
        }
    }

    async fn give_up_if_exhausted(&self, key: &PoolKey, stalled: u32) -> Result<()> {
        match self.config.max_retry_rounds {
            Some(max) if stalled > max => {
                let status = self.status_of(key).await?;
                warn!("{}: giving up after {} retry rounds without progress", key, max);
                Err(IndexerError::Incomplete {
                    failed_ranges: status.failed_ranges,
                    failed_commitments: status.failed_commitments,
                })
            }
            _ => Ok(()),
        }
    }

    /// every row matching `query`, paged
    async fn collect_commitments(&self, query: &CommitmentQuery) -> Result<Vec<Commitment>> {
        let mut rows = Vec::new();
        loop {
            let page = self
                .commitments
                .find(&query.clone().page(rows.len(), self.config.page_size))
                .await?;
            let fetched = page.data.len();
            rows.extend(page.data);
            if fetched == 0 || rows.len() >= page.total {
                return Ok(rows);
            }
        }
    }

    fn worker(&self, ctx: &ScanContext) -> ReceiptWorker {
        ReceiptWorker {
            pool: ctx.key.clone(),
            contract: ctx.contract.clone(),
            commitments: self.commitments.clone(),
            progress: self.progress.clone(),
        }
    }

    /// take compute units from the shared limiter, retrying a denied request
    async fn acquire(&self, ctx: &mut ScanContext, units: u32) -> Result<()> {
        loop {
            let granted = tokio::select! {
                granted = self.limiter.acquire(units) => granted?,
                _ = cancelled(&mut ctx.cancel) => return Err(IndexerError::Cancelled),
            };
            if granted {
                return Ok(());
            }
        }
    }

    async fn permit(&self, ctx: &mut ScanContext) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            permit = ctx.permits.clone().acquire_owned() => {
                permit.map_err(|e| IndexerError::Task(e.to_string()))
            }
            _ = cancelled(&mut ctx.cancel) => Err(IndexerError::Cancelled),
        }
    }

    async fn pause(&self, ctx: &mut ScanContext, delay: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancelled(&mut ctx.cancel) => Err(IndexerError::Cancelled),
        }
    }
}

async fn join_receipts(receipts: &mut JoinSet<()>, pool: &PoolKey) {
    while let Some(joined) = receipts.join_next().await {
        if let Err(e) = joined {
            warn!("{}: receipt task ended abnormally: {}", pool, e);
        }
    }
}
