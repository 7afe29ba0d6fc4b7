//! progress callbacks for long running scans and tree builds

use crate::types::{PoolKey, ScanSummary};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// a block window was queried and its deposits handed to receipt workers
    RangeScanned { start_block: u64, end_block: u64, deposits: usize },
    /// a deposit row got its depositor
    CommitmentResolved,
    /// a deposit was already indexed or its log was dropped by a reorg
    CommitmentSkipped,
}

pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, pool: &PoolKey, ranges: usize);
    fn on_progress(&self, pool: &PoolKey, event: ScanEvent);
    fn on_scan_end(&self, pool: &PoolKey, summary: &ScanSummary);

    fn on_tree_start(&self, label: &str, leaves: usize);
    fn on_tree_progress(&self, label: &str, inserted: usize);
    fn on_tree_end(&self, label: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_scan_start(&self, _: &PoolKey, _: usize) {}
    fn on_progress(&self, _: &PoolKey, _: ScanEvent) {}
    fn on_scan_end(&self, _: &PoolKey, _: &ScanSummary) {}
    fn on_tree_start(&self, _: &str, _: usize) {}
    fn on_tree_progress(&self, _: &str, _: usize) {}
    fn on_tree_end(&self, _: &str) {}
}

/// logs progress through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_scan_start(&self, pool: &PoolKey, ranges: usize) {
        info!("scanning {} across {} block ranges", pool, ranges);
    }

    fn on_progress(&self, pool: &PoolKey, event: ScanEvent) {
        match event {
            ScanEvent::RangeScanned { start_block, end_block, deposits } => {
                debug!("{}: blocks {}..={} held {} deposits", pool, start_block, end_block, deposits);
            }
            ScanEvent::CommitmentResolved | ScanEvent::CommitmentSkipped => {}
        }
    }

    fn on_scan_end(&self, pool: &PoolKey, summary: &ScanSummary) {
        info!("{}: {} ({} deposits)", pool, summary.message, summary.total_size);
    }

    fn on_tree_start(&self, label: &str, leaves: usize) {
        info!("building {} from {} leaves", label, leaves);
    }

    fn on_tree_progress(&self, label: &str, inserted: usize) {
        debug!("{}: {} leaves inserted", label, inserted);
    }

    fn on_tree_end(&self, label: &str) {
        info!("{} ready", label);
    }
}
