//! terminal progress bars

use alibi_core::{PoolKey, ProgressReporter, ScanEvent, ScanSummary};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;

const SCAN_TEMPLATE: &str =
    "{prefix:>12} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ranges {msg}";
const TREE_TEMPLATE: &str = "{prefix:>12} [{elapsed_precise}] {bar:40.green/white} {pos}/{len} leaves";

struct ScanBar {
    bar: ProgressBar,
    deposits: usize,
    resolved: usize,
}

impl ScanBar {
    fn refresh(&self) {
        self.bar
            .set_message(format!("{} deposits, {} resolved", self.deposits, self.resolved));
    }
}

/// one bar per running scan or tree build
pub struct BarReporter {
    bars: MultiProgress,
    scans: Mutex<HashMap<PoolKey, ScanBar>>,
    trees: Mutex<HashMap<String, ProgressBar>>,
}

impl BarReporter {
    pub fn new() -> Self {
        Self {
            bars: MultiProgress::new(),
            scans: Mutex::new(HashMap::new()),
            trees: Mutex::new(HashMap::new()),
        }
    }

    fn add(&self, len: u64, template: &str, prefix: String) -> ProgressBar {
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let bar = self.bars.add(ProgressBar::new(len));
        bar.set_style(style);
        bar.set_prefix(prefix);
        bar
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarReporter {
    fn on_scan_start(&self, pool: &PoolKey, ranges: usize) {
        let bar = self.add(ranges as u64, SCAN_TEMPLATE, pool.to_string());
        let scan = ScanBar {
            bar,
            deposits: 0,
            resolved: 0,
        };
        scan.refresh();
        self.scans.lock().insert(pool.clone(), scan);
    }

    fn on_progress(&self, pool: &PoolKey, event: ScanEvent) {
        let mut scans = self.scans.lock();
        let Some(scan) = scans.get_mut(pool) else {
            return;
        };
        match event {
            ScanEvent::RangeScanned { deposits, .. } => {
                scan.deposits += deposits;
                // retried ranges can push past the queued count
                if scan.bar.position() >= scan.bar.length().unwrap_or(0) {
                    scan.bar.inc_length(1);
                }
                scan.bar.inc(1);
            }
            ScanEvent::CommitmentResolved => scan.resolved += 1,
            ScanEvent::CommitmentSkipped => {}
        }
        scan.refresh();
    }

    fn on_scan_end(&self, pool: &PoolKey, summary: &ScanSummary) {
        if let Some(scan) = self.scans.lock().remove(pool) {
            scan.bar.finish_with_message(format!(
                "{} ({} deposits)",
                summary.message, summary.total_size
            ));
        }
    }

    fn on_tree_start(&self, label: &str, leaves: usize) {
        let bar = self.add(leaves as u64, TREE_TEMPLATE, label.to_string());
        self.trees.lock().insert(label.to_string(), bar);
    }

    fn on_tree_progress(&self, label: &str, inserted: usize) {
        if let Some(bar) = self.trees.lock().get(label) {
            bar.inc(inserted as u64);
        }
    }

    fn on_tree_end(&self, label: &str) {
        if let Some(bar) = self.trees.lock().remove(label) {
            bar.finish();
        }
    }
}
