use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};

/// Counts finished items of a parallel loop and logs every tenth of the work.
///
/// The counter only feeds the log; results never depend on it.
pub struct ProgressCounter {
    task: String,
    total: usize,
    done: AtomicUsize,
}

impl ProgressCounter {
    pub fn new(task: &str, total: usize) -> Self {
        debug!("  {} ({} items)...", task, total);
        Self {
            task: task.to_string(),
            total,
            done: AtomicUsize::new(0),
        }
    }

    pub fn inc(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let step = (self.total / 10).max(1);
        if done % step == 0 || done == self.total {
            info!(
                "  {}: {:.0}%",
                self.task,
                done as f64 / self.total.max(1) as f64 * 100.0
            );
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}
