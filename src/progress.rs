//! Live terminal progress for a running batch
//!
//! Renders the scheduler's progress channel as one bar per running task plus
//! an overall bar. Bars only mirror events; the task registry stays the
//! record of what happened.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc;

use crate::sftp::path_utils::remote_basename;
use crate::sftp::TransferProgress;

const FILE_TEMPLATE: &str =
    "{spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}";
const OVERALL_TEMPLATE: &str =
    "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%) ETA {eta} {msg}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

pub struct ProgressDisplay {
    multi: MultiProgress,
    overall: ProgressBar,
    bars: HashMap<String, ProgressBar>,
    files_done: usize,
    files_total: usize,
}

impl ProgressDisplay {
    /// Bars drawn to stderr (hidden when stderr is not a terminal)
    pub fn new(files_total: usize, batch_total: u64) -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), files_total, batch_total)
    }

    pub fn with_target(target: ProgressDrawTarget, files_total: usize, batch_total: u64) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let overall = multi.add(ProgressBar::new(batch_total));
        overall.set_style(style(OVERALL_TEMPLATE));
        overall.set_message(format!("0/{} files", files_total));

        Self {
            multi,
            overall,
            bars: HashMap::new(),
            files_done: 0,
            files_total,
        }
    }

    pub fn update(&mut self, event: &TransferProgress) {
        let bar = self.bars.entry(event.id.clone()).or_insert_with(|| {
            // Task bars stack above the overall bar
            let bar = self
                .multi
                .insert_before(&self.overall, ProgressBar::new(event.total_bytes));
            bar.set_style(style(FILE_TEMPLATE));
            bar.set_message(format!(
                "{}: {}",
                event.host_name,
                remote_basename(&event.remote_path)
            ));
            bar
        });
        bar.set_position(event.transferred_bytes);

        if event.transferred_bytes >= event.total_bytes {
            if let Some(bar) = self.bars.remove(&event.id) {
                bar.finish_and_clear();
                self.multi.remove(&bar);
            }
            self.files_done += 1;
        }

        self.overall.set_length(event.batch_total);
        self.overall.set_position(event.batch_transferred);
        self.overall
            .set_message(format!("{}/{} files", self.files_done, self.files_total));
    }

    /// Clear bars of tasks that never reached their size and stop the overall bar
    pub fn finish(mut self) {
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
        self.overall
            .finish_with_message(format!("{}/{} files", self.files_done, self.files_total));
    }

    /// Drain `events` until every sender is gone, then finish.
    pub async fn run(mut self, mut events: mpsc::Receiver<TransferProgress>) {
        while let Some(event) = events.recv().await {
            self.update(&event);
        }
        self.finish();
    }
}
