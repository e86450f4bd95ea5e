//! Console progress for lookup runs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Creates the per-run progress bar, drawn on stderr unless `visible` is false.
pub fn create_progress_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
    let style = ProgressStyle::default_bar()
        .template("Progress: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
