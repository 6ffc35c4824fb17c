use indicatif::{ProgressBar, ProgressStyle};
use orthochip_pipeline::BatchProgress;

/// Create a progress bar for determinate progress
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg}\n[{bar:40.cyan/blue}] {pos}/{len} ({percent}%) ETA: {eta}")
    {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Progress bar for a tile batch; hidden when output is machine readable
pub fn batch_progress_bar(total: usize, hidden: bool) -> ProgressBar {
    if hidden {
        ProgressBar::hidden()
    } else {
        create_progress_bar(total as u64, "Extracting tiles")
    }
}

/// Mirror an orchestrator progress snapshot onto the bar
pub fn update_batch(pb: &ProgressBar, progress: BatchProgress) {
    pb.set_length(progress.total as u64);
    pb.set_position(progress.done() as u64);
    pb.set_message(format!(
        "Extracting tiles ({} skipped, {} failed)",
        progress.skipped, progress.failed
    ));
}

/// Finish a progress bar with success message
pub fn finish_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✓ {}", message));
}

/// Finish a progress bar with error message
pub fn finish_error(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✗ {}", message));
}
