/*!
 * CLI progress renderer for interactive terminal display
 *
 * Subscribes to download progress events and renders one indicatif bar per
 * object being downloaded, with transfer rate and ETA. The renderer runs on its
 * own thread and ends once every publisher has been dropped.
 */

use crate::cli_style::{format_bytes, format_duration, Icons};
use crate::core::progress::{ProgressEvent, ProgressSubscriber};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::thread;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// CLI progress renderer
pub struct CliProgressRenderer {
    subscriber: ProgressSubscriber,
    multi: MultiProgress,
    bars: HashMap<String, ActiveBar>,
    verbose: bool,
}

struct ActiveBar {
    bar: ProgressBar,
    label: String,
}

impl CliProgressRenderer {
    pub fn new(subscriber: ProgressSubscriber, verbose: bool) -> Self {
        Self {
            subscriber,
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            verbose,
        }
    }

    /// Render nowhere; events are still consumed
    pub fn hidden(subscriber: ProgressSubscriber) -> Self {
        Self {
            subscriber,
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            bars: HashMap::new(),
            verbose: false,
        }
    }

    /// Run the progress renderer in the current thread
    pub fn run(mut self) {
        while let Some(event) = self.subscriber.recv() {
            self.handle_event(event);
        }
        // Publishers gone: anything still open ended without a final event
        for (_, active) in self.bars.drain() {
            active.bar.abandon();
        }
    }

    /// Spawn the renderer in a background thread
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn handle_event(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::TaskStarted {
                task_id,
                label,
                total_bytes,
                ..
            } => {
                let bar = self.multi.add(ProgressBar::new(total_bytes));
                if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
                    bar.set_style(style.progress_chars("#>-"));
                }
                let message = if self.verbose {
                    format!("{} ({}, {})", label, task_id, format_bytes(total_bytes))
                } else {
                    label.clone()
                };
                bar.set_message(message);
                self.bars.insert(task_id, ActiveBar { bar, label });
            }

            ProgressEvent::Progress {
                task_id,
                bytes_done,
                speed_bps,
                ..
            } => {
                if let Some(active) = self.bars.get(&task_id) {
                    active.bar.set_position(bytes_done);
                    active.bar.set_message(format!(
                        "{} ({}/s)",
                        active.label,
                        format_bytes(speed_bps as u64)
                    ));
                }
            }

            ProgressEvent::TaskFinished {
                task_id,
                bytes_done,
                duration_ms,
                success,
                ..
            } => {
                if let Some(active) = self.bars.remove(&task_id) {
                    let elapsed = format_duration(duration_ms as f64 / 1000.0);
                    if success {
                        active.bar.set_position(bytes_done);
                        active.bar.finish_with_message(format!(
                            "{} {} - {} in {}",
                            Icons::SUCCESS,
                            active.label,
                            format_bytes(bytes_done),
                            elapsed
                        ));
                    } else {
                        active.bar.abandon_with_message(format!(
                            "{} {} - stopped after {}",
                            Icons::ERROR,
                            active.label,
                            format_bytes(bytes_done)
                        ));
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.bars.len()
    }
}
