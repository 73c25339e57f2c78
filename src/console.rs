use futures::future::BoxFuture;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, Write};

use crate::events::{OverwritePrompt, UploadEvents};
use crate::item::{DisplayState, UploadItem};

/// Renders the file list on the terminal, one progress bar per item.
pub struct ConsoleReporter {
    mount_point: Option<String>,
    mp: MultiProgress,
    style: ProgressStyle,
    bars: Mutex<HashMap<usize, ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new(mount_point: Option<String>) -> Self {
        Self::with_draw_target(mount_point, ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(mount_point: Option<String>, target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        Self {
            mount_point,
            mp: MultiProgress::with_draw_target(target),
            style,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn prefix(&self) -> String {
        match &self.mount_point {
            Some(mount) => format!("[{}] ", mount),
            None => String::new(),
        }
    }

    /// Prints above the bars; without a terminal the bars are hidden, so
    /// the line goes straight to stdout.
    fn println(&self, msg: &str) {
        if self.mp.is_hidden() {
            println!("{}", msg);
            return;
        }
        self.mp.println(msg).unwrap_or_else(|_| {
            println!("{}", msg);
        });
    }

    fn bar(&self, item: &UploadItem) -> ProgressBar {
        self.bars
            .lock()
            .entry(item.index)
            .or_insert_with(|| {
                let bar = self.mp.add(ProgressBar::new(100));
                bar.set_style(self.style.clone());
                bar.set_prefix(format!("#{:<3} {:<30}", item.index, item.file.name));
                bar
            })
            .clone()
    }
}

/// Text shown next to an item's bar.
pub fn status_message(item: &UploadItem) -> String {
    let mut message = match item.display_state() {
        DisplayState::Waiting => "waiting".to_string(),
        DisplayState::Uploading(_) => "uploading".to_string(),
        DisplayState::Saving => "saving".to_string(),
        DisplayState::Complete => "complete".to_string(),
        DisplayState::Failed => "failed".to_string(),
        DisplayState::Canceled => "canceled".to_string(),
    };

    if let Some(detail) = &item.message {
        message.push_str(&format!(" - {}", detail));
    }
    if item.display_state() == DisplayState::Failed {
        if let Some(summary) = item.response_summary() {
            message.push_str(&format!("\n      server said: {}", summary));
        }
    }
    message
}

impl UploadEvents for ConsoleReporter {
    fn upload_started(&self) {
        self.println(&format!("{}Uploading files...", self.prefix()));
    }

    fn upload_completed(&self, any_failed: bool, any_succeeded: bool) {
        let summary = match (any_failed, any_succeeded) {
            (true, _) => "Upload finished. Warning: one or more files failed to upload.",
            (false, true) => "Upload finished.",
            (false, false) => "Upload finished. Nothing was uploaded.",
        };
        self.println(&format!("{}{}", self.prefix(), summary));
    }

    fn done(&self, any_succeeded: bool) {
        if any_succeeded {
            self.println(&format!("{}Files are ready for processing.", self.prefix()));
        }
    }

    fn item_changed(&self, item: &UploadItem) {
        let bar = self.bar(item);
        match item.display_state() {
            DisplayState::Waiting => bar.set_message(status_message(item)),
            DisplayState::Uploading(percent) => {
                bar.set_position(u64::from(percent));
                bar.set_message(status_message(item));
            }
            DisplayState::Saving => {
                bar.set_position(100);
                bar.set_message(status_message(item));
            }
            DisplayState::Complete | DisplayState::Failed | DisplayState::Canceled => {
                self.bars.lock().remove(&item.index);
                let message = status_message(item);
                if self.mp.is_hidden() {
                    self.println(&format!(
                        "{}#{} {} {}",
                        self.prefix(),
                        item.index,
                        item.file.name,
                        message
                    ));
                }
                bar.finish_with_message(message);
            }
        }
    }
}

/// Asks on the terminal whether existing files may be replaced.
pub struct StdinPrompt;

pub fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

impl OverwritePrompt for StdinPrompt {
    fn confirm_overwrite(&self, file_name: &str) -> BoxFuture<'static, bool> {
        let file_name = file_name.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                print!(
                    "'{}' already exists on the server. Overwrite it and any other existing files in this batch? [y/N] ",
                    file_name
                );
                let _ = std::io::stdout().flush();
                let mut answer = String::new();
                match std::io::stdin().lock().read_line(&mut answer) {
                    Ok(_) => parse_answer(&answer),
                    Err(_) => false,
                }
            })
            .await
            .unwrap_or(false)
        })
    }
}
