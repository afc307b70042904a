//! CLI-specific progress handling for htsget-dl
//!
//! Shows a byte counter on stderr while a transfer writes to a file. The
//! total size is unknown up front so the bar is a spinner.

use std::io;
use std::time::Duration;

use htsget_dl::{Error, LogObserver, Resource, Ticket, TransferObserver, TransferState};
use indicatif::{ProgressBar, ProgressStyle};

/// Creates a byte spinner for CLI display
pub fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Observer that drives a progress bar and forwards events to the log
///
/// Log lines are printed with the bar suspended so they do not tear it.
pub struct ProgressObserver {
    pub pb: ProgressBar,
    log: LogObserver,
}

impl ProgressObserver {
    pub fn new(message: &str) -> Self {
        Self::with_bar(create_progress_bar(), message)
    }

    pub fn with_bar(pb: ProgressBar, message: &str) -> Self {
        pb.set_message(message.to_string());
        Self { pb, log: LogObserver }
    }
}

impl TransferObserver for ProgressObserver {
    fn state_changed(&self, state: &TransferState) {
        self.pb.suspend(|| self.log.state_changed(state));
        match state {
            TransferState::Done => self.pb.finish_with_message("done"),
            TransferState::Failed => self.pb.abandon_with_message("failed"),
            _ => {}
        }
    }

    fn ticket_requested(&self, url: &str) {
        self.pb.suspend(|| self.log.ticket_requested(url));
    }

    fn ticket_received(&self, ticket: &Ticket) {
        self.pb.suspend(|| self.log.ticket_received(ticket));
    }

    fn retries_disabled(&self, reason: &io::Error) {
        self.pb.suspend(|| self.log.retries_disabled(reason));
    }

    fn retrying(&self, error: &Error, attempt: u32, wait: Duration) {
        self.pb.suspend(|| self.log.retrying(error, attempt, wait));
    }

    fn resource_started(&self, index: usize, resource: &Resource) {
        self.pb.suspend(|| self.log.resource_started(index, resource));
        self.pb.set_message(format!("resource {}", index + 1));
    }

    fn bytes_written(&self, bytes: u64) {
        self.pb.inc(bytes);
    }

    fn resource_finished(&self, index: usize, bytes: u64, elapsed: Duration) {
        self.pb.suspend(|| self.log.resource_finished(index, bytes, elapsed));
    }
}
