//! Transfer observers
//!
//! The download manager reports progress through a [`TransferObserver`]
//! instead of a process-wide logger. [`LogObserver`] forwards events to the
//! `log` facade; tests and UIs provide their own.

use std::io;
use std::time::Duration;

use log::{debug, info, warn};

use crate::core::downloader::TransferState;
use crate::core::error::Error;
use crate::core::ticket::{Resource, Ticket};

/// Receives transfer events; every method defaults to doing nothing
pub trait TransferObserver: Send + Sync {
    fn state_changed(&self, _state: &TransferState) {}

    fn ticket_requested(&self, _url: &str) {}

    fn ticket_received(&self, _ticket: &Ticket) {}

    /// Retries disabled because the sink cannot report its position
    fn retries_disabled(&self, _reason: &io::Error) {}

    /// About to sleep `wait` before retry number `attempt`
    fn retrying(&self, _error: &Error, _attempt: u32, _wait: Duration) {}

    fn resource_started(&self, _index: usize, _resource: &Resource) {}

    fn bytes_written(&self, _bytes: u64) {}

    fn resource_finished(&self, _index: usize, _bytes: u64, _elapsed: Duration) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl TransferObserver for SilentObserver {}

/// Observer that writes events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl TransferObserver for LogObserver {
    fn state_changed(&self, state: &TransferState) {
        debug!("transfer state -> {state:?}");
    }

    fn ticket_requested(&self, url: &str) {
        debug!("handle_ticket_request(url={url})");
    }

    fn ticket_received(&self, ticket: &Ticket) {
        info!(
            "ticket: format={} md5={} resources={}",
            ticket.format,
            ticket.md5.as_deref().unwrap_or("-"),
            ticket.urls.len()
        );
    }

    fn retries_disabled(&self, reason: &io::Error) {
        debug!("output position unavailable ({reason}); retries disabled");
    }

    fn retrying(&self, error: &Error, attempt: u32, wait: Duration) {
        warn!(
            "Error: '{error}' occurred; sleeping {}s before retrying (attempt={attempt})",
            wait.as_secs_f64()
        );
    }

    fn resource_started(&self, index: usize, resource: &Resource) {
        match resource {
            Resource::Http { url, headers } => {
                debug!("resource {index}: GET {url} headers={headers:?}");
            }
            Resource::Inline { .. } => {
                debug!("resource {index}: inline {}", resource.describe());
            }
        }
    }

    fn resource_finished(&self, index: usize, bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            info!(
                "resource {index}: {bytes} bytes in {secs:.2}s ({:.2} MiB/s)",
                bytes as f64 / secs / (1024.0 * 1024.0)
            );
        } else {
            info!("resource {index}: {bytes} bytes");
        }
    }
}
