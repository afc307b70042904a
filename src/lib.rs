//! # htsget-dl
//!
//! Client for the GA4GH htsget protocol. A transfer asks a ticket server
//! which resources make up the requested slice of a genomic data file, then
//! fetches those resources in order and concatenates them into one output.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use htsget_dl::{FileSink, TicketRequest, TransferOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = TicketRequest::new("https://htsget.example.org/reads/NA12878")
//!         .with_reference_name("1")
//!         .with_range(Some(10_000), Some(20_000));
//!
//!     let mut output = FileSink::create("NA12878.bam").await?;
//!     let ticket = htsget_dl::get(&request, &mut output, TransferOptions::default()).await?;
//!     println!("downloaded {} resources", ticket.urls.len());
//!     Ok(())
//! }
//! ```
//!
//! Retries need an output that can report and restore its position. Writing
//! to a [`StreamSink`] such as stdout disables them.

mod core;

pub use crate::core::error::{Error, Result};
pub use crate::core::{
    build_ticket_url, parse_ticket, ChunkTransport, DownloadManager, FileSink, HttpTransport,
    LogObserver, MemorySink, OutputSink, Resource, SilentObserver, StreamSink, Ticket,
    TicketRequest, TicketTransport, TicketUrl, TransferObserver, TransferState,
};
pub use crate::core::retry::{with_retry, Attempt, RetryPolicy};
pub use crate::core::stream::{
    Backoff, TransferOptions, DEFAULT_MAX_RETRIES, DEFAULT_PIECE_SIZE, DEFAULT_RETRY_WAIT,
    DEFAULT_TIMEOUT,
};
pub use crate::core::ticket::DataClass;
pub use crate::core::transport::decode_data_uri;

/// Download the data described by `request` into `output`
///
/// Fetches the ticket, then every resource it lists, in order. Progress is
/// reported through the `log` facade. Returns the parsed ticket.
pub async fn get<S>(request: &TicketRequest, output: &mut S, options: TransferOptions) -> Result<Ticket>
where
    S: OutputSink,
{
    DownloadManager::new(options)?.run(request, output).await
}

/// Like [`get`], reporting progress to `observer` instead of the log
pub async fn get_with_observer<S, O>(
    request: &TicketRequest,
    output: &mut S,
    options: TransferOptions,
    observer: O,
) -> Result<Ticket>
where
    S: OutputSink,
    O: TransferObserver + 'static,
{
    DownloadManager::new(options)?
        .with_observer(observer)
        .run(request, output)
        .await
}
