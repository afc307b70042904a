//! Core library modules for htsget-dl
//!
//! Request building, ticket parsing, transports, the retry controller and
//! the download manager that ties them together.

pub mod error;
pub mod request;
pub mod ticket;
pub mod sink;
pub mod observer;
pub mod stream;
pub mod retry;
pub mod transport;
pub mod downloader;

pub use downloader::{DownloadManager, TransferState};
pub use observer::{LogObserver, SilentObserver, TransferObserver};
pub use request::{build_ticket_url, TicketRequest};
pub use sink::{FileSink, MemorySink, OutputSink, StreamSink};
pub use ticket::{parse_ticket, Resource, Ticket, TicketUrl};
pub use transport::{ChunkTransport, HttpTransport, TicketTransport};
