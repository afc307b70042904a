//! Download manager
//!
//! Turns one ticket request into a complete transfer: build the ticket URL,
//! fetch the ticket under the retry controller, then fetch every resource in
//! ticket order into the sink. HTTP resources are retried; inline resources
//! run once. The first unretried or exhausted failure ends the transfer and
//! the sink is left holding whatever was written before it.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;

use crate::core::error::Result;
use crate::core::observer::{LogObserver, TransferObserver};
use crate::core::request::TicketRequest;
use crate::core::retry::{with_retry, Attempt, RetryPolicy};
use crate::core::sink::OutputSink;
use crate::core::stream::TransferOptions;
use crate::core::ticket::{Resource, Ticket};
use crate::core::transport::{write_inline, ChunkTransport, HttpTransport, TicketTransport};

/// Where a transfer currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Init,
    AwaitingTicket,
    /// Fetching the resource at this index
    Fetching(usize),
    Done,
    Failed,
}

/// Ticket request step
struct TicketStep<'a, T: ?Sized> {
    transport: &'a T,
    url: &'a str,
    headers: &'a BTreeMap<String, String>,
}

#[async_trait]
impl<T> Attempt for TicketStep<'_, T>
where
    T: TicketTransport + ?Sized,
{
    type Output = Ticket;

    async fn attempt(&self, _sink: &mut dyn OutputSink) -> Result<Ticket> {
        self.transport.fetch_ticket(self.url, self.headers).await
    }
}

/// HTTP chunk step
struct ChunkStep<'a, C: ?Sized> {
    transport: &'a C,
    url: &'a str,
    headers: &'a BTreeMap<String, String>,
    observer: &'a dyn TransferObserver,
}

#[async_trait]
impl<C> Attempt for ChunkStep<'_, C>
where
    C: ChunkTransport + ?Sized,
{
    type Output = u64;

    async fn attempt(&self, sink: &mut dyn OutputSink) -> Result<u64> {
        self.transport
            .fetch_chunk(self.url, self.headers, sink, self.observer)
            .await
    }
}

/// Orchestrates transfers with injected ticket and chunk transports
pub struct DownloadManager<T = HttpTransport, C = HttpTransport> {
    ticket_transport: T,
    chunk_transport: C,
    observer: Box<dyn TransferObserver>,
    options: TransferOptions,
}

impl DownloadManager<HttpTransport, HttpTransport> {
    /// Manager using one reqwest transport for tickets and chunks
    pub fn new(options: TransferOptions) -> Result<Self> {
        let transport = HttpTransport::new(options.timeout)?.piece_size(options.piece_size);
        Ok(Self::with_transports(transport.clone(), transport, options))
    }
}

impl<T, C> DownloadManager<T, C>
where
    T: TicketTransport,
    C: ChunkTransport,
{
    pub fn with_transports(ticket_transport: T, chunk_transport: C, options: TransferOptions) -> Self {
        Self {
            ticket_transport,
            chunk_transport,
            observer: Box::new(LogObserver),
            options,
        }
    }

    /// Replace the default logging observer
    pub fn with_observer(mut self, observer: impl TransferObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    fn enter(&self, state: &mut TransferState, next: TransferState) {
        *state = next;
        self.observer.state_changed(state);
    }

    /// Run one complete transfer into `sink`, returning the parsed ticket
    ///
    /// The sink is not closed; on success it is positioned at the end of
    /// the written data.
    pub async fn run(&self, request: &TicketRequest, sink: &mut dyn OutputSink) -> Result<Ticket> {
        let mut state = TransferState::Init;
        self.observer.state_changed(&state);

        match self.transfer(request, sink, &mut state).await {
            Ok(ticket) => {
                self.enter(&mut state, TransferState::Done);
                Ok(ticket)
            }
            Err(e) => {
                self.enter(&mut state, TransferState::Failed);
                Err(e)
            }
        }
    }

    async fn transfer(
        &self,
        request: &TicketRequest,
        sink: &mut dyn OutputSink,
        state: &mut TransferState,
    ) -> Result<Ticket> {
        let policy = RetryPolicy::from(&self.options);
        let observer = self.observer.as_ref();

        let ticket_url = request.ticket_url()?;
        let ticket_headers = self.options.ticket_headers();

        self.enter(state, TransferState::AwaitingTicket);
        observer.ticket_requested(&ticket_url);
        let ticket_step = TicketStep {
            transport: &self.ticket_transport,
            url: &ticket_url,
            headers: &ticket_headers,
        };
        let ticket = with_retry(&ticket_step, sink, &policy, observer).await?;
        observer.ticket_received(&ticket);

        for (index, entry) in ticket.urls.iter().enumerate() {
            self.enter(state, TransferState::Fetching(index));
            let resource = entry.resource()?;
            observer.resource_started(index, &resource);

            let started = Instant::now();
            let written = match &resource {
                Resource::Http { url, headers } => {
                    let step = ChunkStep {
                        transport: &self.chunk_transport,
                        url,
                        headers,
                        observer,
                    };
                    with_retry(&step, sink, &policy, observer).await?
                }
                Resource::Inline { uri } => write_inline(uri, sink, observer).await?,
            };
            observer.resource_finished(index, written, started.elapsed());
        }

        sink.flush().await?;
        Ok(ticket)
    }
}
