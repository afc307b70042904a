//! # htsget CLI
//!
//! Command-line interface for the htsget-dl library. Downloads the data
//! slice described by an htsget ticket to a file or to stdout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use htsget_dl::{
    DownloadManager, Error, FileSink, OutputSink, StreamSink, Ticket, TicketRequest,
    TransferOptions,
};
use log::{warn, LevelFilter};

mod cli;

/// Command-line interface for htsget-dl
#[derive(Parser, Debug)]
#[command(name = "htsget")]
#[command(about = "Download genomic data slices using the htsget protocol")]
#[command(long_about = "Requests an htsget ticket for URL and writes the concatenated data to the output:
  htsget https://server/reads/NA12878 -r 1 -s 0 -e 10000 -O out.bam
  htsget https://server/variants/sample -f VCF > out.vcf.gz

Writing to stdout disables retries since partial output cannot be rolled back.")]
#[command(version = env!("HTSGET_VERSION"))]
struct Cli {
    /// URL of the htsget ticket endpoint
    url: String,

    /// Data format to request (e.g. BAM, CRAM, VCF)
    #[arg(short, long)]
    format: Option<String>,

    /// Reference sequence name
    #[arg(short, long)]
    reference_name: Option<String>,

    /// MD5 checksum of the reference sequence
    #[arg(short = 'm', long)]
    reference_md5: Option<String>,

    /// Start position (0-based, inclusive)
    #[arg(short, long)]
    start: Option<u64>,

    /// End position (0-based, exclusive)
    #[arg(short, long)]
    end: Option<u64>,

    /// Output file path; stdout when omitted
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,

    /// Maximum retries of each failed request
    #[arg(short = 'M', long, default_value_t = htsget_dl::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Seconds to wait between retries
    #[arg(short = 'W', long, default_value_t = 5.0)]
    retry_wait: f64,

    /// Socket timeout in seconds
    #[arg(short = 'T', long, default_value_t = 120.0)]
    timeout: f64,

    /// OAuth2 bearer token sent with the ticket request
    #[arg(short, long)]
    bearer_token: Option<String>,

    /// Extra ticket request headers as a JSON object of strings
    #[arg(short = 'H', long)]
    headers: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn request(&self) -> TicketRequest {
        let mut request = TicketRequest::new(&self.url).with_range(self.start, self.end);
        if let Some(name) = &self.reference_name {
            request = request.with_reference_name(name);
        }
        if let Some(md5) = &self.reference_md5 {
            request = request.with_reference_md5(md5);
        }
        if let Some(format) = &self.format {
            request = request.with_format(format);
        }
        request
    }

    fn options(&self) -> Result<TransferOptions> {
        let headers = self
            .headers
            .as_deref()
            .map(parse_headers)
            .transpose()
            .context("Cannot parse the argument value for headers")?;

        Ok(TransferOptions {
            max_retries: self.max_retries,
            retry_wait: seconds(self.retry_wait, "retry-wait")?,
            timeout: seconds(self.timeout, "timeout")?,
            bearer_token: self.bearer_token.clone(),
            headers,
            ..Default::default()
        })
    }
}

/// Parse the `--headers` value into a header map
fn parse_headers(raw: &str) -> Result<BTreeMap<String, String>> {
    let headers = serde_json::from_str(raw)?;
    Ok(headers)
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid value for {name}: {value}"))
}

fn level_for(verbose: u8) -> Option<LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(LevelFilter::Info),
        _ => Some(LevelFilter::Debug),
    }
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.target(env_logger::Target::Stderr);
    if let Some(level) = level_for(verbose) {
        builder.filter_level(level);
    }
    builder.init();
}

/// Let a closed downstream pipe end the process quietly
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
fn reset_sigpipe() {}

#[tokio::main]
async fn main() {
    reset_sigpipe();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("htsget: error: {}", error_message(&e));
        std::process::exit(1);
    }
}

/// One-line message for a terminal error
///
/// Transfer errors already name their cause; argument errors carry it in the
/// context chain.
fn error_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Error>() {
        Some(e) => e.to_string(),
        None => format!("{err:#}"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Argument errors surface before any network activity
    let request = cli.request();
    let mut options = cli.options()?;

    tokio::select! {
        result = transfer(&request, &mut options, cli.output.as_deref()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            return Err(Error::Interrupted.into());
        }
    }
    Ok(())
}

async fn transfer(
    request: &TicketRequest,
    options: &mut TransferOptions,
    output: Option<&Path>,
) -> Result<Ticket> {
    match output {
        Some(path) => download_to_file(request, options.clone(), path).await,
        None => {
            if options.max_retries > 0 {
                warn!("stdout is not seekable; setting max_retries to 0");
                options.max_retries = 0;
            }
            download_to_stdout(request, options.clone()).await
        }
    }
}

/// Download to a file with a progress spinner
async fn download_to_file(request: &TicketRequest, options: TransferOptions, path: &Path) -> Result<Ticket> {
    let mut sink = FileSink::create(path)
        .await
        .with_context(|| format!("Cannot create output file {}", path.display()))?;

    let observer = cli::ProgressObserver::new(&format!("{}", path.display()));
    let ticket = DownloadManager::new(options)?
        .with_observer(observer)
        .run(request, &mut sink)
        .await?;
    Ok(ticket)
}

/// Download to stdout (no progress spinner)
async fn download_to_stdout(request: &TicketRequest, options: TransferOptions) -> Result<Ticket> {
    let mut sink = StreamSink::new(tokio::io::stdout());
    let ticket = DownloadManager::new(options)?.run(request, &mut sink).await?;
    sink.flush().await?;
    Ok(ticket)
}
