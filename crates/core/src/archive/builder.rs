use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ArchiveEntrySpec, ArchiveError, ArchiveOptions, ArchiveSummary, SkippedEntry};
use crate::fetcher::ImageFetcher;
use crate::metrics;

/// Instructions from the fetch stage to the compressor.
enum EntryCommand {
    Start(String),
    Data(Bytes),
}

/// Builds zip archives from remote images.
pub struct ArchiveBuilder {
    fetcher: Arc<dyn ImageFetcher>,
    options: ArchiveOptions,
}

impl ArchiveBuilder {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self::with_options(fetcher, ArchiveOptions::default())
    }

    pub fn with_options(fetcher: Arc<dyn ImageFetcher>, options: ArchiveOptions) -> Self {
        Self { fetcher, options }
    }

    /// Start building an archive of `entries`, in order.
    ///
    /// Returns the compressed body, which must be polled for the pipeline to
    /// make progress, and a handle resolving to the entry summary once every
    /// entry has been attempted. Entries whose download fails are skipped.
    /// At most one entry, up to `buffer_limit` bytes, is held in memory.
    pub fn build(&self, entries: Vec<ArchiveEntrySpec>) -> (ArchiveBody, ArchiveProgress) {
        let capacity = self.options.channel_capacity.max(1);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (chunk_tx, chunk_rx) = mpsc::channel(capacity);

        let writer = ChannelWriter::new(chunk_tx, self.options.chunk_size.max(1));
        let compressor = tokio::task::spawn_blocking(move || compress(command_rx, writer));
        let producer = tokio::spawn(produce(
            Arc::clone(&self.fetcher),
            entries,
            command_tx,
            self.options.buffer_limit,
        ));

        (
            ArchiveBody {
                chunks: chunk_rx,
                compressor: Some(compressor),
            },
            ArchiveProgress { producer },
        )
    }
}

/// Download each entry and forward its bytes to the compressor.
///
/// An entry is held back until its download completes, so a failed download
/// leaves no trace in the archive. Entries larger than `buffer_limit` are
/// streamed once the limit is reached; if such an entry fails afterwards it
/// stays in the archive truncated.
async fn produce(
    fetcher: Arc<dyn ImageFetcher>,
    entries: Vec<ArchiveEntrySpec>,
    commands: mpsc::Sender<EntryCommand>,
    buffer_limit: usize,
) -> ArchiveSummary {
    let mut summary = ArchiveSummary {
        scheduled: entries.len(),
        ..ArchiveSummary::default()
    };

    'entries: for entry in entries {
        let mut body = match fetcher.open(&entry.source_url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(entry = %entry.name, url = %entry.source_url, error = %e, "Skipping archive entry");
                metrics::ARCHIVE_ENTRIES.with_label_values(&["skipped"]).inc();
                summary.skipped.push(SkippedEntry {
                    name: entry.name,
                    reason: e.to_string(),
                    truncated: false,
                });
                continue;
            }
        };

        let mut held = Vec::new();
        let mut held_len = 0usize;
        let mut started = false;
        let mut failure = None;

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            summary.input_bytes += bytes.len() as u64;

            if started {
                if commands.send(EntryCommand::Data(bytes)).await.is_err() {
                    summary.aborted = true;
                    break 'entries;
                }
                continue;
            }

            held_len += bytes.len();
            held.push(bytes);
            if held_len > buffer_limit {
                debug!(entry = %entry.name, limit = buffer_limit, "Entry exceeds buffer, streaming");
                started = true;
                if send_entry(&commands, &entry.name, std::mem::take(&mut held))
                    .await
                    .is_err()
                {
                    summary.aborted = true;
                    break 'entries;
                }
            }
        }

        match failure {
            None => {
                if !started && send_entry(&commands, &entry.name, held).await.is_err() {
                    summary.aborted = true;
                    break;
                }
                debug!(entry = %entry.name, "Archive entry written");
                metrics::ARCHIVE_ENTRIES.with_label_values(&["embedded"]).inc();
                summary.embedded += 1;
            }
            Some(e) if started => {
                warn!(entry = %entry.name, error = %e, "Archive entry download interrupted, entry is truncated");
                metrics::ARCHIVE_ENTRIES.with_label_values(&["truncated"]).inc();
                summary.skipped.push(SkippedEntry {
                    name: entry.name,
                    reason: e.to_string(),
                    truncated: true,
                });
            }
            Some(e) => {
                warn!(entry = %entry.name, error = %e, "Archive entry download interrupted, skipping");
                metrics::ARCHIVE_ENTRIES.with_label_values(&["skipped"]).inc();
                summary.skipped.push(SkippedEntry {
                    name: entry.name,
                    reason: e.to_string(),
                    truncated: false,
                });
            }
        }
    }

    if summary.aborted {
        warn!(
            attempted = summary.embedded + summary.skipped.len(),
            scheduled = summary.scheduled,
            "Archive consumer went away before all entries were written"
        );
    }
    summary
}

/// Start entry `name` in the archive and hand over its buffered bytes.
async fn send_entry(
    commands: &mpsc::Sender<EntryCommand>,
    name: &str,
    chunks: Vec<Bytes>,
) -> Result<(), mpsc::error::SendError<EntryCommand>> {
    commands.send(EntryCommand::Start(name.to_string())).await?;
    for bytes in chunks {
        commands.send(EntryCommand::Data(bytes)).await?;
    }
    Ok(())
}

/// Runs on a blocking thread: writes commands into a streaming zip.
fn compress(
    mut commands: mpsc::Receiver<EntryCommand>,
    writer: ChannelWriter,
) -> Result<u64, ArchiveError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let written = Arc::clone(&writer.written);
    let mut zip = ZipWriter::new_stream(writer);

    while let Some(command) = commands.blocking_recv() {
        match command {
            EntryCommand::Start(name) => zip.start_file(name, options)?,
            EntryCommand::Data(bytes) => zip.write_all(&bytes)?,
        }
    }

    let mut inner = zip.finish()?;
    inner.flush()?;
    Ok(written.load(Ordering::Relaxed))
}

/// `io::Write` adapter that batches bytes into chunks on a channel.
struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
    buffer: Vec<u8>,
    chunk_size: usize,
    written: Arc<AtomicU64>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<Bytes>, chunk_size: usize) -> Self {
        Self {
            tx,
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.chunk_size),
        ));
        self.tx
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.written.fetch_add(buf.len() as u64, Ordering::Relaxed);
        if self.buffer.len() >= self.chunk_size {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

/// Compressed archive bytes, in order. Ends with an error if compression failed.
pub struct ArchiveBody {
    chunks: mpsc::Receiver<Bytes>,
    compressor: Option<JoinHandle<Result<u64, ArchiveError>>>,
}

impl Stream for ArchiveBody {
    type Item = Result<Bytes, ArchiveError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.chunks.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => return Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {}
            Poll::Pending => return Poll::Pending,
        }

        let Some(handle) = this.compressor.as_mut() else {
            return Poll::Ready(None);
        };
        let result = match Pin::new(handle).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };
        this.compressor = None;

        match result {
            Ok(Ok(total)) => {
                metrics::ARCHIVE_BYTES.inc_by(total);
                Poll::Ready(None)
            }
            Ok(Err(e)) => Poll::Ready(Some(Err(e))),
            Err(e) => Poll::Ready(Some(Err(ArchiveError::Compressor(e.to_string())))),
        }
    }
}

/// Resolves to the entry summary once the fetch stage is done.
pub struct ArchiveProgress {
    producer: JoinHandle<ArchiveSummary>,
}

impl ArchiveProgress {
    pub async fn finish(self) -> Result<ArchiveSummary, ArchiveError> {
        self.producer
            .await
            .map_err(|e| ArchiveError::Compressor(format!("fetch stage failed: {}", e)))
    }
}
