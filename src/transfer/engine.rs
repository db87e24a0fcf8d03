//! Single-transfer execution
//!
//! Downloads one remote resource to a local path in fixed 512 KiB chunks,
//! reporting through a [`SingleTransferEvents`] observer. The engine performs
//! no retries of its own; it classifies each failure exactly once and hands
//! it to the caller. Retry policy lives in the transfer manager.

use std::path::Path;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::events::SingleTransferEvents;
use crate::types::DownloadRequest;

/// Minimum interval between speed events
const SPEED_TICK: Duration = Duration::from_secs(1);

/// Downloads a single remote resource, streaming it to disk.
///
/// Cheap to clone; the underlying HTTP client pools connections.
#[derive(Clone)]
pub struct TransferEngine {
    client: reqwest::Client,
}

impl TransferEngine {
    /// Engine with the given per-attempt timeout budget. The budget bounds
    /// connect time and each read separately, so a hung connection cannot
    /// block indefinitely while a slow large download still completes.
    pub fn new(attempt_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(attempt_timeout)
            .read_timeout(attempt_timeout)
            .build()
            .map_err(|e| Error::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Transfer `request` to `dest`, emitting events along the way.
    ///
    /// Returns the number of bytes written. On any failure the partial
    /// destination file is removed, a single classified `error` event is
    /// emitted, and the error is returned for the caller to act on.
    pub async fn transfer(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        events: &dyn SingleTransferEvents,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        events.start();
        tracing::info!(url = %request.url, dest = %dest.display(), "starting transfer");

        match self.run(request, dest, events, cancel).await {
            Ok(bytes) => {
                events.progress(100);
                events.speed(0);
                events.finished();
                tracing::info!(url = %request.url, bytes, "transfer complete");
                Ok(bytes)
            }
            Err(err) => {
                remove_partial(dest).await;
                events.error(&err);
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        events: &dyn SingleTransferEvents,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(request.url.clone()));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io(e, parent))?;
        }

        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(e, &request.url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, &request.url));
        }

        // Prefer the declared size; fall back to response metadata. Percent
        // events are withheld while neither is available.
        let total = request.size.or(response.content_length());

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::from_io(e, dest))?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(CHUNK_SIZE);
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_tick_bytes: u64 = 0;

        loop {
            // Cancellation is checked at every chunk boundary and also
            // interrupts a pending network read.
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(url = %request.url, "transfer cancelled");
                    return Err(Error::Cancelled(request.url.clone()));
                }
                chunk = stream.next() => chunk,
            };

            let Some(bytes) = chunk else { break };
            let bytes = bytes.map_err(|e| Error::from_reqwest(e, &request.url))?;
            buffer.extend_from_slice(&bytes);

            while buffer.len() >= CHUNK_SIZE {
                let block: Vec<u8> = buffer.drain(..CHUNK_SIZE).collect();
                downloaded = write_block(&mut file, &block, dest, downloaded).await?;
                report_progress(events, downloaded, total);
                report_speed(events, downloaded, &mut last_tick, &mut last_tick_bytes);
            }
        }

        if !buffer.is_empty() {
            let block = std::mem::take(&mut buffer);
            downloaded = write_block(&mut file, &block, dest, downloaded).await?;
            report_progress(events, downloaded, total);
            report_speed(events, downloaded, &mut last_tick, &mut last_tick_bytes);
        }

        file.flush().await.map_err(|e| Error::from_io(e, dest))?;

        // A zero-byte resource still produced a valid (empty) file; make sure
        // at least one byte-progress event went out.
        if downloaded == 0 {
            events.bytes_downloaded(0, total.unwrap_or(0));
        }

        Ok(downloaded)
    }
}

async fn write_block(
    file: &mut tokio::fs::File,
    block: &[u8],
    dest: &Path,
    downloaded: u64,
) -> Result<u64> {
    file.write_all(block)
        .await
        .map_err(|e| Error::from_io(e, dest))?;
    Ok(downloaded + block.len() as u64)
}

fn report_progress(events: &dyn SingleTransferEvents, downloaded: u64, total: Option<u64>) {
    events.bytes_downloaded(downloaded, total.unwrap_or(0));
    if let Some(total) = total {
        if total > 0 {
            let percent = ((downloaded.min(total) * 100) / total) as u8;
            events.progress(percent);
        }
    }
}

fn report_speed(
    events: &dyn SingleTransferEvents,
    downloaded: u64,
    last_tick: &mut Instant,
    last_tick_bytes: &mut u64,
) {
    let elapsed = last_tick.elapsed();
    if elapsed >= SPEED_TICK {
        let rate = ((downloaded - *last_tick_bytes) as f64 / elapsed.as_secs_f64()) as u64;
        events.speed(rate);
        *last_tick = Instant::now();
        *last_tick_bytes = downloaded;
    }
}

/// Best-effort removal of a partially written destination file.
async fn remove_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => tracing::debug!(dest = %dest.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dest = %dest.display(), error = %e, "failed to remove partial file");
        }
    }
}
