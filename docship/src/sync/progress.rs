use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

use super::engine::ProgressEvent;

/// Wraps a chunked byte source and reports its consumption as
/// [`ProgressEvent::ByteProgress`] without altering the content.
///
/// One `ByteProgress(0, total)` is emitted on construction so consumers see
/// progress even for zero-byte files before the first chunk.
pub struct ProgressReader<S> {
    inner: S,
    bytes_read: u64,
    total_bytes: u64,
    events: mpsc::UnboundedSender<ProgressEvent>,
}

impl<S> ProgressReader<S> {
    pub fn new(inner: S, total_bytes: u64, events: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        let _ = events.send(ProgressEvent::ByteProgress {
            bytes_read: 0,
            total_bytes,
        });
        Self {
            inner,
            bytes_read: 0,
            total_bytes,
            events,
        }
    }
}

impl<S> Stream for ProgressReader<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            self.bytes_read += chunk.len() as u64;
            let event = ProgressEvent::ByteProgress {
                bytes_read: self.bytes_read,
                total_bytes: self.total_bytes,
            };
            let _ = self.events.send(event);
        }
        polled
    }
}

/// Folds the engine's event stream into the two scalars a front end renders:
/// overall items progress and current-file byte progress. A pure fold with
/// no side effects and no error states.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    processed: u64,
    total: u64,
    current_file: Option<String>,
    file_bytes: u64,
    file_total: u64,
}

impl ProgressAggregator {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Replaces the denominator; fractions are always recomputed from the
    /// current values, never from a cached quotient.
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::EnteringItem { name } => {
                self.current_file = Some(name.clone());
                self.file_bytes = 0;
                self.file_total = 0;
            }
            ProgressEvent::ByteProgress {
                bytes_read,
                total_bytes,
            } => {
                self.file_bytes = *bytes_read;
                self.file_total = *total_bytes;
            }
            ProgressEvent::ItemResult { .. } | ProgressEvent::Error { .. } => {
                self.processed += 1;
            }
            ProgressEvent::Completed { .. } => {
                self.current_file = None;
                self.file_bytes = 0;
                self.file_total = 0;
            }
            ProgressEvent::TokenAcquired { .. } => {}
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    /// processed / total; 0.0 while the denominator is unknown.
    pub fn overall_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }

    /// Percentage of the current file's bytes; 0 between files.
    pub fn file_percent(&self) -> u64 {
        if self.file_total == 0 {
            0
        } else {
            self.file_bytes * 100 / self.file_total
        }
    }
}
