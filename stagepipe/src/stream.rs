//! Typed inter-stage streams.
//!
//! A stream is a `tokio::sync::mpsc` channel split into an [`Outbox`] (cloneable
//! write side) and an [`Inbox`] (single read side). There is no explicit close
//! call: a stream is closed once every `Outbox` handle has been dropped, and
//! `Inbox::recv` then returns `None` after the buffered items are consumed.

use crate::errors::StreamClosed;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Creates a stream with the given buffer capacity (at least 1).
#[must_use]
pub fn channel<T>(capacity: usize) -> (Outbox<T>, Inbox<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Outbox {
            tx,
            sent: Arc::new(AtomicU64::new(0)),
        },
        Inbox { rx, received: 0 },
    )
}

/// Write side of a stream.
///
/// Clones share the same channel and the same sent counter.
#[derive(Debug)]
pub struct Outbox<T> {
    tx: mpsc::Sender<T>,
    sent: Arc<AtomicU64>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            sent: Arc::clone(&self.sent),
        }
    }
}

impl<T> Outbox<T> {
    /// Sends one item, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] if the reading side has been dropped; the item
    /// is discarded.
    pub async fn send(&self, item: T) -> Result<(), StreamClosed> {
        self.tx.send(item).await.map_err(|_| StreamClosed)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Items successfully sent through any clone of this handle.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Returns true if the reading side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Drops this handle. The stream closes when the last handle goes.
    pub fn close(self) {
        drop(self);
    }
}

/// Read side of a stream.
#[derive(Debug)]
pub struct Inbox<T> {
    rx: mpsc::Receiver<T>,
    received: u64,
}

impl<T> Inbox<T> {
    /// An empty stream that is already closed.
    ///
    /// Fed to the first stage of a pipeline so its first read returns `None`.
    #[must_use]
    pub fn closed() -> Self {
        let (outbox, inbox) = channel(1);
        outbox.close();
        inbox
    }

    /// Receives the next item, or `None` once the stream is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.received += 1;
        }
        item
    }

    /// Receives an item if one is buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        let item = self.rx.try_recv().ok();
        if item.is_some() {
            self.received += 1;
        }
        item
    }

    /// Reads everything that is left until the stream closes, discarding it.
    ///
    /// Returns the number of discarded items.
    pub async fn drain(&mut self) -> u64 {
        let mut discarded = 0;
        while self.rx.recv().await.is_some() {
            discarded += 1;
        }
        discarded
    }

    /// Collects everything that is left until the stream closes.
    pub async fn collect(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    /// Items received so far through `recv`/`try_recv`.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }
}
