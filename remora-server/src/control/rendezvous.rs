//! Capacity-one synchronous hand-off.
//!
//! [`Rendezvous::send`] returns only once a receiver has taken the value, so a
//! producer never runs ahead of its consumer. Both directions accept an
//! optional deadline; `None` waits forever.

use std::future::Future;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::{PendingRequest, PendingResponse};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RendezvousError {
    #[error("rendezvous deadline expired")]
    Timeout,
    #[error("rendezvous closed")]
    Closed,
}

struct Handoff<T> {
    value: T,
    taken: oneshot::Sender<()>,
}

pub struct Rendezvous<T> {
    // None once closed
    tx: Mutex<Option<mpsc::Sender<Handoff<T>>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Handoff<T>>>,
}

impl<T: Send> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Rendezvous<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Waits for the slot, places `value` in it, then waits until it is taken.
    ///
    /// On timeout the value may still be sitting in the slot and will be
    /// delivered to the next receiver.
    pub async fn send(&self, value: T, deadline: Option<Instant>) -> Result<(), RendezvousError> {
        let tx = self.sender().ok_or(RendezvousError::Closed)?;
        let (taken_tx, taken_rx) = oneshot::channel();
        let handoff = Handoff {
            value,
            taken: taken_tx,
        };

        within(deadline, async move {
            tx.send(handoff)
                .await
                .map_err(|_| RendezvousError::Closed)?;
            taken_rx.await.map_err(|_| RendezvousError::Closed)
        })
        .await
    }

    /// Waits for a value and releases its sender.
    pub async fn recv(&self, deadline: Option<Instant>) -> Result<T, RendezvousError> {
        within(deadline, async {
            let mut rx = self.rx.lock().await;
            let handoff = rx.recv().await.ok_or(RendezvousError::Closed)?;
            // the sender may have given up already
            let _ = handoff.taken.send(());
            Ok(handoff.value)
        })
        .await
    }

    /// Takes a value only if one is already waiting and no receiver is busy.
    pub fn try_recv(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        let handoff = rx.try_recv().ok()?;
        let _ = handoff.taken.send(());
        Some(handoff.value)
    }

    /// Refuses new sends. Receivers drain whatever is in flight, then see `Closed`.
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|tx| tx.is_none()).unwrap_or(true)
    }

    fn sender(&self) -> Option<mpsc::Sender<Handoff<T>>> {
        self.tx.lock().ok().and_then(|tx| tx.clone())
    }
}

async fn within<R>(
    deadline: Option<Instant>,
    fut: impl Future<Output = Result<R, RendezvousError>>,
) -> Result<R, RendezvousError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| RendezvousError::Timeout)?,
        None => fut.await,
    }
}

/// The two directions of one vehicle's upload/response cycle.
#[derive(Default)]
pub struct ChannelPair {
    pub request: Rendezvous<PendingRequest>,
    pub response: Rendezvous<PendingResponse>,
}

impl ChannelPair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.request.close();
        self.response.close();
    }
}
