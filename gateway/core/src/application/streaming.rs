// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Bounded relay between a daemon stream and its consumer.
//!
//! Producers run in their own task and push into an `mpsc` channel sized by
//! `stream_buffer`; consumers read a [`OperationStream`]. Cancelling the
//! token, or dropping the consumer side, detaches the producer without
//! touching the container or build behind it.

use crate::domain::daemon::StreamItem;
use crate::domain::fault::OperationFault;
use crate::infrastructure::executor::ExecutorStream;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Lazily produced, cancellable sequence of results.
pub type OperationStream<T> = ReceiverStream<Result<T, OperationFault>>;

/// Outcome of waiting on the daemon side of a relay.
#[derive(Debug)]
pub(crate) enum Next {
    Item(StreamItem),
    Fault(OperationFault),
    /// Nothing arrived within the idle budget.
    Idle,
    End,
    /// Token cancelled or consumer dropped.
    Cancelled,
}

/// Producer half; `M` is whatever the consumer reads.
pub(crate) struct Relay<M> {
    tx: mpsc::Sender<M>,
    cancel: CancellationToken,
}

impl<M: Send + 'static> Relay<M> {
    pub(crate) fn channel(buffer: usize, cancel: CancellationToken) -> (Self, ReceiverStream<M>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, cancel }, ReceiverStream::new(rx))
    }

    /// Deliver one item; `false` once the consumer has gone.
    pub(crate) async fn send(&self, item: M) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Wait for the next daemon item, bounded by `idle` when given.
    pub(crate) async fn next_from(&self, stream: &mut ExecutorStream, idle: Option<Duration>) -> Next {
        let wait = async {
            match idle {
                Some(budget) => tokio::time::timeout(budget, stream.next()).await.ok(),
                None => Some(stream.next().await),
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Next::Cancelled,
            _ = self.tx.closed() => Next::Cancelled,
            waited = wait => match waited {
                None => Next::Idle,
                Some(None) => Next::End,
                Some(Some(Ok(item))) => Next::Item(item),
                Some(Some(Err(fault))) => Next::Fault(fault.into()),
            },
        }
    }
}
