//! Subscriber-facing handles.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use barfly_types::Delta;
use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::LiveError;

/// The deltas of one live view, in order.
///
/// Ends after a terminal error item, after [`CancelHandle::cancel`], or when
/// the engine shuts down. Dropping it closes the view.
pub struct DeltaStream<R> {
    view_id: Uuid,
    inner: ReceiverStream<Result<Delta<R>, LiveError>>,
    cancel: watch::Receiver<bool>,
}

impl<R> DeltaStream<R> {
    pub(crate) fn new(
        view_id: Uuid,
        rx: mpsc::Receiver<Result<Delta<R>, LiveError>>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            view_id,
            inner: ReceiverStream::new(rx),
            cancel,
        }
    }

    pub fn view_id(&self) -> Uuid {
        self.view_id
    }
}

impl<R> Stream for DeltaStream<R> {
    type Item = Result<Delta<R>, LiveError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        // Nothing is delivered once the view is cancelled, even if deltas
        // were already queued.
        if *this.cancel.borrow() {
            return Poll::Ready(None);
        }
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

/// Closes a live view. Cloning shares the same view; dropping every handle
/// does not close it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    view_id: Uuid,
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub(crate) fn new(view_id: Uuid, tx: watch::Sender<bool>) -> Self {
        Self {
            view_id,
            tx: Arc::new(tx),
        }
    }

    pub fn cancel(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!(view_id = %self.view_id, "live view cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}
