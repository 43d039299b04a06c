//! The task that drives one live view.

use std::sync::Arc;

use barfly_types::Delta;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::hub::{FeedHub, Registration};
use crate::view::ViewLogic;
use crate::{LiveConfig, LiveError};

pub(crate) type DeltaSender<R> = mpsc::Sender<Result<Delta<R>, LiveError>>;

/// The subscriber cancelled or went away.
struct Closed;

/// Resolves once the view is cancelled. Never resolves if the cancel handle
/// is dropped without cancelling.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Registers with the hub and rebuilds the view under the snapshot deadline.
async fn initialize<V: ViewLogic>(
    view: &mut V,
    hub: &FeedHub<V::Record>,
    config: &LiveConfig,
) -> Result<(Registration<V::Record>, Vec<Delta<V::Record>>), LiveError> {
    let deadline = config.init_timeout();
    let init = async {
        // Register before reading anything so no change can slip between the
        // snapshot and the first feed event.
        let registration = hub.register(view.topic()).await?;
        let deltas = view.resync().await?;
        Ok::<_, LiveError>((registration, deltas))
    };
    tokio::time::timeout(deadline, init)
        .await
        .map_err(|_| LiveError::InitializationTimeout(deadline))?
}

pub(crate) struct ViewTask<V: ViewLogic> {
    view_id: Uuid,
    view: V,
    hub: Arc<FeedHub<V::Record>>,
    out: DeltaSender<V::Record>,
    cancel: watch::Receiver<bool>,
    config: LiveConfig,
}

impl<V: ViewLogic> ViewTask<V> {
    pub(crate) fn new(
        view_id: Uuid,
        view: V,
        hub: Arc<FeedHub<V::Record>>,
        out: DeltaSender<V::Record>,
        cancel: watch::Receiver<bool>,
        config: LiveConfig,
    ) -> Self {
        Self {
            view_id,
            view,
            hub,
            out,
            cancel,
            config,
        }
    }

    /// Builds the initial snapshot, reports the outcome on `ready`, then
    /// follows the feed until the view is closed.
    pub(crate) async fn run(mut self, ready: oneshot::Sender<Result<(), LiveError>>) {
        let view_id = self.view_id;
        let first = tokio::select! {
            _ = cancelled(&mut self.cancel) => return,
            first = initialize(&mut self.view, &self.hub, &self.config) => first,
        };
        let (registration, deltas) = match first {
            Ok(initial) => initial,
            Err(e) => {
                tracing::warn!(%view_id, error = %e, "live view failed to initialize");
                let _ = ready.send(Err(e));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            tracing::debug!(%view_id, "opener went away before the view was ready");
            return;
        }
        tracing::info!(%view_id, baseline = deltas.len(), "live view syncing");

        if self.emit_all(deltas).await.is_ok() {
            self.follow(registration).await;
        }
        tracing::info!(%view_id, "live view closed");
    }

    async fn follow(&mut self, mut registration: Registration<V::Record>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return,
                _ = self.out.closed() => return,
                event = registration.recv() => event,
            };

            match event {
                Some(event) => match self.view.apply(event) {
                    Ok(Some(delta)) => {
                        if self.emit(delta).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    Ok(None) => continue,
                    Err(gap) => tracing::warn!(
                        view_id = %self.view_id,
                        expected = gap.expected,
                        got = gap.got,
                        "sequence gap in change feed; resyncing"
                    ),
                },
                None => tracing::info!(
                    view_id = %self.view_id,
                    "feed registration dropped; resyncing"
                ),
            }

            drop(registration);
            registration = match self.resync().await {
                Ok(fresh) => fresh,
                Err(Closed) => return,
            };
        }
    }

    /// Re-enters initialization until it succeeds or attempts run out. On
    /// exhaustion the subscriber receives `FeedDisconnected` as its last item.
    async fn resync(&mut self) -> Result<Registration<V::Record>, Closed> {
        let max_attempts = self.config.max_resync_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return Err(Closed),
                _ = self.out.closed() => return Err(Closed),
                result = initialize(&mut self.view, &self.hub, &self.config) => result,
            };

            match result {
                Ok((registration, deltas)) => {
                    tracing::info!(
                        view_id = %self.view_id,
                        attempt,
                        deltas = deltas.len(),
                        "live view reconciled"
                    );
                    self.emit_all(deltas).await?;
                    return Ok(registration);
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(
                        view_id = %self.view_id,
                        attempt,
                        error = %e,
                        "giving up on live view"
                    );
                    let _ = self.send(Err(LiveError::FeedDisconnected)).await;
                    return Err(Closed);
                }
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        view_id = %self.view_id,
                        attempt,
                        ?delay,
                        error = %e,
                        "resync failed; retrying"
                    );
                    tokio::select! {
                        _ = cancelled(&mut self.cancel) => return Err(Closed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn emit_all(&mut self, deltas: Vec<Delta<V::Record>>) -> Result<(), Closed> {
        for delta in deltas {
            self.emit(delta).await?;
        }
        Ok(())
    }

    async fn emit(&mut self, delta: Delta<V::Record>) -> Result<(), Closed> {
        self.send(Ok(delta)).await
    }

    /// Waits for queue space; a full queue stalls only this view.
    async fn send(&mut self, item: Result<Delta<V::Record>, LiveError>) -> Result<(), Closed> {
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => Err(Closed),
            sent = self.out.send(item) => sent.map_err(|_| Closed),
        }
    }
}
