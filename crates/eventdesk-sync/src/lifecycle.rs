//! Subscription lifecycle actor.
//!
//! Each consumer owns one [`SyncActor`] that binds a [`ReconcilingStore`] to
//! at most one event at a time. Control requests (activate, refetch) and
//! internal messages (feed messages, snapshot results) are processed one at
//! a time on the actor task, so the store is only ever touched from one
//! place. Everything tagged with an older binding epoch is dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::feed::{ChangeFeed, FeedSink, FeedSubscription, FeedTopic};
use crate::snapshot::SnapshotSource;
use crate::store::{FetchTicket, ReconcilingStore, StoreView, SyncPhase};
use crate::{EventId, FeedMessage, FeedStatus, Record, SyncError};

/// Channel buffer size for control requests.
const CONTROL_CHANNEL_SIZE: usize = 32;

/// Behaviour knobs for a sync binding.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Issue a snapshot read whenever the feed resubscribes after a
    /// disconnect, so changes missed during the gap are recovered.
    pub resync_on_reconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resync_on_reconnect: true,
        }
    }
}

enum Control {
    Activate {
        parent: Option<EventId>,
        done: oneshot::Sender<()>,
    },
    Refetch {
        done: oneshot::Sender<Result<(), SyncError>>,
    },
}

enum Internal<R: Record> {
    Feed {
        epoch: u64,
        message: FeedMessage<R>,
    },
    Snapshot {
        ticket: FetchTicket,
        result: Result<Vec<R>, SyncError>,
    },
}

/// Live resources of the current binding.
struct Binding {
    parent: EventId,
    subscription: Option<FeedSubscription>,
    fetches: Vec<JoinHandle<()>>,
    disconnected: bool,
}

/// Actor owning one reconciling store.
pub struct SyncActor<R: Record> {
    store: ReconcilingStore<R>,
    snapshots: Arc<dyn SnapshotSource<R>>,
    feed: Arc<dyn ChangeFeed<R>>,
    config: SyncConfig,
    binding: Option<Binding>,
    waiters: Vec<(FetchTicket, oneshot::Sender<Result<(), SyncError>>)>,
    control_rx: mpsc::Receiver<Control>,
    internal_tx: mpsc::UnboundedSender<Internal<R>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<R>>,
    view_tx: watch::Sender<Arc<StoreView<R>>>,
}

/// Cloneable handle to a [`SyncActor`]. The actor tears its binding down
/// and exits once every handle is dropped.
pub struct SyncHandle<R: Record> {
    control_tx: mpsc::Sender<Control>,
    view_rx: watch::Receiver<Arc<StoreView<R>>>,
}

impl<R: Record> Clone for SyncHandle<R> {
    fn clone(&self) -> Self {
        Self {
            control_tx: self.control_tx.clone(),
            view_rx: self.view_rx.clone(),
        }
    }
}

impl<R: Record> SyncActor<R> {
    /// Create an actor and a handle for driving it.
    pub fn new(
        snapshots: Arc<dyn SnapshotSource<R>>,
        feed: Arc<dyn ChangeFeed<R>>,
        config: SyncConfig,
    ) -> (Self, SyncHandle<R>) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(Arc::new(StoreView::default()));

        let actor = Self {
            store: ReconcilingStore::new(),
            snapshots,
            feed,
            config,
            binding: None,
            waiters: Vec::new(),
            control_rx,
            internal_tx,
            internal_rx,
            view_tx,
        };
        (actor, SyncHandle { control_tx, view_rx })
    }

    /// Run until every handle is dropped.
    pub async fn run(mut self) {
        debug!("sync actor started");

        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    Some(control) => self.handle_control(control),
                    None => break,
                },

                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            }
        }

        self.teardown();
        self.store.reset(None);
        self.publish();
        debug!("sync actor stopped");
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Activate { parent, done } => {
                self.activate(parent);
                let _ = done.send(());
            }
            Control::Refetch { done } => {
                if self.binding.is_none() {
                    let _ = done.send(Err(SyncError::Inactive));
                    return;
                }
                let ticket = self.start_fetch();
                self.waiters.push((ticket, done));
                self.publish();
            }
        }
    }

    fn activate(&mut self, parent: Option<EventId>) {
        let current = self.binding.as_ref().map(|b| b.parent);
        if current == parent {
            trace!(?parent, "activation unchanged");
            return;
        }

        self.teardown();
        self.store.reset(parent);

        if let Some(parent) = parent {
            info!(%parent, table = R::TABLE, "binding sync to event");
            let subscription = self.subscribe_feed(parent);
            self.binding = Some(Binding {
                parent,
                subscription,
                fetches: Vec::new(),
                disconnected: false,
            });
            self.start_fetch();
        } else {
            info!(table = R::TABLE, "sync deactivated");
        }
        self.publish();
    }

    fn subscribe_feed(&mut self, parent: EventId) -> Option<FeedSubscription> {
        let epoch = self.store.epoch();
        let tx = self.internal_tx.clone();
        let sink: FeedSink<R> = Arc::new(move |message| {
            let _ = tx.send(Internal::Feed { epoch, message });
        });

        match self.feed.subscribe(FeedTopic::for_parent::<R>(parent), sink) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(%parent, error = %e, "feed subscription failed");
                self.store.set_feed_status(FeedStatus::Failed(e.to_string()));
                None
            }
        }
    }

    /// Issue a snapshot read for the bound event.
    fn start_fetch(&mut self) -> FetchTicket {
        let ticket = self.store.begin_fetch();
        if let Some(binding) = self.binding.as_mut() {
            binding.fetches.retain(|task| !task.is_finished());

            let source = Arc::clone(&self.snapshots);
            let tx = self.internal_tx.clone();
            let parent = binding.parent;
            binding.fetches.push(tokio::spawn(async move {
                let result = source.fetch_records(parent).await;
                let _ = tx.send(Internal::Snapshot { ticket, result });
            }));
        }
        ticket
    }

    fn handle_internal(&mut self, message: Internal<R>) {
        match message {
            Internal::Feed { epoch, message } => {
                if epoch != self.store.epoch() {
                    trace!(epoch, "dropping feed message from previous binding");
                    return;
                }
                match message {
                    FeedMessage::Event(event) => {
                        self.store.apply_event(event);
                    }
                    FeedMessage::Status(status) => self.handle_feed_status(status),
                }
            }
            Internal::Snapshot { ticket, result } => {
                if ticket.epoch() != self.store.epoch() {
                    trace!(epoch = ticket.epoch(), "dropping snapshot from previous binding");
                    return;
                }
                match result {
                    Ok(records) => {
                        self.store.apply_snapshot(ticket, records);
                    }
                    Err(e) => {
                        self.store.fail_fetch(ticket, e);
                    }
                }
                self.resolve_waiters();
            }
        }
        self.publish();
    }

    fn handle_feed_status(&mut self, status: FeedStatus) {
        let mut resync = false;
        if let Some(binding) = self.binding.as_mut() {
            match &status {
                FeedStatus::Disconnected => {
                    warn!(parent = %binding.parent, "feed disconnected");
                    binding.disconnected = true;
                }
                FeedStatus::Failed(reason) => {
                    warn!(parent = %binding.parent, reason = %reason, "feed failed");
                    binding.disconnected = true;
                }
                FeedStatus::Subscribed if binding.disconnected => {
                    info!(parent = %binding.parent, "feed resubscribed");
                    binding.disconnected = false;
                    resync = self.config.resync_on_reconnect;
                }
                _ => {}
            }
        }

        self.store.set_feed_status(status);
        if resync {
            debug!("refetching after feed gap");
            self.start_fetch();
        }
    }

    /// Resolve refetch callers whose read is no longer outstanding.
    fn resolve_waiters(&mut self) {
        let store = &self.store;
        let (settled, pending): (Vec<_>, Vec<_>) = self
            .waiters
            .drain(..)
            .partition(|(ticket, _)| !store.is_pending(ticket));
        self.waiters = pending;
        for (_, done) in settled {
            let _ = done.send(Ok(()));
        }
    }

    /// Unsubscribe the feed and abort in-flight reads of the current binding.
    fn teardown(&mut self) {
        if let Some(binding) = self.binding.take() {
            drop(binding.subscription);
            for task in binding.fetches {
                task.abort();
            }
            debug!(parent = %binding.parent, "binding torn down");
        }
        for (_, done) in self.waiters.drain(..) {
            let _ = done.send(Err(SyncError::Cancelled));
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(Arc::new(self.store.view()));
    }
}

impl<R: Record> SyncHandle<R> {
    /// Spawn a new actor on the current runtime and return its handle.
    pub fn spawn(
        snapshots: Arc<dyn SnapshotSource<R>>,
        feed: Arc<dyn ChangeFeed<R>>,
        config: SyncConfig,
    ) -> Self {
        let (actor, handle) = SyncActor::new(snapshots, feed, config);
        tokio::spawn(actor.run());
        handle
    }

    /// Bind to `parent`, or unbind with `None`. Returns once the previous
    /// feed subscription has been released and the new one registered.
    pub async fn activate(&self, parent: Option<EventId>) -> Result<(), SyncError> {
        let (done, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Activate { parent, done })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    pub async fn deactivate(&self) -> Result<(), SyncError> {
        self.activate(None).await
    }

    /// Re-read the snapshot without touching the feed subscription.
    ///
    /// Resolves when the read settles. A failed read is reported through
    /// the view's `error`, not here.
    pub async fn refetch(&self) -> Result<(), SyncError> {
        let (done, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Refetch { done })
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Latest published view.
    pub fn view(&self) -> Arc<StoreView<R>> {
        Arc::clone(&self.view_rx.borrow())
    }

    /// Observe every published view.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreView<R>>> {
        self.view_rx.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.view_rx.borrow().phase
    }

    /// Wait until a published view satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&StoreView<R>) -> bool,
    ) -> Result<Arc<StoreView<R>>, SyncError> {
        let mut rx = self.view_rx.clone();
        let view = rx
            .wait_for(|view| predicate(&**view))
            .await
            .map_err(|_| SyncError::Closed)?;
        Ok(Arc::clone(&view))
    }
}
