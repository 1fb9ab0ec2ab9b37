//! Reconciling store.
//!
//! Owns the ordered record collection of one parent and merges two racing
//! sources into it: snapshot reads (a wholesale baseline) and change-feed
//! events (incremental mutations). Events that arrive while any snapshot
//! read is outstanding are journaled with a sequence number; when a
//! snapshot lands, events received after its read was issued are replayed
//! on top of it, so a snapshot never reverts a change the feed already
//! delivered.
//!
//! Snapshot reads are identified by a [`FetchTicket`]. A ticket carries the
//! binding epoch (bumped on every [`ReconcilingStore::reset`]) and a
//! generation; results from an old epoch, or older than the last applied
//! generation, are discarded.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::collection::{ChangeOutcome, SortedCollection};
use crate::{EventId, FeedEvent, FeedStatus, Record, SyncError};

/// Maximum journaled events held while snapshot reads are outstanding.
pub const MAX_JOURNAL_EVENTS: usize = 10_000;

/// Lifecycle phase of a store binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    /// No parent bound.
    #[default]
    Idle,
    /// Bound, first snapshot not applied yet.
    Loading,
    /// Snapshot applied; feed changes are merged as they arrive.
    Live,
    /// Last snapshot read failed. The collection is retained.
    Error,
}

/// Handle for one outstanding snapshot read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    epoch: u64,
    generation: u64,
    start_seq: u64,
}

impl FetchTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Read-only projection of the store handed to observers.
#[derive(Debug, Clone)]
pub struct StoreView<R: Record> {
    pub parent: Option<EventId>,
    pub records: Vec<R>,
    pub loading: bool,
    pub error: Option<Arc<SyncError>>,
    pub phase: SyncPhase,
    pub feed_status: FeedStatus,
    /// Feed changes may have been missed; a refetch restores consistency.
    pub resync_needed: bool,
}

impl<R: Record> Default for StoreView<R> {
    fn default() -> Self {
        Self {
            parent: None,
            records: Vec::new(),
            loading: false,
            error: None,
            phase: SyncPhase::Idle,
            feed_status: FeedStatus::Inactive,
            resync_needed: false,
        }
    }
}

/// Canonical collection for one parent plus the bookkeeping to merge
/// snapshots and feed events without losing either.
#[derive(Debug)]
pub struct ReconcilingStore<R: Record> {
    parent: Option<EventId>,
    collection: SortedCollection<R>,
    epoch: u64,
    next_generation: u64,
    applied_generation: u64,
    /// Outstanding reads: generation -> sequence number when issued.
    outstanding: BTreeMap<u64, u64>,
    journal: VecDeque<(u64, FeedEvent<R>)>,
    seq: u64,
    baseline_applied: bool,
    error: Option<Arc<SyncError>>,
    feed_status: FeedStatus,
    resync_needed: bool,
    /// Changes up to this sequence number may be missing.
    gap_through: u64,
    gap_open: bool,
}

impl<R: Record> Default for ReconcilingStore<R> {
    fn default() -> Self {
        Self {
            parent: None,
            collection: SortedCollection::new(),
            epoch: 0,
            next_generation: 1,
            applied_generation: 0,
            outstanding: BTreeMap::new(),
            journal: VecDeque::new(),
            seq: 0,
            baseline_applied: false,
            error: None,
            feed_status: FeedStatus::Inactive,
            resync_needed: false,
            gap_through: 0,
            gap_open: false,
        }
    }
}

impl<R: Record> ReconcilingStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `parent` (or unbind with `None`), dropping all state of the
    /// previous binding. Tickets issued before this call become stale.
    pub fn reset(&mut self, parent: Option<EventId>) {
        let epoch = self.epoch + 1;
        *self = Self {
            parent,
            epoch,
            ..Self::default()
        };
        debug!(?parent, epoch, "store reset");
    }

    pub fn parent(&self) -> Option<EventId> {
        self.parent
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn records(&self) -> &[R] {
        self.collection.as_slice()
    }

    /// True while any snapshot read is outstanding.
    pub fn loading(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub fn error(&self) -> Option<&Arc<SyncError>> {
        self.error.as_ref()
    }

    pub fn feed_status(&self) -> &FeedStatus {
        &self.feed_status
    }

    pub fn resync_needed(&self) -> bool {
        self.resync_needed
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    pub fn phase(&self) -> SyncPhase {
        if self.parent.is_none() {
            SyncPhase::Idle
        } else if self.error.is_some() && !self.loading() {
            SyncPhase::Error
        } else if !self.baseline_applied {
            SyncPhase::Loading
        } else {
            SyncPhase::Live
        }
    }

    pub fn view(&self) -> StoreView<R> {
        StoreView {
            parent: self.parent,
            records: self.collection.to_vec(),
            loading: self.loading(),
            error: self.error.clone(),
            phase: self.phase(),
            feed_status: self.feed_status.clone(),
            resync_needed: self.resync_needed,
        }
    }

    /// Apply one feed event in delivery order.
    ///
    /// A record that belongs to another parent is applied as a delete of
    /// its id, so a row moved to a different event leaves this collection.
    pub fn apply_event(&mut self, event: FeedEvent<R>) -> ChangeOutcome {
        self.seq += 1;

        let event = match event {
            FeedEvent::Inserted(record) | FeedEvent::Updated(record)
                if Some(record.parent_id()) != self.parent =>
            {
                warn!(
                    foreign = %record.parent_id(),
                    bound = ?self.parent,
                    "feed record for another parent, removing it"
                );
                FeedEvent::Deleted(record.id())
            }
            event => event,
        };

        if !self.outstanding.is_empty() {
            while self.journal.len() >= MAX_JOURNAL_EVENTS {
                if let Some((dropped, _)) = self.journal.pop_front() {
                    self.gap_through = self.gap_through.max(dropped);
                }
                self.resync_needed = true;
                warn!(
                    max = MAX_JOURNAL_EVENTS,
                    "change journal full, dropping oldest event"
                );
            }
            self.journal.push_back((self.seq, event.clone()));
        }

        let outcome = self.collection.apply(event);
        trace!(seq = self.seq, ?outcome, "applied feed event");
        outcome
    }

    /// Register a snapshot read about to be issued.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        let ticket = FetchTicket {
            epoch: self.epoch,
            generation: self.next_generation,
            start_seq: self.seq,
        };
        self.next_generation += 1;
        self.outstanding.insert(ticket.generation, ticket.start_seq);
        debug!(generation = ticket.generation, start_seq = ticket.start_seq, "fetch started");
        ticket
    }

    /// Whether `ticket`'s read is still awaited by this binding.
    pub fn is_pending(&self, ticket: &FetchTicket) -> bool {
        ticket.epoch == self.epoch && self.outstanding.contains_key(&ticket.generation)
    }

    fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.epoch == self.epoch && ticket.generation > self.applied_generation
    }

    /// Replace the baseline with `records` and replay every journaled event
    /// received after `ticket` was issued. Returns false for stale results.
    pub fn apply_snapshot(&mut self, ticket: FetchTicket, records: Vec<R>) -> bool {
        if !self.is_current(&ticket) {
            debug!(
                epoch = ticket.epoch,
                generation = ticket.generation,
                "discarding stale snapshot"
            );
            if ticket.epoch == self.epoch {
                self.outstanding.remove(&ticket.generation);
                self.prune_journal();
            }
            return false;
        }

        let parent = self.parent;
        let total = records.len();
        let records: Vec<R> = records
            .into_iter()
            .filter(|r| Some(r.parent_id()) == parent)
            .collect();
        if records.len() != total {
            warn!(skipped = total - records.len(), "snapshot rows for another parent");
        }

        self.collection = SortedCollection::from_records(records);
        let mut replayed = 0usize;
        for (seq, event) in &self.journal {
            if *seq > ticket.start_seq {
                self.collection.apply(event.clone());
                replayed += 1;
            }
        }

        self.applied_generation = ticket.generation;
        self.outstanding.retain(|generation, _| *generation > ticket.generation);
        self.baseline_applied = true;
        self.error = None;
        if !self.gap_open && self.gap_through <= ticket.start_seq {
            self.resync_needed = false;
        }
        self.prune_journal();

        debug!(
            generation = ticket.generation,
            records = self.collection.len(),
            replayed,
            "snapshot applied"
        );
        true
    }

    /// Record a failed snapshot read. The collection is kept as is.
    /// Returns false when the failure belongs to a superseded read.
    pub fn fail_fetch(&mut self, ticket: FetchTicket, error: SyncError) -> bool {
        if ticket.epoch != self.epoch {
            return false;
        }
        self.outstanding.remove(&ticket.generation);
        self.prune_journal();

        if ticket.generation <= self.applied_generation {
            debug!(generation = ticket.generation, error = %error, "ignoring superseded fetch failure");
            return false;
        }
        warn!(generation = ticket.generation, error = %error, "snapshot fetch failed");
        self.error = Some(Arc::new(error));
        true
    }

    /// Track the feed's connection status. A disconnect opens a gap that
    /// only a snapshot read issued after the next resubscribe can close.
    pub fn set_feed_status(&mut self, status: FeedStatus) {
        match status {
            FeedStatus::Disconnected | FeedStatus::Failed(_) => {
                self.gap_open = true;
                self.resync_needed = true;
            }
            FeedStatus::Subscribed if self.gap_open => {
                self.gap_open = false;
                self.seq += 1;
                self.gap_through = self.seq;
            }
            _ => {}
        }
        self.feed_status = status;
    }

    /// Drop journal entries no outstanding read will replay.
    fn prune_journal(&mut self) {
        match self.outstanding.values().min() {
            Some(&oldest_start) => {
                while self
                    .journal
                    .front()
                    .is_some_and(|(seq, _)| *seq <= oldest_start)
                {
                    self.journal.pop_front();
                }
            }
            None => self.journal.clear(),
        }
    }
}
