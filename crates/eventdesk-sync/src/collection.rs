//! Ordered, duplicate-free record collection.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;

use crate::{FeedEvent, Record};

/// Result of applying one feed event to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Inserted,
    Updated,
    Deleted,
    /// Duplicate insert or delete of an absent id.
    Ignored,
}

/// Total order used by the collection: sort key, then id.
fn order<R: Record>(a: &R, b: &R) -> Ordering {
    a.cmp_sort_key(b).then_with(|| a.id().cmp(&b.id()))
}

/// Records kept sorted by `(sort key, id)` with unique ids.
#[derive(Debug, Clone)]
pub struct SortedCollection<R: Record> {
    items: Vec<R>,
}

impl<R: Record> Default for SortedCollection<R> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<R: Record> SortedCollection<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary row list. On duplicate ids the later row wins.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut rows: Vec<R> = records.into_iter().collect();
        let total = rows.len();

        let mut seen = HashSet::new();
        rows.reverse();
        rows.retain(|r| seen.insert(r.id()));
        if rows.len() != total {
            debug!(dropped = total - rows.len(), "snapshot contained duplicate ids");
        }

        rows.sort_by(order);
        Self { items: rows }
    }

    pub fn as_slice(&self) -> &[R] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<R> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, id: &R::Id) -> Option<usize> {
        self.items.iter().position(|r| &r.id() == id)
    }

    pub fn contains(&self, id: &R::Id) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.position(id).map(|i| &self.items[i])
    }

    fn insert_sorted(&mut self, record: R) {
        let at = self
            .items
            .partition_point(|existing| order(existing, &record) == Ordering::Less);
        self.items.insert(at, record);
    }

    /// Insert unless the id is already present.
    pub fn insert(&mut self, record: R) -> bool {
        if self.contains(&record.id()) {
            return false;
        }
        self.insert_sorted(record);
        true
    }

    /// Replace the record with the same id, or insert it if absent.
    /// Returns true when an existing record was replaced.
    pub fn upsert(&mut self, record: R) -> bool {
        let replaced = self.remove(&record.id()).is_some();
        self.insert_sorted(record);
        replaced
    }

    pub fn remove(&mut self, id: &R::Id) -> Option<R> {
        self.position(id).map(|i| self.items.remove(i))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Apply one feed event.
    ///
    /// Inserts are idempotent, updates of unknown ids insert, deletes of
    /// unknown ids are no-ops.
    pub fn apply(&mut self, event: FeedEvent<R>) -> ChangeOutcome {
        match event {
            FeedEvent::Inserted(record) => {
                if self.insert(record) {
                    ChangeOutcome::Inserted
                } else {
                    ChangeOutcome::Ignored
                }
            }
            FeedEvent::Updated(record) => {
                if self.upsert(record) {
                    ChangeOutcome::Updated
                } else {
                    ChangeOutcome::Inserted
                }
            }
            FeedEvent::Deleted(id) => match self.remove(&id) {
                Some(_) => ChangeOutcome::Deleted,
                None => ChangeOutcome::Ignored,
            },
        }
    }

    /// Check the ordering and uniqueness invariants.
    pub fn is_consistent(&self) -> bool {
        let mut ids = HashSet::new();
        self.items.iter().all(|r| ids.insert(r.id()))
            && self
                .items
                .windows(2)
                .all(|w| order(&w[0], &w[1]) == Ordering::Less)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Attendee;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn attendee(id: u128, last: &str) -> Attendee {
        Attendee {
            id: Uuid::from_u128(id),
            event_id: Uuid::from_u128(100),
            first_name: String::new(),
            last_name: last.to_string(),
            email: None,
            company: None,
            job_title: None,
            checked_in: false,
            created_at: None,
        }
    }

    fn names(c: &SortedCollection<Attendee>) -> Vec<&str> {
        c.as_slice().iter().map(|a| a.last_name.as_str()).collect()
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut c = SortedCollection::new();
        c.insert(attendee(1, "Cole"));
        c.insert(attendee(2, "Abel"));
        c.insert(attendee(3, "Bree"));

        assert_eq!(names(&c), vec!["Abel", "Bree", "Cole"]);
        assert!(c.is_consistent());
    }

    #[test]
    fn test_equal_keys_ordered_by_id() {
        let mut c = SortedCollection::new();
        c.insert(attendee(9, "Same"));
        c.insert(attendee(3, "Same"));
        c.insert(attendee(5, "Same"));

        let ids: Vec<u128> = c.as_slice().iter().map(|a| a.id.as_u128()).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn test_duplicate_insert_ignored() {
        let mut c = SortedCollection::new();
        assert_eq!(c.apply(FeedEvent::Inserted(attendee(1, "Ann"))), ChangeOutcome::Inserted);
        assert_eq!(c.apply(FeedEvent::Inserted(attendee(1, "Changed"))), ChangeOutcome::Ignored);

        assert_eq!(names(&c), vec!["Ann"]);
    }

    #[test]
    fn test_update_repositions() {
        let mut c = SortedCollection::from_records(vec![attendee(1, "Ann"), attendee(2, "Bo")]);
        assert_eq!(c.apply(FeedEvent::Updated(attendee(1, "Zoe"))), ChangeOutcome::Updated);

        assert_eq!(names(&c), vec!["Bo", "Zoe"]);
        assert!(c.is_consistent());
    }

    #[test]
    fn test_update_of_unknown_inserts() {
        let mut c = SortedCollection::new();
        assert_eq!(c.apply(FeedEvent::Updated(attendee(4, "Dee"))), ChangeOutcome::Inserted);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut c = SortedCollection::from_records(vec![attendee(1, "Ann")]);
        assert_eq!(
            c.apply(FeedEvent::Deleted(Uuid::from_u128(42))),
            ChangeOutcome::Ignored
        );
        assert_eq!(names(&c), vec!["Ann"]);
    }

    #[test]
    fn test_from_records_dedupes_and_sorts() {
        let c = SortedCollection::from_records(vec![
            attendee(2, "Bo"),
            attendee(1, "Old"),
            attendee(1, "Ann"),
        ]);
        assert_eq!(names(&c), vec!["Ann", "Bo"]);
        assert!(c.is_consistent());
    }
}
