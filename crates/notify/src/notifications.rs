//! Merged, deduplicated notification list.
//!
//! Two sources feed it: snapshots fetched over REST and notifications pushed
//! over the live channel. Ids are unique. Pushed entries go on top,
//! snapshot entries keep the backend's order, and the unread count is always
//! derived from the entries themselves.

use std::collections::HashSet;

use campuslink_protocol::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Snapshot,
    Pushed,
}

#[derive(Debug, Clone)]
struct Entry {
    notification: Notification,
    origin: Origin,
    /// Local mutation epoch at which this entry last changed
    touched: u64,
}

/// Issued when a snapshot request starts; presented again when it resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTicket {
    seq: u64,
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct NotificationSet {
    entries: Vec<Entry>,
    /// Bumped on every push or local read-state change
    epoch: u64,
    next_seq: u64,
    applied_seq: Option<u64>,
}

impl NotificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the working set with `list` right away.
    pub fn load_snapshot(&mut self, list: Vec<Notification>) {
        let ticket = self.begin_snapshot();
        self.apply_snapshot(ticket, list);
    }

    pub fn begin_snapshot(&mut self) -> SnapshotTicket {
        self.next_seq += 1;
        SnapshotTicket {
            seq: self.next_seq,
            epoch: self.epoch,
        }
    }

    /// Merge a snapshot fetched under `ticket`.
    ///
    /// Returns false, leaving the set untouched, when a snapshot requested
    /// later has already been applied. Otherwise the snapshot becomes the
    /// working set, except that:
    /// - a local copy wins over the snapshot copy when it was pushed and is
    ///   still unread, or was changed after the request began;
    /// - pushes that arrived after the request began and are missing from
    ///   the snapshot are kept;
    /// - pushed entries that survive stay on top, in their current order.
    pub fn apply_snapshot(&mut self, ticket: SnapshotTicket, list: Vec<Notification>) -> bool {
        if self.applied_seq.is_some_and(|seq| seq >= ticket.seq) {
            return false;
        }
        self.applied_seq = Some(ticket.seq);

        let keeps_local = |e: &Entry| {
            e.touched > ticket.epoch || (e.origin == Origin::Pushed && e.notification.unread)
        };
        let incoming: HashSet<i64> = list.iter().map(|n| n.id).collect();
        let mut merged: Vec<Entry> = self
            .entries
            .iter()
            .filter(|e| {
                e.origin == Origin::Pushed
                    && if incoming.contains(&e.notification.id) {
                        keeps_local(e)
                    } else {
                        e.touched > ticket.epoch
                    }
            })
            .cloned()
            .collect();

        let mut seen: HashSet<i64> = merged.iter().map(|e| e.notification.id).collect();
        for notification in list {
            if !seen.insert(notification.id) {
                continue;
            }
            let local = self
                .position(notification.id)
                .map(|idx| &self.entries[idx])
                .filter(|e| keeps_local(e));
            match local {
                Some(entry) => merged.push(entry.clone()),
                None => merged.push(Entry {
                    notification,
                    origin: Origin::Snapshot,
                    touched: ticket.epoch,
                }),
            }
        }

        self.entries = merged;
        true
    }

    /// Insert a pushed notification on top, always unread. An existing entry
    /// with the same id is replaced where it stands.
    pub fn ingest_pushed(&mut self, mut notification: Notification) {
        notification.unread = true;
        self.epoch += 1;
        let entry = Entry {
            notification,
            origin: Origin::Pushed,
            touched: self.epoch,
        };
        match self.position(entry.notification.id) {
            Some(idx) => self.entries[idx] = entry,
            None => self.entries.insert(0, entry),
        }
    }

    /// Flip one entry to read. Returns false if the id is unknown.
    pub fn mark_read(&mut self, id: i64) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        self.epoch += 1;
        let entry = &mut self.entries[idx];
        entry.notification.unread = false;
        entry.touched = self.epoch;
        true
    }

    pub fn mark_all_read(&mut self) {
        self.epoch += 1;
        for entry in &mut self.entries {
            entry.notification.unread = false;
            entry.touched = self.epoch;
        }
    }

    pub fn unread_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.notification.unread)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Notification> {
        self.position(id).map(|idx| &self.entries[idx].notification)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter().map(|e| &e.notification)
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.iter().cloned().collect()
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.entries.iter().position(|e| e.notification.id == id)
    }
}

#[cfg(test)]
pub(crate) fn note(id: i64, unread: bool) -> Notification {
    Notification {
        id,
        message: format!("notification {id}"),
        title: None,
        kind: campuslink_protocol::NotificationKind::Other,
        unread,
        timestamp: None,
    }
}
