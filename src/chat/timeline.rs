use std::cmp::Ordering;
use std::collections::HashSet;

use super::{Message, TempId};

/// Outcome of reconciling a pending message with the store's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The pending entry was swapped for the confirmed message in place.
    Replaced,
    /// A poll already delivered the confirmed message; the pending entry was dropped.
    AlreadyPresent,
    /// No pending entry carried that temporary id.
    Missing,
}

/// Visible message list: unique by id, ordered by `created_at` ascending.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if a confirmed message with this server id is visible.
    pub fn contains(&self, server_id: &str) -> bool {
        self.messages
            .iter()
            .any(|message| message.server_id() == Some(server_id))
    }

    /// Merge fetched messages, skipping ids already visible. Returns the newly
    /// added messages so callers can react to them (owner lookups).
    pub fn merge(&mut self, fetched: Vec<Message>) -> Vec<Message> {
        let mut known: HashSet<String> = self
            .messages
            .iter()
            .filter_map(|message| message.server_id().map(str::to_string))
            .collect();

        let fresh: Vec<Message> = fetched
            .into_iter()
            .filter(|message| match message.server_id() {
                Some(id) => known.insert(id.to_string()),
                // The store only hands out confirmed messages.
                None => false,
            })
            .collect();

        if fresh.is_empty() {
            return fresh;
        }

        self.messages.extend(fresh.iter().cloned());
        self.messages.sort_by(chronological);
        fresh
    }

    /// Optimistic insert: pending messages always go to the end.
    pub fn push_pending(&mut self, message: Message) {
        debug_assert!(message.is_pending());
        self.messages.push(message);
    }

    pub fn confirm(&mut self, temp_id: &TempId, confirmed: Message) -> Reconciled {
        let Some(position) = self.position_of(temp_id) else {
            return Reconciled::Missing;
        };

        let already_present = confirmed
            .server_id()
            .map_or(false, |id| self.contains(id));
        if already_present {
            self.messages.remove(position);
            return Reconciled::AlreadyPresent;
        }

        self.messages[position] = confirmed;

        // Server time can disagree with the local clock; only re-sort when the
        // swapped message actually broke the ordering.
        if !self.is_sorted() {
            self.messages.sort_by(chronological);
        }
        Reconciled::Replaced
    }

    pub fn remove_pending(&mut self, temp_id: &TempId) -> Option<Message> {
        let position = self.position_of(temp_id)?;
        Some(self.messages.remove(position))
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    fn position_of(&self, temp_id: &TempId) -> Option<usize> {
        self.messages
            .iter()
            .position(|message| message.temp_id() == Some(temp_id))
    }

    fn is_sorted(&self) -> bool {
        self.messages
            .windows(2)
            .all(|pair| chronological(&pair[0], &pair[1]) != Ordering::Greater)
    }
}

/// Oldest first; equal timestamps fall back to id order.
fn chronological(a: &Message, b: &Message) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id().cmp(b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::OwnerRef;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn confirmed(id: &str, at: i64) -> Message {
        Message::confirmed(id, format!("text {}", id), t(at), Some(OwnerRef::new("u1")))
    }

    fn ids(timeline: &Timeline) -> Vec<&str> {
        timeline.messages().iter().map(|m| m.id()).collect()
    }

    fn assert_sorted_and_unique(timeline: &Timeline) {
        assert!(timeline.is_sorted(), "timeline out of order: {:?}", ids(timeline));
        let unique: HashSet<&str> = ids(timeline).into_iter().collect();
        assert_eq!(unique.len(), timeline.len(), "duplicate ids: {:?}", ids(timeline));
    }

    #[test]
    fn merge_skips_ids_already_present() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m1", 1)]);

        let added = timeline.merge(vec![confirmed("m1", 1), confirmed("m2", 2)]);

        assert_eq!(added.len(), 1);
        assert_eq!(ids(&timeline), vec!["m1", "m2"]);
    }

    #[test]
    fn merge_of_known_ids_leaves_content_unchanged() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m1", 1), confirmed("m2", 2)]);
        let before = timeline.messages().to_vec();

        let added = timeline.merge(vec![confirmed("m2", 2), confirmed("m1", 1)]);

        assert!(added.is_empty());
        assert_eq!(timeline.messages(), before.as_slice());
    }

    #[test]
    fn merge_sorts_out_of_order_batches() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m3", 30)]);
        timeline.merge(vec![confirmed("m5", 50), confirmed("m1", 10)]);
        timeline.merge(vec![confirmed("m4", 40), confirmed("m2", 20), confirmed("m5", 50)]);

        assert_eq!(ids(&timeline), vec!["m1", "m2", "m3", "m4", "m5"]);
        assert_sorted_and_unique(&timeline);
    }

    #[test]
    fn merge_drops_duplicates_inside_one_batch() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m1", 1), confirmed("m1", 1)]);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("b", 5), confirmed("c", 5)]);
        timeline.merge(vec![confirmed("a", 5)]);

        assert_eq!(ids(&timeline), vec!["a", "b", "c"]);
    }

    #[test]
    fn confirm_replaces_pending_in_place() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m1", 1)]);
        let temp = TempId::generate(t(2));
        timeline.push_pending(Message::pending(temp.clone(), "hello", t(2), None));

        let outcome = timeline.confirm(&temp, confirmed("m2", 2));

        assert_eq!(outcome, Reconciled::Replaced);
        assert_eq!(ids(&timeline), vec!["m1", "m2"]);
        assert_eq!(timeline.pending_count(), 0);
    }

    #[test]
    fn confirm_after_poll_drops_the_pending_copy() {
        let mut timeline = Timeline::new();
        let temp = TempId::generate(t(2));
        timeline.push_pending(Message::pending(temp.clone(), "hello", t(2), None));
        timeline.merge(vec![confirmed("m2", 2)]);

        let outcome = timeline.confirm(&temp, confirmed("m2", 2));

        assert_eq!(outcome, Reconciled::AlreadyPresent);
        assert_eq!(ids(&timeline), vec!["m2"]);
    }

    #[test]
    fn confirm_resorts_when_server_time_is_earlier() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m1", 10), confirmed("m3", 30)]);
        let temp = TempId::generate(t(40));
        timeline.push_pending(Message::pending(temp.clone(), "late clock", t(40), None));

        timeline.confirm(&temp, confirmed("m2", 20));

        assert_eq!(ids(&timeline), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn confirm_of_unknown_temp_id_is_a_no_op() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m1", 1)]);

        let outcome = timeline.confirm(&TempId::generate(t(1)), confirmed("m9", 9));

        assert_eq!(outcome, Reconciled::Missing);
        assert_eq!(ids(&timeline), vec!["m1"]);
    }

    #[test]
    fn remove_pending_only_touches_the_matching_entry() {
        let mut timeline = Timeline::new();
        timeline.merge(vec![confirmed("m1", 1)]);
        let keep = TempId::generate(t(2));
        let drop = TempId::generate(t(3));
        timeline.push_pending(Message::pending(keep.clone(), "keep", t(2), None));
        timeline.push_pending(Message::pending(drop.clone(), "drop", t(3), None));

        let removed = timeline.remove_pending(&drop);

        assert_eq!(removed.map(|m| m.text), Some("drop".to_string()));
        assert_eq!(timeline.len(), 2);
        assert!(timeline.remove_pending(&drop).is_none());
    }
}
