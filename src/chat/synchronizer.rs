use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::owners::OwnerDirectory;
use super::timeline::{Reconciled, Timeline};
use super::{Clock, Message, OwnerRef, TempId};
use crate::store::{MessageStore, Profile, Session, StoreResult};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub history_limit: usize,
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How the last fetch went, for the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncHealth {
    Starting,
    Live,
    Degraded,
    Stopped,
}

/// Completion of a store request. Each event carries the epoch it was issued
/// under; events from an earlier epoch are dropped.
#[derive(Debug)]
pub enum SyncEvent {
    Loaded {
        epoch: u64,
        result: StoreResult<Vec<Message>>,
    },
    Polled {
        epoch: u64,
        result: StoreResult<Vec<Message>>,
    },
    Sent {
        epoch: u64,
        temp_id: TempId,
        result: StoreResult<Message>,
    },
    OwnerResolved {
        epoch: u64,
        owner: OwnerRef,
        result: StoreResult<Profile>,
    },
}

impl SyncEvent {
    fn epoch(&self) -> u64 {
        match self {
            SyncEvent::Loaded { epoch, .. }
            | SyncEvent::Polled { epoch, .. }
            | SyncEvent::Sent { epoch, .. }
            | SyncEvent::OwnerResolved { epoch, .. } => *epoch,
        }
    }
}

/// Keeps the visible message list in step with the store: optimistic sends,
/// periodic polls, and reconciliation of both.
///
/// All state is owned here and only mutated by [`Synchronizer::apply`], which
/// runs on the caller's task. Store requests run on spawned tasks and report
/// back through the event channel.
pub struct Synchronizer {
    session: Session,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    timeline: Timeline,
    owners: OwnerDirectory,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: mpsc::UnboundedReceiver<SyncEvent>,
    status_tx: mpsc::UnboundedSender<String>,
    poll_task: Option<JoinHandle<()>>,
    epoch: u64,
    active: bool,
    health: SyncHealth,
}

impl Synchronizer {
    pub fn new(
        session: Session,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        status_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let owners = OwnerDirectory::new(
            session.identity.user_id.clone(),
            session.identity.display_name(),
        );

        Self {
            session,
            clock,
            config,
            timeline: Timeline::new(),
            owners,
            event_tx,
            event_rx,
            status_tx,
            poll_task: None,
            epoch: 0,
            active: true,
            health: SyncHealth::Starting,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    pub fn owner_name(&self, message: &Message) -> String {
        self.owners.display_name(message.owner.as_ref())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn health(&self) -> SyncHealth {
        self.health
    }

    pub fn pending_count(&self) -> usize {
        self.timeline.pending_count()
    }

    /// Fetch the initial history and start the poll schedule.
    pub fn initialize(&mut self) {
        if !self.active {
            return;
        }

        let store = Arc::clone(&self.session.store);
        let tx = self.event_tx.clone();
        let limit = self.config.history_limit;
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = store.list_recent(limit).await;
            let _ = tx.send(SyncEvent::Loaded { epoch, result });
        });

        self.start_polling();
    }

    /// One poll outside the schedule.
    pub fn poll(&mut self) {
        if !self.active {
            return;
        }

        let store = Arc::clone(&self.session.store);
        let tx = self.event_tx.clone();
        let limit = self.config.history_limit;
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = store.list_recent(limit).await;
            let _ = tx.send(SyncEvent::Polled { epoch, result });
        });
    }

    fn start_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }

        let store = Arc::clone(&self.session.store);
        let tx = self.event_tx.clone();
        let limit = self.config.history_limit;
        let period = self.config.poll_interval;
        let epoch = self.epoch;

        self.poll_task = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let result = store.list_recent(limit).await;
                if tx.send(SyncEvent::Polled { epoch, result }).is_err() {
                    break;
                }
            }
        }));
    }

    /// Optimistically show `text` and ask the store to append it. Returns the
    /// temporary id, or `None` when nothing was sent.
    pub fn send(&mut self, text: &str) -> Option<TempId> {
        let text = text.trim();
        if text.is_empty() || !self.active {
            return None;
        }

        let now = self.clock.now();
        let temp_id = TempId::generate(now);
        let owner = self.session.identity.user_id.clone();
        self.timeline.push_pending(Message::pending(
            temp_id.clone(),
            text,
            now,
            Some(owner.clone()),
        ));

        let store = Arc::clone(&self.session.store);
        let tx = self.event_tx.clone();
        let epoch = self.epoch;
        let text = text.to_string();
        let event_temp_id = temp_id.clone();
        tokio::spawn(async move {
            let result = store.append(&text, &owner).await;
            let _ = tx.send(SyncEvent::Sent {
                epoch,
                temp_id: event_temp_id,
                result,
            });
        });

        Some(temp_id)
    }

    /// Stop polling and ignore every request still in flight.
    pub fn teardown(&mut self) {
        if !self.active {
            return;
        }
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.active = false;
        self.epoch += 1;
        self.health = SyncHealth::Stopped;
        tracing::info!(user = %self.session.identity.user_id, "synchronizer torn down");
    }

    /// Apply every completion that has already arrived. Returns true if the
    /// visible state changed.
    pub fn process_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.event_rx.try_recv() {
            changed |= self.apply(event);
        }
        changed
    }

    /// Wait for the next completion without applying it.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.event_rx.recv().await
    }

    pub fn apply(&mut self, event: SyncEvent) -> bool {
        if !self.active || event.epoch() != self.epoch {
            tracing::debug!(epoch = event.epoch(), "dropping stale sync event");
            return false;
        }

        match event {
            SyncEvent::Loaded { result, .. } => self.on_fetched(result, "Loading history"),
            SyncEvent::Polled { result, .. } => self.on_fetched(result, "Refreshing messages"),
            SyncEvent::Sent { temp_id, result, .. } => self.on_sent(temp_id, result),
            SyncEvent::OwnerResolved { owner, result, .. } => {
                if let Err(e) = &result {
                    tracing::debug!(%owner, error = %e, "profile lookup failed");
                }
                self.owners.finish_lookup(&owner, result);
                true
            }
        }
    }

    fn on_fetched(&mut self, result: StoreResult<Vec<Message>>, what: &str) -> bool {
        match result {
            Ok(newest_first) => {
                self.health = SyncHealth::Live;
                let oldest_first: Vec<Message> = newest_first.into_iter().rev().collect();
                let added = self.timeline.merge(oldest_first);
                if added.is_empty() {
                    return false;
                }
                tracing::debug!(added = added.len(), total = self.timeline.len(), "merged messages");
                self.resolve_owners(&added);
                true
            }
            Err(e) => {
                self.health = SyncHealth::Degraded;
                self.report(format!("{} failed: {}", what, e));
                false
            }
        }
    }

    fn on_sent(&mut self, temp_id: TempId, result: StoreResult<Message>) -> bool {
        match result {
            Ok(confirmed) => {
                let outcome = self.timeline.confirm(&temp_id, confirmed);
                tracing::debug!(%temp_id, ?outcome, "send confirmed");
                outcome != Reconciled::Missing
            }
            Err(e) => {
                let removed = self.timeline.remove_pending(&temp_id).is_some();
                self.report(format!("Message not sent: {}", e));
                removed
            }
        }
    }

    fn resolve_owners(&mut self, added: &[Message]) {
        for owner in added.iter().filter_map(|m| m.owner.as_ref()) {
            if !self.owners.begin_lookup(owner) {
                continue;
            }

            let store = Arc::clone(&self.session.store);
            let tx = self.event_tx.clone();
            let epoch = self.epoch;
            let owner = owner.clone();
            tokio::spawn(async move {
                let result = store.get_profile(&owner).await;
                let _ = tx.send(SyncEvent::OwnerResolved {
                    epoch,
                    owner,
                    result,
                });
            });
        }
    }

    fn report(&self, line: String) {
        tracing::warn!("{}", line);
        let _ = self.status_tx.send(line);
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ManualClock;
    use crate::store::{Identity, MemoryStore, StoreError};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    struct Harness {
        sync: Synchronizer,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        status_rx: mpsc::UnboundedReceiver<String>,
    }

    fn me() -> Identity {
        Identity {
            user_id: OwnerRef::new("me"),
            name: Some("Smaug".into()),
            email: None,
            is_guest: false,
        }
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let session = Session::new(me(), store.clone());
        let sync = Synchronizer::new(session, clock.clone(), SyncConfig::default(), status_tx);
        Harness {
            sync,
            store,
            clock,
            status_rx,
        }
    }

    impl Harness {
        /// Wait for the next event and apply it.
        async fn step(&mut self) -> bool {
            let event = self.sync.next_event().await.expect("event channel open");
            self.sync.apply(event)
        }

        async fn step_until_sent(&mut self) {
            loop {
                let event = self.sync.next_event().await.expect("event channel open");
                let done = matches!(event, SyncEvent::Sent { .. });
                self.sync.apply(event);
                if done {
                    return;
                }
            }
        }

        fn texts(&self) -> Vec<&str> {
            self.sync.messages().iter().map(|m| m.text.as_str()).collect()
        }

        fn assert_sorted_and_unique(&self) {
            let messages = self.sync.messages();
            assert!(messages
                .windows(2)
                .all(|pair| pair[0].created_at <= pair[1].created_at));
            let ids: HashSet<&str> = messages.iter().map(|m| m.id()).collect();
            assert_eq!(ids.len(), messages.len());
        }
    }

    fn polled(sync: &Synchronizer, newest_first: Vec<Message>) -> SyncEvent {
        SyncEvent::Polled {
            epoch: sync.epoch,
            result: Ok(newest_first),
        }
    }

    #[tokio::test]
    async fn initialize_on_empty_store_then_send_and_confirm() {
        let mut h = harness();
        h.sync.initialize();
        h.step().await;
        assert!(h.sync.messages().is_empty());

        let temp_id = h.sync.send("hello").expect("sent");
        let pending = &h.sync.messages()[0];
        assert_eq!(h.sync.messages().len(), 1);
        assert!(pending.is_pending());
        assert_eq!(pending.text, "hello");
        assert_eq!(pending.temp_id(), Some(&temp_id));

        h.step_until_sent().await;

        let messages = h.sync.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].server_id(), Some("m00000001"));
        assert_eq!(messages[0].text, "hello");
        assert!(!messages[0].is_pending());
        assert_eq!(messages[0].created_at, h.clock.now());
    }

    #[tokio::test]
    async fn initialize_reverses_newest_first_history() {
        let mut h = harness();
        for text in ["first", "second", "third"] {
            h.store.seed(text, Some(OwnerRef::new("u1")));
            h.clock.advance(chrono::Duration::seconds(1));
        }

        h.sync.initialize();
        h.step().await;

        assert_eq!(h.texts(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn initialize_failure_leaves_list_empty_and_reports() {
        let mut h = harness();
        h.store.seed("unreachable", None);
        h.store.fail_lists(Some(StoreError::Unavailable("offline".into())));

        h.sync.initialize();
        h.step().await;

        assert!(h.sync.messages().is_empty());
        assert_eq!(h.sync.health(), SyncHealth::Degraded);
        let status = h.status_rx.try_recv().expect("failure reported");
        assert!(status.contains("offline"), "{}", status);
    }

    #[tokio::test]
    async fn empty_send_touches_nothing() {
        let mut h = harness();

        assert_eq!(h.sync.send(""), None);
        assert_eq!(h.sync.send("   \n\t"), None);
        tokio::task::yield_now().await;

        assert!(h.sync.messages().is_empty());
        assert_eq!(h.store.calls().append, 0);
        assert!(!h.sync.process_events());
    }

    #[tokio::test]
    async fn send_trims_text_before_storing() {
        let mut h = harness();
        h.sync.send("  roar  ");
        assert_eq!(h.texts(), vec!["roar"]);

        h.step_until_sent().await;
        let stored = h.store.list_recent(1).await.unwrap();
        assert_eq!(stored[0].text, "roar");
        assert_eq!(stored[0].owner, Some(OwnerRef::new("me")));
    }

    #[tokio::test]
    async fn failed_send_removes_the_pending_message() {
        let mut h = harness();
        h.store
            .fail_next_append(StoreError::PermissionDenied("read-only room".into()));

        let temp_id = h.sync.send("doomed").expect("sent");
        assert_eq!(h.texts(), vec!["doomed"]);

        h.step_until_sent().await;

        assert!(h
            .sync
            .messages()
            .iter()
            .all(|m| m.temp_id() != Some(&temp_id)));
        assert!(h.sync.messages().is_empty());
        let status = h.status_rx.try_recv().expect("failure reported");
        assert!(status.contains("read-only room"));
    }

    #[tokio::test]
    async fn confirmation_keeps_relative_position() {
        let mut h = harness();
        h.store.seed("older", Some(OwnerRef::new("u1")));
        h.sync.initialize();
        h.step().await;

        h.clock.advance(chrono::Duration::seconds(1));
        h.sync.send("mine");
        h.step_until_sent().await;

        assert_eq!(h.texts(), vec!["older", "mine"]);
        assert_eq!(
            h.sync.messages().iter().filter(|m| m.text == "mine").count(),
            1
        );
    }

    #[tokio::test]
    async fn poll_merges_only_new_ids() {
        let mut h = harness();
        let t1 = h.clock.now();
        let t2 = t1 + chrono::Duration::seconds(2);
        let m1 = Message::confirmed("m1", "one", t1, None);
        let m2 = Message::confirmed("m2", "two", t2, None);

        let first = polled(&h.sync, vec![m1.clone()]);
        h.sync.apply(first);
        let second = polled(&h.sync, vec![m2, m1]);
        h.sync.apply(second);

        let ids: Vec<&str> = h.sync.messages().iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn repeated_poll_is_not_a_change() {
        let mut h = harness();
        let m1 = Message::confirmed("m1", "one", h.clock.now(), None);

        let first = polled(&h.sync, vec![m1.clone()]);
        assert!(h.sync.apply(first));
        let again = polled(&h.sync, vec![m1]);
        assert!(!h.sync.apply(again));
        assert_eq!(h.sync.messages().len(), 1);
    }

    #[tokio::test]
    async fn out_of_order_polls_stay_sorted_and_unique() {
        let mut h = harness();
        let base = h.clock.now();
        let at = |s: i64| base + chrono::Duration::seconds(s);
        let batches = vec![
            vec![Message::confirmed("m4", "d", at(4), None)],
            vec![
                Message::confirmed("m3", "c", at(3), None),
                Message::confirmed("m1", "a", at(1), None),
            ],
            vec![
                Message::confirmed("m5", "e", at(5), None),
                Message::confirmed("m4", "d", at(4), None),
                Message::confirmed("m2", "b", at(2), None),
            ],
        ];

        for batch in batches {
            let event = polled(&h.sync, batch);
            h.sync.apply(event);
            h.assert_sorted_and_unique();
        }
        assert_eq!(h.texts(), vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn poll_before_confirmation_does_not_duplicate() {
        let mut h = harness();
        h.sync.send("race");

        // Let the append land in the store, but hold its completion back.
        let sent = h.sync.next_event().await.expect("sent event");
        assert!(matches!(sent, SyncEvent::Sent { .. }));

        h.sync.poll();
        loop {
            let event = h.sync.next_event().await.expect("poll event");
            let was_poll = matches!(event, SyncEvent::Polled { .. });
            h.sync.apply(event);
            if was_poll {
                break;
            }
        }
        h.sync.apply(sent);

        assert_eq!(h.texts(), vec!["race"]);
        assert_eq!(h.sync.pending_count(), 0);
    }

    #[tokio::test]
    async fn poll_after_confirmation_does_not_duplicate() {
        let mut h = harness();
        h.sync.send("settled");
        h.step_until_sent().await;

        h.sync.poll();
        h.step().await;

        assert_eq!(h.texts(), vec!["settled"]);
    }

    #[tokio::test]
    async fn poll_failure_keeps_state() {
        let mut h = harness();
        h.store.seed("kept", None);
        h.sync.initialize();
        h.step().await;

        h.store.fail_lists(Some(StoreError::Unavailable("timeout".into())));
        h.sync.poll();
        assert!(!h.step().await);

        assert_eq!(h.texts(), vec!["kept"]);
        assert_eq!(h.sync.health(), SyncHealth::Degraded);
    }

    #[tokio::test]
    async fn concurrent_messages_from_one_owner_share_a_lookup() {
        let mut h = harness();
        h.store.insert_profile(OwnerRef::new("u1"), "Ancalagon");
        let now = h.clock.now();
        let u1 = Some(OwnerRef::new("u1"));

        let first = polled(
            &h.sync,
            vec![Message::confirmed("m1", "one", now, u1.clone())],
        );
        h.sync.apply(first);
        assert_eq!(h.sync.owner_name(&h.sync.messages()[0]), "loading...");

        let second = polled(
            &h.sync,
            vec![Message::confirmed("m2", "two", now + chrono::Duration::seconds(1), u1)],
        );
        h.sync.apply(second);

        h.step().await;
        assert_eq!(h.store.calls().profile, 1);
        for message in h.sync.messages() {
            assert_eq!(h.sync.owner_name(message), "Ancalagon");
        }
    }

    #[tokio::test]
    async fn own_messages_use_the_session_name_without_lookup() {
        let mut h = harness();
        h.sync.send("mine");
        h.step_until_sent().await;

        assert_eq!(h.sync.owner_name(&h.sync.messages()[0]), "Smaug");
        assert_eq!(h.store.calls().profile, 0);
    }

    #[tokio::test]
    async fn unresolvable_owner_shows_short_id() {
        let mut h = harness();
        let owner = OwnerRef::new("0123456789abcdef");
        let event = polled(
            &h.sync,
            vec![Message::confirmed("m1", "who?", h.clock.now(), Some(owner))],
        );
        h.sync.apply(event);
        h.step().await;

        assert_eq!(h.sync.owner_name(&h.sync.messages()[0]), "01234567");
    }

    #[tokio::test]
    async fn completions_after_teardown_are_discarded() {
        let mut h = harness();
        h.sync.send("late");
        let sent = h.sync.next_event().await.expect("sent event");

        h.sync.teardown();
        let before = h.sync.messages().to_vec();
        assert!(!h.sync.apply(sent));

        assert_eq!(h.sync.messages(), before.as_slice());
        assert!(!h.sync.is_active());
        assert_eq!(h.sync.send("ignored"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_schedule_ticks_every_interval() {
        let mut h = harness();
        h.sync.initialize();
        h.step().await;
        assert_eq!(h.store.calls().list, 1);

        h.store.seed("from elsewhere", None);
        time::sleep(DEFAULT_POLL_INTERVAL + Duration::from_millis(10)).await;
        h.step().await;

        assert_eq!(h.store.calls().list, 2);
        assert_eq!(h.texts(), vec!["from elsewhere"]);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_the_poll_schedule() {
        let mut h = harness();
        h.sync.initialize();
        h.step().await;

        h.sync.teardown();
        time::sleep(DEFAULT_POLL_INTERVAL * 3).await;

        assert_eq!(h.store.calls().list, 1);
        assert!(!h.sync.process_events());
    }
}
