//! Bounded, time-expiring registry of in-flight streamed replies.
//!
//! Every conversation (channel + root message) owns an ordered list of the
//! Slack message ids holding its rendered chunks. Two locks are involved:
//!
//! - a registry-wide `std::sync::Mutex` guarding the map and its recency
//!   order, held only for insert/promote/evict bookkeeping and never across
//!   an `.await`;
//! - one `tokio::sync::Mutex` per conversation, held by the updater for the
//!   whole reconcile pass including the Slack calls.
//!
//! Entries expire after the configured TTL of inactivity, and the least
//! recently used entry is evicted once the registry grows past its capacity.
//! An entry whose ledger is locked is never evicted, so the registry may run
//! over capacity while every entry is mid-update. A caller that looked up an
//! entry before locking it checks [`EditTracker::reattach`] once the lock is
//! held, in case the entry was evicted or replaced in between.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::MutexGuard as AsyncMutexGuard;
use tokio::time::Instant;
use tracing::debug;

use crate::core::config::TrackerConfig;
use crate::core::models::ConversationKey;

/// Message ids (and the text last sent to each) for one conversation.
#[derive(Debug)]
pub struct ChunkLedger {
    thread_ts: Option<String>,
    message_ids: Vec<String>,
    rendered: Vec<Option<String>>,
}

impl ChunkLedger {
    fn seeded(root_ts: &str, thread_ts: Option<String>, root_text: Option<String>) -> Self {
        Self {
            thread_ts,
            message_ids: vec![root_ts.to_string()],
            rendered: vec![root_text],
        }
    }

    /// Thread the conversation's extra chunks are posted into, when known.
    #[must_use]
    pub fn thread_ts(&self) -> Option<&str> {
        self.thread_ts.as_deref()
    }

    #[must_use]
    pub fn message_ids(&self) -> &[String] {
        &self.message_ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.message_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }

    /// Text most recently sent to the message holding chunk `index`.
    #[must_use]
    pub fn rendered(&self, index: usize) -> Option<&str> {
        self.rendered.get(index).and_then(Option::as_deref)
    }

    pub(crate) fn record_render(&mut self, index: usize, text: &str) {
        if let Some(slot) = self.rendered.get_mut(index) {
            *slot = Some(text.to_string());
        }
    }

    pub(crate) fn push_message(&mut self, ts: String, text: String) {
        self.message_ids.push(ts);
        self.rendered.push(Some(text));
    }
}

/// Per-conversation state handed out by the tracker.
#[derive(Debug)]
pub struct ConversationEditState {
    key: ConversationKey,
    guard: tokio::sync::Mutex<ChunkLedger>,
}

impl ConversationEditState {
    fn new(key: ConversationKey, thread_ts: Option<String>, root_text: Option<String>) -> Self {
        let ledger = ChunkLedger::seeded(&key.root_ts, thread_ts, root_text);
        Self {
            key,
            guard: tokio::sync::Mutex::new(ledger),
        }
    }

    #[must_use]
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Wait for exclusive access to this conversation's ledger. Waiters are
    /// served in the order they arrived.
    pub async fn lock(&self) -> AsyncMutexGuard<'_, ChunkLedger> {
        self.guard.lock().await
    }

    /// Whether an update currently holds the ledger.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.guard.try_lock().is_err()
    }
}

#[derive(Debug)]
struct Slot {
    state: Arc<ConversationEditState>,
    tick: u64,
    last_updated: Instant,
    lifetime: Duration,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_updated) > self.lifetime
    }
}

#[derive(Debug, Default)]
struct Registry {
    entries: HashMap<ConversationKey, Slot>,
    recency: BTreeMap<u64, ConversationKey>,
    next_tick: u64,
}

impl Registry {
    fn bump_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn live(&self, key: &ConversationKey, now: Instant) -> Option<Arc<ConversationEditState>> {
        self.entries
            .get(key)
            .filter(|slot| !slot.is_expired(now) || slot.state.is_busy())
            .map(|slot| Arc::clone(&slot.state))
    }

    fn promote(&mut self, key: &ConversationKey, now: Instant) -> bool {
        let tick = self.bump_tick();
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        slot.last_updated = now;
        self.recency.insert(tick, key.clone());
        true
    }

    fn insert(
        &mut self,
        key: ConversationKey,
        state: Arc<ConversationEditState>,
        now: Instant,
        lifetime: Duration,
    ) {
        self.remove(&key);
        let tick = self.bump_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            Slot {
                state,
                tick,
                last_updated: now,
                lifetime,
            },
        );
    }

    fn remove(&mut self, key: &ConversationKey) -> bool {
        match self.entries.remove(key) {
            Some(slot) => {
                self.recency.remove(&slot.tick);
                true
            }
            None => false,
        }
    }

    fn evict_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<ConversationKey> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_expired(now) && !slot.state.is_busy())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
            debug!(conversation = %key, "Expired reply tracker entry");
        }
        expired.len()
    }

    /// Evict idle entries, oldest first, until `capacity` is met. `keep` is
    /// the entry just inserted.
    fn evict_lru(&mut self, capacity: usize, keep: Option<&ConversationKey>) -> usize {
        let excess = self.entries.len().saturating_sub(capacity);
        if excess == 0 {
            return 0;
        }

        let victims: Vec<ConversationKey> = self
            .recency
            .values()
            .filter(|key| Some(*key) != keep)
            .filter(|key| {
                self.entries
                    .get(*key)
                    .is_some_and(|slot| !slot.state.is_busy())
            })
            .take(excess)
            .cloned()
            .collect();

        for key in &victims {
            self.remove(key);
            debug!(conversation = %key, "Evicted least recently used reply tracker entry");
        }
        if self.entries.len() > capacity {
            debug!(
                entries = self.entries.len(),
                capacity, "Reply tracker over capacity while updates are in flight"
            );
        }
        victims.len()
    }
}

/// Registry of conversations currently being streamed into Slack.
///
/// Create one per process and share it as `Arc<EditTracker>`.
#[derive(Debug)]
pub struct EditTracker {
    config: TrackerConfig,
    registry: Mutex<Registry>,
}

impl Default for EditTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl EditTracker {
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a freshly posted root message, replacing any stale
    /// entry under the same key.
    pub fn register(
        &self,
        key: ConversationKey,
        thread_ts: Option<String>,
        root_text: Option<String>,
    ) -> Arc<ConversationEditState> {
        let now = Instant::now();
        let state = Arc::new(ConversationEditState::new(key.clone(), thread_ts, root_text));

        let mut registry = self.registry();
        registry.evict_expired(now);
        registry.insert(key.clone(), Arc::clone(&state), now, self.config.ttl);
        registry.evict_lru(self.config.capacity, Some(&key));
        state
    }

    /// Live state for `key`, or a new entry seeded with the root message id
    /// when the key is unknown or its entry has expired.
    pub fn get_or_create(&self, key: &ConversationKey) -> Arc<ConversationEditState> {
        let now = Instant::now();
        let mut registry = self.registry();

        if registry.entries.len() > self.config.capacity / 2 {
            registry.evict_expired(now);
        }

        if let Some(state) = registry.live(key, now) {
            registry.promote(key, now);
            return state;
        }

        let state = Arc::new(ConversationEditState::new(key.clone(), None, None));
        registry.remove(key);
        registry.evict_expired(now);
        registry.insert(key.clone(), Arc::clone(&state), now, self.config.ttl);
        registry.evict_lru(self.config.capacity, Some(key));
        debug!(conversation = %key, "Created reply tracker entry");
        state
    }

    /// Check that `state`, whose ledger the caller has just locked, is still
    /// the entry registered for its key.
    ///
    /// Returns the entry that replaced it, if another caller created or
    /// registered one in the meantime; the caller should release its lock and
    /// continue with that one. An entry that was evicted with no replacement
    /// is put back and `None` is returned.
    pub fn reattach(
        &self,
        state: &Arc<ConversationEditState>,
    ) -> Option<Arc<ConversationEditState>> {
        let now = Instant::now();
        let key = state.key();
        let mut registry = self.registry();

        if let Some(current) = registry.live(key, now) {
            return (!Arc::ptr_eq(&current, state)).then_some(current);
        }

        registry.insert(key.clone(), Arc::clone(state), now, self.config.ttl);
        registry.evict_lru(self.config.capacity, Some(key));
        debug!(conversation = %key, "Re-registered evicted reply tracker entry");
        None
    }

    /// Live state for `key` without creating one. Promotes on hit.
    pub fn get(&self, key: &ConversationKey) -> Option<Arc<ConversationEditState>> {
        let now = Instant::now();
        let mut registry = self.registry();
        let state = registry.live(key, now)?;
        registry.promote(key, now);
        Some(state)
    }

    /// Refresh `last_updated` and move the entry to the most recently used
    /// position. Returns `false` when the key is not tracked.
    pub fn touch(&self, key: &ConversationKey) -> bool {
        let now = Instant::now();
        let mut registry = self.registry();
        if registry.live(key, now).is_none() {
            return false;
        }
        registry.promote(key, now)
    }

    /// Keep a finished conversation around only for the grace window, long
    /// enough to absorb a trailing correction without re-creating the entry.
    pub fn mark_completed(&self, key: &ConversationKey) -> bool {
        let now = Instant::now();
        let mut registry = self.registry();
        let grace = self.config.grace;
        match registry.entries.get_mut(key) {
            Some(slot) => {
                slot.last_updated = now;
                slot.lifetime = grace.min(slot.lifetime);
                true
            }
            None => false,
        }
    }

    /// Drop every entry idle for longer than its lifetime.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        self.registry().evict_expired(now)
    }

    /// Drop least recently used entries until the registry fits its capacity.
    pub fn evict_lru_if_over_capacity(&self) -> usize {
        self.registry().evict_lru(self.config.capacity, None)
    }

    /// Whether `key` has a live entry. Does not affect recency.
    #[must_use]
    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.registry().live(key, Instant::now()).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the message ids tracked for `key`, if any.
    pub async fn message_ids(&self, key: &ConversationKey) -> Option<Vec<String>> {
        let state = self.registry().live(key, Instant::now())?;
        let ledger = state.lock().await;
        Some(ledger.message_ids().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: usize) -> ConversationKey {
        ConversationKey::new("C1", format!("1700000000.{n:06}"))
    }

    #[test]
    fn recency_order_tracks_promotions() {
        let tracker = EditTracker::new(TrackerConfig {
            capacity: 10,
            ..TrackerConfig::default()
        });
        tracker.get_or_create(&key(1));
        tracker.get_or_create(&key(2));
        tracker.touch(&key(1));

        let registry = tracker.registry();
        let order: Vec<_> = registry.recency.values().cloned().collect();
        assert_eq!(order, vec![key(2), key(1)]);
        assert_eq!(registry.entries.len(), registry.recency.len());
    }

    #[test]
    fn register_replaces_existing_entry() {
        let tracker = EditTracker::default();
        let first = tracker.get_or_create(&key(1));
        let second = tracker.register(key(1), Some("1699999999.000001".into()), None);

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.registry().recency.len(), 1);
    }

    #[tokio::test]
    async fn seeded_ledger_holds_root_message() {
        let tracker = EditTracker::default();
        let state = tracker.get_or_create(&key(7));
        let ledger = state.lock().await;
        assert_eq!(ledger.message_ids(), &[key(7).root_ts]);
        assert!(ledger.thread_ts().is_none());
        assert!(ledger.rendered(0).is_none());
    }
}
