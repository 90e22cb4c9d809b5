use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{MessageStore, Profile, StoreError, StoreResult};
use crate::chat::{Clock, Message, OwnerRef};

/// In-process message store. Backs `--offline` mode and the tests.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct MemoryState {
    // Oldest first, as appended.
    messages: Vec<Message>,
    profiles: HashMap<OwnerRef, String>,
    next_id: u64,
    list_failure: Option<StoreError>,
    append_failure: Option<StoreError>,
    calls: StoreCalls,
}

/// Request counters, for asserting on what reached the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub list: usize,
    pub append: usize,
    pub profile: usize,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    pub fn insert_profile(&self, owner: OwnerRef, display_name: impl Into<String>) {
        self.lock().profiles.insert(owner, display_name.into());
    }

    /// Add a message as if another client had sent it.
    pub fn seed(&self, text: &str, owner: Option<OwnerRef>) -> Message {
        let created_at = self.clock.now();
        let mut state = self.lock();
        let message = Message::confirmed(state.allocate_id(), text, created_at, owner);
        state.messages.push(message.clone());
        message
    }

    #[cfg(test)]
    pub fn fail_lists(&self, failure: Option<StoreError>) {
        self.lock().list_failure = failure;
    }

    #[cfg(test)]
    pub fn fail_next_append(&self, failure: StoreError) {
        self.lock().append_failure = Some(failure);
    }

    #[cfg(test)]
    pub fn calls(&self) -> StoreCalls {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("m{:08}", self.next_id)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<Message>> {
        let mut state = self.lock();
        state.calls.list += 1;
        if let Some(failure) = state.list_failure.clone() {
            return Err(failure);
        }

        Ok(state.messages.iter().rev().take(limit).cloned().collect())
    }

    async fn append(&self, text: &str, owner: &OwnerRef) -> StoreResult<Message> {
        let created_at = self.clock.now();
        let mut state = self.lock();
        state.calls.append += 1;
        if let Some(failure) = state.append_failure.take() {
            return Err(failure);
        }

        let message =
            Message::confirmed(state.allocate_id(), text, created_at, Some(owner.clone()));
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn get_profile(&self, owner: &OwnerRef) -> StoreResult<Profile> {
        let mut state = self.lock();
        state.calls.profile += 1;
        state
            .profiles
            .get(owner)
            .map(|name| Profile {
                display_name: name.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", owner)))
    }
}
