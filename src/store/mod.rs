use async_trait::async_trait;
use std::sync::Arc;

use crate::chat::{Message, OwnerRef};

pub use appwrite::{AppwriteClient, AppwriteStore};
pub use identity::Identity;
pub use memory::MemoryStore;

mod appwrite;
mod identity;
mod memory;

/// Failures a message store can report. None of them is fatal to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Transport or service failure; worth trying again later.
    #[error("message store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent messages, newest first.
    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<Message>>;

    /// Store a new message; the store assigns its id and creation time.
    async fn append(&self, text: &str, owner: &OwnerRef) -> StoreResult<Message>;

    async fn get_profile(&self, owner: &OwnerRef) -> StoreResult<Profile>;
}

/// Everything tied to one logged-in user. Dropping it ends the session.
#[derive(Clone)]
pub struct Session {
    pub identity: Identity,
    pub store: Arc<dyn MessageStore>,
}

impl Session {
    pub fn new(identity: Identity, store: Arc<dyn MessageStore>) -> Self {
        Self { identity, store }
    }
}
