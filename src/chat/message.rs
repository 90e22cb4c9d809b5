use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque reference to a message author, resolved to a display name through
/// the store's profile lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerRef(pub String);

impl OwnerRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-local id given to a message before the store has confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempId(String);

impl TempId {
    /// Millisecond timestamp plus a random suffix, so two sends in the same
    /// millisecond still get distinct ids.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("local-{}-{}", now.timestamp_millis(), &random[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a message in the visible list. A pending key can never be
/// mistaken for a server id, whatever the strings look like.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Pending(TempId),
    Confirmed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: MessageKey,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub owner: Option<OwnerRef>,
}

impl Message {
    pub fn confirmed(
        id: impl Into<String>,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
        owner: Option<OwnerRef>,
    ) -> Self {
        Self {
            key: MessageKey::Confirmed(id.into()),
            text: text.into(),
            created_at,
            owner,
        }
    }

    pub fn pending(
        temp_id: TempId,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
        owner: Option<OwnerRef>,
    ) -> Self {
        Self {
            key: MessageKey::Pending(temp_id),
            text: text.into(),
            created_at,
            owner,
        }
    }

    pub fn id(&self) -> &str {
        match &self.key {
            MessageKey::Pending(temp_id) => temp_id.as_str(),
            MessageKey::Confirmed(id) => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }

    pub fn server_id(&self) -> Option<&str> {
        match &self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        match &self.key {
            MessageKey::Pending(temp_id) => Some(temp_id),
            MessageKey::Confirmed(_) => None,
        }
    }
}
