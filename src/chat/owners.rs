use std::collections::HashMap;

use super::OwnerRef;
use crate::store::{Profile, StoreResult};

pub const UNKNOWN_OWNER: &str = "Unknown";
pub const LOADING_LABEL: &str = "loading...";
const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
enum OwnerName {
    Loading,
    Resolved(String),
}

/// Session-lifetime cache of owner display names.
#[derive(Debug, Clone)]
pub struct OwnerDirectory {
    names: HashMap<OwnerRef, OwnerName>,
    own_id: OwnerRef,
    own_name: String,
}

impl OwnerDirectory {
    pub fn new(own_id: OwnerRef, own_name: impl Into<String>) -> Self {
        Self {
            names: HashMap::new(),
            own_id,
            own_name: own_name.into(),
        }
    }

    /// Mark a lookup as started. Returns false when no request should be
    /// issued: the owner is us, already resolved, or already being resolved.
    pub fn begin_lookup(&mut self, owner: &OwnerRef) -> bool {
        if *owner == self.own_id || self.names.contains_key(owner) {
            return false;
        }
        self.names.insert(owner.clone(), OwnerName::Loading);
        true
    }

    pub fn finish_lookup(&mut self, owner: &OwnerRef, result: StoreResult<Profile>) {
        let name = match result {
            Ok(profile) if !profile.display_name.trim().is_empty() => {
                profile.display_name.trim().to_string()
            }
            _ => short_id(owner.as_str()),
        };
        self.names.insert(owner.clone(), OwnerName::Resolved(name));
    }

    pub fn display_name(&self, owner: Option<&OwnerRef>) -> String {
        let Some(owner) = owner else {
            return UNKNOWN_OWNER.to_string();
        };
        if *owner == self.own_id {
            return self.own_name.clone();
        }

        match self.names.get(owner) {
            Some(OwnerName::Resolved(name)) => name.clone(),
            Some(OwnerName::Loading) => LOADING_LABEL.to_string(),
            None => short_id(owner.as_str()),
        }
    }
}

pub fn short_id(raw: &str) -> String {
    raw.chars().take(SHORT_ID_LEN).collect()
}
