pub use clock::{Clock, SystemClock};
pub use message::{Message, OwnerRef, TempId};
pub use owners::LOADING_LABEL;
pub use synchronizer::{SyncConfig, SyncEvent, SyncHealth, Synchronizer};

#[cfg(test)]
pub use clock::ManualClock;

mod clock;
mod message;
mod owners;
mod synchronizer;
mod timeline;
