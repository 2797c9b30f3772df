//! Core types: providers, entries, events, links, credentials, time windows

pub mod credential;
pub mod entry;
pub mod event;
pub mod link;
pub mod provider;
pub mod time;
pub mod tracing;

pub use credential::CredentialRecord;
pub use entry::{EntrySource, LocalEntry, UnknownSource};
pub use event::{ExternalEvent, UNTITLED_EVENT};
pub use link::SyncLink;
pub use provider::{ProviderKind, UnknownProvider};
pub use time::{DEFAULT_WINDOW_DAYS, TimeWindow, TimeWindowError};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
