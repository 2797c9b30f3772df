//! Google Calendar adapter.
//!
//! Events are listed with `singleEvents=true&showDeleted=true` so cancelled
//! instances come back with `status: "cancelled"` instead of disappearing.
//! All-day events use date-only `start.date`/`end.date` values; timed events
//! are written as UTC `dateTime` with `timeZone: "UTC"`.
//!
//! ```ignore
//! use calsync_providers::google::{GoogleCalendarAdapter, GoogleConfig};
//!
//! let adapter = GoogleCalendarAdapter::new(GoogleConfig::default())?;
//! let listing = adapter.list_events(&token, "primary", window).await?;
//! ```

mod client;
mod config;
mod wire;

pub use client::GoogleCalendarAdapter;
pub use config::{
    CALENDAR_API_BASE, GOOGLE_AUTH_URL, GOOGLE_SCOPE, GOOGLE_TOKEN_URL, GoogleConfig,
    PRIMARY_CALENDAR,
};
