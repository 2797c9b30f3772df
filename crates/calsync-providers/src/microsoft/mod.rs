//! Microsoft Graph calendar adapter.
//!
//! Listings go through `calendarView` with `Prefer: outlook.timezone="UTC"`
//! and `Prefer: outlook.body-content-type="text"`, so every `dateTime` comes
//! back as UTC wall time and bodies as plain text. The pseudo calendar id
//! `"default"` addresses the mailbox's default calendar through `/me/events`
//! and `/me/calendarView`.

mod client;
mod config;
mod wire;

pub use client::MicrosoftCalendarAdapter;
pub use config::{
    DEFAULT_CALENDAR, GRAPH_API_BASE, MICROSOFT_AUTH_URL, MICROSOFT_SCOPE, MICROSOFT_TOKEN_URL,
    MicrosoftConfig,
};
