//! CalendarAdapter trait and implementations.
//!
//! - [`CalendarAdapter`] - windowed listing and create/update/delete against a
//!   provider calendar
//! - [`TokenRefresher`] / [`OAuthClient`] - OAuth token endpoint calls
//! - [`ProviderError`] - classified failures driving retry and skip decisions
//!
//! ```text
//! ┌──────────────────┐    ┌────────────────────┐
//! │ Google Calendar  │    │  Microsoft Graph   │
//! └────────┬─────────┘    └─────────┬──────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌──────────────────┐    ┌──────────────────────────┐
//! │ GoogleCalendar-  │    │ MicrosoftCalendar-       │
//! │ Adapter          │    │ Adapter                  │
//! └────────┬─────────┘    └─────────┬────────────────┘
//!          │    CalendarAdapter     │
//!          └───────────┬────────────┘
//!                      ▼
//!               ExternalEvent
//! ```

pub mod adapter;
pub mod error;
pub mod google;
pub mod http;
pub mod microsoft;
pub mod oauth;

pub use adapter::{
    BoxFuture, CalendarAdapter, CalendarInfo, CreatedEvent, EventListing, MalformedItem,
    TokenRefresher, TokenSet, all_day_span,
};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use google::{GoogleCalendarAdapter, GoogleConfig};
pub use microsoft::{MicrosoftCalendarAdapter, MicrosoftConfig};
pub use oauth::{OAuthClient, OAuthCredentials, OAuthEndpoints};
