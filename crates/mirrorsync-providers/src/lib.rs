//! Calendar read/mutation traits and the Google Calendar implementation.
//!
//! - [`ChangeFeed`] - lists changed events since a sync token
//! - [`CalendarMutator`] - writes mirror events into a calendar
//! - [`CredentialProvider`] - supplies access tokens per calendar role
//! - [`ProviderError`] - error taxonomy shared by all of the above
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────┐
//!            │  Google Calendar v3  │
//!            └──────────┬───────────┘
//!                       │
//!            ┌──────────▼───────────┐      ┌────────────────────┐
//!            │ GoogleCalendarClient │◀─────│ CredentialProvider │
//!            └──────────┬───────────┘      └────────────────────┘
//!          ChangeFeed   │   CalendarMutator
//!                       ▼
//!              mirrorsync-server
//! ```

pub mod channel;
pub mod credentials;
pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod provider;

pub use channel::{CalendarRole, NotificationChannel};
pub use credentials::{CredentialProvider, StaticToken, TokenFile, TokenInfo};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use provider::{BoxFuture, CalendarMutator, ChangeFeed, ChangePage, ChangeQuery};
