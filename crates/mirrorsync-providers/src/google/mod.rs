//! Google Calendar implementation.
//!
//! [`GoogleCalendarClient`] implements both [`ChangeFeed`](crate::ChangeFeed)
//! and [`CalendarMutator`](crate::CalendarMutator) on top of the Calendar v3
//! REST API:
//!
//! - incremental `events.list` with `syncToken`, deleted events included
//! - `events.insert` / `events.patch` / `events.delete` with `sendUpdates=none`
//! - `events.watch` to register a `web_hook` push channel
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mirrorsync_providers::{ChangeQuery, TokenFile, google::{GoogleCalendarClient, GoogleConfig}};
//!
//! let source = GoogleCalendarClient::new(
//!     Arc::new(TokenFile::new("source-token.json")),
//!     GoogleConfig::new().with_counterpart("me@home.example"),
//! )?;
//! let query = ChangeQuery::first(None, chrono::Utc::now());
//! let page = source.list_changes_page("me@work.example", query).await?;
//! ```

mod client;
mod config;

pub use client::GoogleCalendarClient;
pub use config::{CALENDAR_API_BASE, GoogleConfig, SendUpdates};
