//! Calendar read and mutation traits.
//!
//! The sync engine talks to calendars only through these two traits:
//!
//! - [`ChangeFeed`] lists events changed since a sync token, one page at a time
//! - [`CalendarMutator`] writes mirrors into the target calendar
//!
//! Both use [`BoxFuture`] so they stay object-safe and can be held as
//! `Arc<dyn ...>` by the engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mirrorsync_core::{ChangedEvent, MirrorBody};

use crate::error::ProviderResult;

/// A boxed future for async trait methods.
///
/// Using boxed futures allows the traits to be object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One page of a change listing.
#[derive(Debug, Default)]
pub struct ChangePage {
    /// Events changed on this page, deleted ones included as cancelled.
    pub events: Vec<ChangedEvent>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
    /// Sync token to resume from later; only present on the last page.
    pub next_sync_token: Option<String>,
}

impl ChangePage {
    /// Creates a page with the given events.
    pub fn with_events(events: Vec<ChangedEvent>) -> Self {
        Self {
            events,
            next_page_token: None,
            next_sync_token: None,
        }
    }

    /// Builder method to set the next page token.
    pub fn with_next_page(mut self, token: impl Into<String>) -> Self {
        self.next_page_token = Some(token.into());
        self
    }

    /// Builder method to set the next sync token.
    pub fn with_sync_token(mut self, token: impl Into<String>) -> Self {
        self.next_sync_token = Some(token.into());
        self
    }

    /// Returns true if more pages follow.
    pub fn has_more(&self) -> bool {
        self.next_page_token.is_some()
    }
}

/// Where one page request sits in a change listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeQuery<'a> {
    /// Resume point; `None` lists from scratch.
    pub sync_token: Option<&'a str>,
    /// Continuation token; `None` on the first page.
    pub page_token: Option<&'a str>,
    /// When the listing began. A full listing bounds its window relative to
    /// this instant, so every page asks for the same window.
    pub started_at: DateTime<Utc>,
}

impl<'a> ChangeQuery<'a> {
    /// First page of a listing resuming from `sync_token`.
    pub fn first(sync_token: Option<&'a str>, started_at: DateTime<Utc>) -> Self {
        Self {
            sync_token,
            page_token: None,
            started_at,
        }
    }

    /// The same listing, at `page_token`.
    pub fn at_page(self, page_token: Option<&'a str>) -> Self {
        Self { page_token, ..self }
    }
}

/// Lists changed events from a calendar.
///
/// # Implementation Notes
///
/// - Without a sync token the listing is a full snapshot
/// - Deleted events must be reported as cancelled, not omitted
/// - A stale sync token must fail with
///   [`ProviderErrorCode::InvalidSyncToken`](crate::ProviderErrorCode::InvalidSyncToken)
pub trait ChangeFeed: Send + Sync {
    /// Returns the name of this provider (e.g., "google").
    fn name(&self) -> &str;

    /// Fetches one page of changes.
    ///
    /// Pages after the first repeat the first page's query with its
    /// `page_token` set.
    fn list_changes<'a>(
        &'a self,
        calendar_id: &'a str,
        query: ChangeQuery<'a>,
    ) -> BoxFuture<'a, ProviderResult<ChangePage>>;
}

/// Writes events into a calendar.
pub trait CalendarMutator: Send + Sync {
    /// Returns the name of this provider (e.g., "google").
    fn name(&self) -> &str;

    /// Inserts a new event and returns its id.
    fn insert<'a>(
        &'a self,
        calendar_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<String>>;

    /// Overwrites the fields of an existing event.
    fn patch<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Deletes an event.
    ///
    /// Fails with a not-found or gone error if the event does not exist.
    fn delete<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;
}

impl<T: ChangeFeed + ?Sized> ChangeFeed for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_changes<'a>(
        &'a self,
        calendar_id: &'a str,
        query: ChangeQuery<'a>,
    ) -> BoxFuture<'a, ProviderResult<ChangePage>> {
        (**self).list_changes(calendar_id, query)
    }
}

impl<T: CalendarMutator + ?Sized> CalendarMutator for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn insert<'a>(
        &'a self,
        calendar_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        (**self).insert(calendar_id, body)
    }

    fn patch<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        (**self).patch(calendar_id, event_id, body)
    }

    fn delete<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        (**self).delete(calendar_id, event_id)
    }
}
