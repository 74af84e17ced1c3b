//! Paged change listing with retry.

use chrono::Utc;
use mirrorsync_core::ChangedEvent;
use mirrorsync_providers::{ChangeFeed, ChangeQuery, ProviderError, ProviderErrorCode};
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryPolicy;

/// All changes since a resume token, every page collected.
#[derive(Debug, Default)]
pub struct FeedBatch {
    /// Changed events in listing order.
    pub events: Vec<ChangedEvent>,
    /// Token to resume from once the batch has been applied.
    pub next_resume_token: Option<String>,
    /// Number of pages fetched.
    pub pages: usize,
}

/// Why a listing failed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The resume token is stale; the next listing must start from scratch.
    #[error("resume token expired")]
    Expired,
    /// A transient failure outlasted the retry policy.
    #[error("change listing failed after retries: {0}")]
    Transient(#[source] ProviderError),
    /// A failure retrying cannot fix (auth, permissions, bad request).
    #[error("change listing failed: {0}")]
    Fatal(#[source] ProviderError),
}

impl From<ProviderError> for FeedError {
    fn from(err: ProviderError) -> Self {
        if err.code() == ProviderErrorCode::InvalidSyncToken {
            Self::Expired
        } else if err.is_retryable() {
            Self::Transient(err)
        } else {
            Self::Fatal(err)
        }
    }
}

/// Fetches one logical batch of changes from a [`ChangeFeed`].
#[derive(Debug, Clone)]
pub struct FeedClient<F> {
    feed: F,
    retry: RetryPolicy,
}

impl<F: ChangeFeed> FeedClient<F> {
    /// Creates a feed client.
    pub fn new(feed: F, retry: RetryPolicy) -> Self {
        Self { feed, retry }
    }

    /// Lists every change since `resume_token`; `None` lists from scratch.
    ///
    /// Each page is retried on its own, so a transient failure on page three
    /// does not refetch pages one and two. All pages carry the instant the
    /// listing started.
    pub async fn fetch(
        &self,
        calendar_id: &str,
        resume_token: Option<&str>,
    ) -> Result<FeedBatch, FeedError> {
        let first = ChangeQuery::first(resume_token, Utc::now());
        let mut batch = FeedBatch::default();
        let mut page_token: Option<String> = None;

        loop {
            let query = first.at_page(page_token.as_deref());
            let page = self
                .retry
                .run("list_changes", || self.feed.list_changes(calendar_id, query))
                .await?;

            batch.pages += 1;
            let has_more = page.has_more();
            batch.events.extend(page.events);

            if has_more {
                page_token = page.next_page_token;
                continue;
            }
            match page.next_sync_token {
                Some(sync_token) => {
                    batch.next_resume_token = Some(sync_token);
                    break;
                }
                None => {
                    return Err(FeedError::Fatal(
                        ProviderError::invalid_response("listing ended without a sync token")
                            .with_provider(self.feed.name()),
                    ));
                }
            }
        }

        debug!(
            calendar_id,
            provider = self.feed.name(),
            pages = batch.pages,
            events = batch.events.len(),
            full_sync = resume_token.is_none(),
            "fetched changes"
        );
        Ok(batch)
    }
}
