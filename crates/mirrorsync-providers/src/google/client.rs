//! Google Calendar API client.
//!
//! Low-level HTTP access to the events collection: incremental listing with
//! sync tokens, insert/patch/delete of mirrors, and watch registration.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mirrorsync_core::{
    ChangedEvent, EventStatus, EventTime, EventType, MirrorBody, ResponseStatus,
};

use super::config::GoogleConfig;
use crate::channel::{CalendarRole, NotificationChannel};
use crate::credentials::CredentialProvider;
use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::{BoxFuture, CalendarMutator, ChangeFeed, ChangePage, ChangeQuery};

const PROVIDER_NAME: &str = "google";

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    config: GoogleConfig,
}

impl GoogleCalendarClient {
    /// Creates a new client that authenticates with `credentials`.
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        config: GoogleConfig,
    ) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                ProviderError::internal(format!("failed to create HTTP client: {}", e))
                    .with_provider(PROVIDER_NAME)
            })?;

        Ok(Self {
            http_client,
            credentials,
            config,
        })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.config.api_base,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    fn bearer(&self) -> ProviderResult<String> {
        self.credentials
            .access_token()
            .map_err(|e| e.with_provider(PROVIDER_NAME))
    }

    /// Fetches one page of changed events.
    ///
    /// Without a sync token this is part of a full listing, bounded by the
    /// configured lookback window. A 410 response means the sync token
    /// expired and is reported as [`ProviderErrorCode::InvalidSyncToken`].
    pub async fn list_changes_page(
        &self,
        calendar_id: &str,
        query: ChangeQuery<'_>,
    ) -> ProviderResult<ChangePage> {
        let request = self
            .http_client
            .get(self.events_url(calendar_id))
            .bearer_auth(self.bearer()?)
            .query(&list_params(&self.config, query));

        let response = match check_response(send(request).await?).await {
            Ok(response) => response,
            Err(e) if e.code() == ProviderErrorCode::Gone => {
                return Err(ProviderError::invalid_sync_token(
                    "sync token is no longer valid, full sync required",
                )
                .with_provider(PROVIDER_NAME));
            }
            Err(e) => return Err(e),
        };

        let list: EventListResponse = parse_json(response).await?;

        let counterpart = self.config.counterpart_calendar_id.as_deref();
        let events: Vec<ChangedEvent> = list
            .items
            .into_iter()
            .filter_map(|event| convert_event(event, calendar_id, counterpart))
            .collect();

        debug!(
            calendar = calendar_id,
            count = events.len(),
            more = list.next_page_token.is_some(),
            "fetched change page"
        );

        Ok(ChangePage {
            events,
            next_page_token: list.next_page_token,
            next_sync_token: list.next_sync_token,
        })
    }

    /// Inserts a new event and returns its id.
    pub async fn insert_event(&self, calendar_id: &str, body: &MirrorBody) -> ProviderResult<String> {
        let request = self
            .http_client
            .post(self.events_url(calendar_id))
            .bearer_auth(self.bearer()?)
            .query(&[("sendUpdates", self.config.send_updates.as_str())])
            .json(&ApiEventBody::from(body));

        let response = check_response(send(request).await?).await?;
        let created: ApiEventId = parse_json(response).await?;
        Ok(created.id)
    }

    /// Patches an existing event with the mirror body.
    pub async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        body: &MirrorBody,
    ) -> ProviderResult<()> {
        let request = self
            .http_client
            .patch(self.event_url(calendar_id, event_id))
            .bearer_auth(self.bearer()?)
            .query(&[("sendUpdates", self.config.send_updates.as_str())])
            .json(&ApiEventBody::from(body));

        check_response(send(request).await?).await?;
        Ok(())
    }

    /// Deletes an event.
    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> ProviderResult<()> {
        let request = self
            .http_client
            .delete(self.event_url(calendar_id, event_id))
            .bearer_auth(self.bearer()?)
            .query(&[("sendUpdates", self.config.send_updates.as_str())]);

        check_response(send(request).await?).await?;
        Ok(())
    }

    /// Registers a push notification channel on a calendar's events.
    pub async fn watch(
        &self,
        calendar_id: &str,
        channel_id: &str,
        address: &str,
        role: CalendarRole,
        ttl: Option<Duration>,
    ) -> ProviderResult<NotificationChannel> {
        let watch = WatchRequest {
            id: channel_id,
            kind: "web_hook",
            address,
            params: ttl.map(|ttl| WatchParams {
                ttl: ttl.as_secs().to_string(),
            }),
        };

        let request = self
            .http_client
            .post(format!("{}/watch", self.events_url(calendar_id)))
            .bearer_auth(self.bearer()?)
            .json(&watch);

        let response = check_response(send(request).await?).await?;
        let channel: WatchResponse = parse_json(response).await?;
        Ok(channel.into_channel(role))
    }
}

impl ChangeFeed for GoogleCalendarClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn list_changes<'a>(
        &'a self,
        calendar_id: &'a str,
        query: ChangeQuery<'a>,
    ) -> BoxFuture<'a, ProviderResult<ChangePage>> {
        Box::pin(self.list_changes_page(calendar_id, query))
    }
}

impl CalendarMutator for GoogleCalendarClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn insert<'a>(
        &'a self,
        calendar_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.insert_event(calendar_id, body))
    }

    fn patch<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
        body: &'a MirrorBody,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.patch_event(calendar_id, event_id, body))
    }

    fn delete<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.delete_event(calendar_id, event_id))
    }
}

/// Sends a request, mapping transport failures to network errors.
/// Query parameters for one `events.list` page.
///
/// The `timeMin` of a full listing is measured from `query.started_at`, so
/// continuation pages repeat the first page's window as the API requires.
fn list_params(config: &GoogleConfig, query: ChangeQuery<'_>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("maxResults", config.page_size.to_string()),
        ("showDeleted", "true".to_string()),
    ];

    match query.sync_token {
        Some(token) => params.push(("syncToken", token.to_string())),
        None => {
            if let Some(lookback) = config.full_sync_lookback {
                let time_min = query.started_at - lookback;
                params.push(("timeMin", time_min.to_rfc3339()));
            }
        }
    }

    if let Some(token) = query.page_token {
        params.push(("pageToken", token.to_string()));
    }
    params
}

async fn send(request: reqwest::RequestBuilder) -> ProviderResult<reqwest::Response> {
    request.send().await.map_err(|e| {
        let err = if e.is_timeout() {
            ProviderError::network("request timeout")
        } else if e.is_connect() {
            ProviderError::network(format!("connection failed: {}", e))
        } else {
            ProviderError::network(format!("request failed: {}", e))
        };
        err.with_provider(PROVIDER_NAME).with_source(e)
    })
}

/// Passes successful responses through and turns the rest into errors.
async fn check_response(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    Err(status_error(status, retry_after, &body))
}

/// Maps a non-success status to a provider error.
///
/// Google reports quota exhaustion as 403 with a `rateLimitExceeded` or
/// `userRateLimitExceeded` reason; those are retryable like 429.
fn status_error(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    use reqwest::StatusCode;

    let err = match status {
        StatusCode::BAD_REQUEST => ProviderError::bad_request(format!("bad request: {}", body)),
        StatusCode::UNAUTHORIZED => {
            ProviderError::authentication("access token expired or invalid")
        }
        StatusCode::FORBIDDEN if body.contains("ateLimitExceeded") => {
            ProviderError::rate_limited("calendar quota exceeded")
        }
        StatusCode::FORBIDDEN => ProviderError::authorization("access denied to calendar"),
        StatusCode::NOT_FOUND => ProviderError::not_found("event or calendar not found"),
        StatusCode::GONE => ProviderError::gone("resource has been deleted"),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(format!(
            "rate limit exceeded{}",
            retry_after
                .map(|d| format!(", retry after {} seconds", d.as_secs()))
                .unwrap_or_default()
        )),
        s if s.is_server_error() => ProviderError::server(format!("API error ({}): {}", s, body)),
        s => ProviderError::bad_request(format!("unexpected status ({}): {}", s, body)),
    };

    let err = err.with_provider(PROVIDER_NAME);
    match retry_after {
        Some(delay) => err.with_retry_after(delay),
        None => err,
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> ProviderResult<T> {
    let body = response.text().await.map_err(|e| {
        ProviderError::network(format!("failed to read response: {}", e)).with_provider(PROVIDER_NAME)
    })?;

    serde_json::from_str(&body).map_err(|e| {
        ProviderError::invalid_response(format!("failed to parse response: {}", e))
            .with_provider(PROVIDER_NAME)
    })
}

/// Converts an API event into a [`ChangedEvent`].
///
/// `self_calendar_id` identifies the source account among the attendees;
/// when it is not listed, the attendee flagged `self` is used instead.
/// Returns `None` (with a warning) for events that cannot be interpreted.
fn convert_event(
    event: ApiEvent,
    self_calendar_id: &str,
    counterpart_calendar_id: Option<&str>,
) -> Option<ChangedEvent> {
    let Some(id) = event.id else {
        warn!("skipping event without id");
        return None;
    };

    let start = match event.start.as_ref().map(parse_time).transpose() {
        Ok(start) => start,
        Err(e) => {
            warn!(event_id = %id, error = %e, "skipping event with invalid start");
            return None;
        }
    };
    let end = match event.end.as_ref().map(parse_time).transpose() {
        Ok(end) => end,
        Err(e) => {
            warn!(event_id = %id, error = %e, "skipping event with invalid end");
            return None;
        }
    };

    let attendees = event.attendees.unwrap_or_default();
    let self_response = response_where(&attendees, |a| email_is(a, self_calendar_id))
        .or_else(|| response_where(&attendees, |a| a.is_self.unwrap_or(false)))
        .unwrap_or_default();
    let counterpart_response = counterpart_calendar_id
        .and_then(|cid| response_where(&attendees, |a| email_is(a, cid)))
        .unwrap_or_default();

    Some(ChangedEvent {
        id,
        event_type: EventType::from_name(event.event_type.as_deref().unwrap_or_default()),
        status: EventStatus::from_name(event.status.as_deref().unwrap_or_default()),
        self_response,
        counterpart_response,
        has_attendees: !attendees.is_empty(),
        summary: event.summary,
        description: event.description,
        location: event.location,
        start,
        end,
        recurrence: event.recurrence.unwrap_or_default(),
        color_id: event.color_id,
    })
}

fn response_where(
    attendees: &[ApiAttendee],
    pred: impl Fn(&ApiAttendee) -> bool,
) -> Option<ResponseStatus> {
    attendees
        .iter()
        .find(|&a| pred(a))
        .and_then(|a| a.response_status.as_deref())
        .map(ResponseStatus::from_name)
}

fn email_is(attendee: &ApiAttendee, calendar_id: &str) -> bool {
    attendee
        .email
        .as_deref()
        .is_some_and(|email| email.eq_ignore_ascii_case(calendar_id))
}

fn parse_time(time: &ApiEventTime) -> Result<EventTime, String> {
    match (&time.date_time, &time.date) {
        (Some(dt), _) => {
            let at = DateTime::parse_from_rfc3339(dt).map_err(|e| format!("{}: {}", dt, e))?;
            let parsed = EventTime::at(at);
            Ok(match time.time_zone {
                Some(ref zone) => parsed.with_time_zone(zone),
                None => parsed,
            })
        }
        (None, Some(date)) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(EventTime::from_date)
            .map_err(|e| format!("{}: {}", date, e)),
        (None, None) => Err("neither dateTime nor date present".to_string()),
    }
}

fn format_time(time: &EventTime) -> ApiEventTime {
    match time {
        EventTime::DateTime { at, time_zone } => ApiEventTime {
            date: None,
            date_time: Some(at.to_rfc3339()),
            time_zone: time_zone.clone(),
        },
        EventTime::AllDay(date) => ApiEventTime {
            date: Some(date.format("%Y-%m-%d").to_string()),
            date_time: None,
            time_zone: None,
        },
    }
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

/// A single event from the Google Calendar API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    status: Option<String>,
    event_type: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    recurrence: Option<Vec<String>>,
    attendees: Option<Vec<ApiAttendee>>,
    color_id: Option<String>,
}

/// Event time, in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

/// Attendee from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAttendee {
    email: Option<String>,
    #[serde(rename = "self")]
    is_self: Option<bool>,
    response_status: Option<String>,
}

/// Request body for insert and patch.
///
/// Only the fields the mirror owns are sent; system fields (ids, etags,
/// organizer, iCalUID, sequence) are never copied.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventBody<'a> {
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<ApiEventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<ApiEventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recurrence: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color_id: Option<&'a str>,
}

impl<'a> From<&'a MirrorBody> for ApiEventBody<'a> {
    fn from(body: &'a MirrorBody) -> Self {
        Self {
            summary: &body.summary,
            description: body.description.as_deref(),
            location: body.location.as_deref(),
            start: body.start.as_ref().map(format_time),
            end: body.end.as_ref().map(format_time),
            recurrence: (!body.recurrence.is_empty()).then_some(body.recurrence.as_slice()),
            color_id: body.color_id.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEventId {
    id: String,
}

#[derive(Debug, Serialize)]
struct WatchRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<WatchParams>,
}

#[derive(Debug, Serialize)]
struct WatchParams {
    ttl: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    id: String,
    resource_id: String,
    /// Milliseconds since the epoch, as a string.
    expiration: Option<String>,
}

impl WatchResponse {
    fn into_channel(self, role: CalendarRole) -> NotificationChannel {
        let expiration = self
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        NotificationChannel {
            channel_id: self.id,
            resource_id: self.resource_id,
            calendar_role: role,
            expiration,
        }
    }
}
