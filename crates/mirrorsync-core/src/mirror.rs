//! Mirror body policy.
//!
//! [`MirrorPolicy`] turns a source [`ChangedEvent`] into the [`MirrorBody`]
//! written to the target calendar. The transformation is idempotent: running
//! it over an already-mirrored title or description does not stack another
//! prefix or suffix.

use serde::{Deserialize, Serialize};

use crate::event::ChangedEvent;
use crate::time::EventTime;

/// Color id meaning "keep the target calendar's default color".
pub const NO_COLOR_OVERRIDE: &str = "0";

/// The event content written to the target calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorBody {
    /// Title, with the configured prefix.
    pub summary: String,
    /// Description, with the configured suffix.
    pub description: Option<String>,
    /// Location, copied verbatim.
    pub location: Option<String>,
    /// Start time, copied verbatim.
    pub start: Option<EventTime>,
    /// End time, copied verbatim.
    pub end: Option<EventTime>,
    /// Recurrence rules, copied verbatim.
    pub recurrence: Vec<String>,
    /// Color override; `None` keeps the target default.
    pub color_id: Option<String>,
}

/// How mirrors are decorated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorPolicy {
    prefix: String,
    suffix: String,
    color_id: Option<String>,
}

impl MirrorPolicy {
    /// Creates a policy that copies events unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the summary prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Builder method to set the description suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Builder method to set the color id.
    ///
    /// `"0"` and the empty string mean no override.
    pub fn with_color_id(mut self, color_id: impl Into<String>) -> Self {
        let color_id = color_id.into();
        let trimmed = color_id.trim();
        self.color_id = if trimmed.is_empty() || trimmed == NO_COLOR_OVERRIDE {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    /// Returns the configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the configured suffix.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Returns the color override, if any.
    pub fn color_id(&self) -> Option<&str> {
        self.color_id.as_deref()
    }

    /// Applies the prefix to a title.
    pub fn summary(&self, summary: &str) -> String {
        if self.prefix.is_empty() || summary.starts_with(&self.prefix) {
            return summary.to_string();
        }
        if summary.is_empty() {
            return self.prefix.clone();
        }
        format!("{} {}", self.prefix, summary)
    }

    /// Appends the suffix to a description, separated by a blank line.
    pub fn description(&self, description: Option<&str>) -> Option<String> {
        let description = description.unwrap_or_default();
        if self.suffix.is_empty() || description.contains(&self.suffix) {
            return (!description.is_empty()).then(|| description.to_string());
        }
        Some(format!("{}\n\n{}", description, self.suffix).trim().to_string())
    }

    /// Builds the mirror body for an event.
    pub fn render(&self, event: &ChangedEvent) -> MirrorBody {
        MirrorBody {
            summary: self.summary(event.summary.as_deref().unwrap_or_default()),
            description: self.description(event.description.as_deref()),
            location: event.location.clone(),
            start: event.start.clone(),
            end: event.end.clone(),
            recurrence: event.recurrence.clone(),
            color_id: self.color_id.clone(),
        }
    }
}
