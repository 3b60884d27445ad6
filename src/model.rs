//! Core data model.
//!
//! An interaction event is something a user did to a subject (an asset or an
//! experience) at some location. Once accepted it becomes a pending event:
//! stamped, keyed for dedup, and owned by the durable store of its category
//! until a flush delivers it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// The two independent event classes. Each has its own store, batch state,
/// and delivery sink; no record ever crosses categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Asset,
    Experience,
}

impl Category {
    /// Every category, in flush order.
    pub const ALL: [Category; 2] = [Category::Asset, Category::Experience];

    /// Name of the durable store backing this category.
    pub fn store_name(self) -> &'static str {
        match self {
            Category::Asset => "asset",
            Category::Experience => "experience",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.store_name())
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asset" => Ok(Category::Asset),
            "experience" => Ok(Category::Experience),
            _ => Err(Error::Other(format!("unknown category: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Click,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::View => "view",
            Action::Click => "click",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "view" => Ok(Action::View),
            "click" => Ok(Action::Click),
            _ => Err(Error::Other(format!("unknown action: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Interaction Event
// ---------------------------------------------------------------------------

/// A raw interaction as reported by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Asset URL for asset events, experience identifier for experience events.
    pub subject: String,

    pub action: Action,

    /// Where the interaction happened (page, surface, placement).
    #[serde(default)]
    pub location: Option<String>,

    /// Arbitrary event detail. The coordinator doesn't interpret this.
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl InteractionEvent {
    pub fn new(subject: impl Into<String>, action: Action) -> Self {
        Self {
            subject: subject.into(),
            action,
            location: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn asset_view(url: impl Into<String>) -> Self {
        Self::new(url, Action::View)
    }

    pub fn asset_click(url: impl Into<String>) -> Self {
        Self::new(url, Action::Click)
    }

    pub fn experience_view(id: impl Into<String>) -> Self {
        Self::new(id, Action::View)
    }

    pub fn experience_click(id: impl Into<String>) -> Self {
        Self::new(id, Action::Click)
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// Derive the dedup key for this event under `category`'s identity rules.
    ///
    /// Asset identity is the normalized URL, action and location. Experience
    /// identity is the experience id, action and location.
    pub fn dedup_key(&self, category: Category) -> String {
        let subject = match category {
            Category::Asset => normalize_asset_url(&self.subject),
            Category::Experience => self.subject.trim().to_string(),
        };
        let location = self.location.as_deref().map(str::trim).unwrap_or("");
        format!("{subject}|{}|{location}", self.action)
    }
}

/// Normalize an asset URL so trivially different spellings share identity.
///
/// Drops the fragment and query string, lowercases the scheme and host, and
/// strips a trailing `/` from any non-root path.
pub fn normalize_asset_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    let url = &trimmed[..end];

    let (authority_end, mut normalized) = match url.find("://") {
        Some(scheme_end) => {
            let host_start = scheme_end + 3;
            let host_end = url[host_start..]
                .find('/')
                .map(|i| host_start + i)
                .unwrap_or(url.len());
            (host_end, url[..host_end].to_ascii_lowercase())
        }
        None => (0, String::new()),
    };

    let path = &url[authority_end..];
    if path.len() > 1 && path.ends_with('/') {
        normalized.push_str(path.trim_end_matches('/'));
    } else {
        normalized.push_str(path);
    }
    normalized
}

// ---------------------------------------------------------------------------
// Pending Event
// ---------------------------------------------------------------------------

/// Newtype for pending event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// An accepted event awaiting delivery. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub id: EventId,
    pub category: Category,
    /// Identity for dedup, scoped to `category`.
    pub dedup_key: String,
    pub payload: InteractionEvent,
    /// When the event was accepted. Persisted with the record so recovery
    /// can reconstruct batch age.
    pub enqueued_at: DateTime<Utc>,
}

impl PendingEvent {
    pub fn new(category: Category, payload: InteractionEvent, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            category,
            dedup_key: payload.dedup_key(category),
            payload,
            enqueued_at,
        }
    }
}
