use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CatalogError, Result};

/// Loan state of a single book.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    #[default]
    Available,
    Lent,
}

impl BookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::Lent => "lent",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookStatus {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(BookStatus::Available),
            "lent" => Ok(BookStatus::Lent),
            other => Err(CatalogError::validation(format!("unknown status '{}'", other))),
        }
    }
}

/// A catalog record. Field order matches the JSON export shape.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: BookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lent_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lend_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// An untitled, available record stamped at `now`. Used as the base when
    /// a patch has nothing to overlay onto.
    pub fn blank(id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: String::new(),
            author: None,
            isbn: None,
            location: None,
            notes: None,
            tags: vec![],
            status: BookStatus::Available,
            lent_to: None,
            lend_date: None,
            due_date: None,
            cover_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks the title and loan rules, clearing loan fields on available books.
    pub fn enforce_invariants(&mut self) -> Result<()> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(CatalogError::validation("title is required"));
        }
        match self.status {
            BookStatus::Available => {
                self.lent_to = None;
                self.lend_date = None;
                self.due_date = None;
            }
            BookStatus::Lent => {
                if self.lent_to.as_deref().map_or(true, |name| name.trim().is_empty()) {
                    return Err(CatalogError::validation("a lent book needs a borrower"));
                }
            }
        }
        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
        }
        Ok(())
    }
}

/// Form-style input for creating a book. Empty strings mean "not given".
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BookDraft {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub location: String,
    pub notes: String,
    /// Comma separated.
    pub tags: String,
    pub cover_url: String,
}

/// Partial update applied over an existing record.
///
/// Optional fields are tri-state: `None` leaves the existing value alone,
/// `Some(None)` clears it and `Some(Some(v))` overwrites it. When read from
/// JSON a missing key is `None` and an explicit `null` is `Some(None)`.
/// `title` cannot be cleared, so a `null` title is ignored.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub author: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub isbn: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub tags: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<BookStatus>,
    #[serde(default, deserialize_with = "present")]
    pub lent_to: Option<Option<String>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub lend_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub cover_url: Option<Option<String>>,
}

impl BookPatch {
    /// True when the patch sets the status or any loan field.
    pub fn touches_loan(&self) -> bool {
        self.status.is_some()
            || self.lent_to.is_some()
            || self.lend_date.is_some()
            || self.due_date.is_some()
    }

    /// Overlays the patch onto `book`; patch values win. Text is trimmed and
    /// blank text counts as a clear. Identity and timestamps are untouched.
    pub fn apply_to(self, book: &mut Book) {
        if let Some(title) = self.title {
            book.title = title.trim().to_string();
        }
        overlay_text(&mut book.author, self.author);
        overlay_text(&mut book.isbn, self.isbn);
        overlay_text(&mut book.location, self.location);
        overlay_text(&mut book.notes, self.notes);
        if let Some(tags) = self.tags {
            book.tags = tags.map(clean_tags).unwrap_or_default();
        }
        if let Some(status) = self.status {
            book.status = status;
        }
        overlay_text(&mut book.lent_to, self.lent_to);
        if let Some(lend_date) = self.lend_date {
            book.lend_date = lend_date;
        }
        if let Some(due_date) = self.due_date {
            book.due_date = due_date;
        }
        overlay_text(&mut book.cover_url, self.cover_url);
    }
}

/// Filters for listing. Empty strings and `None` disable a filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilters {
    pub search: String,
    /// Exact match against `location`.
    pub room: String,
    pub status: Option<BookStatus>,
}

/// Per-element tally of an import run.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub merged: usize,
    pub failed: usize,
}

/// Current time at millisecond precision, which is what the store keeps.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.with_timezone(&Utc).trunc_subsecs(3));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|value| value.and_utc())
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter().filter_map(non_empty).collect()
}

fn overlay_text(slot: &mut Option<String>, value: Option<Option<String>>) {
    if let Some(value) = value {
        *slot = value.and_then(non_empty);
    }
}

fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<Option<BookStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn lenient_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(Some(None)),
        Some(value) => parse_timestamp(value)
            .map(|parsed| Some(Some(parsed)))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", value))),
    }
}
