use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::models::BookDraft;
use crate::settings::LookupSettings;

const OPEN_LIBRARY_MAX_AUTHORS: usize = 3;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("invalid ISBN '{0}': expected 10 or 13 digits")]
    InvalidIsbn(String),

    #[error("no metadata found for ISBN {0}")]
    NotFound(String),

    #[error("metadata service unreachable: {0}")]
    Unreachable(String),
}

/// What a metadata source knows about an ISBN.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub cover_url: Option<String>,
    pub isbn: String,
}

/// External metadata source keyed by ISBN.
pub trait MetadataLookup {
    fn lookup(&self, isbn: &str) -> Result<BookMetadata, LookupError>;
}

/// Keeps digits and `X`, uppercased. Valid only when exactly 10 or 13
/// characters remain; no checksum is applied.
pub fn sanitize_isbn(raw: &str) -> Option<String> {
    let cleaned = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == 'X' || *ch == 'x')
        .map(|ch| ch.to_ascii_uppercase())
        .collect::<String>();
    if cleaned.len() == 10 || cleaned.len() == 13 {
        Some(cleaned)
    } else {
        None
    }
}

/// Builds a draft for the add flow from looked-up metadata. Invalid ISBNs are
/// rejected before the lookup is attempted.
pub fn prefill_draft(lookup: &dyn MetadataLookup, raw_isbn: &str) -> Result<BookDraft, LookupError> {
    let isbn = sanitize_isbn(raw_isbn).ok_or_else(|| LookupError::InvalidIsbn(raw_isbn.to_string()))?;
    let metadata = lookup.lookup(&isbn)?;
    log::info!("prefilled draft for isbn {}: {}", isbn, metadata.title);
    Ok(BookDraft {
        title: metadata.title,
        author: metadata.authors.join(", "),
        isbn: if metadata.isbn.is_empty() { isbn } else { metadata.isbn },
        cover_url: metadata.cover_url.unwrap_or_default(),
        ..BookDraft::default()
    })
}

/// Open Library client with an optional Google Books fallback.
pub struct OpenLibraryLookup {
    client: Client,
    google_fallback: bool,
}

impl OpenLibraryLookup {
    pub fn new(settings: &LookupSettings) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|err| LookupError::Unreachable(err.to_string()))?;
        Ok(Self {
            client,
            google_fallback: settings.google_fallback,
        })
    }

    /// `Ok(None)` for a 404, which the services use for unknown ISBNs.
    fn fetch_json(&self, url: &str) -> Result<Option<Value>, LookupError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(|err| {
                log::warn!("metadata request failed for {}: {}", url, err);
                LookupError::Unreachable(err.to_string())
            })?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            log::warn!("metadata request returned {} for {}", status, url);
            return Err(LookupError::Unreachable(format!("{} returned {}", url, status)));
        }
        response
            .json::<Value>()
            .map(Some)
            .map_err(|err| LookupError::Unreachable(err.to_string()))
    }

    fn fetch_openlibrary(&self, isbn: &str) -> Result<Option<BookMetadata>, LookupError> {
        let url = format!("https://openlibrary.org/isbn/{}.json", isbn);
        let data = match self.fetch_json(&url)? {
            Some(value) => value,
            None => return Ok(None),
        };
        let (title, author_keys) = match parse_openlibrary_edition(&data) {
            Some(value) => value,
            None => return Ok(None),
        };

        let mut authors = Vec::new();
        for key in author_keys.iter().take(OPEN_LIBRARY_MAX_AUTHORS) {
            let author_url = format!("https://openlibrary.org{}.json", key);
            match self.fetch_json(&author_url) {
                Ok(Some(author)) => {
                    if let Some(name) = author.get("name").and_then(|value| value.as_str()) {
                        authors.push(name.to_string());
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("author lookup failed for {}: {}", key, err),
            }
        }

        Ok(Some(BookMetadata {
            title,
            authors,
            cover_url: Some(format!("https://covers.openlibrary.org/b/isbn/{}-M.jpg", isbn)),
            isbn: isbn.to_string(),
        }))
    }

    fn fetch_google(&self, isbn: &str) -> Result<Option<BookMetadata>, LookupError> {
        let url = format!("https://www.googleapis.com/books/v1/volumes?q=isbn:{}", isbn);
        Ok(self
            .fetch_json(&url)?
            .and_then(|data| parse_google_volumes(&data, isbn)))
    }
}

impl MetadataLookup for OpenLibraryLookup {
    fn lookup(&self, isbn: &str) -> Result<BookMetadata, LookupError> {
        let isbn = sanitize_isbn(isbn).ok_or_else(|| LookupError::InvalidIsbn(isbn.to_string()))?;

        match self.fetch_openlibrary(&isbn) {
            Ok(Some(metadata)) => return Ok(metadata),
            Ok(None) => log::info!("open library has no record for {}", isbn),
            Err(err) if self.google_fallback => {
                log::warn!("open library lookup failed for {}: {}", isbn, err)
            }
            Err(err) => return Err(err),
        }

        if self.google_fallback {
            if let Some(metadata) = self.fetch_google(&isbn)? {
                return Ok(metadata);
            }
        }
        Err(LookupError::NotFound(isbn))
    }
}

/// Title and author keys (`/authors/OL..A`) from an Open Library edition.
fn parse_openlibrary_edition(data: &Value) -> Option<(String, Vec<String>)> {
    let title = data
        .get("title")
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())?
        .to_string();
    let author_keys = data
        .get("authors")
        .and_then(|value| value.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|entry| entry.get("key").and_then(|value| value.as_str()))
                .map(|key| key.to_string())
                .collect()
        })
        .unwrap_or_default();
    Some((title, author_keys))
}

/// First usable volume from a Google Books search response.
fn parse_google_volumes(data: &Value, isbn: &str) -> Option<BookMetadata> {
    let items = data.get("items").and_then(|value| value.as_array())?;
    items.iter().find_map(|item| {
        let info = item.get("volumeInfo")?;
        let title = info
            .get("title")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())?
            .to_string();
        let authors = info
            .get("authors")
            .and_then(|value| value.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default();
        let cover_url = info
            .get("imageLinks")
            .and_then(|value| value.get("thumbnail").or_else(|| value.get("smallThumbnail")))
            .and_then(|value| value.as_str())
            .map(|value| value.replace("http://", "https://"));
        Some(BookMetadata {
            title,
            authors,
            cover_url,
            isbn: isbn.to_string(),
        })
    })
}
