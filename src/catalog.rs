//! Domain operations over a [`BookStore`].
//!
//! The service owns a read-through cache of the whole collection. Reads fill
//! it from `get_all` on demand; every mutation drops it once the store call
//! has returned, so the next read sees committed state.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{CatalogError, Result};
use crate::filter;
use crate::models::{
    non_empty, timestamp_now, Book, BookDraft, BookPatch, BookStatus, ImportSummary, ListFilters,
};
use crate::store::BookStore;

enum ImportOutcome {
    Added,
    Merged,
}

pub struct CatalogService<S: BookStore> {
    store: S,
    cache: Option<Vec<Book>>,
}

impl<S: BookStore> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store, cache: None }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn books(&mut self) -> Result<&[Book]> {
        let books = match self.cache.take() {
            Some(books) => books,
            None => {
                let books = self.store.get_all()?;
                log::debug!("catalog cache refreshed with {} books", books.len());
                books
            }
        };
        Ok(self.cache.insert(books).as_slice())
    }

    fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Books passing `filters`, ordered by title with leading articles ignored.
    pub fn list(&mut self, filters: &ListFilters) -> Result<Vec<Book>> {
        let mut books: Vec<Book> = self
            .books()?
            .iter()
            .filter(|book| filter::matches(book, filters))
            .cloned()
            .collect();
        books.sort_by(|a, b| filter::compare_titles(&a.title, &b.title));
        Ok(books)
    }

    pub fn get(&mut self, id: i64) -> Result<Book> {
        self.books()?
            .iter()
            .find(|book| book.id == id)
            .cloned()
            .ok_or(CatalogError::NotFound(id))
    }

    /// Creates an available book from form input.
    pub fn add(&mut self, draft: BookDraft) -> Result<Book> {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(CatalogError::validation("title is required"));
        }

        let now = timestamp_now();
        let mut book = Book {
            title,
            author: non_empty(draft.author),
            isbn: non_empty(draft.isbn),
            location: non_empty(draft.location),
            notes: non_empty(draft.notes),
            tags: filter::parse_tag_list(&draft.tags),
            cover_url: non_empty(draft.cover_url),
            ..Book::blank(0, now)
        };
        book.id = self.store.add(&book)?;
        self.invalidate();
        log::info!("added book {}: {}", book.id, book.title);
        Ok(book)
    }

    /// Overlays `patch` onto the stored record. An unknown id starts from an
    /// empty record, so the patch must then carry a title. Status and loan
    /// fields only change through [`lend`](Self::lend) and
    /// [`return_book`](Self::return_book).
    pub fn edit(&mut self, id: i64, patch: BookPatch) -> Result<Book> {
        if patch.touches_loan() {
            return Err(CatalogError::validation(
                "status and loan fields change only through lend and return",
            ));
        }
        let now = timestamp_now();
        let mut book = self.store.get(id)?.unwrap_or_else(|| Book::blank(id, now));
        let created_at = book.created_at;

        patch.apply_to(&mut book);
        book.id = id;
        book.created_at = created_at;
        book.updated_at = now;
        book.enforce_invariants()?;

        self.store.put(&book)?;
        self.invalidate();
        log::info!("edited book {}: {}", id, book.title);
        Ok(book)
    }

    /// Marks an available book as lent. `lend_date` defaults to now.
    pub fn lend(
        &mut self,
        id: i64,
        lent_to: &str,
        lend_date: Option<DateTime<Utc>>,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Book> {
        let borrower = lent_to.trim();
        if borrower.is_empty() {
            return Err(CatalogError::validation("a borrower name is required"));
        }

        let mut book = self.existing(id)?;
        if book.status == BookStatus::Lent {
            return Err(CatalogError::InvalidTransition {
                id,
                status: book.status,
            });
        }

        let now = timestamp_now();
        book.status = BookStatus::Lent;
        book.lent_to = Some(borrower.to_string());
        book.lend_date = Some(lend_date.unwrap_or(now));
        book.due_date = due_date;
        book.updated_at = now;

        self.store.put(&book)?;
        self.invalidate();
        log::info!("lent book {} to {}", id, borrower);
        Ok(book)
    }

    /// Marks a lent book as available again and clears the loan fields.
    pub fn return_book(&mut self, id: i64) -> Result<Book> {
        let mut book = self.existing(id)?;
        if book.status == BookStatus::Available {
            return Err(CatalogError::InvalidTransition {
                id,
                status: book.status,
            });
        }

        book.status = BookStatus::Available;
        book.lent_to = None;
        book.lend_date = None;
        book.due_date = None;
        book.updated_at = timestamp_now();

        self.store.put(&book)?;
        self.invalidate();
        log::info!("book {} returned", id);
        Ok(book)
    }

    pub fn delete(&mut self, id: i64) -> Result<()> {
        self.store.delete(id)?;
        self.invalidate();
        log::info!("deleted book {}", id);
        Ok(())
    }

    /// The whole collection in storage order as a JSON array.
    pub fn export(&mut self) -> Result<Value> {
        Ok(serde_json::to_value(self.books()?)?)
    }

    pub fn export_to_path(&mut self, path: &Path) -> Result<usize> {
        let books = self.books()?;
        let count = books.len();
        let json = serde_json::to_string_pretty(books)?;
        fs::write(path, json)?;
        log::info!("exported {} books to {}", count, path.display());
        Ok(count)
    }

    /// Merges or inserts every element of a JSON array.
    ///
    /// Elements whose `id` matches a stored record are merged onto it; all
    /// others are inserted under a new id. Each element commits on its own,
    /// so a failure part way through leaves earlier elements in place.
    /// Failed elements are counted and skipped.
    pub fn import(&mut self, payload: &Value) -> Result<ImportSummary> {
        let elements = payload
            .as_array()
            .ok_or_else(|| CatalogError::ImportFormat("expected a JSON array of books".to_string()))?;

        let mut summary = ImportSummary::default();
        for (index, element) in elements.iter().enumerate() {
            let outcome = self.import_one(element);
            // The store may have committed before an error surfaced.
            self.invalidate();
            match outcome {
                Ok(ImportOutcome::Added) => summary.added += 1,
                Ok(ImportOutcome::Merged) => summary.merged += 1,
                Err(err) => {
                    log::warn!("import element {} skipped: {}", index, err);
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "import finished: {} added, {} merged, {} failed",
            summary.added,
            summary.merged,
            summary.failed
        );
        Ok(summary)
    }

    pub fn import_str(&mut self, raw: &str) -> Result<ImportSummary> {
        let payload: Value = serde_json::from_str(raw)
            .map_err(|err| CatalogError::ImportFormat(format!("not valid JSON: {}", err)))?;
        self.import(&payload)
    }

    pub fn import_from_path(&mut self, path: &Path) -> Result<ImportSummary> {
        let raw = fs::read_to_string(path)?;
        self.import_str(&raw)
    }

    fn import_one(&mut self, element: &Value) -> Result<ImportOutcome> {
        let object = element
            .as_object()
            .ok_or_else(|| CatalogError::validation("import element is not an object"))?;
        let id = object.get("id").and_then(Value::as_i64);
        let patch: BookPatch = serde_json::from_value(element.clone())?;
        let now = timestamp_now();

        if let Some(id) = id {
            if let Some(mut book) = self.store.get(id)? {
                patch.apply_to(&mut book);
                book.updated_at = now;
                book.enforce_invariants()?;
                self.store.put(&book)?;
                return Ok(ImportOutcome::Merged);
            }
        }

        let mut book = Book::blank(0, now);
        patch.apply_to(&mut book);
        book.enforce_invariants()?;
        self.store.add(&book)?;
        Ok(ImportOutcome::Added)
    }

    fn existing(&self, id: i64) -> Result<Book> {
        self.store.get(id)?.ok_or(CatalogError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> CatalogService<MemoryStore> {
        CatalogService::new(MemoryStore::new())
    }

    fn draft(title: &str) -> BookDraft {
        BookDraft {
            title: title.to_string(),
            ..BookDraft::default()
        }
    }

    #[test]
    fn add_trims_fields_and_forces_available() {
        let mut catalog = service();
        let book = catalog
            .add(BookDraft {
                title: "  Dune ".to_string(),
                author: " Frank Herbert ".to_string(),
                notes: "   ".to_string(),
                tags: "sf, classic, ,sf".to_string(),
                ..BookDraft::default()
            })
            .unwrap();

        assert_eq!(book.title, "Dune");
        assert_eq!(book.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(book.notes, None);
        assert_eq!(book.tags, vec!["sf", "classic", "sf"]);
        assert_eq!(book.status, BookStatus::Available);
        assert_eq!(book.created_at, book.updated_at);
    }

    #[test]
    fn add_rejects_blank_titles_before_touching_the_store() {
        let mut catalog = service();
        let result = catalog.add(draft("   "));
        assert!(matches!(result, Err(CatalogError::Validation(_))));
        assert!(catalog.store().is_empty());
    }

    #[test]
    fn list_reflects_mutations_through_the_cache() {
        let mut catalog = service();
        let dune = catalog.add(draft("Dune")).unwrap();
        assert_eq!(catalog.list(&ListFilters::default()).unwrap().len(), 1);

        catalog.add(draft("The Hobbit")).unwrap();
        catalog.delete(dune.id).unwrap();
        let titles: Vec<String> = catalog
            .list(&ListFilters::default())
            .unwrap()
            .into_iter()
            .map(|book| book.title)
            .collect();
        assert_eq!(titles, vec!["The Hobbit"]);
    }

    #[test]
    fn edit_preserves_identity_and_keeps_unspecified_fields() {
        let mut catalog = service();
        let original = catalog
            .add(BookDraft {
                title: "Dune".to_string(),
                author: "Frank Herbert".to_string(),
                ..BookDraft::default()
            })
            .unwrap();

        let edited = catalog
            .edit(
                original.id,
                BookPatch {
                    location: Some(Some("Study".to_string())),
                    ..BookPatch::default()
                },
            )
            .unwrap();

        assert_eq!(edited.id, original.id);
        assert_eq!(edited.created_at, original.created_at);
        assert!(edited.updated_at >= original.updated_at);
        assert_eq!(edited.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(edited.location.as_deref(), Some("Study"));
    }

    #[test]
    fn edit_of_unknown_id_needs_a_title() {
        let mut catalog = service();
        let result = catalog.edit(
            5,
            BookPatch {
                author: Some(Some("Nobody".to_string())),
                ..BookPatch::default()
            },
        );
        assert!(matches!(result, Err(CatalogError::Validation(_))));

        let created = catalog
            .edit(
                5,
                BookPatch {
                    title: Some("Kindred".to_string()),
                    ..BookPatch::default()
                },
            )
            .unwrap();
        assert_eq!(created.id, 5);
        assert_eq!(catalog.get(5).unwrap().title, "Kindred");
    }

    #[test]
    fn edit_cannot_change_loan_state() {
        let mut catalog = service();
        let book = catalog.add(draft("Dune")).unwrap();

        let result = catalog.edit(
            book.id,
            BookPatch {
                status: Some(BookStatus::Lent),
                lent_to: Some(Some("Mallory".to_string())),
                ..BookPatch::default()
            },
        );
        assert!(matches!(result, Err(CatalogError::Validation(_))));

        let result = catalog.edit(
            book.id,
            BookPatch {
                due_date: Some(None),
                ..BookPatch::default()
            },
        );
        assert!(matches!(result, Err(CatalogError::Validation(_))));

        let stored = catalog.get(book.id).unwrap();
        assert_eq!(stored.status, BookStatus::Available);
        assert_eq!(stored.lent_to, None);

        catalog.lend(book.id, "Alice", None, None).unwrap();
        let result = catalog.edit(
            book.id,
            BookPatch {
                status: Some(BookStatus::Available),
                ..BookPatch::default()
            },
        );
        assert!(matches!(result, Err(CatalogError::Validation(_))));
        assert_eq!(catalog.get(book.id).unwrap().status, BookStatus::Lent);
    }

    #[test]
    fn lend_and_return_walk_the_state_machine() {
        let mut catalog = service();
        let book = catalog.add(draft("Dune")).unwrap();

        let lent = catalog.lend(book.id, " Alice ", None, None).unwrap();
        assert_eq!(lent.status, BookStatus::Lent);
        assert_eq!(lent.lent_to.as_deref(), Some("Alice"));
        assert!(lent.lend_date.is_some());

        assert!(matches!(
            catalog.lend(book.id, "Bob", None, None),
            Err(CatalogError::InvalidTransition { .. })
        ));

        let returned = catalog.return_book(book.id).unwrap();
        assert_eq!(returned.status, BookStatus::Available);
        assert_eq!(returned.lent_to, None);
        assert_eq!(returned.lend_date, None);
        assert_eq!(returned.due_date, None);

        assert!(matches!(
            catalog.return_book(book.id),
            Err(CatalogError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn lend_requires_a_borrower_and_a_known_book() {
        let mut catalog = service();
        let book = catalog.add(draft("Dune")).unwrap();
        assert!(matches!(
            catalog.lend(book.id, "  ", None, None),
            Err(CatalogError::Validation(_))
        ));
        assert!(matches!(
            catalog.lend(99, "Alice", None, None),
            Err(CatalogError::NotFound(99))
        ));
        assert_eq!(catalog.get(book.id).unwrap().status, BookStatus::Available);
    }

    #[test]
    fn import_rejects_non_arrays() {
        let mut catalog = service();
        let result = catalog.import(&json!({ "title": "Dune" }));
        assert!(matches!(result, Err(CatalogError::ImportFormat(_))));
        assert!(matches!(catalog.import_str("not json"), Err(CatalogError::ImportFormat(_))));
    }

    #[test]
    fn import_tallies_failures_and_keeps_going() {
        let mut catalog = service();
        let summary = catalog
            .import(&json!([
                { "title": "Dune" },
                "not a book",
                { "author": "Untitled" },
                { "title": "Lent", "status": "lent" },
                { "title": "Bad date", "dueDate": "someday" },
                { "title": "Solaris", "tags": ["sf"] },
            ]))
            .unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                added: 2,
                merged: 0,
                failed: 4
            }
        );
        assert_eq!(catalog.list(&ListFilters::default()).unwrap().len(), 2);
    }

    #[test]
    fn import_merges_matching_ids_and_keeps_absent_fields() {
        let mut catalog = service();
        let book = catalog
            .add(BookDraft {
                title: "Dune".to_string(),
                author: "Frank Herbert".to_string(),
                notes: "first edition".to_string(),
                ..BookDraft::default()
            })
            .unwrap();

        let summary = catalog
            .import(&json!([{ "id": book.id, "location": "Study", "notes": null }]))
            .unwrap();
        assert_eq!(summary.merged, 1);

        let merged = catalog.get(book.id).unwrap();
        assert_eq!(merged.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(merged.location.as_deref(), Some("Study"));
        assert_eq!(merged.notes, None);
        assert_eq!(merged.created_at, book.created_at);
    }

    #[test]
    fn import_with_unknown_id_inserts_under_a_fresh_id() {
        let mut catalog = service();
        let summary = catalog.import(&json!([{ "id": 9999, "title": "X" }])).unwrap();
        assert_eq!(summary.added, 1);

        let books = catalog.list(&ListFilters::default()).unwrap();
        assert_eq!(books.len(), 1);
        assert_ne!(books[0].id, 9999);
        assert_eq!(books[0].status, BookStatus::Available);
    }

    #[test]
    fn importing_twice_without_ids_duplicates() {
        let mut catalog = service();
        let payload = json!([{ "title": "Dune" }]);
        catalog.import(&payload).unwrap();
        catalog.import(&payload).unwrap();
        assert_eq!(catalog.list(&ListFilters::default()).unwrap().len(), 2);
    }
}
