//! Durable CRUD for book records.
//!
//! Every mutating call is a single transaction: it either commits in full or
//! returns a storage error with nothing visible.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db;
use crate::error::{CatalogError, Result};
use crate::models::{Book, BookStatus};

/// Storage backend for books.
pub trait BookStore {
    /// Inserts `book` under a freshly assigned id and returns that id. The
    /// record's own `id` is ignored.
    fn add(&mut self, book: &Book) -> Result<i64>;

    /// Inserts or fully replaces the record with `book.id`.
    fn put(&mut self, book: &Book) -> Result<()>;

    /// Removes the record. Unknown ids are not an error.
    fn delete(&mut self, id: i64) -> Result<()>;

    fn get(&self, id: i64) -> Result<Option<Book>>;

    /// Every record in storage order (ascending id).
    fn get_all(&self) -> Result<Vec<Book>>;

    fn clear(&mut self) -> Result<()>;
}

// MARK: - In-Memory Store

/// Vector-backed store for tests and scratch sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    books: Vec<Book>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            books: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    fn position(&self, id: i64) -> std::result::Result<usize, usize> {
        self.books.binary_search_by_key(&id, |book| book.id)
    }
}

impl BookStore for MemoryStore {
    fn add(&mut self, book: &Book) -> Result<i64> {
        let id = self.next_id.max(1);
        if self.position(id).is_ok() {
            return Err(CatalogError::validation("no book ids left"));
        }
        self.next_id = id.saturating_add(1);
        let mut stored = book.clone();
        stored.id = id;
        self.books.push(stored);
        Ok(id)
    }

    fn put(&mut self, book: &Book) -> Result<()> {
        match self.position(book.id) {
            Ok(index) => self.books[index] = book.clone(),
            Err(index) => {
                self.books.insert(index, book.clone());
                self.next_id = self.next_id.max(book.id.saturating_add(1));
            }
        }
        Ok(())
    }

    fn delete(&mut self, id: i64) -> Result<()> {
        if let Ok(index) = self.position(id) {
            self.books.remove(index);
        }
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<Book>> {
        Ok(self.position(id).ok().map(|index| self.books[index].clone()))
    }

    fn get_all(&self) -> Result<Vec<Book>> {
        Ok(self.books.clone())
    }

    fn clear(&mut self) -> Result<()> {
        self.books.clear();
        Ok(())
    }
}

// MARK: - SQLite Store

const BOOK_COLUMNS: &str = "id, title, author, isbn, location, notes, tags, status, \
    lent_to, lend_date, due_date, cover_url, created_at, updated_at";

/// SQLite-backed store. Ids come from an AUTOINCREMENT key, so they are never
/// reused even after `delete` or `clear`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = db::init_db(path.as_ref())?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = db::init_in_memory()?;
        Ok(Self { conn })
    }

    fn write_book(conn: &Connection, book: &Book, with_id: bool) -> Result<()> {
        let tags = serde_json::to_string(&book.tags)?;
        let id = if with_id { Some(book.id) } else { None };
        conn.execute(
            "INSERT INTO books (id, title, author, isbn, location, notes, tags, status, \
                lent_to, lend_date, due_date, cover_url, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
             ON CONFLICT(id) DO UPDATE SET \
                title = excluded.title, \
                author = excluded.author, \
                isbn = excluded.isbn, \
                location = excluded.location, \
                notes = excluded.notes, \
                tags = excluded.tags, \
                status = excluded.status, \
                lent_to = excluded.lent_to, \
                lend_date = excluded.lend_date, \
                due_date = excluded.due_date, \
                cover_url = excluded.cover_url, \
                created_at = excluded.created_at, \
                updated_at = excluded.updated_at",
            params![
                id,
                book.title,
                book.author,
                book.isbn,
                book.location,
                book.notes,
                tags,
                book.status.as_str(),
                book.lent_to,
                book.lend_date.map(|value| value.timestamp_millis()),
                book.due_date.map(|value| value.timestamp_millis()),
                book.cover_url,
                book.created_at.timestamp_millis(),
                book.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

impl BookStore for SqliteStore {
    fn add(&mut self, book: &Book) -> Result<i64> {
        let tx = self.conn.transaction()?;
        Self::write_book(&tx, book, false)?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn put(&mut self, book: &Book) -> Result<()> {
        let tx = self.conn.transaction()?;
        Self::write_book(&tx, book, true)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM books WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<Book>> {
        let book = self
            .conn
            .query_row(
                &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
                params![id],
                book_from_row,
            )
            .optional()?;
        Ok(book)
    }

    fn get_all(&self) -> Result<Vec<Book>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM books ORDER BY id", BOOK_COLUMNS))?;
        let rows = stmt.query_map([], book_from_row)?;
        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }

    fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM books", [])?;
        tx.commit()?;
        Ok(())
    }
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    let tags: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        isbn: row.get(3)?,
        location: row.get(4)?,
        notes: row.get(5)?,
        tags: serde_json::from_str(&tags)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err)))?,
        status: status
            .parse::<BookStatus>()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(err)))?,
        lent_to: row.get(8)?,
        lend_date: optional_millis(row, 9)?,
        due_date: optional_millis(row, 10)?,
        cover_url: row.get(11)?,
        created_at: millis(row, 12)?,
        updated_at: millis(row, 13)?,
    })
}

fn millis(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: i64 = row.get(index)?;
    DateTime::from_timestamp_millis(value)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(index, value))
}

fn optional_millis(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<i64> = row.get(index)?;
    value
        .map(|value| {
            DateTime::from_timestamp_millis(value)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(index, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timestamp_now;

    fn book(title: &str) -> Book {
        Book {
            title: title.to_string(),
            tags: vec!["sf".to_string(), "classic".to_string()],
            ..Book::blank(0, timestamp_now())
        }
    }

    fn exercise_contract(store: &mut dyn BookStore) {
        let first = store.add(&book("Dune")).unwrap();
        let second = store.add(&book("Solaris")).unwrap();
        assert!(second > first);

        let mut lent = store.get(first).unwrap().unwrap();
        assert_eq!(lent.tags, vec!["sf".to_string(), "classic".to_string()]);
        lent.status = BookStatus::Lent;
        lent.lent_to = Some("Alice".to_string());
        lent.due_date = Some(timestamp_now());
        store.put(&lent).unwrap();
        assert_eq!(store.get(first).unwrap(), Some(lent.clone()));

        let titles: Vec<String> = store.get_all().unwrap().into_iter().map(|b| b.title).collect();
        assert_eq!(titles, vec!["Dune".to_string(), "Solaris".to_string()]);

        store.delete(first).unwrap();
        store.delete(first).unwrap();
        assert_eq!(store.get(first).unwrap(), None);

        store.clear().unwrap();
        assert!(store.get_all().unwrap().is_empty());

        let third = store.add(&book("Ubik")).unwrap();
        assert!(third > second, "ids must not be reused after clear");
    }

    #[test]
    fn memory_store_honours_the_contract() {
        let mut store = MemoryStore::new();
        exercise_contract(&mut store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sqlite_store_honours_the_contract() {
        let mut store = SqliteStore::in_memory().unwrap();
        exercise_contract(&mut store);
    }

    #[test]
    fn put_with_unknown_id_inserts() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut record = book("Kindred");
        record.id = 42;
        store.put(&record).unwrap();
        assert_eq!(store.get(42).unwrap().map(|b| b.title), Some("Kindred".to_string()));

        let next = store.add(&book("Dawn")).unwrap();
        assert!(next > 42);
    }

    #[test]
    fn memory_store_handles_the_largest_id() {
        let mut store = MemoryStore::new();
        let mut record = book("Last");
        record.id = i64::MAX;
        store.put(&record).unwrap();
        assert_eq!(store.get(i64::MAX).unwrap().map(|b| b.title), Some("Last".to_string()));

        assert!(matches!(store.add(&book("Overflow")), Err(CatalogError::Validation(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn records_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let id = {
            let mut store = SqliteStore::open(&path).unwrap();
            store.add(&book("Piranesi")).unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        let reopened = store.get(id).unwrap().unwrap();
        assert_eq!(reopened.title, "Piranesi");
        assert_eq!(reopened.status, BookStatus::Available);
    }
}
