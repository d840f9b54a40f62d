//! Command-line front end. Each subcommand maps onto one catalog operation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::catalog::CatalogService;
use crate::error::CatalogError;
use crate::filter::parse_tag_list;
use crate::lookup::{prefill_draft, LookupError, OpenLibraryLookup};
use crate::models::{parse_timestamp, Book, BookDraft, BookPatch, BookStatus, ListFilters};
use crate::settings::Settings;
use crate::store::SqliteStore;

/// Personal library catalog.
#[derive(Debug, Parser)]
#[command(name = "catalog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database file. Overrides the config file and `CATALOG_DB`.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add a book.
    Add(AddArgs),
    /// Change fields of a book. An empty value clears the field.
    Edit(EditArgs),
    /// List books, optionally filtered.
    List(ListArgs),
    /// Show a single book.
    Show { id: i64 },
    /// Lend a book to someone.
    Lend(LendArgs),
    /// Mark a lent book as returned.
    Return { id: i64 },
    /// Delete a book.
    Delete { id: i64 },
    /// Write the collection as JSON to a file or stdout.
    Export { path: Option<PathBuf> },
    /// Merge a JSON export into the collection.
    Import { path: PathBuf },
    /// Look up metadata for an ISBN without saving anything.
    Lookup { isbn: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub author: Option<String>,
    #[arg(long)]
    pub isbn: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    /// Comma separated.
    #[arg(long)]
    pub tags: Option<String>,
    #[arg(long)]
    pub cover_url: Option<String>,
    /// Pre-fill missing fields from an online lookup of `--isbn`.
    #[arg(long, requires = "isbn")]
    pub lookup: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub author: Option<String>,
    #[arg(long)]
    pub isbn: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    /// Comma separated; replaces the existing tags.
    #[arg(long)]
    pub tags: Option<String>,
    #[arg(long)]
    pub cover_url: Option<String>,
}

impl EditArgs {
    fn into_patch(self) -> BookPatch {
        BookPatch {
            title: self.title,
            author: self.author.map(Some),
            isbn: self.isbn.map(Some),
            location: self.location.map(Some),
            notes: self.notes.map(Some),
            tags: self.tags.map(|raw| Some(parse_tag_list(&raw))),
            cover_url: self.cover_url.map(Some),
            ..BookPatch::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Case-insensitive text matched against title, author, ISBN and tags.
    #[arg(long, short = 's', default_value = "")]
    pub search: String,
    /// Exact location.
    #[arg(long, default_value = "")]
    pub room: String,
    #[arg(long, value_parser = parse_status)]
    pub status: Option<BookStatus>,
}

#[derive(Debug, Args)]
pub struct LendArgs {
    pub id: i64,
    /// Borrower.
    #[arg(long)]
    pub to: String,
    /// Defaults to now. RFC 3339 or YYYY-MM-DD.
    #[arg(long, value_parser = parse_date)]
    pub lend_date: Option<DateTime<Utc>>,
    #[arg(long, value_parser = parse_date)]
    pub due: Option<DateTime<Utc>>,
}

fn parse_status(raw: &str) -> std::result::Result<BookStatus, String> {
    raw.parse().map_err(|err: CatalogError| err.to_string())
}

fn parse_date(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp(raw).ok_or_else(|| format!("invalid date '{}'", raw))
}

/// Executes the parsed command against the configured database.
pub fn run(cli: Cli, settings: &Settings) -> Result<()> {
    let db_path = cli.db.clone().unwrap_or_else(|| settings.database_path.clone());
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open catalog at {}", db_path.display()))?;
    let mut catalog = CatalogService::new(store);
    let format = cli.format;

    match cli.command {
        Commands::Add(args) => {
            let draft = build_draft(args, settings);
            let book = catalog.add(draft)?;
            print_book(&book, format)?;
        }
        Commands::Edit(args) => {
            let id = args.id;
            let book = catalog.edit(id, args.into_patch())?;
            print_book(&book, format)?;
        }
        Commands::List(args) => {
            let filters = ListFilters {
                search: args.search,
                room: args.room,
                status: args.status,
            };
            let books = catalog.list(&filters)?;
            print_books(&books, format)?;
        }
        Commands::Show { id } => {
            let book = catalog.get(id)?;
            print_book(&book, format)?;
        }
        Commands::Lend(args) => {
            let book = catalog.lend(args.id, &args.to, args.lend_date, args.due)?;
            print_book(&book, format)?;
        }
        Commands::Return { id } => {
            let book = catalog.return_book(id)?;
            print_book(&book, format)?;
        }
        Commands::Delete { id } => {
            catalog.delete(id)?;
            if format == OutputFormat::Text {
                println!("Deleted book {}", id);
            }
        }
        Commands::Export { path } => match path {
            Some(path) => {
                let count = catalog.export_to_path(&path)?;
                if format == OutputFormat::Text {
                    println!("Exported {} books to {}", count, path.display());
                }
            }
            None => {
                println!("{}", serde_json::to_string_pretty(&catalog.export()?)?);
            }
        },
        Commands::Import { path } => {
            let summary = catalog
                .import_from_path(&path)
                .with_context(|| format!("failed to import {}", path.display()))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Text => println!(
                    "Imported: {} added, {} merged, {} failed",
                    summary.added, summary.merged, summary.failed
                ),
            }
        }
        Commands::Lookup { isbn } => {
            let lookup = OpenLibraryLookup::new(&settings.lookup)?;
            match prefill_draft(&lookup, &isbn) {
                Ok(draft) => match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&draft)?),
                    OutputFormat::Text => {
                        println!("{}", draft.title);
                        if !draft.author.is_empty() {
                            println!("  by {}", draft.author);
                        }
                        println!("  isbn {}", draft.isbn);
                        if !draft.cover_url.is_empty() {
                            println!("  cover {}", draft.cover_url);
                        }
                    }
                },
                Err(err @ (LookupError::NotFound(_) | LookupError::Unreachable(_))) => {
                    println!("{}; enter the details manually.", err);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    Ok(())
}

/// Starts from looked-up metadata when requested; explicit flags win.
fn build_draft(args: AddArgs, settings: &Settings) -> BookDraft {
    let mut draft = BookDraft::default();
    if args.lookup {
        let isbn = args.isbn.clone().unwrap_or_default();
        let prefilled = OpenLibraryLookup::new(&settings.lookup)
            .and_then(|lookup| prefill_draft(&lookup, &isbn));
        match prefilled {
            Ok(found) => draft = found,
            Err(err) => log::warn!("lookup failed, continuing with manual entry: {}", err),
        }
    }

    let fields = [
        (args.title, &mut draft.title),
        (args.author, &mut draft.author),
        (args.isbn, &mut draft.isbn),
        (args.location, &mut draft.location),
        (args.notes, &mut draft.notes),
        (args.tags, &mut draft.tags),
        (args.cover_url, &mut draft.cover_url),
    ];
    for (value, slot) in fields {
        if let Some(value) = value {
            *slot = value;
        }
    }
    draft
}

fn print_book(book: &Book, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(book)?),
        OutputFormat::Text => {
            println!("{}", describe(book));
            if let Some(isbn) = &book.isbn {
                println!("  isbn {}", isbn);
            }
            if let Some(location) = &book.location {
                println!("  location {}", location);
            }
            if !book.tags.is_empty() {
                println!("  tags {}", book.tags.join(", "));
            }
            if let Some(notes) = &book.notes {
                println!("  notes {}", notes);
            }
            if let Some(due) = book.due_date {
                println!("  due {}", due.format("%Y-%m-%d"));
            }
        }
    }
    Ok(())
}

fn print_books(books: &[Book], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(books)?),
        OutputFormat::Text => {
            if books.is_empty() {
                println!("No books found");
                return Ok(());
            }
            for book in books {
                println!("{}", describe(book));
            }
        }
    }
    Ok(())
}

fn describe(book: &Book) -> String {
    let mut line = format!("#{} {}", book.id, book.title);
    if let Some(author) = &book.author {
        line.push_str(&format!(" by {}", author));
    }
    if let Some(lent_to) = &book.lent_to {
        line.push_str(&format!(" [lent to {}]", lent_to));
    }
    line
}
