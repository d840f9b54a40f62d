//! Personal library catalog.
//!
//! A [`store::BookStore`] keeps the records (SQLite on disk, or in memory),
//! and [`catalog::CatalogService`] layers the domain rules on top: filtered
//! listing, lend/return, JSON export and merge-on-import.

pub mod catalog;
pub mod cli;
pub mod db;
pub mod error;
pub mod filter;
pub mod lookup;
pub mod models;
pub mod settings;
pub mod store;

pub use catalog::CatalogService;
pub use error::{CatalogError, Result};
pub use lookup::{prefill_draft, sanitize_isbn, BookMetadata, LookupError, MetadataLookup, OpenLibraryLookup};
pub use models::{Book, BookDraft, BookPatch, BookStatus, ImportSummary, ListFilters};
pub use settings::Settings;
pub use store::{BookStore, MemoryStore, SqliteStore};

/// Entry point for the `catalog` binary.
pub fn run() -> anyhow::Result<()> {
  use anyhow::Context;
  use clap::Parser;
  use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

  let cli = cli::Cli::parse();
  let settings = Settings::load().context("failed to load catalog settings")?;

  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
    )
    .init();

  log::debug!("using database {}", settings.database_path.display());
  cli::run(cli, &settings)
}
