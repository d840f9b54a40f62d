//! Listing filters and the title ordering used by `CatalogService::list`.

use std::cmp::Ordering;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::{Book, ListFilters};

const LEADING_ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Returns true when `book` passes every active filter.
pub fn matches(book: &Book, filters: &ListFilters) -> bool {
    let room = filters.room.trim();
    if !room.is_empty() && book.location.as_deref() != Some(room) {
        return false;
    }
    if let Some(status) = filters.status {
        if book.status != status {
            return false;
        }
    }
    let query = filters.search.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }

    let tags = book.tags.join(",");
    let hit = [
        Some(book.title.as_str()),
        book.author.as_deref(),
        book.isbn.as_deref(),
        Some(tags.as_str()),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&query));
    hit
}

/// Lowercased title with diacritics folded and a single leading article removed.
pub fn sort_key(title: &str) -> String {
    let folded: String = title.nfkd().filter(|ch| !is_combining_mark(*ch)).collect();
    let lowered = folded.to_lowercase();
    let lowered = lowered.trim_start();
    for article in LEADING_ARTICLES {
        if let Some(rest) = lowered.strip_prefix(article) {
            return rest.trim().to_string();
        }
    }
    lowered.trim_end().to_string()
}

/// Title ordering for listings. Accents and case only break ties; blank
/// titles sort last.
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    let key_a = sort_key(a);
    let key_b = sort_key(b);
    match (key_a.is_empty(), key_b.is_empty()) {
        (true, true) => a.cmp(b),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => key_a.cmp(&key_b).then_with(|| a.cmp(b)),
    }
}

/// Splits a comma separated tag string, trimming entries and dropping blanks.
/// Duplicates are kept.
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(|tag| tag.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{timestamp_now, BookStatus};

    fn book(title: &str) -> Book {
        Book {
            title: title.to_string(),
            ..Book::blank(0, timestamp_now())
        }
    }

    fn sorted(titles: &[&str]) -> Vec<String> {
        let mut titles: Vec<String> = titles.iter().map(|t| t.to_string()).collect();
        titles.sort_by(|a, b| compare_titles(a, b));
        titles
    }

    #[test]
    fn sorts_ignoring_leading_articles() {
        assert_eq!(
            sorted(&["The Hobbit", "Dune", "A Wizard of Earthsea"]),
            vec!["Dune", "The Hobbit", "A Wizard of Earthsea"]
        );
    }

    #[test]
    fn strips_only_one_article() {
        assert_eq!(sort_key("The A Team"), "a team");
        assert_eq!(sort_key("Anathem"), "anathem");
        assert_eq!(sort_key("An Instance of the Fingerpost"), "instance of the fingerpost");
    }

    #[test]
    fn accented_titles_sort_with_their_base_letters() {
        assert_eq!(
            sorted(&["Zorba the Greek", "Émile", "Ender's Game"]),
            vec!["Émile", "Ender's Game", "Zorba the Greek"]
        );
        assert_eq!(sort_key("L'Étranger"), "l'etranger");
        assert_eq!(sorted(&["emile", "Émile", "Emile"]), vec!["Emile", "emile", "Émile"]);
    }

    #[test]
    fn blank_titles_sort_last() {
        assert_eq!(sorted(&["", "Zorba", "The "]), vec!["Zorba", "", "The "]);
    }

    #[test]
    fn search_hits_any_single_field() {
        let mut earthsea = book("A Wizard of Earthsea");
        earthsea.author = Some("Ursula K. Le Guin".to_string());
        earthsea.tags = vec!["fantasy".to_string(), "ya".to_string()];

        let query = |search: &str| ListFilters {
            search: search.to_string(),
            ..ListFilters::default()
        };
        assert!(matches(&earthsea, &query("WIZARD")));
        assert!(matches(&earthsea, &query("le guin")));
        assert!(matches(&earthsea, &query("fantasy,ya")));
        assert!(!matches(&earthsea, &query("wizard le guin")));
        assert!(!matches(&book("Dune"), &query("wizard")));
    }

    #[test]
    fn room_and_status_filters_are_exact() {
        let mut shelved = book("Dune");
        shelved.location = Some("Study".to_string());

        let in_study = ListFilters {
            room: "Study".to_string(),
            ..ListFilters::default()
        };
        assert!(matches(&shelved, &in_study));
        let in_kitchen = ListFilters {
            room: "Kitchen".to_string(),
            ..ListFilters::default()
        };
        assert!(!matches(&shelved, &in_kitchen));

        let lent_only = ListFilters {
            status: Some(BookStatus::Lent),
            ..ListFilters::default()
        };
        assert!(!matches(&shelved, &lent_only));
    }

    #[test]
    fn tag_list_keeps_duplicates() {
        assert_eq!(
            parse_tag_list(" sf, ,classic,sf ,"),
            vec!["sf".to_string(), "classic".to_string(), "sf".to_string()]
        );
    }
}
