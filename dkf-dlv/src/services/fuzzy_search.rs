//! Exact and approximate matching over a domain index

use super::docket_indexer::{DocketIndexer, DomainIndex};
use dkf_common::events::SearchDomain;
use dkf_common::SettingsProvider;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_EXACT_RESULTS: usize = 150;
pub const MAX_FUZZY_RESULTS: usize = 50;
/// Largest edit distance still treated as a fuzzy hit
pub const FUZZY_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub exact: Vec<PathBuf>,
    pub fuzzy: Vec<PathBuf>,
}

/// Edit distance over Unicode scalar values
pub fn levenshtein(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

fn item_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn parent_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Case-insensitive containment; multi-token queries require every token
pub fn is_exact_match(name: &str, query: &str) -> bool {
    let name = name.to_lowercase();
    let query = query.to_lowercase();
    let tokens: Vec<&str> = query.split_whitespace().collect();
    match tokens.len() {
        0 => false,
        1 => name.contains(tokens[0]),
        _ => tokens.iter().all(|token| name.contains(token)),
    }
}

/// Words a fuzzy query is compared against
///
/// Whitespace words, their `_`/`-` parts, and the whole name without spaces.
fn candidate_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    for word in name.split_whitespace() {
        words.push(word.to_string());
        let parts: Vec<&str> = word
            .split(|c: char| c == '_' || c == '-')
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() > 1 {
            words.extend(parts.into_iter().map(str::to_string));
        }
    }
    words.push(name.chars().filter(|c| !c.is_whitespace()).collect());
    words
}

/// Whether any candidate word is within the edit-distance threshold
pub fn is_fuzzy_match(name: &str, query: &str) -> bool {
    let name = name.to_lowercase();
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return false;
    }
    let query_len = query.chars().count();
    let min_len = 3.max(query_len.saturating_sub(4));

    candidate_words(&name)
        .iter()
        .filter(|word| word.chars().count() >= min_len)
        .any(|word| levenshtein(word, &query) <= FUZZY_THRESHOLD)
}

/// Parent folder descending, then item name ascending
fn result_order(a: &Path, b: &Path) -> Ordering {
    parent_name(b)
        .cmp(&parent_name(a))
        .then_with(|| item_name(a).cmp(&item_name(b)))
}

/// Match `query` against an index snapshot
///
/// Only each item's own folder name is compared; the domain root and year
/// folders above it are shared by every item.
pub fn search_index(index: &[PathBuf], query: &str, fuzzy_enabled: bool) -> SearchResults {
    let query = query.trim();
    if query.is_empty() {
        return SearchResults::default();
    }

    let mut exact = Vec::new();
    let mut fuzzy = Vec::new();
    for path in index {
        let name = item_name(path);
        if is_exact_match(&name, query) {
            exact.push(path.clone());
        } else if fuzzy_enabled && is_fuzzy_match(&name, query) {
            fuzzy.push(path.clone());
        }
    }

    exact.sort_by(|a, b| result_order(a, b));
    fuzzy.sort_by(|a, b| result_order(a, b));
    exact.truncate(MAX_EXACT_RESULTS);
    fuzzy.truncate(MAX_FUZZY_RESULTS);
    SearchResults { exact, fuzzy }
}

/// Search front end over the cached domain indexes
pub struct FuzzySearchEngine {
    indexer: Arc<DocketIndexer>,
    settings: Arc<SettingsProvider>,
}

impl FuzzySearchEngine {
    pub fn new(indexer: Arc<DocketIndexer>, settings: Arc<SettingsProvider>) -> Self {
        Self { indexer, settings }
    }

    /// Ranked exact and fuzzy matches for `query` in `domain`
    pub async fn search(&self, query: &str, domain: SearchDomain) -> SearchResults {
        let index: DomainIndex = self.indexer.build_index(domain).await;
        let fuzzy_enabled = self.settings.snapshot().search.fuzzy_enabled;
        let query_owned = query.to_string();

        let results = match tokio::task::spawn_blocking(move || {
            search_index(&index, &query_owned, fuzzy_enabled)
        })
        .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(%domain, error = %e, "Search task failed");
                SearchResults::default()
            }
        };

        debug!(
            %domain,
            query,
            exact = results.exact.len(),
            fuzzy = results.fuzzy.len(),
            "Search complete"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<PathBuf> {
        items.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("sesion", "session"), levenshtein("session", "sesion"));
        assert_eq!(levenshtein("café", "cafe"), 1);
    }

    #[test]
    fn exact_single_and_multi_token() {
        assert!(is_exact_match("12345_Session Report", "session"));
        assert!(is_exact_match("12345_Session Report", "REPORT 12345"));
        assert!(!is_exact_match("12345_Session Report", "report 999"));
        assert!(!is_exact_match("anything", "   "));
    }

    #[test]
    fn fuzzy_matches_misspelled_word_part() {
        assert!(is_fuzzy_match("12345_Session Report", "sesion"));
        assert!(!is_fuzzy_match("12345_Session Report", "xylophone"));
    }

    #[test]
    fn short_words_are_not_fuzzy_candidates() {
        // "ab" is under the 3-char minimum even though it is 1 edit from "abc"
        assert!(!is_fuzzy_match("ab", "abc"));
    }

    #[test]
    fn shared_path_prefix_does_not_match() {
        let index = paths(&[
            "/mnt/server/GM_2026/2026_WORK PICTURE/12345_Acme Spot",
            "/mnt/server/GM_2026/2026_WORK PICTURE/22222_Beta Promo",
        ]);
        assert!(search_index(&index, "2026", false).exact.is_empty());
        assert!(search_index(&index, "work picture", false).exact.is_empty());
        let hits = search_index(&index, "acme 12345", false).exact;
        assert_eq!(hits, vec![index[0].clone()]);
    }

    #[test]
    fn fuzzy_only_when_enabled() {
        let index = paths(&["/wp/GM_2026/12345_Session Report"]);
        let on = search_index(&index, "sesion", true);
        assert!(on.exact.is_empty());
        assert_eq!(on.fuzzy.len(), 1);

        let off = search_index(&index, "sesion", false);
        assert!(off.exact.is_empty());
        assert!(off.fuzzy.is_empty());
    }

    #[test]
    fn exact_hits_are_not_repeated_as_fuzzy() {
        let index = paths(&["/s/GM_2026/Session A", "/s/GM_2026/Sesion B"]);
        let results = search_index(&index, "session", true);
        assert_eq!(results.exact, paths(&["/s/GM_2026/Session A"]));
        assert_eq!(results.fuzzy, paths(&["/s/GM_2026/Sesion B"]));
    }

    #[test]
    fn ordered_by_parent_desc_then_name_asc() {
        let index = paths(&[
            "/s/GM_2025/Spot B",
            "/s/GM_2026/Spot Z",
            "/s/GM_2026/Spot A",
            "/s/GM_2025/Spot A",
        ]);
        let results = search_index(&index, "spot", false);
        assert_eq!(
            results.exact,
            paths(&[
                "/s/GM_2026/Spot A",
                "/s/GM_2026/Spot Z",
                "/s/GM_2025/Spot A",
                "/s/GM_2025/Spot B",
            ])
        );
    }

    #[test]
    fn exact_results_are_capped() {
        let index: Vec<PathBuf> = (0..200)
            .map(|i| PathBuf::from(format!("/p/GM_2026/{:05}_spot", i)))
            .collect();
        let results = search_index(&index, "spot", true);
        assert_eq!(results.exact.len(), MAX_EXACT_RESULTS);
        assert!(results.exact.iter().all(|p| item_name(p).contains("spot")));
    }
}
