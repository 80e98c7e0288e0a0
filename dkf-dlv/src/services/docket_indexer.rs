//! Docket / session index per search domain
//!
//! Builds a flat list of item folders for a [`SearchDomain`] and caches it
//! until invalidated. Builds run on the blocking pool; concurrent requests for
//! the same domain wait on the one in flight instead of walking twice.
//!
//! Each domain carries a generation bumped by invalidation. A build only
//! caches its result if the generation it started under is still current.

use super::path_config::PathConfig;
use crate::models::staged_entry::is_ignored_name;
use chrono::Utc;
use dkf_common::events::{DeliveryEvent, EventBus, SearchDomain};
use dkf_common::{Settings, SettingsProvider};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Ordered item paths for one domain
pub type DomainIndex = Arc<Vec<PathBuf>>;

/// Rebuilds attempted when invalidations keep landing mid-build
const MAX_BUILD_ATTEMPTS: usize = 3;

#[derive(Default)]
struct IndexCache {
    built: HashMap<SearchDomain, DomainIndex>,
    generations: HashMap<SearchDomain, u64>,
}

impl IndexCache {
    fn generation(&self, domain: SearchDomain) -> u64 {
        self.generations.get(&domain).copied().unwrap_or(0)
    }
}

/// Per-domain search index cache
pub struct DocketIndexer {
    settings: Arc<SettingsProvider>,
    event_bus: Option<EventBus>,
    cache: RwLock<IndexCache>,
    /// One build in flight per domain
    build_locks: HashMap<SearchDomain, Mutex<()>>,
}

impl DocketIndexer {
    pub fn new(settings: Arc<SettingsProvider>) -> Self {
        let build_locks = SearchDomain::ALL
            .iter()
            .map(|domain| (*domain, Mutex::new(())))
            .collect();
        Self {
            settings,
            event_bus: None,
            cache: RwLock::new(IndexCache::default()),
            build_locks,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Cached index, if built
    pub fn cached(&self, domain: SearchDomain) -> Option<DomainIndex> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .built
            .get(&domain)
            .cloned()
    }

    fn generation(&self, domain: SearchDomain) -> u64 {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation(domain)
    }

    /// Cache `index` unless `domain` was invalidated since `generation`
    fn store_if_current(
        &self,
        domain: SearchDomain,
        generation: u64,
        index: &DomainIndex,
    ) -> bool {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.generation(domain) != generation {
            return false;
        }
        cache.built.insert(domain, index.clone());
        true
    }

    /// Return the domain index, building it on first use
    pub async fn build_index(&self, domain: SearchDomain) -> DomainIndex {
        if let Some(index) = self.cached(domain) {
            return index;
        }

        let _build = match self.build_locks.get(&domain) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        // Another caller may have finished while we waited
        if let Some(index) = self.cached(domain) {
            return index;
        }

        let mut attempt = 1;
        let index = loop {
            let generation = self.generation(domain);
            let settings = self.settings.snapshot();
            let items =
                match tokio::task::spawn_blocking(move || collect_domain(settings, domain)).await {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(%domain, error = %e, "Index build task failed");
                        Vec::new()
                    }
                };

            let index = Arc::new(items);
            if self.store_if_current(domain, generation, &index) {
                break index;
            }
            if attempt >= MAX_BUILD_ATTEMPTS {
                warn!(%domain, attempt, "Index invalidated during every build, not caching");
                return index;
            }
            debug!(%domain, attempt, "Index invalidated mid-build, rebuilding");
            attempt += 1;
        };
        info!(%domain, items = index.len(), "Search index built");

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(DeliveryEvent::IndexBuilt {
                domain,
                item_count: index.len(),
                timestamp: Utc::now(),
            });
        }
        index
    }

    /// Drop one domain's cached index
    pub fn invalidate(&self, domain: SearchDomain) {
        self.invalidate_domains(&[domain]);
    }

    /// Drop every cached index
    pub fn invalidate_all(&self) {
        self.invalidate_domains(&SearchDomain::ALL);
    }

    fn invalidate_domains(&self, domains: &[SearchDomain]) {
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            for domain in domains {
                cache.built.remove(domain);
                *cache.generations.entry(*domain).or_insert(0) += 1;
            }
        }
        debug!(?domains, "Search index invalidated");
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(DeliveryEvent::IndexInvalidated {
                domains: domains.to_vec(),
                timestamp: Utc::now(),
            });
        }
    }
}

/// Walk the domain root and list its items
pub fn collect_domain(settings: Arc<Settings>, domain: SearchDomain) -> Vec<PathBuf> {
    let paths = PathConfig::new(settings.clone());
    match domain {
        SearchDomain::MediaPostings => list_items(&settings.paths.media_postings_path),
        SearchDomain::Sessions => {
            collect_by_year(&paths, &settings.paths.sessions_base_path, |_, year_dir| {
                year_dir.to_path_buf()
            })
        }
        SearchDomain::WorkPicture => {
            collect_by_year(&paths, paths.server_root(), |year, _| {
                paths.work_picture_folder(year)
            })
        }
    }
}

fn collect_by_year<F>(paths: &PathConfig, root: &Path, item_root: F) -> Vec<PathBuf>
where
    F: Fn(i32, &Path) -> PathBuf,
{
    let years = match paths.year_folders(root) {
        Ok(years) => years,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "Domain root unavailable");
            return Vec::new();
        }
    };

    let mut items = Vec::new();
    for (year, year_dir) in years {
        let dir = item_root(year, &year_dir);
        if !dir.is_dir() {
            continue;
        }
        items.extend(list_items(&dir));
    }
    items
}

/// Immediate, non-hidden child directories sorted by name
fn list_items(dir: &Path) -> Vec<PathBuf> {
    let mut items = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_dir()
                    && !is_ignored_name(&entry.file_name().to_string_lossy())
                {
                    items.push(entry.into_path());
                }
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable index entry");
            }
        }
    }
    items.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn provider_for(root: &Path) -> Arc<SettingsProvider> {
        let mut settings = Settings::default();
        settings.paths.server_base_path = root.join("server");
        settings.paths.sessions_base_path = root.join("sessions");
        settings.paths.media_postings_path = root.join("postings");
        Arc::new(SettingsProvider::new(settings))
    }

    #[tokio::test]
    async fn work_picture_items_newest_year_first() {
        let dir = TempDir::new().unwrap();
        let server = dir.path().join("server");
        fs::create_dir_all(server.join("GM_2025/2025_WORK PICTURE/11111_Old")).unwrap();
        fs::create_dir_all(server.join("GM_2026/2026_WORK PICTURE/22222_B")).unwrap();
        fs::create_dir_all(server.join("GM_2026/2026_WORK PICTURE/22221_A")).unwrap();
        fs::create_dir_all(server.join("GM_2026/2026_WORK PICTURE/.hidden")).unwrap();
        fs::write(server.join("GM_2026/2026_WORK PICTURE/stray.txt"), b"x").unwrap();

        let indexer = DocketIndexer::new(provider_for(dir.path()));
        let index = indexer.build_index(SearchDomain::WorkPicture).await;
        let names: Vec<String> = index
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["22221_A", "22222_B", "11111_Old"]);
    }

    #[tokio::test]
    async fn missing_root_yields_empty_index() {
        let dir = TempDir::new().unwrap();
        let indexer = DocketIndexer::new(provider_for(dir.path()));
        for domain in SearchDomain::ALL {
            assert!(indexer.build_index(domain).await.is_empty());
        }
    }

    #[tokio::test]
    async fn cached_until_invalidated() {
        let dir = TempDir::new().unwrap();
        let postings = dir.path().join("postings");
        fs::create_dir_all(postings.join("Spot A")).unwrap();

        let indexer = DocketIndexer::new(provider_for(dir.path()));
        assert_eq!(indexer.build_index(SearchDomain::MediaPostings).await.len(), 1);

        fs::create_dir_all(postings.join("Spot B")).unwrap();
        assert_eq!(indexer.build_index(SearchDomain::MediaPostings).await.len(), 1);

        indexer.invalidate(SearchDomain::MediaPostings);
        assert!(indexer.cached(SearchDomain::MediaPostings).is_none());
        assert_eq!(indexer.build_index(SearchDomain::MediaPostings).await.len(), 2);
    }

    #[tokio::test]
    async fn build_started_before_invalidation_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let old_root = dir.path().join("postings");
        fs::create_dir_all(old_root.join("Old Spot")).unwrap();
        let provider = provider_for(dir.path());
        let indexer = DocketIndexer::new(provider.clone());

        // A build that snapshotted the old root before the reload
        let generation = indexer.generation(SearchDomain::MediaPostings);
        let stale = Arc::new(collect_domain(provider.snapshot(), SearchDomain::MediaPostings));

        let new_root = dir.path().join("postings2");
        fs::create_dir_all(new_root.join("New Spot A")).unwrap();
        fs::create_dir_all(new_root.join("New Spot B")).unwrap();
        let mut settings = (*provider.snapshot()).clone();
        settings.paths.media_postings_path = new_root;
        provider.replace(settings);
        indexer.invalidate_all();

        assert!(!indexer.store_if_current(SearchDomain::MediaPostings, generation, &stale));
        assert!(indexer.cached(SearchDomain::MediaPostings).is_none());
        assert_eq!(indexer.build_index(SearchDomain::MediaPostings).await.len(), 2);
    }

    #[tokio::test]
    async fn invalidation_only_bumps_named_domain() {
        let dir = TempDir::new().unwrap();
        let indexer = DocketIndexer::new(provider_for(dir.path()));
        indexer.invalidate(SearchDomain::Sessions);
        assert_eq!(indexer.generation(SearchDomain::Sessions), 1);
        assert_eq!(indexer.generation(SearchDomain::WorkPicture), 0);
    }

    #[tokio::test]
    async fn concurrent_builds_share_one_result() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sessions/GM_2026/12345_Session Report")).unwrap();

        let indexer = Arc::new(DocketIndexer::new(provider_for(dir.path())));
        let a = tokio::spawn({
            let indexer = indexer.clone();
            async move { indexer.build_index(SearchDomain::Sessions).await }
        });
        let b = tokio::spawn({
            let indexer = indexer.clone();
            async move { indexer.build_index(SearchDomain::Sessions).await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 1);
    }

    #[tokio::test]
    async fn events_published_for_build_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let indexer = DocketIndexer::new(provider_for(dir.path())).with_event_bus(bus);

        indexer.build_index(SearchDomain::Sessions).await;
        indexer.invalidate_all();

        assert_eq!(rx.recv().await.unwrap().event_type(), "IndexBuilt");
        assert_eq!(rx.recv().await.unwrap().event_type(), "IndexInvalidated");
    }
}
