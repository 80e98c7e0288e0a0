//! Prep folder watching
//!
//! After a run finishes, the prep folder stays under watch so manual edits
//! (dropping in a late mix, renaming a clip) refresh the summary. Change events
//! are debounced; a regeneration is dropped while a run for the same docket is
//! active, and a newer regeneration for a folder cancels the one in flight.

use super::path_config::PathConfig;
use super::prep_summary::PrepSummaryGenerator;
use dkf_common::SettingsProvider;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Cannot watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Dockets with a pipeline run in progress
#[derive(Debug, Clone, Default)]
pub struct ActiveDockets {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveDockets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a docket active until the guard drops
    ///
    /// `None` when a run for the docket is already active.
    pub fn try_activate(&self, docket: &str) -> Option<ActiveDocketGuard> {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(docket.to_string()) {
            return None;
        }
        Some(ActiveDocketGuard {
            set: self.clone(),
            docket: docket.to_string(),
        })
    }

    pub fn is_active(&self, docket: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(docket)
    }
}

pub struct ActiveDocketGuard {
    set: ActiveDockets,
    docket: String,
}

impl Drop for ActiveDocketGuard {
    fn drop(&mut self) {
        self.set
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.docket);
    }
}

/// Whether a change event should restart the debounce window
///
/// Events touching only `ignored` paths (the summary file and its temp file)
/// never count, or every write would schedule another write.
pub fn is_relevant(event: &Event, ignored: &[PathBuf]) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    );
    kind_matches && event.paths.iter().any(|p| !ignored.contains(p))
}

/// Start a recursive watch; relevant events arrive as unit signals
///
/// The watch lasts as long as the returned watcher is alive.
pub fn watch_directory(
    path: &Path,
    ignored: Vec<PathBuf>,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>), WatchError> {
    if !path.is_dir() {
        return Err(WatchError::NotADirectory(path.to_path_buf()));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_relevant(&event, &ignored) {
                let _ = tx.send(());
            }
        }
        Err(e) => warn!(error = %e, "Watch backend error"),
    })
    .map_err(|source| WatchError::Notify {
        path: path.to_path_buf(),
        source,
    })?;

    watcher
        .watch(path, RecursiveMode::Recursive)
        .map_err(|source| WatchError::Notify {
            path: path.to_path_buf(),
            source,
        })?;
    Ok((watcher, rx))
}

/// Wait for a quiet period after each burst of signals, then fire
///
/// `on_settled` is skipped while the docket is active. Returns when the
/// channel closes or the token is cancelled.
pub(crate) async fn debounce_loop<F>(
    mut signals: mpsc::UnboundedReceiver<()>,
    docket: String,
    debounce: Duration,
    active: ActiveDockets,
    cancel: CancellationToken,
    mut on_settled: F,
) where
    F: FnMut() + Send,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            signal = signals.recv() => {
                if signal.is_none() {
                    return;
                }
            }
        }

        // Restart the window on every further signal
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                signal = signals.recv() => {
                    if signal.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        if active.is_active(&docket) {
            debug!(docket = %docket, "Docket busy, dropping summary refresh");
            continue;
        }
        on_settled();
    }
}

/// Runs summary regenerations, at most one live per prep folder
pub struct SummaryRegenerator {
    generator: Arc<PrepSummaryGenerator>,
    in_flight: Mutex<HashMap<PathBuf, (u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl SummaryRegenerator {
    pub fn new(generator: Arc<PrepSummaryGenerator>) -> Self {
        Self {
            generator,
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Regenerate the summary, cancelling any earlier run for the folder
    pub fn regenerate(self: &Arc<Self>, docket: String, prep_root: PathBuf) -> JoinHandle<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((_, previous)) =
                in_flight.insert(prep_root.clone(), (generation, token.clone()))
            {
                previous.cancel();
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(docket = %docket, "Summary regeneration superseded");
                }
                result = this.generator.write_for(&docket, &prep_root) => {
                    if let Err(e) = result {
                        warn!(docket = %docket, error = %e, "Summary regeneration failed");
                    }
                }
            }

            let mut in_flight = this.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.get(&prep_root).map(|(g, _)| *g) == Some(generation) {
                in_flight.remove(&prep_root);
            }
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A live watch; dropping it stops the debounce loop and the OS watch
struct WatchGuard {
    cancel: CancellationToken,
    _watcher: RecommendedWatcher,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Prep folders currently under watch
pub struct PrepWatchRegistry {
    settings: Arc<SettingsProvider>,
    regenerator: Arc<SummaryRegenerator>,
    active: ActiveDockets,
    watches: Mutex<HashMap<PathBuf, WatchGuard>>,
}

impl PrepWatchRegistry {
    pub fn new(
        settings: Arc<SettingsProvider>,
        regenerator: Arc<SummaryRegenerator>,
        active: ActiveDockets,
    ) -> Self {
        Self {
            settings,
            regenerator,
            active,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Watch `prep_root` for `docket`, replacing any earlier watch on it
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, docket: &str, prep_root: &Path) -> Result<(), WatchError> {
        let settings = self.settings.snapshot();
        let summary = prep_root.join(PathConfig::new(settings.clone()).summary_file_name(docket));
        let mut summary_tmp = summary.clone().into_os_string();
        summary_tmp.push(".tmp");

        let (watcher, signals) =
            watch_directory(prep_root, vec![summary, PathBuf::from(summary_tmp)])?;

        let cancel = CancellationToken::new();
        let regenerator = self.regenerator.clone();
        let settled_docket = docket.to_string();
        let settled_root = prep_root.to_path_buf();
        tokio::spawn(debounce_loop(
            signals,
            docket.to_string(),
            Duration::from_millis(settings.watch.debounce_ms),
            self.active.clone(),
            cancel.clone(),
            move || {
                regenerator.regenerate(settled_docket.clone(), settled_root.clone());
            },
        ));

        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                prep_root.to_path_buf(),
                WatchGuard {
                    cancel,
                    _watcher: watcher,
                },
            );
        info!(docket, folder = %prep_root.display(), "Prep folder watch armed");
        Ok(())
    }

    /// Arm after `grace`, so the run's own final writes are not seen as edits
    pub fn arm_after(
        self: &Arc<Self>,
        docket: String,
        prep_root: PathBuf,
        grace: Duration,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = this.arm(&docket, &prep_root) {
                warn!(docket = %docket, error = %e, "Cannot arm prep folder watch");
            }
        })
    }

    /// Stop watching a prep folder
    pub fn disarm(&self, prep_root: &Path) -> bool {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(prep_root)
            .is_some()
    }

    pub fn armed(&self) -> Vec<PathBuf> {
        let mut armed: Vec<PathBuf> = self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        armed.sort();
        armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn relevance_ignores_summary_and_metadata_events() {
        let summary = PathBuf::from("/prep/12345_Prep_Summary.txt");
        let ignored = vec![summary.clone()];

        let create =
            Event::new(EventKind::Create(CreateKind::File)).add_path("/prep/MUSIC/a.wav".into());
        assert!(is_relevant(&create, &ignored));

        let own_write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(summary);
        assert!(!is_relevant(&own_write, &ignored));

        let chmod = Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)))
            .add_path("/prep/MUSIC/a.wav".into());
        assert!(!is_relevant(&chmod, &ignored));
    }

    #[tokio::test]
    async fn burst_of_changes_fires_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (count, on_settled) = counter();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(
            rx,
            "12345".into(),
            Duration::from_millis(50),
            ActiveDockets::new(),
            cancel.clone(),
            on_settled,
        ));

        for _ in 0..5 {
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn active_docket_drops_refresh() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (count, on_settled) = counter();
        let active = ActiveDockets::new();
        let guard = active.try_activate("12345").unwrap();
        assert!(active.try_activate("12345").is_none());

        let task = tokio::spawn(debounce_loop(
            rx,
            "12345".into(),
            Duration::from_millis(20),
            active.clone(),
            CancellationToken::new(),
            on_settled,
        ));

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        drop(guard);
        assert!(!active.is_active("12345"));
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(tx);
        task.await.unwrap();
    }

    #[test]
    fn watching_a_missing_folder_fails() {
        let err = watch_directory(Path::new("/definitely/not/here"), Vec::new()).unwrap_err();
        assert!(matches!(err, WatchError::NotADirectory(_)));
    }
}
