//! Recursive file search backed by a single cached listing and a single
//! in-flight scan. A newer request always wins over an older one.

use crate::error::{TaskError, TaskResult};
use crate::settings::SearchSettings;
use crate::tasks::AbortSignal;
use crate::traits::{DirectoryScanner, FuzzyRanker};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Listing = Arc<[String]>;
type ScanFuture = Shared<BoxFuture<'static, TaskResult<Listing>>>;

struct CachedListing {
    path: PathBuf,
    entries: Listing,
    loaded_at: Instant,
}

struct PendingScan {
    directory: PathBuf,
    generation: u64,
    cancel: CancellationToken,
    handle: ScanFuture,
}

enum Plan {
    Cached(Listing),
    Await { handle: ScanFuture, generation: u64 },
}

#[derive(Default)]
struct Slots {
    cache: Option<CachedListing>,
    pending: Option<PendingScan>,
    generation: u64,
}

pub struct SearchService {
    scanner: Arc<dyn DirectoryScanner>,
    ranker: Arc<dyn FuzzyRanker>,
    slots: Arc<Mutex<Slots>>,
    ttl: Duration,
    limit: usize,
}

impl SearchService {
    pub fn new(
        scanner: Arc<dyn DirectoryScanner>,
        ranker: Arc<dyn FuzzyRanker>,
        settings: &SearchSettings,
    ) -> Self {
        Self {
            scanner,
            ranker,
            slots: Arc::new(Mutex::new(Slots::default())),
            ttl: settings.ttl(),
            limit: settings.result_limit,
        }
    }

    /// Up to `result_limit` file paths under `directory`. An empty query
    /// returns the listing in scan order; anything else is fuzzy ranked.
    ///
    /// Returns `TaskError::Aborted` when a request for another directory
    /// superseded this one.
    pub async fn search(&self, directory: &Path, query: &str) -> TaskResult<Vec<String>> {
        let directory = directory.to_path_buf();
        let entries = match self.plan(&directory) {
            Plan::Cached(entries) => entries,
            Plan::Await { handle, generation } => match handle.await {
                Err(TaskError::Aborted) => {
                    tracing::debug!(
                        directory = %directory.display(),
                        generation,
                        current = self.slots.lock().generation,
                        "scan superseded"
                    );
                    return Err(TaskError::Aborted);
                }
                other => other?,
            },
        };
        self.select(entries, query).await
    }

    /// Drop the cached listing so the next search rescans.
    pub fn invalidate(&self) {
        self.slots.lock().cache = None;
    }

    /// Directory the cache currently holds, fresh or not.
    pub fn cached_directory(&self) -> Option<PathBuf> {
        self.slots.lock().cache.as_ref().map(|c| c.path.clone())
    }

    /// Decide under one lock whether to join the in-flight scan, answer
    /// from the cache or start a scan. Entry order into this section is
    /// request order, so only here may a scan for another directory be
    /// cancelled.
    fn plan(&self, directory: &Path) -> Plan {
        let mut slots = self.slots.lock();
        match slots.pending.take() {
            Some(pending) if pending.directory == directory => {
                let plan = Plan::Await {
                    handle: pending.handle.clone(),
                    generation: pending.generation,
                };
                slots.pending = Some(pending);
                return plan;
            }
            Some(pending) => {
                tracing::info!(
                    previous = %pending.directory.display(),
                    next = %directory.display(),
                    "superseding in-flight scan"
                );
                pending.cancel.cancel();
                slots.generation += 1;
            }
            None => {}
        }

        let fresh = slots
            .cache
            .as_ref()
            .filter(|c| c.path == directory && c.loaded_at.elapsed() <= self.ttl)
            .map(|c| Arc::clone(&c.entries));
        if let Some(entries) = fresh {
            return Plan::Cached(entries);
        }

        slots.generation += 1;
        let generation = slots.generation;
        let cancel = CancellationToken::new();
        let handle = self.spawn_scan(directory.to_path_buf(), generation, cancel.clone());
        tracing::debug!(directory = %directory.display(), generation, "starting scan");
        slots.pending = Some(PendingScan {
            directory: directory.to_path_buf(),
            generation,
            cancel,
            handle: handle.clone(),
        });
        Plan::Await { handle, generation }
    }

    fn spawn_scan(
        &self,
        directory: PathBuf,
        generation: u64,
        cancel: CancellationToken,
    ) -> ScanFuture {
        let scanner = Arc::clone(&self.scanner);
        let slots = Arc::clone(&self.slots);
        let abort = AbortSignal::new(cancel.clone());
        let target = directory.clone();
        let worker = tokio::task::spawn_blocking(move || scanner.scan(&target, &abort));

        async move {
            let result = match worker.await {
                Ok(listing) => listing.map(Listing::from),
                Err(join) => Err(TaskError::from(join)),
            };
            commit(&slots, directory, generation, &cancel, result)
        }
        .boxed()
        .shared()
    }

    async fn select(&self, entries: Listing, query: &str) -> TaskResult<Vec<String>> {
        if query.trim().is_empty() {
            return Ok(entries.iter().take(self.limit).cloned().collect());
        }
        let ranker = Arc::clone(&self.ranker);
        let query = query.to_string();
        let limit = self.limit;
        let ranked = tokio::task::spawn_blocking(move || ranker.rank(&entries, &query, limit)).await?;
        Ok(ranked)
    }
}

/// Settle a finished scan. Only the registered generation may touch the
/// slots; a superseded scan reports `Aborted` to whoever still awaits it.
fn commit(
    slots: &Mutex<Slots>,
    directory: PathBuf,
    generation: u64,
    cancel: &CancellationToken,
    result: TaskResult<Listing>,
) -> TaskResult<Listing> {
    let mut slots = slots.lock();
    let current = slots
        .pending
        .as_ref()
        .is_some_and(|p| p.generation == generation);
    if !current {
        tracing::debug!(directory = %directory.display(), generation, "discarding superseded scan");
        return if cancel.is_cancelled() {
            Err(TaskError::Aborted)
        } else {
            result
        };
    }

    slots.pending = None;
    match &result {
        Ok(entries) => {
            slots.cache = Some(CachedListing {
                path: directory,
                entries: Arc::clone(entries),
                loaded_at: Instant::now(),
            });
        }
        Err(e) => tracing::warn!(directory = %directory.display(), error = %e, "scan failed"),
    }
    result
}
