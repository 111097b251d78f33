//! Application context – owns the task registry and the long-running
//! services built on top of it.

use crate::archive::{ArchiveService, FormatDispatcher, StrategyResolver};
use crate::platform::{NucleoRanker, WalkdirScanner};
use crate::search::SearchService;
use crate::settings::EngineSettings;
use crate::tasks::TaskRegistry;
use crate::traits::*;
use std::sync::Arc;

/// Central context passed to all engine operations.
///
/// Search and archive dispatch sit behind trait objects so tests can swap
/// in stubs for the scanner, the ranker and the strategy table.
pub struct AppContext {
    registry: TaskRegistry,
    archive: Arc<ArchiveService>,
    search: SearchService,
    settings: EngineSettings,
}

impl AppContext {
    pub fn new(
        settings: EngineSettings,
        scanner: Arc<dyn DirectoryScanner>,
        ranker: Arc<dyn FuzzyRanker>,
        resolver: Arc<dyn StrategyResolver>,
    ) -> Self {
        let registry = TaskRegistry::new(settings.tasks.grace_period());
        let archive = Arc::new(ArchiveService::with_resolver(
            registry.clone(),
            &settings.archive,
            resolver,
        ));
        let search = SearchService::new(scanner, ranker, &settings.search);
        Self {
            registry,
            archive,
            search,
            settings,
        }
    }

    /// Context backed by walkdir, nucleo and the real archivers.
    pub fn default_platform(settings: EngineSettings) -> Self {
        let scanner = Arc::new(WalkdirScanner::new(&settings.search));
        Self::new(
            settings,
            scanner,
            Arc::new(NucleoRanker),
            Arc::new(FormatDispatcher),
        )
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn archive(&self) -> &Arc<ArchiveService> {
        &self.archive
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::default_platform(EngineSettings::default())
    }
}
