pub mod committer;
pub mod db;
pub mod errors;
pub mod inline;
pub mod models;
pub mod proposal;
pub mod request;
pub mod selection;
pub mod services;
pub mod settings;
pub mod sweeper;
pub mod wizard;

#[cfg(test)]
mod testing;

pub use crate::committer::{CommitGroup, CommitReport, CommitTarget, EntryFailure, GroupOutcome, ReconciliationCommitter};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::inline::InlineCategorizer;
pub use crate::proposal::{ProposalStore, StoreState};
pub use crate::request::ProposalRequestBuilder;
pub use crate::selection::SelectionTracker;
pub use crate::services::{PersistenceService, SuggestionService};
pub use crate::settings::{CategorizationOptions, EngineSettings, WizardCommitMode};
pub use crate::sweeper::{EmptyTopicSweeper, SweepReport};
pub use crate::wizard::{CategorizationWizard, WizardReview, WizardStage};

use crate::models::TopicRef;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const DATABASE_FILE: &str = "reconciler.db";
const SETTINGS_FILE: &str = "settings.json";

/// Shared services plus settings; hands out the two categorization flows.
#[derive(Clone)]
pub struct ReconcilerEngine {
    persistence: Arc<dyn PersistenceService>,
    suggestions: Arc<dyn SuggestionService>,
    settings: EngineSettings,
}

impl ReconcilerEngine {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        suggestions: Arc<dyn SuggestionService>,
        settings: EngineSettings,
    ) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self {
            persistence,
            suggestions,
            settings,
        })
    }

    /// Opens `reconciler.db` and `settings.json` under `data_dir`, creating the directory.
    pub fn open_local(data_dir: &Path, suggestions: Arc<dyn SuggestionService>) -> AppResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let settings = EngineSettings::load(&data_dir.join(SETTINGS_FILE))?;
        let database = Database::new(&data_dir.join(DATABASE_FILE))?;
        tracing::info!(data_dir = %data_dir.display(), "reconciler engine opened");
        Self::new(Arc::new(database), suggestions, settings)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn persistence(&self) -> Arc<dyn PersistenceService> {
        Arc::clone(&self.persistence)
    }

    pub async fn inline(&self, view: TopicRef) -> AppResult<InlineCategorizer> {
        InlineCategorizer::open(
            Arc::clone(&self.persistence),
            Arc::clone(&self.suggestions),
            self.settings.clone(),
            view,
        )
        .await
    }

    pub async fn wizard(&self) -> AppResult<CategorizationWizard> {
        CategorizationWizard::open(
            Arc::clone(&self.persistence),
            Arc::clone(&self.suggestions),
            self.settings.clone(),
        )
        .await
    }
}

/// Installs JSON logging into a daily `reconciler.log` under `log_dir`.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "reconciler.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
