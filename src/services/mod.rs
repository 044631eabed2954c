use crate::errors::AppResult;
use crate::models::{
    AnalyzeCategorizationRequest, CategorizationAnalysis, Entry, EntryId, EntryUpdate, Proposal,
    QuickCategorizeRequest, Topic, TopicId, TopicRef, TopicSearchResult,
};
use async_trait::async_trait;

/// Authoritative entry/topic storage.
///
/// Implementations return `AppError::StaleReference` when an update targets a
/// topic that no longer exists, and `AppError::NotFound` for unknown entries.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    async fn create_topic(&self, name: &str) -> AppResult<Topic>;
    /// Real topics annotated with `entry_count`, plus the uncategorized pseudo-topic.
    async fn get_topics(&self) -> AppResult<Vec<TopicRef>>;
    async fn update_topic(&self, topic_id: TopicId, name: &str) -> AppResult<Topic>;
    async fn delete_topic(&self, topic_id: TopicId) -> AppResult<()>;
    async fn get_entries(&self, view: &TopicRef) -> AppResult<Vec<Entry>>;
    async fn update_entry(&self, entry_id: EntryId, update: EntryUpdate) -> AppResult<Entry>;
    async fn delete_entry(&self, entry_id: EntryId) -> AppResult<()>;
}

/// The AI categorization backend. Any failure surfaces as `AppError::Request`.
#[async_trait]
pub trait SuggestionService: Send + Sync {
    async fn topic_suggestions(&self, text: &str) -> AppResult<Vec<TopicSearchResult>>;
    async fn quick_categorize(&self, request: &QuickCategorizeRequest) -> AppResult<Proposal>;
    async fn analyze_categorization(
        &self,
        request: &AnalyzeCategorizationRequest,
    ) -> AppResult<CategorizationAnalysis>;
    /// Best-effort: the service does not promise atomic application.
    async fn apply_categorization(&self, analysis: &CategorizationAnalysis) -> AppResult<()>;
}
