use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AnalyzeCategorizationRequest, CategorizationAnalysis, Entry, EntryAssignment, EntryId, EntryUpdate,
    ExistingTopicBucket, NewTopicBucket, Proposal, ProposedEntry, ProposedTopic, QuickCategorizeRequest, Topic,
    TopicId, TopicRef, TopicSearchResult,
};
use crate::services::{PersistenceService, SuggestionService};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Mutex;

pub(crate) fn assignment(entry_id: EntryId, content: &str, confidence: f64) -> EntryAssignment {
    EntryAssignment {
        entry_id,
        content: content.to_string(),
        confidence,
    }
}

pub(crate) fn existing_bucket(topic_id: TopicId, name: &str, entries: &[(EntryId, &str, f64)]) -> ExistingTopicBucket {
    ExistingTopicBucket {
        topic_id,
        topic_name: name.to_string(),
        entries: entries
            .iter()
            .map(|(id, content, confidence)| assignment(*id, content, *confidence))
            .collect(),
    }
}

pub(crate) fn new_bucket(name: &str, entries: &[(EntryId, &str, f64)]) -> NewTopicBucket {
    NewTopicBucket {
        suggested_name: name.to_string(),
        confidence: 0.8,
        rationale: format!("entries about {}", name.to_lowercase()),
        entries: entries
            .iter()
            .map(|(id, content, confidence)| assignment(*id, content, *confidence))
            .collect(),
    }
}

pub(crate) fn sample_entry(id: EntryId, content: &str, topic_id: Option<TopicId>) -> Entry {
    Entry {
        id,
        content: content.to_string(),
        topic_id,
        created_at: Utc::now(),
    }
}

pub(crate) fn proposed_entry(entry: &Entry, proposed_topic_id: Option<TopicId>) -> ProposedEntry {
    ProposedEntry {
        entry_id: entry.id,
        content: entry.content.clone(),
        current_topic_id: entry.topic_id,
        proposed_topic_id,
        confidence_score: 0.9,
    }
}

pub(crate) fn proposed_topic(topic_id: Option<TopicId>, name: &str, entries: Vec<ProposedEntry>) -> ProposedTopic {
    ProposedTopic {
        topic_id,
        topic_name: name.to_string(),
        is_new: topic_id.is_none(),
        confidence_score: 0.85,
        entries,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StoreCall {
    CreateTopic(String),
    DeleteTopic(TopicId),
    UpdateEntry(EntryId, EntryUpdate),
    DeleteEntry(EntryId),
}

/// In-memory database that records mutating calls and fails on request.
pub(crate) struct RecordingStore {
    pub(crate) db: Database,
    calls: Mutex<Vec<StoreCall>>,
    failing_topic_names: Mutex<HashSet<String>>,
    failing_moves: Mutex<HashSet<EntryId>>,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self {
            db: Database::in_memory().expect("in-memory db"),
            calls: Mutex::new(Vec::new()),
            failing_topic_names: Mutex::new(HashSet::new()),
            failing_moves: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn fail_create_topic(&self, name: &str) {
        self.failing_topic_names
            .lock()
            .expect("lock")
            .insert(name.to_lowercase());
    }

    pub(crate) fn fail_move(&self, entry_id: EntryId) {
        self.failing_moves.lock().expect("lock").insert(entry_id);
    }

    pub(crate) fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub(crate) fn created_topics(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::CreateTopic(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn entry_updates(&self) -> Vec<(EntryId, EntryUpdate)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UpdateEntry(id, update) => Some((id, update)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn topic_of(&self, entry_id: EntryId) -> Option<TopicId> {
        self.db
            .get_entry(entry_id)
            .expect("get entry")
            .expect("entry exists")
            .topic_id
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().expect("lock").push(call);
    }
}

#[async_trait]
impl PersistenceService for RecordingStore {
    async fn create_topic(&self, name: &str) -> AppResult<Topic> {
        self.record(StoreCall::CreateTopic(name.to_string()));
        if self
            .failing_topic_names
            .lock()
            .expect("lock")
            .contains(&name.to_lowercase())
        {
            return Err(AppError::Request(format!("create topic '{}' failed", name)));
        }
        self.db.insert_topic(name)
    }

    async fn get_topics(&self) -> AppResult<Vec<TopicRef>> {
        self.db.get_topics().await
    }

    async fn update_topic(&self, topic_id: TopicId, name: &str) -> AppResult<Topic> {
        self.db.rename_topic(topic_id, name)
    }

    async fn delete_topic(&self, topic_id: TopicId) -> AppResult<()> {
        self.record(StoreCall::DeleteTopic(topic_id));
        self.db.remove_topic(topic_id)
    }

    async fn get_entries(&self, view: &TopicRef) -> AppResult<Vec<Entry>> {
        self.db.list_entries(view)
    }

    async fn update_entry(&self, entry_id: EntryId, update: EntryUpdate) -> AppResult<Entry> {
        self.record(StoreCall::UpdateEntry(entry_id, update.clone()));
        if self.failing_moves.lock().expect("lock").contains(&entry_id) {
            return Err(AppError::Request(format!("move of entry {} failed", entry_id)));
        }
        self.db.patch_entry(entry_id, update)
    }

    async fn delete_entry(&self, entry_id: EntryId) -> AppResult<()> {
        self.record(StoreCall::DeleteEntry(entry_id));
        self.db.remove_entry(entry_id)
    }
}

/// Suggestion service returning canned responses; `None` means the call fails.
#[derive(Default)]
pub(crate) struct ScriptedSuggestions {
    pub(crate) proposal: Mutex<Option<Proposal>>,
    pub(crate) analysis: Mutex<Option<CategorizationAnalysis>>,
    pub(crate) draft_results: Mutex<Vec<TopicSearchResult>>,
    pub(crate) quick_requests: Mutex<Vec<QuickCategorizeRequest>>,
    pub(crate) analyze_requests: Mutex<Vec<AnalyzeCategorizationRequest>>,
    pub(crate) applied: Mutex<Vec<CategorizationAnalysis>>,
}

impl ScriptedSuggestions {
    pub(crate) fn with_proposal(proposal: Proposal) -> Self {
        let scripted = Self::default();
        *scripted.proposal.lock().expect("lock") = Some(proposal);
        scripted
    }

    pub(crate) fn with_analysis(analysis: CategorizationAnalysis) -> Self {
        let scripted = Self::default();
        *scripted.analysis.lock().expect("lock") = Some(analysis);
        scripted
    }
}

#[async_trait]
impl SuggestionService for ScriptedSuggestions {
    async fn topic_suggestions(&self, _text: &str) -> AppResult<Vec<TopicSearchResult>> {
        Ok(self.draft_results.lock().expect("lock").clone())
    }

    async fn quick_categorize(&self, request: &QuickCategorizeRequest) -> AppResult<Proposal> {
        self.quick_requests.lock().expect("lock").push(request.clone());
        self.proposal
            .lock()
            .expect("lock")
            .clone()
            .ok_or_else(|| AppError::Request("suggestion service unavailable".to_string()))
    }

    async fn analyze_categorization(
        &self,
        request: &AnalyzeCategorizationRequest,
    ) -> AppResult<CategorizationAnalysis> {
        self.analyze_requests.lock().expect("lock").push(request.clone());
        self.analysis
            .lock()
            .expect("lock")
            .clone()
            .ok_or_else(|| AppError::Request("suggestion service unavailable".to_string()))
    }

    async fn apply_categorization(&self, analysis: &CategorizationAnalysis) -> AppResult<()> {
        self.applied.lock().expect("lock").push(analysis.clone());
        Ok(())
    }
}
