use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use topic_reconciler_lib::models::{
    AnalyzeCategorizationRequest, CategorizationAnalysis, EntryAssignment, NewTopicBucket, Proposal, ProposedEntry,
    ProposedTopic, QuickCategorizeRequest, TopicRef, TopicSearchResult,
};
use topic_reconciler_lib::{
    AppResult, Database, EngineSettings, PersistenceService, ReconcilerEngine, StoreState, SuggestionService,
    WizardCommitMode, WizardStage,
};

#[derive(Default)]
struct CannedService {
    proposal: Mutex<Proposal>,
    analysis: Mutex<CategorizationAnalysis>,
}

#[async_trait]
impl SuggestionService for CannedService {
    async fn topic_suggestions(&self, _text: &str) -> AppResult<Vec<TopicSearchResult>> {
        Ok(Vec::new())
    }

    async fn quick_categorize(&self, _request: &QuickCategorizeRequest) -> AppResult<Proposal> {
        Ok(self.proposal.lock().expect("lock").clone())
    }

    async fn analyze_categorization(
        &self,
        _request: &AnalyzeCategorizationRequest,
    ) -> AppResult<CategorizationAnalysis> {
        Ok(self.analysis.lock().expect("lock").clone())
    }

    async fn apply_categorization(&self, _analysis: &CategorizationAnalysis) -> AppResult<()> {
        Ok(())
    }
}

fn assignment(entry_id: i64, content: &str) -> EntryAssignment {
    EntryAssignment {
        entry_id,
        content: content.to_string(),
        confidence: 0.85,
    }
}

fn proposed(entry_id: i64, content: &str, current: Option<i64>, proposed: Option<i64>) -> ProposedEntry {
    ProposedEntry {
        entry_id,
        content: content.to_string(),
        current_topic_id: current,
        proposed_topic_id: proposed,
        confidence_score: 0.8,
    }
}

#[tokio::test]
async fn inline_flow_accepts_selection_into_new_topic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = Arc::new(CannedService::default());
    let engine = ReconcilerEngine::open_local(dir.path(), service.clone()).expect("engine");
    let persistence = engine.persistence();

    // Seed through a second handle on the same file.
    let db = Database::new(&dir.path().join("reconciler.db")).expect("db");
    let flights = db.insert_entry("book flights to Lisbon", None).expect("entry");
    let hotel = db.insert_entry("reserve hotel", None).expect("entry");
    let groceries = db.insert_entry("buy groceries", None).expect("entry");

    *service.proposal.lock().expect("lock") = Proposal {
        new_topic_proposals: vec![NewTopicBucket {
            suggested_name: "Travel".to_string(),
            confidence: 0.9,
            rationale: "trip planning".to_string(),
            entries: vec![
                assignment(flights.id, "book flights to Lisbon"),
                assignment(hotel.id, "reserve hotel"),
            ],
        }],
        ..Proposal::default()
    };

    let mut panel = engine.inline(TopicRef::Uncategorized).await.expect("panel");
    assert_eq!(panel.entries().len(), 3);
    panel.toggle_selection(flights.id).expect("select");
    panel.toggle_selection(hotel.id).expect("select");
    panel.request_proposal(None).await.expect("proposal");

    let report = panel.accept_all_selected().await.expect("commit");
    assert!(report.is_complete());
    assert_eq!(report.created_topics().len(), 1);
    assert_eq!(panel.proposal_state(), StoreState::Empty);
    assert_eq!(panel.entries().len(), 1);
    assert_eq!(panel.entries()[0].id, groceries.id);

    let topics = persistence.get_topics().await.expect("topics");
    let travel = topics
        .iter()
        .find(|topic| topic.label() == "Travel")
        .expect("travel topic");
    assert!(!travel.is_pseudo());
    let travel_entries = db.list_entries(travel).expect("entries");
    assert_eq!(travel_entries.len(), 2);
}

#[tokio::test]
async fn wizard_flow_reorganizes_and_sweeps_empty_topic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = Arc::new(CannedService::default());
    let engine = ReconcilerEngine::open_local(dir.path(), service.clone()).expect("engine");

    let db = Database::new(&dir.path().join("reconciler.db")).expect("db");
    let inbox = db.insert_topic("Inbox").expect("topic");
    let work = db.insert_topic("Work").expect("topic");
    let standup = db.insert_entry("standup notes", Some(inbox.id)).expect("entry");
    let doodle = db.insert_entry("doodle", Some(inbox.id)).expect("entry");

    *service.analysis.lock().expect("lock") = CategorizationAnalysis {
        proposed_topics: vec![ProposedTopic {
            topic_id: Some(work.id),
            topic_name: "Work".to_string(),
            is_new: false,
            confidence_score: 0.9,
            entries: vec![proposed(standup.id, "standup notes", Some(inbox.id), Some(work.id))],
        }],
        uncategorized_entries: vec![proposed(doodle.id, "doodle", Some(inbox.id), None)],
    };

    let mut wizard = engine.wizard().await.expect("wizard");
    wizard.advance().await.expect("generate");
    let review = wizard.review().expect("review");
    assert!(!review.topics[0].is_new);
    assert_eq!(review.topics[0].entries[0].from.as_deref(), Some("Inbox"));
    assert_eq!(review.uncategorized[0].from.as_deref(), Some("Inbox"));

    wizard.advance().await.expect("confirm");
    assert_eq!(wizard.advance().await.expect("commit"), WizardStage::CleanupEmptyTopics);
    assert_eq!(db.get_entry(standup.id).expect("get").expect("entry").topic_id, Some(work.id));
    assert_eq!(db.get_entry(doodle.id).expect("get").expect("entry").topic_id, None);

    let candidates = wizard
        .cleanup_candidates()
        .iter()
        .map(|candidate| candidate.topic.name.clone())
        .collect::<Vec<_>>();
    assert_eq!(candidates, vec!["Inbox".to_string()]);

    wizard.toggle_cleanup(inbox.id).expect("mark");
    let sweep = wizard.confirm_cleanup().await.expect("sweep");
    assert_eq!(sweep.deleted, vec![inbox.id]);
    assert_eq!(wizard.stage(), WizardStage::Finished);
    assert_eq!(db.list_topics().expect("topics").len(), 1);
}

#[tokio::test]
async fn service_mode_settings_round_trip_through_data_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = EngineSettings {
        wizard_commit_mode: WizardCommitMode::Service,
        ..EngineSettings::default()
    };
    settings.save(&dir.path().join("settings.json")).expect("save");

    let engine = ReconcilerEngine::open_local(dir.path(), Arc::new(CannedService::default())).expect("engine");
    assert_eq!(engine.settings().wizard_commit_mode, WizardCommitMode::Service);

    let mut wizard = engine.wizard().await.expect("wizard");
    wizard.advance().await.expect("generate");
    wizard.advance().await.expect("confirm");
    assert_eq!(wizard.advance().await.expect("commit"), WizardStage::CleanupEmptyTopics);
    wizard.skip_cleanup().expect("skip");
    assert_eq!(wizard.stage(), WizardStage::Finished);
}
