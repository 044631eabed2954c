use crate::committer::{CommitGroup, CommitReport, CommitTarget, ReconciliationCommitter};
use crate::errors::{AppError, AppResult};
use crate::models::{
    CategorizationAnalysis, EntryId, ProposedEntry, Topic, TopicId, TopicRef, UNCATEGORIZED_LABEL,
};
use crate::request::ProposalRequestBuilder;
use crate::services::{PersistenceService, SuggestionService};
use crate::settings::{EngineSettings, WizardCommitMode};
use crate::sweeper::{EmptyTopicCandidate, EmptyTopicSweeper, SweepReport};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WizardStage {
    SelectKeepTopics,
    ReviewProposal,
    Confirm,
    CleanupEmptyTopics,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewEntry {
    pub entry_id: EntryId,
    pub content: String,
    /// Current placement label, present only when the entry would move.
    pub from: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewTopic {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub is_new: bool,
    pub confidence: f64,
    pub entries: Vec<ReviewEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WizardReview {
    pub topics: Vec<ReviewTopic>,
    pub uncategorized: Vec<ReviewEntry>,
}

/// Whole-library reorganization:
/// keep-topics selection, review, confirm and commit, then empty-topic cleanup.
///
/// Going back keeps earlier input. Once the commit succeeded there is no way back.
pub struct CategorizationWizard {
    persistence: Arc<dyn PersistenceService>,
    suggestions: Arc<dyn SuggestionService>,
    settings: EngineSettings,
    committer: ReconciliationCommitter,
    stage: WizardStage,
    topics: Vec<Topic>,
    topics_to_keep: BTreeSet<TopicId>,
    instructions: Option<String>,
    analysis: Option<CategorizationAnalysis>,
    last_report: Option<CommitReport>,
    sweeper: Option<EmptyTopicSweeper>,
}

impl CategorizationWizard {
    pub async fn open(
        persistence: Arc<dyn PersistenceService>,
        suggestions: Arc<dyn SuggestionService>,
        settings: EngineSettings,
    ) -> AppResult<Self> {
        settings.validate()?;
        let mut committer = ReconciliationCommitter::new(Arc::clone(&persistence), settings.move_concurrency);
        committer.seed().await?;
        let topics = real_topics(persistence.get_topics().await?);
        tracing::info!(topics = topics.len(), "categorization wizard opened");
        Ok(Self {
            persistence,
            suggestions,
            settings,
            committer,
            stage: WizardStage::SelectKeepTopics,
            topics,
            topics_to_keep: BTreeSet::new(),
            instructions: None,
            analysis: None,
            last_report: None,
            sweeper: None,
        })
    }

    pub fn stage(&self) -> WizardStage {
        self.stage
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topics_to_keep(&self) -> &BTreeSet<TopicId> {
        &self.topics_to_keep
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn analysis(&self) -> Option<&CategorizationAnalysis> {
        self.analysis.as_ref()
    }

    pub fn last_report(&self) -> Option<&CommitReport> {
        self.last_report.as_ref()
    }

    pub fn toggle_keep_topic(&mut self, topic_id: TopicId) -> AppResult<bool> {
        self.require_stage(WizardStage::SelectKeepTopics)?;
        if !self.topics.iter().any(|topic| topic.id == topic_id) {
            return Err(AppError::NotFound(format!("topic {}", topic_id)));
        }
        if self.topics_to_keep.remove(&topic_id) {
            Ok(false)
        } else {
            self.topics_to_keep.insert(topic_id);
            Ok(true)
        }
    }

    pub fn set_instructions(&mut self, instructions: Option<String>) -> AppResult<()> {
        self.require_stage(WizardStage::SelectKeepTopics)?;
        self.instructions = instructions;
        Ok(())
    }

    /// Moves to the next stage once the current one is complete.
    pub async fn advance(&mut self) -> AppResult<WizardStage> {
        match self.stage {
            WizardStage::SelectKeepTopics => self.generate().await?,
            WizardStage::ReviewProposal => {
                if self.analysis.is_none() {
                    return Err(AppError::InvalidState("no proposal to review".to_string()));
                }
                self.stage = WizardStage::Confirm;
            }
            WizardStage::Confirm => self.commit().await?,
            WizardStage::CleanupEmptyTopics => {
                self.confirm_cleanup().await?;
            }
            WizardStage::Finished => {
                return Err(AppError::InvalidState("wizard already finished".to_string()));
            }
        }
        Ok(self.stage)
    }

    /// Returns to an earlier stage without discarding input. Not allowed after commit.
    pub fn back_to(&mut self, stage: WizardStage) -> AppResult<()> {
        if self.stage > WizardStage::Confirm {
            return Err(AppError::InvalidState(
                "changes are already committed; going back is not possible".to_string(),
            ));
        }
        if stage >= self.stage {
            return Err(AppError::InvalidState(format!(
                "cannot go back from {:?} to {:?}",
                self.stage, stage
            )));
        }
        self.stage = stage;
        Ok(())
    }

    async fn generate(&mut self) -> AppResult<()> {
        let mut builder = ProposalRequestBuilder::new(self.settings.categorization_options())
            .topics_to_keep(self.topics_to_keep.iter().copied());
        if let Some(instructions) = &self.instructions {
            builder = builder.instructions(instructions.clone());
        }
        let request = builder.build_analysis()?;

        match self.suggestions.analyze_categorization(&request).await {
            Ok(analysis) => {
                tracing::info!(
                    proposed_topics = analysis.proposed_topics.len(),
                    entries = analysis.entry_count(),
                    "whole-library analysis received"
                );
                self.analysis = Some(analysis);
                self.last_report = None;
                self.stage = WizardStage::ReviewProposal;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(error = %error, "whole-library analysis failed");
                self.analysis = None;
                Err(error.into_request_failure())
            }
        }
    }

    pub fn review(&self) -> Option<WizardReview> {
        let analysis = self.analysis.as_ref()?;
        let topics = analysis
            .proposed_topics
            .iter()
            .map(|topic| {
                let is_new = topic.is_new || topic.topic_id.is_none();
                ReviewTopic {
                    topic_id: topic.topic_id,
                    topic_name: topic.topic_name.clone(),
                    is_new,
                    confidence: topic.confidence_score,
                    entries: topic
                        .entries
                        .iter()
                        .map(|entry| {
                            let moves = is_new || entry.current_topic_id != topic.topic_id;
                            self.review_entry(entry, moves)
                        })
                        .collect(),
                }
            })
            .collect();
        let uncategorized = analysis
            .uncategorized_entries
            .iter()
            .map(|entry| {
                let moves = entry
                    .current_topic_id
                    .is_some_and(|topic_id| !self.topics_to_keep.contains(&topic_id));
                self.review_entry(entry, moves)
            })
            .collect();
        Some(WizardReview { topics, uncategorized })
    }

    fn review_entry(&self, entry: &ProposedEntry, moves: bool) -> ReviewEntry {
        let from = moves.then(|| self.placement_label(entry.current_topic_id));
        ReviewEntry {
            entry_id: entry.entry_id,
            content: entry.content.clone(),
            from,
            confidence: entry.confidence_score,
        }
    }

    fn placement_label(&self, topic_id: Option<TopicId>) -> String {
        match topic_id {
            None => UNCATEGORIZED_LABEL.to_string(),
            Some(topic_id) => self
                .committer
                .topic_name(topic_id)
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("Topic {}", topic_id)),
        }
    }

    async fn commit(&mut self) -> AppResult<()> {
        let analysis = self
            .analysis
            .clone()
            .ok_or_else(|| AppError::InvalidState("no proposal to commit".to_string()))?;

        match self.settings.wizard_commit_mode {
            WizardCommitMode::Service => {
                self.suggestions
                    .apply_categorization(&analysis)
                    .await
                    .map_err(|error| {
                        tracing::warn!(error = %error, "service-side categorization apply failed");
                        error.into_request_failure()
                    })?;
                tracing::info!("service-side categorization applied");
            }
            WizardCommitMode::Client => {
                let already_moved = self
                    .last_report
                    .as_ref()
                    .map(|report| report.moved_entries().into_iter().collect::<HashSet<_>>())
                    .unwrap_or_default();
                let groups = commit_groups(&analysis, &self.topics_to_keep)
                    .into_iter()
                    .filter_map(|mut group| {
                        group.entries.retain(|entry_id| !already_moved.contains(entry_id));
                        (!group.entries.is_empty()).then_some(group)
                    })
                    .collect::<Vec<_>>();

                self.committer.seed().await?;
                let mut report = self.committer.commit_groups(groups).await;
                if let Some(previous) = self.last_report.take() {
                    let mut merged = previous;
                    for group in &mut merged.groups {
                        group.failed.clear();
                    }
                    merged.groups.append(&mut report.groups);
                    report = merged;
                }
                let complete = report.is_complete();
                let summary = (report.moved_entries().len(), report.failed_entries().len());
                self.last_report = Some(report);
                if !complete {
                    tracing::warn!(moved = summary.0, failed = summary.1, "wizard commit incomplete");
                    return Err(AppError::PartialCommit {
                        moved: summary.0,
                        failed: summary.1,
                    });
                }
            }
        }

        match EmptyTopicSweeper::scan(Arc::clone(&self.persistence)).await {
            Ok(sweeper) => {
                self.sweeper = Some(sweeper);
                self.stage = WizardStage::CleanupEmptyTopics;
            }
            Err(error) => {
                tracing::warn!(error = %error, "empty topic scan failed; skipping cleanup");
                self.stage = WizardStage::Finished;
            }
        }
        Ok(())
    }

    pub fn cleanup_candidates(&self) -> &[EmptyTopicCandidate] {
        self.sweeper
            .as_ref()
            .map(EmptyTopicSweeper::candidates)
            .unwrap_or(&[])
    }

    pub fn toggle_cleanup(&mut self, topic_id: TopicId) -> AppResult<bool> {
        self.require_stage(WizardStage::CleanupEmptyTopics)?;
        let sweeper = self
            .sweeper
            .as_mut()
            .ok_or_else(|| AppError::InvalidState("no cleanup in progress".to_string()))?;
        sweeper.toggle(topic_id)
    }

    /// Deletes the checked empty topics and finishes.
    pub async fn confirm_cleanup(&mut self) -> AppResult<SweepReport> {
        self.require_stage(WizardStage::CleanupEmptyTopics)?;
        let report = match self.sweeper.as_mut() {
            Some(sweeper) => sweeper.delete_marked().await,
            None => SweepReport::default(),
        };
        self.stage = WizardStage::Finished;
        Ok(report)
    }

    /// Leaves without deleting anything.
    pub fn skip_cleanup(&mut self) -> AppResult<()> {
        self.require_stage(WizardStage::CleanupEmptyTopics)?;
        self.sweeper = None;
        self.stage = WizardStage::Finished;
        Ok(())
    }

    fn require_stage(&self, stage: WizardStage) -> AppResult<()> {
        if self.stage != stage {
            return Err(AppError::InvalidState(format!(
                "expected stage {:?}, wizard is at {:?}",
                stage, self.stage
            )));
        }
        Ok(())
    }
}

/// Translates a whole-library analysis into commit groups, skipping moves that
/// would leave an entry where it already is. Entries sitting in a kept topic
/// are not sent back to uncategorized.
pub fn commit_groups(analysis: &CategorizationAnalysis, topics_to_keep: &BTreeSet<TopicId>) -> Vec<CommitGroup> {
    let mut groups = Vec::new();
    for topic in &analysis.proposed_topics {
        let target = match topic.topic_id {
            Some(topic_id) if !topic.is_new => CommitTarget::Existing {
                topic_id,
                topic_name: topic.topic_name.clone(),
            },
            _ => CommitTarget::New {
                topic_name: topic.topic_name.clone(),
            },
        };
        let destination = match &target {
            CommitTarget::Existing { topic_id, .. } => Some(*topic_id),
            CommitTarget::New { .. } | CommitTarget::Uncategorized => None,
        };
        let entries = topic
            .entries
            .iter()
            .filter(|entry| destination.is_none() || entry.current_topic_id != destination)
            .map(|entry| entry.entry_id)
            .collect::<Vec<_>>();
        if !entries.is_empty() {
            groups.push(CommitGroup { target, entries });
        }
    }

    let uncategorize = analysis
        .uncategorized_entries
        .iter()
        .filter(|entry| {
            entry
                .current_topic_id
                .is_some_and(|topic_id| !topics_to_keep.contains(&topic_id))
        })
        .map(|entry| entry.entry_id)
        .collect::<Vec<_>>();
    if !uncategorize.is_empty() {
        groups.push(CommitGroup {
            target: CommitTarget::Uncategorized,
            entries: uncategorize,
        });
    }
    groups
}

fn real_topics(topics: Vec<TopicRef>) -> Vec<Topic> {
    topics
        .into_iter()
        .filter_map(|topic| match topic {
            TopicRef::Real(topic) => Some(topic),
            TopicRef::Uncategorized | TopicRef::AllTopics => None,
        })
        .collect()
}
