use crate::committer::{group_assignments, CommitReport, CommitTarget, ReconciliationCommitter};
use crate::errors::{AppError, AppResult};
use crate::models::{Entry, EntryId, Placement, Proposal, TopicId, TopicRef, TopicSearchResult};
use crate::proposal::{ProposalStore, StoreState};
use crate::request::{ProposalRequestBuilder, RequestScope};
use crate::selection::SelectionTracker;
use crate::services::{PersistenceService, SuggestionService};
use crate::settings::EngineSettings;
use std::collections::HashSet;
use std::sync::Arc;

/// Categorization panel over one entry list, usually the uncategorized view.
///
/// Select entries, request a proposal for them, then accept or reject per
/// entry or accept every selected suggestion at once.
pub struct InlineCategorizer {
    persistence: Arc<dyn PersistenceService>,
    suggestions: Arc<dyn SuggestionService>,
    settings: EngineSettings,
    committer: ReconciliationCommitter,
    view: TopicRef,
    entries: Vec<Entry>,
    selection: SelectionTracker,
    store: ProposalStore,
}

impl InlineCategorizer {
    pub async fn open(
        persistence: Arc<dyn PersistenceService>,
        suggestions: Arc<dyn SuggestionService>,
        settings: EngineSettings,
        view: TopicRef,
    ) -> AppResult<Self> {
        settings.validate()?;
        let mut committer = ReconciliationCommitter::new(Arc::clone(&persistence), settings.move_concurrency);
        committer.seed().await?;
        let entries = persistence.get_entries(&view).await?;
        tracing::info!(view = view.label(), entries = entries.len(), "inline categorizer opened");
        Ok(Self {
            persistence,
            suggestions,
            settings,
            committer,
            view,
            entries,
            selection: SelectionTracker::new(),
            store: ProposalStore::new(),
        })
    }

    pub fn view(&self) -> &TopicRef {
        &self.view
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.store.proposal()
    }

    pub fn proposal_state(&self) -> StoreState {
        self.store.state()
    }

    pub fn toggle_selection(&mut self, entry_id: EntryId) -> AppResult<bool> {
        if !self.entries.iter().any(|entry| entry.id == entry_id) {
            return Err(AppError::NotFound(format!("entry {} is not in view", entry_id)));
        }
        Ok(self.selection.toggle(entry_id))
    }

    pub fn select_all(&mut self) {
        let visible = self.visible_ids();
        self.selection.select_all(&visible);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Reloads the entry list and drops selected ids that left the view.
    pub async fn refresh(&mut self) -> AppResult<()> {
        self.entries = self.persistence.get_entries(&self.view).await?;
        let visible = self.visible_ids();
        self.selection.retain_visible(&visible);
        Ok(())
    }

    /// Asks for a proposal covering the selection, or every uncategorized
    /// entry when nothing is selected in the uncategorized view. Any previous
    /// proposal is discarded first.
    pub async fn request_proposal(&mut self, instructions: Option<String>) -> AppResult<&Proposal> {
        let mut builder = ProposalRequestBuilder::new(self.settings.categorization_options())
            .entries(self.selection.sorted_ids())
            .all_uncategorized(matches!(self.view, TopicRef::Uncategorized));
        if let Some(instructions) = instructions {
            builder = builder.instructions(instructions);
        }
        let scope = builder.scope()?;
        let request = builder.build_quick()?;

        self.store.clear();
        let proposal = match self.suggestions.quick_categorize(&request).await {
            Ok(proposal) => proposal,
            Err(error) => {
                tracing::warn!(error = %error, "proposal request failed");
                return Err(error.into_request_failure());
            }
        };
        self.store.populate(proposal);

        let batch = match scope {
            RequestScope::Entries(ids) => {
                let wanted = ids.into_iter().collect::<HashSet<_>>();
                self.entries
                    .iter()
                    .filter(|entry| wanted.contains(&entry.id))
                    .cloned()
                    .collect::<Vec<_>>()
            }
            RequestScope::AllUncategorized => self
                .entries
                .iter()
                .filter(|entry| TopicRef::Uncategorized.contains(entry))
                .cloned()
                .collect::<Vec<_>>(),
        };
        self.store.account_for(&batch);

        self.store
            .proposal()
            .ok_or_else(|| AppError::Internal("proposal missing after populate".to_string()))
    }

    /// Accepts one suggestion, possibly edited to a different target.
    ///
    /// The entry leaves the proposal before the move is issued and is put
    /// back when the move fails.
    pub async fn accept_suggestion(
        &mut self,
        entry_id: EntryId,
        topic_id: Option<TopicId>,
        topic_name: &str,
        is_new: bool,
    ) -> AppResult<Placement> {
        let target = CommitTarget::from_suggestion(topic_id, topic_name, is_new)?;
        let taken = self
            .store
            .accept_suggestion(entry_id)
            .ok_or_else(|| AppError::NotFound(format!("entry {} has no pending suggestion", entry_id)))?;

        if matches!(target, CommitTarget::New { .. }) {
            if let Err(error) = self.committer.seed().await {
                self.store.restore(taken);
                return Err(error);
            }
        }
        let placement = match self.committer.commit_entry(&target, entry_id).await {
            Ok(placement) => placement,
            Err(error) => {
                self.store.restore(taken);
                return Err(error);
            }
        };

        self.apply_moves(&[entry_id], placement);
        self.finish_if_resolved();
        Ok(placement)
    }

    /// Sends the entry to `unassigned_entries`. Local only.
    pub fn reject_suggestion(&mut self, entry_id: EntryId) -> bool {
        let rejected = self.store.reject_suggestion(entry_id);
        if rejected {
            self.selection.invalidate([entry_id]);
        }
        rejected
    }

    /// Commits every selected suggestion. Failed entries return to their
    /// bucket so a second call retries only them; successful moves stay.
    pub async fn accept_all_selected(&mut self) -> AppResult<CommitReport> {
        if self.store.state() == StoreState::Empty {
            return Err(AppError::InvalidState("no active proposal".to_string()));
        }
        let taken = self.store.take_selected(self.selection.ids());
        if taken.is_empty() {
            return Err(AppError::Validation(
                "None of the selected entries has a suggestion to accept".to_string(),
            ));
        }

        if let Err(error) = self.committer.seed().await {
            for item in taken {
                self.store.restore(item);
            }
            return Err(error);
        }
        let report = self.committer.commit_groups(group_assignments(&taken)).await;

        let failed = report.failed_entries().into_iter().collect::<HashSet<_>>();
        for item in taken {
            if failed.contains(&item.assignment.entry_id) {
                self.store.restore(item);
            }
        }
        for group in &report.groups {
            let placement = group.topic_id.map_or(Placement::Uncategorized, Placement::Topic);
            self.apply_moves(&group.moved, placement);
        }

        tracing::info!(
            moved = report.moved_entries().len(),
            failed = failed.len(),
            "accept all selected finished"
        );
        let has_buckets = self.store.proposal().is_some_and(Proposal::has_buckets);
        if report.is_complete() && !has_buckets {
            self.store.clear();
        }
        Ok(report)
    }

    /// Deletes the entry everywhere the panel knows about it.
    pub async fn delete_entry(&mut self, entry_id: EntryId) -> AppResult<()> {
        self.persistence.delete_entry(entry_id).await?;
        self.entries.retain(|entry| entry.id != entry_id);
        self.selection.invalidate([entry_id]);
        self.store.discard(entry_id);
        tracing::info!(entry_id, "entry deleted");
        Ok(())
    }

    /// Dismisses the outstanding proposal.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Live-typing topic suggestions for a draft, best first.
    pub async fn suggest_topics_for_draft(&self, text: &str) -> AppResult<Vec<TopicSearchResult>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let min_score = self.settings.min_confidence_threshold;
        let mut results = self
            .suggestions
            .topic_suggestions(text)
            .await
            .map_err(AppError::into_request_failure)?
            .into_iter()
            .filter(|result| result.score >= min_score)
            .collect::<Vec<_>>();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    fn visible_ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    fn apply_moves(&mut self, moved: &[EntryId], placement: Placement) {
        if moved.is_empty() {
            return;
        }
        let moved = moved.iter().copied().collect::<HashSet<_>>();
        for entry in self.entries.iter_mut().filter(|entry| moved.contains(&entry.id)) {
            entry.topic_id = placement.topic_id();
        }
        let view = &self.view;
        self.entries
            .retain(|entry| !moved.contains(&entry.id) || view.contains(entry));
        self.selection.invalidate(moved);
    }

    fn finish_if_resolved(&mut self) {
        let resolved = self
            .store
            .proposal()
            .is_some_and(|proposal| !proposal.has_buckets() && proposal.unassigned_entries.is_empty());
        if resolved {
            self.store.clear();
        }
    }
}
