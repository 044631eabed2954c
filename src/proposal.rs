use crate::models::{
    Entry, EntryAssignment, EntryId, ExistingTopicBucket, NewTopicBucket, Proposal, TopicId, TopicSuggestion,
    UnassignedRecord, OMITTED_REASON, REJECTED_REASON,
};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Empty,
    Active,
}

/// The bucket an assignment was taken from, kept so it can be put back.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketOrigin {
    Existing {
        topic_id: TopicId,
        topic_name: String,
    },
    New {
        suggested_name: String,
        confidence: f64,
        rationale: String,
    },
}

impl BucketOrigin {
    pub fn label(&self) -> &str {
        match self {
            Self::Existing { topic_name, .. } => topic_name,
            Self::New { suggested_name, .. } => suggested_name,
        }
    }

    fn suggestion(&self, confidence: f64) -> TopicSuggestion {
        match self {
            Self::Existing { topic_id, topic_name } => TopicSuggestion {
                topic_id: Some(*topic_id),
                topic_name: topic_name.clone(),
                confidence,
            },
            Self::New { suggested_name, .. } => TopicSuggestion {
                topic_id: None,
                topic_name: suggested_name.clone(),
                confidence,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TakenAssignment {
    pub origin: BucketOrigin,
    pub assignment: EntryAssignment,
}

/// Where an entry currently sits inside the active proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalSlot {
    Existing(TopicId),
    New(String),
    Unassigned,
}

#[derive(Debug)]
struct ActiveProposal {
    id: Uuid,
    proposal: Proposal,
}

/// Owns the single outstanding proposal. Every entry id appears in exactly one
/// bucket or in `unassigned_entries`, and no bucket is ever left empty.
#[derive(Debug, Default)]
pub struct ProposalStore {
    active: Option<ActiveProposal>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StoreState {
        if self.active.is_some() {
            StoreState::Active
        } else {
            StoreState::Empty
        }
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.active.as_ref().map(|active| &active.proposal)
    }

    pub fn proposal_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Installs a freshly generated proposal. Ignored while one is active.
    pub fn populate(&mut self, proposal: Proposal) -> bool {
        if let Some(active) = &self.active {
            tracing::warn!(proposal_id = %active.id, "populate ignored: a proposal is already active");
            return false;
        }
        let id = Uuid::new_v4();
        let proposal = normalize(proposal);
        tracing::info!(
            proposal_id = %id,
            existing_buckets = proposal.existing_topic_assignments.len(),
            new_buckets = proposal.new_topic_proposals.len(),
            unassigned = proposal.unassigned_entries.len(),
            "proposal populated"
        );
        self.active = Some(ActiveProposal { id, proposal });
        true
    }

    /// Adds batch entries the service left out to `unassigned_entries`.
    pub fn account_for(&mut self, batch: &[Entry]) -> usize {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };
        let present = active.proposal.entry_ids().into_iter().collect::<HashSet<_>>();
        let mut added = 0usize;
        for entry in batch.iter().filter(|entry| !present.contains(&entry.id)) {
            active.proposal.unassigned_entries.push(UnassignedRecord {
                entry_id: entry.id,
                content: entry.content.clone(),
                reason: OMITTED_REASON.to_string(),
                top_suggestions: Vec::new(),
            });
            added += 1;
        }
        if added > 0 {
            tracing::warn!(proposal_id = %active.id, added, "suggestion service omitted batch entries");
        }
        added
    }

    pub fn slot_of(&self, entry_id: EntryId) -> Option<ProposalSlot> {
        let proposal = self.proposal()?;
        if let Some(bucket) = proposal
            .existing_topic_assignments
            .iter()
            .find(|bucket| bucket.entries.iter().any(|entry| entry.entry_id == entry_id))
        {
            return Some(ProposalSlot::Existing(bucket.topic_id));
        }
        if let Some(bucket) = proposal
            .new_topic_proposals
            .iter()
            .find(|bucket| bucket.entries.iter().any(|entry| entry.entry_id == entry_id))
        {
            return Some(ProposalSlot::New(bucket.suggested_name.clone()));
        }
        proposal
            .is_unassigned(entry_id)
            .then_some(ProposalSlot::Unassigned)
    }

    /// Removes the entry's assignment from whichever bucket holds it.
    /// The caller issues the matching remote move.
    pub fn accept_suggestion(&mut self, entry_id: EntryId) -> Option<TakenAssignment> {
        let active = self.active.as_mut()?;
        let taken = take_assignment(&mut active.proposal, entry_id)?;
        tracing::info!(proposal_id = %active.id, entry_id, topic = taken.origin.label(), "suggestion accepted");
        Some(taken)
    }

    /// Moves the entry from its bucket into `unassigned_entries`. Rejecting an
    /// already unassigned entry changes nothing.
    pub fn reject_suggestion(&mut self, entry_id: EntryId) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let Some(taken) = take_assignment(&mut active.proposal, entry_id) else {
            return false;
        };
        let suggestion = taken.origin.suggestion(taken.assignment.confidence);
        active.proposal.unassigned_entries.push(UnassignedRecord {
            entry_id,
            content: taken.assignment.content,
            reason: REJECTED_REASON.to_string(),
            top_suggestions: vec![suggestion],
        });
        tracing::info!(proposal_id = %active.id, entry_id, "suggestion rejected");
        true
    }

    /// Takes every bucketed assignment whose entry is selected, existing
    /// buckets first, preserving proposal order.
    pub fn take_selected(&mut self, selected: &HashSet<EntryId>) -> Vec<TakenAssignment> {
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };
        let targets = active
            .proposal
            .existing_topic_assignments
            .iter()
            .flat_map(|bucket| bucket.entries.iter())
            .chain(
                active
                    .proposal
                    .new_topic_proposals
                    .iter()
                    .flat_map(|bucket| bucket.entries.iter()),
            )
            .map(|entry| entry.entry_id)
            .filter(|entry_id| selected.contains(entry_id))
            .collect::<Vec<_>>();

        let taken = targets
            .into_iter()
            .filter_map(|entry_id| take_assignment(&mut active.proposal, entry_id))
            .collect::<Vec<_>>();
        tracing::info!(proposal_id = %active.id, taken = taken.len(), "selected suggestions taken");
        taken
    }

    /// Puts an assignment back into its origin bucket, recreating the bucket
    /// when it was removed.
    pub fn restore(&mut self, taken: TakenAssignment) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let entry_id = taken.assignment.entry_id;
        if active.proposal.entry_ids().contains(&entry_id) {
            return;
        }
        match taken.origin {
            BucketOrigin::Existing { topic_id, topic_name } => {
                match active
                    .proposal
                    .existing_topic_assignments
                    .iter_mut()
                    .find(|bucket| bucket.topic_id == topic_id)
                {
                    Some(bucket) => bucket.entries.push(taken.assignment),
                    None => active.proposal.existing_topic_assignments.push(ExistingTopicBucket {
                        topic_id,
                        topic_name,
                        entries: vec![taken.assignment],
                    }),
                }
            }
            BucketOrigin::New {
                suggested_name,
                confidence,
                rationale,
            } => {
                match active
                    .proposal
                    .new_topic_proposals
                    .iter_mut()
                    .find(|bucket| bucket.suggested_name == suggested_name)
                {
                    Some(bucket) => bucket.entries.push(taken.assignment),
                    None => active.proposal.new_topic_proposals.push(NewTopicBucket {
                        suggested_name,
                        confidence,
                        rationale,
                        entries: vec![taken.assignment],
                    }),
                }
            }
        }
        tracing::debug!(proposal_id = %active.id, entry_id, "assignment restored");
    }

    /// Drops an entry from the proposal entirely, e.g. after it was deleted.
    pub fn discard(&mut self, entry_id: EntryId) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if take_assignment(&mut active.proposal, entry_id).is_some() {
            return true;
        }
        let before = active.proposal.unassigned_entries.len();
        active
            .proposal
            .unassigned_entries
            .retain(|record| record.entry_id != entry_id);
        before != active.proposal.unassigned_entries.len()
    }

    pub fn clear(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(proposal_id = %active.id, "proposal cleared");
        }
    }
}

fn take_assignment(proposal: &mut Proposal, entry_id: EntryId) -> Option<TakenAssignment> {
    for index in 0..proposal.existing_topic_assignments.len() {
        let bucket = &mut proposal.existing_topic_assignments[index];
        if let Some(position) = bucket.entries.iter().position(|entry| entry.entry_id == entry_id) {
            let assignment = bucket.entries.remove(position);
            let origin = BucketOrigin::Existing {
                topic_id: bucket.topic_id,
                topic_name: bucket.topic_name.clone(),
            };
            if bucket.entries.is_empty() {
                proposal.existing_topic_assignments.remove(index);
            }
            return Some(TakenAssignment { origin, assignment });
        }
    }

    for index in 0..proposal.new_topic_proposals.len() {
        let bucket = &mut proposal.new_topic_proposals[index];
        if let Some(position) = bucket.entries.iter().position(|entry| entry.entry_id == entry_id) {
            let assignment = bucket.entries.remove(position);
            let origin = BucketOrigin::New {
                suggested_name: bucket.suggested_name.clone(),
                confidence: bucket.confidence,
                rationale: bucket.rationale.clone(),
            };
            if bucket.entries.is_empty() {
                proposal.new_topic_proposals.remove(index);
            }
            return Some(TakenAssignment { origin, assignment });
        }
    }

    None
}

/// Drops duplicate entry ids (first placement wins) and empty buckets.
fn normalize(mut proposal: Proposal) -> Proposal {
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;

    for bucket in &mut proposal.existing_topic_assignments {
        bucket.entries.retain(|entry| {
            let fresh = seen.insert(entry.entry_id);
            duplicates += usize::from(!fresh);
            fresh
        });
    }
    for bucket in &mut proposal.new_topic_proposals {
        bucket.entries.retain(|entry| {
            let fresh = seen.insert(entry.entry_id);
            duplicates += usize::from(!fresh);
            fresh
        });
    }
    proposal.unassigned_entries.retain(|record| {
        let fresh = seen.insert(record.entry_id);
        duplicates += usize::from(!fresh);
        fresh
    });

    proposal
        .existing_topic_assignments
        .retain(|bucket| !bucket.entries.is_empty());
    proposal
        .new_topic_proposals
        .retain(|bucket| !bucket.entries.is_empty());

    if duplicates > 0 {
        tracing::warn!(duplicates, "suggestion service placed entries more than once");
    }
    proposal
}
