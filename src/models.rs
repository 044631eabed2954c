use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EntryId = i64;
pub type TopicId = i64;

pub const UNCATEGORIZED_LABEL: &str = "Uncategorized";
pub const ALL_TOPICS_LABEL: &str = "All";
pub const REJECTED_REASON: &str = "Rejected suggestion";
pub const OMITTED_REASON: &str = "Not returned by suggestion service";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Entry {
    pub id: EntryId,
    pub content: String,
    pub topic_id: Option<TopicId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    #[serde(default)]
    pub entry_count: Option<u64>,
}

/// A topic as the views see it: either a persisted topic or one of the two
/// pseudo-topics, which have no id and are never sent to persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopicRef {
    Real(Topic),
    Uncategorized,
    AllTopics,
}

impl TopicRef {
    pub fn topic_id(&self) -> Option<TopicId> {
        match self {
            Self::Real(topic) => Some(topic.id),
            Self::Uncategorized | Self::AllTopics => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Real(topic) => topic.name.as_str(),
            Self::Uncategorized => UNCATEGORIZED_LABEL,
            Self::AllTopics => ALL_TOPICS_LABEL,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        !matches!(self, Self::Real(_))
    }

    /// Whether an entry belongs in the view this topic reference selects.
    pub fn contains(&self, entry: &Entry) -> bool {
        match self {
            Self::Real(topic) => entry.topic_id == Some(topic.id),
            Self::Uncategorized => entry.topic_id.is_none(),
            Self::AllTopics => true,
        }
    }
}

/// Where a move sends an entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Topic(TopicId),
    Uncategorized,
}

impl Placement {
    pub fn topic_id(self) -> Option<TopicId> {
        match self {
            Self::Topic(id) => Some(id),
            Self::Uncategorized => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct EntryUpdate {
    pub content: Option<String>,
    pub placement: Option<Placement>,
}

impl EntryUpdate {
    pub fn move_to(placement: Placement) -> Self {
        Self {
            content: None,
            placement: Some(placement),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct EntryAssignment {
    pub entry_id: EntryId,
    pub content: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ExistingTopicBucket {
    pub topic_id: TopicId,
    pub topic_name: String,
    pub entries: Vec<EntryAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NewTopicBucket {
    pub suggested_name: String,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    pub entries: Vec<EntryAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TopicSuggestion {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct UnassignedRecord {
    pub entry_id: EntryId,
    pub content: String,
    pub reason: String,
    #[serde(default)]
    pub top_suggestions: Vec<TopicSuggestion>,
}

/// Informational only; nothing reads these counts to drive control flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ProposalMetadata {
    pub total_entries_analyzed: usize,
    pub assigned_to_existing: usize,
    pub assigned_to_new: usize,
    pub unassigned: usize,
    pub average_confidence: f64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Proposal {
    #[serde(default)]
    pub existing_topic_assignments: Vec<ExistingTopicBucket>,
    #[serde(default)]
    pub new_topic_proposals: Vec<NewTopicBucket>,
    #[serde(default)]
    pub unassigned_entries: Vec<UnassignedRecord>,
    #[serde(default)]
    pub metadata: ProposalMetadata,
}

impl Proposal {
    /// Every entry id in the proposal, buckets first, in document order.
    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.existing_topic_assignments
            .iter()
            .flat_map(|bucket| bucket.entries.iter().map(|entry| entry.entry_id))
            .chain(
                self.new_topic_proposals
                    .iter()
                    .flat_map(|bucket| bucket.entries.iter().map(|entry| entry.entry_id)),
            )
            .chain(self.unassigned_entries.iter().map(|record| record.entry_id))
            .collect()
    }

    pub fn assignment_count(&self) -> usize {
        self.existing_topic_assignments
            .iter()
            .map(|bucket| bucket.entries.len())
            .chain(self.new_topic_proposals.iter().map(|bucket| bucket.entries.len()))
            .sum()
    }

    pub fn has_buckets(&self) -> bool {
        !self.existing_topic_assignments.is_empty() || !self.new_topic_proposals.is_empty()
    }

    pub fn is_unassigned(&self, entry_id: EntryId) -> bool {
        self.unassigned_entries
            .iter()
            .any(|record| record.entry_id == entry_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TopicSearchResult {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub score: f64,
    #[serde(default)]
    pub is_new_topic: bool,
    #[serde(default)]
    pub is_ai_suggested: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct QuickCategorizeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_topics: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(rename = "entryIds", skip_serializing_if = "Option::is_none")]
    pub entry_ids: Option<Vec<EntryId>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AnalyzeCategorizationRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics_to_keep: Vec<TopicId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ProposedEntry {
    pub entry_id: EntryId,
    pub content: String,
    pub current_topic_id: Option<TopicId>,
    pub proposed_topic_id: Option<TopicId>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ProposedTopic {
    pub topic_id: Option<TopicId>,
    pub topic_name: String,
    pub is_new: bool,
    pub confidence_score: f64,
    pub entries: Vec<ProposedEntry>,
}

/// Whole-library re-derivation of the topic set, as produced by
/// `analyzeCategorization` and consumed by `applyCategorization`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CategorizationAnalysis {
    #[serde(default)]
    pub proposed_topics: Vec<ProposedTopic>,
    #[serde(default)]
    pub uncategorized_entries: Vec<ProposedEntry>,
}

impl CategorizationAnalysis {
    pub fn entry_count(&self) -> usize {
        self.proposed_topics
            .iter()
            .map(|topic| topic.entries.len())
            .sum::<usize>()
            + self.uncategorized_entries.len()
    }
}
