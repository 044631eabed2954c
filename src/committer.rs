use crate::errors::{AppError, AppResult};
use crate::models::{EntryId, EntryUpdate, Placement, TopicId, TopicRef, UNCATEGORIZED_LABEL};
use crate::proposal::{BucketOrigin, TakenAssignment};
use crate::services::PersistenceService;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Where an accepted group of entries should end up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitTarget {
    Existing { topic_id: TopicId, topic_name: String },
    New { topic_name: String },
    Uncategorized,
}

impl CommitTarget {
    /// Builds a target from the loose `(topic_id, topic_name, is_new)` triple a
    /// view hands over when the user accepts or edits one suggestion.
    pub fn from_suggestion(topic_id: Option<TopicId>, topic_name: &str, is_new: bool) -> AppResult<Self> {
        if is_new {
            let name = topic_name.trim();
            if name.is_empty() {
                return Err(AppError::Validation("New topic name cannot be empty".to_string()));
            }
            return Ok(Self::New {
                topic_name: name.to_string(),
            });
        }
        let topic_id = topic_id.ok_or_else(|| {
            AppError::Validation(format!("Existing topic '{}' needs a topic id", topic_name))
        })?;
        Ok(Self::Existing {
            topic_id,
            topic_name: topic_name.to_string(),
        })
    }

    pub fn from_origin(origin: &BucketOrigin) -> Self {
        match origin {
            BucketOrigin::Existing { topic_id, topic_name } => Self::Existing {
                topic_id: *topic_id,
                topic_name: topic_name.clone(),
            },
            BucketOrigin::New { suggested_name, .. } => Self::New {
                topic_name: suggested_name.clone(),
            },
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Existing { topic_name, .. } | Self::New { topic_name } => topic_name,
            Self::Uncategorized => UNCATEGORIZED_LABEL,
        }
    }

    fn group_key(&self) -> GroupKey {
        match self {
            Self::Existing { topic_id, .. } => GroupKey::Existing(*topic_id),
            Self::New { topic_name } => GroupKey::New(normalize_topic_name(topic_name)),
            Self::Uncategorized => GroupKey::Uncategorized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Existing(TopicId),
    New(String),
    Uncategorized,
}

/// Case-insensitive exact matching key for topic names.
pub fn normalize_topic_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitGroup {
    pub target: CommitTarget,
    pub entries: Vec<EntryId>,
}

/// Groups taken assignments by target. New-topic names that differ only in
/// case share one group, named after the first spelling seen.
pub fn group_assignments(taken: &[TakenAssignment]) -> Vec<CommitGroup> {
    let mut groups: Vec<CommitGroup> = Vec::new();
    let mut index_by_key: HashMap<GroupKey, usize> = HashMap::new();
    for item in taken {
        let target = CommitTarget::from_origin(&item.origin);
        let key = target.group_key();
        match index_by_key.get(&key) {
            Some(index) => groups[*index].entries.push(item.assignment.entry_id),
            None => {
                index_by_key.insert(key, groups.len());
                groups.push(CommitGroup {
                    target,
                    entries: vec![item.assignment.entry_id],
                });
            }
        }
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryFailure {
    pub entry_id: EntryId,
    pub code: String,
    pub message: String,
}

impl EntryFailure {
    fn from_error(entry_id: EntryId, error: &AppError) -> Self {
        Self {
            entry_id,
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupOutcome {
    pub target: CommitTarget,
    /// Resolved destination; `None` when resolution failed or the target is uncategorized.
    pub topic_id: Option<TopicId>,
    pub created_topic: bool,
    pub moved: Vec<EntryId>,
    pub failed: Vec<EntryFailure>,
}

impl GroupOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-item result of a commit. Successful moves are never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitReport {
    pub groups: Vec<GroupOutcome>,
}

impl CommitReport {
    pub fn moved_entries(&self) -> Vec<EntryId> {
        self.groups
            .iter()
            .flat_map(|group| group.moved.iter().copied())
            .collect()
    }

    pub fn failed_entries(&self) -> Vec<EntryId> {
        self.groups
            .iter()
            .flat_map(|group| group.failed.iter().map(|failure| failure.entry_id))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryFailure> {
        self.groups.iter().flat_map(|group| group.failed.iter())
    }

    pub fn created_topics(&self) -> Vec<TopicId> {
        self.groups
            .iter()
            .filter(|group| group.created_topic)
            .filter_map(|group| group.topic_id)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.groups.iter().all(GroupOutcome::is_complete)
    }

    pub fn into_result(self) -> AppResult<Self> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(AppError::PartialCommit {
            moved: self.moved_entries().len(),
            failed: self.failed_entries().len(),
        })
    }
}

/// Turns accepted groups into create-topic and move-entry calls.
///
/// Topic names are resolved against a cache seeded from the persistence
/// service, so a name is created at most once per batch and a new-topic name
/// matching an existing topic reuses that topic.
pub struct ReconciliationCommitter {
    persistence: Arc<dyn PersistenceService>,
    topics_by_name: HashMap<String, TopicId>,
    names_by_id: HashMap<TopicId, String>,
    move_concurrency: usize,
}

impl ReconciliationCommitter {
    pub fn new(persistence: Arc<dyn PersistenceService>, move_concurrency: usize) -> Self {
        Self {
            persistence,
            topics_by_name: HashMap::new(),
            names_by_id: HashMap::new(),
            move_concurrency: move_concurrency.max(1),
        }
    }

    /// Reloads the topic cache. Returns how many real topics are known.
    pub async fn seed(&mut self) -> AppResult<usize> {
        let topics = self.persistence.get_topics().await?;
        self.topics_by_name.clear();
        self.names_by_id.clear();
        for topic in topics {
            match topic {
                TopicRef::Real(topic) => self.remember(topic.id, &topic.name),
                TopicRef::Uncategorized | TopicRef::AllTopics => {}
            }
        }
        tracing::debug!(topics = self.names_by_id.len(), "topic cache seeded");
        Ok(self.names_by_id.len())
    }

    pub fn cached_topic(&self, name: &str) -> Option<TopicId> {
        self.topics_by_name.get(&normalize_topic_name(name)).copied()
    }

    pub fn topic_name(&self, topic_id: TopicId) -> Option<&str> {
        self.names_by_id.get(&topic_id).map(String::as_str)
    }

    fn remember(&mut self, topic_id: TopicId, name: &str) {
        self.topics_by_name
            .entry(normalize_topic_name(name))
            .or_insert(topic_id);
        self.names_by_id.insert(topic_id, name.to_string());
    }

    fn forget(&mut self, topic_id: TopicId) {
        self.names_by_id.remove(&topic_id);
        self.topics_by_name.retain(|_, id| *id != topic_id);
    }

    async fn resolve(&mut self, target: &CommitTarget) -> AppResult<(Placement, bool)> {
        match target {
            CommitTarget::Existing { topic_id, .. } => Ok((Placement::Topic(*topic_id), false)),
            CommitTarget::Uncategorized => Ok((Placement::Uncategorized, false)),
            CommitTarget::New { topic_name } => {
                let name = topic_name.trim();
                if name.is_empty() {
                    return Err(AppError::Validation("New topic name cannot be empty".to_string()));
                }
                if let Some(topic_id) = self.cached_topic(name) {
                    tracing::debug!(topic_id, name, "reusing existing topic for new-topic name");
                    return Ok((Placement::Topic(topic_id), false));
                }
                let topic = self.persistence.create_topic(name).await?;
                tracing::info!(topic_id = topic.id, name = %topic.name, "created topic");
                self.remember(topic.id, &topic.name);
                Ok((Placement::Topic(topic.id), true))
            }
        }
    }

    /// Resolves the group's target, then moves its entries concurrently.
    /// A failed resolution fails every entry of this group only; a stale
    /// topic reference aborts the group's outstanding moves.
    pub async fn commit_group(&mut self, group: CommitGroup) -> GroupOutcome {
        let CommitGroup { target, entries } = group;
        let (placement, created_topic) = match self.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::warn!(topic = target.label(), error = %error, "topic resolution failed");
                let failed = entries
                    .iter()
                    .map(|entry_id| EntryFailure::from_error(*entry_id, &error))
                    .collect();
                return GroupOutcome {
                    target,
                    topic_id: None,
                    created_topic: false,
                    moved: Vec::new(),
                    failed,
                };
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.move_concurrency));
        let mut pending: HashSet<EntryId> = entries.iter().copied().collect();
        let mut join_set: JoinSet<(EntryId, AppResult<()>)> = JoinSet::new();
        for entry_id in entries.iter().copied() {
            let persistence = Arc::clone(&self.persistence);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (entry_id, Err(AppError::Internal("move limiter closed".to_string()))),
                };
                let result = persistence
                    .update_entry(entry_id, EntryUpdate::move_to(placement))
                    .await
                    .map(|_| ());
                (entry_id, result)
            });
        }

        let mut moved = Vec::new();
        let mut failed = Vec::new();
        let mut stale: Option<String> = None;
        while let Some(joined) = join_set.join_next().await {
            let Ok((entry_id, result)) = joined else {
                continue;
            };
            pending.remove(&entry_id);
            match result {
                Ok(()) => moved.push(entry_id),
                Err(error) => {
                    tracing::warn!(entry_id, error = %error, "entry move failed");
                    if matches!(error, AppError::StaleReference(_)) && stale.is_none() {
                        stale = Some(error.to_string());
                        join_set.abort_all();
                    }
                    failed.push(EntryFailure::from_error(entry_id, &error));
                }
            }
        }

        // Moves cancelled by an abort, or whose task panicked.
        let reason = stale.clone().unwrap_or_else(|| "move task did not complete".to_string());
        for entry_id in entries.iter().filter(|entry_id| pending.contains(entry_id)) {
            let error = if stale.is_some() {
                AppError::StaleReference(reason.clone())
            } else {
                AppError::Internal(reason.clone())
            };
            failed.push(EntryFailure::from_error(*entry_id, &error));
        }

        if stale.is_some() {
            if let Placement::Topic(topic_id) = placement {
                self.forget(topic_id);
            }
        }

        moved.sort_by_key(|entry_id| entries.iter().position(|candidate| candidate == entry_id));
        tracing::info!(
            topic = target.label(),
            moved = moved.len(),
            failed = failed.len(),
            "commit group finished"
        );
        GroupOutcome {
            target,
            topic_id: placement.topic_id(),
            created_topic,
            moved,
            failed,
        }
    }

    /// Moves one entry and returns where it landed, with the underlying error on failure.
    pub async fn commit_entry(&mut self, target: &CommitTarget, entry_id: EntryId) -> AppResult<Placement> {
        let (placement, _) = self.resolve(target).await?;
        match self
            .persistence
            .update_entry(entry_id, EntryUpdate::move_to(placement))
            .await
        {
            Ok(_) => {
                tracing::info!(entry_id, topic = target.label(), "entry moved");
                Ok(placement)
            }
            Err(error) => {
                if let (AppError::StaleReference(_), Placement::Topic(topic_id)) = (&error, placement) {
                    self.forget(topic_id);
                }
                tracing::warn!(entry_id, error = %error, "entry move failed");
                Err(error)
            }
        }
    }

    /// Commits groups one after another; a failing group never stops its siblings.
    pub async fn commit_groups(&mut self, groups: Vec<CommitGroup>) -> CommitReport {
        let mut report = CommitReport::default();
        for group in groups {
            let outcome = self.commit_group(group).await;
            report.groups.push(outcome);
        }
        report
    }
}
